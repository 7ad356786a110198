//! # Pool: the public facade.
//!
//! [`Pool`] owns the runtime components (event bus, subscriber fan-out,
//! scheduler loop) and exposes the submission surface and the observability
//! snapshot.
//!
//! ## Architecture
//! ```text
//! Pool::new() ──► validate Config
//!                 ├──► Bus + SubscriberSet (non-blocking fan-out)
//!                 ├──► spawn Scheduler loop (fills to min_threads)
//!                 └──► command channel handle
//!
//! Pool::submit() ──► Command::Submit ──► oneshot completion
//! Pool::destroy() ──► Command::Destroy ──► waits for worker threads to exit
//! ```
//!
//! ## Rules
//! - Construction must happen inside a tokio runtime (the scheduler is a
//!   spawned task).
//! - A submission resolves exactly once: the worker's result, or the first
//!   applicable [`PoolError`].
//! - Dropping the pool tears the scheduler down; prefer an explicit
//!   [`Pool::destroy`] to also wait for worker threads to exit.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, mpsc, oneshot};

use crate::config::Config;
use crate::core::scheduler::{Command, Scheduler, SubmitRequest};
use crate::error::PoolError;
use crate::events::{Bus, Event};
use crate::metrics::{LatencySummary, PoolStats};
use crate::subscribers::{Subscribe, SubscriberSet};
use crate::tasks::{ModuleRegistry, Submission};
use crate::transfer::Payload;

/// Worker-thread pool with least-loaded steering, autoscaling, bounded
/// queueing, and cancellation.
#[derive(Debug)]
pub struct Pool {
    commands: mpsc::UnboundedSender<Command>,
    stats: Arc<PoolStats>,
    bus: Bus,
    config: Config,
}

impl Pool {
    /// Creates a pool with no subscribers.
    pub fn new(config: Config, registry: Arc<ModuleRegistry>) -> Result<Self, PoolError> {
        Self::with_subscribers(config, registry, Vec::new())
    }

    /// Creates a pool, validates the configuration, wires the subscriber
    /// fan-out, and fills the worker set to `min_threads`.
    pub fn with_subscribers(
        config: Config,
        registry: Arc<ModuleRegistry>,
        subscribers: Vec<Arc<dyn Subscribe>>,
    ) -> Result<Self, PoolError> {
        config.validate()?;

        let bus = Bus::new(config.bus_capacity_clamped());
        let stats = Arc::new(PoolStats::new());
        let (tx, rx) = mpsc::unbounded_channel();

        if !subscribers.is_empty() {
            Self::subscriber_listener(&bus, subscribers, config.bus_capacity_clamped());
        }

        let scheduler = Scheduler::new(
            config.clone(),
            registry,
            bus.clone(),
            Arc::clone(&stats),
            tx.clone(),
        );
        tokio::spawn(scheduler.run(rx));

        Ok(Self {
            commands: tx,
            stats,
            bus,
            config,
        })
    }

    /// Spawns the background task bridging the bus to the subscriber set.
    ///
    /// Feed queues reuse the bus capacity: a subscriber that would lag the
    /// broadcast ring loses events at the same backlog either way.
    fn subscriber_listener(bus: &Bus, subscribers: Vec<Arc<dyn Subscribe>>, queue_capacity: usize) {
        let set = SubscriberSet::new(subscribers, queue_capacity);
        let mut rx = bus.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(ev) => set.emit_arc(Arc::new(ev)),
                    Err(broadcast::error::RecvError::Closed) => break,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                }
            }
            set.shutdown().await;
        });
    }

    /// Submits a payload against the pool's default module.
    pub async fn run(&self, payload: impl Into<Payload>) -> Result<Payload, PoolError> {
        self.submit(Submission::new(payload)).await
    }

    /// Submits a fully specified task.
    ///
    /// Resolves with the worker's result, or fails with the first applicable
    /// error (see [`PoolError`]).
    pub async fn submit(&self, submission: Submission) -> Result<Payload, PoolError> {
        let (reply, completion) = oneshot::channel();
        let req = SubmitRequest {
            payload: submission.payload,
            transfer: submission.transfer,
            module: submission.module,
            abort: submission.abort,
            submitted_at: Instant::now(),
            reply,
        };
        self.commands
            .send(Command::Submit(req))
            .map_err(|_| PoolError::Closed)?;
        completion.await.map_err(|_| PoolError::Closed)?
    }

    /// Destroys the pool: fails queued tasks, tears every worker down, and
    /// waits (bounded by `Config::grace`) for worker threads to exit.
    pub async fn destroy(&self) -> Result<(), PoolError> {
        let (ack, done) = oneshot::channel();
        if self.commands.send(Command::Destroy(Some(ack))).is_err() {
            // Scheduler already gone.
            return Ok(());
        }
        let _ = done.await;
        Ok(())
    }

    /// Subscribes to the pool's event stream directly.
    pub fn events(&self) -> broadcast::Receiver<Event> {
        self.bus.subscribe()
    }

    // ---------------------------
    // Observability
    // ---------------------------

    /// The configuration the pool was built with.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Queue size as seen by callers; still-warming workers absorb their
    /// share of the backlog.
    pub fn queue_size(&self) -> usize {
        self.stats.visible_queue_size()
    }

    /// Tasks that finished on a worker (success or task error).
    pub fn completed(&self) -> u64 {
        self.stats.completed.load(Ordering::Relaxed)
    }

    /// Live worker count, pending and ready.
    pub fn threads(&self) -> usize {
        self.stats.thread_count.load(Ordering::Relaxed)
    }

    /// Time since the pool was constructed.
    pub fn duration(&self) -> Duration {
        self.stats.duration()
    }

    /// Submission-to-dispatch latency distribution.
    pub fn wait_time(&self) -> LatencySummary {
        self.stats.wait_time.summary()
    }

    /// Dispatch-to-completion latency distribution.
    pub fn run_time(&self) -> LatencySummary {
        self.stats.run_time.summary()
    }

    /// Fraction of the pool's theoretical run-time capacity actually used.
    pub fn utilization(&self) -> f64 {
        self.stats.utilization(self.config.max_threads)
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        // Best-effort teardown when the caller skipped destroy().
        let _ = self.commands.send(Command::Destroy(None));
    }
}
