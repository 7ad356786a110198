//! # Scheduler: autoscale, admission, dispatch, cancellation, teardown.
//!
//! The scheduler is a single event loop owning **all** mutable pool state —
//! the task queue, the worker sets, the reentrancy latch, the sticky
//! bootstrap-failure flag. No internal locking: every touch happens on this
//! loop. The facade, abort watchers, idle timers, and worker threads talk to
//! it exclusively through the command channel.
//!
//! ## Architecture
//! ```text
//! Pool::submit() ──► Command::Submit ──► admission (steps 1–8)
//!                                          ├─► dispatch to least-loaded ready worker
//!                                          ├─► enqueue (bounded by max_queue + pending capacity)
//!                                          └─► reject
//!
//! worker thread  ──► Command::WorkerSignal ──► drain that port
//!                                               └─► fast-path sweep of every
//!                                                   worker whose response lane
//!                                                   is ahead of the cursor
//!
//! abort watcher  ──► Command::Abort ──► reject first, then tear the owning
//!                                       worker down and replenish
//! idle timer     ──► Command::IdleExpired ──► retire supernumerary worker
//! Pool::destroy()──► Command::Destroy ──► fail queue, destroy workers, join
//! ```
//!
//! ## Rules
//! - Admission follows a strict order; a submission fails at most once with
//!   the first applicable error.
//! - The queue is FIFO; dispatch order equals submission order for queued
//!   tasks.
//! - An abortable task only ever lands on a fully idle worker.
//! - The fast-path sweep is guarded by a reentrancy latch, not a lock: the
//!   controller is single-threaded by construction.

use std::collections::VecDeque;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::core::channel::{WakeChannel, WorkerMessage};
use crate::core::handle::WorkerHandle;
use crate::core::worker::{self, WorkerContext};
use crate::core::workers::WorkerSet;
use crate::error::{PoolError, TaskError};
use crate::events::{Bus, Event, EventKind};
use crate::metrics::PoolStats;
use crate::tasks::{ModuleRegistry, TaskDescriptor};
use crate::transfer::{Buffer, Payload};

/// Commands accepted by the scheduler loop.
pub(crate) enum Command {
    /// New submission from the facade.
    Submit(SubmitRequest),
    /// An abort token fired for this task.
    Abort(u64),
    /// A worker posted at least one message on its response port.
    WorkerSignal(u64),
    /// An idle-retirement timer fired.
    IdleExpired { worker: u64, epoch: u64 },
    /// Pool destruction; `None` when fired from `Drop`.
    Destroy(Option<oneshot::Sender<()>>),
}

/// One submission, as shipped from the facade to the scheduler.
pub(crate) struct SubmitRequest {
    pub payload: Payload,
    pub transfer: Vec<Buffer>,
    pub module: Option<String>,
    pub abort: Option<CancellationToken>,
    pub submitted_at: Instant,
    pub reply: oneshot::Sender<Result<Payload, PoolError>>,
}

/// The scheduler loop state.
pub(crate) struct Scheduler {
    config: Config,
    registry: Arc<ModuleRegistry>,
    workers: WorkerSet,
    queue: VecDeque<TaskDescriptor>,
    stats: Arc<PoolStats>,
    bus: Bus,
    /// Self-addressed sender handed to workers, watchers, and timers.
    commands: mpsc::UnboundedSender<Command>,
    next_task_id: u64,
    next_worker_id: u64,
    /// Reentrancy latch for the fast-path sweep.
    in_process_pending_messages: bool,
    /// Initial fill in progress: new workers skip the ready gate.
    starting_up: bool,
    /// Latched when a worker dies before its ready sentinel, so the pool
    /// does not spin up doomed replacements endlessly.
    worker_fails_during_bootstrap: bool,
    /// A task has been queued since the last drain notification.
    needs_drain: bool,
    destroyed: bool,
}

impl Scheduler {
    pub fn new(
        config: Config,
        registry: Arc<ModuleRegistry>,
        bus: Bus,
        stats: Arc<PoolStats>,
        commands: mpsc::UnboundedSender<Command>,
    ) -> Self {
        let max_per_worker = config.concurrent_tasks_per_worker;
        Self {
            config,
            registry,
            workers: WorkerSet::new(max_per_worker),
            queue: VecDeque::new(),
            stats,
            bus,
            commands,
            next_task_id: 0,
            next_worker_id: 0,
            in_process_pending_messages: false,
            starting_up: false,
            worker_fails_during_bootstrap: false,
            needs_drain: false,
            destroyed: false,
        }
    }

    /// Runs the loop until destruction.
    pub async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
        // Initial fill: these workers are marked ready without waiting for
        // the sentinel — there is no work yet to post.
        self.starting_up = true;
        self.ensure_minimum_workers();
        self.starting_up = false;

        while let Some(cmd) = rx.recv().await {
            match cmd {
                Command::Submit(req) => self.handle_submit(req),
                Command::Abort(task) => self.handle_abort(task),
                Command::WorkerSignal(worker) => self.handle_worker_signal(worker),
                Command::IdleExpired { worker, epoch } => {
                    self.handle_idle_expired(worker, epoch)
                }
                Command::Destroy(ack) => {
                    self.handle_destroy().await;
                    if let Some(ack) = ack {
                        let _ = ack.send(());
                    }
                    break;
                }
            }
        }

        // Every facade handle gone without an explicit destroy.
        if !self.destroyed {
            self.handle_destroy().await;
        }
    }

    // ---------------------------
    // Submission admission
    // ---------------------------

    fn handle_submit(&mut self, req: SubmitRequest) {
        if self.destroyed {
            let _ = req.reply.send(Err(PoolError::Closed));
            return;
        }

        // 1. Resolve the target module: call site first, then the default.
        let module = match req.module.or_else(|| self.config.module_name.clone()) {
            Some(m) => m,
            None => {
                let _ = req.reply.send(Err(PoolError::ModuleNotProvided));
                return;
            }
        };

        // 2. Build the descriptor and subscribe its single abort edge.
        let id = self.next_task_id;
        self.next_task_id += 1;
        let desc = TaskDescriptor::new(
            id,
            req.payload,
            req.transfer,
            module,
            req.abort,
            req.submitted_at,
            req.reply,
        );
        self.install_abort_watcher(&desc);

        // 3. A non-empty queue means every ready worker is saturated: admit
        //    against the effective capacity, which counts warming workers.
        if !self.queue.is_empty() {
            if let Some(cap) = self.config.max_queue.resolve(self.config.max_threads) {
                let effective = cap + self.workers.pending_capacity();
                if self.queue.len() >= effective {
                    let mut desc = desc;
                    desc.complete(Err(if cap == 0 {
                        PoolError::NoQueueAvailable
                    } else {
                        PoolError::QueueAtLimit
                    }));
                    return;
                }
            }
            if self.workers.len() < self.config.max_threads {
                self.spawn_worker();
            }
            self.enqueue(desc);
            return;
        }

        // 4. Least-loaded ready worker.
        let mut selected = self.workers.find_available();

        // 5. Abortable tasks require an otherwise-idle worker.
        if let Some(wid) = selected {
            let usage = self.workers.get(wid).map_or(0, WorkerHandle::current_usage);
            if usage > 0 && desc.is_abortable() {
                selected = None;
            }
        }

        // 6. Grow the pool ahead of demand when the selection is missing or
        //    already loaded.
        let selection_loaded = selected.map_or(true, |wid| {
            self.workers
                .get(wid)
                .map_or(true, |h| h.current_usage() > 0)
        });
        let mut waiting_for_new_worker = false;
        if selection_loaded && self.workers.len() < self.config.max_threads {
            self.spawn_worker();
            waiting_for_new_worker = true;
        }

        // 7. Nothing to dispatch to: queue, or reject when queueing is off.
        let Some(wid) = selected else {
            if self.config.max_queue.is_zero() && !waiting_for_new_worker {
                let mut desc = desc;
                desc.complete(Err(PoolError::NoQueueAvailable));
                return;
            }
            self.enqueue(desc);
            return;
        };

        // 8. Dispatch now.
        self.dispatch(wid, desc);
        self.maybe_drain();
    }

    fn install_abort_watcher(&self, desc: &TaskDescriptor) {
        let (Some(token), Some(guard)) = (desc.abort_token(), desc.watcher_guard()) else {
            return;
        };
        let token = token.clone();
        let guard = guard.clone();
        let commands = self.commands.clone();
        let task = desc.id();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    let _ = commands.send(Command::Abort(task));
                }
                // Completion releases the guard; the subscription is
                // single-shot either way.
                _ = guard.cancelled() => {}
            }
        });
    }

    fn enqueue(&mut self, desc: TaskDescriptor) {
        self.queue.push_back(desc);
        self.needs_drain = true;
        self.stats
            .queue_depth
            .store(self.queue.len(), Ordering::Relaxed);
    }

    fn dispatch(&mut self, worker: u64, mut desc: TaskDescriptor) {
        self.stats.wait_time.record(desc.created_at().elapsed());
        let task = desc.id();
        let Some(handle) = self.workers.get_mut(worker) else {
            desc.complete(Err(PoolError::WorkerTerminated));
            return;
        };
        if handle.post(desc) {
            self.bus.publish(
                Event::now(EventKind::TaskDispatched)
                    .with_task(task)
                    .with_worker(worker),
            );
        }
    }

    fn maybe_drain(&mut self) {
        if self.needs_drain && self.queue.is_empty() {
            self.needs_drain = false;
            self.bus.publish(Event::now(EventKind::Drain));
        }
    }

    // ---------------------------
    // Worker lifecycle
    // ---------------------------

    fn spawn_worker(&mut self) {
        let id = self.next_worker_id;
        self.next_worker_id += 1;

        let (controller, worker_end) = WakeChannel::create(id, self.commands.clone());
        let token = CancellationToken::new();
        let ctx = WorkerContext {
            id,
            channel: worker_end,
            registry: Arc::clone(&self.registry),
            default_module: self.config.module_name.clone(),
            worker_data: self.config.worker.worker_data.clone(),
            token: token.clone(),
        };

        let thread = match worker::spawn(ctx, &self.config.worker) {
            Ok(t) => t,
            Err(e) => {
                self.worker_fails_during_bootstrap = true;
                self.bus.publish(
                    Event::now(EventKind::WorkerError)
                        .with_worker(id)
                        .with_error(format!("spawn failed: {e}")),
                );
                return;
            }
        };

        let handle = WorkerHandle::new(id, controller, thread, token);
        self.bus
            .publish(Event::now(EventKind::WorkerSpawned).with_worker(id));
        if self.starting_up {
            self.workers.insert_ready(handle);
            self.bus
                .publish(Event::now(EventKind::WorkerReady).with_worker(id));
        } else {
            self.workers.insert_pending(handle);
        }
        self.sync_worker_gauges();
    }

    fn ensure_minimum_workers(&mut self) {
        if self.destroyed || self.worker_fails_during_bootstrap {
            return;
        }
        while self.workers.len() < self.config.min_threads {
            self.spawn_worker();
        }
    }

    fn sync_worker_gauges(&self) {
        self.stats
            .thread_count
            .store(self.workers.len(), Ordering::Relaxed);
        self.stats
            .pending_capacity
            .store(self.workers.pending_capacity(), Ordering::Relaxed);
    }

    /// Edge-triggered: a worker's usage dropped below the limit, or a
    /// pending worker became ready.
    fn on_worker_available(&mut self, worker: u64) {
        loop {
            let Some(handle) = self.workers.get(worker) else {
                return;
            };
            if !handle.is_ready() {
                break;
            }
            let usage = handle.current_usage();
            if self.queue.is_empty() || usage >= self.config.concurrent_tasks_per_worker {
                break;
            }
            // An abortable head waits for a fully idle worker.
            if usage > 0
                && self
                    .queue
                    .front()
                    .is_some_and(TaskDescriptor::is_abortable)
            {
                break;
            }
            let desc = self.queue.pop_front().expect("queue checked non-empty");
            self.stats
                .queue_depth
                .store(self.queue.len(), Ordering::Relaxed);
            self.dispatch(worker, desc);
        }
        self.maybe_drain();

        // Completely idle and supernumerary: start the retirement clock.
        let Some(timeout) = self.config.idle_timeout_opt() else {
            return;
        };
        let above_min = self.workers.len() > self.config.min_threads;
        let commands = self.commands.clone();
        if let Some(handle) = self.workers.get_mut(worker) {
            if above_min && handle.is_ready() && handle.in_flight() == 0 {
                handle.arm_idle_timer(timeout, commands);
            }
        }
    }

    fn handle_idle_expired(&mut self, worker: u64, epoch: u64) {
        let still_idle = self
            .workers
            .get(worker)
            .map_or(false, |h| h.idle_epoch_matches(epoch) && h.in_flight() == 0);
        if !still_idle || self.workers.len() <= self.config.min_threads {
            return;
        }
        if let Some(mut handle) = self.workers.remove(worker) {
            let _ = handle.destroy();
            self.bus
                .publish(Event::now(EventKind::WorkerRemoved).with_worker(worker));
            self.sync_worker_gauges();
        }
    }

    fn handle_worker_failure(&mut self, worker: u64, error: String) {
        let Some(mut handle) = self.workers.remove(worker) else {
            return;
        };
        let bootstrapped = handle.is_bootstrapped();
        let descriptors = handle.drain_tasks();
        let _ = handle.destroy();
        self.bus.publish(
            Event::now(EventKind::WorkerRemoved)
                .with_worker(worker)
                .with_error(error.clone()),
        );
        self.sync_worker_gauges();

        if bootstrapped {
            self.ensure_minimum_workers();
        } else {
            self.worker_fails_during_bootstrap = true;
        }

        if descriptors.is_empty() {
            // No owning submission: surface on the event bus.
            self.bus.publish(
                Event::now(EventKind::WorkerError)
                    .with_worker(worker)
                    .with_error(error),
            );
        } else {
            for mut desc in descriptors {
                self.bus.publish(
                    Event::now(EventKind::TaskFailed)
                        .with_task(desc.id())
                        .with_worker(worker)
                        .with_error(error.clone()),
                );
                desc.complete(Err(PoolError::WorkerCrashed {
                    reason: error.clone(),
                }));
            }
        }
    }

    // ---------------------------
    // Responses
    // ---------------------------

    fn handle_worker_signal(&mut self, worker: u64) {
        self.drain_worker(worker);
        self.process_pending_messages();
    }

    fn drain_worker(&mut self, worker: u64) {
        loop {
            let Some(msg) = self.workers.get_mut(worker).and_then(WorkerHandle::try_recv) else {
                break;
            };
            self.handle_worker_message(worker, msg);
        }
    }

    fn handle_worker_message(&mut self, worker: u64, msg: WorkerMessage) {
        match msg {
            WorkerMessage::Ready => {
                if self.workers.mark_ready(worker) {
                    self.bus
                        .publish(Event::now(EventKind::WorkerReady).with_worker(worker));
                }
                self.sync_worker_gauges();
                self.on_worker_available(worker);
            }
            WorkerMessage::Response { task_id, result } => {
                if let Some(handle) = self.workers.get_mut(worker) {
                    handle.note_response_seen();
                }
                self.complete_task(worker, task_id, result);
            }
            WorkerMessage::Fatal { error } => self.handle_worker_failure(worker, error),
            WorkerMessage::Exited => {}
        }
    }

    fn complete_task(
        &mut self,
        worker: u64,
        task_id: u64,
        result: Result<Payload, TaskError>,
    ) {
        let Some(mut desc) = self
            .workers
            .get_mut(worker)
            .and_then(|h| h.take_task(task_id))
        else {
            // Aborted or torn down before the response landed.
            return;
        };

        self.stats.completed.fetch_add(1, Ordering::Relaxed);
        if let Some(started) = desc.started_at() {
            self.stats.run_time.record(started.elapsed());
        }

        match result {
            Ok(value) => {
                self.bus.publish(
                    Event::now(EventKind::TaskCompleted)
                        .with_task(task_id)
                        .with_worker(worker),
                );
                desc.complete(Ok(value));
            }
            Err(err) => {
                self.bus.publish(
                    Event::now(EventKind::TaskFailed)
                        .with_task(task_id)
                        .with_worker(worker)
                        .with_error(err.to_string()),
                );
                desc.complete(Err(PoolError::Task(err)));
            }
        }

        self.on_worker_available(worker);
    }

    /// Fast path: one response event sweeps every worker whose response lane
    /// is ahead of its drain cursor, collapsing many wakeups into one turn.
    fn process_pending_messages(&mut self) {
        if !self.config.use_atomics || self.in_process_pending_messages {
            return;
        }
        self.in_process_pending_messages = true;
        for worker in self.workers.ids() {
            loop {
                let pending = self
                    .workers
                    .get(worker)
                    .map_or(false, WorkerHandle::has_unseen_responses);
                if !pending {
                    break;
                }
                let Some(msg) = self.workers.get_mut(worker).and_then(WorkerHandle::try_recv)
                else {
                    // The lane is ahead of the port enqueue; the chasing
                    // signal will finish the drain.
                    break;
                };
                self.handle_worker_message(worker, msg);
            }
        }
        self.in_process_pending_messages = false;
    }

    // ---------------------------
    // Cancellation
    // ---------------------------

    fn handle_abort(&mut self, task_id: u64) {
        // Still queued: remove by identity; order is preserved for the rest.
        if let Some(pos) = self.queue.iter().position(|d| d.id() == task_id) {
            let mut desc = self.queue.remove(pos).expect("position in range");
            self.stats
                .queue_depth
                .store(self.queue.len(), Ordering::Relaxed);
            desc.complete(Err(PoolError::Aborted));
            self.bus
                .publish(Event::now(EventKind::TaskAborted).with_task(task_id));
            self.maybe_drain();
            return;
        }

        // Dispatched. The rejection must land before any teardown side
        // effect: the two race otherwise.
        let Some(owner) = self.workers.find_owner(task_id) else {
            // Already completed through another path.
            return;
        };
        let Some(mut desc) = self
            .workers
            .get_mut(owner)
            .and_then(|h| h.take_task(task_id))
        else {
            return;
        };
        debug_assert_eq!(desc.owning_worker(), Some(owner));
        desc.complete(Err(PoolError::Aborted));
        self.bus.publish(
            Event::now(EventKind::TaskAborted)
                .with_task(task_id)
                .with_worker(owner),
        );

        // An in-flight task cannot be surgically revoked; the worker goes
        // with it. Admission guarantees it held nothing else.
        if let Some(mut handle) = self.workers.remove(owner) {
            let _ = handle.destroy();
            self.bus
                .publish(Event::now(EventKind::WorkerRemoved).with_worker(owner));
            self.sync_worker_gauges();
        }
        self.ensure_minimum_workers();
    }

    // ---------------------------
    // Destroy
    // ---------------------------

    async fn handle_destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;
        self.needs_drain = false;
        self.bus.publish(Event::now(EventKind::ShutdownRequested));

        while let Some(mut desc) = self.queue.pop_front() {
            desc.complete(Err(PoolError::WorkerTerminated));
        }
        self.stats.queue_depth.store(0, Ordering::Relaxed);

        let mut joins = Vec::new();
        for id in self.workers.ids() {
            if let Some(mut handle) = self.workers.remove(id) {
                if let Some(join) = handle.destroy() {
                    joins.push(join);
                }
                self.bus
                    .publish(Event::now(EventKind::WorkerRemoved).with_worker(id));
            }
        }
        self.sync_worker_gauges();

        // Wait for every worker thread's exit, bounded by the grace period
        // (an uncooperative module must not wedge destruction forever).
        let join_all = tokio::task::spawn_blocking(move || {
            for join in joins {
                let _ = join.join();
            }
        });
        let _ = tokio::time::timeout(self.config.grace, join_all).await;
    }
}
