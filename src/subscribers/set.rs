//! # SubscriberSet: fan-out of pool events.
//!
//! One feed per subscriber: a bounded queue plus a task that awaits
//! `on_event` for each queued event. The scheduler-side `emit_arc` never
//! waits — a feed that cannot keep up within its queue loses events, and the
//! loss is counted per subscriber rather than silently swallowed.
//!
//! ## Rules
//! - [`Subscribe::wants`] filtering happens before queueing, so a
//!   Drain-only watcher never sees task-lifecycle traffic.
//! - Per-subscriber FIFO; no ordering across subscribers (the `seq` field on
//!   [`Event`] recovers a global order when one is needed).
//! - A panicking subscriber is isolated: the panic is caught and reported,
//!   and the feed keeps going.
//! - Queue capacity is the pool's `bus_capacity`: a subscriber that would
//!   lag the broadcast ring would lose events there anyway, so the feeds
//!   apply the same bound.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::events::Event;

use super::Subscribe;

/// One subscriber's feed: queue entry point plus drop accounting.
struct Feed {
    subscriber: Arc<dyn Subscribe>,
    queue: mpsc::Sender<Arc<Event>>,
    dropped: Arc<AtomicU64>,
}

/// Fan-out over the pool's subscribers, one bounded feed each.
pub struct SubscriberSet {
    feeds: Vec<Feed>,
    tasks: Vec<JoinHandle<()>>,
}

impl SubscriberSet {
    /// Spawns one feed per subscriber.
    ///
    /// `queue_capacity` is the pool's bus capacity, so the feeds and the
    /// broadcast ring overflow on the same backlog.
    #[must_use]
    pub fn new(subscribers: Vec<Arc<dyn Subscribe>>, queue_capacity: usize) -> Self {
        let mut feeds = Vec::with_capacity(subscribers.len());
        let mut tasks = Vec::with_capacity(subscribers.len());

        for subscriber in subscribers {
            let (queue, rx) = mpsc::channel(queue_capacity.max(1));
            tasks.push(Self::spawn_feed(Arc::clone(&subscriber), rx));
            feeds.push(Feed {
                subscriber,
                queue,
                dropped: Arc::new(AtomicU64::new(0)),
            });
        }

        Self { feeds, tasks }
    }

    fn spawn_feed(
        subscriber: Arc<dyn Subscribe>,
        mut rx: mpsc::Receiver<Arc<Event>>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let handled = std::panic::AssertUnwindSafe(subscriber.on_event(&event))
                    .catch_unwind()
                    .await;
                if handled.is_err() {
                    eprintln!(
                        "[poolvisor] subscriber '{}' panicked on {:?} event",
                        subscriber.name(),
                        event.kind
                    );
                }
            }
        })
    }

    /// Offers one event to every interested feed, without waiting.
    pub fn emit_arc(&self, event: Arc<Event>) {
        for feed in &self.feeds {
            if !feed.subscriber.wants(event.kind) {
                continue;
            }
            if feed.queue.try_send(Arc::clone(&event)).is_err() {
                // Full or closed: either way the subscriber lost this event.
                feed.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Events lost per subscriber since construction, by name.
    pub fn dropped(&self) -> Vec<(&'static str, u64)> {
        self.feeds
            .iter()
            .map(|f| (f.subscriber.name(), f.dropped.load(Ordering::Relaxed)))
            .collect()
    }

    /// Closes every feed and waits for the queued events to be handled.
    pub async fn shutdown(self) {
        let Self { feeds, tasks } = self;
        drop(feeds);
        for task in tasks {
            let _ = task.await;
        }
    }
}
