//! # Runtime events emitted by the scheduler and worker handles.
//!
//! The [`EventKind`] enum classifies event types across three categories:
//! - **Queue events**: the backlog draining empty
//! - **Worker lifecycle**: spawn, ready, removal, stray errors
//! - **Task lifecycle**: dispatch, completion, failure, abort
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases
//! monotonically, so events can be ordered correctly even when delivered
//! out-of-order through async channels.
//!
//! ## Event flow examples
//!
//! ### Direct dispatch
//! ```text
//! Pool::submit()
//!   → TaskDispatched
//!   → TaskCompleted | TaskFailed
//! ```
//!
//! ### Queued dispatch
//! ```text
//! Pool::submit()
//!   → [queued]
//!   → TaskDispatched (worker became available)
//!   → Drain (queue emptied)
//! ```
//!
//! ### Abort of a dispatched task
//! ```text
//! abort token fires
//!   → TaskAborted
//!   → WorkerRemoved (teardown)
//!   → WorkerSpawned (replenish to min_threads)
//! ```

use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::SystemTime;

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of runtime events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // === Queue events ===
    /// The task queue became empty.
    Drain,

    // === Worker lifecycle events ===
    /// A new worker thread was spawned (pending until ready).
    WorkerSpawned,
    /// A worker finished bootstrapping and joined the ready set.
    WorkerReady,
    /// A worker was removed (idle retirement, abort teardown, crash, shutdown).
    WorkerRemoved,
    /// A worker error with no owning submission.
    WorkerError,

    // === Task lifecycle events ===
    /// A task was posted to a worker.
    TaskDispatched,
    /// A task completed successfully.
    TaskCompleted,
    /// A task failed (module error or worker crash).
    TaskFailed,
    /// A task was canceled by its abort token.
    TaskAborted,

    // === Shutdown ===
    /// Pool destruction began.
    ShutdownRequested,
}

/// Runtime event with optional metadata.
#[derive(Debug, Clone)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp (may go backwards, use for logging only).
    pub at: SystemTime,
    /// Task id, if applicable. Doubles as the correlation id between a
    /// submission site and its completion.
    pub task: Option<u64>,
    /// Worker id, if applicable.
    pub worker: Option<u64>,
    /// Error message, if the event represents a failure.
    pub error: Option<String>,
    /// The kind of event.
    pub kind: EventKind,
}

impl Event {
    /// Creates a new event of the given kind with the next sequence number.
    pub fn now(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            task: None,
            worker: None,
            error: None,
            kind,
        }
    }

    /// Attaches a task id.
    pub fn with_task(mut self, id: u64) -> Self {
        self.task = Some(id);
        self
    }

    /// Attaches a worker id.
    pub fn with_worker(mut self, id: u64) -> Self {
        self.worker = Some(id);
        self
    }

    /// Attaches an error message.
    pub fn with_error(mut self, msg: impl Into<String>) -> Self {
        self.error = Some(msg.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seq_is_monotonic() {
        let a = Event::now(EventKind::Drain);
        let b = Event::now(EventKind::Drain);
        assert!(b.seq > a.seq);
    }

    #[test]
    fn builders_attach_metadata() {
        let ev = Event::now(EventKind::TaskFailed)
            .with_task(7)
            .with_worker(2)
            .with_error("boom");
        assert_eq!(ev.kind, EventKind::TaskFailed);
        assert_eq!(ev.task, Some(7));
        assert_eq!(ev.worker, Some(2));
        assert_eq!(ev.error.as_deref(), Some("boom"));
    }
}
