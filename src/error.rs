//! # Error types used by the pool runtime and task modules.
//!
//! This module defines two main error enums:
//!
//! - [`PoolError`] errors raised by the pool itself (admission, teardown,
//!   transfer encoding, configuration).
//! - [`TaskError`] errors raised by task-module executions on a worker.
//!
//! Both types provide helper methods `as_label` for metrics.
//! [`PoolError`] additionally distinguishes rejections that happened before
//! dispatch (`is_rejection()`) from failures of running work.

use thiserror::Error;

/// # Errors produced by the pool runtime.
///
/// A submission fails at most once, with the first applicable error.
/// Errors that have no owning submission (for example a worker crash with an
/// empty task map) are surfaced as [`EventKind::WorkerError`](crate::events::EventKind)
/// on the event bus instead.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum PoolError {
    /// Submission carried no module name and the pool has no default.
    #[error("no task module provided and no default configured")]
    ModuleNotProvided,

    /// The task queue is bounded and full.
    #[error("task queue is at limit")]
    QueueAtLimit,

    /// Queueing is disabled (`max_queue = 0`) and no worker is available.
    #[error("no task queue available and all workers are busy")]
    NoQueueAvailable,

    /// The owning worker was torn down (shutdown, sibling abort, or removal).
    #[error("worker terminated")]
    WorkerTerminated,

    /// The caller signaled cancellation.
    #[error("task aborted")]
    Aborted,

    /// The envelope could not be serialized or the transfer list was invalid.
    #[error("invalid transfer: {reason}")]
    InvalidTransfer {
        /// What made the transfer list unusable.
        reason: String,
    },

    /// The worker thread died while the task was in flight.
    #[error("worker crashed: {reason}")]
    WorkerCrashed {
        /// Crash reason (panic payload or bootstrap failure).
        reason: String,
    },

    /// The task module itself failed; forwarded verbatim.
    #[error(transparent)]
    Task(#[from] TaskError),

    /// Construction-time option validation failed.
    #[error("invalid configuration: {reason}")]
    InvalidConfig {
        /// Which option combination was rejected.
        reason: String,
    },

    /// The pool has been destroyed.
    #[error("pool is closed")]
    Closed,
}

impl PoolError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            PoolError::ModuleNotProvided => "module_not_provided",
            PoolError::QueueAtLimit => "task_queue_at_limit",
            PoolError::NoQueueAvailable => "no_task_queue_available",
            PoolError::WorkerTerminated => "worker_terminated",
            PoolError::Aborted => "aborted",
            PoolError::InvalidTransfer { .. } => "invalid_transfer",
            PoolError::WorkerCrashed { .. } => "worker_crashed",
            PoolError::Task(_) => "task_error",
            PoolError::InvalidConfig { .. } => "invalid_config",
            PoolError::Closed => "pool_closed",
        }
    }

    /// True if the submission was rejected before it ever reached a worker.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            PoolError::ModuleNotProvided
                | PoolError::QueueAtLimit
                | PoolError::NoQueueAvailable
                | PoolError::InvalidTransfer { .. }
        )
    }
}

/// # Errors produced by task-module execution.
///
/// These represent failures of individual task runs on a worker thread.
/// They are forwarded to the submitter unchanged, wrapped in
/// [`PoolError::Task`].
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    /// Module execution failed.
    #[error("execution failed: {reason}")]
    Failed {
        /// Failure reason reported by the module.
        reason: String,
    },

    /// The worker could not resolve the requested module name.
    #[error("task module '{name}' not found")]
    ModuleNotFound {
        /// The unresolvable module name.
        name: String,
    },

    /// The module observed cancellation and stopped.
    ///
    /// This is **not an error** in the traditional sense, but signals
    /// intentional termination.
    #[error("context canceled")]
    Canceled,
}

impl TaskError {
    /// Returns a short stable label.
    pub fn as_label(&self) -> &'static str {
        match self {
            TaskError::Failed { .. } => "task_failed",
            TaskError::ModuleNotFound { .. } => "task_module_not_found",
            TaskError::Canceled => "task_canceled",
        }
    }

    /// Convenience constructor for module failures.
    pub fn failed(reason: impl Into<String>) -> Self {
        TaskError::Failed {
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejections_are_classified() {
        assert!(PoolError::QueueAtLimit.is_rejection());
        assert!(PoolError::ModuleNotProvided.is_rejection());
        assert!(!PoolError::Aborted.is_rejection());
        assert!(!PoolError::WorkerTerminated.is_rejection());
    }

    #[test]
    fn labels_are_stable() {
        assert_eq!(
            PoolError::NoQueueAvailable.as_label(),
            "no_task_queue_available"
        );
        assert_eq!(PoolError::Task(TaskError::Canceled).as_label(), "task_error");
        assert_eq!(TaskError::failed("x").as_label(), "task_failed");
    }
}
