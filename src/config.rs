//! # Pool configuration.
//!
//! Provides [`Config`] centralized settings for the pool runtime.
//!
//! Config is validated once, at pool construction; a bad combination of
//! options rejects the construction with
//! [`PoolError::InvalidConfig`](crate::PoolError).
//!
//! ## Sentinel values
//! - `idle_timeout = 0s` → supernumerary workers are never retired
//! - `max_queue = QueueCap::Bounded(0)` → reject rather than queue
//! - `bus_capacity` is clamped to a minimum of 1 by the bus

use std::time::Duration;

use crate::error::PoolError;
use crate::transfer::Payload;

/// Capacity policy for the overflow task queue.
///
/// The *effective* admission bound is this capacity plus the capacity of
/// still-pending workers (`|pending| × concurrent_tasks_per_worker`), so a
/// burst that arrives while new workers warm up is admitted if those workers
/// would absorb it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueueCap {
    /// No bound; submissions always queue when no worker is available.
    Unbounded,
    /// `max_threads²`, a bound that scales with the pool.
    Auto,
    /// Fixed bound. `Bounded(0)` disables queueing entirely: submissions
    /// that find no worker are rejected.
    Bounded(usize),
}

impl QueueCap {
    /// Resolves the policy against the configured thread ceiling.
    ///
    /// `None` means unbounded.
    pub fn resolve(&self, max_threads: usize) -> Option<usize> {
        match self {
            QueueCap::Unbounded => None,
            QueueCap::Auto => Some(max_threads * max_threads),
            QueueCap::Bounded(n) => Some(*n),
        }
    }

    /// True when queueing is disabled outright.
    #[inline]
    pub fn is_zero(&self) -> bool {
        matches!(self, QueueCap::Bounded(0))
    }
}

impl Default for QueueCap {
    fn default() -> Self {
        QueueCap::Unbounded
    }
}

/// Options forwarded to worker thread construction.
#[derive(Clone, Debug)]
pub struct WorkerOptions {
    /// Thread name prefix; workers are named `<prefix>-<id>`.
    pub name_prefix: String,
    /// Stack size for worker threads (`None` = platform default).
    pub stack_size: Option<usize>,
    /// Opaque payload handed to the default module's `init` on bootstrap.
    pub worker_data: Payload,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            name_prefix: "poolvisor-worker".to_string(),
            stack_size: None,
            worker_data: Payload::Null,
        }
    }
}

/// Global configuration for the pool.
///
/// Controls the autoscale band, per-worker concurrency, queue bounds, idle
/// retirement, the response-counter fast path, and worker construction.
///
/// ## Field semantics
/// - `min_threads` / `max_threads`: autoscale band; the pool fills to
///   `min_threads` on construction and never exceeds `max_threads`
/// - `concurrent_tasks_per_worker`: in-flight tasks one worker may hold
/// - `idle_timeout`: zero-usage time before a worker above the minimum is
///   retired (`0s` = keep forever)
/// - `use_atomics`: enables opportunistic response-counter polling, which
///   collapses many response wakeups into one scheduler turn under load
/// - `grace`: how long pool destruction waits for worker threads to exit
#[derive(Clone, Debug)]
pub struct Config {
    /// Default module path used when a submission omits one.
    pub module_name: Option<String>,
    /// Floor of the autoscale band.
    pub min_threads: usize,
    /// Ceiling of the autoscale band (≥ 1).
    pub max_threads: usize,
    /// Zero-usage time before a supernumerary worker is retired (`0` = never).
    pub idle_timeout: Duration,
    /// Queue capacity policy.
    pub max_queue: QueueCap,
    /// Per-worker task concurrency limit (≥ 1).
    pub concurrent_tasks_per_worker: usize,
    /// Enables the response-counter fast path.
    pub use_atomics: bool,
    /// Capacity of the event bus broadcast ring buffer.
    pub bus_capacity: usize,
    /// Maximum time `destroy` waits for worker threads to exit.
    pub grace: Duration,
    /// Passed through to worker thread construction.
    pub worker: WorkerOptions,
}

impl Config {
    /// Validates the option set.
    ///
    /// Rejected combinations:
    /// - `max_threads == 0`
    /// - `concurrent_tasks_per_worker == 0`
    /// - `min_threads > max_threads`
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.max_threads == 0 {
            return Err(PoolError::InvalidConfig {
                reason: "max_threads must be at least 1".to_string(),
            });
        }
        if self.concurrent_tasks_per_worker == 0 {
            return Err(PoolError::InvalidConfig {
                reason: "concurrent_tasks_per_worker must be at least 1".to_string(),
            });
        }
        if self.min_threads > self.max_threads {
            return Err(PoolError::InvalidConfig {
                reason: format!(
                    "min_threads ({}) exceeds max_threads ({})",
                    self.min_threads, self.max_threads
                ),
            });
        }
        Ok(())
    }

    /// Returns the idle timeout as an `Option`.
    ///
    /// - `None` → workers are never retired
    /// - `Some(d)` → retire after `d` of zero usage
    #[inline]
    pub fn idle_timeout_opt(&self) -> Option<Duration> {
        if self.idle_timeout == Duration::ZERO {
            None
        } else {
            Some(self.idle_timeout)
        }
    }

    /// Returns a bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }
}

impl Default for Config {
    /// Default configuration:
    ///
    /// - `min_threads = max(cpus / 2, 1)`
    /// - `max_threads = cpus * 3 / 2` (at least `min_threads`)
    /// - `idle_timeout = 0s` (never retire)
    /// - `max_queue = Unbounded`
    /// - `concurrent_tasks_per_worker = 1`
    /// - `use_atomics = true`
    /// - `bus_capacity = 1024`
    /// - `grace = 10s`
    fn default() -> Self {
        let cpus = num_cpus::get();
        let min_threads = (cpus / 2).max(1);
        let max_threads = (cpus * 3 / 2).max(min_threads);

        Self {
            module_name: None,
            min_threads,
            max_threads,
            idle_timeout: Duration::ZERO,
            max_queue: QueueCap::default(),
            concurrent_tasks_per_worker: 1,
            use_atomics: true,
            bus_capacity: 1024,
            grace: Duration::from_secs(10),
            worker: WorkerOptions::default(),
        }
    }
}
