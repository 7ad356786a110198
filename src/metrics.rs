//! # Latency histograms and pool-wide counters.
//!
//! [`LatencyHistogram`] records raw duration samples with O(1) hot-path cost
//! (one lock push plus relaxed atomics); percentile aggregation happens only
//! when a [`LatencySummary`] is requested.
//!
//! [`PoolStats`] is the shared observability block: the scheduler writes it,
//! the pool facade reads it.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Histogram for latency measurements.
#[derive(Debug, Default)]
pub struct LatencyHistogram {
    /// Raw samples (for percentile calculation).
    samples: Mutex<Vec<Duration>>,
    /// Sum of all samples in microseconds (for mean calculation).
    sum_micros: AtomicU64,
    /// Count of samples.
    count: AtomicU64,
}

impl LatencyHistogram {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one latency sample.
    pub fn record(&self, duration: Duration) {
        self.samples.lock().push(duration);
        self.sum_micros
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    /// Number of recorded samples.
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Mean of all samples; zero when empty.
    pub fn mean(&self) -> Duration {
        let count = self.count();
        if count == 0 {
            return Duration::ZERO;
        }
        Duration::from_micros(self.sum_micros.load(Ordering::Relaxed) / count)
    }

    /// Calculates a percentile (0.0 to 1.0) from the raw samples.
    pub fn percentile(&self, p: f64) -> Duration {
        let mut sorted = self.samples.lock().clone();
        if sorted.is_empty() {
            return Duration::ZERO;
        }
        sorted.sort_unstable();
        let rank = ((sorted.len() as f64 - 1.0) * p.clamp(0.0, 1.0)).round() as usize;
        sorted[rank]
    }

    /// Aggregates the histogram into a summary snapshot.
    pub fn summary(&self) -> LatencySummary {
        let sorted = {
            let mut s = self.samples.lock().clone();
            s.sort_unstable();
            s
        };
        if sorted.is_empty() {
            return LatencySummary::default();
        }

        let pick = |p: f64| {
            let rank = ((sorted.len() as f64 - 1.0) * p).round() as usize;
            sorted[rank]
        };
        let count = sorted.len() as u64;

        LatencySummary {
            count,
            min: sorted[0],
            max: sorted[sorted.len() - 1],
            mean: Duration::from_micros(self.sum_micros.load(Ordering::Relaxed) / count),
            p50: pick(0.50),
            p75: pick(0.75),
            p90: pick(0.90),
            p95: pick(0.95),
            p99: pick(0.99),
        }
    }
}

/// Point-in-time percentile summary of a [`LatencyHistogram`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LatencySummary {
    pub count: u64,
    pub min: Duration,
    pub max: Duration,
    pub mean: Duration,
    pub p50: Duration,
    pub p75: Duration,
    pub p90: Duration,
    pub p95: Duration,
    pub p99: Duration,
}

/// Shared observability block written by the scheduler.
#[derive(Debug)]
pub(crate) struct PoolStats {
    /// Tasks that finished on a worker (success or task error).
    pub completed: AtomicU64,
    /// Raw queue depth (before the pending-capacity clamp).
    pub queue_depth: AtomicUsize,
    /// `|pending workers| × concurrent_tasks_per_worker`.
    pub pending_capacity: AtomicUsize,
    /// Live worker count (pending + ready).
    pub thread_count: AtomicUsize,
    /// Pool construction instant.
    pub started_at: Instant,
    /// Time from submission to dispatch.
    pub wait_time: LatencyHistogram,
    /// Time from dispatch to completion.
    pub run_time: LatencyHistogram,
}

impl PoolStats {
    pub fn new() -> Self {
        Self {
            completed: AtomicU64::new(0),
            queue_depth: AtomicUsize::new(0),
            pending_capacity: AtomicUsize::new(0),
            thread_count: AtomicUsize::new(0),
            started_at: Instant::now(),
            wait_time: LatencyHistogram::new(),
            run_time: LatencyHistogram::new(),
        }
    }

    /// Queue size as exposed to callers: pending workers absorb their share.
    pub fn visible_queue_size(&self) -> usize {
        self.queue_depth
            .load(Ordering::Relaxed)
            .saturating_sub(self.pending_capacity.load(Ordering::Relaxed))
    }

    /// Time since the pool started.
    pub fn duration(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Fraction of the pool's theoretical run-time capacity actually used.
    pub fn utilization(&self, max_threads: usize) -> f64 {
        let run = self.run_time.summary();
        let elapsed = self.duration().as_secs_f64();
        if run.count == 0 || elapsed <= 0.0 || max_threads == 0 {
            return 0.0;
        }
        (run.mean.as_secs_f64() * run.count as f64) / (elapsed * max_threads as f64)
    }
}
