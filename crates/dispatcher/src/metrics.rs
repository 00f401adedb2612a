//! Sink and worker pool metrics for observability

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Metrics for the inline time-series write
#[derive(Debug, Default)]
pub struct SinkMetrics {
    /// Total successful writes
    write_count: AtomicU64,
    /// Total write failures
    failure_count: AtomicU64,
}

impl SinkMetrics {
    /// Create new metrics instance
    pub fn new() -> Self {
        Self::default()
    }

    /// Get total write count
    pub fn write_count(&self) -> u64 {
        self.write_count.load(Ordering::Relaxed)
    }

    /// Increment write count
    pub fn inc_write_count(&self) {
        self.write_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Get failure count
    pub fn failure_count(&self) -> u64 {
        self.failure_count.load(Ordering::Relaxed)
    }

    /// Increment failure count
    pub fn inc_failure_count(&self) {
        self.failure_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Get snapshot of all metrics
    pub fn snapshot(&self) -> SinkSnapshot {
        SinkSnapshot {
            write_count: self.write_count(),
            failure_count: self.failure_count(),
        }
    }
}

/// Snapshot of sink metrics (for reporting)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SinkSnapshot {
    pub write_count: u64,
    pub failure_count: u64,
}

/// Metrics for the prediction worker pool
#[derive(Debug, Default)]
pub struct PoolMetrics {
    /// Tasks accepted into the queue
    submitted: AtomicU64,
    /// Submissions that found the queue full
    blocked: AtomicU64,
    /// 2xx answers
    completed: AtomicU64,
    /// 4xx answers
    rejected: AtomicU64,
    /// Network errors, timeouts, 5xx
    failed: AtomicU64,
    /// Live workers
    workers: AtomicUsize,
    /// Queue length at last observation
    queue_len: AtomicUsize,
}

impl PoolMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_submitted(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_blocked(&self) {
        self.blocked.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_completed(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_queue_len(&self, len: usize) {
        self.queue_len.store(len, Ordering::Relaxed);
    }

    pub fn workers(&self) -> usize {
        self.workers.load(Ordering::Acquire)
    }

    /// Reserve one worker slot below `max`
    ///
    /// Returns the new worker count on success.
    pub fn try_add_worker(&self, max: usize) -> Option<usize> {
        self.workers
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < max).then_some(n + 1)
            })
            .ok()
            .map(|previous| previous + 1)
    }

    pub fn remove_worker(&self) {
        self.workers.fetch_sub(1, Ordering::AcqRel);
    }

    pub fn snapshot(&self) -> PoolSnapshot {
        PoolSnapshot {
            submitted: self.submitted.load(Ordering::Relaxed),
            blocked: self.blocked.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            workers: self.workers(),
            queue_len: self.queue_len.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of pool metrics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolSnapshot {
    pub submitted: u64,
    pub blocked: u64,
    pub completed: u64,
    pub rejected: u64,
    pub failed: u64,
    pub workers: usize,
    pub queue_len: usize,
}

impl PoolSnapshot {
    /// Tasks that reached a terminal state
    pub fn finished(&self) -> u64 {
        self.completed + self.rejected + self.failed
    }
}
