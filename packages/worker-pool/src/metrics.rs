//! ============================================================================
//! File: packages/worker-pool/src/metrics.rs
//! ----------------------------------------------------------------------------
//! Pool-wide counters, updated only from the pool manager's own task.
//! ============================================================================

use std::sync::atomic::{AtomicU64, Ordering};

use crate::queue::QueueStats;

/// A read-only point-in-time view of the pool, returned by
/// [`crate::pool::PoolManager::metrics`].
#[derive(Debug, Clone, Copy)]
pub struct MetricsSnapshot {
    pub total_slots: usize,
    pub idle_slots: usize,
    pub executing_slots: usize,
    pub recycling_slots: usize,
    pub queued_requests: usize,
    pub total_executions: u64,
    pub successful_executions: u64,
    pub failed_executions: u64,
    pub timeout_executions: u64,
    pub memory_kills: u64,
    pub forced_terminations: u64,
    pub worker_recycles: u64,
    pub avg_execution_time_ms: f64,
    pub avg_worker_memory_bytes: f64,
    pub peak_worker_memory_bytes: u64,
    pub queue_stats: QueueStats,
}

/// Internal, lock-free accumulator. Durations are tracked as a running sum so
/// the average can be derived without retaining per-execution samples.
#[derive(Debug, Default)]
pub struct MetricsCounters {
    pub total_executions: AtomicU64,
    pub successful_executions: AtomicU64,
    pub failed_executions: AtomicU64,
    pub timeout_executions: AtomicU64,
    pub memory_kills: AtomicU64,
    pub forced_terminations: AtomicU64,
    pub worker_recycles: AtomicU64,
    execution_time_sum_ms: AtomicU64,
    memory_sample_sum_bytes: AtomicU64,
    memory_sample_count: AtomicU64,
    peak_worker_memory_bytes: AtomicU64,
}

impl MetricsCounters {
    pub fn record_execution(&self, duration_ms: u64, outcome_kind: Option<&'static str>) {
        self.total_executions.fetch_add(1, Ordering::Relaxed);
        self.execution_time_sum_ms
            .fetch_add(duration_ms, Ordering::Relaxed);
        match outcome_kind {
            None => {
                self.successful_executions.fetch_add(1, Ordering::Relaxed);
            }
            Some("worker_timeout") => {
                self.timeout_executions.fetch_add(1, Ordering::Relaxed);
                self.failed_executions.fetch_add(1, Ordering::Relaxed);
            }
            Some(_) => {
                self.failed_executions.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn record_memory_kill(&self) {
        self.memory_kills.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_forced_termination(&self) {
        self.forced_terminations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_recycle(&self) {
        self.worker_recycles.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_memory_sample(&self, rss: u64) {
        self.memory_sample_sum_bytes
            .fetch_add(rss, Ordering::Relaxed);
        self.memory_sample_count.fetch_add(1, Ordering::Relaxed);
        self.peak_worker_memory_bytes
            .fetch_max(rss, Ordering::Relaxed);
    }

    pub fn avg_execution_time_ms(&self) -> f64 {
        let total = self.total_executions.load(Ordering::Relaxed);
        if total == 0 {
            0.0
        } else {
            self.execution_time_sum_ms.load(Ordering::Relaxed) as f64 / total as f64
        }
    }

    pub fn avg_worker_memory_bytes(&self) -> f64 {
        let count = self.memory_sample_count.load(Ordering::Relaxed);
        if count == 0 {
            0.0
        } else {
            self.memory_sample_sum_bytes.load(Ordering::Relaxed) as f64 / count as f64
        }
    }

    pub fn peak_worker_memory_bytes(&self) -> u64 {
        self.peak_worker_memory_bytes.load(Ordering::Relaxed)
    }
}
