//! ============================================================================
//! File: packages/worker-pool/src/memory_monitor.rs
//! ----------------------------------------------------------------------------
//! Periodic rss sampling and threshold checking. rss is the only number that
//! captures native allocations and JIT'd code; heap-only accounting is not
//! enough to bound a hostile worker's footprint.
//! ============================================================================

use crate::error::WorkerPoolError;
use crate::protocol::WorkerMessage;

/// The latest resource sample reported by a worker's `Heartbeat`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResourceUsage {
    pub rss: u64,
    pub heap_total: u64,
    pub heap_used: u64,
    pub external: u64,
    pub array_buffers: u64,
}

impl ResourceUsage {
    pub fn from_heartbeat(msg: &WorkerMessage) -> Option<Self> {
        match msg {
            WorkerMessage::Heartbeat {
                rss,
                heap_total,
                heap_used,
                external,
                array_buffers,
            } => Some(Self {
                rss: *rss,
                heap_total: *heap_total,
                heap_used: *heap_used,
                external: *external,
                array_buffers: *array_buffers,
            }),
            _ => None,
        }
    }
}

/// Applies `memory_limit_per_worker` to a slot's most recent sample.
#[derive(Debug, Clone, Copy)]
pub struct MemoryMonitor {
    limit: u64,
}

impl MemoryMonitor {
    pub fn new(limit: u64) -> Self {
        Self { limit }
    }

    /// Returns `Some(WorkerMemory)` when rss strictly exceeds the limit.
    /// Exactly-at-threshold is not a violation.
    pub fn check(&self, usage: &ResourceUsage) -> Option<WorkerPoolError> {
        if usage.rss > self.limit {
            Some(WorkerPoolError::WorkerMemory {
                rss: usage.rss,
                limit: self.limit,
            })
        } else {
            None
        }
    }
}

/// Reads a process's resident set size directly from the kernel, for
/// diagnostics independent of what the worker self-reports in `Heartbeat`.
///
/// TODO: on cgroup-limited containers `VmRSS` under-reports against the
/// container's memory.max; switch to the cgroup v2 `memory.current` file
/// when running containerized.
#[cfg(target_os = "linux")]
pub fn read_rss_for_pid(pid: u32) -> Option<u64> {
    let process = procfs::process::Process::new(pid as i32).ok()?;
    let status = process.status().ok()?;
    status.vmrss.map(|kb| kb * 1024)
}

#[cfg(not(target_os = "linux"))]
pub fn read_rss_for_pid(_pid: u32) -> Option<u64> {
    tracing::warn!("rss sampling from the OS is only implemented on Linux; relying on Heartbeat");
    None
}
