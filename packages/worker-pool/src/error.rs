//! ============================================================================
//! File: packages/worker-pool/src/error.rs
//! ----------------------------------------------------------------------------
//! The named failure kinds shared across every component of the pool.
//! ============================================================================

use thiserror::Error;

/// Every way an `execute()` call, a slot, or the pool itself can fail.
#[derive(Debug, Error, Clone)]
pub enum WorkerPoolError {
    #[error("worker failed to signal ready")]
    WorkerStartup,

    #[error("execution exceeded its timeout")]
    WorkerTimeout,

    #[error("worker exceeded its memory limit (rss {rss} > limit {limit})")]
    WorkerMemory { rss: u64, limit: u64 },

    #[error("worker process exited unexpectedly: {detail}")]
    WorkerCrashed { detail: String },

    #[error("pool has been disposed")]
    WorkerPoolDisposed,

    #[error("execution queue is full")]
    QueueFull,

    #[error("timed out waiting in the execution queue")]
    QueueTimeout,

    #[error("execution was aborted")]
    ExecutionAborted,

    #[error("worker exceeded its message rate limit")]
    MessageFlood,

    #[error("message failed validation: {detail}")]
    MessageValidation { detail: String },

    #[error("execution failed: {detail}")]
    ExecutionFailed { detail: String },

    #[error("message exceeded the maximum size ({size} > {limit} bytes)")]
    MessageSize { size: usize, limit: usize },

    #[error("too many pending host tool calls ({pending} >= {limit})")]
    TooManyPendingCalls { pending: usize, limit: usize },

    #[error("invalid configuration: {detail}")]
    InvalidConfig { detail: String },
}

impl WorkerPoolError {
    /// A short, stable tag for metrics counters and structured logging —
    /// deliberately decoupled from the `Display` message.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::WorkerStartup => "worker_startup",
            Self::WorkerTimeout => "worker_timeout",
            Self::WorkerMemory { .. } => "worker_memory",
            Self::WorkerCrashed { .. } => "worker_crashed",
            Self::WorkerPoolDisposed => "worker_pool_disposed",
            Self::QueueFull => "queue_full",
            Self::QueueTimeout => "queue_timeout",
            Self::ExecutionAborted => "execution_aborted",
            Self::MessageFlood => "message_flood",
            Self::MessageValidation { .. } => "message_validation",
            Self::ExecutionFailed { .. } => "execution_failed",
            Self::MessageSize { .. } => "message_size",
            Self::TooManyPendingCalls { .. } => "too_many_pending_calls",
            Self::InvalidConfig { .. } => "invalid_config",
        }
    }

    /// Whether this failure requires terminating the owning slot, per the
    /// recovery column of the error taxonomy.
    pub fn terminates_slot(&self) -> bool {
        matches!(
            self,
            Self::WorkerStartup
                | Self::WorkerTimeout
                | Self::WorkerMemory { .. }
                | Self::WorkerCrashed { .. }
                | Self::MessageFlood
                | Self::MessageValidation { .. }
                | Self::MessageSize { .. }
                | Self::TooManyPendingCalls { .. }
        )
    }
}

pub type Result<T, E = WorkerPoolError> = std::result::Result<T, E>;
