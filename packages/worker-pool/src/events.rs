//! ============================================================================
//! File: packages/worker-pool/src/events.rs
//! ----------------------------------------------------------------------------
//! A structured event stream for slot transitions and queue activity, so a
//! caller can observe the pool without polling [`crate::metrics::MetricsSnapshot`].
//! ============================================================================

use uuid::Uuid;

use crate::slot::SlotStatus;

/// One observable transition in the pool's lifetime. Cloned into a
/// `tokio::sync::broadcast` channel, so this type must stay small.
#[derive(Debug, Clone)]
pub enum PoolEvent {
    SlotTransitioned {
        slot_id: Uuid,
        status: SlotStatus,
    },
    QueueEnqueued {
        execution_id: String,
    },
    QueueFulfilled {
        execution_id: String,
        waited_ms: u64,
    },
    QueueTimedOut {
        execution_id: String,
    },
    QueueAborted {
        execution_id: String,
    },
}
