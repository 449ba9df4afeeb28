//! ============================================================================
//! File: packages/worker-pool/src/protocol.rs
//! ----------------------------------------------------------------------------
//! Typed message schema exchanged between the host and an OS-isolated worker
//! process. Every message is a JSON object tagged by `type`; the wire format
//! never encodes which language the worker runs.
//! ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A message sent from the host to a worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum HostMessage {
    /// Starts exactly one execution on an otherwise-idle worker.
    Execute {
        execution_id: String,
        code: String,
        input: Value,
        tool_names: Vec<String>,
        config: ExecuteConfig,
    },
    /// Answers a `ToolCall` previously emitted by the worker.
    ToolResponse {
        call_id: String,
        ok: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        value: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

/// Per-execution limits the worker is expected to self-enforce where it can
/// (the host enforces them independently regardless).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ExecuteConfig {
    pub timeout_ms: u64,
}

/// A message sent from a worker to the host.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WorkerMessage {
    /// Sent exactly once, after the worker has finished starting up.
    Ready {},
    /// The single terminal message for one `Execute`.
    ExecutionResult {
        execution_id: String,
        ok: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        value: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        stats: Option<ExecutionStats>,
    },
    /// A callback into a host-provided tool. Expects exactly one matching
    /// `ToolResponse`, unless the slot is terminated first.
    ToolCall {
        call_id: String,
        execution_id: String,
        name: String,
        args: Value,
    },
    /// Periodic resource-usage sample; drives the memory monitor.
    Heartbeat {
        rss: u64,
        heap_total: u64,
        heap_used: u64,
        external: u64,
        array_buffers: u64,
    },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ExecutionStats {
    pub duration_ms: u64,
    pub peak_rss_bytes: u64,
    pub heap_used: u64,
}
