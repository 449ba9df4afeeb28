//! ============================================================================
//! Enclave Worker Pool: sandboxed, OS-isolated code execution
//! ============================================================================
//!
//! Runs untrusted code in separate worker processes, never as in-process
//! threads. Each worker speaks a small newline-delimited JSON protocol over
//! stdio (see [`protocol`]): the host sends `Execute`, the worker streams
//! back `Heartbeat`s and `ToolCall`s, and finally an `ExecutionResult`.
//!
//! The pool itself ([`pool::PoolManager`]) maintains a bounded set of
//! [`slot::Slot`]s, each pairing one worker process with a small state
//! machine, a token-bucket rate limiter, and RSS-based memory monitoring.
//! Requests beyond the configured concurrency wait in a FIFO
//! [`queue::ExecutionQueue`] with their own timeout and cancellation.
//!
//! ## Quick start
//!
//! ```ignore
//! use std::sync::Arc;
//! use enclave_worker_pool::{Config, ExecuteOptions, PoolManager, ProcessWorkerFactory};
//!
//! # async fn run() -> enclave_worker_pool::Result<()> {
//! let factory = Arc::new(ProcessWorkerFactory {
//!     program: "./echo-worker".to_string(),
//!     args: vec![],
//! });
//! let pool = PoolManager::new(Config::default(), factory);
//! pool.initialize().await?;
//!
//! let output = pool
//!     .execute(ExecuteOptions {
//!         code: "1 + 1".to_string(),
//!         input: serde_json::Value::Null,
//!         tools: Default::default(),
//!         timeout: std::time::Duration::from_secs(5),
//!         cancel: None,
//!     })
//!     .await?;
//! pool.dispose().await;
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod config;
pub mod error;
pub mod events;
pub mod memory_monitor;
pub mod metrics;
pub mod pool;
pub mod protocol;
pub mod queue;
pub mod rate_limiter;
pub mod slot;
pub mod transport;

pub use config::{Config, ConfigBuilder, Preset};
pub use error::{Result, WorkerPoolError};
pub use events::PoolEvent;
pub use metrics::MetricsSnapshot;
pub use pool::{ExecuteOptions, PoolManager, ProcessWorkerFactory, WorkerFactory};
pub use protocol::{ExecuteConfig, ExecutionStats, HostMessage, WorkerMessage};
pub use slot::{ExecutionRequest, SlotStatus, ToolHandler};
pub use transport::{ProcessTransport, WorkerTransport};
