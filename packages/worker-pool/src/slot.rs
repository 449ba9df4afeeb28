//! ============================================================================
//! File: packages/worker-pool/src/slot.rs
//! ----------------------------------------------------------------------------
//! A persistent record owned exclusively by the pool, pairing one
//! OS-isolated worker process with a state machine, a rate limiter, a
//! memory monitor, and the pending host-call table. This is the component
//! that actually talks the wire protocol.
//! ============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::codec;
use crate::config::Config;
use crate::error::{Result, WorkerPoolError};
use crate::events::PoolEvent;
use crate::memory_monitor::{MemoryMonitor, ResourceUsage};
use crate::protocol::{ExecuteConfig, HostMessage, WorkerMessage};
use crate::rate_limiter::RateLimiter;
use crate::transport::WorkerTransport;

/// States a slot passes through. Transitions are driven only by protocol
/// messages, timers, and cancellation — never by unwinding the call stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotStatus {
    Created,
    Idle,
    Executing,
    Recycling,
    Terminating,
    Terminated,
}

/// A host-side callback the sandboxed code may invoke by name.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, args: Value) -> std::result::Result<Value, String>;
}

/// One caller-submitted unit of work.
pub struct ExecutionRequest {
    pub code: String,
    pub input: Value,
    pub tools: HashMap<String, Arc<dyn ToolHandler>>,
    pub timeout: Duration,
    pub cancel: Option<CancellationToken>,
}

/// A persistent record pairing one OS-isolated worker with its lifecycle.
pub struct Slot {
    pub id: Uuid,
    config: Config,
    transport: Box<dyn WorkerTransport>,
    status: SlotStatus,
    executions_since_birth: u64,
    birth: Instant,
    idle_since: Option<Instant>,
    last_usage: ResourceUsage,
    rate_limiter: RateLimiter,
    memory_monitor: MemoryMonitor,
    pending_calls: std::collections::HashSet<String>,
    events: broadcast::Sender<PoolEvent>,
}

impl Slot {
    /// Spawns a fresh worker behind `transport` and waits for its `Ready`
    /// heartbeat, bounded by `graceful_shutdown_timeout_ms`.
    pub async fn spawn(
        id: Uuid,
        config: Config,
        mut transport: Box<dyn WorkerTransport>,
        events: broadcast::Sender<PoolEvent>,
    ) -> Result<Self> {
        let startup_deadline = Duration::from_millis(config.graceful_shutdown_timeout_ms);
        let ready = tokio::time::timeout(startup_deadline, wait_for_ready(transport.as_mut(), &config));
        match ready.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_elapsed) => return Err(WorkerPoolError::WorkerStartup),
        }

        let mut slot = Self {
            id,
            rate_limiter: RateLimiter::new(config.max_messages_per_second),
            memory_monitor: MemoryMonitor::new(config.memory_limit_per_worker),
            config,
            transport,
            status: SlotStatus::Created,
            executions_since_birth: 0,
            birth: Instant::now(),
            idle_since: None,
            last_usage: ResourceUsage::default(),
            pending_calls: std::collections::HashSet::new(),
            events,
        };
        slot.transition(SlotStatus::Idle);
        Ok(slot)
    }

    pub fn status(&self) -> SlotStatus {
        self.status
    }

    pub fn executions_since_birth(&self) -> u64 {
        self.executions_since_birth
    }

    pub fn birth(&self) -> Instant {
        self.birth
    }

    /// How long this slot has been continuously idle, if it is idle.
    pub fn idle_for(&self) -> Option<Duration> {
        self.idle_since.map(|since| since.elapsed())
    }

    /// The most recent resource sample this slot's worker reported.
    pub fn last_usage(&self) -> ResourceUsage {
        self.last_usage
    }

    fn transition(&mut self, status: SlotStatus) {
        debug!(slot_id = %self.id, from = ?self.status, to = ?status, "slot transition");
        self.status = status;
        self.idle_since = if status == SlotStatus::Idle {
            Some(Instant::now())
        } else {
            None
        };
        let _ = self.events.send(PoolEvent::SlotTransitioned {
            slot_id: self.id,
            status,
        });
    }

    /// Runs exactly one execution to completion. Precondition: `status() ==
    /// Idle`. Postcondition: `status()` is `Idle`, `Recycling`, or
    /// `Terminating` — never `Executing`.
    pub async fn dispatch(&mut self, request: ExecutionRequest) -> Result<Value> {
        debug_assert_eq!(self.status, SlotStatus::Idle);
        let execution_id = Uuid::new_v4().to_string();
        self.transition(SlotStatus::Executing);
        self.pending_calls.clear();

        let result = self.run_execution(&execution_id, request).await;

        self.executions_since_birth += 1;
        let should_terminate = matches!(&result, Err(e) if e.terminates_slot());
        if should_terminate {
            if let Err(e) = &result {
                warn!(slot_id = %self.id, error = %e, "execution failed, terminating slot");
            }
            self.transition(SlotStatus::Terminating);
        } else {
            if let Err(e) = &result {
                debug!(slot_id = %self.id, error = %e, "execution failed at the application level, worker stays healthy");
            }
            if self.executions_since_birth >= self.config.max_executions_per_worker {
                self.transition(SlotStatus::Recycling);
            } else {
                self.transition(SlotStatus::Idle);
            }
        }
        result
    }

    async fn run_execution(&mut self, execution_id: &str, request: ExecutionRequest) -> Result<Value> {
        let tool_names: Vec<String> = request.tools.keys().cloned().collect();
        let start = HostMessage::Execute {
            execution_id: execution_id.to_string(),
            code: request.code,
            input: request.input,
            tool_names,
            config: ExecuteConfig {
                timeout_ms: request.timeout.as_millis() as u64,
            },
        };
        self.send(&start).await?;

        let (resp_tx, mut resp_rx) = mpsc::unbounded_channel::<(String, Vec<u8>)>();
        let deadline = tokio::time::sleep(request.timeout);
        tokio::pin!(deadline);
        let cancel = request.cancel.clone();

        loop {
            let cancelled = async {
                match &cancel {
                    Some(token) => token.cancelled().await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                line = self.transport.recv_line() => {
                    match line? {
                        None => return Err(WorkerPoolError::WorkerCrashed { detail: "worker exited".into() }),
                        Some(bytes) => {
                            if !self.rate_limiter.try_acquire() {
                                return Err(WorkerPoolError::MessageFlood);
                            }
                            let value = codec::decode(&bytes, self.config.max_message_size_bytes)?;
                            let msg: WorkerMessage = serde_json::from_value(value)
                                .map_err(|e| WorkerPoolError::MessageValidation { detail: e.to_string() })?;
                            if let Some(outcome) = self.handle_worker_message(execution_id, msg, &request.tools, &resp_tx)? {
                                return outcome;
                            }
                        }
                    }
                }
                Some((call_id, bytes)) = resp_rx.recv() => {
                    self.pending_calls.remove(&call_id);
                    self.transport.send_line(&bytes).await?;
                }
                _ = &mut deadline => {
                    return Err(WorkerPoolError::WorkerTimeout);
                }
                _ = cancelled => {
                    return Err(WorkerPoolError::ExecutionAborted);
                }
            }
        }
    }

    /// Processes one inbound worker message. Returns `Some(outcome)` when the
    /// execution is over (success or failure), `None` to keep looping.
    fn handle_worker_message(
        &mut self,
        execution_id: &str,
        msg: WorkerMessage,
        tools: &HashMap<String, Arc<dyn ToolHandler>>,
        resp_tx: &mpsc::UnboundedSender<(String, Vec<u8>)>,
    ) -> Result<Option<Result<Value>>> {
        match msg {
            WorkerMessage::Ready {} => Ok(None),
            WorkerMessage::Heartbeat { .. } => {
                let usage = ResourceUsage::from_heartbeat(&msg).expect("just matched Heartbeat");
                self.last_usage = usage;
                if let Some(err) = self.memory_monitor.check(&usage) {
                    error!(slot_id = %self.id, rss = usage.rss, "memory limit exceeded");
                    return Ok(Some(Err(err)));
                }
                Ok(None)
            }
            WorkerMessage::ToolCall {
                call_id,
                execution_id: call_exec_id,
                name,
                args,
            } => {
                if call_exec_id != execution_id {
                    warn!(slot_id = %self.id, %call_id, "dropping tool call for a stale execution");
                    return Ok(None);
                }
                if self.pending_calls.len() >= self.config.max_pending_tool_calls {
                    return Ok(Some(Err(WorkerPoolError::TooManyPendingCalls {
                        pending: self.pending_calls.len(),
                        limit: self.config.max_pending_tool_calls,
                    })));
                }
                self.pending_calls.insert(call_id.clone());
                let handler = tools.get(&name).cloned();
                let resp_tx = resp_tx.clone();
                let call_id_for_task = call_id.clone();
                tokio::spawn(async move {
                    let (ok, value, error) = match handler {
                        Some(handler) => match handler.call(args).await {
                            Ok(v) => (true, Some(v), None),
                            Err(e) => (false, None, Some(e)),
                        },
                        None => (false, None, Some("unknown tool".to_string())),
                    };
                    let response = HostMessage::ToolResponse {
                        call_id: call_id_for_task.clone(),
                        ok,
                        value,
                        error,
                    };
                    if let Ok(bytes) = codec::encode(&serde_json::to_value(&response).unwrap_or(Value::Null)) {
                        let _ = resp_tx.send((call_id_for_task, bytes));
                    }
                });
                Ok(None)
            }
            WorkerMessage::ExecutionResult {
                execution_id: result_exec_id,
                ok,
                value,
                error,
                stats: _,
            } => {
                if result_exec_id != execution_id {
                    warn!(slot_id = %self.id, "dropping stale execution result after termination race");
                    return Ok(None);
                }
                if ok {
                    Ok(Some(Ok(value.unwrap_or(Value::Null))))
                } else {
                    Ok(Some(Err(WorkerPoolError::ExecutionFailed {
                        detail: error.unwrap_or_else(|| "execution failed".to_string()),
                    })))
                }
            }
        }
    }

    async fn send(&mut self, msg: &HostMessage) -> Result<()> {
        let bytes = codec::encode(&serde_json::to_value(msg).map_err(|e| {
            WorkerPoolError::MessageValidation {
                detail: e.to_string(),
            }
        })?)?;
        self.transport.send_line(&bytes).await
    }

    /// Idempotent: asks the worker to exit, then force-kills after
    /// `graceful_shutdown_timeout_ms`.
    pub async fn force_terminate(&mut self) -> bool {
        if self.status == SlotStatus::Terminated {
            return false;
        }
        if self.status != SlotStatus::Terminating {
            self.transition(SlotStatus::Terminating);
        }
        self.transport.request_exit().await;

        let deadline = Instant::now() + Duration::from_millis(self.config.graceful_shutdown_timeout_ms);
        let mut forced = false;
        while Instant::now() < deadline {
            if self.transport.has_exited().await {
                break;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        if !self.transport.has_exited().await {
            info!(slot_id = %self.id, "graceful shutdown window elapsed, force-killing worker");
            self.transport.force_kill().await;
            forced = true;
        }
        self.transition(SlotStatus::Terminated);
        forced
    }
}

async fn wait_for_ready(transport: &mut dyn WorkerTransport, config: &Config) -> Result<()> {
    loop {
        match transport.recv_line().await? {
            None => return Err(WorkerPoolError::WorkerStartup),
            Some(bytes) => {
                let value = codec::decode(&bytes, config.max_message_size_bytes)?;
                let msg: WorkerMessage = serde_json::from_value(value)
                    .map_err(|e| WorkerPoolError::MessageValidation { detail: e.to_string() })?;
                if matches!(msg, WorkerMessage::Ready {}) {
                    return Ok(());
                }
            }
        }
    }
}
