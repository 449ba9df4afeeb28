//! ============================================================================
//! File: packages/worker-pool/src/pool.rs
//! ----------------------------------------------------------------------------
//! Maintains `[min_workers, max_workers]` slots, dispatches executions,
//! reclaims terminated slots, and reports metrics. This is the only type a
//! caller constructs directly.
//! ============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{Mutex, broadcast};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::error::{Result, WorkerPoolError};
use crate::events::PoolEvent;
use crate::metrics::{MetricsCounters, MetricsSnapshot};
use crate::queue::ExecutionQueue;
use crate::slot::{ExecutionRequest, Slot, SlotStatus, ToolHandler};
use crate::transport::{ProcessTransport, WorkerTransport};

/// Produces a fresh [`WorkerTransport`] for a new slot. Abstracts over how
/// (and in what language) the worker process is started.
#[async_trait]
pub trait WorkerFactory: Send + Sync {
    async fn spawn_transport(&self) -> Result<Box<dyn WorkerTransport>>;
}

/// Spawns the configured worker-entry command with piped stdio.
pub struct ProcessWorkerFactory {
    pub program: String,
    pub args: Vec<String>,
}

#[async_trait]
impl WorkerFactory for ProcessWorkerFactory {
    async fn spawn_transport(&self) -> Result<Box<dyn WorkerTransport>> {
        Ok(Box::new(ProcessTransport::spawn(&self.program, &self.args).await?))
    }
}

/// A caller-facing execution request before the pool assigns an internal
/// `execution_id` (owned by [`Slot`] once dispatched).
pub struct ExecuteOptions {
    pub code: String,
    pub input: Value,
    pub tools: HashMap<String, Arc<dyn ToolHandler>>,
    pub timeout: Duration,
    pub cancel: Option<CancellationToken>,
}

#[derive(Clone, Copy)]
struct IdleEntry {
    id: Uuid,
    executions_since_birth: u64,
}

/// The sandboxed worker pool. Cheaply `Clone`-able via `Arc` if a caller
/// needs to share it across tasks (wrap in `Arc<PoolManager>`).
pub struct PoolManager {
    config: Config,
    factory: Arc<dyn WorkerFactory>,
    slots: Mutex<HashMap<Uuid, Arc<Mutex<Slot>>>>,
    idle: Mutex<Vec<IdleEntry>>,
    queue: ExecutionQueue,
    counters: MetricsCounters,
    events: broadcast::Sender<PoolEvent>,
    disposed: AtomicBool,
}

impl PoolManager {
    pub fn new(config: Config, factory: Arc<dyn WorkerFactory>) -> Arc<Self> {
        let (events, _rx) = broadcast::channel(1024);
        Arc::new(Self {
            queue: ExecutionQueue::new(config.max_queue_size),
            config,
            factory,
            slots: Mutex::new(HashMap::new()),
            idle: Mutex::new(Vec::new()),
            counters: MetricsCounters::default(),
            events,
            disposed: AtomicBool::new(false),
        })
    }

    /// Warms `min_workers` slots in parallel if `config.warm_on_init` is set,
    /// and starts the background idle-shrink task.
    pub async fn initialize(self: &Arc<Self>) -> Result<()> {
        if self.config.warm_on_init {
            let warmups = (0..self.config.min_workers).map(|_| {
                let pool = Arc::clone(self);
                tokio::spawn(async move { pool.create_slot(true).await })
            });
            for handle in warmups {
                handle
                    .await
                    .map_err(|_| WorkerPoolError::WorkerStartup)??;
            }
        }
        self.spawn_shrink_task();
        Ok(())
    }

    fn spawn_shrink_task(self: &Arc<Self>) {
        let pool = Arc::clone(self);
        tokio::spawn(async move {
            let tick = Duration::from_millis((pool.config.idle_timeout_ms / 4).max(50));
            loop {
                tokio::time::sleep(tick).await;
                if pool.disposed.load(Ordering::SeqCst) {
                    break;
                }
                pool.shrink_idle_slots().await;
            }
        });
    }

    async fn shrink_idle_slots(self: &Arc<Self>) {
        let idle_timeout = Duration::from_millis(self.config.idle_timeout_ms);
        let candidates: Vec<Uuid> = {
            let idle = self.idle.lock().await;
            if idle.len() <= self.config.min_workers {
                return;
            }
            idle.iter().map(|e| e.id).collect()
        };
        for id in candidates {
            let idle_len = self.idle.lock().await.len();
            if idle_len <= self.config.min_workers {
                break;
            }
            let slot_arc = {
                let slots = self.slots.lock().await;
                slots.get(&id).cloned()
            };
            let Some(slot_arc) = slot_arc else { continue };
            let overdue = {
                let mut slot = slot_arc.lock().await;
                matches!(slot.status(), SlotStatus::Idle)
                    && slot.idle_for().map(|d| d >= idle_timeout).unwrap_or(false)
            };
            if overdue {
                self.idle.lock().await.retain(|e| e.id != id);
                self.counters.record_recycle();
                let pool = Arc::clone(self);
                tokio::spawn(async move {
                    pool.reap_slot(id, slot_arc).await;
                });
            }
        }
    }

    /// The dispatch algorithm of §4.6: reuse an idle slot, grow if under
    /// capacity, otherwise queue until one frees up.
    pub async fn execute(self: &Arc<Self>, options: ExecuteOptions) -> Result<Value> {
        loop {
            if self.disposed.load(Ordering::SeqCst) {
                return Err(WorkerPoolError::WorkerPoolDisposed);
            }
            if let Some(slot_arc) = self.take_idle_slot().await {
                return self.run_on(slot_arc, &options).await;
            }
            if self.slots.lock().await.len() < self.config.max_workers {
                match self.create_slot(false).await {
                    Ok(slot_arc) => return self.run_on(slot_arc, &options).await,
                    Err(e) => return Err(e),
                }
            }

            let _ = self.events.send(PoolEvent::QueueEnqueued {
                execution_id: "pending".into(),
            });
            let wait_start = Instant::now();
            let timeout = Duration::from_millis(self.config.queue_timeout_ms);
            match self.queue.enqueue(timeout, options.cancel.clone()).await {
                Ok(()) => {
                    let _ = self.events.send(PoolEvent::QueueFulfilled {
                        execution_id: "pending".into(),
                        waited_ms: wait_start.elapsed().as_millis() as u64,
                    });
                    continue;
                }
                Err(WorkerPoolError::QueueTimeout) => {
                    let _ = self.events.send(PoolEvent::QueueTimedOut {
                        execution_id: "pending".into(),
                    });
                    return Err(WorkerPoolError::QueueTimeout);
                }
                Err(e) => {
                    let _ = self.events.send(PoolEvent::QueueAborted {
                        execution_id: "pending".into(),
                    });
                    return Err(e);
                }
            }
        }
    }

    async fn take_idle_slot(&self) -> Option<Arc<Mutex<Slot>>> {
        let mut idle = self.idle.lock().await;
        if idle.is_empty() {
            return None;
        }
        let (min_index, _) = idle
            .iter()
            .enumerate()
            .min_by_key(|(_, e)| e.executions_since_birth)?;
        let entry = idle.remove(min_index);
        let slots = self.slots.lock().await;
        slots.get(&entry.id).cloned()
    }

    /// `register_idle` should be false when the caller is about to dispatch
    /// on the new slot immediately, to avoid another caller racing it off
    /// the idle list first.
    async fn create_slot(self: &Arc<Self>, register_idle: bool) -> Result<Arc<Mutex<Slot>>> {
        let id = Uuid::new_v4();
        let transport = self.factory.spawn_transport().await?;
        let slot = Slot::spawn(id, self.config, transport, self.events.clone()).await?;
        let arc = Arc::new(Mutex::new(slot));
        self.slots.lock().await.insert(id, Arc::clone(&arc));
        if register_idle {
            self.idle.lock().await.push(IdleEntry {
                id,
                executions_since_birth: 0,
            });
        }
        Ok(arc)
    }

    async fn run_on(self: &Arc<Self>, slot_arc: Arc<Mutex<Slot>>, options: &ExecuteOptions) -> Result<Value> {
        let request = ExecutionRequest {
            code: options.code.clone(),
            input: options.input.clone(),
            tools: options.tools.clone(),
            timeout: options.timeout,
            cancel: options.cancel.clone(),
        };
        let start = Instant::now();
        let id = slot_arc.lock().await.id;
        let result = slot_arc.lock().await.dispatch(request).await;
        let duration_ms = start.elapsed().as_millis() as u64;
        self.counters
            .record_execution(duration_ms, result.as_ref().err().map(|e| e.kind()));
        if let Err(WorkerPoolError::WorkerMemory { .. }) = &result {
            self.counters.record_memory_kill();
        }
        self.counters
            .record_memory_sample(slot_arc.lock().await.last_usage().rss);

        let status = slot_arc.lock().await.status();
        match status {
            SlotStatus::Idle => {
                let executions = slot_arc.lock().await.executions_since_birth();
                self.idle.lock().await.push(IdleEntry {
                    id,
                    executions_since_birth: executions,
                });
                // Wake a queued waiter, if any, now that a slot is free. It
                // will race take_idle_slot() against any other caller that
                // finds capacity on its own, which is fine: both paths only
                // ever hand out a slot actually sitting in `idle`.
                self.queue.fulfill_next().await;
            }
            SlotStatus::Recycling => {
                self.counters.record_recycle();
                let pool = Arc::clone(self);
                tokio::spawn(async move { pool.reap_slot(id, slot_arc).await });
            }
            SlotStatus::Terminating => {
                let pool = Arc::clone(self);
                tokio::spawn(async move { pool.reap_slot(id, slot_arc).await });
            }
            _ => {}
        }
        result
    }

    /// Drains a slot that left normal service (recycled or errored), force
    /// terminating it if needed, removing it from the registry, and — unless
    /// disposed — replacing it so the pool trends back toward `min_workers`.
    async fn reap_slot(self: Arc<Self>, id: Uuid, slot_arc: Arc<Mutex<Slot>>) {
        let forced = {
            let mut slot = slot_arc.lock().await;
            slot.force_terminate().await
        };
        if forced {
            self.counters.record_forced_termination();
        }
        self.slots.lock().await.remove(&id);
        self.idle.lock().await.retain(|e| e.id != id);

        if self.disposed.load(Ordering::SeqCst) {
            return;
        }
        if self.slots.lock().await.len() < self.config.min_workers {
            if let Err(e) = self.create_slot(true).await {
                warn!(error = %e, "failed to replace reaped slot");
            }
        }
        self.queue.fulfill_next().await;
    }

    pub async fn metrics(&self) -> MetricsSnapshot {
        let slots = self.slots.lock().await;
        let mut idle_slots = 0;
        let mut executing_slots = 0;
        let mut recycling_slots = 0;
        for slot_arc in slots.values() {
            let slot = slot_arc.lock().await;
            match slot.status() {
                SlotStatus::Idle | SlotStatus::Created => idle_slots += 1,
                SlotStatus::Executing => executing_slots += 1,
                SlotStatus::Recycling | SlotStatus::Terminating => recycling_slots += 1,
                SlotStatus::Terminated => {}
            }
        }
        let total_slots = slots.len();
        drop(slots);

        MetricsSnapshot {
            total_slots,
            idle_slots,
            executing_slots,
            recycling_slots,
            queued_requests: self.queue.len().await,
            total_executions: self.counters.total_executions.load(Ordering::Relaxed),
            successful_executions: self.counters.successful_executions.load(Ordering::Relaxed),
            failed_executions: self.counters.failed_executions.load(Ordering::Relaxed),
            timeout_executions: self.counters.timeout_executions.load(Ordering::Relaxed),
            memory_kills: self.counters.memory_kills.load(Ordering::Relaxed),
            forced_terminations: self.counters.forced_terminations.load(Ordering::Relaxed),
            worker_recycles: self.counters.worker_recycles.load(Ordering::Relaxed),
            avg_execution_time_ms: self.counters.avg_execution_time_ms(),
            avg_worker_memory_bytes: self.counters.avg_worker_memory_bytes(),
            peak_worker_memory_bytes: self.counters.peak_worker_memory_bytes(),
            queue_stats: self.queue.stats().await,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PoolEvent> {
        self.events.subscribe()
    }

    /// Marks the pool disposed, clears the queue, and terminates every slot.
    /// Always succeeds; safe to call more than once.
    pub async fn dispose(self: &Arc<Self>) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("disposing worker pool");
        self.queue.clear().await;

        let slots: Vec<(Uuid, Arc<Mutex<Slot>>)> = self
            .slots
            .lock()
            .await
            .iter()
            .map(|(id, slot)| (*id, Arc::clone(slot)))
            .collect();

        let mut handles = Vec::with_capacity(slots.len());
        for (_, slot_arc) in &slots {
            let slot_arc = Arc::clone(slot_arc);
            handles.push(tokio::spawn(async move {
                let mut slot = slot_arc.lock().await;
                slot.force_terminate().await
            }));
        }
        for handle in handles {
            if let Ok(true) = handle.await {
                self.counters.record_forced_termination();
            }
        }
        self.slots.lock().await.clear();
        self.idle.lock().await.clear();
    }
}

