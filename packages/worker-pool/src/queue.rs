//! ============================================================================
//! File: packages/worker-pool/src/queue.rs
//! ----------------------------------------------------------------------------
//! Bounded FIFO of requests waiting for a slot. The queue itself dispatches
//! nothing; `enqueue` resolves once the pool calls `fulfill_next`, times out,
//! is cancelled, or is dropped by `clear`.
//! ============================================================================

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, oneshot};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{Result, WorkerPoolError};

struct Entry {
    id: Uuid,
    fulfill_tx: oneshot::Sender<()>,
}

/// Running totals surfaced through [`crate::metrics::MetricsSnapshot`].
#[derive(Debug, Clone, Copy, Default)]
pub struct QueueStats {
    pub total_enqueued: u64,
    pub fulfilled: u64,
    pub timed_out: u64,
    pub aborted: u64,
    pub longest_wait_ms: u64,
    wait_sum_ms: u64,
}

impl QueueStats {
    pub fn average_wait_ms(&self) -> f64 {
        let completed = self.fulfilled + self.timed_out + self.aborted;
        if completed == 0 {
            0.0
        } else {
            self.wait_sum_ms as f64 / completed as f64
        }
    }
}

/// A strict-FIFO admission queue with capacity `max_queue_size`.
pub struct ExecutionQueue {
    capacity: usize,
    entries: Mutex<VecDeque<Entry>>,
    stats: Mutex<QueueStats>,
}

impl ExecutionQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Mutex::new(VecDeque::new()),
            stats: Mutex::new(QueueStats::default()),
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn stats(&self) -> QueueStats {
        *self.stats.lock().await
    }

    /// Waits for a slot to become available, bounded by `timeout` and an
    /// optional cancellation token. Strict FIFO: requests leave in the order
    /// they arrived, via [`ExecutionQueue::fulfill_next`].
    pub async fn enqueue(&self, timeout: Duration, cancel: Option<CancellationToken>) -> Result<()> {
        let id = Uuid::new_v4();
        let enqueued_at = Instant::now();
        let rx = {
            let mut entries = self.entries.lock().await;
            if entries.len() >= self.capacity {
                let mut stats = self.stats.lock().await;
                stats.total_enqueued += 1;
                return Err(WorkerPoolError::QueueFull);
            }
            if let Some(cancel) = &cancel {
                if cancel.is_cancelled() {
                    let mut stats = self.stats.lock().await;
                    stats.total_enqueued += 1;
                    stats.aborted += 1;
                    return Err(WorkerPoolError::ExecutionAborted);
                }
            }
            let (fulfill_tx, fulfill_rx) = oneshot::channel();
            entries.push_back(Entry { id, fulfill_tx });
            let mut stats = self.stats.lock().await;
            stats.total_enqueued += 1;
            fulfill_rx
        };

        let cancelled = async {
            match &cancel {
                Some(token) => token.cancelled().await,
                None => std::future::pending().await,
            }
        };

        let outcome = tokio::select! {
            result = rx => {
                if result.is_ok() { Ok(()) } else { Err(WorkerPoolError::ExecutionAborted) }
            }
            _ = tokio::time::sleep(timeout) => {
                self.remove(id).await;
                Err(WorkerPoolError::QueueTimeout)
            }
            _ = cancelled => {
                self.remove(id).await;
                Err(WorkerPoolError::ExecutionAborted)
            }
        };

        self.record_outcome(enqueued_at, &outcome).await;
        outcome
    }

    /// Pops the head of the queue and wakes its waiter. Returns `true` if a
    /// request was released.
    pub async fn fulfill_next(&self) -> bool {
        let mut entries = self.entries.lock().await;
        if let Some(entry) = entries.pop_front() {
            let _ = entry.fulfill_tx.send(());
            true
        } else {
            false
        }
    }

    /// Rejects every pending request with [`WorkerPoolError::ExecutionAborted`].
    pub async fn clear(&self) {
        let mut entries = self.entries.lock().await;
        entries.clear();
    }

    async fn remove(&self, id: Uuid) {
        let mut entries = self.entries.lock().await;
        entries.retain(|e| e.id != id);
    }

    async fn record_outcome(&self, enqueued_at: Instant, outcome: &Result<()>) {
        let waited_ms = enqueued_at.elapsed().as_millis() as u64;
        let mut stats = self.stats.lock().await;
        match outcome {
            Ok(()) => stats.fulfilled += 1,
            Err(WorkerPoolError::QueueTimeout) => stats.timed_out += 1,
            Err(_) => stats.aborted += 1,
        }
        stats.wait_sum_ms += waited_ms;
        stats.longest_wait_ms = stats.longest_wait_ms.max(waited_ms);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn releases_in_fifo_order() {
        let queue = Arc::new(ExecutionQueue::new(10));
        let mut order = Vec::new();
        let mut handles = Vec::new();
        for i in 0..3 {
            let queue = Arc::clone(&queue);
            handles.push(tokio::spawn(async move {
                queue.enqueue(Duration::from_secs(5), None).await.unwrap();
                i
            }));
            tokio::task::yield_now().await;
        }
        for _ in 0..3 {
            tokio::time::sleep(Duration::from_millis(5)).await;
            queue.fulfill_next().await;
        }
        for handle in handles {
            order.push(handle.await.unwrap());
        }
        assert_eq!(order, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn queue_full_is_reported_immediately() {
        let queue = ExecutionQueue::new(1);
        let queue = Arc::new(queue);
        let blocker = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.enqueue(Duration::from_secs(5), None).await })
        };
        tokio::task::yield_now().await;
        let err = queue.enqueue(Duration::from_millis(10), None).await;
        assert!(matches!(err, Err(WorkerPoolError::QueueFull)));
        queue.fulfill_next().await;
        blocker.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn times_out_after_queue_timeout() {
        let queue = ExecutionQueue::new(5);
        let err = queue.enqueue(Duration::from_millis(20), None).await;
        assert!(matches!(err, Err(WorkerPoolError::QueueTimeout)));
        assert_eq!(queue.stats().await.timed_out, 1);
    }

    #[tokio::test]
    async fn cancellation_aborts_immediately() {
        let queue = ExecutionQueue::new(5);
        let token = CancellationToken::new();
        token.cancel();
        let err = queue.enqueue(Duration::from_secs(5), Some(token)).await;
        assert!(matches!(err, Err(WorkerPoolError::ExecutionAborted)));
    }

    #[tokio::test]
    async fn clear_drops_all_waiters() {
        let queue = Arc::new(ExecutionQueue::new(5));
        let handle = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.enqueue(Duration::from_secs(5), None).await })
        };
        tokio::task::yield_now().await;
        queue.clear().await;
        let result = handle.await.unwrap();
        assert!(result.is_err());
    }
}
