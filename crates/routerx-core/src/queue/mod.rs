//! The in-memory dispatch queue: a FIFO of task IDs awaiting scheduling.
//!
//! The queue itself does not decide *where* a task runs, only the order in
//! which tasks become eligible for scheduling. Pool selection is the
//! `policy` module's job.

use std::collections::VecDeque;

use tokio::sync::{Mutex, Notify};
use uuid::Uuid;

/// Returned when a bounded queue is at capacity.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("queue is full (capacity {capacity})")]
    Full { capacity: usize },
}

/// Point-in-time queue occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueStats {
    pub len: usize,
    pub capacity: Option<usize>,
}

struct Inner {
    items: Mutex<VecDeque<Uuid>>,
    notify: Notify,
    capacity: Option<usize>,
}

/// A FIFO queue of task IDs, shared across the admission path and the
/// runner's dispatch loop.
///
/// Cloning is cheap: `Queue` wraps its state in an `Arc` internally via
/// `Clone` so callers can hand out handles freely.
#[derive(Clone)]
pub struct Queue {
    inner: std::sync::Arc<Inner>,
}

impl Queue {
    /// Create a queue with no capacity limit.
    pub fn unbounded() -> Self {
        Self {
            inner: std::sync::Arc::new(Inner {
                items: Mutex::new(VecDeque::new()),
                notify: Notify::new(),
                capacity: None,
            }),
        }
    }

    /// Create a queue that rejects enqueues once `capacity` items are
    /// waiting.
    pub fn bounded(capacity: usize) -> Self {
        Self {
            inner: std::sync::Arc::new(Inner {
                items: Mutex::new(VecDeque::new()),
                notify: Notify::new(),
                capacity: Some(capacity),
            }),
        }
    }

    /// Push a task ID onto the back of the queue.
    pub async fn enqueue(&self, id: Uuid) -> Result<(), QueueError> {
        let mut items = self.inner.items.lock().await;
        if let Some(capacity) = self.inner.capacity {
            if items.len() >= capacity {
                return Err(QueueError::Full { capacity });
            }
        }
        items.push_back(id);
        drop(items);
        self.inner.notify.notify_one();
        Ok(())
    }

    /// Pop the task ID at the front of the queue, waiting up to `timeout`
    /// for one to arrive if the queue is currently empty.
    ///
    /// Returns `None` on timeout.
    pub async fn dequeue(&self, timeout: std::time::Duration) -> Option<Uuid> {
        loop {
            {
                let mut items = self.inner.items.lock().await;
                if let Some(id) = items.pop_front() {
                    return Some(id);
                }
            }
            if tokio::time::timeout(timeout, self.inner.notify.notified())
                .await
                .is_err()
            {
                return None;
            }
        }
    }

    /// Try to pop a task ID without waiting.
    pub async fn try_dequeue(&self) -> Option<Uuid> {
        self.inner.items.lock().await.pop_front()
    }

    pub async fn size(&self) -> usize {
        self.inner.items.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.size().await == 0
    }

    pub async fn stats(&self) -> QueueStats {
        QueueStats {
            len: self.size().await,
            capacity: self.inner.capacity,
        }
    }
}

impl Default for Queue {
    fn default() -> Self {
        Self::unbounded()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn enqueue_then_dequeue_is_fifo() {
        let q = Queue::unbounded();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        q.enqueue(a).await.unwrap();
        q.enqueue(b).await.unwrap();
        assert_eq!(q.dequeue(Duration::from_millis(50)).await, Some(a));
        assert_eq!(q.dequeue(Duration::from_millis(50)).await, Some(b));
    }

    #[tokio::test]
    async fn dequeue_times_out_on_empty_queue() {
        let q = Queue::unbounded();
        assert_eq!(q.dequeue(Duration::from_millis(20)).await, None);
    }

    #[tokio::test]
    async fn bounded_queue_rejects_past_capacity() {
        let q = Queue::bounded(1);
        q.enqueue(Uuid::new_v4()).await.unwrap();
        assert!(matches!(
            q.enqueue(Uuid::new_v4()).await,
            Err(QueueError::Full { capacity: 1 })
        ));
    }

    #[tokio::test]
    async fn stats_reports_len_and_capacity() {
        let q = Queue::bounded(4);
        q.enqueue(Uuid::new_v4()).await.unwrap();
        let stats = q.stats().await;
        assert_eq!(stats.len, 1);
        assert_eq!(stats.capacity, Some(4));
    }

    #[tokio::test]
    async fn try_dequeue_does_not_wait() {
        let q = Queue::unbounded();
        assert_eq!(q.try_dequeue().await, None);
    }
}
