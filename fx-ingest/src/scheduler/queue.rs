//! Bounded work queue shared by scheduled tasks.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, mpsc};

use crate::{Error, Result};

/// A unit of work handed between tasks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    /// Name of the producing task.
    pub source: String,
    pub payload: serde_json::Value,
}

impl WorkItem {
    pub fn new(source: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            source: source.into(),
            payload,
        }
    }
}

/// Multi-producer, multi-consumer bounded queue.
///
/// `push` waits while the queue is full.
#[derive(Debug, Clone)]
pub struct WorkQueue {
    tx: mpsc::Sender<WorkItem>,
    rx: Arc<Mutex<mpsc::Receiver<WorkItem>>>,
    capacity: usize,
}

impl WorkQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            tx,
            rx: Arc::new(Mutex::new(rx)),
            capacity,
        }
    }

    pub async fn push(&self, item: WorkItem) -> Result<()> {
        self.tx
            .send(item)
            .await
            .map_err(|_| Error::Other("work queue is closed".to_string()))
    }

    /// Enqueue without waiting. Gives the item back if the queue is full.
    pub fn try_push(&self, item: WorkItem) -> std::result::Result<(), WorkItem> {
        self.tx.try_send(item).map_err(|e| e.into_inner())
    }

    /// Wait for the next item.
    pub async fn pop(&self) -> Option<WorkItem> {
        self.rx.lock().await.recv().await
    }

    pub fn try_pop(&self) -> Option<WorkItem> {
        self.rx.try_lock().ok()?.try_recv().ok()
    }

    pub fn len(&self) -> usize {
        self.capacity - self.tx.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn item(n: i64) -> WorkItem {
        WorkItem::new("test", serde_json::json!({ "n": n }))
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = WorkQueue::new(4);
        queue.push(item(1)).await.unwrap();
        queue.push(item(2)).await.unwrap();
        assert_eq!(queue.len(), 2);

        assert_eq!(queue.pop().await, Some(item(1)));
        assert_eq!(queue.try_pop(), Some(item(2)));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_try_push_when_full() {
        let queue = WorkQueue::new(1);
        queue.try_push(item(1)).unwrap();
        let rejected = queue.try_push(item(2)).unwrap_err();
        assert_eq!(rejected, item(2));
    }

    #[tokio::test]
    async fn test_push_waits_for_space() {
        let queue = WorkQueue::new(1);
        queue.push(item(1)).await.unwrap();

        let producer = queue.clone();
        let pending = tokio::spawn(async move { producer.push(item(2)).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!pending.is_finished());

        assert_eq!(queue.pop().await, Some(item(1)));
        pending.await.unwrap().unwrap();
        assert_eq!(queue.pop().await, Some(item(2)));
    }
}
