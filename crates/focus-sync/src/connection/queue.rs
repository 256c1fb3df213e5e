//! Bounded FIFO of serialized outbound frames.
//!
//! One queue serves both the open and the closed socket: `send` always
//! enqueues, and the driver drains it only while connected. A frame whose
//! write fails goes back to the head so ordering survives a reconnect.

use std::collections::VecDeque;

use focus_core::errors::{Result, SyncError};
use parking_lot::Mutex;
use tokio::sync::Notify;

/// Outbound frame queue with a fixed capacity.
#[derive(Debug)]
pub struct OutboundQueue {
    capacity: usize,
    frames: Mutex<VecDeque<String>>,
    ready: Notify,
}

impl OutboundQueue {
    /// Create an empty queue holding at most `capacity` frames.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            frames: Mutex::new(VecDeque::new()),
            ready: Notify::new(),
        }
    }

    /// Append a frame, failing fast when full.
    pub fn push(&self, frame: String) -> Result<()> {
        {
            let mut frames = self.frames.lock();
            if frames.len() >= self.capacity {
                return Err(SyncError::Backpressure {
                    capacity: self.capacity,
                });
            }
            frames.push_back(frame);
        }
        self.ready.notify_one();
        Ok(())
    }

    /// Put a frame that failed to write back at the head.
    ///
    /// May exceed capacity by the frames in flight; those were already
    /// accepted and must not be lost.
    pub fn requeue_front(&self, frame: String) {
        self.frames.lock().push_front(frame);
    }

    /// Take the oldest frame.
    pub fn pop(&self) -> Option<String> {
        self.frames.lock().pop_front()
    }

    /// Wait until a frame has been pushed since the last wakeup.
    pub async fn notified(&self) {
        self.ready.notified().await;
    }

    /// Frames waiting.
    pub fn len(&self) -> usize {
        self.frames.lock().len()
    }

    /// Whether nothing is waiting.
    pub fn is_empty(&self) -> bool {
        self.frames.lock().is_empty()
    }

    /// Configured capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drop everything waiting.
    pub fn clear(&self) -> usize {
        let mut frames = self.frames.lock();
        let n = frames.len();
        frames.clear();
        n
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn fifo_order() {
        let q = OutboundQueue::new(4);
        q.push("a".into()).unwrap();
        q.push("b".into()).unwrap();
        assert_eq!(q.pop().as_deref(), Some("a"));
        assert_eq!(q.pop().as_deref(), Some("b"));
        assert!(q.pop().is_none());
    }

    #[test]
    fn full_queue_is_backpressure() {
        let q = OutboundQueue::new(2);
        q.push("a".into()).unwrap();
        q.push("b".into()).unwrap();
        assert_matches!(q.push("c".into()), Err(SyncError::Backpressure { capacity: 2 }));
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn requeue_keeps_head_position() {
        let q = OutboundQueue::new(3);
        q.push("a".into()).unwrap();
        q.push("b".into()).unwrap();
        let head = q.pop().unwrap();
        q.requeue_front(head);
        assert_eq!(q.pop().as_deref(), Some("a"));
    }

    #[test]
    fn clear_reports_count() {
        let q = OutboundQueue::new(3);
        q.push("a".into()).unwrap();
        assert_eq!(q.clear(), 1);
        assert!(q.is_empty());
    }

    #[tokio::test]
    async fn push_wakes_waiter() {
        let q = std::sync::Arc::new(OutboundQueue::new(3));
        let waiter = {
            let q = std::sync::Arc::clone(&q);
            tokio::spawn(async move { q.notified().await })
        };
        q.push("x".into()).unwrap();
        waiter.await.unwrap();
    }
}
