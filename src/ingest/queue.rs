// Bounded outbound queue, one per connection
// Overflow drops the oldest queued message and counts it; the counter is
// surfaced via /stats

use super::protocol::ServerMessage;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::Notify;

/// Queue capacity per connection.
pub const OUTBOUND_QUEUE_CAPACITY: usize = 1024;

/// Mailbox between frame producers and a connection's writer task.
pub struct OutboundQueue {
    inner: Mutex<VecDeque<ServerMessage>>,
    notify: Notify,
    capacity: usize,
    dropped: AtomicU64,
    closed: AtomicBool,
}

impl Default for OutboundQueue {
    fn default() -> Self {
        Self::with_capacity(OUTBOUND_QUEUE_CAPACITY)
    }
}

impl OutboundQueue {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            capacity: capacity.max(1),
            dropped: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Enqueue a message, dropping the oldest one on overflow.
    ///
    /// Returns false when the queue is closed.
    pub fn push(&self, msg: ServerMessage) -> bool {
        if self.closed.load(Ordering::Acquire) {
            return false;
        }
        {
            let mut queue = self
                .inner
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            if queue.len() >= self.capacity {
                queue.pop_front();
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            queue.push_back(msg);
        }
        self.notify.notify_one();
        true
    }

    fn try_pop(&self) -> Option<ServerMessage> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .pop_front()
    }

    /// Await the next message. Resolves to `None` once the queue is closed
    /// and drained.
    pub async fn pop(&self) -> Option<ServerMessage> {
        loop {
            let notified = self.notify.notified();
            if let Some(msg) = self.try_pop() {
                return Some(msg);
            }
            if self.closed.load(Ordering::Acquire) {
                return None;
            }
            notified.await;
        }
    }

    /// Close the queue; pending messages can still be drained.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    pub fn dropped_total(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ping() -> ServerMessage {
        ServerMessage::Ping
    }

    #[tokio::test]
    async fn push_pop_preserves_order() {
        let queue = OutboundQueue::with_capacity(8);
        queue.push(ServerMessage::Ack {
            kind: "a".to_string(),
            inserted: None,
        });
        queue.push(ServerMessage::Ack {
            kind: "b".to_string(),
            inserted: None,
        });

        match queue.pop().await.unwrap() {
            ServerMessage::Ack { kind, .. } => assert_eq!(kind, "a"),
            other => panic!("unexpected message: {other:?}"),
        }
        match queue.pop().await.unwrap() {
            ServerMessage::Ack { kind, .. } => assert_eq!(kind, "b"),
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[tokio::test]
    async fn overflow_drops_oldest_and_counts() {
        let queue = OutboundQueue::with_capacity(2);
        queue.push(ServerMessage::Ack {
            kind: "first".to_string(),
            inserted: None,
        });
        queue.push(ping());
        queue.push(ping());

        assert_eq!(queue.dropped_total(), 1);
        assert_eq!(queue.len(), 2);
        // "first" was the one dropped
        match queue.pop().await.unwrap() {
            ServerMessage::Ping => {}
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[tokio::test]
    async fn close_wakes_waiter_and_drains() {
        let queue = std::sync::Arc::new(OutboundQueue::with_capacity(4));
        queue.push(ping());
        queue.close();

        assert!(queue.pop().await.is_some());
        assert!(queue.pop().await.is_none());
        assert!(!queue.push(ping()));
    }

    #[tokio::test]
    async fn pop_waits_for_push() {
        let queue = std::sync::Arc::new(OutboundQueue::with_capacity(4));
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.pop().await })
        };
        tokio::task::yield_now().await;
        queue.push(ping());
        let msg = waiter.await.unwrap();
        assert!(msg.is_some());
    }
}
