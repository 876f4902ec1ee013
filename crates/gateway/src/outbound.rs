//! Per-connection outbound queue (§4.2 Write pump, §5 per-resource
//! ownership).
//!
//! A bounded ring buffer rather than a plain `tokio::sync::mpsc`, because
//! the backpressure policy needs to remove a specific element (the oldest
//! non-`Message` frame) when the queue is full — something `mpsc` doesn't
//! support. The write pump is still the sole reader, so there is exactly
//! one consumer regardless of backing structure.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

use chatcore::wire::ServerFrame;
use parking_lot::Mutex;
use tokio::sync::Notify;

pub const OUTBOUND_CAPACITY: usize = 64;

pub struct OutboundQueue {
    queue: Mutex<VecDeque<ServerFrame>>,
    notify: Notify,
    closed: AtomicBool,
    capacity: usize,
}

impl OutboundQueue {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::with_capacity(OUTBOUND_CAPACITY)),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
            capacity: OUTBOUND_CAPACITY,
        }
    }

    /// Enqueue `frame`. Returns `false` if the queue was already full of
    /// frames none of which could be dropped (all `Message`) — the caller
    /// should then close the connection as "too slow" (§4.2 Backpressure
    /// policy).
    pub fn push(&self, frame: ServerFrame) -> bool {
        if self.closed.load(Ordering::Acquire) {
            return false;
        }

        let mut queue = self.queue.lock();
        if queue.len() < self.capacity {
            queue.push_back(frame);
            drop(queue);
            self.notify.notify_one();
            return true;
        }

        let droppable = queue
            .iter()
            .position(|f| !matches!(f, ServerFrame::Message { .. }));

        match droppable {
            Some(pos) => {
                queue.remove(pos);
                queue.push_back(frame);
                drop(queue);
                self.notify.notify_one();
                true
            }
            None => false,
        }
    }

    /// Wait for and pop the next frame. Returns `None` once the queue has
    /// been closed and drained.
    pub async fn pop(&self) -> Option<ServerFrame> {
        loop {
            {
                let mut queue = self.queue.lock();
                if let Some(frame) = queue.pop_front() {
                    return Some(frame);
                }
                if self.closed.load(Ordering::Acquire) {
                    return None;
                }
            }
            self.notify.notified().await;
        }
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    /// Current depth of the queue. Exposed for tests that assert on
    /// eviction/backpressure behavior without draining via `pop`.
    pub fn len_for_test(&self) -> usize {
        self.queue.lock().len()
    }
}

impl Default for OutboundQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(id: i64) -> ServerFrame {
        ServerFrame::Message {
            id,
            chat_id: 1,
            user_id: 1,
            body: "x".into(),
            created_at: chrono::Utc::now(),
        }
    }

    fn typing() -> ServerFrame {
        ServerFrame::Typing { chat_id: 1, user_id: 1 }
    }

    #[tokio::test]
    async fn push_then_pop_preserves_fifo_order() {
        let q = OutboundQueue::new();
        assert!(q.push(msg(1)));
        assert!(q.push(msg(2)));
        assert_eq!(q.pop().await, Some(msg(1)));
        assert_eq!(q.pop().await, Some(msg(2)));
    }

    #[tokio::test]
    async fn full_queue_drops_oldest_non_message_frame() {
        let q = OutboundQueue::new();
        assert!(q.push(typing()));
        for i in 0..(OUTBOUND_CAPACITY - 1) {
            assert!(q.push(msg(i as i64)));
        }
        // queue is now full (1 typing + 63 messages); pushing one more
        // message should evict the typing frame rather than fail.
        assert!(q.push(msg(999)));

        let mut drained = Vec::new();
        while let Some(f) = {
            let mut locked = q.queue.lock();
            locked.pop_front()
        } {
            drained.push(f);
        }
        assert!(!drained.iter().any(|f| matches!(f, ServerFrame::Typing { .. })));
    }

    #[tokio::test]
    async fn full_queue_of_messages_rejects_push() {
        let q = OutboundQueue::new();
        for i in 0..OUTBOUND_CAPACITY {
            assert!(q.push(msg(i as i64)));
        }
        assert!(!q.push(msg(999)));
    }

    #[tokio::test]
    async fn closed_queue_pop_returns_none_once_drained() {
        let q = OutboundQueue::new();
        q.push(msg(1));
        q.close();
        assert_eq!(q.pop().await, Some(msg(1)));
        assert_eq!(q.pop().await, None);
    }
}
