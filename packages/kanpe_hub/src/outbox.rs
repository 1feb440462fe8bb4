//! Per-subscriber bounded outbox.
//!
//! Single producer (the broadcast path, pushing under the hub lock) and
//! single consumer (the connection's write task). The bound is the only
//! back-pressure mechanism on the hot path: on overflow the oldest unsent
//! frame is dropped for this subscriber alone and a counter is bumped.
//! Pushing is synchronous so it can run inside the hub's critical section.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::Notify;

/// An item queued for a subscriber's write task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Frame {
    /// An encoded envelope to send as a text frame.
    Text(String),
    /// Drain marker: send a WebSocket close and stop.
    Close,
}

pub(crate) struct Outbox {
    queue: Mutex<OutboxQueue>,
    notify: Notify,
    capacity: usize,
    dropped: AtomicU64,
}

struct OutboxQueue {
    frames: VecDeque<Frame>,
    closed: bool,
}

impl Outbox {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: Mutex::new(OutboxQueue {
                frames: VecDeque::new(),
                closed: false,
            }),
            notify: Notify::new(),
            capacity,
            dropped: AtomicU64::new(0),
        }
    }

    /// Enqueue a text frame, dropping the oldest queued frame on overflow.
    /// Returns the subscriber's cumulative drop count so the caller can
    /// apply its slow-consumer policy.
    pub fn push(&self, text: String) -> u64 {
        {
            let mut queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
            if queue.closed {
                return self.dropped.load(Ordering::Relaxed);
            }
            if queue.frames.len() >= self.capacity {
                queue.frames.pop_front();
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            queue.frames.push_back(Frame::Text(text));
        }
        self.notify.notify_one();
        self.dropped.load(Ordering::Relaxed)
    }

    /// Enqueue the drain marker and refuse further pushes. Queued frames
    /// ahead of the marker still go out.
    pub fn push_close(&self) {
        {
            let mut queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
            if queue.closed {
                return;
            }
            queue.closed = true;
            queue.frames.push_back(Frame::Close);
        }
        self.notify.notify_one();
    }

    /// Await the next frame. Returns `None` once the outbox is closed and
    /// fully drained.
    pub async fn pop(&self) -> Option<Frame> {
        loop {
            {
                let mut queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
                if let Some(frame) = queue.frames.pop_front() {
                    return Some(frame);
                }
                if queue.closed {
                    return None;
                }
            }
            self.notify.notified().await;
        }
    }

    /// True once the queue is empty (drained or never filled).
    pub fn is_drained(&self) -> bool {
        self.queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .frames
            .is_empty()
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn frames_pop_in_push_order() {
        let outbox = Outbox::new(8);
        outbox.push("a".into());
        outbox.push("b".into());
        assert_eq!(outbox.pop().await, Some(Frame::Text("a".into())));
        assert_eq!(outbox.pop().await, Some(Frame::Text("b".into())));
    }

    #[tokio::test]
    async fn overflow_drops_oldest_and_counts() {
        let outbox = Outbox::new(2);
        outbox.push("a".into());
        outbox.push("b".into());
        let dropped = outbox.push("c".into());
        assert_eq!(dropped, 1);
        assert_eq!(outbox.dropped(), 1);
        // "a" was sacrificed; order of survivors preserved.
        assert_eq!(outbox.pop().await, Some(Frame::Text("b".into())));
        assert_eq!(outbox.pop().await, Some(Frame::Text("c".into())));
    }

    #[tokio::test]
    async fn close_drains_then_ends() {
        let outbox = Outbox::new(8);
        outbox.push("a".into());
        outbox.push_close();
        // Pushes after close are refused.
        outbox.push("late".into());
        assert_eq!(outbox.pop().await, Some(Frame::Text("a".into())));
        assert_eq!(outbox.pop().await, Some(Frame::Close));
        assert_eq!(outbox.pop().await, None);
    }

    #[tokio::test]
    async fn pop_wakes_on_push() {
        let outbox = Arc::new(Outbox::new(8));
        let consumer = {
            let outbox = outbox.clone();
            tokio::spawn(async move { outbox.pop().await })
        };
        tokio::task::yield_now().await;
        outbox.push("x".into());
        let frame = tokio::time::timeout(std::time::Duration::from_secs(1), consumer)
            .await
            .expect("consumer timed out")
            .expect("consumer panicked");
        assert_eq!(frame, Some(Frame::Text("x".into())));
    }

    #[tokio::test]
    async fn drained_flag_tracks_queue() {
        let outbox = Outbox::new(8);
        assert!(outbox.is_drained());
        outbox.push("a".into());
        assert!(!outbox.is_drained());
        let _ = outbox.pop().await;
        assert!(outbox.is_drained());
    }
}
