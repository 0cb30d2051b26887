//! Bounded audio frame queue
//!
//! When full, the oldest frame is discarded. Frames otherwise come out in arrival
//! order. One consumer per queue.

use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::VecDeque;
use tokio::sync::Notify;
use tracing::trace;

#[derive(Debug, Default)]
struct QueueState {
    frames: VecDeque<Bytes>,
    closed: bool,
    dropped: u64,
}

/// Drop-oldest FIFO of audio frames
#[derive(Debug)]
pub struct AudioQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    capacity: usize,
}

impl AudioQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            state: Mutex::new(QueueState {
                frames: VecDeque::with_capacity(capacity),
                ..Default::default()
            }),
            notify: Notify::new(),
            capacity,
        }
    }

    /// Queue a frame, evicting the oldest one when full
    ///
    /// Returns `false` once the queue is closed.
    pub fn push(&self, frame: Bytes) -> bool {
        {
            let mut state = self.state.lock();
            if state.closed {
                return false;
            }
            if state.frames.len() >= self.capacity {
                state.frames.pop_front();
                state.dropped += 1;
                trace!(dropped = state.dropped, "Audio queue full, dropped oldest frame");
            }
            state.frames.push_back(frame);
        }
        self.notify.notify_one();
        true
    }

    pub fn try_pop(&self) -> Option<Bytes> {
        self.state.lock().frames.pop_front()
    }

    /// Next frame; `None` once closed and drained
    pub async fn pop(&self) -> Option<Bytes> {
        loop {
            {
                let mut state = self.state.lock();
                if let Some(frame) = state.frames.pop_front() {
                    return Some(frame);
                }
                if state.closed {
                    return None;
                }
            }
            self.notify.notified().await;
        }
    }

    /// Refuse further frames and wake the consumer
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.notify.notify_one();
    }

    /// Discard queued frames
    pub fn clear(&self) {
        self.state.lock().frames.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn len(&self) -> usize {
        self.state.lock().frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Frames evicted so far
    pub fn dropped(&self) -> u64 {
        self.state.lock().dropped
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
