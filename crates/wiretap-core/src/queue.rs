//! Delivery queue
//!
//! Bounded FIFO of serialized frames awaiting transmission while no live
//! connection exists. Insertion beyond capacity evicts the single oldest
//! entry before appending (drop-oldest, never drop-newest).

use std::collections::VecDeque;

use tracing::debug;

/// Default bound on frames buffered while disconnected.
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

#[derive(Debug)]
pub struct DeliveryQueue {
    entries: VecDeque<String>,
    capacity: usize,
}

impl DeliveryQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity,
        }
    }

    /// Append a frame, evicting the oldest entry first if at capacity.
    pub fn push(&mut self, frame: String) {
        if self.entries.len() >= self.capacity {
            self.entries.pop_front();
            debug!("delivery queue full, dropped oldest frame");
        }
        self.entries.push_back(frame);
    }

    /// Next frame in FIFO order.
    pub fn pop(&mut self) -> Option<String> {
        self.entries.pop_front()
    }

    /// Put a frame back at the front after a failed mid-drain send, so the
    /// next drain resumes from it in order.
    pub fn restore(&mut self, frame: String) {
        self.entries.push_front(frame);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for DeliveryQueue {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}
