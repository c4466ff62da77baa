//! Bounded history of recent broadcasts.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::message::Message;

/// Fixed-capacity FIFO of the most recent messages.
///
/// Appending at capacity evicts the oldest entry.
#[derive(Debug, Clone)]
pub struct HistoryRing {
    capacity: usize,
    entries: VecDeque<Arc<Message>>,
}

impl HistoryRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn append(&mut self, message: Arc<Message>) {
        if self.capacity == 0 {
            return;
        }
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(message);
    }

    /// Up to `n` most recent messages, oldest first.
    pub fn last(&self, n: usize) -> Vec<Arc<Message>> {
        let skip = self.entries.len().saturating_sub(n);
        self.entries.iter().skip(skip).cloned().collect()
    }
}
