//! Bounded FIFO history.
//!
//! Holds the most recent `capacity` items; pushing into a full buffer evicts
//! the oldest. Used by the performance monitor for its metric ledger.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// A fixed-capacity history that evicts oldest-first.
pub struct RingBuffer<T> {
    items: VecDeque<T>,
    capacity: usize,
    total: u64,
    evicted: u64,
}

impl<T> RingBuffer<T> {
    /// Create a new ring buffer with the given capacity.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is 0.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "capacity must be > 0");
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
            total: 0,
            evicted: 0,
        }
    }

    /// Push an item, returning the evicted oldest item when full.
    pub fn push(&mut self, item: T) -> Option<T> {
        let evicted = if self.items.len() == self.capacity {
            self.evicted += 1;
            self.items.pop_front()
        } else {
            None
        };
        self.items.push_back(item);
        self.total += 1;
        evicted
    }

    /// Most recently pushed item.
    #[must_use]
    pub fn back(&self) -> Option<&T> {
        self.items.back()
    }

    /// Oldest retained item.
    #[must_use]
    pub fn front(&self) -> Option<&T> {
        self.items.front()
    }

    /// Iterate from oldest to newest.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> + ExactSizeIterator {
        self.items.iter()
    }

    /// Iterate from newest to oldest.
    pub fn iter_recent(&self) -> impl Iterator<Item = &T> {
        self.items.iter().rev()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        self.items.len() == self.capacity
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total items ever pushed (including evicted ones).
    #[must_use]
    pub fn total_pushed(&self) -> u64 {
        self.total
    }

    /// Total items evicted to make room.
    #[must_use]
    pub fn total_evicted(&self) -> u64 {
        self.evicted
    }

    /// Drop every retained item. Lifetime counters are kept.
    pub fn clear(&mut self) {
        self.items.clear();
    }

    #[must_use]
    pub fn stats(&self) -> RingBufferStats {
        RingBufferStats {
            capacity: self.capacity,
            len: self.items.len(),
            total_pushed: self.total,
            total_evicted: self.total_evicted(),
        }
    }
}

impl<T: Clone> RingBuffer<T> {
    /// Owned copy, oldest to newest.
    #[must_use]
    pub fn to_owned_vec(&self) -> Vec<T> {
        self.items.iter().cloned().collect()
    }
}

impl<T> std::fmt::Debug for RingBuffer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingBuffer")
            .field("capacity", &self.capacity)
            .field("len", &self.items.len())
            .field("total_pushed", &self.total)
            .finish()
    }
}

/// Serializable occupancy summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RingBufferStats {
    pub capacity: usize,
    pub len: usize,
    pub total_pushed: u64,
    pub total_evicted: u64,
}
