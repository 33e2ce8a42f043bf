//! Fixed-capacity record buffer for the recorder
//!
//! Owned by a single task; no interior locking. Once full, further
//! records are refused until the owner flushes and clears it.

use tick_types::TickRecord;

/// Bounded buffer of pending records.
#[derive(Debug)]
pub struct BatchingQueue {
    records: Vec<TickRecord>,
    capacity: usize,
}

impl BatchingQueue {
    /// Create a queue holding at most `capacity` records (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            records: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn is_full(&self) -> bool {
        self.records.len() >= self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drop all queued records, keeping the allocation.
    pub fn clear(&mut self) {
        self.records.clear();
    }

    /// Append a record. Returns `false` (and discards the record) when full.
    pub fn put(&mut self, record: TickRecord) -> bool {
        if self.is_full() {
            return false;
        }
        self.records.push(record);
        true
    }

    /// Queued records in arrival order.
    pub fn records(&self) -> &[TickRecord] {
        &self.records
    }
}
