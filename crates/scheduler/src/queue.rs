//! Pending task queue.
//!
//! Kept sorted by priority (high first), then task precedence, then sector
//! number (low first). Requests comparing equal keep insertion order.

use std::cmp::Ordering;

use crate::request::TaskRequest;

/// Total order used by the pending queue.
pub fn queue_order(a: &TaskRequest, b: &TaskRequest) -> Ordering {
    b.priority
        .cmp(&a.priority)
        .then_with(|| a.kind.precedence_cmp(&b.kind))
        .then_with(|| a.sector.id.number.cmp(&b.sector.id.number))
}

#[derive(Debug, Default)]
pub struct TaskQueue {
    entries: Vec<TaskRequest>,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binary-search insertion after every entry that does not sort after
    /// `request`.
    pub fn insert(&mut self, request: TaskRequest) {
        let at = self
            .entries
            .partition_point(|e| queue_order(e, &request) != Ordering::Greater);
        self.entries.insert(at, request);
    }

    pub fn dequeue_first(&mut self) -> Option<TaskRequest> {
        if self.entries.is_empty() {
            None
        } else {
            Some(self.entries.remove(0))
        }
    }

    pub fn remove(&mut self, index: usize) -> Option<TaskRequest> {
        if index < self.entries.len() {
            Some(self.entries.remove(index))
        } else {
            None
        }
    }

    /// Put a request back where [`remove`](Self::remove) took it from.
    pub(crate) fn restore(&mut self, index: usize, request: TaskRequest) {
        let at = index.min(self.entries.len());
        self.entries.insert(at, request);
    }

    pub fn get(&self, index: usize) -> Option<&TaskRequest> {
        self.entries.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TaskRequest> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
