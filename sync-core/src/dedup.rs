//! Bounded window of applied update ids.

use std::collections::{HashSet, VecDeque};

use sealed_sync_types::UpdateId;

/// Remembers the most recent update ids so a row appended twice (a retry
/// whose first attempt did land, or the echo of our own append) is applied
/// once.
#[derive(Debug, Clone)]
pub struct SeenUpdates {
    capacity: usize,
    order: VecDeque<UpdateId>,
    ids: HashSet<UpdateId>,
}

impl SeenUpdates {
    /// Create a window remembering up to `capacity` ids (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity),
            ids: HashSet::with_capacity(capacity),
        }
    }

    /// Record an id. Returns `false` if it was already in the window.
    pub fn insert(&mut self, id: UpdateId) -> bool {
        if !self.ids.insert(id) {
            return false;
        }
        self.order.push_back(id);
        if self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.ids.remove(&evicted);
            }
        }
        true
    }

    /// Check whether an id is in the window.
    pub fn contains(&self, id: &UpdateId) -> bool {
        self.ids.contains(id)
    }

    /// Number of ids remembered.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Check if the window is empty.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
