//! Concurrency slots for one batch.
//!
//! Each task reserves a slot before it is submitted and releases it in the
//! same engine step as its terminal transition. Holders are tracked by task
//! id so a slot can only be released once.

use std::collections::HashSet;

use crate::task::TaskId;

#[derive(Debug)]
pub struct SlotBudget {
    limit: usize,
    holders: HashSet<TaskId>,
}

impl SlotBudget {
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
            holders: HashSet::new(),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Number of slots currently held.
    pub fn in_use(&self) -> usize {
        self.holders.len()
    }

    /// Free slots (limit - in_use).
    pub fn available(&self) -> usize {
        self.limit.saturating_sub(self.holders.len())
    }

    pub fn holds(&self, id: &TaskId) -> bool {
        self.holders.contains(id)
    }

    /// Reserve a slot for `id`. Returns false when the budget is exhausted
    /// or `id` already holds one.
    pub fn acquire(&mut self, id: &TaskId) -> bool {
        if self.available() == 0 || self.holders.contains(id) {
            return false;
        }
        self.holders.insert(id.clone())
    }

    /// Give back the slot held by `id`. Returns false if it held none.
    pub fn release(&mut self, id: &TaskId) -> bool {
        self.holders.remove(id)
    }
}
