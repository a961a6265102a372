//! Owned arena of task records keyed by id.

use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

use super::reduce::{reduce, TaskUpdate, TransitionError};
use super::types::{Task, TaskId, TaskStatus};

/// Per-status task counts. `pending + running + completed + failed == total`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskCounts {
    pub pending: usize,
    /// Running and retrying tasks (both hold a slot).
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub total: usize,
}

impl TaskCounts {
    pub fn add(&mut self, status: TaskStatus) {
        match status {
            TaskStatus::Pending => self.pending += 1,
            TaskStatus::Running | TaskStatus::Retrying => self.running += 1,
            TaskStatus::Completed => self.completed += 1,
            TaskStatus::Failed => self.failed += 1,
        }
        self.total += 1;
    }

    /// Tasks in a terminal state.
    pub fn settled(&self) -> usize {
        self.completed + self.failed
    }

    pub fn is_consistent(&self) -> bool {
        self.pending + self.running + self.completed + self.failed == self.total
    }
}

impl FromIterator<TaskStatus> for TaskCounts {
    fn from_iter<I: IntoIterator<Item = TaskStatus>>(iter: I) -> Self {
        let mut counts = TaskCounts::default();
        for status in iter {
            counts.add(status);
        }
        counts
    }
}

/// Result of a successful `TaskStore::apply`.
#[derive(Debug, Clone)]
pub struct Applied {
    pub previous: TaskStatus,
    /// The record after the update.
    pub task: Task,
}

impl Applied {
    pub fn became_terminal(&self) -> bool {
        !self.previous.is_terminal() && self.task.status.is_terminal()
    }

    pub fn status_changed(&self) -> bool {
        self.previous != self.task.status
    }
}

/// Authoritative in-memory task records. Insertion order is preserved so
/// callers can iterate in submission order.
#[derive(Debug, Default)]
pub struct TaskStore {
    tasks: HashMap<TaskId, Task>,
    order: Vec<TaskId>,
}

impl TaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a pending record for `id`, or return the existing one.
    pub fn create(&mut self, id: TaskId, now: Instant) -> &Task {
        if !self.tasks.contains_key(&id) {
            self.order.push(id.clone());
        }
        self.tasks
            .entry(id.clone())
            .or_insert_with(|| Task::new(id, now))
    }

    pub fn get(&self, id: &TaskId) -> Option<&Task> {
        self.tasks.get(id)
    }

    pub fn contains(&self, id: &TaskId) -> bool {
        self.tasks.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Records in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Task> {
        self.order.iter().filter_map(|id| self.tasks.get(id))
    }

    /// The only mutation path: replaces the record with `reduce(old, update)`.
    pub fn apply(
        &mut self,
        id: &TaskId,
        update: TaskUpdate,
        now: Instant,
    ) -> Result<Applied, TransitionError> {
        let current = self
            .tasks
            .get(id)
            .ok_or_else(|| TransitionError::UnknownTask(id.clone()))?;
        let previous = current.status;
        let next = reduce(current, update, now)?;
        self.tasks.insert(id.clone(), next.clone());
        Ok(Applied {
            previous,
            task: next,
        })
    }

    pub fn remove(&mut self, id: &TaskId) -> Option<Task> {
        let removed = self.tasks.remove(id)?;
        self.order.retain(|o| o != id);
        Some(removed)
    }

    /// Drops terminal, unpolled records that ended more than `horizon` ago.
    /// Returns how many were removed.
    pub fn cleanup_old(&mut self, horizon: Duration, now: Instant) -> usize {
        let stale: Vec<TaskId> = self
            .tasks
            .values()
            .filter(|t| t.is_terminal() && !t.polling)
            .filter(|t| {
                t.ended_at
                    .map(|end| now.saturating_duration_since(end) > horizon)
                    .unwrap_or(false)
            })
            .map(|t| t.id.clone())
            .collect();
        for id in &stale {
            self.remove(id);
        }
        stale.len()
    }

    pub fn counts(&self) -> TaskCounts {
        self.tasks.values().map(|t| t.status).collect()
    }
}
