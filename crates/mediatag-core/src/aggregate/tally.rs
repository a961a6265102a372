use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

use super::progress::BatchProgress;
use crate::task::{TaskCounts, TaskId, TaskStatus};

#[derive(Debug, Clone, Copy)]
struct Member {
    status: TaskStatus,
    progress: u8,
}

/// The batch's own view of its members' statuses.
///
/// Kept apart from the task store because store records are removed shortly
/// after they finish. Terminal statuses are sticky: once a member is
/// `Completed` or `Failed`, later observations are ignored, so each member
/// is counted in the final tally exactly once.
#[derive(Debug)]
pub struct BatchTally {
    members: HashMap<TaskId, Member>,
    order: Vec<TaskId>,
    paused: bool,
    cancelled: bool,
    started_at: Instant,
    finished_at: Option<Instant>,
}

impl BatchTally {
    /// Duplicate ids are counted once.
    pub fn new(ids: &[TaskId], now: Instant) -> Self {
        let mut members = HashMap::with_capacity(ids.len());
        let mut order = Vec::with_capacity(ids.len());
        for id in ids {
            if members
                .insert(
                    id.clone(),
                    Member {
                        status: TaskStatus::Pending,
                        progress: 0,
                    },
                )
                .is_none()
            {
                order.push(id.clone());
            }
        }
        Self {
            members,
            order,
            paused: false,
            cancelled: false,
            started_at: now,
            finished_at: None,
        }
    }

    /// Record a member's new status. Returns true if the tally changed.
    /// Unknown ids and updates to terminal members are ignored.
    pub fn observe(&mut self, id: &TaskId, status: TaskStatus) -> bool {
        let Some(member) = self.members.get_mut(id) else {
            return false;
        };
        if member.status.is_terminal() || member.status == status {
            return false;
        }
        member.status = status;
        match status {
            TaskStatus::Completed => member.progress = 100,
            TaskStatus::Pending | TaskStatus::Retrying => member.progress = 0,
            _ => {}
        }
        true
    }

    pub fn observe_progress(&mut self, id: &TaskId, progress: u8) {
        if let Some(member) = self.members.get_mut(id) {
            if member.status == TaskStatus::Running {
                member.progress = member.progress.max(progress.min(100));
            }
        }
    }

    pub fn status(&self, id: &TaskId) -> Option<TaskStatus> {
        self.members.get(id).map(|m| m.status)
    }

    /// Member ids in input order.
    pub fn ids(&self) -> impl Iterator<Item = &TaskId> {
        self.order.iter()
    }

    pub fn counts(&self) -> TaskCounts {
        self.members.values().map(|m| m.status).collect()
    }

    pub fn is_complete(&self) -> bool {
        let counts = self.counts();
        counts.total > 0 && counts.settled() == counts.total
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    pub fn cancel(&mut self) {
        self.cancelled = true;
    }

    pub fn mark_finished(&mut self, now: Instant) {
        self.finished_at.get_or_insert(now);
    }

    pub fn elapsed(&self, now: Instant) -> Duration {
        self.finished_at
            .unwrap_or(now)
            .saturating_duration_since(self.started_at)
    }

    pub fn progress(&self, now: Instant) -> BatchProgress {
        let counts = self.counts();
        let running_percent = self
            .members
            .values()
            .filter(|m| m.status == TaskStatus::Running)
            .map(|m| u64::from(m.progress))
            .sum();
        BatchProgress {
            settled: counts.settled(),
            total: counts.total,
            elapsed_secs: self.elapsed(now).as_secs_f64(),
            running_percent,
        }
    }
}
