//! Events the scheduler exposes to its host.
//!
//! One `EventHub` is shared by every batch in the process. Hosts subscribe to
//! the broadcast stream for per-task and per-batch events; passive observers
//! that only need to refresh derived views watch `finished_signal`, a
//! generation counter bumped whenever any batch finishes or is cancelled.

use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{broadcast, watch};

use crate::task::{TaskId, TaskOutcome, TaskStatus};

/// Identifier of one `run_batch` call, unique per hub.
pub type BatchId = u64;

#[derive(Debug, Clone, PartialEq)]
pub enum SchedulerEvent {
    TaskProgress {
        batch_id: BatchId,
        task_id: TaskId,
        progress: u8,
    },
    TaskFinished {
        batch_id: BatchId,
        task_id: TaskId,
        outcome: TaskOutcome,
    },
    BatchFinished {
        batch_id: BatchId,
        success: usize,
        failed: usize,
    },
    BatchCancelled {
        batch_id: BatchId,
        completed: usize,
        failed: usize,
        not_started: usize,
    },
}

impl SchedulerEvent {
    pub fn batch_id(&self) -> BatchId {
        match self {
            SchedulerEvent::TaskProgress { batch_id, .. }
            | SchedulerEvent::TaskFinished { batch_id, .. }
            | SchedulerEvent::BatchFinished { batch_id, .. }
            | SchedulerEvent::BatchCancelled { batch_id, .. } => *batch_id,
        }
    }

    /// Terminal status carried by a `TaskFinished` event.
    pub fn finished_status(&self) -> Option<TaskStatus> {
        match self {
            SchedulerEvent::TaskFinished { outcome, .. } => Some(outcome.status()),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub struct EventHub {
    sender: broadcast::Sender<SchedulerEvent>,
    finished: watch::Sender<u64>,
    next_batch: AtomicU64,
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new(256)
    }
}

impl EventHub {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        let (finished, _) = watch::channel(0);
        Self {
            sender,
            finished,
            next_batch: AtomicU64::new(1),
        }
    }

    pub(crate) fn next_batch_id(&self) -> BatchId {
        self.next_batch.fetch_add(1, Ordering::Relaxed)
    }

    /// Broadcast an event; returns how many subscribers received it.
    /// Having no subscribers is not an error.
    pub fn publish(&self, event: SchedulerEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.sender.subscribe()
    }

    /// "Some batch finished" signal for passive observers.
    pub fn finished_signal(&self) -> watch::Receiver<u64> {
        self.finished.subscribe()
    }

    pub(crate) fn notify_batch_finished(&self) {
        self.finished.send_modify(|generation| *generation += 1);
    }
}
