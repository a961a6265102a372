use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;

use crate::aggregate::BatchProgress;
use crate::control::ControlCommand;
use crate::events::{BatchId, EventHub, SchedulerEvent};
use crate::task::{TaskCounts, TaskError, TaskId, TaskStatus};

use super::SchedulerError;

/// Point-in-time view of a batch, published after every engine step.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchSnapshot {
    pub batch_id: BatchId,
    pub counts: TaskCounts,
    pub concurrency_limit: usize,
    pub paused: bool,
    pub cancelled: bool,
    /// The engine has stopped; counts are final.
    pub finished: bool,
    pub progress: BatchProgress,
}

/// Final state of one task as reported by `BatchHandle::wait`.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskSummary {
    pub id: TaskId,
    pub status: TaskStatus,
    pub retries: u32,
    pub result: Option<serde_json::Value>,
    pub error: Option<TaskError>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchReport {
    pub batch_id: BatchId,
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    /// Items that never started (only non-zero after a cancel).
    pub not_started: usize,
    pub cancelled: bool,
    pub elapsed: Duration,
    /// One entry per distinct item, in input order.
    pub tasks: Vec<TaskSummary>,
}

impl BatchReport {
    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }

    pub fn task(&self, id: &TaskId) -> Option<&TaskSummary> {
        self.tasks.iter().find(|t| &t.id == id)
    }
}

/// Cloneable control surface of a running batch (used by the control socket).
#[derive(Debug, Clone)]
pub struct BatchController {
    batch_id: BatchId,
    commands: mpsc::UnboundedSender<ControlCommand>,
    snapshot: watch::Receiver<BatchSnapshot>,
}

impl BatchController {
    pub(super) fn new(
        batch_id: BatchId,
        commands: mpsc::UnboundedSender<ControlCommand>,
        snapshot: watch::Receiver<BatchSnapshot>,
    ) -> Self {
        Self {
            batch_id,
            commands,
            snapshot,
        }
    }

    pub fn batch_id(&self) -> BatchId {
        self.batch_id
    }

    /// Returns false if the batch has already finished.
    pub fn send(&self, cmd: ControlCommand) -> bool {
        self.commands.send(cmd).is_ok()
    }

    pub fn pause(&self) -> bool {
        self.send(ControlCommand::Pause)
    }

    pub fn resume(&self) -> bool {
        self.send(ControlCommand::Resume)
    }

    pub fn cancel(&self) -> bool {
        self.send(ControlCommand::Cancel)
    }

    pub fn snapshot(&self) -> BatchSnapshot {
        self.snapshot.borrow().clone()
    }
}

/// Owner's handle to a batch started with `run_batch`.
pub struct BatchHandle {
    controller: BatchController,
    hub: Arc<EventHub>,
    engine: JoinHandle<BatchReport>,
}

impl BatchHandle {
    pub(super) fn new(
        controller: BatchController,
        hub: Arc<EventHub>,
        engine: JoinHandle<BatchReport>,
    ) -> Self {
        Self {
            controller,
            hub,
            engine,
        }
    }

    pub fn id(&self) -> BatchId {
        self.controller.batch_id
    }

    pub fn pause(&self) -> bool {
        self.controller.pause()
    }

    pub fn resume(&self) -> bool {
        self.controller.resume()
    }

    pub fn cancel(&self) -> bool {
        self.controller.cancel()
    }

    pub fn controller(&self) -> BatchController {
        self.controller.clone()
    }

    pub fn snapshot(&self) -> BatchSnapshot {
        self.controller.snapshot()
    }

    /// Receiver that changes after every engine step.
    pub fn watch(&self) -> watch::Receiver<BatchSnapshot> {
        self.controller.snapshot.clone()
    }

    /// Events of every batch on the hub; filter with `SchedulerEvent::batch_id`.
    pub fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.hub.subscribe()
    }

    /// Wait for the batch to finish (or quiesce after a cancel).
    pub async fn wait(self) -> Result<BatchReport, SchedulerError> {
        self.engine
            .await
            .map_err(|e| SchedulerError::Engine(e.to_string()))
    }
}
