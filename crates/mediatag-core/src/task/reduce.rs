//! Pure state transitions for a single task record.

use tokio::time::Instant;

use super::types::{JobId, Task, TaskError, TaskId, TaskOutcome, TaskStatus};

/// A requested change to one task. Applied through `reduce`.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskUpdate {
    /// Take a slot and (re)submit: `Pending | Retrying -> Running`.
    Start,
    /// Submission succeeded; a poller now follows `job_id`.
    Attach { job_id: JobId },
    /// Backend-reported or heuristic progress.
    Progress(u8),
    /// Backend failed the job; back off before resubmitting.
    Retry,
    Complete(serde_json::Value),
    Fail(TaskError),
    /// The poller stopped without a terminal transition.
    Detach,
}

impl TaskUpdate {
    fn name(&self) -> &'static str {
        match self {
            TaskUpdate::Start => "start",
            TaskUpdate::Attach { .. } => "attach",
            TaskUpdate::Progress(_) => "progress",
            TaskUpdate::Retry => "retry",
            TaskUpdate::Complete(_) => "complete",
            TaskUpdate::Fail(_) => "fail",
            TaskUpdate::Detach => "detach",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("task {0} is not in the store")]
    UnknownTask(TaskId),
    #[error("task {id} is already {status}")]
    AlreadyTerminal { id: TaskId, status: TaskStatus },
    #[error("task {id}: cannot {update} while {from}")]
    Invalid {
        id: TaskId,
        from: TaskStatus,
        update: &'static str,
    },
}

/// Computes the next record from the previous one. Never mutates `task`.
///
/// Terminal states are absorbing: any update other than `Progress`/`Detach`
/// on a completed or failed task returns `AlreadyTerminal`, which is how the
/// terminal notification is kept to exactly one per task.
pub fn reduce(task: &Task, update: TaskUpdate, now: Instant) -> Result<Task, TransitionError> {
    let from = task.status;
    let mut next = task.clone();

    if from.is_terminal() {
        return match update {
            TaskUpdate::Progress(_) => Ok(next),
            TaskUpdate::Detach => {
                next.polling = false;
                Ok(next)
            }
            _ => Err(TransitionError::AlreadyTerminal {
                id: task.id.clone(),
                status: from,
            }),
        };
    }

    let invalid = |update: &TaskUpdate| TransitionError::Invalid {
        id: task.id.clone(),
        from,
        update: update.name(),
    };

    match update {
        TaskUpdate::Start => match from {
            TaskStatus::Pending | TaskStatus::Retrying => {
                next.status = TaskStatus::Running;
                next.external_job_id = None;
                next.progress = 0;
                next.started_at.get_or_insert(now);
            }
            _ => return Err(invalid(&update)),
        },
        TaskUpdate::Attach { job_id } => {
            if from != TaskStatus::Running {
                return Err(invalid(&TaskUpdate::Attach { job_id }));
            }
            next.external_job_id = Some(job_id);
            next.polling = true;
        }
        TaskUpdate::Progress(p) => {
            // Only a running task moves forward; late reports are dropped.
            if from == TaskStatus::Running {
                next.progress = next.progress.max(p.min(100));
            }
        }
        TaskUpdate::Retry => {
            if from != TaskStatus::Running {
                return Err(invalid(&update));
            }
            next.status = TaskStatus::Retrying;
            next.retries += 1;
            next.progress = 0;
            next.external_job_id = None;
            next.polling = false;
        }
        TaskUpdate::Complete(result) => {
            if from != TaskStatus::Running {
                return Err(invalid(&TaskUpdate::Complete(result)));
            }
            next.status = TaskStatus::Completed;
            next.progress = 100;
            next.outcome = Some(TaskOutcome::Completed(result));
            next.ended_at = Some(now);
            next.polling = false;
        }
        TaskUpdate::Fail(error) => {
            next.status = TaskStatus::Failed;
            next.outcome = Some(TaskOutcome::Failed(error));
            next.ended_at = Some(now);
            next.polling = false;
        }
        TaskUpdate::Detach => {
            next.polling = false;
        }
    }

    Ok(next)
}
