//! Types shared by the task store, tracker and scheduler.

use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

/// Stable identifier of a work item (the media id).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for TaskId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Identifier the backend assigned to a submitted analysis job.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobId(String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Life-cycle state of one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskStatus {
    Pending,
    Running,
    Retrying,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Retrying => "retrying",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    /// Running and retrying tasks both hold a concurrency slot.
    pub fn holds_slot(self) -> bool {
        matches!(self, TaskStatus::Running | TaskStatus::Retrying)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a task ended in `Failed`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
    /// Missing or invalid model configuration. Never retried.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// The job could not be created. Never retried.
    #[error("submission failed: {0}")]
    Submission(String),
    /// The backend reported the job as failed.
    #[error("analysis failed: {0}")]
    JobFailed(String),
    /// The task exceeded its hard ceiling.
    #[error("timed out after {}s", .0.as_secs())]
    Timeout(Duration),
    /// A status check failed with a non-transient error.
    #[error("status check failed: {0}")]
    Poll(String),
    /// The batch was cancelled while the task waited to retry.
    #[error("batch cancelled before retry")]
    Cancelled,
}

/// Terminal payload: the analysis result or the error, never both.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    Completed(serde_json::Value),
    Failed(TaskError),
}

impl TaskOutcome {
    pub fn status(&self) -> TaskStatus {
        match self {
            TaskOutcome::Completed(_) => TaskStatus::Completed,
            TaskOutcome::Failed(_) => TaskStatus::Failed,
        }
    }
}

/// Client-side record of one analysis job's life cycle.
#[derive(Debug, Clone)]
pub struct Task {
    pub id: TaskId,
    /// Backend job id; `None` until a submission succeeds.
    pub external_job_id: Option<JobId>,
    pub status: TaskStatus,
    /// 0..=100, non-decreasing while running.
    pub progress: u8,
    /// Retry attempts consumed.
    pub retries: u32,
    pub outcome: Option<TaskOutcome>,
    pub created_at: Instant,
    pub started_at: Option<Instant>,
    pub ended_at: Option<Instant>,
    /// True while a poller is attached.
    pub polling: bool,
}

impl Task {
    pub fn new(id: TaskId, now: Instant) -> Self {
        Self {
            id,
            external_job_id: None,
            status: TaskStatus::Pending,
            progress: 0,
            retries: 0,
            outcome: None,
            created_at: now,
            started_at: None,
            ended_at: None,
            polling: false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn result(&self) -> Option<&serde_json::Value> {
        match &self.outcome {
            Some(TaskOutcome::Completed(v)) => Some(v),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&TaskError> {
        match &self.outcome {
            Some(TaskOutcome::Failed(e)) => Some(e),
            _ => None,
        }
    }

    /// Time from first start to the terminal transition, if both happened.
    pub fn run_time(&self) -> Option<Duration> {
        match (self.started_at, self.ended_at) {
            (Some(s), Some(e)) => Some(e.saturating_duration_since(s)),
            _ => None,
        }
    }
}
