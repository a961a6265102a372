//! Validated backend response types and request options.

use serde::{Deserialize, Serialize};

use crate::task::JobId;

/// What the analysis should generate. Sent verbatim as `options`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AnalysisOptions {
    pub generate_title: bool,
    pub generate_description: bool,
    pub generate_category: bool,
    pub generate_tags: bool,
    /// Output language hint (e.g. "en", "de").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            generate_title: true,
            generate_description: true,
            generate_category: true,
            generate_tags: true,
            language: None,
        }
    }
}

/// Accepted submission.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmittedJob {
    pub job_id: JobId,
    /// Provider-side task id, when the backend forwards one.
    pub external_task_id: Option<String>,
    /// Initial status string as reported by the backend.
    pub status: String,
    /// Media item summary echoed by the backend.
    pub item: Option<serde_json::Value>,
}

/// Job status, discriminated by the backend's `status` field.
#[derive(Debug, Clone, PartialEq)]
pub enum JobStatus {
    Pending {
        progress: Option<u8>,
    },
    Processing {
        progress: Option<u8>,
    },
    Completed {
        result: serde_json::Value,
        completed_at: Option<String>,
    },
    Failed {
        error: String,
    },
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed { .. } | JobStatus::Failed { .. })
    }

    /// Progress to record for a non-terminal status: the backend value when
    /// present, otherwise a coarse estimate (50 while processing). `None`
    /// leaves the task's progress unchanged.
    pub fn progress_hint(&self) -> Option<u8> {
        match self {
            JobStatus::Pending { progress } => *progress,
            JobStatus::Processing { progress } => Some(progress.unwrap_or(50)),
            JobStatus::Completed { .. } => Some(100),
            JobStatus::Failed { .. } => None,
        }
    }
}
