//! Analysis backend contract.
//!
//! The scheduling core consumes exactly two backend operations: submitting an
//! analysis job for one media item and reading a job's status. Responses are
//! validated here, at the boundary, into `SubmittedJob` and the `JobStatus`
//! tagged union, so the rest of the crate never probes optional fields.

mod error;
mod http;
mod parse;
mod types;

use async_trait::async_trait;

use crate::task::{JobId, TaskId};

pub use error::BackendError;
pub use http::HttpBackend;
pub use parse::{parse_status_response, parse_submit_response};
pub use types::{AnalysisOptions, JobStatus, SubmittedJob};

/// Backend operations the scheduler and tracker depend on.
///
/// `submit_analysis_job` must return once the job is accepted, not when it
/// completes. `get_job_status` must be safe to call any number of times.
#[async_trait]
pub trait AnalysisBackend: Send + Sync {
    async fn submit_analysis_job(
        &self,
        media_id: &TaskId,
        model_id: &str,
        options: &AnalysisOptions,
    ) -> Result<SubmittedJob, BackendError>;

    async fn get_job_status(&self, job_id: &JobId) -> Result<JobStatus, BackendError>;
}
