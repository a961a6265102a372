//! Job submission, run off the engine task.

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::backend::{AnalysisBackend, AnalysisOptions};
use crate::task::{TaskError, TaskId};

use super::engine::EngineMsg;

/// The model to submit with, or the configuration error every item fails with.
pub(super) fn resolve_model(model_id: Option<&str>) -> Result<&str, TaskError> {
    match model_id.map(str::trim) {
        Some(m) if !m.is_empty() => Ok(m),
        _ => Err(TaskError::Configuration(
            "no analysis model configured".into(),
        )),
    }
}

/// Submits one attempt and reports the result as `EngineMsg::Submitted`.
pub(super) fn spawn_submission(
    backend: Arc<dyn AnalysisBackend>,
    task_id: TaskId,
    attempt: u32,
    model_id: String,
    options: AnalysisOptions,
    tx: mpsc::UnboundedSender<EngineMsg>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tracing::debug!(task_id = %task_id, attempt, model_id = %model_id, "submitting");
        let result = backend
            .submit_analysis_job(&task_id, &model_id, &options)
            .await;
        let _ = tx.send(EngineMsg::Submitted {
            task_id,
            attempt,
            result,
        });
    })
}
