//! Poll loop for one submitted job.

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use crate::backend::{AnalysisBackend, JobStatus};
use crate::retry;
use crate::task::TaskError;

use super::{JobRef, PollTimings, TrackerEvent};

/// Polls `job` until the backend reports a terminal status or a
/// non-transient error occurs, then sends exactly one `Finished` and returns.
/// Transient (network-class) errors are logged and polling continues.
/// Also returns early if the owner dropped the receiver.
pub(super) async fn poll_job(
    backend: Arc<dyn AnalysisBackend>,
    job: JobRef,
    timings: PollTimings,
    events: mpsc::Sender<TrackerEvent>,
) {
    tokio::time::sleep(timings.startup_delay).await;

    let mut ticker = tokio::time::interval(timings.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut transient_errors = 0u32;

    loop {
        ticker.tick().await;
        let event = match backend.get_job_status(&job.job_id).await {
            Ok(JobStatus::Completed { result, .. }) => TrackerEvent::Finished {
                task_id: job.task_id.clone(),
                job_id: job.job_id.clone(),
                outcome: Ok(result),
            },
            Ok(JobStatus::Failed { error }) => TrackerEvent::Finished {
                task_id: job.task_id.clone(),
                job_id: job.job_id.clone(),
                outcome: Err(TaskError::JobFailed(error)),
            },
            Ok(status) => match status.progress_hint() {
                Some(progress) => TrackerEvent::Progress {
                    task_id: job.task_id.clone(),
                    job_id: job.job_id.clone(),
                    progress,
                },
                None => continue,
            },
            Err(e) => {
                let kind = retry::classify_backend_error(&e);
                if retry::is_transient(kind) {
                    transient_errors += 1;
                    tracing::warn!(
                        task_id = %job.task_id,
                        job_id = %job.job_id,
                        transient_errors,
                        "status check failed, will poll again: {}",
                        e
                    );
                    continue;
                }
                tracing::error!(task_id = %job.task_id, job_id = %job.job_id, "status check failed: {}", e);
                TrackerEvent::Finished {
                    task_id: job.task_id.clone(),
                    job_id: job.job_id.clone(),
                    outcome: Err(TaskError::Poll(e.to_string())),
                }
            }
        };

        let terminal = event.is_finished();
        if events.send(event).await.is_err() || terminal {
            return;
        }
    }
}
