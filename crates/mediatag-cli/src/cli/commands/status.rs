//! `mediatag status <JOB_ID>` – one status query against the backend.

use anyhow::{Context, Result};
use mediatag_core::backend::{AnalysisBackend, HttpBackend, JobStatus};
use mediatag_core::config::MediatagConfig;
use mediatag_core::task::JobId;

pub async fn run_status(cfg: &MediatagConfig, job_id: &str) -> Result<()> {
    let backend = HttpBackend::from_config(&cfg.backend).context("backend config")?;
    let status = backend
        .get_job_status(&JobId::new(job_id))
        .await
        .with_context(|| format!("query job {}", job_id))?;

    match status {
        JobStatus::Pending { progress } => {
            println!("{}  pending  {}", job_id, fmt_progress(progress))
        }
        JobStatus::Processing { progress } => {
            println!("{}  processing  {}", job_id, fmt_progress(progress))
        }
        JobStatus::Completed {
            result,
            completed_at,
        } => {
            match completed_at {
                Some(at) => println!("{}  completed  at {}", job_id, at),
                None => println!("{}  completed", job_id),
            }
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        JobStatus::Failed { error } => println!("{}  failed  {}", job_id, error),
    }
    Ok(())
}

fn fmt_progress(progress: Option<u8>) -> String {
    progress
        .map(|p| format!("{}%", p))
        .unwrap_or_else(|| "-".to_string())
}
