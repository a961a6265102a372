//! `mediatag analyze` – run one batch against the configured backend.

use anyhow::{bail, Context, Result};
use mediatag_core::backend::HttpBackend;
use mediatag_core::config::MediatagConfig;
use mediatag_core::control::default_control_socket_path;
use mediatag_core::events::{EventHub, SchedulerEvent};
use mediatag_core::scheduler::{self, BatchOptions, BatchSnapshot};
use mediatag_core::task::{TaskId, TaskOutcome};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast::error::RecvError;

use crate::cli::control_socket;

const PROGRESS_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Default)]
pub struct AnalyzeArgs {
    pub media_ids: Vec<String>,
    pub jobs: Option<usize>,
    pub model: Option<String>,
    pub max_retries: Option<u32>,
}

/// Config values overridden by command-line flags.
pub(crate) fn batch_options(cfg: &MediatagConfig, args: &AnalyzeArgs) -> BatchOptions {
    let mut options = BatchOptions::from_config(cfg);
    if let Some(jobs) = args.jobs {
        options = options.with_concurrency(jobs);
    }
    if let Some(model) = &args.model {
        options = options.with_model(model.clone());
    }
    if let Some(max_retries) = args.max_retries {
        options = options.with_max_retries(max_retries);
    }
    options
}

pub(crate) fn progress_line(snap: &BatchSnapshot) -> String {
    let c = snap.counts;
    let eta = snap
        .progress
        .eta_secs()
        .map(|s| format!("{:.0}s", s))
        .unwrap_or_else(|| "?".to_string());
    format!(
        "[{}/{}] {:.1}%  {} running  {:.2} items/s  ETA {}{}",
        c.completed + c.failed,
        c.total,
        snap.progress.fraction() * 100.0,
        c.running,
        snap.progress.tasks_per_sec(),
        eta,
        if snap.paused { "  (paused)" } else { "" },
    )
}

pub async fn run_analyze(cfg: &MediatagConfig, args: AnalyzeArgs) -> Result<()> {
    let backend = Arc::new(HttpBackend::from_config(&cfg.backend).context("backend config")?);
    let options = batch_options(cfg, &args);
    let items: Vec<TaskId> = args.media_ids.into_iter().map(TaskId::from).collect();

    let hub = Arc::new(EventHub::default());
    let mut events = hub.subscribe();
    let handle = scheduler::run_batch(items, options, backend, Arc::clone(&hub))?;
    // The engine holds the only other reference; the event stream closes when it ends.
    drop(hub);
    let batch_id = handle.id();

    let socket_path = default_control_socket_path().ok();
    let listener = match &socket_path {
        Some(path) => {
            match control_socket::spawn_control_listener(Arc::new(handle.controller()), path) {
                Ok(h) => {
                    tracing::debug!(path = %path.display(), "control socket listening");
                    Some(h)
                }
                Err(e) => {
                    tracing::warn!("control socket unavailable: {:#}", e);
                    None
                }
            }
        }
        None => None,
    };

    let printer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(SchedulerEvent::TaskFinished {
                    batch_id: b,
                    task_id,
                    outcome,
                }) if b == batch_id => match outcome {
                    TaskOutcome::Completed(_) => println!("  done    {}", task_id),
                    TaskOutcome::Failed(e) => println!("  failed  {}: {}", task_id, e),
                },
                Ok(_) => {}
                Err(RecvError::Lagged(n)) => tracing::warn!(skipped = n, "event stream lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let mut watch = handle.watch();
    let progress = tokio::spawn(async move {
        let mut last_print: Option<Instant> = None;
        while watch.changed().await.is_ok() {
            let snap = watch.borrow_and_update().clone();
            let now = Instant::now();
            let due = last_print.map_or(true, |t| now.duration_since(t) >= PROGRESS_INTERVAL);
            if due || snap.finished {
                println!("{}", progress_line(&snap));
                last_print = Some(now);
            }
        }
    });

    let report = handle.wait().await?;

    // Only unlink the socket this run bound; another batch may own it otherwise.
    if let (Some(listener), Some(path)) = (listener, &socket_path) {
        listener.abort();
        let _ = std::fs::remove_file(path);
    }
    let _ = printer.await;
    let _ = progress.await;

    let mut summary = format!(
        "Analyzed {} item(s) in {:.1}s: {} completed, {} failed",
        report.total,
        report.elapsed.as_secs_f64(),
        report.completed,
        report.failed
    );
    if report.cancelled {
        summary.push_str(&format!(", {} not started (cancelled)", report.not_started));
    }
    println!("{}", summary);
    tracing::info!(
        batch_id,
        completed = report.completed,
        failed = report.failed,
        "analyze finished"
    );

    if report.has_failures() {
        bail!("{} of {} item(s) failed", report.failed, report.total);
    }
    Ok(())
}
