//! Concurrency scheduler.
//!
//! `run_batch` starts one engine task per batch. The engine keeps at most
//! `concurrency_limit` tasks running, refills freed slots in input order,
//! retries backend-reported failures with backoff and reports the batch
//! outcome through the `EventHub` and the returned `BatchHandle`.

mod budget;
mod engine;
mod handle;
mod options;
mod submit;

use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::backend::AnalysisBackend;
use crate::events::EventHub;
use crate::task::TaskId;

pub use budget::SlotBudget;
pub use handle::{BatchController, BatchHandle, BatchReport, BatchSnapshot, TaskSummary};
pub use options::BatchOptions;

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("concurrency limit must be at least 1")]
    InvalidConcurrency,
    #[error("batch engine stopped unexpectedly: {0}")]
    Engine(String),
}

/// Start analyzing `items`. The first tasks are submitted before this
/// returns; subscribe to `hub` beforehand to see every event.
///
/// Duplicate items are analyzed once. Must be called inside a Tokio runtime.
pub fn run_batch(
    items: Vec<TaskId>,
    options: BatchOptions,
    backend: Arc<dyn AnalysisBackend>,
    hub: Arc<EventHub>,
) -> Result<BatchHandle, SchedulerError> {
    if options.concurrency_limit == 0 {
        return Err(SchedulerError::InvalidConcurrency);
    }

    let mut seen = HashSet::with_capacity(items.len());
    let mut unique = Vec::with_capacity(items.len());
    for id in items {
        if seen.insert(id.clone()) {
            unique.push(id);
        } else {
            tracing::warn!(task_id = %id, "duplicate item in batch, analyzing once");
        }
    }

    let batch_id = hub.next_batch_id();
    tracing::info!(
        batch_id,
        items = unique.len(),
        concurrency_limit = options.concurrency_limit,
        "starting batch"
    );

    let (control_tx, control_rx) = mpsc::unbounded_channel();
    let (mut engine, snapshot) = engine::Engine::new(
        batch_id,
        unique,
        options,
        backend,
        Arc::clone(&hub),
        control_rx,
    );
    engine.start();
    let join = tokio::spawn(engine.run());

    let controller = BatchController::new(batch_id, control_tx, snapshot);
    Ok(BatchHandle::new(controller, hub, join))
}

/// Analyze a single item: a batch of one.
pub async fn analyze_one(
    item: TaskId,
    options: BatchOptions,
    backend: Arc<dyn AnalysisBackend>,
    hub: Arc<EventHub>,
) -> Result<TaskSummary, SchedulerError> {
    let report = run_batch(vec![item], options, backend, hub)?.wait().await?;
    report
        .tasks
        .into_iter()
        .next()
        .ok_or_else(|| SchedulerError::Engine("empty batch report".into()))
}
