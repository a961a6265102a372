//! The batch engine: one task that owns every piece of mutable scheduling
//! state and handles one message at a time.
//!
//! Inputs are control commands, tracker events (progress, finish, expiry)
//! and internal messages from spawned submissions and timers. After each
//! message the engine refills free slots, checks for completion and
//! publishes a snapshot, in that order.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::aggregate::BatchTally;
use crate::backend::{AnalysisBackend, BackendError, SubmittedJob};
use crate::control::ControlCommand;
use crate::events::{BatchId, EventHub, SchedulerEvent};
use crate::retry::{classify_backend_error, classify_job_error, ErrorKind, RetryDecision};
use crate::task::{TaskError, TaskId, TaskStatus, TaskStore, TaskUpdate};
use crate::tracker::{JobRef, Tracker, TrackerEvent};

use super::budget::SlotBudget;
use super::handle::{BatchReport, BatchSnapshot, TaskSummary};
use super::options::BatchOptions;
use super::submit::{resolve_model, spawn_submission};

const TRACKER_CHANNEL_CAPACITY: usize = 64;
const HOUSEKEEPING_PERIOD: Duration = Duration::from_secs(60);

/// Messages from tasks the engine spawned.
#[derive(Debug)]
pub(super) enum EngineMsg {
    Submitted {
        task_id: TaskId,
        attempt: u32,
        result: Result<SubmittedJob, BackendError>,
    },
    RetryDue {
        task_id: TaskId,
    },
    TimedOut {
        task_id: TaskId,
    },
}

#[derive(Debug, Default)]
struct TaskTimers {
    timeout: Option<JoinHandle<()>>,
    retry: Option<JoinHandle<()>>,
    submission: Option<JoinHandle<()>>,
}

impl TaskTimers {
    fn abort(self) {
        for handle in [self.timeout, self.retry, self.submission].into_iter().flatten() {
            handle.abort();
        }
    }
}

pub(super) struct Engine {
    batch_id: BatchId,
    items: Vec<TaskId>,
    /// Index of the next item that has not been started.
    cursor: usize,
    options: BatchOptions,
    backend: Arc<dyn AnalysisBackend>,
    hub: Arc<EventHub>,
    store: TaskStore,
    tracker: Tracker,
    slots: SlotBudget,
    tally: BatchTally,
    timers: HashMap<TaskId, TaskTimers>,
    /// Submission attempt per task; stale `Submitted` messages are dropped.
    attempts: HashMap<TaskId, u32>,
    finished: HashMap<TaskId, TaskSummary>,
    finish_reported: bool,
    cancel_reported: bool,
    internal_tx: mpsc::UnboundedSender<EngineMsg>,
    internal_rx: mpsc::UnboundedReceiver<EngineMsg>,
    tracker_rx: mpsc::Receiver<TrackerEvent>,
    control_rx: mpsc::UnboundedReceiver<ControlCommand>,
    snapshot_tx: watch::Sender<BatchSnapshot>,
}

impl Engine {
    /// `items` must already be de-duplicated.
    pub(super) fn new(
        batch_id: BatchId,
        items: Vec<TaskId>,
        options: BatchOptions,
        backend: Arc<dyn AnalysisBackend>,
        hub: Arc<EventHub>,
        control_rx: mpsc::UnboundedReceiver<ControlCommand>,
    ) -> (Self, watch::Receiver<BatchSnapshot>) {
        let now = Instant::now();
        let (tracker_tx, tracker_rx) = mpsc::channel(TRACKER_CHANNEL_CAPACITY);
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let tracker = Tracker::new(Arc::clone(&backend), options.poll, tracker_tx);
        let tally = BatchTally::new(&items, now);
        let slots = SlotBudget::new(options.concurrency_limit);

        let initial = BatchSnapshot {
            batch_id,
            counts: tally.counts(),
            concurrency_limit: slots.limit(),
            paused: false,
            cancelled: false,
            finished: false,
            progress: tally.progress(now),
        };
        let (snapshot_tx, snapshot_rx) = watch::channel(initial);

        let mut store = TaskStore::new();
        for id in &items {
            store.create(id.clone(), now);
        }

        let engine = Self {
            batch_id,
            items,
            cursor: 0,
            options,
            backend,
            hub,
            store,
            tracker,
            slots,
            tally,
            timers: HashMap::new(),
            attempts: HashMap::new(),
            finished: HashMap::new(),
            finish_reported: false,
            cancel_reported: false,
            internal_tx,
            internal_rx,
            tracker_rx,
            control_rx,
            snapshot_tx,
        };
        (engine, snapshot_rx)
    }

    /// Run one settle step without waiting for input. Used at start so the
    /// first tasks are submitted before `run_batch` returns.
    pub(super) fn start(&mut self) {
        self.settle(Instant::now());
    }

    pub(super) async fn run(mut self) -> BatchReport {
        let mut housekeeping =
            tokio::time::interval_at(Instant::now() + HOUSEKEEPING_PERIOD, HOUSEKEEPING_PERIOD);

        while !self.is_done() {
            tokio::select! {
                Some(cmd) = self.control_rx.recv() => self.on_control(cmd),
                Some(msg) = self.internal_rx.recv() => self.on_engine_msg(msg),
                Some(event) = self.tracker_rx.recv() => self.on_tracker_event(event),
                _ = housekeeping.tick() => {
                    let now = Instant::now();
                    self.tracker.cleanup_old_tasks(&mut self.store, now);
                }
            }
            self.settle(Instant::now());
        }

        self.shutdown()
    }

    fn is_done(&self) -> bool {
        self.finish_reported || self.cancel_reported || self.items.is_empty()
    }

    fn settle(&mut self, now: Instant) {
        self.refill(now);
        self.check_done(now);
        self.publish_snapshot(now);
    }

    fn publish_snapshot(&self, now: Instant) {
        self.snapshot_tx.send_replace(BatchSnapshot {
            batch_id: self.batch_id,
            counts: self.tally.counts(),
            concurrency_limit: self.slots.limit(),
            paused: self.tally.is_paused(),
            cancelled: self.tally.is_cancelled(),
            finished: self.is_done(),
            progress: self.tally.progress(now),
        });
    }

    /// Start pending items in input order until the free slots are used up.
    fn refill(&mut self, now: Instant) {
        if self.tally.is_paused() || self.tally.is_cancelled() {
            return;
        }
        while self.slots.available() > 0 && self.cursor < self.items.len() {
            let id = self.items[self.cursor].clone();
            if !self.start_task(&id, now) {
                break;
            }
            self.cursor += 1;
        }
    }

    /// Returns false when `id` could not take a slot; it stays queued.
    fn start_task(&mut self, id: &TaskId, now: Instant) -> bool {
        let model = match resolve_model(self.options.model_id.as_deref()) {
            Ok(m) => m.to_string(),
            Err(e) => {
                self.finish_task(id, TaskUpdate::Fail(e), now);
                return true;
            }
        };
        if !self.slots.acquire(id) {
            tracing::error!(
                task_id = %id,
                in_use = self.slots.in_use(),
                limit = self.slots.limit(),
                "no slot for task, leaving it queued"
            );
            return false;
        }
        if let Err(e) = self.store.apply(id, TaskUpdate::Start, now) {
            tracing::warn!(task_id = %id, "start rejected: {}", e);
            self.slots.release(id);
            return true;
        }
        self.tally.observe(id, TaskStatus::Running);
        tracing::info!(task_id = %id, batch_id = self.batch_id, "task started");

        let timeout = self.options.task_timeout;
        let tx = self.internal_tx.clone();
        let task_id = id.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = tx.send(EngineMsg::TimedOut { task_id });
        });
        self.timers.entry(id.clone()).or_default().timeout = Some(timer);

        self.submit(id, model);
        true
    }

    fn submit(&mut self, id: &TaskId, model: String) {
        let attempt = {
            let n = self.attempts.entry(id.clone()).or_insert(0);
            *n += 1;
            *n
        };
        let handle = spawn_submission(
            Arc::clone(&self.backend),
            id.clone(),
            attempt,
            model,
            self.options.analysis.clone(),
            self.internal_tx.clone(),
        );
        self.timers.entry(id.clone()).or_default().submission = Some(handle);
    }

    fn on_control(&mut self, cmd: ControlCommand) {
        tracing::info!(batch_id = self.batch_id, command = %cmd, "control command");
        match cmd {
            ControlCommand::Pause => self.tally.set_paused(true),
            ControlCommand::Resume => self.tally.set_paused(false),
            ControlCommand::Cancel => self.tally.cancel(),
        }
    }

    fn on_engine_msg(&mut self, msg: EngineMsg) {
        let now = Instant::now();
        match msg {
            EngineMsg::Submitted {
                task_id,
                attempt,
                result,
            } => self.on_submitted(task_id, attempt, result, now),
            EngineMsg::RetryDue { task_id } => self.on_retry_due(task_id, now),
            EngineMsg::TimedOut { task_id } => {
                let running = self
                    .store
                    .get(&task_id)
                    .map(|t| !t.is_terminal())
                    .unwrap_or(false);
                if running {
                    tracing::warn!(task_id = %task_id, "task timed out");
                    let timeout = self.options.task_timeout;
                    self.finish_task(&task_id, TaskUpdate::Fail(TaskError::Timeout(timeout)), now);
                }
            }
        }
    }

    fn on_submitted(
        &mut self,
        task_id: TaskId,
        attempt: u32,
        result: Result<SubmittedJob, BackendError>,
        now: Instant,
    ) {
        if self.attempts.get(&task_id) != Some(&attempt) {
            return;
        }
        let status = match self.store.get(&task_id) {
            Some(task) => task.status,
            None => return,
        };
        if status != TaskStatus::Running {
            return;
        }
        match result {
            Ok(job) => {
                tracing::info!(task_id = %task_id, job_id = %job.job_id, attempt, "job submitted");
                let job = JobRef {
                    task_id: task_id.clone(),
                    job_id: job.job_id,
                };
                if let Err(e) = self.tracker.track(&mut self.store, job, now) {
                    tracing::warn!(task_id = %task_id, "could not track job: {}", e);
                }
            }
            Err(e) => {
                tracing::error!(task_id = %task_id, attempt, "submission failed: {}", e);
                let err = match classify_backend_error(&e) {
                    ErrorKind::Configuration => TaskError::Configuration(e.to_string()),
                    _ => TaskError::Submission(e.to_string()),
                };
                self.finish_task(&task_id, TaskUpdate::Fail(err), now);
            }
        }
    }

    fn on_retry_due(&mut self, task_id: TaskId, now: Instant) {
        let retrying = self
            .store
            .get(&task_id)
            .map(|t| t.status == TaskStatus::Retrying)
            .unwrap_or(false);
        if !retrying {
            return;
        }
        if self.tally.is_cancelled() {
            self.finish_task(&task_id, TaskUpdate::Fail(TaskError::Cancelled), now);
            return;
        }
        let model = match resolve_model(self.options.model_id.as_deref()) {
            Ok(m) => m.to_string(),
            Err(e) => {
                self.finish_task(&task_id, TaskUpdate::Fail(e), now);
                return;
            }
        };
        match self.store.apply(&task_id, TaskUpdate::Start, now) {
            Ok(applied) => {
                self.tally.observe(&task_id, applied.task.status);
                tracing::info!(task_id = %task_id, retries = applied.task.retries, "retrying task");
                self.submit(&task_id, model);
            }
            Err(e) => tracing::warn!(task_id = %task_id, "retry rejected: {}", e),
        }
    }

    fn on_tracker_event(&mut self, event: TrackerEvent) {
        let now = Instant::now();
        match event {
            TrackerEvent::Progress {
                task_id,
                job_id,
                progress,
            } => {
                let before = match self.store.get(&task_id) {
                    Some(t) if t.external_job_id.as_ref() == Some(&job_id) => t.progress,
                    _ => return,
                };
                if let Ok(applied) = self.store.apply(&task_id, TaskUpdate::Progress(progress), now) {
                    if applied.task.progress > before {
                        self.tally.observe_progress(&task_id, applied.task.progress);
                        self.hub.publish(SchedulerEvent::TaskProgress {
                            batch_id: self.batch_id,
                            task_id,
                            progress: applied.task.progress,
                        });
                    }
                }
            }
            TrackerEvent::Finished {
                task_id,
                job_id,
                outcome,
            } => {
                let retries = match self.store.get(&task_id) {
                    Some(t) if t.external_job_id.as_ref() == Some(&job_id) && !t.is_terminal() => {
                        t.retries
                    }
                    _ => {
                        tracing::debug!(task_id = %task_id, job_id = %job_id, "dropping stale poll result");
                        return;
                    }
                };
                self.tracker.stop_polling(&task_id);
                let _ = self.store.apply(&task_id, TaskUpdate::Detach, now);
                match outcome {
                    Ok(result) => self.finish_task(&task_id, TaskUpdate::Complete(result), now),
                    Err(TaskError::JobFailed(msg)) => {
                        let kind = classify_job_error(&msg);
                        match self.options.retry.decide(retries, kind) {
                            RetryDecision::RetryAfter(delay) => {
                                tracing::warn!(
                                    task_id = %task_id,
                                    job_id = %job_id,
                                    attempt = retries + 1,
                                    delay_ms = delay.as_millis() as u64,
                                    "analysis failed, will retry: {}",
                                    msg
                                );
                                self.schedule_retry(&task_id, delay, now);
                            }
                            RetryDecision::NoRetry => {
                                let err = match kind {
                                    ErrorKind::Configuration => TaskError::Configuration(msg),
                                    _ => TaskError::JobFailed(msg),
                                };
                                self.finish_task(&task_id, TaskUpdate::Fail(err), now);
                            }
                        }
                    }
                    Err(e) => self.finish_task(&task_id, TaskUpdate::Fail(e), now),
                }
            }
            TrackerEvent::Expired { task_id } => {
                if self.store.get(&task_id).map(|t| t.is_terminal()).unwrap_or(false) {
                    self.store.remove(&task_id);
                }
            }
        }
    }

    fn schedule_retry(&mut self, id: &TaskId, delay: Duration, now: Instant) {
        match self.store.apply(id, TaskUpdate::Retry, now) {
            Ok(applied) => {
                self.tally.observe(id, applied.task.status);
            }
            Err(e) => {
                tracing::warn!(task_id = %id, "retry rejected: {}", e);
                return;
            }
        }
        let tx = self.internal_tx.clone();
        let task_id = id.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(EngineMsg::RetryDue { task_id });
        });
        self.timers.entry(id.clone()).or_default().retry = Some(timer);
    }

    /// Apply a terminal update. On the first terminal transition the slot
    /// is released, polling and timers stop, and `TaskFinished` is published.
    fn finish_task(&mut self, id: &TaskId, update: TaskUpdate, now: Instant) {
        let applied = match self.store.apply(id, update, now) {
            Ok(applied) if applied.became_terminal() => applied,
            Ok(_) => return,
            Err(e) => {
                tracing::debug!(task_id = %id, "ignored update: {}", e);
                return;
            }
        };
        self.slots.release(id);
        self.tracker.stop_polling(id);
        if let Some(timers) = self.timers.remove(id) {
            timers.abort();
        }

        let task = applied.task;
        self.tally.observe(id, task.status);
        match task.error() {
            Some(e) => tracing::error!(task_id = %id, retries = task.retries, "task failed: {}", e),
            None => tracing::info!(task_id = %id, retries = task.retries, "task completed"),
        }
        self.finished.insert(
            id.clone(),
            TaskSummary {
                id: id.clone(),
                status: task.status,
                retries: task.retries,
                result: task.result().cloned(),
                error: task.error().cloned(),
            },
        );
        if let Some(outcome) = task.outcome {
            self.hub.publish(SchedulerEvent::TaskFinished {
                batch_id: self.batch_id,
                task_id: id.clone(),
                outcome,
            });
        }
        self.tracker.schedule_removal(id.clone());
    }

    fn check_done(&mut self, now: Instant) {
        if self.finish_reported || self.cancel_reported {
            return;
        }
        let counts = self.tally.counts();
        if self.tally.is_complete() {
            self.finish_reported = true;
            self.tally.mark_finished(now);
            tracing::info!(
                batch_id = self.batch_id,
                completed = counts.completed,
                failed = counts.failed,
                "batch finished"
            );
            self.hub.publish(SchedulerEvent::BatchFinished {
                batch_id: self.batch_id,
                success: counts.completed,
                failed: counts.failed,
            });
            self.hub.notify_batch_finished();
        } else if self.tally.is_cancelled() && counts.running == 0 {
            self.cancel_reported = true;
            self.tally.mark_finished(now);
            tracing::info!(
                batch_id = self.batch_id,
                completed = counts.completed,
                failed = counts.failed,
                not_started = counts.pending,
                "batch cancelled"
            );
            self.hub.publish(SchedulerEvent::BatchCancelled {
                batch_id: self.batch_id,
                completed: counts.completed,
                failed: counts.failed,
                not_started: counts.pending,
            });
            self.hub.notify_batch_finished();
        }
    }

    fn shutdown(mut self) -> BatchReport {
        let now = Instant::now();
        self.tracker.stop_all_polling();
        for (_, timers) in self.timers.drain() {
            timers.abort();
        }
        self.publish_snapshot(now);

        let counts = self.tally.counts();
        let tasks = self
            .items
            .iter()
            .map(|id| match self.finished.get(id) {
                Some(summary) => summary.clone(),
                None => TaskSummary {
                    id: id.clone(),
                    status: self.tally.status(id).unwrap_or(TaskStatus::Pending),
                    retries: self.store.get(id).map(|t| t.retries).unwrap_or(0),
                    result: None,
                    error: None,
                },
            })
            .collect();

        BatchReport {
            batch_id: self.batch_id,
            total: counts.total,
            completed: counts.completed,
            failed: counts.failed,
            not_started: counts.pending,
            cancelled: self.tally.is_cancelled(),
            elapsed: self.tally.elapsed(now),
            tasks,
        }
    }
}
