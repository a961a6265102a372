//! Status Tracker (poller).
//!
//! `Tracker::track` attaches a submitted job to its task record and spawns a
//! poll loop for it. Poll loops never touch the store: they report through
//! an mpsc channel of `TrackerEvent`s and the owner of the store applies
//! them. Removal of finished tasks is scheduled the same way (`Expired`).

mod poll;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::backend::AnalysisBackend;
use crate::config::PollConfig;
use crate::task::{JobId, Task, TaskError, TaskId, TaskStatus, TaskStore, TaskUpdate, TransitionError};

/// A submitted job the backend can resolve by id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRef {
    pub task_id: TaskId,
    pub job_id: JobId,
}

/// Message from a poll loop (or removal timer) to the store owner.
#[derive(Debug, Clone, PartialEq)]
pub enum TrackerEvent {
    Progress {
        task_id: TaskId,
        job_id: JobId,
        progress: u8,
    },
    /// Last message of a poll loop.
    Finished {
        task_id: TaskId,
        job_id: JobId,
        outcome: Result<serde_json::Value, TaskError>,
    },
    /// The removal grace period of a terminal task elapsed.
    Expired { task_id: TaskId },
}

impl TrackerEvent {
    pub fn task_id(&self) -> &TaskId {
        match self {
            TrackerEvent::Progress { task_id, .. }
            | TrackerEvent::Finished { task_id, .. }
            | TrackerEvent::Expired { task_id } => task_id,
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, TrackerEvent::Finished { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollTimings {
    pub interval: Duration,
    /// Wait before the first poll so a just-submitted job is visible.
    pub startup_delay: Duration,
    /// How long a terminal task stays in the store.
    pub removal_grace: Duration,
    /// Age after which `cleanup_old_tasks` drops finished tasks.
    pub cleanup_horizon: Duration,
}

impl Default for PollTimings {
    fn default() -> Self {
        Self::from_config(&PollConfig::default())
    }
}

impl PollTimings {
    pub fn from_config(cfg: &PollConfig) -> Self {
        Self {
            interval: Duration::from_millis(cfg.interval_ms.max(1)),
            startup_delay: Duration::from_millis(cfg.startup_delay_ms),
            removal_grace: Duration::from_millis(cfg.removal_grace_ms),
            cleanup_horizon: Duration::from_secs(cfg.cleanup_horizon_secs),
        }
    }
}

pub struct Tracker {
    backend: Arc<dyn AnalysisBackend>,
    timings: PollTimings,
    events: mpsc::Sender<TrackerEvent>,
    pollers: HashMap<TaskId, JoinHandle<()>>,
}

impl Tracker {
    pub fn new(
        backend: Arc<dyn AnalysisBackend>,
        timings: PollTimings,
        events: mpsc::Sender<TrackerEvent>,
    ) -> Self {
        Self {
            backend,
            timings,
            events,
            pollers: HashMap::new(),
        }
    }

    pub fn timings(&self) -> &PollTimings {
        &self.timings
    }

    /// Create or update the task for `job` and start polling it, unless the
    /// task is already terminal. A pending or retrying task is started first.
    pub fn track<'s>(
        &mut self,
        store: &'s mut TaskStore,
        job: JobRef,
        now: Instant,
    ) -> Result<&'s Task, TransitionError> {
        let status = store.create(job.task_id.clone(), now).status;
        if !status.is_terminal() {
            if matches!(status, TaskStatus::Pending | TaskStatus::Retrying) {
                store.apply(&job.task_id, TaskUpdate::Start, now)?;
            }
            store.apply(
                &job.task_id,
                TaskUpdate::Attach {
                    job_id: job.job_id.clone(),
                },
                now,
            )?;
            self.spawn_poller(job.clone());
        }
        store
            .get(&job.task_id)
            .ok_or(TransitionError::UnknownTask(job.task_id))
    }

    fn spawn_poller(&mut self, job: JobRef) {
        if let Some(stale) = self.pollers.remove(&job.task_id) {
            stale.abort();
        }
        tracing::debug!(task_id = %job.task_id, job_id = %job.job_id, "polling job");
        let task_id = job.task_id.clone();
        let handle = tokio::spawn(poll::poll_job(
            Arc::clone(&self.backend),
            job,
            self.timings,
            self.events.clone(),
        ));
        self.pollers.insert(task_id, handle);
    }

    /// Stop the poll loop for `task_id`. Returns false if none was registered.
    pub fn stop_polling(&mut self, task_id: &TaskId) -> bool {
        match self.pollers.remove(task_id) {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// Stop every poll loop. Returns how many were registered.
    pub fn stop_all_polling(&mut self) -> usize {
        let n = self.pollers.len();
        for (_, handle) in self.pollers.drain() {
            handle.abort();
        }
        n
    }

    pub fn is_polling(&self, task_id: &TaskId) -> bool {
        self.pollers
            .get(task_id)
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    pub fn active_pollers(&self) -> usize {
        self.pollers.values().filter(|h| !h.is_finished()).count()
    }

    /// Send `Expired` for `task_id` once the removal grace has elapsed.
    pub fn schedule_removal(&self, task_id: TaskId) {
        let grace = self.timings.removal_grace;
        let events = self.events.clone();
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            let _ = events.send(TrackerEvent::Expired { task_id }).await;
        });
    }

    /// Garbage-collect finished tasks older than the cleanup horizon.
    pub fn cleanup_old_tasks(&self, store: &mut TaskStore, now: Instant) -> usize {
        let removed = store.cleanup_old(self.timings.cleanup_horizon, now);
        if removed > 0 {
            tracing::debug!(removed, "cleaned up old task records");
        }
        removed
    }
}

impl Drop for Tracker {
    fn drop(&mut self) {
        self.stop_all_polling();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{AnalysisOptions, BackendError, JobStatus, SubmittedJob};
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    enum Reply {
        Status(JobStatus),
        Transient,
        NotFound,
        ServerError,
    }

    struct FakeBackend {
        replies: Mutex<VecDeque<Reply>>,
        calls: Mutex<Vec<Instant>>,
    }

    impl FakeBackend {
        fn new(replies: Vec<Reply>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<Instant> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl AnalysisBackend for FakeBackend {
        async fn submit_analysis_job(
            &self,
            _media_id: &TaskId,
            _model_id: &str,
            _options: &AnalysisOptions,
        ) -> Result<SubmittedJob, BackendError> {
            Err(BackendError::Config("not used".into()))
        }

        async fn get_job_status(&self, _job_id: &JobId) -> Result<JobStatus, BackendError> {
            self.calls.lock().unwrap().push(Instant::now());
            let mut replies = self.replies.lock().unwrap();
            let reply = if replies.len() > 1 {
                replies.pop_front()
            } else {
                replies.front().map(|r| match r {
                    Reply::Status(s) => Reply::Status(s.clone()),
                    Reply::Transient => Reply::Transient,
                    Reply::NotFound => Reply::NotFound,
                    Reply::ServerError => Reply::ServerError,
                })
            };
            match reply {
                Some(Reply::Status(s)) => Ok(s),
                Some(Reply::Transient) => Err(BackendError::Transport(curl::Error::new(7))),
                Some(Reply::ServerError) => Err(BackendError::Http {
                    status: 500,
                    body: "internal error".into(),
                }),
                Some(Reply::NotFound) | None => Err(BackendError::Http {
                    status: 404,
                    body: "job not found".into(),
                }),
            }
        }
    }

    fn job(task: &str) -> JobRef {
        JobRef {
            task_id: TaskId::new(task),
            job_id: JobId::new(format!("job-{}", task)),
        }
    }

    fn tracker(backend: Arc<FakeBackend>) -> (Tracker, mpsc::Receiver<TrackerEvent>) {
        let (tx, rx) = mpsc::channel(16);
        (Tracker::new(backend, PollTimings::default(), tx), rx)
    }

    #[tokio::test(start_paused = true)]
    async fn track_starts_pending_task_and_reports_progress_then_finish() {
        let backend = FakeBackend::new(vec![
            Reply::Status(JobStatus::Processing { progress: None }),
            Reply::Status(JobStatus::Completed {
                result: json!({"title": "Harbor"}),
                completed_at: None,
            }),
        ]);
        let (mut tracker, mut rx) = tracker(Arc::clone(&backend));
        let mut store = TaskStore::new();

        let task = tracker.track(&mut store, job("a"), Instant::now()).unwrap();
        assert_eq!(task.status, TaskStatus::Running);
        assert_eq!(task.external_job_id, Some(JobId::new("job-a")));
        assert!(task.polling);

        assert_eq!(
            rx.recv().await.unwrap(),
            TrackerEvent::Progress {
                task_id: TaskId::new("a"),
                job_id: JobId::new("job-a"),
                progress: 50,
            }
        );
        match rx.recv().await.unwrap() {
            TrackerEvent::Finished { outcome, .. } => {
                assert_eq!(outcome, Ok(json!({"title": "Harbor"})))
            }
            other => panic!("expected Finished, got {:?}", other),
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(!tracker.is_polling(&TaskId::new("a")));
    }

    #[tokio::test(start_paused = true)]
    async fn first_poll_waits_for_startup_delay_then_interval() {
        let backend = FakeBackend::new(vec![
            Reply::Status(JobStatus::Pending { progress: None }),
            Reply::Status(JobStatus::Failed {
                error: "decoder crashed".into(),
            }),
        ]);
        let (mut tracker, mut rx) = tracker(Arc::clone(&backend));
        let mut store = TaskStore::new();
        let start = Instant::now();
        tracker.track(&mut store, job("a"), start).unwrap();

        match rx.recv().await.unwrap() {
            TrackerEvent::Finished { outcome, .. } => {
                assert_eq!(outcome, Err(TaskError::JobFailed("decoder crashed".into())))
            }
            other => panic!("expected Finished, got {:?}", other),
        }
        let calls = backend.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0] - start, Duration::from_millis(500));
        assert_eq!(calls[1] - calls[0], Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_errors_keep_polling() {
        let backend = FakeBackend::new(vec![
            Reply::Transient,
            Reply::Transient,
            Reply::Status(JobStatus::Completed {
                result: json!({}),
                completed_at: None,
            }),
        ]);
        let (mut tracker, mut rx) = tracker(Arc::clone(&backend));
        let mut store = TaskStore::new();
        tracker.track(&mut store, job("a"), Instant::now()).unwrap();

        let ev = rx.recv().await.unwrap();
        assert!(ev.is_finished());
        assert_eq!(backend.calls().len(), 3);
        // Nothing else arrives after the terminal event.
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(backend.calls().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn non_transient_error_finishes_with_poll_error() {
        let backend = FakeBackend::new(vec![Reply::NotFound]);
        let (mut tracker, mut rx) = tracker(backend);
        let mut store = TaskStore::new();
        tracker.track(&mut store, job("a"), Instant::now()).unwrap();
        match rx.recv().await.unwrap() {
            TrackerEvent::Finished {
                outcome: Err(TaskError::Poll(msg)),
                ..
            } => assert!(msg.contains("404")),
            other => panic!("expected poll failure, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn server_error_ends_polling_on_first_poll() {
        let backend = FakeBackend::new(vec![Reply::ServerError]);
        let (mut tracker, mut rx) = tracker(Arc::clone(&backend));
        let mut store = TaskStore::new();
        let start = Instant::now();
        tracker.track(&mut store, job("a"), start).unwrap();
        match rx.recv().await.unwrap() {
            TrackerEvent::Finished {
                outcome: Err(TaskError::Poll(msg)),
                ..
            } => assert!(msg.contains("500")),
            other => panic!("expected poll failure, got {:?}", other),
        }
        assert_eq!(Instant::now() - start, Duration::from_millis(500));
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(backend.calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_task_is_not_polled() {
        let backend = FakeBackend::new(vec![]);
        let (mut tracker, _rx) = tracker(Arc::clone(&backend));
        let mut store = TaskStore::new();
        let now = Instant::now();
        store.create(TaskId::new("a"), now);
        store
            .apply(
                &TaskId::new("a"),
                TaskUpdate::Fail(TaskError::Submission("x".into())),
                now,
            )
            .unwrap();
        let task = tracker.track(&mut store, job("a"), now).unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert!(!tracker.is_polling(&TaskId::new("a")));
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(backend.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_polling_is_idempotent() {
        let backend = FakeBackend::new(vec![Reply::Status(JobStatus::Processing {
            progress: Some(10),
        })]);
        let (mut tracker, _rx) = tracker(Arc::clone(&backend));
        let mut store = TaskStore::new();
        tracker.track(&mut store, job("a"), Instant::now()).unwrap();
        tracker.track(&mut store, job("b"), Instant::now()).unwrap();
        assert!(tracker.is_polling(&TaskId::new("a")));

        assert!(tracker.stop_polling(&TaskId::new("a")));
        assert!(!tracker.stop_polling(&TaskId::new("a")));
        assert!(!tracker.is_polling(&TaskId::new("a")));
        assert_eq!(tracker.stop_all_polling(), 1);
        assert_eq!(tracker.stop_all_polling(), 0);

        let polls = backend.calls().len();
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(backend.calls().len(), polls);
    }

    #[tokio::test(start_paused = true)]
    async fn removal_is_announced_after_grace() {
        let backend = FakeBackend::new(vec![]);
        let (tracker, mut rx) = tracker(backend);
        let start = Instant::now();
        tracker.schedule_removal(TaskId::new("a"));
        let ev = rx.recv().await.unwrap();
        assert_eq!(ev, TrackerEvent::Expired { task_id: TaskId::new("a") });
        assert_eq!(Instant::now() - start, Duration::from_secs(3));
    }
}
