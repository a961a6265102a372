//! In-memory `AnalysisBackend` driven by per-item scripts.
//!
//! Each item has a list of attempts; attempt N is used for the N-th
//! submission of that item (the last attempt repeats). An attempt says
//! whether submission succeeds and which status replies its job returns,
//! one per poll, repeating the last reply.

use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::time::Instant;

use mediatag_core::backend::{AnalysisBackend, AnalysisOptions, BackendError, JobStatus, SubmittedJob};
use mediatag_core::task::{JobId, TaskId};

#[derive(Debug, Clone)]
pub enum Poll {
    Status(JobStatus),
    /// Connection refused (keeps the poller going).
    Transient,
    /// 404 from the API (ends polling with an error).
    NotFound,
    /// 500 from the API (ends polling with an error).
    ServerError,
}

#[derive(Debug, Clone)]
pub enum Submit {
    Accept,
    Reject { status: u32, body: String },
}

#[derive(Debug, Clone)]
pub struct Attempt {
    pub submit: Submit,
    pub polls: Vec<Poll>,
}

impl Attempt {
    pub fn completes(media: &str) -> Self {
        Self::completes_after(media, 0)
    }

    /// `processing` polls (progress 50) before the completed reply.
    pub fn completes_after(media: &str, processing: usize) -> Self {
        let mut polls = vec![Poll::Status(JobStatus::Processing { progress: None }); processing];
        polls.push(Poll::Status(JobStatus::Completed {
            result: result_for(media),
            completed_at: None,
        }));
        Self {
            submit: Submit::Accept,
            polls,
        }
    }

    pub fn fails(error: &str) -> Self {
        Self {
            submit: Submit::Accept,
            polls: vec![Poll::Status(JobStatus::Failed {
                error: error.to_string(),
            })],
        }
    }

    pub fn never_finishes() -> Self {
        Self {
            submit: Submit::Accept,
            polls: vec![Poll::Status(JobStatus::Processing { progress: Some(10) })],
        }
    }

    pub fn rejected(status: u32, body: &str) -> Self {
        Self {
            submit: Submit::Reject {
                status,
                body: body.to_string(),
            },
            polls: Vec::new(),
        }
    }

    pub fn polls(polls: Vec<Poll>) -> Self {
        Self {
            submit: Submit::Accept,
            polls,
        }
    }
}

pub fn result_for(media: &str) -> serde_json::Value {
    json!({ "mediaId": media, "title": format!("Title of {}", media), "tags": ["test"] })
}

#[derive(Debug)]
struct Job {
    polls: Vec<Poll>,
    served: usize,
    settled: bool,
}

#[derive(Default)]
struct Inner {
    scripts: HashMap<String, Vec<Attempt>>,
    submissions: Vec<(TaskId, String, Instant)>,
    jobs: HashMap<String, Job>,
    active: usize,
    max_active: usize,
}

#[derive(Default)]
pub struct ScriptedBackend {
    inner: Mutex<Inner>,
}

impl ScriptedBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Items without a script complete on their first poll.
    pub fn script(&self, media: &str, attempts: Vec<Attempt>) {
        self.inner
            .lock()
            .unwrap()
            .scripts
            .insert(media.to_string(), attempts);
    }

    /// Every submission in call order: (item, model, time).
    pub fn submissions(&self) -> Vec<(TaskId, String, Instant)> {
        self.inner.lock().unwrap().submissions.clone()
    }

    pub fn submission_times(&self, media: &str) -> Vec<Instant> {
        self.submissions()
            .into_iter()
            .filter(|(id, _, _)| id.as_str() == media)
            .map(|(_, _, at)| at)
            .collect()
    }

    pub fn submitted_order(&self) -> Vec<String> {
        self.submissions()
            .into_iter()
            .map(|(id, _, _)| id.as_str().to_string())
            .collect()
    }

    /// Highest number of accepted jobs not yet reported terminal at once.
    pub fn max_active(&self) -> usize {
        self.inner.lock().unwrap().max_active
    }

    pub fn poll_count(&self, job_id: &str) -> usize {
        self.inner
            .lock()
            .unwrap()
            .jobs
            .get(job_id)
            .map(|j| j.served)
            .unwrap_or(0)
    }
}

#[async_trait]
impl AnalysisBackend for ScriptedBackend {
    async fn submit_analysis_job(
        &self,
        media_id: &TaskId,
        model_id: &str,
        _options: &AnalysisOptions,
    ) -> Result<SubmittedJob, BackendError> {
        let mut guard = self.inner.lock().unwrap();
        let inner = &mut *guard;
        inner
            .submissions
            .push((media_id.clone(), model_id.to_string(), Instant::now()));
        let attempt_no = inner
            .submissions
            .iter()
            .filter(|(id, _, _)| id == media_id)
            .count();
        let attempt = match inner.scripts.get(media_id.as_str()) {
            Some(attempts) if !attempts.is_empty() => {
                attempts[(attempt_no - 1).min(attempts.len() - 1)].clone()
            }
            _ => Attempt::completes(media_id.as_str()),
        };

        match attempt.submit {
            Submit::Reject { status, body } => Err(BackendError::Http { status, body }),
            Submit::Accept => {
                let job_id = format!("{}#{}", media_id, attempt_no);
                inner.jobs.insert(
                    job_id.clone(),
                    Job {
                        polls: attempt.polls,
                        served: 0,
                        settled: false,
                    },
                );
                inner.active += 1;
                inner.max_active = inner.max_active.max(inner.active);
                Ok(SubmittedJob {
                    job_id: JobId::new(job_id),
                    external_task_id: None,
                    status: "pending".into(),
                    item: None,
                })
            }
        }
    }

    async fn get_job_status(&self, job_id: &JobId) -> Result<JobStatus, BackendError> {
        let mut guard = self.inner.lock().unwrap();
        let inner = &mut *guard;
        let Some(job) = inner.jobs.get_mut(job_id.as_str()) else {
            return Err(BackendError::Http {
                status: 404,
                body: "job not found".into(),
            });
        };
        let reply = job
            .polls
            .get(job.served)
            .or_else(|| job.polls.last())
            .cloned();
        job.served += 1;

        let result = match reply {
            Some(Poll::Status(status)) => Ok(status),
            Some(Poll::Transient) => Err(BackendError::Transport(curl::Error::new(7))),
            Some(Poll::ServerError) => Err(BackendError::Http {
                status: 500,
                body: "internal error".into(),
            }),
            Some(Poll::NotFound) | None => Err(BackendError::Http {
                status: 404,
                body: "job not found".into(),
            }),
        };
        let terminal = match &result {
            Ok(status) => status.is_terminal(),
            Err(BackendError::Http { .. }) => true,
            Err(_) => false,
        };
        if terminal && !job.settled {
            job.settled = true;
            inner.active -= 1;
        }
        result
    }
}
