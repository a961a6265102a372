use std::time::Duration;

use crate::backend::AnalysisOptions;
use crate::config::MediatagConfig;
use crate::retry::RetryPolicy;
use crate::tracker::PollTimings;

/// Per-batch settings for `run_batch`.
#[derive(Debug, Clone)]
pub struct BatchOptions {
    /// Maximum tasks holding a slot at once. Must be at least 1.
    pub concurrency_limit: usize,
    /// Model used for every item; missing or blank fails each item as a
    /// configuration error.
    pub model_id: Option<String>,
    pub analysis: AnalysisOptions,
    pub retry: RetryPolicy,
    pub poll: PollTimings,
    /// Hard ceiling per task, counted from its first submission.
    pub task_timeout: Duration,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self::from_config(&MediatagConfig::default())
    }
}

impl BatchOptions {
    pub fn from_config(cfg: &MediatagConfig) -> Self {
        Self {
            concurrency_limit: cfg.scheduler.concurrency_limit,
            model_id: cfg.backend.model_id.clone(),
            analysis: AnalysisOptions::default(),
            retry: RetryPolicy::from_config(cfg.scheduler.max_retries, &cfg.retry_or_default()),
            poll: PollTimings::from_config(&cfg.poll_or_default()),
            task_timeout: Duration::from_secs(cfg.scheduler.task_timeout_secs),
        }
    }

    pub fn with_concurrency(mut self, limit: usize) -> Self {
        self.concurrency_limit = limit;
        self
    }

    pub fn with_model(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = Some(model_id.into());
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.retry.max_retries = max_retries;
        self
    }
}
