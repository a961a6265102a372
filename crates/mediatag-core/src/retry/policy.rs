use std::time::Duration;

use crate::config::RetryConfig;

/// High-level classification of an error for retry purposes.
///
/// Callers map curl errors, HTTP statuses and backend job errors into
/// these kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Operation timed out (connect/read).
    Timeout,
    /// Server asked us to slow down (e.g. 429, 503).
    Throttled,
    /// Network-level failure (connection reset, DNS, etc.).
    Connection,
    /// HTTP status that is retryable but not strictly throttling (5xx).
    Http5xx(u16),
    /// Missing or invalid model / credentials. Never retried.
    Configuration,
    /// The backend ran the job and reported it failed.
    JobFailed,
    /// Any other error (not retried).
    Other,
}

/// Network-class errors: a status poll that hits one of these keeps polling.
/// Any HTTP reply, even 5xx or 429, is an answer from the backend and is not transient.
pub fn is_transient(kind: ErrorKind) -> bool {
    matches!(kind, ErrorKind::Timeout | ErrorKind::Connection)
}

/// Decision returned by the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Do not retry this error.
    NoRetry,
    /// Retry after the given delay.
    RetryAfter(Duration),
}

/// Exponential backoff for backend-reported job failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry; doubles for each further retry.
    pub base_delay: Duration,
    /// Upper bound on backoff delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(max_retries: u32, cfg: &RetryConfig) -> Self {
        Self {
            max_retries,
            base_delay: cfg.base_delay(),
            max_delay: cfg.max_delay(),
        }
    }

    /// Backoff before retry number `attempt` (1-based): `base * 2^(attempt-1)`, capped.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = 1u32 << attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(exp).min(self.max_delay)
    }

    /// Decide whether a finished job is resubmitted, given how many retries
    /// the task has already consumed. Only `JobFailed` is retried; transport
    /// and HTTP kinds are settled by the poller and never reach here as retries.
    pub fn decide(&self, retries_used: u32, kind: ErrorKind) -> RetryDecision {
        if retries_used >= self.max_retries {
            return RetryDecision::NoRetry;
        }

        match kind {
            ErrorKind::JobFailed => RetryDecision::RetryAfter(self.backoff(retries_used + 1)),
            _ => RetryDecision::NoRetry,
        }
    }
}
