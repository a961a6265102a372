//! Retry and backoff policy.
//!
//! This module encapsulates error classification (transport failures,
//! throttling, configuration problems, backend-reported job failures) and
//! exponential backoff decisions so the tracker and the scheduler share a
//! consistent policy.

mod classify;
mod policy;

pub use classify::{
    classify_backend_error, classify_curl_error, classify_http_status, classify_job_error,
};
pub use policy::{is_transient, ErrorKind, RetryDecision, RetryPolicy};
