//! Classify curl errors, HTTP statuses and backend job errors into retry policy kinds.

use crate::backend::BackendError;
use crate::retry::policy::ErrorKind;

/// Backend error messages that point at missing or invalid configuration
/// rather than a flaky run. Matched case-insensitively.
const CONFIGURATION_MARKERS: &[&str] = &[
    "no model",
    "model not found",
    "model not configured",
    "invalid model",
    "unknown model",
    "model is required",
    "api key",
    "not configured",
];

/// Classify an HTTP status code for retry decisions.
pub fn classify_http_status(code: u32) -> ErrorKind {
    match code {
        429 | 503 => ErrorKind::Throttled,
        500..=599 => ErrorKind::Http5xx(code as u16),
        _ => ErrorKind::Other,
    }
}

/// Classify a curl error for retry decisions.
pub fn classify_curl_error(e: &curl::Error) -> ErrorKind {
    if e.is_operation_timedout() {
        return ErrorKind::Timeout;
    }
    if e.is_couldnt_connect()
        || e.is_couldnt_resolve_host()
        || e.is_couldnt_resolve_proxy()
        || e.is_read_error()
        || e.is_recv_error()
        || e.is_send_error()
        || e.is_got_nothing()
    {
        return ErrorKind::Connection;
    }
    ErrorKind::Other
}

/// Classify the error message of a job the backend reported as failed.
pub fn classify_job_error(message: &str) -> ErrorKind {
    let lower = message.to_ascii_lowercase();
    if CONFIGURATION_MARKERS.iter().any(|m| lower.contains(m)) {
        return ErrorKind::Configuration;
    }
    ErrorKind::JobFailed
}

/// Classify a backend client error into an ErrorKind.
pub fn classify_backend_error(e: &BackendError) -> ErrorKind {
    match e {
        BackendError::Transport(ce) => classify_curl_error(ce),
        BackendError::Http { status, body } => match classify_http_status(*status) {
            ErrorKind::Other if classify_job_error(body) == ErrorKind::Configuration => {
                ErrorKind::Configuration
            }
            kind => kind,
        },
        BackendError::Config(_) => ErrorKind::Configuration,
        BackendError::Rejected(msg) => match classify_job_error(msg) {
            ErrorKind::Configuration => ErrorKind::Configuration,
            _ => ErrorKind::Other,
        },
        BackendError::Malformed(_) | BackendError::Join(_) => ErrorKind::Other,
    }
}
