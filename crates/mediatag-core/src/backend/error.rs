//! Backend client error type, classified by `retry::classify_backend_error`.

/// Error returned by an `AnalysisBackend` call.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// Curl reported an error (timeout, connection, etc.).
    #[error("transport: {0}")]
    Transport(#[from] curl::Error),
    /// HTTP response had a non-2xx status.
    #[error("HTTP {status}: {body}")]
    Http { status: u32, body: String },
    /// Response body was not the expected shape (e.g. missing job id).
    #[error("malformed response: {0}")]
    Malformed(String),
    /// Client-side configuration problem (bad base URL, no model).
    #[error("configuration: {0}")]
    Config(String),
    /// Backend answered 2xx but refused the request.
    #[error("rejected: {0}")]
    Rejected(String),
    /// The blocking request task panicked or was cancelled.
    #[error("request task: {0}")]
    Join(String),
}
