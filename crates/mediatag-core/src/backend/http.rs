//! HTTP implementation of `AnalysisBackend`.
//!
//! Uses the curl crate (libcurl) for JSON requests. Each request runs on the
//! blocking pool via `spawn_blocking` so the scheduler's async tasks never
//! block on network I/O.

use async_trait::async_trait;
use std::time::Duration;
use url::Url;

use super::error::BackendError;
use super::parse::{parse_status_response, parse_submit_response};
use super::types::{AnalysisOptions, JobStatus, SubmittedJob};
use super::AnalysisBackend;
use crate::config::BackendConfig;
use crate::task::{JobId, TaskId};

const JOBS_PATH: &str = "api/analysis/jobs";

#[derive(Debug, Clone)]
struct Request {
    url: Url,
    body: Option<Vec<u8>>,
    token: Option<String>,
    connect_timeout: Duration,
    timeout: Duration,
}

/// Talks to the media API's analysis endpoints:
/// `POST {base}/api/analysis/jobs` and `GET {base}/api/analysis/jobs/{id}`.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    base: Url,
    token: Option<String>,
    connect_timeout: Duration,
    timeout: Duration,
}

impl HttpBackend {
    pub fn new(base_url: &str, token: Option<String>) -> Result<Self, BackendError> {
        let mut base = Url::parse(base_url)
            .map_err(|e| BackendError::Config(format!("invalid base URL '{}': {}", base_url, e)))?;
        if base.cannot_be_a_base() {
            return Err(BackendError::Config(format!(
                "base URL '{}' cannot carry a path",
                base_url
            )));
        }
        // Url::join replaces the last segment unless the path ends with '/'.
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Ok(Self {
            base,
            token: token.filter(|t| !t.trim().is_empty()),
            connect_timeout: Duration::from_secs(10),
            timeout: Duration::from_secs(30),
        })
    }

    pub fn from_config(cfg: &BackendConfig) -> Result<Self, BackendError> {
        Self::new(&cfg.base_url, cfg.api_token.clone())
    }

    pub fn with_timeouts(mut self, connect: Duration, total: Duration) -> Self {
        self.connect_timeout = connect;
        self.timeout = total;
        self
    }

    pub(crate) fn jobs_url(&self) -> Result<Url, BackendError> {
        self.base
            .join(JOBS_PATH)
            .map_err(|e| BackendError::Config(e.to_string()))
    }

    pub(crate) fn job_url(&self, job_id: &JobId) -> Result<Url, BackendError> {
        let mut url = self.jobs_url()?;
        url.path_segments_mut()
            .map_err(|_| BackendError::Config("base URL cannot carry a path".into()))?
            .push(job_id.as_str());
        Ok(url)
    }

    fn request(&self, url: Url, body: Option<Vec<u8>>) -> Request {
        Request {
            url,
            body,
            token: self.token.clone(),
            connect_timeout: self.connect_timeout,
            timeout: self.timeout,
        }
    }

    async fn send(&self, req: Request) -> Result<Vec<u8>, BackendError> {
        tokio::task::spawn_blocking(move || perform(&req))
            .await
            .map_err(|e| BackendError::Join(e.to_string()))?
    }
}

/// Performs one request and returns the body of a 2xx response.
/// Runs in the current thread; call from `spawn_blocking` if used from async code.
fn perform(req: &Request) -> Result<Vec<u8>, BackendError> {
    let mut response: Vec<u8> = Vec::new();

    let mut easy = curl::easy::Easy::new();
    easy.url(req.url.as_str())?;
    easy.follow_location(true)?;
    easy.connect_timeout(req.connect_timeout)?;
    easy.timeout(req.timeout)?;

    let mut list = curl::easy::List::new();
    list.append("Accept: application/json")?;
    if let Some(token) = &req.token {
        list.append(&format!("Authorization: Bearer {}", token.trim()))?;
    }
    if let Some(body) = &req.body {
        list.append("Content-Type: application/json")?;
        easy.post(true)?;
        easy.post_fields_copy(body)?;
    }
    easy.http_headers(list)?;

    {
        let mut transfer = easy.transfer();
        transfer.write_function(|data| {
            response.extend_from_slice(data);
            Ok(data.len())
        })?;
        transfer.perform()?;
    }

    let code = easy.response_code()?;
    if !(200..300).contains(&code) {
        let body = String::from_utf8_lossy(&response);
        return Err(BackendError::Http {
            status: code,
            body: body.chars().take(512).collect(),
        });
    }
    Ok(response)
}

#[async_trait]
impl AnalysisBackend for HttpBackend {
    async fn submit_analysis_job(
        &self,
        media_id: &TaskId,
        model_id: &str,
        options: &AnalysisOptions,
    ) -> Result<SubmittedJob, BackendError> {
        let payload = serde_json::json!({
            "mediaId": media_id.as_str(),
            "modelId": model_id,
            "options": options,
        });
        let body = serde_json::to_vec(&payload)
            .map_err(|e| BackendError::Malformed(format!("encode request: {}", e)))?;
        let req = self.request(self.jobs_url()?, Some(body));
        tracing::debug!(media_id = %media_id, model_id, url = %req.url, "submitting analysis job");
        let response = self.send(req).await?;
        parse_submit_response(&response)
    }

    async fn get_job_status(&self, job_id: &JobId) -> Result<JobStatus, BackendError> {
        let req = self.request(self.job_url(job_id)?, None);
        let response = self.send(req).await?;
        parse_status_response(&response)
    }
}
