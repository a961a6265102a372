//! Parse backend JSON bodies into validated types.

use serde::Deserialize;
use serde_json::Value;

use super::error::BackendError;
use super::types::{JobStatus, SubmittedJob};
use crate::task::JobId;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSubmitResponse {
    #[serde(default, alias = "job_id", alias = "id")]
    job_id: Option<Value>,
    #[serde(default, alias = "external_task_id")]
    external_task_id: Option<Value>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default, alias = "item_info", alias = "media")]
    item_info: Option<Value>,
    #[serde(default)]
    success: Option<bool>,
    #[serde(default)]
    error: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawStatusResponse {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    progress: Option<f64>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
    #[serde(default, alias = "completed_at")]
    completed_at: Option<String>,
}

/// Some deployments wrap payloads as `{ "data": { ... } }`.
fn unwrap_envelope(value: Value) -> Value {
    match value {
        Value::Object(mut map) if map.contains_key("data") && !map.contains_key("status") => {
            match map.remove("data") {
                Some(inner @ Value::Object(_)) => inner,
                Some(other) => {
                    map.insert("data".to_string(), other);
                    Value::Object(map)
                }
                None => Value::Object(map),
            }
        }
        other => other,
    }
}

/// Ids arrive as strings or numbers; empty strings count as missing.
fn id_string(value: Option<Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn error_message(value: Option<Value>) -> Option<String> {
    match value? {
        Value::Null => None,
        Value::String(s) => Some(s),
        Value::Object(map) => match map.get("message") {
            Some(Value::String(s)) => Some(s.clone()),
            _ => Some(Value::Object(map).to_string()),
        },
        other => Some(other.to_string()),
    }
}

fn decode<T: for<'de> Deserialize<'de>>(body: &[u8]) -> Result<T, BackendError> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|e| BackendError::Malformed(format!("invalid JSON: {}", e)))?;
    serde_json::from_value(unwrap_envelope(value))
        .map_err(|e| BackendError::Malformed(format!("unexpected shape: {}", e)))
}

/// Validate a submission response. A missing job id is `Malformed`; an
/// explicit `success: false` is `Rejected`.
pub fn parse_submit_response(body: &[u8]) -> Result<SubmittedJob, BackendError> {
    let raw: RawSubmitResponse = decode(body)?;
    if raw.success == Some(false) {
        let msg = error_message(raw.error).unwrap_or_else(|| "submission refused".to_string());
        return Err(BackendError::Rejected(msg));
    }
    let job_id = id_string(raw.job_id)
        .ok_or_else(|| BackendError::Malformed("submission response has no job id".into()))?;
    Ok(SubmittedJob {
        job_id: JobId::new(job_id),
        external_task_id: id_string(raw.external_task_id),
        status: raw.status.unwrap_or_else(|| "pending".to_string()),
        item: raw.item_info,
    })
}

fn clamp_progress(p: f64) -> Option<u8> {
    if !p.is_finite() {
        return None;
    }
    Some(p.round().clamp(0.0, 100.0) as u8)
}

/// Validate a status response into the `JobStatus` union.
pub fn parse_status_response(body: &[u8]) -> Result<JobStatus, BackendError> {
    let raw: RawStatusResponse = decode(body)?;
    let status = raw
        .status
        .ok_or_else(|| BackendError::Malformed("status response has no status".into()))?;
    let progress = raw.progress.and_then(clamp_progress);
    match status.to_ascii_lowercase().as_str() {
        "pending" | "queued" => Ok(JobStatus::Pending { progress }),
        "processing" | "running" | "in_progress" => Ok(JobStatus::Processing { progress }),
        "completed" | "succeeded" | "success" | "done" => Ok(JobStatus::Completed {
            result: raw.result.unwrap_or(Value::Null),
            completed_at: raw.completed_at,
        }),
        "failed" | "error" => Ok(JobStatus::Failed {
            error: error_message(raw.error)
                .unwrap_or_else(|| "job failed without an error message".to_string()),
        }),
        other => Err(BackendError::Malformed(format!("unknown job status '{}'", other))),
    }
}
