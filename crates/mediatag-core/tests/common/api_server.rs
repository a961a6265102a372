//! Minimal HTTP/1.1 server speaking the analysis jobs API for integration tests.
//!
//! `POST /api/analysis/jobs` answers with job id `job-<mediaId>` inside a
//! `data` envelope. `GET /api/analysis/jobs/<id>` walks through the scripted
//! status bodies for that job, repeating the last one. Every request is
//! recorded so tests can assert on method, path, headers and body.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub authorization: Option<String>,
    pub body: String,
}

#[derive(Default)]
struct State {
    /// Status bodies per job id, consumed front to back.
    statuses: HashMap<String, Vec<String>>,
    requests: Vec<RecordedRequest>,
}

#[derive(Clone)]
pub struct ApiServer {
    pub base_url: String,
    state: Arc<Mutex<State>>,
}

impl ApiServer {
    /// Starts the server in a background thread. Runs until the process exits.
    pub fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let port = listener.local_addr().unwrap().port();
        let state = Arc::new(Mutex::new(State::default()));
        let shared = Arc::clone(&state);
        thread::spawn(move || {
            for stream in listener.incoming().flatten() {
                let state = Arc::clone(&shared);
                thread::spawn(move || handle(stream, &state));
            }
        });
        Self {
            base_url: format!("http://127.0.0.1:{}/", port),
            state,
        }
    }

    /// Script the status bodies returned for `job_id`.
    pub fn script_status(&self, job_id: &str, bodies: &[&str]) {
        let mut state = self.state.lock().unwrap();
        state
            .statuses
            .insert(job_id.to_string(), bodies.iter().map(|b| b.to_string()).collect());
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.lock().unwrap().requests.clone()
    }
}

fn handle(mut stream: TcpStream, state: &Mutex<State>) {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(2)));
    let _ = stream.set_write_timeout(Some(Duration::from_secs(2)));
    let Some(req) = read_request(&mut stream) else {
        return;
    };

    let (status, body) = respond(&req, state);
    state.lock().unwrap().requests.push(req);
    let response = format!(
        "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        body.len(),
        body
    );
    let _ = stream.write_all(response.as_bytes());
}

fn respond(req: &RecordedRequest, state: &Mutex<State>) -> (&'static str, String) {
    const JOBS: &str = "/api/analysis/jobs";
    if req.method == "POST" && req.path == JOBS {
        let payload: serde_json::Value = match serde_json::from_str(&req.body) {
            Ok(v) => v,
            Err(_) => return ("400 Bad Request", r#"{"error":"bad json"}"#.to_string()),
        };
        let media = payload["mediaId"].as_str().unwrap_or_default();
        let body = serde_json::json!({
            "success": true,
            "data": { "jobId": format!("job-{}", media), "status": "pending" }
        });
        return ("201 Created", body.to_string());
    }
    if req.method == "GET" {
        if let Some(job_id) = req.path.strip_prefix(&format!("{}/", JOBS)) {
            let mut state = state.lock().unwrap();
            return match state.statuses.get_mut(job_id) {
                Some(bodies) if bodies.len() > 1 => ("200 OK", bodies.remove(0)),
                Some(bodies) if !bodies.is_empty() => ("200 OK", bodies[0].clone()),
                _ => ("404 Not Found", r#"{"error":"job not found"}"#.to_string()),
            };
        }
    }
    ("404 Not Found", r#"{"error":"no route"}"#.to_string())
}

/// Reads the head and, when `Content-Length` is present, the full body.
fn read_request(stream: &mut TcpStream) -> Option<RecordedRequest> {
    let mut data = Vec::new();
    let mut buf = [0u8; 4096];
    let head_end = loop {
        let n = stream.read(&mut buf).ok()?;
        if n == 0 {
            return None;
        }
        data.extend_from_slice(&buf[..n]);
        if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };
    let head = String::from_utf8_lossy(&data[..head_end]).to_string();
    let mut lines = head.lines();
    let mut first = lines.next()?.split_whitespace();
    let method = first.next()?.to_string();
    let path = first.next()?.to_string();

    let mut content_length = 0usize;
    let mut authorization = None;
    for line in lines {
        if let Some((name, value)) = line.split_once(':') {
            let name = name.trim();
            if name.eq_ignore_ascii_case("content-length") {
                content_length = value.trim().parse().unwrap_or(0);
            } else if name.eq_ignore_ascii_case("authorization") {
                authorization = Some(value.trim().to_string());
            }
        }
    }
    while data.len() < head_end + content_length {
        let n = stream.read(&mut buf).ok()?;
        if n == 0 {
            break;
        }
        data.extend_from_slice(&buf[..n]);
    }
    let body_end = (head_end + content_length).min(data.len());
    Some(RecordedRequest {
        method,
        path,
        authorization,
        body: String::from_utf8_lossy(&data[head_end..body_end]).to_string(),
    })
}
