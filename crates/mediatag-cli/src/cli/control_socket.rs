//! Control socket: server (during `mediatag analyze`) and client (for
//! `mediatag pause` etc.).
//! Protocol: one command per line ("pause", "resume", "cancel", "status"),
//! one reply line per command.

use anyhow::{bail, Context, Result};
use mediatag_core::control::ControlCommand;
use mediatag_core::scheduler::BatchController;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};

/// What the listener forwards commands to.
pub trait ControlTarget: Send + Sync + 'static {
    /// Returns false if the target no longer accepts commands.
    fn apply(&self, cmd: ControlCommand) -> bool;
    /// One-line state summary for "status".
    fn describe(&self) -> String;
}

impl ControlTarget for BatchController {
    fn apply(&self, cmd: ControlCommand) -> bool {
        self.send(cmd)
    }

    fn describe(&self) -> String {
        let snap = self.snapshot();
        let c = snap.counts;
        format!(
            "batch {}: {} pending, {} running, {} completed, {} failed{}{}",
            snap.batch_id,
            c.pending,
            c.running,
            c.completed,
            c.failed,
            if snap.paused { " (paused)" } else { "" },
            if snap.cancelled { " (cancelled)" } else { "" },
        )
    }
}

/// Reply for one request line.
pub fn handle_line(target: &dyn ControlTarget, line: &str) -> String {
    let line = line.trim();
    if line.eq_ignore_ascii_case("status") {
        return format!("ok {}", target.describe());
    }
    match ControlCommand::parse(line) {
        Some(cmd) if target.apply(cmd) => format!("ok {}", cmd),
        Some(_) => "error batch already finished".to_string(),
        None => format!("error unknown command '{}'", line),
    }
}

/// Spawns a task that listens on `path` and forwards each command line to
/// `target`. Ignores connections that fail mid-way.
///
/// A leftover socket file is replaced only when nothing answers on it; if
/// another `analyze` is still listening this fails and leaves it alone.
pub fn spawn_control_listener<T: ControlTarget>(
    target: Arc<T>,
    path: impl AsRef<Path>,
) -> Result<tokio::task::JoinHandle<()>> {
    let path = path.as_ref().to_path_buf();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create socket dir: {}", parent.display()))?;
    }
    if path.exists() {
        if std::os::unix::net::UnixStream::connect(&path).is_ok() {
            bail!(
                "another batch is already listening on {}",
                path.display()
            );
        }
        std::fs::remove_file(&path)
            .with_context(|| format!("remove stale control socket: {}", path.display()))?;
    }
    let listener = UnixListener::bind(&path)
        .with_context(|| format!("bind control socket: {}", path.display()))?;

    let handle = tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let target = Arc::clone(&target);
                    tokio::spawn(async move {
                        let (read, mut write) = stream.into_split();
                        let mut lines = BufReader::new(read).lines();
                        while let Ok(Some(line)) = lines.next_line().await {
                            if line.trim().is_empty() {
                                continue;
                            }
                            let reply = handle_line(target.as_ref(), &line);
                            tracing::debug!(request = %line.trim(), %reply, "control request");
                            if write.write_all(format!("{}\n", reply).as_bytes()).await.is_err() {
                                break;
                            }
                        }
                    });
                }
                Err(e) => tracing::debug!("control socket accept: {}", e),
            }
        }
    });
    Ok(handle)
}

/// Sends one command line and returns the reply line.
pub async fn send_command(socket_path: &Path, command: &str) -> Result<String> {
    if !socket_path.exists() {
        bail!(
            "no running batch (control socket {} not found)",
            socket_path.display()
        );
    }
    let stream = UnixStream::connect(socket_path)
        .await
        .with_context(|| format!("connect control socket: {}", socket_path.display()))?;
    let (read, mut write) = stream.into_split();
    write.write_all(format!("{}\n", command).as_bytes()).await?;
    let reply = BufReader::new(read)
        .lines()
        .next_line()
        .await?
        .unwrap_or_default();
    if let Some(err) = reply.strip_prefix("error ") {
        bail!("{}", err);
    }
    Ok(reply.strip_prefix("ok ").unwrap_or(&reply).to_string())
}
