//! Batch control commands and the control socket location.
//!
//! A running `analyze` listens on a Unix socket; `mediatag pause` (etc.)
//! writes one command per line and the batch engine applies it.

use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    /// Stop starting new tasks; in-flight tasks keep running.
    Pause,
    Resume,
    /// Never start pending tasks; let in-flight tasks finish.
    Cancel,
}

impl ControlCommand {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pause" => Some(ControlCommand::Pause),
            "resume" => Some(ControlCommand::Resume),
            "cancel" => Some(ControlCommand::Cancel),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ControlCommand::Pause => "pause",
            ControlCommand::Resume => "resume",
            ControlCommand::Cancel => "cancel",
        }
    }
}

impl std::fmt::Display for ControlCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Default path for the control socket (XDG state dir, next to the log).
pub fn default_control_socket_path() -> std::io::Result<PathBuf> {
    let dir = xdg::BaseDirectories::with_prefix("mediatag")?.get_state_home();
    Ok(dir.join("control.sock"))
}
