//! `mediatag pause | resume | cancel` – steer the running `analyze` through
//! its control socket.

use anyhow::Result;
use mediatag_core::control::{default_control_socket_path, ControlCommand};

use crate::cli::control_socket;

async fn send(cmd: ControlCommand) -> Result<()> {
    let path = default_control_socket_path()?;
    let reply = control_socket::send_command(&path, cmd.as_str()).await?;
    println!("{}", reply);
    Ok(())
}

pub async fn run_pause() -> Result<()> {
    send(ControlCommand::Pause).await
}

pub async fn run_resume() -> Result<()> {
    send(ControlCommand::Resume).await
}

pub async fn run_cancel() -> Result<()> {
    send(ControlCommand::Cancel).await
}
