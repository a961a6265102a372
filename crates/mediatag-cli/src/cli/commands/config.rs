//! `mediatag config` – show where the config lives and what is in effect.

use anyhow::Result;
use mediatag_core::config::{self, MediatagConfig};

pub fn run_config(cfg: &MediatagConfig) -> Result<()> {
    let path = config::config_path()?;
    let mut shown = cfg.clone();
    if shown.backend.api_token.is_some() {
        shown.backend.api_token = Some("********".to_string());
    }
    // Show effective optional sections rather than omitting them.
    shown.poll = Some(cfg.poll_or_default());
    shown.retry = Some(cfg.retry_or_default());

    println!("# {}", path.display());
    print!("{}", config::to_toml_string(&shown)?);
    Ok(())
}
