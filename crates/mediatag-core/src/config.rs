use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Analysis backend connection (the `[backend]` section).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Base URL of the media API, e.g. `http://127.0.0.1:8080`.
    pub base_url: String,
    /// Bearer token sent with every request, if the backend requires one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_token: Option<String>,
    /// Model used for analysis when the CLI does not pass `--model`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080".to_string(),
            api_token: None,
            model_id: None,
        }
    }
}

/// Batch scheduling limits (the `[scheduler]` section).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Maximum number of analysis jobs in flight at once.
    pub concurrency_limit: usize,
    /// Retries allowed after a backend-reported job failure.
    pub max_retries: u32,
    /// Hard ceiling per task, measured from its first submission.
    pub task_timeout_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: 3,
            max_retries: 2,
            task_timeout_secs: 600,
        }
    }
}

/// Status polling timings (optional section in config.toml).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    /// Interval between two status requests for one job.
    pub interval_ms: u64,
    /// Delay before the first status request after submission.
    pub startup_delay_ms: u64,
    /// How long a finished task stays visible before it is dropped.
    pub removal_grace_ms: u64,
    /// Age after which finished, unpolled tasks are garbage collected.
    pub cleanup_horizon_secs: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_ms: 2000,
            startup_delay_ms: 500,
            removal_grace_ms: 3000,
            cleanup_horizon_secs: 300,
        }
    }
}

/// Retry backoff parameters (optional section in config.toml).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Base delay in seconds for exponential backoff (e.g. 1.0 = 1s, 2s, 4s...).
    pub base_delay_secs: f64,
    /// Maximum backoff delay in seconds.
    pub max_delay_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_secs: 1.0,
            max_delay_secs: 5,
        }
    }
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_secs_f64(self.base_delay_secs.max(0.0))
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_secs(self.max_delay_secs)
    }
}

/// Global configuration loaded from `~/.config/mediatag/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MediatagConfig {
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// Optional polling timings; if missing, built-in defaults are used.
    #[serde(default)]
    pub poll: Option<PollConfig>,
    /// Optional retry backoff; if missing, built-in defaults are used.
    #[serde(default)]
    pub retry: Option<RetryConfig>,
}

impl MediatagConfig {
    pub fn poll_or_default(&self) -> PollConfig {
        self.poll.clone().unwrap_or_default()
    }

    pub fn retry_or_default(&self) -> RetryConfig {
        self.retry.clone().unwrap_or_default()
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("mediatag")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<MediatagConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = MediatagConfig::default();
        let toml = to_toml_string(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    load_from_path(&path)
}

pub fn to_toml_string(cfg: &MediatagConfig) -> Result<String> {
    toml::to_string_pretty(cfg).context("serialize config")
}

/// Load configuration from an explicit path.
pub fn load_from_path(path: &Path) -> Result<MediatagConfig> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("read config: {}", path.display()))?;
    let cfg: MediatagConfig =
        toml::from_str(&data).with_context(|| format!("parse config: {}", path.display()))?;
    Ok(cfg)
}
