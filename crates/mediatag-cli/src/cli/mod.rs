//! CLI for the mediatag batch analysis scheduler.

mod commands;
mod control_socket;

use anyhow::Result;
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use mediatag_core::config;

use commands::{
    run_analyze, run_cancel, run_completions, run_config, run_pause, run_resume, run_status,
    AnalyzeArgs,
};

/// Top-level CLI for mediatag.
#[derive(Debug, Parser)]
#[command(name = "mediatag")]
#[command(about = "mediatag: batch AI analysis of media items", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Analyze media items as one batch.
    Analyze {
        /// Media identifiers to analyze.
        #[arg(required = true, value_name = "MEDIA_ID")]
        media_ids: Vec<String>,
        /// Run up to N analyses concurrently (default from config).
        #[arg(long, value_name = "N")]
        jobs: Option<usize>,
        /// Analysis model to use (default from config).
        #[arg(long, value_name = "MODEL")]
        model: Option<String>,
        /// Retries for jobs the backend reports as failed (default from config).
        #[arg(long, value_name = "R")]
        max_retries: Option<u32>,
    },

    /// Query the status of one backend job.
    Status {
        /// Backend job identifier.
        job_id: String,
    },

    /// Stop starting new items in the running batch.
    Pause,

    /// Continue a paused batch.
    Resume,

    /// Cancel the running batch; items already running finish.
    Cancel,

    /// Print the config file path and effective settings.
    Config,

    /// Generate shell completions.
    Completions {
        /// Target shell.
        #[arg(value_enum)]
        shell: Shell,
    },
}

impl CliCommand {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();

        match cli.command {
            CliCommand::Completions { shell } => return run_completions(shell),
            CliCommand::Pause => return run_pause().await,
            CliCommand::Resume => return run_resume().await,
            CliCommand::Cancel => return run_cancel().await,
            _ => {}
        }

        let cfg = config::load_or_init()?;
        tracing::debug!("loaded config: {:?}", cfg.scheduler);

        match cli.command {
            CliCommand::Analyze {
                media_ids,
                jobs,
                model,
                max_retries,
            } => {
                let args = AnalyzeArgs {
                    media_ids,
                    jobs,
                    model,
                    max_retries,
                };
                run_analyze(&cfg, args).await?
            }
            CliCommand::Status { job_id } => run_status(&cfg, &job_id).await?,
            CliCommand::Config => run_config(&cfg)?,
            CliCommand::Pause
            | CliCommand::Resume
            | CliCommand::Cancel
            | CliCommand::Completions { .. } => {}
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests;
