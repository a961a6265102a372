//! CLI command handlers. Each command is in its own file.

mod analyze;
mod completions;
mod config;
mod control;
mod status;

pub use analyze::{run_analyze, AnalyzeArgs};
pub use completions::run_completions;
pub use config::run_config;
pub use control::{run_cancel, run_pause, run_resume};
pub use status::run_status;

#[cfg(test)]
pub(crate) use analyze::{batch_options, progress_line};
