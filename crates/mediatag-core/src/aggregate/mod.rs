//! Batch Aggregator: per-batch counts, completion detection and progress.

mod progress;
mod tally;

pub use progress::BatchProgress;
pub use tally::BatchTally;
