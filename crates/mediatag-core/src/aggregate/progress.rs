//! Progress reporting for a batch (tasks settled, rate, ETA).
//!
//! Consumers can compute rate = settled / elapsed_secs and
//! ETA = (total - settled) / rate.

/// Snapshot of batch progress (CLI-friendly).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatchProgress {
    /// Tasks in a terminal state.
    pub settled: usize,
    pub total: usize,
    /// Elapsed time since the batch started (seconds).
    pub elapsed_secs: f64,
    /// Sum of progress percentages of tasks still running.
    pub running_percent: u64,
}

impl BatchProgress {
    /// Settled tasks per second (0 if elapsed is 0).
    pub fn tasks_per_sec(&self) -> f64 {
        if self.elapsed_secs <= 0.0 {
            return 0.0;
        }
        self.settled as f64 / self.elapsed_secs
    }

    /// Estimated seconds remaining (None until a task has settled).
    pub fn eta_secs(&self) -> Option<f64> {
        let remaining = self.total.saturating_sub(self.settled);
        if remaining == 0 {
            return Some(0.0);
        }
        let rate = self.tasks_per_sec();
        if rate <= 0.0 {
            return None;
        }
        Some(remaining as f64 / rate)
    }

    /// Fraction complete in [0.0, 1.0]; running tasks count by their progress.
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            return 1.0;
        }
        let done = self.settled as f64 + self.running_percent as f64 / 100.0;
        (done / self.total as f64).min(1.0)
    }
}
