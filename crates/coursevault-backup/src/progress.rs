//! Progress reporting for backup and restore jobs.
//!
//! Provides visual feedback while a job walks its steps.

use indicatif::{ProgressBar, ProgressStyle};

/// Receives step-level progress from a running job.
pub trait ProgressReporter {
    /// A job with `total` steps is starting
    fn start(&mut self, total: u64, message: &str);

    /// The named step finished (or was skipped)
    fn advance(&mut self, step_name: &str);

    /// The job finished
    fn finish(&mut self, message: &str);
}

/// Progress bar for a job's steps.
#[derive(Debug, Default)]
pub struct BarProgress {
    bar: Option<ProgressBar>,
}

impl BarProgress {
    pub fn new() -> Self {
        Self { bar: None }
    }

    fn style() -> ProgressStyle {
        ProgressStyle::default_bar()
            .template("{msg} [{bar:40.cyan/blue}] {pos}/{len} steps ({percent}%)")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-")
    }
}

impl ProgressReporter for BarProgress {
    fn start(&mut self, total: u64, message: &str) {
        let bar = ProgressBar::new(total);
        bar.set_style(Self::style());
        bar.set_message(message.to_string());
        self.bar = Some(bar);
    }

    fn advance(&mut self, step_name: &str) {
        if let Some(bar) = &self.bar {
            bar.set_message(step_name.to_string());
            bar.inc(1);
        }
    }

    fn finish(&mut self, message: &str) {
        if let Some(bar) = &self.bar {
            bar.finish_with_message(message.to_string());
        }
    }
}

/// Progress reporter that reports nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullProgress;

impl ProgressReporter for NullProgress {
    fn start(&mut self, _total: u64, _message: &str) {}

    fn advance(&mut self, _step_name: &str) {}

    fn finish(&mut self, _message: &str) {}
}

/// Records progress calls; handy for asserting on step order.
#[derive(Debug, Clone, Default)]
pub struct RecordingProgress {
    pub total: u64,
    pub advanced: Vec<String>,
    pub finished: Option<String>,
}

impl ProgressReporter for RecordingProgress {
    fn start(&mut self, total: u64, _message: &str) {
        self.total = total;
    }

    fn advance(&mut self, step_name: &str) {
        self.advanced.push(step_name.to_string());
    }

    fn finish(&mut self, message: &str) {
        self.finished = Some(message.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bar_progress_lifecycle() {
        let mut progress = BarProgress::new();
        assert!(progress.bar.is_none());

        // advancing before start is a no-op
        progress.advance("early");

        progress.start(3, "Backing up");
        assert!(progress.bar.is_some());
        progress.advance("course");
        progress.advance("activities");
        assert_eq!(progress.bar.as_ref().unwrap().position(), 2);

        progress.finish("Backup complete");
        assert!(progress.bar.as_ref().unwrap().is_finished());
    }

    #[test]
    fn test_recording_progress() {
        let mut progress = RecordingProgress::default();
        progress.start(2, "Restoring");
        progress.advance("course");
        progress.advance("users");
        progress.finish("done");

        assert_eq!(progress.total, 2);
        assert_eq!(progress.advanced, vec!["course", "users"]);
        assert_eq!(progress.finished.as_deref(), Some("done"));
    }

    #[test]
    fn test_null_progress_accepts_everything() {
        let mut progress = NullProgress;
        progress.start(10, "x");
        progress.advance("y");
        progress.finish("z");
    }
}
