//! Progress reporting for converter and importer runs.

use std::time::Duration;

use console::style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::converters::RunStats;

/// Number of item errors printed in a step summary.
const SUMMARY_ERROR_SAMPLE: usize = 5;

/// Receives progress for one step at a time.
pub trait ProgressListener: Send {
    /// A step started; `max_progress` is its expected item count if known.
    fn start(&mut self, step: &str, max_progress: Option<u64>);

    /// Running totals after a batch was applied.
    fn advance(&mut self, totals: &RunStats);

    /// The step finished with these totals.
    fn finish(&mut self, step: &str, totals: &RunStats);
}

/// Discards all progress.
#[derive(Debug, Default)]
pub struct NoProgress;

impl ProgressListener for NoProgress {
    fn start(&mut self, _step: &str, _max_progress: Option<u64>) {}
    fn advance(&mut self, _totals: &RunStats) {}
    fn finish(&mut self, _step: &str, _totals: &RunStats) {}
}

/// Terminal progress bars plus a summary per step.
#[derive(Default)]
pub struct ConsoleProgress {
    bar: Option<ProgressBar>,
}

impl ConsoleProgress {
    pub fn new() -> Self {
        Self::default()
    }

    fn create_progress_bar(max_progress: Option<u64>) -> ProgressBar {
        let pb = match max_progress {
            Some(total) => ProgressBar::new(total),
            None => ProgressBar::new_spinner(),
        };

        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.cyan} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .progress_chars("█▓░"),
        );
        pb.enable_steady_tick(Duration::from_millis(100));
        pb
    }
}

impl ProgressListener for ConsoleProgress {
    fn start(&mut self, step: &str, max_progress: Option<u64>) {
        println!("{} {}", style("→").cyan(), style(step).bold());
        self.bar = Some(Self::create_progress_bar(max_progress));
    }

    fn advance(&mut self, totals: &RunStats) {
        if let Some(pb) = &self.bar {
            pb.set_position(totals.processed_count);
            if totals.error_count > 0 {
                pb.set_message(format!("{} errors", totals.error_count));
            }
        }
    }

    fn finish(&mut self, step: &str, totals: &RunStats) {
        if let Some(pb) = self.bar.take() {
            pb.finish_and_clear();
        }
        print_summary(step, totals);
    }
}

/// Print processed/skipped/error counts and a sample of item errors.
pub fn print_summary(step: &str, stats: &RunStats) {
    let mark = if stats.has_errors() {
        style("!").yellow()
    } else {
        style("✓").green()
    };
    println!("{} {} complete:", mark, step);
    println!("  Processed: {}", style(stats.processed_count).dim());
    if stats.skipped_count > 0 {
        println!("  Skipped:   {}", style(stats.skipped_count).yellow());
    }
    if stats.has_errors() {
        println!("  Errors:    {}", style(stats.error_count).red());
        for error in stats.sample(SUMMARY_ERROR_SAMPLE) {
            match &error.cause {
                Some(cause) => println!("    - {}: {}", error.message, style(cause).dim()),
                None => println!("    - {}", error.message),
            }
        }
        let hidden = stats.errors.len().saturating_sub(SUMMARY_ERROR_SAMPLE);
        if hidden > 0 {
            println!("    ... and {} more", hidden);
        }
    }
}
