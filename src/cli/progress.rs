//! Progress display for a single transfer
//!
//! Draws an indicatif bar on a terminal. Elsewhere (pipes, CI logs, or
//! `--no-progress`) it falls back to a text line every few seconds.

use std::time::{Duration, Instant};

use indicatif::{HumanBytes, HumanDuration, ProgressBar, ProgressDrawTarget, ProgressStyle};
use tracing::debug;

use crate::app::{TransferOutcome, TransferProgress};
use crate::constants::progress::UPDATE_FREQUENCY_MS;
use crate::errors::{DownloadError, DownloadResult};

/// Configuration for progress display
#[derive(Debug, Clone)]
pub struct ProgressConfig {
    /// Enable visual progress bars
    pub enable_progress_bars: bool,
    /// Spacing of text reports when no bar is drawn
    pub text_report_interval: Duration,
    /// Show the estimated time left
    pub show_eta: bool,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            enable_progress_bars: true,
            text_report_interval: Duration::from_secs(10),
            show_eta: true,
        }
    }
}

pub struct ProgressDisplay {
    config: ProgressConfig,
    identifier: String,
    bar: Option<ProgressBar>,
    last_report: Option<Instant>,
    latest: Option<TransferProgress>,
}

impl ProgressDisplay {
    pub fn new(config: ProgressConfig, identifier: impl Into<String>) -> Self {
        Self {
            config,
            identifier: identifier.into(),
            bar: None,
            last_report: None,
            latest: None,
        }
    }

    /// Create the bar, or nothing when stderr is not a terminal
    pub fn start(&mut self, bytes_expected: u64, bytes_downloaded: u64) -> DownloadResult<()> {
        if !self.config.enable_progress_bars {
            return Ok(());
        }

        let bar = if bytes_expected > 0 {
            let bar = ProgressBar::new(bytes_expected);
            bar.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} {prefix} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} {bytes_per_sec} {msg}")
                    .map_err(template_error)?
                    .progress_chars("##-"),
            );
            bar
        } else {
            let bar = ProgressBar::new_spinner();
            bar.set_style(
                ProgressStyle::default_spinner()
                    .template("{spinner:.green} {prefix} [{elapsed_precise}] {bytes} {bytes_per_sec} {msg}")
                    .map_err(template_error)?,
            );
            bar
        };
        bar.set_draw_target(ProgressDrawTarget::stderr());
        if bar.is_hidden() {
            debug!("Not a terminal, using text progress");
            return Ok(());
        }

        bar.set_prefix(self.identifier.clone());
        bar.set_position(bytes_downloaded);
        bar.enable_steady_tick(Duration::from_millis(UPDATE_FREQUENCY_MS));
        self.bar = Some(bar);
        Ok(())
    }

    pub fn update(&mut self, progress: TransferProgress) {
        self.latest = Some(progress);

        if let Some(bar) = &self.bar {
            if progress.bytes_expected > 0 {
                bar.set_length(progress.bytes_expected);
            }
            bar.set_position(progress.bytes_downloaded);
            if self.config.show_eta {
                if let Some(remaining) = progress.remaining {
                    bar.set_message(format!("ETA {}", HumanDuration(remaining)));
                }
            }
            return;
        }

        let due = self
            .last_report
            .map_or(true, |last| last.elapsed() >= self.config.text_report_interval);
        if due {
            self.last_report = Some(Instant::now());
            println!("{}", self.describe(progress));
        }
    }

    /// One-line text form of a progress update
    pub fn describe(&self, progress: TransferProgress) -> String {
        let mut line = match progress.fraction_completed() {
            Some(fraction) => format!(
                "{}: {:.1}% ({} of {})",
                self.identifier,
                fraction * 100.0,
                HumanBytes(progress.bytes_downloaded),
                HumanBytes(progress.bytes_expected)
            ),
            None => format!(
                "{}: {}",
                self.identifier,
                HumanBytes(progress.bytes_downloaded)
            ),
        };
        if self.config.show_eta {
            if let Some(remaining) = progress.remaining {
                line.push_str(&format!(", {} left", HumanDuration(remaining)));
            }
        }
        line
    }

    /// Last update seen
    pub fn latest(&self) -> Option<TransferProgress> {
        self.latest
    }

    /// Clear the bar and print the outcome
    pub fn finish(&mut self, outcome: &TransferOutcome) {
        let mut message = describe_outcome(&self.identifier, outcome);
        if let (TransferOutcome::Paused | TransferOutcome::Interrupted { .. }, Some(latest)) =
            (outcome, self.latest)
        {
            message.push_str(&format!(" at {}", HumanBytes(latest.bytes_downloaded)));
        }
        match self.bar.take() {
            Some(bar) => bar.finish_with_message(message),
            None => println!("{}", message),
        }
    }
}

impl Drop for ProgressDisplay {
    fn drop(&mut self) {
        if let Some(bar) = self.bar.take() {
            bar.abandon();
        }
    }
}

/// Human-readable result line
pub fn describe_outcome(identifier: &str, outcome: &TransferOutcome) -> String {
    match outcome {
        TransferOutcome::Completed { path: Some(path) } => {
            format!("✅ {} saved to {}", identifier, path.display())
        }
        TransferOutcome::Completed { path: None } => {
            format!("⚠️  {} downloaded but could not be moved into place", identifier)
        }
        TransferOutcome::Paused => format!("⏸  {} paused; run `resume {}` to continue", identifier, identifier),
        TransferOutcome::Interrupted { message } => {
            format!("⏸  {} interrupted: {} (resumable)", identifier, message)
        }
        TransferOutcome::Failed { message } => format!("❌ {} failed: {}", identifier, message),
        TransferOutcome::Cancelled => format!("🗑  {} cancelled", identifier),
        TransferOutcome::Detached => format!("{} stopped without a result", identifier),
    }
}

fn template_error(e: impl std::fmt::Display) -> DownloadError {
    DownloadError::ConfigurationError {
        reason: format!("Progress bar template error: {}", e),
    }
}
