//! Pipeline progress reporting, decoupled from orchestration.

use std::fmt;

use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Planning,
    Encoding,
    Uploading,
    Transcribing,
    Merging,
    Cleanup,
    Done,
    Failed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Planning => "planning",
            Stage::Encoding => "encoding",
            Stage::Uploading => "uploading",
            Stage::Transcribing => "transcribing",
            Stage::Merging => "merging",
            Stage::Cleanup => "cleanup",
            Stage::Done => "done",
            Stage::Failed => "failed",
        };
        f.write_str(name)
    }
}

pub trait ProgressObserver: Send + Sync {
    /// `percentage` is overall job progress in `0.0..=100.0`.
    fn on_progress(&self, stage: Stage, percentage: f64, message: &str);
}

/// Discards all progress.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressObserver for NoProgress {
    fn on_progress(&self, _stage: Stage, _percentage: f64, _message: &str) {}
}

/// Forwards progress to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogProgress;

impl ProgressObserver for LogProgress {
    fn on_progress(&self, stage: Stage, percentage: f64, message: &str) {
        match stage {
            Stage::Failed => warn!("[{}] {}", stage, message),
            Stage::Encoding | Stage::Uploading => {
                debug!("[{} {:>5.1}%] {}", stage, percentage, message)
            }
            _ => info!("[{} {:>5.1}%] {}", stage, percentage, message),
        }
    }
}

/// Terminal progress bar for the CLI.
pub struct BarProgress {
    bar: ProgressBar,
}

impl BarProgress {
    pub fn new() -> Self {
        let bar = ProgressBar::new(1000);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {percent:>3}% {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        Self { bar }
    }
}

impl Default for BarProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressObserver for BarProgress {
    fn on_progress(&self, stage: Stage, percentage: f64, message: &str) {
        let position = (percentage.clamp(0.0, 100.0) * 10.0).round() as u64;
        self.bar.set_position(position);
        self.bar.set_message(format!("{stage}: {message}"));
        match stage {
            Stage::Done => self.bar.finish_with_message("✓ Transcription complete"),
            Stage::Failed => self.bar.abandon_with_message(format!("✗ {message}")),
            _ => {}
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Keeps every event for assertions.
    #[derive(Default)]
    pub struct RecordingProgress {
        pub events: Mutex<Vec<(Stage, f64, String)>>,
    }

    impl ProgressObserver for RecordingProgress {
        fn on_progress(&self, stage: Stage, percentage: f64, message: &str) {
            self.events
                .lock()
                .unwrap()
                .push((stage, percentage, message.to_string()));
        }
    }
}
