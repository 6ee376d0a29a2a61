use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::io::{self, IsTerminal};
use std::sync::Arc;
use std::time::Duration;

/// Progress indicator manager
pub struct ProgressManager {
    multi: Arc<MultiProgress>,
    enabled: bool,
    verbose: bool,
}

impl ProgressManager {
    /// Create a new progress manager
    pub fn new(quiet: bool, verbose: bool) -> Self {
        // Only enable progress if we're in a terminal and not in quiet mode
        let enabled = !quiet && io::stdout().is_terminal();

        Self {
            multi: Arc::new(MultiProgress::new()),
            enabled,
            verbose,
        }
    }

    /// Create a spinner for an open-ended pipeline stage
    pub fn create_stage_spinner(&self, message: &str) -> Option<ProgressBar> {
        if !self.enabled {
            return None;
        }

        let pb = self.multi.add(ProgressBar::new_spinner());
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} {msg}")
                .unwrap()
                .tick_strings(&["⣾", "⣽", "⣻", "⢿", "⡿", "⣟", "⣯", "⣷"]),
        );
        pb.set_message(message.to_string());
        pb.enable_steady_tick(Duration::from_millis(100));

        Some(pb)
    }

    /// Create a counted progress bar (descriptors scraped, details fetched)
    pub fn create_counted_progress(&self, total: u64, message: &str) -> Option<ProgressBar> {
        if !self.enabled {
            return None;
        }

        let pb = self.multi.add(ProgressBar::new(total));
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{msg}\n{bar:40.cyan/blue} {pos}/{len} ({percent}%)")
                .unwrap()
                .progress_chars("█▓░"),
        );
        pb.set_message(message.to_string());

        Some(pb)
    }

    /// Show a simple message (for verbose mode)
    pub fn show_message(&self, message: &str) {
        if self.verbose && self.enabled {
            eprintln!("{}", message);
        }
    }

    /// Check if progress is enabled
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}

/// Progress context for one pipeline stage
pub struct StageProgress {
    spinner: Option<ProgressBar>,
    manager: Arc<ProgressManager>,
}

impl StageProgress {
    pub fn new(manager: Arc<ProgressManager>, stage: &str) -> Self {
        let message = format!("{}...", stage);
        let spinner = if manager.is_enabled() {
            manager.create_stage_spinner(&message)
        } else {
            None
        };

        Self { spinner, manager }
    }

    /// Update the progress message
    pub fn set_message(&self, message: &str) {
        if let Some(ref pb) = self.spinner {
            pb.set_message(message.to_string());
        }
        self.manager.show_message(message);
    }

    /// Finish with a summary message
    pub fn finish_with_message(&self, message: &str) {
        if let Some(ref pb) = self.spinner {
            pb.finish_with_message(message.to_string());
        }
        self.manager.show_message(message);
    }

    /// Finish and clear the progress
    pub fn finish_and_clear(&self) {
        if let Some(ref pb) = self.spinner {
            pb.finish_and_clear();
        }
    }
}

impl Drop for StageProgress {
    fn drop(&mut self) {
        if let Some(ref pb) = self.spinner {
            pb.finish_and_clear();
        }
    }
}
