//! Progress bar for the content-check phase
//!
//! Drawn on stderr so stdout stays clean for the diff lines. The bar stays
//! invisible until it knows there is at least one file to check.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::Duration;

pub struct Progress {
    bar: ProgressBar,
    enabled: bool,
}

impl Progress {
    pub fn new(enabled: bool) -> Self {
        let bar = ProgressBar::with_draw_target(Some(0), ProgressDrawTarget::hidden());
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{msg} [{bar:15.cyan/blue}] {pos}/{len} ({eta})")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> "),
        );
        bar.set_message("Comparing files");
        Self { bar, enabled }
    }

    /// Never drawn; counts are still kept
    pub fn hidden() -> Self {
        Self::new(false)
    }

    /// Size the bar for `total` jobs and show it if there is work to show
    pub fn start(&self, total: u64) {
        self.bar.set_length(total);
        if self.enabled && total > 0 {
            self.bar.set_draw_target(ProgressDrawTarget::stderr());
            self.bar.enable_steady_tick(Duration::from_millis(120));
        }
    }

    pub fn inc(&self) {
        self.bar.inc(1);
    }

    pub fn position(&self) -> u64 {
        self.bar.position()
    }

    /// Remove the bar before results are printed
    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}
