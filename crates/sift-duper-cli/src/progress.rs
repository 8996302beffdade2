use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use sift_duper_core::ProgressReporter;
use std::sync::Mutex;
use std::time::Duration;

const TICK_CHARS: &str = "⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏";

/// CLI progress reporter using indicatif progress bars.
///
/// - Sync: spinner (file count unknown upfront)
/// - Attribute calculation: progress bar per attribute
/// - Grouping: spinner
pub struct CliReporter {
    bar: Mutex<Option<ProgressBar>>,
}

impl CliReporter {
    pub fn new() -> Self {
        Self {
            bar: Mutex::new(None),
        }
    }

    fn spinner(message: String) -> ProgressBar {
        let pb = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_chars(TICK_CHARS);
        pb.set_style(style);
        pb.set_message(message);
        pb.enable_steady_tick(Duration::from_millis(80));
        pb
    }

    fn set_bar(&self, pb: ProgressBar) {
        if let Ok(mut guard) = self.bar.lock() {
            if let Some(old) = guard.take() {
                old.finish_and_clear();
            }
            *guard = Some(pb);
        }
    }

    fn with_bar(&self, f: impl FnOnce(&ProgressBar)) {
        if let Ok(guard) = self.bar.lock() {
            if let Some(pb) = guard.as_ref() {
                f(pb);
            }
        }
    }

    fn finish_bar(&self) {
        if let Ok(mut guard) = self.bar.lock() {
            if let Some(pb) = guard.take() {
                pb.finish_and_clear();
            }
        }
    }

    fn done(message: String) {
        eprintln!("  {} {}", "✓".green(), message);
    }
}

impl ProgressReporter for CliReporter {
    fn on_sync_start(&self, root: &str) {
        self.set_bar(Self::spinner(format!("Syncing {}...", root)));
    }

    fn on_sync_progress(&self, files_seen: usize, current_path: &str) {
        self.with_bar(|pb| {
            pb.set_message(format!("Syncing... {} files ({})", files_seen, current_path))
        });
    }

    fn on_sync_complete(
        &self,
        files_seen: usize,
        pruned: usize,
        inaccessible: usize,
        duration_secs: f64,
    ) {
        self.finish_bar();
        Self::done(format!(
            "Sync complete: {} files, {} pruned, {} unreadable in {:.2}s",
            files_seen, pruned, inaccessible, duration_secs
        ));
    }

    fn on_calculate_start(&self, attribute: &str, total_files: usize) {
        let pb = ProgressBar::new(total_files as u64);
        let template = format!(
            "  {{spinner:.cyan}} {} [{{bar:30.cyan/dim}}] {{pos}}/{{len}} files {}",
            attribute, "({eta} remaining)"
        );
        let style = ProgressStyle::with_template(&template)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("━╸─")
            .tick_chars(TICK_CHARS);
        pb.set_style(style);
        pb.enable_steady_tick(Duration::from_millis(80));
        self.set_bar(pb);
    }

    fn on_calculate_progress(&self, files_done: usize, total_files: usize) {
        self.with_bar(|pb| {
            if pb.length() != Some(total_files as u64) {
                pb.set_length(total_files as u64);
            }
            pb.set_position(files_done as u64);
        });
    }

    fn on_calculate_complete(
        &self,
        attribute: &str,
        stored: usize,
        failed: usize,
        duration_secs: f64,
    ) {
        self.finish_bar();
        Self::done(format!(
            "{}: {} computed, {} failed in {:.2}s",
            attribute, stored, failed, duration_secs
        ));
    }

    fn on_group_start(&self) {
        self.set_bar(Self::spinner("Grouping files...".to_string()));
    }

    fn on_group_complete(&self, groups: usize, duration_secs: f64) {
        self.finish_bar();
        Self::done(format!(
            "Grouping complete: {} groups in {:.2}s",
            groups, duration_secs
        ));
    }
}
