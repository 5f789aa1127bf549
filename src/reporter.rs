use estimate_data_volume::ProgressReporter;
use indicatif::{ProgressBar, ProgressStyle};

/// CLI progress reporter: one bar over the file list, on stderr.
pub struct CliReporter {
    bar: ProgressBar,
}

impl CliReporter {
    pub fn new() -> Self {
        Self {
            bar: ProgressBar::hidden(),
        }
    }
}

impl ProgressReporter for CliReporter {
    fn on_scan_start(&self, total_files: usize) {
        self.bar.set_draw_target(indicatif::ProgressDrawTarget::stderr());
        self.bar.set_length(total_files as u64);
        self.bar.set_style(
            ProgressStyle::with_template(
                "  {spinner:.cyan} Scanning [{bar:30.cyan/dim}] {pos}/{len} files {msg}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("━╸─")
            .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"),
        );
    }

    fn on_file_scanned(&self, files_done: usize, _path: &str, acc_file_size: u64) {
        self.bar.set_position(files_done as u64);
        self.bar.set_message(format!("({} bytes)", acc_file_size));
    }

    fn on_scan_complete(&self, files_scanned: usize, duration_secs: f64) {
        self.bar.finish_and_clear();
        eprintln!(
            "  \x1b[32m✓\x1b[0m Scan complete: {} files in {:.2}s",
            files_scanned, duration_secs
        );
    }

    fn on_close_complete(&self, files_closed: usize, duration_secs: f64) {
        eprintln!(
            "  \x1b[32m✓\x1b[0m Closed {} files in {:.2}s",
            files_closed, duration_secs
        );
    }
}
