/// Trait for reporting measurement progress.
///
/// The CLI implements it with an indicatif bar; library callers and tests use
/// [`SilentReporter`]. All methods default to no-ops.
pub trait ProgressReporter {
    fn on_scan_start(&self, _total_files: usize) {}
    fn on_file_scanned(&self, _files_done: usize, _path: &str, _acc_file_size: u64) {}
    fn on_scan_complete(&self, _files_scanned: usize, _duration_secs: f64) {}
    fn on_close_complete(&self, _files_closed: usize, _duration_secs: f64) {}
}

/// No-op progress reporter for silent operation.
pub struct SilentReporter;

impl ProgressReporter for SilentReporter {}
