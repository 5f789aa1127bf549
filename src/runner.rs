use crate::access::{build_strategy, AccessOptions};
use crate::error::Error;
use crate::input::read_file_list;
use crate::progress::ProgressReporter;
use crate::report::StatsReporter;
use crate::scanner::scan_all;
use crate::storage::{AllocationSnapshot, Storage};
use std::path::PathBuf;
use std::time::Instant;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub file_list: PathBuf,
    pub output: PathBuf,
    pub access: AccessOptions,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub files_scanned: usize,
    pub rows_written: usize,
    pub acc_file_size: u64,
    pub retained_datasets: usize,
    pub released_datasets: usize,
    pub files_closed: usize,
    pub last_stats: AllocationSnapshot,
}

/// One full measurement: header, baseline row, one row per listed file, then
/// every handle opened along the way is closed.
///
/// Rows already written stay in the output if a later step fails.
pub fn run<S: Storage>(
    storage: &S,
    options: &RunOptions,
    progress: &dyn ProgressReporter,
) -> Result<RunSummary, Error> {
    let mut reporter = StatsReporter::create(&options.output)?;
    reporter.write_header()?;

    let paths = read_file_list(&options.file_list)?;
    info!(
        "{} files listed in {}",
        paths.len(),
        options.file_list.display()
    );

    let strategy = build_strategy(storage, &options.access)?;

    let mut acc_file_size = 0;
    let mut last_stats = AllocationSnapshot::default();
    let handles = scan_all(storage, &paths, &strategy, progress, |stats, acc| {
        last_stats = *stats;
        acc_file_size = acc;
        reporter.write_row(stats, acc)
    })?;
    reporter.flush()?;

    let retained_datasets = handles.retained_datasets();
    let released_datasets = handles.released_datasets();
    debug!(
        "{} files open, {} datasets open, {} empty datasets released",
        handles.len(),
        retained_datasets,
        released_datasets
    );

    let close_start = Instant::now();
    let files_closed = handles.close_all(storage)?;
    progress.on_close_complete(files_closed, close_start.elapsed().as_secs_f64());

    Ok(RunSummary {
        files_scanned: paths.len(),
        rows_written: reporter.rows(),
        acc_file_size,
        retained_datasets,
        released_datasets,
        files_closed,
        last_stats,
    })
}
