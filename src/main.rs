mod cli;
mod logging;
mod reporter;

use std::process;

use clap::Parser;
use cli::Cli;
use colored::*;
use dotenv::dotenv;
use estimate_data_volume::config::load_configuration;
use estimate_data_volume::storage::memory::MemoryStorage;
use estimate_data_volume::{
    run, Backend, ProgressReporter, RunOptions, RunSummary, SilentReporter,
};
use reporter::CliReporter;
use tracing::{debug, error, info};

fn main() {
    dotenv().ok();

    let args = match Cli::try_parse() {
        Ok(args) => args,
        Err(err) => {
            let _ = err.print();
            process::exit(cli::usage_exit_code(&err));
        }
    };

    let guard = logging::init_logger();

    match run_measurement(&args) {
        Ok(summary) => {
            info!(
                "{} rows written to {}",
                format!("{}", summary.rows_written).green(),
                args.output.display(),
            );
            info!(
                "{} files, {} bytes accumulated, {} datasets held open, {} empty datasets released",
                format!("{}", summary.files_scanned).cyan(),
                format!("{}", summary.acc_file_size).cyan(),
                format!("{}", summary.retained_datasets).cyan(),
                format!("{}", summary.released_datasets).cyan(),
            );
            info!(
                "Final allocation: total {} curr {} peak {}",
                summary.last_stats.total_alloc_bytes,
                summary.last_stats.curr_alloc_bytes,
                summary.last_stats.peak_alloc_bytes,
            );
        }
        Err(err) => {
            error!("Error: {}", err);
            drop(guard);
            // Printed regardless of TRACING_LEVEL.
            eprintln!("{} {:#}", "error:".red().bold(), err);
            process::exit(1);
        }
    }
}

fn run_measurement(args: &Cli) -> anyhow::Result<RunSummary> {
    let mut config = load_configuration()?;
    args.apply(&mut config);
    debug!("Configuration: {:?}", config);

    let options = RunOptions {
        file_list: args.file_list.clone(),
        output: args.output.clone(),
        access: config.access(),
    };

    let bar = CliReporter::new();
    let progress: &dyn ProgressReporter = if config.progress {
        &bar
    } else {
        &SilentReporter
    };

    info!("Backend: {}", config.backend);
    match config.backend {
        Backend::Memory => Ok(run(&MemoryStorage::new(), &options, progress)?),
        Backend::Hdf5 => run_hdf5(&options, progress),
    }
}

#[cfg(feature = "hdf5")]
fn run_hdf5(options: &RunOptions, progress: &dyn ProgressReporter) -> anyhow::Result<RunSummary> {
    use estimate_data_volume::storage::hdf5::Hdf5Storage;
    Ok(run(&Hdf5Storage::new(), options, progress)?)
}

#[cfg(not(feature = "hdf5"))]
fn run_hdf5(_options: &RunOptions, _progress: &dyn ProgressReporter) -> anyhow::Result<RunSummary> {
    anyhow::bail!("built without HDF5 support; rebuild with `--features hdf5` or pass `--backend memory`")
}
