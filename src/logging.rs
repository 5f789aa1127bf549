use std::env;
use std::path::Path;
use tracing::{debug, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

const DEFAULT_LOG_FILE: &str = "./logs/estimate-data-volume.log";

/// Opens the log file without rotation. Fails instead of panicking when the
/// directory cannot be created.
fn file_appender(log_file_path: &str) -> Result<RollingFileAppender, String> {
    let path = Path::new(log_file_path);
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| format!("'{}' does not name a file", log_file_path))?;
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix(file_name)
        .build(dir)
        .map_err(|e| e.to_string())
}

/// Stderr logging always; file logging when `LOG_FILE_PATH` (or the default)
/// can be opened. Hold the returned guard until exit so the file is flushed.
pub fn init_logger() -> Option<WorkerGuard> {
    // `TRACING_LEVEL` takes EnvFilter directives, e.g. `info,estimate_data_volume::scanner=trace`.
    let filter = env::var("TRACING_LEVEL").unwrap_or_else(|_| "info".to_string());
    let filter_layer = EnvFilter::new(filter);

    let log_file_path = env::var("LOG_FILE_PATH").unwrap_or_else(|_| DEFAULT_LOG_FILE.to_string());
    let (file_layer, guard, file_error) = match file_appender(&log_file_path) {
        Ok(appender) => {
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_writer(non_blocking).with_ansi(false);
            (Some(layer), Some(guard), None)
        }
        Err(e) => (None, None, Some(e)),
    };

    // Stdout is left alone; the CSV is the product and diagnostics go to stderr.
    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_file(false)
                .without_time()
                .with_target(false)
                .with_ansi(true),
        )
        .with(file_layer)
        .with(filter_layer)
        .init();

    match file_error {
        Some(e) => warn!("File logging disabled, cannot open {}: {}", log_file_path, e),
        None => debug!("Tracing is configured for stderr and file logging."),
    }

    guard
}
