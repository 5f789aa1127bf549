use crate::storage::StorageError;
use thiserror::Error;

/// Every failure the measurement run can hit. None of them is recoverable;
/// `main` reports the error and exits non-zero.
#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration error in {}: {}", .source.operation, .source.message)]
    Configuration {
        #[source]
        source: StorageError,
    },

    #[error("unable to open '{path}' ({}): {}", .source.operation, .source.message)]
    Open {
        path: String,
        #[source]
        source: StorageError,
    },

    #[error("traversal of '{path}' failed in {}: {}", .source.operation, .source.message)]
    Traversal {
        path: String,
        #[source]
        source: StorageError,
    },

    #[error("{}: {}", .source.operation, .source.message)]
    Stats {
        #[source]
        source: StorageError,
    },

    #[error("unable to close '{path}' ({}): {}", .source.operation, .source.message)]
    Close {
        path: String,
        #[source]
        source: StorageError,
    },

    #[error("IO error on '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error: {0}")]
    Report(#[from] csv::Error),

    #[error("Settings error: {0}")]
    Settings(#[from] config::ConfigError),
}

impl Error {
    pub fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    /// Name of the native or IO operation that failed.
    pub fn operation(&self) -> &str {
        match self {
            Error::Configuration { source }
            | Error::Open { source, .. }
            | Error::Traversal { source, .. }
            | Error::Stats { source }
            | Error::Close { source, .. } => source.operation,
            Error::Io { .. } => "io",
            Error::Report(_) => "csv",
            Error::Settings(_) => "settings",
        }
    }
}
