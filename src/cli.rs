use clap::error::ErrorKind;
use clap::Parser;
use estimate_data_volume::{AppConfig, Backend};
use std::path::PathBuf;

#[derive(Debug, Parser)] // requires `derive` feature
#[command(name = "estimate-data-volume", version)]
#[command(
    about = "Records HDF5 allocator statistics and accumulated file size while opening a batch of files",
    long_about = None
)]
pub struct Cli {
    /// Text file with one HDF5 path per line, in processing order
    pub file_list: PathBuf,

    /// CSV file to write (truncated if it exists)
    pub output: PathBuf,

    /// Open files directly instead of buffering them in memory
    #[arg(long)]
    pub direct: bool,

    /// Keep the library's raw-data chunk cache settings untouched
    #[arg(long)]
    pub no_chunk_cache: bool,

    /// Raw-data chunk cache size in bytes
    #[arg(long, value_name = "BYTES")]
    pub chunk_cache_bytes: Option<usize>,

    /// Storage backend
    #[arg(long, value_enum)]
    pub backend: Option<Backend>,

    /// Show a progress bar on stderr
    #[arg(long)]
    pub progress: bool,
}

impl Cli {
    /// Flags win over the configuration file and environment.
    pub fn apply(&self, config: &mut AppConfig) {
        if self.direct {
            config.in_memory_buffer = false;
        }
        if self.no_chunk_cache {
            config.chunk_cache = false;
        }
        if let Some(bytes) = self.chunk_cache_bytes {
            config.chunk_cache_bytes = bytes;
        }
        if let Some(backend) = self.backend {
            config.backend = backend;
        }
        if self.progress {
            config.progress = true;
        }
    }
}

/// Exit status for an argument error: help and version succeed, anything
/// else (wrong positional count, unknown flag) is a usage error.
pub fn usage_exit_code(err: &clap::Error) -> i32 {
    match err.kind() {
        ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
        _ => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> AppConfig {
        AppConfig {
            backend: Backend::Hdf5,
            progress: false,
            in_memory_buffer: true,
            chunk_cache: true,
            chunk_cache_bytes: 64 * 1024 * 1024,
        }
    }

    #[test]
    fn test_two_positionals_parse() {
        let cli = Cli::try_parse_from(["estimate-data-volume", "files.txt", "out.csv"]).unwrap();
        assert_eq!(cli.file_list, PathBuf::from("files.txt"));
        assert_eq!(cli.output, PathBuf::from("out.csv"));
        assert!(!cli.direct);
        assert!(cli.backend.is_none());
    }

    #[test]
    fn test_wrong_positional_count_is_usage_error() {
        for args in [
            vec!["estimate-data-volume"],
            vec!["estimate-data-volume", "files.txt"],
            vec!["estimate-data-volume", "files.txt", "out.csv", "extra"],
        ] {
            let err = Cli::try_parse_from(args.iter().copied()).unwrap_err();
            assert!(
                matches!(
                    err.kind(),
                    ErrorKind::MissingRequiredArgument | ErrorKind::UnknownArgument
                ),
                "{:?}: {:?}",
                args,
                err.kind()
            );
            assert_eq!(usage_exit_code(&err), 1);
            assert!(err.render().to_string().contains("Usage"));
        }
    }

    #[test]
    fn test_help_and_version_exit_zero() {
        for flag in ["--help", "--version"] {
            let err = Cli::try_parse_from(["estimate-data-volume", flag]).unwrap_err();
            assert_eq!(usage_exit_code(&err), 0);
        }
    }

    #[test]
    fn test_flags_override_config() {
        let cli = Cli::try_parse_from([
            "estimate-data-volume",
            "files.txt",
            "out.csv",
            "--direct",
            "--no-chunk-cache",
            "--chunk-cache-bytes",
            "4096",
            "--backend",
            "memory",
            "--progress",
        ])
        .unwrap();

        let mut config = config();
        cli.apply(&mut config);
        assert!(!config.in_memory_buffer);
        assert!(!config.chunk_cache);
        assert_eq!(config.chunk_cache_bytes, 4096);
        assert_eq!(config.backend, Backend::Memory);
        assert!(config.progress);
    }

    #[test]
    fn test_absent_flags_keep_config() {
        let cli = Cli::try_parse_from(["estimate-data-volume", "files.txt", "out.csv"]).unwrap();
        let mut config = config();
        cli.apply(&mut config);
        assert!(config.in_memory_buffer);
        assert!(config.chunk_cache);
        assert_eq!(config.chunk_cache_bytes, 64 * 1024 * 1024);
        assert_eq!(config.backend, Backend::Hdf5);
        assert!(!config.progress);
    }
}
