use crate::access::{AccessOptions, DEFAULT_CHUNK_CACHE_BYTES};
use config::{Config, ConfigError, Environment, File as ConfigFile};
use serde::Deserialize;
use std::fmt;

pub const CONFIG_FILE_NAME: &str = "DataVolume";
pub const ENV_PREFIX: &str = "DATA_VOLUME";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Native HDF5 library
    Hdf5,
    /// TOML manifests describing file layouts
    Memory,
}

impl Backend {
    pub fn default_name() -> &'static str {
        if cfg!(feature = "hdf5") {
            "hdf5"
        } else {
            "memory"
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Hdf5 => write!(f, "hdf5"),
            Backend::Memory => write!(f, "memory"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub backend: Backend,
    pub progress: bool,
    pub in_memory_buffer: bool,
    pub chunk_cache: bool,
    pub chunk_cache_bytes: usize,
}

impl AppConfig {
    pub fn access(&self) -> AccessOptions {
        AccessOptions {
            in_memory_buffer: self.in_memory_buffer,
            chunk_cache: self.chunk_cache,
            chunk_cache_bytes: self.chunk_cache_bytes,
        }
    }
}

/// Defaults, then `DataVolume.toml` if present, then `DATA_VOLUME_*`
/// environment variables.
pub fn load_configuration() -> Result<AppConfig, ConfigError> {
    load_from(CONFIG_FILE_NAME)
}

pub fn load_from(file_name: &str) -> Result<AppConfig, ConfigError> {
    let defaults = AccessOptions::default();
    let builder = Config::builder()
        .set_default("backend", Backend::default_name())?
        .set_default("progress", false)?
        .set_default("in_memory_buffer", defaults.in_memory_buffer)?
        .set_default("chunk_cache", defaults.chunk_cache)?
        .set_default("chunk_cache_bytes", DEFAULT_CHUNK_CACHE_BYTES as u64)?
        .add_source(ConfigFile::with_name(file_name).required(false))
        .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true))
        .build()?;
    builder.try_deserialize::<AppConfig>()
}
