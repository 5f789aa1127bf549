use crate::error::Error;
use crate::storage::{CacheParams, Storage};
use tracing::{debug, info};

pub const DEFAULT_CHUNK_CACHE_BYTES: usize = 64 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferingMode {
    DirectFile,
    InMemoryBuffer,
}

/// Knobs that decide how files are opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessOptions {
    pub in_memory_buffer: bool,
    pub chunk_cache: bool,
    pub chunk_cache_bytes: usize,
}

impl Default for AccessOptions {
    fn default() -> Self {
        Self {
            in_memory_buffer: true,
            chunk_cache: true,
            chunk_cache_bytes: DEFAULT_CHUNK_CACHE_BYTES,
        }
    }
}

/// How every file in the batch is opened. Built once, never changed.
///
/// `cache` is only ever set in [`BufferingMode::InMemoryBuffer`]; the library
/// may still fold it into its own defaults.
#[derive(Debug)]
pub struct AccessStrategy<P> {
    mode: BufferingMode,
    cache: Option<CacheParams>,
    props: Option<P>,
}

impl<P> AccessStrategy<P> {
    /// Library defaults, no property set.
    pub fn direct() -> Self {
        Self {
            mode: BufferingMode::DirectFile,
            cache: None,
            props: None,
        }
    }

    pub fn mode(&self) -> BufferingMode {
        self.mode
    }

    pub fn cache(&self) -> Option<CacheParams> {
        self.cache
    }

    pub fn property_set(&self) -> Option<&P> {
        self.props.as_ref()
    }
}

/// Builds the access strategy before any file is touched.
///
/// With chunk caching the library's current cache parameters are read back,
/// only the byte capacity is replaced, and all three are submitted again.
pub fn build_strategy<S: Storage>(
    storage: &S,
    options: &AccessOptions,
) -> Result<AccessStrategy<S::PropertySet>, Error> {
    if !options.in_memory_buffer {
        info!("Using direct file access with default properties");
        return Ok(AccessStrategy::direct());
    }

    let configure = |source| Error::Configuration { source };

    let mut props = storage.create_access_property_set().map_err(configure)?;
    storage
        .set_in_memory_buffering(&mut props)
        .map_err(configure)?;

    let mut cache = None;
    if options.chunk_cache {
        let defaults = storage.default_cache_params(&props).map_err(configure)?;
        let merged = CacheParams {
            byte_capacity: options.chunk_cache_bytes,
            ..defaults
        };
        debug!(
            "Chunk cache: slots={}, bytes={} (default {}), w0={}",
            merged.slot_count, merged.byte_capacity, defaults.byte_capacity, merged.preemption_weight
        );
        storage
            .set_cache_params(&mut props, merged)
            .map_err(configure)?;
        cache = Some(merged);
    }

    info!(
        "Using in-memory buffering, chunk cache {}",
        match cache {
            Some(c) => format!("{} bytes", c.byte_capacity),
            None => "disabled".to_string(),
        }
    );

    Ok(AccessStrategy {
        mode: BufferingMode::InMemoryBuffer,
        cache,
        props: Some(props),
    })
}
