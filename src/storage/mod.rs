//! The hierarchical-data library as seen by the measurement loop.
//!
//! The harness never talks to a native library directly. It goes through
//! [`Storage`], which exposes the handful of capabilities the loop needs:
//! property-set construction, file open/close, recursive object visitation,
//! dataset shape queries and the library's process-wide allocation counters.

#[cfg(feature = "hdf5")]
pub mod hdf5;
pub mod memory;

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Failure reported by a storage backend. `operation` is the native call
/// that failed, so diagnostics can name it.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{operation}: {message}")]
pub struct StorageError {
    pub operation: &'static str,
    pub message: String,
}

impl StorageError {
    pub fn new(operation: &'static str, message: impl Into<String>) -> Self {
        Self {
            operation,
            message: message.into(),
        }
    }
}

/// Object classes the traversal distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectKind {
    Group,
    Dataset,
    Other,
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectKind::Group => write!(f, "group"),
            ObjectKind::Dataset => write!(f, "dataset"),
            ObjectKind::Other => write!(f, "other"),
        }
    }
}

/// One object as yielded by [`Storage::visit_objects`]. `name` is relative to
/// the file root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    pub name: String,
    pub kind: ObjectKind,
}

/// Raw-data chunk cache parameters of a file-access property set.
///
/// The library only accepts these as a whole, so callers that want to change
/// one field read the current values, patch, and resubmit all three.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CacheParams {
    pub slot_count: usize,
    pub byte_capacity: usize,
    pub preemption_weight: f64,
}

impl CacheParams {
    pub fn validate(&self) -> Result<(), String> {
        if self.slot_count == 0 {
            return Err("slot count must be positive".to_string());
        }
        if !(0.0..=1.0).contains(&self.preemption_weight) {
            return Err(format!(
                "preemption weight {} outside [0, 1]",
                self.preemption_weight
            ));
        }
        Ok(())
    }
}

/// Process-wide allocator counters owned by the storage library.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationSnapshot {
    pub total_alloc_bytes: u64,
    pub curr_alloc_bytes: u64,
    pub peak_alloc_bytes: u64,
}

/// Capability set of the underlying hierarchical-data library.
///
/// Handles are owned values: dropping one without passing it to the matching
/// `close_*` call is backend-defined, so the scanner always closes explicitly.
pub trait Storage {
    type PropertySet;
    type File;
    type Dataset;

    fn create_access_property_set(&self) -> Result<Self::PropertySet, StorageError>;

    fn set_in_memory_buffering(&self, props: &mut Self::PropertySet) -> Result<(), StorageError>;

    fn default_cache_params(&self, props: &Self::PropertySet) -> Result<CacheParams, StorageError>;

    fn set_cache_params(
        &self,
        props: &mut Self::PropertySet,
        params: CacheParams,
    ) -> Result<(), StorageError>;

    /// Opens `path` read-only. `None` means the library's default access
    /// properties.
    fn open_file(
        &self,
        path: &str,
        props: Option<&Self::PropertySet>,
    ) -> Result<Self::File, StorageError>;

    fn file_size(&self, file: &Self::File) -> Result<u64, StorageError>;

    /// Recursively visits every object reachable from the root of `file`, in
    /// name order as the library iterates it natively.
    fn visit_objects(
        &self,
        file: &Self::File,
        visitor: &mut dyn FnMut(&ObjectInfo),
    ) -> Result<(), StorageError>;

    fn open_dataset(&self, file: &Self::File, name: &str) -> Result<Self::Dataset, StorageError>;

    fn dataset_dims(&self, dataset: &Self::Dataset) -> Result<Vec<u64>, StorageError>;

    fn close_dataset(&self, dataset: Self::Dataset) -> Result<(), StorageError>;

    fn alloc_stats(&self) -> Result<AllocationSnapshot, StorageError>;

    fn close_file(&self, file: Self::File) -> Result<(), StorageError>;
}
