//! In-process storage backend.
//!
//! Files are either registered programmatically with [`MemoryStorage::insert_file`]
//! or loaded on open from a TOML manifest on disk:
//!
//! ```toml
//! size = 4096
//!
//! [[objects]]
//! name = "detector"
//! kind = "group"
//!
//! [[objects]]
//! name = "detector/hits"
//! kind = "dataset"
//! dims = [0, 3]
//! ```
//!
//! The backend keeps allocator-style counters that move with every handle it
//! hands out, so the measurement loop sees realistic growth without a native
//! library.

use super::{AllocationSnapshot, CacheParams, ObjectInfo, ObjectKind, Storage, StorageError};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::rc::Rc;

const PROPERTY_SET_BYTES: u64 = 256;
const FILE_HANDLE_BYTES: u64 = 1024;
const OBJECT_HEADER_BYTES: u64 = 64;
const DATASET_HANDLE_BYTES: u64 = 128;

pub const DEFAULT_CACHE: CacheParams = CacheParams {
    slot_count: 521,
    byte_capacity: 1024 * 1024,
    preemption_weight: 0.75,
};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryFile {
    /// Size reported by `file_size`. Manifests may omit it, in which case the
    /// manifest's own length on disk is used.
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub objects: Vec<MemoryObject>,
    /// Makes the whole traversal fail.
    #[serde(default)]
    pub corrupt: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryObject {
    pub name: String,
    pub kind: ObjectKind,
    #[serde(default)]
    pub dims: Vec<u64>,
    /// Makes opening this dataset fail.
    #[serde(default)]
    pub unreadable: bool,
}

impl MemoryObject {
    pub fn group(name: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: ObjectKind::Group,
            dims: Vec::new(),
            unreadable: false,
        }
    }

    pub fn dataset(name: &str, dims: &[u64]) -> Self {
        Self {
            name: name.to_string(),
            kind: ObjectKind::Dataset,
            dims: dims.to_vec(),
            unreadable: false,
        }
    }
}

#[derive(Debug)]
pub struct MemoryPropertySet {
    in_memory: bool,
    cache: CacheParams,
}

impl MemoryPropertySet {
    pub fn in_memory(&self) -> bool {
        self.in_memory
    }

    pub fn cache(&self) -> CacheParams {
        self.cache
    }
}

#[derive(Debug)]
pub struct MemoryFileHandle {
    id: u64,
    path: String,
    file: Rc<MemoryFile>,
    size: u64,
    charge: u64,
}

#[derive(Debug)]
pub struct MemoryDataset {
    id: u64,
    name: String,
    dims: Vec<u64>,
    charge: u64,
}

impl MemoryDataset {
    pub fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Debug, Default)]
struct Counters {
    total: u64,
    current: u64,
    peak: u64,
    next_id: u64,
    open_files: BTreeMap<u64, String>,
    open_datasets: BTreeMap<u64, String>,
}

impl Counters {
    fn charge(&mut self, bytes: u64) {
        self.total += bytes;
        self.current += bytes;
        self.peak = self.peak.max(self.current);
    }

    fn release(&mut self, bytes: u64) {
        self.current = self.current.saturating_sub(bytes);
    }

    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

#[derive(Debug)]
pub struct MemoryStorage {
    files: RefCell<HashMap<String, Rc<MemoryFile>>>,
    counters: RefCell<Counters>,
    default_cache: CacheParams,
    reject_in_memory: bool,
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self {
            files: RefCell::new(HashMap::new()),
            counters: RefCell::new(Counters::default()),
            default_cache: DEFAULT_CACHE,
            reject_in_memory: false,
        }
    }

    /// Overrides the cache parameters new property sets start from.
    pub fn with_default_cache(mut self, cache: CacheParams) -> Self {
        self.default_cache = cache;
        self
    }

    /// Makes `set_in_memory_buffering` fail, as a library built without the
    /// core driver would.
    pub fn without_in_memory_driver(mut self) -> Self {
        self.reject_in_memory = true;
        self
    }

    pub fn insert_file(&self, path: &str, file: MemoryFile) {
        self.files
            .borrow_mut()
            .insert(path.to_string(), Rc::new(file));
    }

    pub fn open_file_paths(&self) -> Vec<String> {
        self.counters.borrow().open_files.values().cloned().collect()
    }

    /// Names of datasets currently open, in the order they were opened.
    pub fn open_dataset_names(&self) -> Vec<String> {
        self.counters
            .borrow()
            .open_datasets
            .values()
            .cloned()
            .collect()
    }

    fn lookup(&self, path: &str) -> Result<(Rc<MemoryFile>, u64), StorageError> {
        if let Some(file) = self.files.borrow().get(path) {
            return Ok((Rc::clone(file), file.size.unwrap_or(0)));
        }

        let text = fs::read_to_string(path)
            .map_err(|e| StorageError::new("H5Fopen", format!("unable to open '{}': {}", path, e)))?;
        let file: MemoryFile = toml::from_str(&text).map_err(|e| {
            StorageError::new("H5Fopen", format!("'{}' is not a recognised file: {}", path, e))
        })?;
        let size = file.size.unwrap_or(text.len() as u64);
        Ok((Rc::new(file), size))
    }
}

/// Parent of `name` if it is one of the declared objects. Objects whose parent
/// group was never declared hang off the root.
fn parent_of<'a>(objects: &[MemoryObject], name: &'a str) -> Option<&'a str> {
    let (parent, _) = name.rsplit_once('/')?;
    objects.iter().any(|o| o.name == parent).then_some(parent)
}

/// Depth-first, each group's members in name order.
fn visit_children(
    objects: &[MemoryObject],
    parent: Option<&str>,
    visitor: &mut dyn FnMut(&ObjectInfo),
) {
    let mut children: Vec<&MemoryObject> = objects
        .iter()
        .filter(|o| parent_of(objects, &o.name) == parent)
        .collect();
    children.sort_by(|a, b| a.name.cmp(&b.name));

    for child in children {
        visitor(&ObjectInfo {
            name: child.name.clone(),
            kind: child.kind,
        });
        visit_children(objects, Some(&child.name), visitor);
    }
}

impl Storage for MemoryStorage {
    type PropertySet = MemoryPropertySet;
    type File = MemoryFileHandle;
    type Dataset = MemoryDataset;

    fn create_access_property_set(&self) -> Result<MemoryPropertySet, StorageError> {
        self.counters.borrow_mut().charge(PROPERTY_SET_BYTES);
        Ok(MemoryPropertySet {
            in_memory: false,
            cache: self.default_cache,
        })
    }

    fn set_in_memory_buffering(&self, props: &mut MemoryPropertySet) -> Result<(), StorageError> {
        if self.reject_in_memory {
            return Err(StorageError::new(
                "H5Pset_fapl_core",
                "in-memory driver not available",
            ));
        }
        props.in_memory = true;
        Ok(())
    }

    fn default_cache_params(&self, props: &MemoryPropertySet) -> Result<CacheParams, StorageError> {
        Ok(props.cache)
    }

    fn set_cache_params(
        &self,
        props: &mut MemoryPropertySet,
        params: CacheParams,
    ) -> Result<(), StorageError> {
        params
            .validate()
            .map_err(|msg| StorageError::new("H5Pset_cache", msg))?;
        props.cache = params;
        Ok(())
    }

    fn open_file(
        &self,
        path: &str,
        props: Option<&MemoryPropertySet>,
    ) -> Result<MemoryFileHandle, StorageError> {
        let (file, size) = self.lookup(path)?;

        // The in-memory driver holds the whole file image.
        let mut charge = FILE_HANDLE_BYTES + OBJECT_HEADER_BYTES * file.objects.len() as u64;
        if props.map_or(false, |p| p.in_memory) {
            charge += size;
        }

        let mut counters = self.counters.borrow_mut();
        counters.charge(charge);
        let id = counters.next_id();
        counters.open_files.insert(id, path.to_string());

        Ok(MemoryFileHandle {
            id,
            path: path.to_string(),
            file,
            size,
            charge,
        })
    }

    fn file_size(&self, file: &MemoryFileHandle) -> Result<u64, StorageError> {
        Ok(file.size)
    }

    fn visit_objects(
        &self,
        file: &MemoryFileHandle,
        visitor: &mut dyn FnMut(&ObjectInfo),
    ) -> Result<(), StorageError> {
        if file.file.corrupt {
            return Err(StorageError::new(
                "H5Ovisit",
                format!("corrupt object header in '{}'", file.path),
            ));
        }

        visitor(&ObjectInfo {
            name: ".".to_string(),
            kind: ObjectKind::Group,
        });

        visit_children(&file.file.objects, None, visitor);
        Ok(())
    }

    fn open_dataset(&self, file: &MemoryFileHandle, name: &str) -> Result<MemoryDataset, StorageError> {
        let object = file
            .file
            .objects
            .iter()
            .find(|o| o.name == name && o.kind == ObjectKind::Dataset)
            .ok_or_else(|| StorageError::new("H5Dopen", format!("no dataset '{}'", name)))?;
        if object.unreadable {
            return Err(StorageError::new(
                "H5Dopen",
                format!("unable to read header of '{}'", name),
            ));
        }

        let charge = DATASET_HANDLE_BYTES + 8 * object.dims.len() as u64;
        let mut counters = self.counters.borrow_mut();
        counters.charge(charge);
        let id = counters.next_id();
        counters.open_datasets.insert(id, name.to_string());

        Ok(MemoryDataset {
            id,
            name: name.to_string(),
            dims: object.dims.clone(),
            charge,
        })
    }

    fn dataset_dims(&self, dataset: &MemoryDataset) -> Result<Vec<u64>, StorageError> {
        Ok(dataset.dims.clone())
    }

    fn close_dataset(&self, dataset: MemoryDataset) -> Result<(), StorageError> {
        let mut counters = self.counters.borrow_mut();
        if counters.open_datasets.remove(&dataset.id).is_none() {
            return Err(StorageError::new("H5Dclose", "dataset already closed"));
        }
        counters.release(dataset.charge);
        Ok(())
    }

    fn alloc_stats(&self) -> Result<AllocationSnapshot, StorageError> {
        let counters = self.counters.borrow();
        Ok(AllocationSnapshot {
            total_alloc_bytes: counters.total,
            curr_alloc_bytes: counters.current,
            peak_alloc_bytes: counters.peak,
        })
    }

    fn close_file(&self, file: MemoryFileHandle) -> Result<(), StorageError> {
        let mut counters = self.counters.borrow_mut();
        if counters.open_files.remove(&file.id).is_none() {
            return Err(StorageError::new("H5Fclose", "file already closed"));
        }
        counters.release(file.charge);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn sample() -> MemoryFile {
        MemoryFile {
            size: Some(1000),
            objects: vec![
                MemoryObject::dataset("b/data", &[4, 2]),
                MemoryObject::group("b"),
                MemoryObject::group("a"),
            ],
            corrupt: false,
        }
    }

    #[test]
    fn test_visit_is_name_ordered_from_root() {
        let storage = MemoryStorage::new();
        storage.insert_file("f.h5", sample());
        let file = storage.open_file("f.h5", None).unwrap();

        let mut seen = Vec::new();
        storage
            .visit_objects(&file, &mut |info: &ObjectInfo| seen.push(info.name.clone()))
            .unwrap();
        assert_eq!(seen, vec![".", "a", "b", "b/data"]);
    }

    #[test]
    fn test_visit_descends_before_next_sibling() {
        let storage = MemoryStorage::new();
        storage.insert_file(
            "f.h5",
            MemoryFile {
                size: Some(10),
                objects: vec![
                    MemoryObject::dataset("b-x", &[1]),
                    MemoryObject::dataset("b/data", &[1]),
                    MemoryObject::group("b/sub"),
                    MemoryObject::dataset("b/sub/deep", &[2]),
                    MemoryObject::group("b"),
                    MemoryObject::dataset("orphan/leaf", &[3]),
                ],
                corrupt: false,
            },
        );
        let file = storage.open_file("f.h5", None).unwrap();

        let mut seen = Vec::new();
        storage
            .visit_objects(&file, &mut |info: &ObjectInfo| seen.push(info.name.clone()))
            .unwrap();
        assert_eq!(
            seen,
            vec![".", "b", "b/data", "b/sub", "b/sub/deep", "b-x", "orphan/leaf"]
        );
    }

    #[test]
    fn test_counters_follow_handles() {
        let storage = MemoryStorage::new();
        storage.insert_file("f.h5", sample());

        let file = storage.open_file("f.h5", None).unwrap();
        let dset = storage.open_dataset(&file, "b/data").unwrap();
        let open = storage.alloc_stats().unwrap();
        assert!(open.curr_alloc_bytes > 0);
        assert_eq!(storage.open_dataset_names(), vec!["b/data".to_string()]);

        storage.close_dataset(dset).unwrap();
        storage.close_file(file).unwrap();
        let closed = storage.alloc_stats().unwrap();
        assert_eq!(closed.curr_alloc_bytes, 0);
        assert_eq!(closed.total_alloc_bytes, open.total_alloc_bytes);
        assert_eq!(closed.peak_alloc_bytes, open.peak_alloc_bytes);
        assert!(storage.open_file_paths().is_empty());
    }

    #[test]
    fn test_in_memory_driver_charges_file_image() {
        let storage = MemoryStorage::new();
        storage.insert_file("f.h5", sample());

        let direct = storage.open_file("f.h5", None).unwrap();
        let direct_charge = storage.alloc_stats().unwrap().curr_alloc_bytes;
        storage.close_file(direct).unwrap();

        let mut props = storage.create_access_property_set().unwrap();
        storage.set_in_memory_buffering(&mut props).unwrap();
        let before = storage.alloc_stats().unwrap().curr_alloc_bytes;
        let _core = storage.open_file("f.h5", Some(&props)).unwrap();
        let core_charge = storage.alloc_stats().unwrap().curr_alloc_bytes - before;

        assert_eq!(core_charge, direct_charge + 1000);
    }

    #[test]
    fn test_manifest_loaded_from_disk() {
        let mut manifest = NamedTempFile::new().unwrap();
        write!(
            manifest,
            "[[objects]]\nname = \"hits\"\nkind = \"dataset\"\ndims = [0]\n"
        )
        .unwrap();
        let path = manifest.path().to_str().unwrap().to_string();
        let on_disk = fs::metadata(&path).unwrap().len();

        let storage = MemoryStorage::new();
        let file = storage.open_file(&path, None).unwrap();
        assert_eq!(storage.file_size(&file).unwrap(), on_disk);
        let dset = storage.open_dataset(&file, "hits").unwrap();
        assert_eq!(storage.dataset_dims(&dset).unwrap(), vec![0]);
    }

    #[test]
    fn test_open_missing_file_fails() {
        let storage = MemoryStorage::new();
        let err = storage.open_file("/no/such/file.h5", None).unwrap_err();
        assert_eq!(err.operation, "H5Fopen");
    }

    #[test]
    fn test_set_cache_rejects_invalid_weight() {
        let storage = MemoryStorage::new();
        let mut props = storage.create_access_property_set().unwrap();
        let err = storage
            .set_cache_params(
                &mut props,
                CacheParams {
                    preemption_weight: -0.1,
                    ..DEFAULT_CACHE
                },
            )
            .unwrap_err();
        assert_eq!(err.operation, "H5Pset_cache");
        assert_eq!(props.cache(), DEFAULT_CACHE);
    }

    #[test]
    fn test_double_close_is_an_error() {
        let storage = MemoryStorage::new();
        storage.insert_file("f.h5", sample());
        let file = storage.open_file("f.h5", None).unwrap();
        let twin = MemoryFileHandle {
            id: file.id,
            path: file.path.clone(),
            file: Rc::clone(&file.file),
            size: file.size,
            charge: file.charge,
        };
        storage.close_file(file).unwrap();
        assert_eq!(storage.close_file(twin).unwrap_err().operation, "H5Fclose");
    }
}
