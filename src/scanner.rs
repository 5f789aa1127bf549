use crate::access::AccessStrategy;
use crate::error::Error;
use crate::progress::ProgressReporter;
use crate::storage::{AllocationSnapshot, ObjectInfo, ObjectKind, Storage, StorageError};
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::{debug, info, trace, warn};

/// What the traversal learns about one object before deciding whether its
/// handle stays open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisitRecord {
    pub kind: ObjectKind,
    pub name: String,
    /// Only present for datasets.
    pub dimensions: Option<Vec<u64>>,
}

impl VisitRecord {
    /// True for a dataset whose first dimension holds no elements. Scalars
    /// have no first dimension and are not empty.
    pub fn has_empty_leading_dimension(&self) -> bool {
        matches!(self.dimensions.as_deref(), Some([0, ..]))
    }
}

/// One file kept open until the end of the batch, along with the dataset
/// handles its traversal left open.
pub struct OpenFile<S: Storage> {
    file: S::File,
    size: u64,
    datasets: Vec<S::Dataset>,
    released: usize,
    skipped: usize,
}

impl<S: Storage> OpenFile<S> {
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn retained_datasets(&self) -> &[S::Dataset] {
        &self.datasets
    }

    /// Datasets opened and closed again because their first dimension was empty.
    pub fn released_datasets(&self) -> usize {
        self.released
    }

    /// Datasets whose open or shape query failed.
    pub fn skipped_datasets(&self) -> usize {
        self.skipped
    }

    fn close(self, storage: &S, path: &str) -> Result<(), Error> {
        let closing = |source: StorageError| Error::Close {
            path: path.to_string(),
            source,
        };
        for dataset in self.datasets {
            storage.close_dataset(dataset).map_err(closing)?;
        }
        storage.close_file(self.file).map_err(closing)
    }
}

/// Every file handle opened by [`scan_all`], keyed by input path.
///
/// A path listed more than once keeps its newest handle in the map; the
/// earlier ones move to `displaced` and stay open as well. Nothing is
/// released on drop by this type; call [`OpenHandles::close_all`] once the
/// batch has been measured.
pub struct OpenHandles<S: Storage> {
    files: BTreeMap<String, OpenFile<S>>,
    displaced: Vec<(String, OpenFile<S>)>,
}

impl<S: Storage> OpenHandles<S> {
    fn new() -> Self {
        Self {
            files: BTreeMap::new(),
            displaced: Vec::new(),
        }
    }

    fn insert(&mut self, path: &str, file: OpenFile<S>) {
        if let Some(earlier) = self.files.insert(path.to_string(), file) {
            debug!("'{}' listed more than once, earlier handle kept open", path);
            self.displaced.push((path.to_string(), earlier));
        }
    }

    /// Open file handles, including earlier handles of repeated paths.
    pub fn len(&self) -> usize {
        self.files.len() + self.displaced.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The newest handle opened for `path`.
    pub fn get(&self, path: &str) -> Option<&OpenFile<S>> {
        self.files.get(path)
    }

    fn all(&self) -> impl Iterator<Item = &OpenFile<S>> {
        self.files
            .values()
            .chain(self.displaced.iter().map(|(_, file)| file))
    }

    pub fn retained_datasets(&self) -> usize {
        self.all().map(|f| f.datasets.len()).sum()
    }

    pub fn released_datasets(&self) -> usize {
        self.all().map(|f| f.released).sum()
    }

    /// Closes every retained dataset and file. All handles are attempted;
    /// the first failure is returned.
    pub fn close_all(self, storage: &S) -> Result<usize, Error> {
        let mut closed = 0;
        let mut first_error = None;

        for (path, file) in self.files.into_iter().chain(self.displaced) {
            match file.close(storage, &path) {
                Ok(()) => closed += 1,
                Err(e) => {
                    warn!("{}", e);
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(closed),
        }
    }
}

/// Opens and traverses every file in `paths`, in order.
///
/// `emit` is called once with the baseline snapshot and an accumulated size
/// of zero, then once after each file with the running total. The returned
/// handles are still open.
pub fn scan_all<S, F>(
    storage: &S,
    paths: &[String],
    strategy: &AccessStrategy<S::PropertySet>,
    progress: &dyn ProgressReporter,
    mut emit: F,
) -> Result<OpenHandles<S>, Error>
where
    S: Storage,
    F: FnMut(&AllocationSnapshot, u64) -> Result<(), Error>,
{
    let baseline = snapshot(storage)?;
    emit(&baseline, 0)?;

    let start = Instant::now();
    progress.on_scan_start(paths.len());

    let mut handles = OpenHandles::new();
    let mut acc_file_size: u64 = 0;

    for (index, path) in paths.iter().enumerate() {
        let scanned = scan_file(storage, path, strategy)?;
        acc_file_size += scanned.size;

        let stats = snapshot(storage)?;
        emit(&stats, acc_file_size)?;

        info!(
            "{}: size={} acc={} total_alloc={} curr_alloc={} peak_alloc={}",
            path,
            scanned.size,
            acc_file_size,
            stats.total_alloc_bytes,
            stats.curr_alloc_bytes,
            stats.peak_alloc_bytes,
        );
        progress.on_file_scanned(index + 1, path, acc_file_size);

        handles.insert(path, scanned);
    }

    progress.on_scan_complete(paths.len(), start.elapsed().as_secs_f64());
    Ok(handles)
}

fn snapshot<S: Storage>(storage: &S) -> Result<AllocationSnapshot, Error> {
    storage
        .alloc_stats()
        .map_err(|source| Error::Stats { source })
}

fn scan_file<S: Storage>(
    storage: &S,
    path: &str,
    strategy: &AccessStrategy<S::PropertySet>,
) -> Result<OpenFile<S>, Error> {
    let opening = |source| Error::Open {
        path: path.to_string(),
        source,
    };
    let file = storage
        .open_file(path, strategy.property_set())
        .map_err(opening)?;
    let size = storage.file_size(&file).map_err(opening)?;

    let mut datasets = Vec::new();
    let mut released = 0;
    let mut skipped = 0;

    storage
        .visit_objects(&file, &mut |info: &ObjectInfo| {
            if info.kind != ObjectKind::Dataset {
                trace!("{}: {} '{}'", path, info.kind, info.name);
                return;
            }
            match visit_dataset(storage, &file, &info.name) {
                Ok(Some(dataset)) => datasets.push(dataset),
                Ok(None) => released += 1,
                Err(e) => {
                    warn!("{}: skipping dataset '{}': {}", path, info.name, e);
                    skipped += 1;
                }
            }
        })
        .map_err(|source| Error::Traversal {
            path: path.to_string(),
            source,
        })?;

    debug!(
        "{}: {} datasets left open, {} empty datasets released, {} skipped",
        path,
        datasets.len(),
        released,
        skipped
    );

    Ok(OpenFile {
        file,
        size,
        datasets,
        released,
        skipped,
    })
}

/// Opens a dataset and reads its shape. Returns the handle unless the first
/// dimension is empty, in which case it is closed straight away.
fn visit_dataset<S: Storage>(
    storage: &S,
    file: &S::File,
    name: &str,
) -> Result<Option<S::Dataset>, StorageError> {
    let dataset = storage.open_dataset(file, name)?;
    let dims = match storage.dataset_dims(&dataset) {
        Ok(dims) => dims,
        Err(e) => {
            storage.close_dataset(dataset)?;
            return Err(e);
        }
    };

    let record = VisitRecord {
        kind: ObjectKind::Dataset,
        name: name.to_string(),
        dimensions: Some(dims),
    };
    trace!("{:?}", record);

    if record.has_empty_leading_dimension() {
        storage.close_dataset(dataset)?;
        Ok(None)
    } else {
        Ok(Some(dataset))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::{build_strategy, AccessOptions};
    use crate::progress::SilentReporter;
    use crate::storage::memory::{MemoryFile, MemoryObject, MemoryStorage};

    fn file_with(size: u64, objects: Vec<MemoryObject>) -> MemoryFile {
        MemoryFile {
            size: Some(size),
            objects,
            corrupt: false,
        }
    }

    fn collect_rows(
        storage: &MemoryStorage,
        paths: &[String],
    ) -> (Result<OpenHandles<MemoryStorage>, Error>, Vec<(AllocationSnapshot, u64)>) {
        let strategy = build_strategy(storage, &AccessOptions::default()).unwrap();
        let mut rows = Vec::new();
        let result = scan_all(storage, paths, &strategy, &SilentReporter, |stats, acc| {
            rows.push((*stats, acc));
            Ok(())
        });
        (result, rows)
    }

    #[test]
    fn test_leading_dimension() {
        let record = |dims: Option<Vec<u64>>| VisitRecord {
            kind: ObjectKind::Dataset,
            name: "d".to_string(),
            dimensions: dims,
        };
        assert!(record(Some(vec![0])).has_empty_leading_dimension());
        assert!(record(Some(vec![0, 7])).has_empty_leading_dimension());
        assert!(!record(Some(vec![3, 0])).has_empty_leading_dimension());
        assert!(!record(Some(vec![])).has_empty_leading_dimension());
        assert!(!record(None).has_empty_leading_dimension());
    }

    #[test]
    fn test_empty_list_emits_only_baseline() {
        let storage = MemoryStorage::new();
        let (result, rows) = collect_rows(&storage, &[]);
        let handles = result.unwrap();
        assert!(handles.is_empty());
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].1, 0);
    }

    #[test]
    fn test_accumulates_sizes_in_order() {
        let storage = MemoryStorage::new();
        storage.insert_file("a.h5", file_with(1000, vec![]));
        storage.insert_file("b.h5", file_with(2500, vec![]));
        let paths = vec!["a.h5".to_string(), "b.h5".to_string()];

        let (result, rows) = collect_rows(&storage, &paths);
        let handles = result.unwrap();

        let sizes: Vec<u64> = rows.iter().map(|(_, acc)| *acc).collect();
        assert_eq!(sizes, vec![0, 1000, 3500]);
        assert_eq!(handles.len(), 2);
        assert_eq!(handles.get("b.h5").unwrap().size(), 2500);
        assert_eq!(storage.open_file_paths().len(), 2);
    }

    #[test]
    fn test_empty_datasets_are_released() {
        let storage = MemoryStorage::new();
        storage.insert_file(
            "run.h5",
            file_with(
                4096,
                vec![
                    MemoryObject::group("events"),
                    MemoryObject::dataset("events/empty", &[0, 16]),
                    MemoryObject::dataset("events/hits", &[12, 3]),
                    MemoryObject::dataset("scalar", &[]),
                ],
            ),
        );

        let (result, _) = collect_rows(&storage, &["run.h5".to_string()]);
        let handles = result.unwrap();
        let file = handles.get("run.h5").unwrap();

        assert_eq!(file.released_datasets(), 1);
        let kept: Vec<&str> = file.retained_datasets().iter().map(|d| d.name()).collect();
        assert_eq!(kept, vec!["events/hits", "scalar"]);
        assert!(!storage
            .open_dataset_names()
            .contains(&"events/empty".to_string()));

        assert_eq!(handles.close_all(&storage).unwrap(), 1);
        assert!(storage.open_dataset_names().is_empty());
        assert!(storage.open_file_paths().is_empty());
    }

    #[test]
    fn test_unreadable_dataset_is_skipped() {
        let storage = MemoryStorage::new();
        let mut broken = MemoryObject::dataset("broken", &[5]);
        broken.unreadable = true;
        storage.insert_file(
            "f.h5",
            file_with(10, vec![broken, MemoryObject::dataset("ok", &[5])]),
        );

        let (result, rows) = collect_rows(&storage, &["f.h5".to_string()]);
        let handles = result.unwrap();
        let file = handles.get("f.h5").unwrap();
        assert_eq!(file.skipped_datasets(), 1);
        assert_eq!(file.retained_datasets().len(), 1);
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn test_open_failure_stops_before_row() {
        let storage = MemoryStorage::new();
        storage.insert_file("a.h5", file_with(1000, vec![]));
        let paths = vec!["a.h5".to_string(), "/missing/b.h5".to_string()];

        let (result, rows) = collect_rows(&storage, &paths);
        match result {
            Err(Error::Open { path, source }) => {
                assert_eq!(path, "/missing/b.h5");
                assert_eq!(source.operation, "H5Fopen");
            }
            _ => panic!("expected open error"),
        }
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn test_corrupt_file_is_traversal_error() {
        let storage = MemoryStorage::new();
        storage.insert_file(
            "bad.h5",
            MemoryFile {
                size: Some(1),
                objects: vec![],
                corrupt: true,
            },
        );
        let (result, rows) = collect_rows(&storage, &["bad.h5".to_string()]);
        assert!(matches!(result, Err(Error::Traversal { .. })));
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn test_duplicate_path_handles_stay_open_until_close_all() {
        let storage = MemoryStorage::new();
        storage.insert_file("a.h5", file_with(100, vec![MemoryObject::dataset("d", &[1])]));
        storage.insert_file("b.h5", file_with(50, vec![]));
        let paths = vec!["a.h5".to_string(), "a.h5".to_string(), "b.h5".to_string()];

        let (result, rows) = collect_rows(&storage, &paths);
        let handles = result.unwrap();

        let sizes: Vec<u64> = rows.iter().map(|(_, acc)| *acc).collect();
        assert_eq!(sizes, vec![0, 100, 200, 250]);
        for pair in rows.windows(2) {
            assert!(pair[1].0.curr_alloc_bytes > pair[0].0.curr_alloc_bytes);
        }

        assert_eq!(handles.len(), 3);
        assert_eq!(handles.retained_datasets(), 2);
        assert_eq!(
            storage.open_file_paths(),
            vec!["a.h5".to_string(), "a.h5".to_string(), "b.h5".to_string()]
        );
        assert_eq!(storage.open_dataset_names().len(), 2);

        assert_eq!(handles.close_all(&storage).unwrap(), 3);
        assert!(storage.open_file_paths().is_empty());
        assert!(storage.open_dataset_names().is_empty());
    }

    #[test]
    fn test_emit_error_aborts_scan() {
        let storage = MemoryStorage::new();
        storage.insert_file("a.h5", file_with(1, vec![]));
        let strategy = build_strategy(&storage, &AccessOptions::default()).unwrap();
        let mut calls = 0;
        let result = scan_all(
            &storage,
            &["a.h5".to_string()],
            &strategy,
            &SilentReporter,
            |_, _| {
                calls += 1;
                Err(Error::io(
                    "out.csv",
                    std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
                ))
            },
        );
        assert!(matches!(result, Err(Error::Io { .. })));
        assert_eq!(calls, 1);
        assert!(storage.open_file_paths().is_empty());
    }
}
