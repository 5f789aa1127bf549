//! Native HDF5 backend, built with `--features hdf5`.

use super::{AllocationSnapshot, CacheParams, ObjectInfo, ObjectKind, Storage, StorageError};
use ::hdf5::plist::{FileAccess, FileAccessBuilder};
use ::hdf5::{Dataset, File, Group, LinkType, LocationToken, LocationType};
use hdf5_sys::h5::{H5_alloc_stats_t, H5get_alloc_stats};
use std::mem::MaybeUninit;

fn native(operation: &'static str) -> impl Fn(::hdf5::Error) -> StorageError {
    move |e| StorageError::new(operation, e.to_string())
}

pub struct Hdf5Storage;

impl Hdf5Storage {
    pub fn new() -> Self {
        Hdf5Storage
    }

    fn rebuild(
        props: &mut FileAccess,
        operation: &'static str,
        edit: impl FnOnce(&mut FileAccessBuilder),
    ) -> Result<(), StorageError> {
        let mut builder = FileAccessBuilder::from_plist(props).map_err(native(operation))?;
        edit(&mut builder);
        *props = builder.finish().map_err(native(operation))?;
        Ok(())
    }

    /// Walks `group` the way `H5Ovisit` does: only hard links are followed,
    /// members come in name order, and an object reachable under several
    /// names is reported once. Soft and external links are skipped, so
    /// dangling or cyclic links cannot stall the walk.
    fn visit_group(
        group: &Group,
        prefix: &str,
        seen: &mut Vec<LocationToken>,
        visitor: &mut dyn FnMut(&ObjectInfo),
    ) -> Result<(), StorageError> {
        let links = group
            .iter_visit_default(Vec::new(), |_, member, link, links: &mut Vec<_>| {
                links.push((member.to_string(), link.link_type));
                true
            })
            .map_err(native("H5Literate"))?;

        for (member, link_type) in links {
            if !matches!(link_type, LinkType::Hard) {
                continue;
            }
            let info = group
                .loc_info_by_name(&member)
                .map_err(native("H5Oget_info_by_name"))?;
            if seen.contains(&info.token) {
                continue;
            }
            seen.push(info.token);

            let name = if prefix.is_empty() {
                member.clone()
            } else {
                format!("{}/{}", prefix, member)
            };
            let kind = match info.loc_type {
                LocationType::Group => ObjectKind::Group,
                LocationType::Dataset => ObjectKind::Dataset,
                _ => ObjectKind::Other,
            };

            visitor(&ObjectInfo {
                name: name.clone(),
                kind,
            });

            if kind == ObjectKind::Group {
                let child = group.group(&member).map_err(native("H5Gopen"))?;
                Self::visit_group(&child, &name, seen, visitor)?;
            }
        }
        Ok(())
    }
}

impl Default for Hdf5Storage {
    fn default() -> Self {
        Self::new()
    }
}

impl Storage for Hdf5Storage {
    type PropertySet = FileAccess;
    type File = File;
    type Dataset = Dataset;

    fn create_access_property_set(&self) -> Result<FileAccess, StorageError> {
        FileAccess::try_new().map_err(native("H5Pcreate"))
    }

    fn set_in_memory_buffering(&self, props: &mut FileAccess) -> Result<(), StorageError> {
        Self::rebuild(props, "H5Pset_fapl_core", |b| {
            b.core();
        })
    }

    fn default_cache_params(&self, props: &FileAccess) -> Result<CacheParams, StorageError> {
        let cache = props.chunk_cache();
        Ok(CacheParams {
            slot_count: cache.nslots,
            byte_capacity: cache.nbytes,
            preemption_weight: cache.w0,
        })
    }

    fn set_cache_params(
        &self,
        props: &mut FileAccess,
        params: CacheParams,
    ) -> Result<(), StorageError> {
        params
            .validate()
            .map_err(|msg| StorageError::new("H5Pset_cache", msg))?;
        Self::rebuild(props, "H5Pset_cache", |b| {
            b.chunk_cache(
                params.slot_count,
                params.byte_capacity,
                params.preemption_weight,
            );
        })
    }

    fn open_file(&self, path: &str, props: Option<&FileAccess>) -> Result<File, StorageError> {
        let mut builder = File::with_options();
        if let Some(fapl) = props {
            builder.set_access_plist(fapl).map_err(native("H5Fopen"))?;
        }
        builder.open(path).map_err(native("H5Fopen"))
    }

    fn file_size(&self, file: &File) -> Result<u64, StorageError> {
        Ok(file.size())
    }

    fn visit_objects(
        &self,
        file: &File,
        visitor: &mut dyn FnMut(&ObjectInfo),
    ) -> Result<(), StorageError> {
        visitor(&ObjectInfo {
            name: ".".to_string(),
            kind: ObjectKind::Group,
        });
        let root = file.loc_info().map_err(native("H5Oget_info"))?;
        let mut seen = vec![root.token];
        Self::visit_group(file, "", &mut seen, visitor)
    }

    fn open_dataset(&self, file: &File, name: &str) -> Result<Dataset, StorageError> {
        file.dataset(name).map_err(native("H5Dopen"))
    }

    fn dataset_dims(&self, dataset: &Dataset) -> Result<Vec<u64>, StorageError> {
        Ok(dataset.shape().into_iter().map(|d| d as u64).collect())
    }

    fn close_dataset(&self, dataset: Dataset) -> Result<(), StorageError> {
        // Dropping the last reference releases the native id.
        drop(dataset);
        Ok(())
    }

    fn alloc_stats(&self) -> Result<AllocationSnapshot, StorageError> {
        let mut stats = MaybeUninit::<H5_alloc_stats_t>::zeroed();
        let status = ::hdf5::sync::sync(|| unsafe { H5get_alloc_stats(stats.as_mut_ptr()) });
        if status < 0 {
            return Err(StorageError::new(
                "H5get_alloc_stats",
                "library did not report allocation statistics",
            ));
        }
        let stats = unsafe { stats.assume_init() };
        Ok(AllocationSnapshot {
            total_alloc_bytes: stats.total_alloc_bytes as u64,
            curr_alloc_bytes: stats.curr_alloc_bytes as u64,
            peak_alloc_bytes: stats.peak_alloc_bytes as u64,
        })
    }

    fn close_file(&self, file: File) -> Result<(), StorageError> {
        drop(file);
        Ok(())
    }
}
