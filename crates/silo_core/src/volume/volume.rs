//! A single volume: superblock, append-only data log, and needle index.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{debug, info};

use crate::error::{CoreError, CoreResult};
use crate::index::{NeedleMap, NeedleValue};
use crate::super_block::{read_super_block, ReplicaPlacement, SuperBlock};
use crate::types::VolumeId;
use crate::volume::scanner::scan_data_file;
use crate::volume::vacuum::VacuumProgress;
use silo_needle::{
    actual_size, decode, encode, Needle, NeedleFlags, NeedleId, Ttl, Version,
    NEEDLE_PADDING_SIZE,
};
use silo_storage::{BackendRegistry, StorageBackend};

/// Extension of the data log file.
pub const DATA_EXT: &str = "dat";
/// Extension of the needle index file.
pub const INDEX_EXT: &str = "idx";
/// Extension of the staged compacted data file.
pub const COMPACT_DATA_EXT: &str = "cpd";
/// Extension of the staged compacted index file.
pub const COMPACT_INDEX_EXT: &str = "cpx";

/// Creation-time parameters of a volume.
#[derive(Debug, Clone, Default)]
pub struct VolumeOptions {
    /// Replica placement recorded in the superblock.
    pub replica_placement: ReplicaPlacement,
    /// Volume-wide TTL; needles appended without a TTL inherit it.
    pub ttl: Ttl,
}

/// Result of a successful append.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppendOutcome {
    /// Byte offset of the record in the data file.
    pub offset: u64,
    /// Value of the record's size field.
    pub size: u32,
    /// Append timestamp in nanoseconds, zero for pre-v3 volumes.
    pub append_at_ns: u64,
}

/// Snapshot of a volume's externally visible state.
#[derive(Debug, Clone, Serialize)]
pub struct VolumeStatus {
    /// Volume id.
    pub id: VolumeId,
    /// Collection name, empty for the default collection.
    pub collection: String,
    /// Needle format version.
    pub version: u8,
    /// Replica placement policy.
    pub replica_placement: ReplicaPlacement,
    /// Volume TTL as a display string.
    pub ttl: String,
    /// Data file size in bytes.
    pub size: u64,
    /// Live needle count.
    pub live_count: usize,
    /// Records ever appended.
    pub file_count: u64,
    /// Records deleted or superseded.
    pub deletion_count: u64,
    /// Bytes deleted or superseded.
    pub deleted_bytes: u64,
    /// Share of the data file occupied by garbage.
    pub garbage_ratio: f64,
    /// Number of completed compactions.
    pub compact_revision: u16,
    /// Whether the volume still accepts writes.
    pub read_only: bool,
    /// Timestamp of the last append in nanoseconds.
    pub last_append_at_ns: u64,
}

/// An append-only needle volume.
///
/// Reads take shared locks and run concurrently. Mutations are expected to
/// arrive one at a time, serialized by the volume's
/// [`VolumeWriter`](crate::volume::VolumeWriter); the internal locks exist so
/// that reads stay safe alongside them, not to order writers.
pub struct Volume {
    pub(crate) id: VolumeId,
    pub(crate) collection: String,
    pub(crate) base_path: PathBuf,
    pub(crate) backend_name: String,
    pub(crate) registry: Arc<BackendRegistry>,
    pub(crate) super_block: RwLock<SuperBlock>,
    pub(crate) data: RwLock<Box<dyn StorageBackend>>,
    pub(crate) nm: RwLock<NeedleMap>,
    pub(crate) read_only: AtomicBool,
    pub(crate) size_limit: u64,
    pub(crate) last_append_at_ns: AtomicU64,
    pub(crate) vacuum: Mutex<VacuumProgress>,
}

impl std::fmt::Debug for Volume {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Volume")
            .field("id", &self.id)
            .field("collection", &self.collection)
            .field("base_path", &self.base_path)
            .finish_non_exhaustive()
    }
}

pub(crate) fn sibling_path(base: &Path, ext: &str) -> PathBuf {
    let mut os = base.as_os_str().to_os_string();
    os.push(format!(".{ext}"));
    PathBuf::from(os)
}

pub(crate) fn now_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

pub(crate) fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

impl Volume {
    /// Creates a new volume on disk, writing its superblock.
    pub fn create(
        base_path: PathBuf,
        id: VolumeId,
        collection: String,
        registry: Arc<BackendRegistry>,
        backend_name: &str,
        options: VolumeOptions,
        size_limit: u64,
    ) -> CoreResult<Self> {
        let data_path = sibling_path(&base_path, DATA_EXT);
        if data_path.exists() {
            return Err(CoreError::VolumeExists(id));
        }

        let super_block = SuperBlock::new(options.replica_placement, options.ttl);
        let mut data = registry.create(backend_name, &data_path)?;
        data.append(&super_block.to_bytes())?;
        data.flush()?;

        let index = registry.create(backend_name, &sibling_path(&base_path, INDEX_EXT))?;
        let nm = NeedleMap::new(id, super_block.version, index);

        info!(volume_id = %id, path = %data_path.display(), "created volume");
        Ok(Self {
            id,
            collection,
            base_path,
            backend_name: backend_name.to_string(),
            registry,
            super_block: RwLock::new(super_block),
            data: RwLock::new(data),
            nm: RwLock::new(nm),
            read_only: AtomicBool::new(false),
            size_limit,
            last_append_at_ns: AtomicU64::new(0),
            vacuum: Mutex::new(VacuumProgress::default()),
        })
    }

    /// Loads an existing volume, replaying its index.
    pub fn load(
        base_path: PathBuf,
        id: VolumeId,
        collection: String,
        registry: Arc<BackendRegistry>,
        backend_name: &str,
        size_limit: u64,
    ) -> CoreResult<Self> {
        let data = registry.create(backend_name, &sibling_path(&base_path, DATA_EXT))?;
        let super_block = read_super_block(id, data.as_ref())?;

        let index = registry.create(backend_name, &sibling_path(&base_path, INDEX_EXT))?;
        let mut nm = NeedleMap::load(id, super_block.version, index)?;

        let size = data.size()?;
        // The index is a cache over the data log. A missing or empty index
        // next to a non-empty log is rebuilt by replaying the log; the entry
        // appends in put/delete persist the rebuilt index as a side effect.
        if nm.index_size()? == 0 && size > super_block.block_size() {
            info!(volume_id = %id, "index missing, rebuilding from data log");
            let version = super_block.version;
            scan_data_file(id, data.as_ref(), |needle, offset, _record_len| {
                if needle.data.is_empty() && needle.cookie.as_u64() == 0 {
                    if nm.get(needle.id).is_some() {
                        nm.delete(needle.id)?;
                    }
                } else {
                    nm.put(
                        needle.id,
                        NeedleValue {
                            offset: NeedleValue::offset_from_bytes(offset),
                            size: needle.size(version),
                        },
                    )?;
                }
                Ok(())
            })?;
            nm.sync()?;
        }
        let read_only = size >= size_limit;
        debug!(
            volume_id = %id,
            size,
            live = nm.live_count(),
            compact_revision = super_block.compact_revision,
            "loaded volume"
        );
        Ok(Self {
            id,
            collection,
            base_path,
            backend_name: backend_name.to_string(),
            registry,
            super_block: RwLock::new(super_block),
            data: RwLock::new(data),
            nm: RwLock::new(nm),
            read_only: AtomicBool::new(read_only),
            size_limit,
            last_append_at_ns: AtomicU64::new(0),
            vacuum: Mutex::new(VacuumProgress::default()),
        })
    }

    /// The volume id.
    #[must_use]
    pub fn id(&self) -> VolumeId {
        self.id
    }

    /// The collection name.
    #[must_use]
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// The needle format version of this volume.
    #[must_use]
    pub fn version(&self) -> Version {
        self.super_block.read().version
    }

    /// Base path of the volume's files, without extension.
    #[must_use]
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Path of one of the volume's files by extension.
    #[must_use]
    pub fn file_path(&self, ext: &str) -> PathBuf {
        sibling_path(&self.base_path, ext)
    }

    /// Current data file size.
    pub fn size(&self) -> CoreResult<u64> {
        Ok(self.data.read().size()?)
    }

    /// Whether the volume has stopped accepting writes.
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.read_only.load(Ordering::Acquire)
    }

    /// Marks the volume read-only.
    pub fn set_read_only(&self) {
        self.read_only.store(true, Ordering::Release);
    }

    /// Appends a needle record and publishes it in the index.
    ///
    /// The record only becomes visible after the data bytes are flushed; a
    /// failed append truncates the data file back so no partial record is
    /// left behind.
    pub fn append(&self, needle: &Needle) -> CoreResult<AppendOutcome> {
        if self.is_read_only() {
            return Err(CoreError::ReadOnly(self.id));
        }

        let (version, volume_ttl) = {
            let sb = self.super_block.read();
            (sb.version, sb.ttl)
        };

        let mut record = needle.clone();
        if !record.has_ttl() && !volume_ttl.is_empty() {
            record.ttl = volume_ttl;
            record.flags = record.flags.with(NeedleFlags::HAS_TTL);
        }
        let append_at_ns = if version.has_timestamp() {
            now_nanos()
        } else {
            0
        };
        record.append_at_ns = append_at_ns;
        let bytes = encode(&record, version)?;
        let size = record.size(version);

        let offset = {
            let mut data = self.data.write();
            let offset = data.size()?;
            debug_assert_eq!(offset % u64::from(NEEDLE_PADDING_SIZE), 0);
            if offset + bytes.len() as u64 > self.size_limit {
                self.set_read_only();
                return Err(CoreError::VolumeFull {
                    volume_id: self.id,
                    size: offset,
                    limit: self.size_limit,
                });
            }
            if let Err(err) = data.append(&bytes).and_then(|_| data.flush()) {
                // Roll back a partial record before surfacing the failure.
                let _ = data.truncate(offset);
                return Err(err.into());
            }
            offset
        };

        self.nm.write().put(
            record.id,
            NeedleValue {
                offset: NeedleValue::offset_from_bytes(offset),
                size,
            },
        )?;
        self.last_append_at_ns.store(append_at_ns, Ordering::Release);

        Ok(AppendOutcome {
            offset,
            size,
            append_at_ns,
        })
    }

    /// Reads a live needle by id.
    ///
    /// Expiry is resolved lazily here: a needle whose TTL has elapsed is
    /// reported as [`CoreError::Expired`] even though its record and index
    /// entry still exist until the next vacuum.
    pub fn read(&self, id: NeedleId) -> CoreResult<Needle> {
        let value = self.nm.read().get(id).ok_or(CoreError::NotFound {
            volume_id: self.id,
            needle_id: id,
        })?;
        let version = self.version();
        let record_len = actual_size(value.size, version);
        let bytes = self
            .data
            .read()
            .read_at(value.actual_offset(), record_len as usize)?;
        let needle = decode(&bytes, value.size, version)
            .map_err(|err| CoreError::corrupt(self.id, value.actual_offset(), err.to_string()))?;
        if needle.id != id {
            return Err(CoreError::corrupt(
                self.id,
                value.actual_offset(),
                format!("index points at needle {}, expected {id}", needle.id),
            ));
        }
        if needle.is_expired(now_secs()) {
            return Err(CoreError::Expired {
                volume_id: self.id,
                needle_id: id,
            });
        }
        Ok(needle)
    }

    /// Deletes a needle, appending a tombstone record to the log and a
    /// tombstone entry to the index.
    ///
    /// Returns the reclaimed record size, or zero if the needle was already
    /// absent (deletes are idempotent).
    pub fn delete(&self, id: NeedleId) -> CoreResult<u32> {
        if self.is_read_only() {
            return Err(CoreError::ReadOnly(self.id));
        }
        let existing = self.nm.read().get(id);
        let Some(value) = existing else {
            return Ok(0);
        };

        let version = self.version();
        // The log records the deletion too, so an index rebuild from the data
        // file observes it: an empty-data record acts as the log tombstone.
        let mut tombstone = Needle::new(id, Vec::new());
        tombstone.cookie = silo_needle::Cookie::new(0);
        if version.has_timestamp() {
            tombstone.append_at_ns = now_nanos();
        }
        let bytes = encode(&tombstone, version)?;
        {
            let mut data = self.data.write();
            let offset = data.size()?;
            if let Err(err) = data.append(&bytes).and_then(|_| data.flush()) {
                let _ = data.truncate(offset);
                return Err(err.into());
            }
        }
        self.nm.write().delete(id)?;
        Ok(value.size)
    }

    /// Flushes and syncs the data and index files.
    pub fn sync(&self) -> CoreResult<()> {
        {
            let mut data = self.data.write();
            data.flush()?;
            data.sync()?;
        }
        self.nm.write().sync()?;
        Ok(())
    }

    /// Share of the data file occupied by deleted or superseded records.
    pub fn garbage_ratio(&self) -> CoreResult<f64> {
        let counters = self.nm.read().counters();
        let size = self.size()?;
        let content = size.saturating_sub(self.super_block.read().block_size());
        if content == 0 {
            return Ok(0.0);
        }
        Ok(counters.deletion_byte_count as f64 / content as f64)
    }

    /// Builds a status snapshot.
    pub fn status(&self) -> CoreResult<VolumeStatus> {
        let sb = self.super_block.read().clone();
        let counters = self.nm.read().counters();
        let live_count = self.nm.read().live_count();
        Ok(VolumeStatus {
            id: self.id,
            collection: self.collection.clone(),
            version: sb.version.as_byte(),
            replica_placement: sb.replica_placement,
            ttl: sb.ttl.to_string(),
            size: self.size()?,
            live_count,
            file_count: counters.file_count,
            deletion_count: counters.deletion_count,
            deleted_bytes: counters.deletion_byte_count,
            garbage_ratio: self.garbage_ratio()?,
            compact_revision: sb.compact_revision,
            read_only: self.is_read_only(),
            last_append_at_ns: self.last_append_at_ns.load(Ordering::Acquire),
        })
    }

    /// Removes the volume's files from disk. The volume must not be used
    /// afterwards.
    pub fn destroy(&self) -> CoreResult<()> {
        for ext in [DATA_EXT, INDEX_EXT, COMPACT_DATA_EXT, COMPACT_INDEX_EXT] {
            let path = self.file_path(ext);
            if path.exists() {
                fs::remove_file(&path)?;
            }
        }
        info!(volume_id = %self.id, "destroyed volume");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use silo_needle::TtlUnit;

    fn test_volume(dir: &Path, limit: u64) -> Volume {
        let registry = Arc::new(BackendRegistry::with_defaults());
        Volume::create(
            dir.join("7"),
            VolumeId::new(7),
            String::new(),
            registry,
            "file",
            VolumeOptions::default(),
            limit,
        )
        .unwrap()
    }

    #[test]
    fn append_then_read_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let volume = test_volume(dir.path(), u64::MAX);

        let needle = Needle::new(NeedleId::new(42), b"hello needle".to_vec())
            .with_name("greeting.txt")
            .with_mime("text/plain");
        let outcome = volume.append(&needle).unwrap();
        assert_eq!(outcome.offset % 8, 0);
        assert!(outcome.append_at_ns > 0);

        let read = volume.read(NeedleId::new(42)).unwrap();
        assert_eq!(read.data, b"hello needle");
        assert_eq!(read.name, b"greeting.txt");
        assert_eq!(read.cookie, needle.cookie);
    }

    #[test]
    fn records_stay_aligned() {
        let dir = tempfile::tempdir().unwrap();
        let volume = test_volume(dir.path(), u64::MAX);
        for (id, len) in [(1u64, 1usize), (2, 7), (3, 8), (4, 13)] {
            let outcome = volume
                .append(&Needle::new(NeedleId::new(id), vec![0xAB; len]))
                .unwrap();
            assert_eq!(outcome.offset % 8, 0, "record {id} misaligned");
        }
    }

    #[test]
    fn read_missing_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let volume = test_volume(dir.path(), u64::MAX);
        assert!(matches!(
            volume.read(NeedleId::new(99)),
            Err(CoreError::NotFound { .. })
        ));
    }

    #[test]
    fn delete_hides_needle_and_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let volume = test_volume(dir.path(), u64::MAX);
        let needle = Needle::new(NeedleId::new(5), vec![1; 32]);
        volume.append(&needle).unwrap();

        let reclaimed = volume.delete(NeedleId::new(5)).unwrap();
        assert!(reclaimed > 0);
        assert!(matches!(
            volume.read(NeedleId::new(5)),
            Err(CoreError::NotFound { .. })
        ));
        assert_eq!(volume.delete(NeedleId::new(5)).unwrap(), 0);
    }

    #[test]
    fn size_limit_flips_read_only() {
        let dir = tempfile::tempdir().unwrap();
        let volume = test_volume(dir.path(), 128);
        let first = Needle::new(NeedleId::new(1), vec![0; 40]);
        volume.append(&first).unwrap();

        let second = Needle::new(NeedleId::new(2), vec![0; 60]);
        assert!(matches!(
            volume.append(&second),
            Err(CoreError::VolumeFull { .. })
        ));
        assert!(volume.is_read_only());
        assert!(matches!(
            volume.append(&second),
            Err(CoreError::ReadOnly(_))
        ));
        // Reads still work.
        assert!(volume.read(NeedleId::new(1)).is_ok());
    }

    #[test]
    fn reload_replays_index() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(BackendRegistry::with_defaults());
        let base = dir.path().join("9");
        {
            let volume = Volume::create(
                base.clone(),
                VolumeId::new(9),
                String::new(),
                Arc::clone(&registry),
                "file",
                VolumeOptions::default(),
                u64::MAX,
            )
            .unwrap();
            volume
                .append(&Needle::new(NeedleId::new(1), b"one".to_vec()))
                .unwrap();
            volume
                .append(&Needle::new(NeedleId::new(2), b"two".to_vec()))
                .unwrap();
            volume.delete(NeedleId::new(1)).unwrap();
            volume.sync().unwrap();
        }

        let volume = Volume::load(
            base,
            VolumeId::new(9),
            String::new(),
            registry,
            "file",
            u64::MAX,
        )
        .unwrap();
        assert!(matches!(
            volume.read(NeedleId::new(1)),
            Err(CoreError::NotFound { .. })
        ));
        assert_eq!(volume.read(NeedleId::new(2)).unwrap().data, b"two");
    }

    #[test]
    fn missing_index_is_rebuilt_from_data_log() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(BackendRegistry::with_defaults());
        let base = dir.path().join("10");
        {
            let volume = Volume::create(
                base.clone(),
                VolumeId::new(10),
                String::new(),
                Arc::clone(&registry),
                "file",
                VolumeOptions::default(),
                u64::MAX,
            )
            .unwrap();
            volume
                .append(&Needle::new(NeedleId::new(1), b"kept".to_vec()))
                .unwrap();
            volume
                .append(&Needle::new(NeedleId::new(2), b"dropped".to_vec()))
                .unwrap();
            volume.delete(NeedleId::new(2)).unwrap();
            volume.sync().unwrap();
        }
        std::fs::remove_file(sibling_path(&base, INDEX_EXT)).unwrap();

        let volume = Volume::load(
            base.clone(),
            VolumeId::new(10),
            String::new(),
            Arc::clone(&registry),
            "file",
            u64::MAX,
        )
        .unwrap();
        assert_eq!(volume.read(NeedleId::new(1)).unwrap().data, b"kept");
        assert!(matches!(
            volume.read(NeedleId::new(2)),
            Err(CoreError::NotFound { .. })
        ));
        assert_eq!(volume.status().unwrap().live_count, 1);
        volume.sync().unwrap();
        drop(volume);

        // The rebuilt index was persisted: a second load replays it as usual.
        let volume = Volume::load(
            base,
            VolumeId::new(10),
            String::new(),
            registry,
            "file",
            u64::MAX,
        )
        .unwrap();
        assert_eq!(volume.read(NeedleId::new(1)).unwrap().data, b"kept");
        assert!(matches!(
            volume.read(NeedleId::new(2)),
            Err(CoreError::NotFound { .. })
        ));
    }

    #[test]
    fn volume_ttl_is_inherited() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(BackendRegistry::with_defaults());
        let volume = Volume::create(
            dir.path().join("11"),
            VolumeId::new(11),
            String::new(),
            registry,
            "file",
            VolumeOptions {
                ttl: Ttl::new(1, TtlUnit::Hour),
                ..VolumeOptions::default()
            },
            u64::MAX,
        )
        .unwrap();

        volume
            .append(&Needle::new(NeedleId::new(1), b"x".to_vec()))
            .unwrap();
        let read = volume.read(NeedleId::new(1)).unwrap();
        assert!(read.has_ttl());
        assert_eq!(read.ttl, Ttl::new(1, TtlUnit::Hour));
    }

    #[test]
    fn expired_needle_reports_expired() {
        let dir = tempfile::tempdir().unwrap();
        let volume = test_volume(dir.path(), u64::MAX);
        let needle = Needle::new(NeedleId::new(4), b"short lived".to_vec())
            .with_ttl(Ttl::new(1, TtlUnit::Minute))
            .with_last_modified(1); // long in the past
        volume.append(&needle).unwrap();
        assert!(matches!(
            volume.read(NeedleId::new(4)),
            Err(CoreError::Expired { .. })
        ));
    }

    #[test]
    fn create_twice_fails() {
        let dir = tempfile::tempdir().unwrap();
        let _volume = test_volume(dir.path(), u64::MAX);
        let registry = Arc::new(BackendRegistry::with_defaults());
        assert!(matches!(
            Volume::create(
                dir.path().join("7"),
                VolumeId::new(7),
                String::new(),
                registry,
                "file",
                VolumeOptions::default(),
                u64::MAX,
            ),
            Err(CoreError::VolumeExists(_))
        ));
    }
}
