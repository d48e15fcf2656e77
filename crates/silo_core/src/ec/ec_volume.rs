//! Serving reads and deletes from erasure shards.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use crate::ec::{
    locate, shard_file_ext, EcGeometry, ShardBits, VolumeInfo, ECJ_EXT, ECX_EXT,
    TOTAL_SHARD_COUNT, VIF_EXT,
};
use crate::error::{CoreError, CoreResult};
use crate::index::{decode_index_entry, NeedleValue, INDEX_ENTRY_SIZE};
use crate::types::{ShardId, VolumeId};
use crate::volume::now_secs;
use silo_needle::{actual_size, decode, Needle, NeedleId, TOMBSTONE_SIZE};
use silo_storage::{BackendRegistry, StorageBackend};

fn sibling(base: &Path, ext: &str) -> PathBuf {
    let mut os = base.as_os_str().to_os_string();
    os.push(format!(".{ext}"));
    os.into()
}

/// Binary search over a sorted index backend.
///
/// Returns the entry and its byte offset in the file, tombstoned or not.
fn search_sorted_index(
    index: &dyn StorageBackend,
    id: NeedleId,
) -> CoreResult<Option<(NeedleValue, u64)>> {
    let entries = index.size()? / INDEX_ENTRY_SIZE as u64;
    let mut lo = 0u64;
    let mut hi = entries;
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        let raw = index.read_at(mid * INDEX_ENTRY_SIZE as u64, INDEX_ENTRY_SIZE)?;
        let (entry_id, offset, size) = decode_index_entry(raw.as_slice().try_into().unwrap());
        if entry_id == id {
            return Ok(Some((NeedleValue { offset, size }, mid * INDEX_ENTRY_SIZE as u64)));
        }
        if entry_id < id {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }
    Ok(None)
}

/// An erasure-coded volume: shards, sorted index, and deletion journal.
///
/// Shard content is immutable once written; the only mutation is marking a
/// needle deleted, which journals the id in `.ecj` and tombstones its `.ecx`
/// entry in place. Not every shard is local; the location map remembers which
/// peers hold the rest.
pub struct EcVolume {
    id: VolumeId,
    collection: String,
    base_path: PathBuf,
    geometry: EcGeometry,
    info: VolumeInfo,
    registry: Arc<BackendRegistry>,
    backend_name: String,
    shards: RwLock<HashMap<ShardId, Box<dyn StorageBackend>>>,
    ecx: RwLock<Box<dyn StorageBackend>>,
    ecj: Mutex<Box<dyn StorageBackend>>,
    locations: RwLock<HashMap<ShardId, Vec<String>>>,
}

impl std::fmt::Debug for EcVolume {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EcVolume")
            .field("id", &self.id)
            .field("base_path", &self.base_path)
            .field("shard_bits", &self.shard_bits().to_string())
            .finish_non_exhaustive()
    }
}

impl EcVolume {
    /// Loads an erasure-coded volume, mounting every shard file found next to
    /// its sidecars.
    pub fn load(
        base_path: PathBuf,
        id: VolumeId,
        collection: String,
        registry: Arc<BackendRegistry>,
        backend_name: &str,
        geometry: EcGeometry,
    ) -> CoreResult<Self> {
        let ecx_path = sibling(&base_path, ECX_EXT);
        if !ecx_path.exists() {
            return Err(CoreError::InvalidOperation(format!(
                "volume {id} has no sorted index at {}",
                ecx_path.display()
            )));
        }
        let info = VolumeInfo::load(id, &sibling(&base_path, VIF_EXT))?;
        let ecx = registry.create(backend_name, &ecx_path)?;
        let ecj = registry.create(backend_name, &sibling(&base_path, ECJ_EXT))?;

        let mut shards = HashMap::new();
        for raw in 0..TOTAL_SHARD_COUNT as u8 {
            let shard = ShardId::new(raw);
            let path = sibling(&base_path, &shard_file_ext(shard));
            if path.exists() {
                shards.insert(shard, registry.create(backend_name, &path)?);
            }
        }

        debug!(
            volume_id = %id,
            dat_size = info.dat_size,
            local_shards = shards.len(),
            "loaded erasure-coded volume"
        );
        Ok(Self {
            id,
            collection,
            base_path,
            geometry,
            info,
            registry,
            backend_name: backend_name.to_string(),
            shards: RwLock::new(shards),
            ecx: RwLock::new(ecx),
            ecj: Mutex::new(ecj),
            locations: RwLock::new(HashMap::new()),
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

    /// Base path of the volume's files.
    #[must_use]
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Sidecar metadata the shards were cut against.
    #[must_use]
    pub fn info(&self) -> VolumeInfo {
        self.info
    }

    /// The locally mounted shards.
    #[must_use]
    pub fn shard_bits(&self) -> ShardBits {
        self.shards.read().keys().copied().collect()
    }

    /// Mounts a shard file that appeared next to the volume.
    pub fn mount_shard(&self, shard: ShardId) -> CoreResult<()> {
        let path = sibling(&self.base_path, &shard_file_ext(shard));
        if !path.exists() {
            return Err(CoreError::ShardNotLocated {
                volume_id: self.id,
                shard_id: shard.as_u8(),
            });
        }
        let backend = self.registry.create(&self.backend_name, &path)?;
        self.shards.write().insert(shard, backend);
        info!(volume_id = %self.id, %shard, "mounted shard");
        Ok(())
    }

    /// Unmounts a shard, leaving its file on disk.
    pub fn unmount_shard(&self, shard: ShardId) {
        self.shards.write().remove(&shard);
        info!(volume_id = %self.id, %shard, "unmounted shard");
    }

    /// Records that `server` holds `shard`.
    pub fn register_shard_location(&self, shard: ShardId, server: &str) {
        let mut locations = self.locations.write();
        let servers = locations.entry(shard).or_default();
        if !servers.iter().any(|s| s == server) {
            servers.push(server.to_string());
        }
    }

    /// Forgets that `server` holds `shard`.
    pub fn unregister_shard_location(&self, shard: ShardId, server: &str) {
        let mut locations = self.locations.write();
        if let Some(servers) = locations.get_mut(&shard) {
            servers.retain(|s| s != server);
            if servers.is_empty() {
                locations.remove(&shard);
            }
        }
    }

    /// Known peer locations of `shard`.
    #[must_use]
    pub fn shard_locations(&self, shard: ShardId) -> Vec<String> {
        self.locations
            .read()
            .get(&shard)
            .cloned()
            .unwrap_or_default()
    }

    /// Looks up a needle in the sorted index.
    ///
    /// Returns `None` for unknown and tombstoned needles alike.
    pub fn find_needle(&self, id: NeedleId) -> CoreResult<Option<NeedleValue>> {
        let ecx = self.ecx.read();
        match search_sorted_index(ecx.as_ref(), id)? {
            Some((value, _)) if value.size != TOMBSTONE_SIZE => Ok(Some(value)),
            _ => Ok(None),
        }
    }

    /// Reads a needle by gathering its extent from local shards.
    ///
    /// Every interval of the record must map to a mounted shard; otherwise
    /// the caller is expected to fetch from a peer that has it.
    pub fn read_needle(&self, id: NeedleId) -> CoreResult<Needle> {
        let value = self.find_needle(id)?.ok_or(CoreError::NotFound {
            volume_id: self.id,
            needle_id: id,
        })?;
        let version = self.info.version;
        let record_len = actual_size(value.size, version);
        let intervals = locate(
            self.info.dat_size,
            value.actual_offset(),
            record_len,
            &self.geometry,
        );

        let mut record = Vec::with_capacity(record_len as usize);
        let shards = self.shards.read();
        for interval in intervals {
            let (shard, offset) = interval.shard_location(&self.geometry);
            let backend = shards.get(&shard).ok_or(CoreError::ShardNotLocated {
                volume_id: self.id,
                shard_id: shard.as_u8(),
            })?;
            record.extend_from_slice(&backend.read_at(offset, interval.size as usize)?);
        }
        drop(shards);

        let needle = decode(&record, value.size, version)
            .map_err(|err| CoreError::corrupt(self.id, value.actual_offset(), err.to_string()))?;
        if needle.id != id {
            return Err(CoreError::corrupt(
                self.id,
                value.actual_offset(),
                format!("sorted index points at needle {}, expected {id}", needle.id),
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

    /// Marks a needle deleted: journals the id, then tombstones its sorted
    /// index entry in place.
    ///
    /// Returns the reclaimed size, or zero if the needle was already gone.
    /// Shard data is untouched; the space comes back when the volume is
    /// re-encoded.
    pub fn delete_needle(&self, id: NeedleId) -> CoreResult<u32> {
        let found = {
            let ecx = self.ecx.read();
            search_sorted_index(ecx.as_ref(), id)?
        };
        let Some((value, entry_offset)) = found else {
            return Ok(0);
        };
        if value.size == TOMBSTONE_SIZE {
            return Ok(0);
        }

        // Journal first: a crash after the journal entry but before the
        // in-place mark is healed by replaying the journal.
        {
            let mut ecj = self.ecj.lock();
            ecj.append(&id.as_u64().to_le_bytes())?;
            ecj.flush()?;
            ecj.sync()?;
        }
        {
            let mut ecx = self.ecx.write();
            ecx.write_at(entry_offset + 12, &TOMBSTONE_SIZE.to_le_bytes())?;
            ecx.flush()?;
            ecx.sync()?;
        }
        debug!(volume_id = %self.id, needle_id = %id, "marked needle deleted");
        Ok(value.size)
    }

    /// Removes every file of the erasure-coded volume.
    pub fn destroy(&self) -> CoreResult<()> {
        for raw in 0..TOTAL_SHARD_COUNT as u8 {
            let path = sibling(&self.base_path, &shard_file_ext(ShardId::new(raw)));
            if path.exists() {
                fs::remove_file(&path)?;
            }
        }
        for ext in [ECX_EXT, ECJ_EXT, VIF_EXT] {
            let path = sibling(&self.base_path, ext);
            if path.exists() {
                fs::remove_file(&path)?;
            }
        }
        info!(volume_id = %self.id, "destroyed erasure-coded volume");
        Ok(())
    }
}

/// Replays the deletion journal onto the sorted index, then clears it.
///
/// Used after copying `.ecx` from a peer, whose copy may predate local
/// deletions. Idempotent: tombstoning an already tombstoned entry changes
/// nothing, so replaying twice is harmless.
pub fn apply_deletion_journal(base_path: &Path, volume_id: VolumeId) -> CoreResult<usize> {
    let ecj_path = sibling(base_path, ECJ_EXT);
    if !ecj_path.exists() {
        return Ok(0);
    }
    let journal = fs::read(&ecj_path)?;
    if journal.len() % 8 != 0 {
        return Err(CoreError::corrupt(
            volume_id,
            journal.len() as u64,
            "deletion journal size is not a multiple of 8",
        ));
    }

    let mut ecx = silo_storage::FileBackend::open_existing(&sibling(base_path, ECX_EXT))?;
    let mut applied = 0usize;
    for raw in journal.chunks_exact(8) {
        let id = NeedleId::new(u64::from_le_bytes(raw.try_into().unwrap()));
        if let Some((value, entry_offset)) = search_sorted_index(&ecx, id)? {
            if value.size != TOMBSTONE_SIZE {
                ecx.write_at(entry_offset + 12, &TOMBSTONE_SIZE.to_le_bytes())?;
                applied += 1;
            }
        }
    }
    ecx.flush()?;
    ecx.sync()?;
    fs::write(&ecj_path, [])?;
    Ok(applied)
}
