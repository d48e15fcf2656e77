//! The store: every volume and erasure-coded volume served by one process.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{info, warn};

use crate::cluster::{EcShardClient, PeerLookup};
use crate::config::StoreConfig;
use crate::dir::StoreDir;
use crate::ec::{
    self, apply_deletion_journal, encode_volume, local_shard_ids, rebuild_missing_shards,
    EcEncodeOutcome, EcGeometry, EcVolume, ShardBits, DATA_SHARD_COUNT,
};
use crate::error::{CoreError, CoreResult};
use crate::index::NeedleValue;
use crate::super_block::read_super_block;
use crate::throttle::WriteThrottler;
use crate::types::{ShardId, VolumeId};
use crate::volume::{
    AppendOutcome, VacuumState, Volume, VolumeOptions, VolumeStatus, VolumeWriter, DATA_EXT,
    INDEX_EXT,
};
use silo_needle::{Cookie, Needle, NeedleId};
use silo_storage::{BackendRegistry, FileBackend, StorageBackend};

/// Default chunk size of [`Store::copy_file_range`] streams.
const COPY_CHUNK_SIZE: usize = 256 * 1024;

struct VolumeHandle {
    volume: Arc<Volume>,
    writer: VolumeWriter,
}

/// Aggregate status of a store.
#[derive(Debug, Clone, Serialize)]
pub struct StoreStatus {
    /// Store directory.
    pub dir: PathBuf,
    /// Status of every mounted volume.
    pub volumes: Vec<VolumeStatus>,
    /// Mounted erasure-coded volumes and their local shard counts.
    pub ec_volumes: Vec<(VolumeId, usize)>,
}

/// A volume store rooted at one locked directory.
///
/// Regular volumes take mutations through their writer queues; reads go to
/// whichever kind of volume (regular or erasure-coded) holds the id.
pub struct Store {
    dir: StoreDir,
    config: StoreConfig,
    registry: Arc<BackendRegistry>,
    geometry: EcGeometry,
    volumes: RwLock<HashMap<VolumeId, Arc<VolumeHandle>>>,
    ec_volumes: RwLock<HashMap<VolumeId, Arc<EcVolume>>>,
    peer_lookup: Option<Arc<dyn PeerLookup>>,
    ec_client: Option<Arc<dyn EcShardClient>>,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("dir", &self.dir.path())
            .field("volumes", &self.volumes.read().len())
            .field("ec_volumes", &self.ec_volumes.read().len())
            .finish_non_exhaustive()
    }
}

impl Store {
    /// Opens a store over a directory, taking its exclusive lock.
    pub fn open(path: impl AsRef<Path>, config: StoreConfig) -> CoreResult<Self> {
        let dir = StoreDir::open(path)?;
        let registry = Arc::new(BackendRegistry::with_defaults());
        if !registry.contains(&config.backend) {
            return Err(CoreError::InvalidOperation(format!(
                "unknown backend {:?}",
                config.backend
            )));
        }
        info!(dir = %dir.path().display(), "opened store");
        Ok(Self {
            dir,
            config,
            registry,
            geometry: EcGeometry::default(),
            volumes: RwLock::new(HashMap::new()),
            ec_volumes: RwLock::new(HashMap::new()),
            peer_lookup: None,
            ec_client: None,
        })
    }

    /// Injects a topology lookup.
    #[must_use]
    pub fn with_peer_lookup(mut self, lookup: Arc<dyn PeerLookup>) -> Self {
        self.peer_lookup = Some(lookup);
        self
    }

    /// Injects a client for remote shard operations.
    #[must_use]
    pub fn with_ec_client(mut self, client: Arc<dyn EcShardClient>) -> Self {
        self.ec_client = Some(client);
        self
    }

    /// Overrides the erasure-coding geometry. Meant for tests; production
    /// stores keep the wire-format block sizes.
    #[must_use]
    pub fn with_ec_geometry(mut self, geometry: EcGeometry) -> Self {
        self.geometry = geometry;
        self
    }

    /// The store directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    fn handle(&self, volume_id: VolumeId) -> CoreResult<Arc<VolumeHandle>> {
        self.volumes
            .read()
            .get(&volume_id)
            .cloned()
            .ok_or(CoreError::VolumeNotFound(volume_id))
    }

    fn ec_volume(&self, volume_id: VolumeId) -> Option<Arc<EcVolume>> {
        self.ec_volumes.read().get(&volume_id).cloned()
    }

    /// Creates and mounts a new volume.
    pub fn create_volume(
        &self,
        volume_id: VolumeId,
        collection: &str,
        options: VolumeOptions,
    ) -> CoreResult<()> {
        if self.volumes.read().contains_key(&volume_id) {
            return Err(CoreError::VolumeExists(volume_id));
        }
        let base = self.dir.volume_base(collection, volume_id);
        let volume = Arc::new(Volume::create(
            base,
            volume_id,
            collection.to_string(),
            Arc::clone(&self.registry),
            &self.config.backend,
            options,
            self.config.volume_size_limit,
        )?);
        let writer = VolumeWriter::spawn(Arc::clone(&volume), self.config.writer_queue_depth);
        self.volumes
            .write()
            .insert(volume_id, Arc::new(VolumeHandle { volume, writer }));
        Ok(())
    }

    /// Loads and mounts an existing volume from disk.
    pub fn load_volume(&self, volume_id: VolumeId, collection: &str) -> CoreResult<()> {
        if self.volumes.read().contains_key(&volume_id) {
            return Err(CoreError::VolumeExists(volume_id));
        }
        let base = self.dir.volume_base(collection, volume_id);
        let volume = Arc::new(Volume::load(
            base,
            volume_id,
            collection.to_string(),
            Arc::clone(&self.registry),
            &self.config.backend,
            self.config.volume_size_limit,
        )?);
        let writer = VolumeWriter::spawn(Arc::clone(&volume), self.config.writer_queue_depth);
        self.volumes
            .write()
            .insert(volume_id, Arc::new(VolumeHandle { volume, writer }));
        Ok(())
    }

    /// Unmounts a volume, draining its writer queue first.
    pub fn unmount_volume(&self, volume_id: VolumeId) -> CoreResult<()> {
        let handle = self
            .volumes
            .write()
            .remove(&volume_id)
            .ok_or(CoreError::VolumeNotFound(volume_id))?;
        drop(handle);
        Ok(())
    }

    /// Unmounts a volume and deletes its files.
    pub fn destroy_volume(&self, volume_id: VolumeId) -> CoreResult<()> {
        let handle = self
            .volumes
            .write()
            .remove(&volume_id)
            .ok_or(CoreError::VolumeNotFound(volume_id))?;
        let volume = Arc::clone(&handle.volume);
        drop(handle);
        volume.destroy()
    }

    /// Whether the store serves this volume id, regular or erasure-coded.
    #[must_use]
    pub fn has_volume(&self, volume_id: VolumeId) -> bool {
        self.volumes.read().contains_key(&volume_id)
            || self.ec_volumes.read().contains_key(&volume_id)
    }

    /// Appends a needle through the volume's writer queue.
    pub fn put(&self, volume_id: VolumeId, needle: Needle) -> CoreResult<AppendOutcome> {
        self.handle(volume_id)?.writer.append(needle)
    }

    /// Reads a needle from a regular or erasure-coded volume.
    pub fn get(&self, volume_id: VolumeId, needle_id: NeedleId) -> CoreResult<Needle> {
        if let Ok(handle) = self.handle(volume_id) {
            return handle.volume.read(needle_id);
        }
        if let Some(ec) = self.ec_volume(volume_id) {
            return ec.read_needle(needle_id);
        }
        Err(CoreError::VolumeNotFound(volume_id))
    }

    /// Reads a needle and verifies the caller's cookie.
    pub fn get_verified(
        &self,
        volume_id: VolumeId,
        needle_id: NeedleId,
        cookie: Cookie,
    ) -> CoreResult<Needle> {
        let needle = self.get(volume_id, needle_id)?;
        if needle.cookie != cookie {
            return Err(CoreError::CookieMismatch {
                needle_id,
                expected: needle.cookie.as_u64(),
                actual: cookie.as_u64(),
            });
        }
        Ok(needle)
    }

    /// Reads a byte range of a needle's data.
    pub fn get_range(
        &self,
        volume_id: VolumeId,
        needle_id: NeedleId,
        offset: u64,
        length: usize,
    ) -> CoreResult<Vec<u8>> {
        let needle = self.get(volume_id, needle_id)?;
        let start = offset as usize;
        let end = start.saturating_add(length);
        if start > needle.data.len() || end > needle.data.len() {
            return Err(CoreError::InvalidOperation(format!(
                "range {offset}+{length} exceeds needle data of {} bytes",
                needle.data.len()
            )));
        }
        Ok(needle.data[start..end].to_vec())
    }

    /// Deletes a needle, returning the reclaimed record size.
    ///
    /// On a regular volume the delete goes through the writer queue. On an
    /// erasure-coded volume the delete is journaled locally and fanned out to
    /// peers holding shards; it counts as durable once the needle's data
    /// shard or at least one parity shard acknowledged it.
    pub fn delete(&self, volume_id: VolumeId, needle_id: NeedleId) -> CoreResult<u32> {
        if let Ok(handle) = self.handle(volume_id) {
            return handle.writer.delete(needle_id);
        }
        if let Some(ec) = self.ec_volume(volume_id) {
            return self.delete_ec_needle(&ec, needle_id);
        }
        Err(CoreError::VolumeNotFound(volume_id))
    }

    fn delete_ec_needle(&self, ec: &EcVolume, needle_id: NeedleId) -> CoreResult<u32> {
        let Some(value) = ec.find_needle(needle_id)? else {
            return Ok(0);
        };
        let primary_shard = primary_data_shard(ec, value, &self.geometry);
        let local = ec.shard_bits();
        let reclaimed = ec.delete_needle(needle_id)?;

        let mut primary_reached = local.has(primary_shard);
        let mut parity_reached =
            (DATA_SHARD_COUNT..ec::TOTAL_SHARD_COUNT).any(|raw| local.has(ShardId::new(raw as u8)));

        if let Some(client) = &self.ec_client {
            for raw in 0..ec::TOTAL_SHARD_COUNT as u8 {
                let shard = ShardId::new(raw);
                if local.has(shard) {
                    continue;
                }
                for server in ec.shard_locations(shard) {
                    match client.delete_needle(&server, ec.id(), ec.collection(), needle_id) {
                        Ok(()) => {
                            if shard == primary_shard {
                                primary_reached = true;
                            }
                            if shard.as_usize() >= DATA_SHARD_COUNT {
                                parity_reached = true;
                            }
                            break;
                        }
                        Err(err) => {
                            warn!(volume_id = %ec.id(), %shard, server, %err, "peer delete failed");
                        }
                    }
                }
            }
        }

        if primary_reached || parity_reached {
            Ok(reclaimed)
        } else {
            Err(CoreError::InvalidOperation(format!(
                "delete of needle {needle_id} reached neither its data shard nor any parity shard"
            )))
        }
    }

    /// Status snapshot of one volume.
    pub fn volume_status(&self, volume_id: VolumeId) -> CoreResult<VolumeStatus> {
        self.handle(volume_id)?.volume.status()
    }

    /// Status snapshot of the whole store.
    pub fn status(&self) -> CoreResult<StoreStatus> {
        let mut volumes = Vec::new();
        for handle in self.volumes.read().values() {
            volumes.push(handle.volume.status()?);
        }
        volumes.sort_by_key(|status| status.id);
        let mut ec_volumes: Vec<(VolumeId, usize)> = self
            .ec_volumes
            .read()
            .values()
            .map(|ec| (ec.id(), ec.shard_bits().count()))
            .collect();
        ec_volumes.sort_by_key(|(id, _)| *id);
        Ok(StoreStatus {
            dir: self.dir.path().to_path_buf(),
            volumes,
            ec_volumes,
        })
    }

    /// Syncs a volume's files through its writer queue.
    pub fn sync_volume(&self, volume_id: VolumeId) -> CoreResult<()> {
        self.handle(volume_id)?.writer.sync()
    }

    /// Stages a vacuum if the volume's garbage ratio warrants one.
    ///
    /// Returns whether compaction was staged. `threshold` defaults to the
    /// store's configured garbage threshold.
    pub fn start_vacuum(&self, volume_id: VolumeId, threshold: Option<f64>) -> CoreResult<bool> {
        let handle = self.handle(volume_id)?;
        let threshold = threshold.unwrap_or(self.config.garbage_threshold);
        if !handle.volume.needs_vacuum(threshold)? {
            return Ok(false);
        }
        handle.volume.compact()?;
        Ok(true)
    }

    /// Commits a staged vacuum through the writer queue, so the swap runs
    /// with no mutation in flight.
    pub fn commit_vacuum(&self, volume_id: VolumeId) -> CoreResult<u16> {
        self.handle(volume_id)?.writer.commit_vacuum()
    }

    /// Removes vacuum staging files and returns the cycle to idle.
    pub fn cleanup_vacuum(&self, volume_id: VolumeId) -> CoreResult<()> {
        self.handle(volume_id)?.volume.cleanup_compact()
    }

    /// Vacuum phase of a volume.
    pub fn vacuum_state(&self, volume_id: VolumeId) -> CoreResult<VacuumState> {
        Ok(self.handle(volume_id)?.volume.vacuum_state())
    }

    /// Erasure-codes a sealed volume into shards and mounts the result.
    ///
    /// The volume is marked read-only, encoded, then unmounted as a regular
    /// volume and remounted as an erasure-coded one. Its `.dat`/`.idx` files
    /// stay on disk until [`Store::drop_encoded_data_file`] removes them.
    pub fn seal_to_shards(&self, volume_id: VolumeId) -> CoreResult<EcEncodeOutcome> {
        let handle = self.handle(volume_id)?;
        handle.volume.set_read_only();
        handle.writer.sync()?;

        let base = handle.volume.base_path().to_path_buf();
        let collection = handle.volume.collection().to_string();
        let outcome = encode_volume(&base, volume_id, &self.geometry)?;

        self.volumes.write().remove(&volume_id);
        drop(handle);

        let ec = EcVolume::load(
            base,
            volume_id,
            collection,
            Arc::clone(&self.registry),
            &self.config.backend,
            self.geometry,
        )?;
        self.ec_volumes.write().insert(volume_id, Arc::new(ec));
        Ok(outcome)
    }

    /// Removes the `.dat`/`.idx` pair left behind by [`Store::seal_to_shards`]
    /// once the shards are safely placed.
    pub fn drop_encoded_data_file(&self, volume_id: VolumeId) -> CoreResult<()> {
        let ec = self
            .ec_volume(volume_id)
            .ok_or(CoreError::VolumeNotFound(volume_id))?;
        for ext in [DATA_EXT, INDEX_EXT] {
            let mut os = ec.base_path().as_os_str().to_os_string();
            os.push(format!(".{ext}"));
            let path = PathBuf::from(os);
            if path.exists() {
                std::fs::remove_file(&path)?;
            }
        }
        Ok(())
    }

    /// Mounts an erasure-coded volume from its sidecars and local shards.
    pub fn mount_ec_volume(&self, volume_id: VolumeId, collection: &str) -> CoreResult<()> {
        if self.ec_volumes.read().contains_key(&volume_id) {
            return Err(CoreError::VolumeExists(volume_id));
        }
        let base = self.dir.volume_base(collection, volume_id);
        apply_deletion_journal(&base, volume_id)?;
        let ec = EcVolume::load(
            base,
            volume_id,
            collection.to_string(),
            Arc::clone(&self.registry),
            &self.config.backend,
            self.geometry,
        )?;
        if let Some(lookup) = &self.peer_lookup {
            for (shard, servers) in lookup.shard_locations(volume_id) {
                for server in servers {
                    ec.register_shard_location(shard, &server);
                }
            }
        }
        self.ec_volumes.write().insert(volume_id, Arc::new(ec));
        Ok(())
    }

    /// Unmounts an erasure-coded volume, leaving its files on disk.
    pub fn unmount_ec_volume(&self, volume_id: VolumeId) -> CoreResult<()> {
        self.ec_volumes
            .write()
            .remove(&volume_id)
            .ok_or(CoreError::VolumeNotFound(volume_id))?;
        Ok(())
    }

    /// Local shard set of an erasure-coded volume.
    pub fn ec_shard_bits(&self, volume_id: VolumeId) -> CoreResult<ShardBits> {
        Ok(self
            .ec_volume(volume_id)
            .ok_or(CoreError::VolumeNotFound(volume_id))?
            .shard_bits())
    }

    /// Repairs an erasure-coded volume's missing shards.
    ///
    /// Fetches shards from peers until at least 10 are local, recomputes the
    /// rest, and mounts everything rebuilt. Fails with
    /// [`CoreError::Unrepairable`] if fewer than 10 shards can be gathered.
    pub fn rebuild_ec_shards(&self, volume_id: VolumeId) -> CoreResult<Vec<ShardId>> {
        let ec = self
            .ec_volume(volume_id)
            .ok_or(CoreError::VolumeNotFound(volume_id))?;
        let base = ec.base_path().to_path_buf();

        let mut local = local_shard_ids(&base);
        if local.count() < DATA_SHARD_COUNT {
            if let Some(client) = &self.ec_client {
                for raw in 0..ec::TOTAL_SHARD_COUNT as u8 {
                    if local.count() >= DATA_SHARD_COUNT {
                        break;
                    }
                    let shard = ShardId::new(raw);
                    if local.has(shard) {
                        continue;
                    }
                    let destination = shard_path(&base, shard);
                    for server in ec.shard_locations(shard) {
                        match client.copy_shard(
                            &server,
                            volume_id,
                            ec.collection(),
                            shard,
                            &destination,
                        ) {
                            Ok(bytes) => {
                                info!(%volume_id, %shard, server, bytes, "fetched shard from peer");
                                local = local.with(shard);
                                break;
                            }
                            Err(err) => {
                                warn!(%volume_id, %shard, server, %err, "shard fetch failed");
                                let _ = std::fs::remove_file(&destination);
                            }
                        }
                    }
                }
            }
        }
        if local.count() < DATA_SHARD_COUNT {
            return Err(CoreError::Unrepairable {
                volume_id,
                available: local.count(),
                required: DATA_SHARD_COUNT,
            });
        }

        let rebuilt = rebuild_missing_shards(&base, volume_id)?;
        for shard in local.minus(ec.shard_bits()).ids() {
            ec.mount_shard(shard)?;
        }
        for shard in &rebuilt {
            ec.mount_shard(*shard)?;
        }
        Ok(rebuilt)
    }

    /// Streams a byte range of one of a volume's files in throttled chunks.
    ///
    /// For `.dat` files, `expected_compact_revision` guards against copying
    /// across a vacuum: the stream is refused if the volume's revision moved.
    pub fn copy_file_range(
        &self,
        volume_id: VolumeId,
        collection: &str,
        ext: &str,
        expected_compact_revision: Option<u16>,
        offset: u64,
        stop_offset: Option<u64>,
    ) -> CoreResult<FileRangeStream> {
        let base = self.dir.volume_base(collection, volume_id);
        let path = shard_like_path(&base, ext);
        let backend = FileBackend::open_existing(&path)?;

        if let Some(expected) = expected_compact_revision {
            if ext == DATA_EXT {
                let actual = read_super_block(volume_id, &backend)?.compact_revision;
                if actual != expected {
                    return Err(CoreError::CompactRevisionMismatch {
                        volume_id,
                        expected,
                        actual,
                    });
                }
            }
        }

        let size = backend.size()?;
        let stop = stop_offset.unwrap_or(size).min(size);
        Ok(FileRangeStream {
            backend,
            position: offset.min(stop),
            stop,
            chunk_size: COPY_CHUNK_SIZE,
            throttler: WriteThrottler::new(self.config.copy_bytes_per_second),
        })
    }
}

fn shard_like_path(base: &Path, ext: &str) -> PathBuf {
    let mut os = base.as_os_str().to_os_string();
    os.push(format!(".{ext}"));
    os.into()
}

fn shard_path(base: &Path, shard: ShardId) -> PathBuf {
    shard_like_path(base, &ec::shard_file_ext(shard))
}

/// The needle's first data shard, the one that must acknowledge a delete.
fn primary_data_shard(ec: &EcVolume, value: NeedleValue, geometry: &EcGeometry) -> ShardId {
    let intervals = ec::locate(ec.info().dat_size, value.actual_offset(), 1, geometry);
    intervals
        .first()
        .map(|iv| iv.shard_location(geometry).0)
        .unwrap_or(ShardId::new(0))
}

/// Throttled chunked reader over one volume file, for peer-to-peer copies.
pub struct FileRangeStream {
    backend: FileBackend,
    position: u64,
    stop: u64,
    chunk_size: usize,
    throttler: WriteThrottler,
}

impl FileRangeStream {
    /// Total bytes remaining in the stream.
    #[must_use]
    pub fn remaining(&self) -> u64 {
        self.stop - self.position
    }
}

impl Iterator for FileRangeStream {
    type Item = CoreResult<Bytes>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.position >= self.stop {
            return None;
        }
        let len = ((self.stop - self.position) as usize).min(self.chunk_size);
        match self.backend.read_at(self.position, len) {
            Ok(bytes) => {
                self.position += len as u64;
                self.throttler.throttle(len as u64);
                Some(Ok(Bytes::from(bytes)))
            }
            Err(err) => {
                self.position = self.stop;
                Some(Err(err.into()))
            }
        }
    }
}
