//! The needle index: an in-memory map of needle id to log position, mirrored
//! by an append-only `.idx` file.
//!
//! Each entry is 16 bytes: needle id (8), offset in 8-byte units (4), size
//! (4), all little-endian. The file is a change log, not a snapshot: replay
//! applies entries in order and the last entry per id wins. A size equal to
//! the tombstone sentinel marks a deletion. The index is a cache over the
//! data log and can always be rebuilt by scanning it.

use std::collections::HashMap;

use crate::error::{CoreError, CoreResult};
use crate::types::VolumeId;
use silo_needle::{actual_size, NeedleId, Version, NEEDLE_PADDING_SIZE, TOMBSTONE_SIZE};
use silo_storage::StorageBackend;

/// Size of one index entry in bytes.
pub const INDEX_ENTRY_SIZE: usize = 16;

/// Position and size of a live needle inside the data log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NeedleValue {
    /// Offset of the record in units of the 8-byte alignment boundary.
    pub offset: u32,
    /// Value of the record's size field.
    pub size: u32,
}

impl NeedleValue {
    /// Byte offset of the record in the data file.
    #[must_use]
    pub const fn actual_offset(self) -> u64 {
        self.offset as u64 * NEEDLE_PADDING_SIZE as u64
    }

    /// Converts a byte offset into alignment units.
    ///
    /// The caller must only pass aligned offsets; every record the engine
    /// writes starts on an 8-byte boundary.
    #[must_use]
    pub const fn offset_from_bytes(byte_offset: u64) -> u32 {
        (byte_offset / NEEDLE_PADDING_SIZE as u64) as u32
    }
}

/// Encodes one index entry.
#[must_use]
pub fn encode_index_entry(id: NeedleId, offset: u32, size: u32) -> [u8; INDEX_ENTRY_SIZE] {
    let mut buf = [0u8; INDEX_ENTRY_SIZE];
    buf[0..8].copy_from_slice(&id.as_u64().to_le_bytes());
    buf[8..12].copy_from_slice(&offset.to_le_bytes());
    buf[12..16].copy_from_slice(&size.to_le_bytes());
    buf
}

/// Decodes one index entry.
#[must_use]
pub fn decode_index_entry(buf: &[u8; INDEX_ENTRY_SIZE]) -> (NeedleId, u32, u32) {
    let id = u64::from_le_bytes(buf[0..8].try_into().unwrap());
    let offset = u32::from_le_bytes(buf[8..12].try_into().unwrap());
    let size = u32::from_le_bytes(buf[12..16].try_into().unwrap());
    (NeedleId::new(id), offset, size)
}

/// Visits every entry of an index backend in file order.
pub fn walk_index(
    backend: &dyn StorageBackend,
    mut visit: impl FnMut(NeedleId, u32, u32) -> CoreResult<()>,
) -> CoreResult<()> {
    const CHUNK_ENTRIES: usize = 1024;
    let total = backend.size()?;
    let mut offset = 0u64;
    while offset < total {
        let want = ((total - offset) as usize).min(CHUNK_ENTRIES * INDEX_ENTRY_SIZE);
        let chunk = backend.read_at(offset, want)?;
        for entry in chunk.chunks_exact(INDEX_ENTRY_SIZE) {
            let (id, entry_offset, size) = decode_index_entry(entry.try_into().unwrap());
            visit(id, entry_offset, size)?;
        }
        offset += want as u64;
    }
    Ok(())
}

/// Usage counters maintained alongside the map.
///
/// Appends and deletions only ever grow these; the garbage ratio is derived
/// from the deleted share of all bytes ever written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexCounters {
    /// Records ever appended.
    pub file_count: u64,
    /// Bytes ever appended, including record framing.
    pub file_byte_count: u64,
    /// Records deleted or superseded.
    pub deletion_count: u64,
    /// Bytes deleted or superseded, including record framing.
    pub deletion_byte_count: u64,
}

/// In-memory needle index of one volume, backed by an append-only `.idx` log.
pub struct NeedleMap {
    volume_id: VolumeId,
    version: Version,
    entries: HashMap<NeedleId, NeedleValue>,
    index: Box<dyn StorageBackend>,
    counters: IndexCounters,
}

impl std::fmt::Debug for NeedleMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NeedleMap")
            .field("volume_id", &self.volume_id)
            .field("live", &self.entries.len())
            .field("counters", &self.counters)
            .finish_non_exhaustive()
    }
}

impl NeedleMap {
    /// Creates an empty map over a fresh index backend.
    #[must_use]
    pub fn new(volume_id: VolumeId, version: Version, index: Box<dyn StorageBackend>) -> Self {
        Self {
            volume_id,
            version,
            entries: HashMap::new(),
            index,
            counters: IndexCounters::default(),
        }
    }

    /// Loads a map by replaying an existing index backend.
    ///
    /// Replay is idempotent: the reconstructed map depends only on the entry
    /// sequence, with later entries overriding earlier ones per id.
    pub fn load(
        volume_id: VolumeId,
        version: Version,
        index: Box<dyn StorageBackend>,
    ) -> CoreResult<Self> {
        let size = index.size()?;
        if size % INDEX_ENTRY_SIZE as u64 != 0 {
            return Err(CoreError::corrupt(
                volume_id,
                size,
                format!("index size {size} is not a multiple of {INDEX_ENTRY_SIZE}"),
            ));
        }
        let mut entries: HashMap<NeedleId, NeedleValue> = HashMap::new();
        let mut counters = IndexCounters::default();
        walk_index(index.as_ref(), |id, offset, entry_size| {
            if entry_size == TOMBSTONE_SIZE {
                if let Some(old) = entries.remove(&id) {
                    counters.deletion_count += 1;
                    counters.deletion_byte_count += actual_size(old.size, version);
                }
            } else {
                if let Some(old) = entries.insert(
                    id,
                    NeedleValue {
                        offset,
                        size: entry_size,
                    },
                ) {
                    counters.deletion_count += 1;
                    counters.deletion_byte_count += actual_size(old.size, version);
                }
                counters.file_count += 1;
                counters.file_byte_count += actual_size(entry_size, version);
            }
            Ok(())
        })?;
        Ok(Self {
            volume_id,
            version,
            entries,
            index,
            counters,
        })
    }

    /// Looks up the live position of a needle.
    #[must_use]
    pub fn get(&self, id: NeedleId) -> Option<NeedleValue> {
        self.entries.get(&id).copied()
    }

    /// Records a newly appended needle and logs the entry.
    pub fn put(&mut self, id: NeedleId, value: NeedleValue) -> CoreResult<()> {
        if let Some(old) = self.entries.insert(id, value) {
            self.counters.deletion_count += 1;
            self.counters.deletion_byte_count += actual_size(old.size, self.version);
        }
        self.counters.file_count += 1;
        self.counters.file_byte_count += actual_size(value.size, self.version);
        self.index
            .append(&encode_index_entry(id, value.offset, value.size))?;
        Ok(())
    }

    /// Removes a needle, logging a tombstone entry.
    ///
    /// Returns the size field of the removed record.
    pub fn delete(&mut self, id: NeedleId) -> CoreResult<u32> {
        let old = self.entries.remove(&id).ok_or(CoreError::NotFound {
            volume_id: self.volume_id,
            needle_id: id,
        })?;
        self.counters.deletion_count += 1;
        self.counters.deletion_byte_count += actual_size(old.size, self.version);
        self.index
            .append(&encode_index_entry(id, old.offset, TOMBSTONE_SIZE))?;
        Ok(old.size)
    }

    /// Flushes and syncs the index backend.
    pub fn sync(&mut self) -> CoreResult<()> {
        self.index.flush()?;
        self.index.sync()?;
        Ok(())
    }

    /// Number of live needles.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.entries.len()
    }

    /// Usage counters.
    #[must_use]
    pub fn counters(&self) -> IndexCounters {
        self.counters
    }

    /// Byte size of the index log.
    pub fn index_size(&self) -> CoreResult<u64> {
        Ok(self.index.size()?)
    }

    /// Reads the raw entry bytes from `offset` to the end of the index log.
    pub(crate) fn read_index_from(&self, offset: u64) -> CoreResult<Vec<u8>> {
        let size = self.index.size()?;
        if offset >= size {
            return Ok(Vec::new());
        }
        Ok(self.index.read_at(offset, (size - offset) as usize)?)
    }

    /// Iterates over the live entries in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = (NeedleId, NeedleValue)> + '_ {
        self.entries.iter().map(|(id, value)| (*id, *value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use silo_storage::InMemoryBackend;

    fn value(byte_offset: u64, size: u32) -> NeedleValue {
        NeedleValue {
            offset: NeedleValue::offset_from_bytes(byte_offset),
            size,
        }
    }

    #[test]
    fn entry_roundtrip() {
        let entry = encode_index_entry(NeedleId::new(0xABCD), 17, 512);
        assert_eq!(
            decode_index_entry(&entry),
            (NeedleId::new(0xABCD), 17, 512)
        );
    }

    #[test]
    fn put_get_delete() {
        let mut nm = NeedleMap::new(
            VolumeId::new(1),
            Version::V3,
            Box::new(InMemoryBackend::new()),
        );
        nm.put(NeedleId::new(1), value(8, 100)).unwrap();
        nm.put(NeedleId::new(2), value(160, 50)).unwrap();
        assert_eq!(nm.get(NeedleId::new(1)), Some(value(8, 100)));
        assert_eq!(nm.live_count(), 2);

        assert_eq!(nm.delete(NeedleId::new(1)).unwrap(), 100);
        assert_eq!(nm.get(NeedleId::new(1)), None);
        assert_eq!(nm.live_count(), 1);
        assert!(matches!(
            nm.delete(NeedleId::new(1)),
            Err(CoreError::NotFound { .. })
        ));
    }

    #[test]
    fn overwrite_counts_old_version_as_garbage() {
        let mut nm = NeedleMap::new(
            VolumeId::new(1),
            Version::V3,
            Box::new(InMemoryBackend::new()),
        );
        nm.put(NeedleId::new(7), value(8, 100)).unwrap();
        nm.put(NeedleId::new(7), value(168, 200)).unwrap();
        let counters = nm.counters();
        assert_eq!(counters.file_count, 2);
        assert_eq!(counters.deletion_count, 1);
        assert_eq!(
            counters.deletion_byte_count,
            actual_size(100, Version::V3)
        );
        assert_eq!(nm.get(NeedleId::new(7)), Some(value(168, 200)));
    }

    #[test]
    fn replay_reconstructs_map_and_counters() {
        let mut index = InMemoryBackend::new();
        index
            .append(&encode_index_entry(NeedleId::new(1), 1, 10))
            .unwrap();
        index
            .append(&encode_index_entry(NeedleId::new(2), 6, 20))
            .unwrap();
        index
            .append(&encode_index_entry(NeedleId::new(1), 11, 30))
            .unwrap();
        index
            .append(&encode_index_entry(NeedleId::new(2), 6, TOMBSTONE_SIZE))
            .unwrap();

        let nm = NeedleMap::load(VolumeId::new(1), Version::V3, Box::new(index)).unwrap();
        assert_eq!(nm.live_count(), 1);
        assert_eq!(
            nm.get(NeedleId::new(1)),
            Some(NeedleValue {
                offset: 11,
                size: 30
            })
        );
        assert_eq!(nm.get(NeedleId::new(2)), None);
        let counters = nm.counters();
        assert_eq!(counters.file_count, 2);
        assert_eq!(counters.deletion_count, 2);
    }

    #[test]
    fn replay_is_idempotent() {
        let mut index = InMemoryBackend::new();
        for round in 0..2u64 {
            index
                .append(&encode_index_entry(NeedleId::new(round), 1, 10))
                .unwrap();
        }
        let first = {
            let copy = InMemoryBackend::with_data(index.data());
            let nm = NeedleMap::load(VolumeId::new(1), Version::V3, Box::new(copy)).unwrap();
            (nm.live_count(), nm.counters())
        };
        let second = {
            let nm = NeedleMap::load(VolumeId::new(1), Version::V3, Box::new(index)).unwrap();
            (nm.live_count(), nm.counters())
        };
        assert_eq!(first, second);
    }

    #[test]
    fn load_rejects_misaligned_index() {
        let mut index = InMemoryBackend::new();
        index.append(&[0u8; 9]).unwrap();
        assert!(matches!(
            NeedleMap::load(VolumeId::new(1), Version::V3, Box::new(index)),
            Err(CoreError::Corruption { .. })
        ));
    }

    #[test]
    fn tombstone_for_unknown_id_is_ignored_on_replay() {
        let mut index = InMemoryBackend::new();
        index
            .append(&encode_index_entry(NeedleId::new(9), 0, TOMBSTONE_SIZE))
            .unwrap();
        let nm = NeedleMap::load(VolumeId::new(1), Version::V3, Box::new(index)).unwrap();
        assert_eq!(nm.live_count(), 0);
        assert_eq!(nm.counters().deletion_count, 0);
    }
}
