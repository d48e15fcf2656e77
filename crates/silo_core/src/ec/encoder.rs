//! Striping a sealed volume into Reed-Solomon shards.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use reed_solomon_erasure::galois_8::ReedSolomon;
use tracing::info;

use crate::ec::{
    shard_file_ext, EcGeometry, EcLayout, ShardBits, VolumeInfo, DATA_SHARD_COUNT, ECX_EXT,
    PARITY_SHARD_COUNT, TOTAL_SHARD_COUNT, VIF_EXT,
};
use crate::error::{CoreError, CoreResult};
use crate::index::{decode_index_entry, encode_index_entry, NeedleValue, INDEX_ENTRY_SIZE};
use crate::super_block::read_super_block;
use crate::types::{ShardId, VolumeId};
use crate::volume::{DATA_EXT, INDEX_EXT};
use silo_needle::{NeedleId, TOMBSTONE_SIZE};
use silo_storage::{FileBackend, StorageBackend};

/// Per-block chunk size while streaming rows through the coder.
const ENCODE_BUFFER_SIZE: u64 = 1024 * 1024;

/// What [`encode_volume`] produced.
#[derive(Debug, Clone, Copy)]
pub struct EcEncodeOutcome {
    /// All fourteen shards, freshly written.
    pub shard_bits: ShardBits,
    /// Size of the encoded data file.
    pub dat_size: u64,
    /// Striping layout the shards follow.
    pub layout: EcLayout,
    /// Live entries written to the sorted index.
    pub live_entries: usize,
}

fn sibling(base: &Path, ext: &str) -> std::path::PathBuf {
    let mut os = base.as_os_str().to_os_string();
    os.push(format!(".{ext}"));
    os.into()
}

/// Erasure-codes a volume's data file into 14 shard files.
///
/// Writes `.ec00` through `.ec13`, the sorted `.ecx` index, and the `.vif`
/// sidecar next to the volume's files. The volume must be sealed: no writes
/// may land between encoding and retiring the `.dat` file.
pub fn encode_volume(
    base_path: &Path,
    volume_id: VolumeId,
    geometry: &EcGeometry,
) -> CoreResult<EcEncodeOutcome> {
    let dat = FileBackend::open_existing(&sibling(base_path, DATA_EXT))?;
    let dat_size = dat.size()?;
    let super_block = read_super_block(volume_id, &dat)?;
    let layout = geometry.layout(dat_size);

    let rs = ReedSolomon::new(DATA_SHARD_COUNT, PARITY_SHARD_COUNT)?;
    let mut shards: Vec<FileBackend> = Vec::with_capacity(TOTAL_SHARD_COUNT);
    for shard in 0..TOTAL_SHARD_COUNT {
        let path = sibling(base_path, &shard_file_ext(ShardId::new(shard as u8)));
        if path.exists() {
            fs::remove_file(&path)?;
        }
        shards.push(FileBackend::open(&path)?);
    }

    let large_span = layout.large_rows * geometry.large_row_size();
    encode_rows(
        &rs,
        &dat,
        dat_size,
        &mut shards,
        0,
        layout.large_rows,
        geometry.large_block_size,
    )?;
    encode_rows(
        &rs,
        &dat,
        dat_size,
        &mut shards,
        large_span,
        layout.small_rows,
        geometry.small_block_size,
    )?;
    for shard in &mut shards {
        shard.flush()?;
        shard.sync()?;
    }

    let live_entries = write_sorted_index(base_path, volume_id)?;
    VolumeInfo {
        version: super_block.version,
        compact_revision: super_block.compact_revision,
        dat_size,
    }
    .save(&sibling(base_path, VIF_EXT))?;

    let shard_bits = (0..TOTAL_SHARD_COUNT as u8).map(ShardId::new).collect();
    info!(
        %volume_id,
        dat_size,
        shard_size = layout.shard_size,
        live_entries,
        "erasure-coded volume"
    );
    Ok(EcEncodeOutcome {
        shard_bits,
        dat_size,
        layout,
        live_entries,
    })
}

fn encode_rows(
    rs: &ReedSolomon,
    dat: &FileBackend,
    dat_size: u64,
    shards: &mut [FileBackend],
    region_start: u64,
    rows: u64,
    block_size: u64,
) -> CoreResult<()> {
    let buffer_size = block_size.min(ENCODE_BUFFER_SIZE);
    for row in 0..rows {
        let row_start = region_start + row * block_size * DATA_SHARD_COUNT as u64;
        let mut chunk = 0u64;
        while chunk < block_size {
            let len = buffer_size.min(block_size - chunk) as usize;
            let mut data: Vec<Vec<u8>> = Vec::with_capacity(DATA_SHARD_COUNT);
            for i in 0..DATA_SHARD_COUNT as u64 {
                data.push(read_zero_padded(
                    dat,
                    dat_size,
                    row_start + i * block_size + chunk,
                    len,
                )?);
            }
            let mut parity = vec![vec![0u8; len]; PARITY_SHARD_COUNT];
            rs.encode_sep(&data, &mut parity)?;
            for (i, block) in data.iter().enumerate() {
                shards[i].append(block)?;
            }
            for (i, block) in parity.iter().enumerate() {
                shards[DATA_SHARD_COUNT + i].append(block)?;
            }
            chunk += len as u64;
        }
    }
    Ok(())
}

/// Reads `len` bytes at `offset`, zero-filling anything past the end of the
/// data file. Rows always cover whole blocks; the file rarely does.
fn read_zero_padded(
    dat: &FileBackend,
    dat_size: u64,
    offset: u64,
    len: usize,
) -> CoreResult<Vec<u8>> {
    if offset >= dat_size {
        return Ok(vec![0u8; len]);
    }
    let available = ((dat_size - offset) as usize).min(len);
    let mut bytes = dat.read_at(offset, available)?;
    bytes.resize(len, 0);
    Ok(bytes)
}

/// Folds the volume's index log into a sorted `.ecx` file of live entries.
///
/// Replays the log with last-entry-wins semantics, drops tombstoned needles,
/// and writes the survivors ordered by needle id so lookups can binary
/// search. Returns the number of live entries.
pub fn write_sorted_index(base_path: &Path, volume_id: VolumeId) -> CoreResult<usize> {
    let idx_bytes = fs::read(sibling(base_path, INDEX_EXT))?;
    if idx_bytes.len() % INDEX_ENTRY_SIZE != 0 {
        return Err(CoreError::corrupt(
            volume_id,
            idx_bytes.len() as u64,
            format!(
                "index size {} is not a multiple of {INDEX_ENTRY_SIZE}",
                idx_bytes.len()
            ),
        ));
    }

    let mut live: BTreeMap<NeedleId, NeedleValue> = BTreeMap::new();
    for entry in idx_bytes.chunks_exact(INDEX_ENTRY_SIZE) {
        let (id, offset, size) = decode_index_entry(entry.try_into().unwrap());
        if size == TOMBSTONE_SIZE {
            live.remove(&id);
        } else {
            live.insert(id, NeedleValue { offset, size });
        }
    }

    let mut out = Vec::with_capacity(live.len() * INDEX_ENTRY_SIZE);
    for (id, value) in &live {
        out.extend_from_slice(&encode_index_entry(*id, value.offset, value.size));
    }
    fs::write(sibling(base_path, ECX_EXT), out)?;
    Ok(live.len())
}
