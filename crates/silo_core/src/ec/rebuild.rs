//! Reconstructing lost shards and restoring the data file.

use std::path::{Path, PathBuf};

use reed_solomon_erasure::galois_8::ReedSolomon;
use tracing::info;

use crate::ec::{
    shard_file_ext, EcGeometry, ShardBits, VolumeInfo, DATA_SHARD_COUNT, PARITY_SHARD_COUNT,
    TOTAL_SHARD_COUNT, VIF_EXT,
};
use crate::error::{CoreError, CoreResult};
use crate::types::{ShardId, VolumeId};
use crate::volume::DATA_EXT;
use silo_storage::{FileBackend, StorageBackend};

/// Chunk size while streaming shards through the coder.
const REBUILD_BUFFER_SIZE: u64 = 1024 * 1024;

fn sibling(base: &Path, ext: &str) -> PathBuf {
    let mut os = base.as_os_str().to_os_string();
    os.push(format!(".{ext}"));
    os.into()
}

/// The shard files present next to `base_path`.
#[must_use]
pub fn local_shard_ids(base_path: &Path) -> ShardBits {
    (0..TOTAL_SHARD_COUNT as u8)
        .map(ShardId::new)
        .filter(|shard| sibling(base_path, &shard_file_ext(*shard)).exists())
        .collect()
}

/// Recomputes every missing shard file from the ones present.
///
/// At least 10 of the 14 shard files must exist; with fewer the volume is
/// unrepairable and nothing is written. Returns the ids of the shards that
/// were rebuilt.
pub fn rebuild_missing_shards(base_path: &Path, volume_id: VolumeId) -> CoreResult<Vec<ShardId>> {
    let present = local_shard_ids(base_path);
    let missing: Vec<ShardId> = ShardBits::from_bits((1 << TOTAL_SHARD_COUNT) - 1)
        .minus(present)
        .ids();
    if missing.is_empty() {
        return Ok(Vec::new());
    }
    if present.count() < DATA_SHARD_COUNT {
        return Err(CoreError::Unrepairable {
            volume_id,
            available: present.count(),
            required: DATA_SHARD_COUNT,
        });
    }

    let mut sources: Vec<Option<FileBackend>> = Vec::with_capacity(TOTAL_SHARD_COUNT);
    let mut shard_size: Option<u64> = None;
    for raw in 0..TOTAL_SHARD_COUNT as u8 {
        let shard = ShardId::new(raw);
        if !present.has(shard) {
            sources.push(None);
            continue;
        }
        let backend = FileBackend::open_existing(&sibling(base_path, &shard_file_ext(shard)))?;
        let size = backend.size()?;
        match shard_size {
            None => shard_size = Some(size),
            Some(expected) if expected != size => {
                return Err(CoreError::corrupt(
                    volume_id,
                    size,
                    format!("shard {shard} is {size} bytes, others are {expected}"),
                ));
            }
            Some(_) => {}
        }
        sources.push(Some(backend));
    }
    let shard_size = shard_size.unwrap_or(0);

    let mut rebuilt: Vec<(ShardId, FileBackend)> = Vec::with_capacity(missing.len());
    for shard in &missing {
        let path = sibling(base_path, &shard_file_ext(*shard));
        rebuilt.push((*shard, FileBackend::open(&path)?));
    }

    let rs = ReedSolomon::new(DATA_SHARD_COUNT, PARITY_SHARD_COUNT)?;
    let mut offset = 0u64;
    while offset < shard_size {
        let len = REBUILD_BUFFER_SIZE.min(shard_size - offset) as usize;
        let mut chunks: Vec<Option<Vec<u8>>> = Vec::with_capacity(TOTAL_SHARD_COUNT);
        for source in &sources {
            match source {
                Some(backend) => chunks.push(Some(backend.read_at(offset, len)?)),
                None => chunks.push(None),
            }
        }
        rs.reconstruct(&mut chunks)?;
        for (shard, backend) in &mut rebuilt {
            let chunk = chunks[shard.as_usize()]
                .as_ref()
                .ok_or_else(|| CoreError::ErasureCoding("reconstruction left a hole".into()))?;
            backend.append(chunk)?;
        }
        offset += len as u64;
    }
    for (_, backend) in &mut rebuilt {
        backend.flush()?;
        backend.sync()?;
    }

    info!(
        %volume_id,
        rebuilt = missing.len(),
        shard_size,
        "rebuilt missing shards"
    );
    Ok(missing)
}

/// Restores the original `.dat` file by concatenating the data shards.
///
/// All ten data shards must be present (rebuild first if not). The file is
/// truncated to the exact size recorded in the `.vif` sidecar, discarding the
/// striping padding. Fails if a data file already exists.
pub fn write_data_file_from_shards(
    base_path: &Path,
    volume_id: VolumeId,
    geometry: &EcGeometry,
) -> CoreResult<PathBuf> {
    let dat_path = sibling(base_path, DATA_EXT);
    if dat_path.exists() {
        return Err(CoreError::InvalidOperation(format!(
            "data file already exists at {}",
            dat_path.display()
        )));
    }
    let info = VolumeInfo::load(volume_id, &sibling(base_path, VIF_EXT))?;
    let layout = geometry.layout(info.dat_size);

    let present = local_shard_ids(base_path);
    let data_shards: Vec<ShardId> = (0..DATA_SHARD_COUNT as u8).map(ShardId::new).collect();
    let available = data_shards.iter().filter(|s| present.has(**s)).count();
    if available < DATA_SHARD_COUNT {
        return Err(CoreError::Unrepairable {
            volume_id,
            available,
            required: DATA_SHARD_COUNT,
        });
    }

    let sources: Vec<FileBackend> = data_shards
        .iter()
        .map(|shard| FileBackend::open_existing(&sibling(base_path, &shard_file_ext(*shard))))
        .collect::<Result<_, _>>()?;

    let mut dat = FileBackend::open(&dat_path)?;
    copy_region(
        &sources,
        &mut dat,
        0,
        layout.large_rows,
        geometry.large_block_size,
    )?;
    copy_region(
        &sources,
        &mut dat,
        layout.large_rows * geometry.large_block_size,
        layout.small_rows,
        geometry.small_block_size,
    )?;
    dat.truncate(info.dat_size)?;
    dat.flush()?;
    dat.sync()?;

    info!(%volume_id, dat_size = info.dat_size, "restored data file from shards");
    Ok(dat_path)
}

fn copy_region(
    sources: &[FileBackend],
    dat: &mut FileBackend,
    region_start_in_shard: u64,
    rows: u64,
    block_size: u64,
) -> CoreResult<()> {
    let buffer_size = block_size.min(REBUILD_BUFFER_SIZE);
    for row in 0..rows {
        for source in sources {
            let block_start = region_start_in_shard + row * block_size;
            let mut chunk = 0u64;
            while chunk < block_size {
                let len = buffer_size.min(block_size - chunk) as usize;
                let bytes = source.read_at(block_start + chunk, len)?;
                dat.append(&bytes)?;
                chunk += len as u64;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::sync::Arc;

    use super::*;
    use crate::ec::encoder::encode_volume;
    use crate::volume::{Volume, VolumeOptions};
    use silo_needle::{Needle, NeedleId};
    use silo_storage::BackendRegistry;

    const GEO: EcGeometry = EcGeometry::new(256, 64);

    fn encoded_volume(dir: &Path) -> PathBuf {
        let volume = Volume::create(
            dir.join("6"),
            VolumeId::new(6),
            String::new(),
            Arc::new(BackendRegistry::with_defaults()),
            "file",
            VolumeOptions::default(),
            u64::MAX,
        )
        .unwrap();
        for id in 1..=8u64 {
            let data: Vec<u8> = (0..(id * 41 % 150) + 3).map(|b| (b * 7 % 256) as u8).collect();
            volume
                .append(&Needle::new(NeedleId::new(id), data))
                .unwrap();
        }
        volume.sync().unwrap();
        let base = volume.base_path().to_path_buf();
        encode_volume(&base, VolumeId::new(6), &GEO).unwrap();
        base
    }

    fn shard_path(base: &Path, raw: u8) -> PathBuf {
        sibling(base, &shard_file_ext(ShardId::new(raw)))
    }

    #[test]
    fn any_four_missing_shards_are_rebuilt_byte_identical() {
        let dir = tempfile::tempdir().unwrap();
        let base = encoded_volume(dir.path());

        let originals: Vec<Vec<u8>> = (0..TOTAL_SHARD_COUNT as u8)
            .map(|raw| fs::read(shard_path(&base, raw)).unwrap())
            .collect();

        // Drop a mix of data and parity shards.
        for raw in [0u8, 5, 9, 12] {
            fs::remove_file(shard_path(&base, raw)).unwrap();
        }
        let rebuilt = rebuild_missing_shards(&base, VolumeId::new(6)).unwrap();
        assert_eq!(
            rebuilt,
            vec![
                ShardId::new(0),
                ShardId::new(5),
                ShardId::new(9),
                ShardId::new(12)
            ]
        );
        for raw in 0..TOTAL_SHARD_COUNT as u8 {
            assert_eq!(
                fs::read(shard_path(&base, raw)).unwrap(),
                originals[raw as usize],
                "shard {raw} differs after rebuild"
            );
        }
    }

    #[test]
    fn five_missing_shards_are_unrepairable() {
        let dir = tempfile::tempdir().unwrap();
        let base = encoded_volume(dir.path());
        for raw in [1u8, 3, 6, 10, 13] {
            fs::remove_file(shard_path(&base, raw)).unwrap();
        }
        let err = rebuild_missing_shards(&base, VolumeId::new(6)).unwrap_err();
        assert!(matches!(
            err,
            CoreError::Unrepairable {
                available: 9,
                required: 10,
                ..
            }
        ));
        // Nothing was written.
        assert!(!shard_path(&base, 1).exists());
    }

    #[test]
    fn nothing_to_rebuild_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let base = encoded_volume(dir.path());
        assert!(rebuild_missing_shards(&base, VolumeId::new(6))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn data_file_restores_byte_identical() {
        let dir = tempfile::tempdir().unwrap();
        let base = encoded_volume(dir.path());
        let original = fs::read(sibling(&base, DATA_EXT)).unwrap();
        fs::remove_file(sibling(&base, DATA_EXT)).unwrap();

        // Even with parity-only reconstruction in between.
        fs::remove_file(shard_path(&base, 2)).unwrap();
        fs::remove_file(shard_path(&base, 7)).unwrap();
        rebuild_missing_shards(&base, VolumeId::new(6)).unwrap();

        let restored = write_data_file_from_shards(&base, VolumeId::new(6), &GEO).unwrap();
        assert_eq!(fs::read(restored).unwrap(), original);
    }

    #[test]
    fn restore_refuses_to_overwrite_existing_data_file() {
        let dir = tempfile::tempdir().unwrap();
        let base = encoded_volume(dir.path());
        assert!(matches!(
            write_data_file_from_shards(&base, VolumeId::new(6), &GEO),
            Err(CoreError::InvalidOperation(_))
        ));
    }
}
