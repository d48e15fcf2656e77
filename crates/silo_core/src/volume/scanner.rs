//! Sequential scan over a volume data file.

use tracing::warn;

use crate::error::{CoreError, CoreResult};
use crate::super_block::{read_super_block, SuperBlock};
use crate::types::VolumeId;
use silo_needle::{actual_size, decode, parse_header, Needle, NEEDLE_HEADER_SIZE};
use silo_storage::StorageBackend;

/// Walks every record of a data file in log order.
///
/// The visitor receives each decoded needle together with its byte offset and
/// full on-disk length. A truncated record at the very tail is tolerated (a
/// crash can leave one behind) and ends the scan; corruption anywhere else is
/// an error.
///
/// Returns the parsed superblock.
pub fn scan_data_file(
    volume_id: VolumeId,
    backend: &dyn StorageBackend,
    mut visit: impl FnMut(Needle, u64, u64) -> CoreResult<()>,
) -> CoreResult<SuperBlock> {
    let total = backend.size()?;
    let super_block = read_super_block(volume_id, backend)?;
    let version = super_block.version;

    let mut offset = super_block.block_size();
    while offset < total {
        if total - offset < u64::from(NEEDLE_HEADER_SIZE) {
            warn!(%volume_id, offset, "truncated record header at data file tail");
            break;
        }
        let header_bytes = backend.read_at(offset, NEEDLE_HEADER_SIZE as usize)?;
        let header = parse_header(&header_bytes)
            .map_err(|err| CoreError::corrupt(volume_id, offset, err.to_string()))?;
        let record_len = actual_size(header.size, version);
        if offset + record_len > total {
            warn!(%volume_id, offset, "truncated record body at data file tail");
            break;
        }
        let record = backend.read_at(offset, record_len as usize)?;
        let needle = decode(&record, header.size, version)
            .map_err(|err| CoreError::corrupt(volume_id, offset, err.to_string()))?;
        visit(needle, offset, record_len)?;
        offset += record_len;
    }
    Ok(super_block)
}
