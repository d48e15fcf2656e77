//! Mapping byte extents of the data file onto shard intervals.

use crate::ec::{EcGeometry, DATA_SHARD_COUNT};
use crate::types::ShardId;

/// One contiguous piece of a data-file extent inside a single block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interval {
    /// Index of the block in its striping region (large or small).
    pub block_index: u64,
    /// Byte offset within the block.
    pub inner_offset: u64,
    /// Length in bytes; never crosses a block boundary.
    pub size: u64,
    /// Whether the block belongs to the large rows.
    pub is_large_block: bool,
    /// Number of large rows in the volume's layout, needed to place small
    /// blocks within a shard file.
    pub large_rows: u64,
}

impl Interval {
    /// The shard holding this interval and the byte offset inside its file.
    #[must_use]
    pub fn shard_location(&self, geometry: &EcGeometry) -> (ShardId, u64) {
        let shard = ShardId::new((self.block_index % DATA_SHARD_COUNT as u64) as u8);
        let row = self.block_index / DATA_SHARD_COUNT as u64;
        let offset_in_shard = if self.is_large_block {
            row * geometry.large_block_size + self.inner_offset
        } else {
            self.large_rows * geometry.large_block_size
                + row * geometry.small_block_size
                + self.inner_offset
        };
        (shard, offset_in_shard)
    }
}

/// Splits the extent `[offset, offset + size)` of a data file into the block
/// intervals it occupies.
///
/// `dat_size` determines where large rows end and small rows begin; the
/// extent must lie within the data file.
#[must_use]
pub fn locate(dat_size: u64, offset: u64, size: u64, geometry: &EcGeometry) -> Vec<Interval> {
    let layout = geometry.layout(dat_size);
    let large_span = layout.large_rows * geometry.large_row_size();

    let mut intervals = Vec::new();
    let mut offset = offset;
    let mut remaining = size;
    while remaining > 0 {
        let (block_size, block_index, inner_offset, is_large_block) = if offset < large_span {
            (
                geometry.large_block_size,
                offset / geometry.large_block_size,
                offset % geometry.large_block_size,
                true,
            )
        } else {
            let small_offset = offset - large_span;
            (
                geometry.small_block_size,
                small_offset / geometry.small_block_size,
                small_offset % geometry.small_block_size,
                false,
            )
        };
        let take = remaining.min(block_size - inner_offset);
        intervals.push(Interval {
            block_index,
            inner_offset,
            size: take,
            is_large_block,
            large_rows: layout.large_rows,
        });
        offset += take;
        remaining -= take;
    }
    intervals
}
