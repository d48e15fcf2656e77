//! Reed-Solomon erasure coding of sealed volumes.
//!
//! A sealed volume's data file is cut into 10 data shards plus 4 parity
//! shards; any 10 of the 14 suffice to reconstruct the rest. Shards are
//! striped row by row: large rows first (1 GiB blocks) for bulk placement,
//! then small rows (1 MiB blocks) so the tail wastes little space. Reads
//! against an erasure-coded volume map needle extents onto shard intervals
//! without materializing the data file.

mod ec_volume;
mod encoder;
mod interval;
mod rebuild;
mod shard_bits;
mod volume_info;

pub use ec_volume::{apply_deletion_journal, EcVolume};
pub use encoder::{encode_volume, write_sorted_index, EcEncodeOutcome};
pub use interval::{locate, Interval};
pub use rebuild::{local_shard_ids, rebuild_missing_shards, write_data_file_from_shards};
pub use shard_bits::ShardBits;
pub use volume_info::VolumeInfo;

use crate::types::ShardId;

/// Number of data shards.
pub const DATA_SHARD_COUNT: usize = 10;
/// Number of parity shards.
pub const PARITY_SHARD_COUNT: usize = 4;
/// Total shards per volume.
pub const TOTAL_SHARD_COUNT: usize = DATA_SHARD_COUNT + PARITY_SHARD_COUNT;

/// Block size of large striping rows.
pub const LARGE_BLOCK_SIZE: u64 = 1024 * 1024 * 1024;
/// Block size of small striping rows covering the volume tail.
pub const SMALL_BLOCK_SIZE: u64 = 1024 * 1024;

/// Extension of the sorted needle index of an erasure-coded volume.
pub const ECX_EXT: &str = "ecx";
/// Extension of the deletion journal of an erasure-coded volume.
pub const ECJ_EXT: &str = "ecj";
/// Extension of the volume info sidecar.
pub const VIF_EXT: &str = "vif";

/// File extension of one shard, `ec00` through `ec13`.
#[must_use]
pub fn shard_file_ext(shard: ShardId) -> String {
    format!("ec{:02}", shard.as_u8())
}

/// Block sizes used when striping a volume into shards.
///
/// The defaults are the wire-format constants; tests shrink them to keep
/// fixture files small.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EcGeometry {
    /// Block size of large rows.
    pub large_block_size: u64,
    /// Block size of small rows.
    pub small_block_size: u64,
}

impl Default for EcGeometry {
    fn default() -> Self {
        Self {
            large_block_size: LARGE_BLOCK_SIZE,
            small_block_size: SMALL_BLOCK_SIZE,
        }
    }
}

/// Row counts and shard size derived from a data file size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EcLayout {
    /// Full rows of large blocks.
    pub large_rows: u64,
    /// Rows of small blocks covering the remainder, zero-padded at the tail.
    pub small_rows: u64,
    /// Resulting size of every shard file.
    pub shard_size: u64,
}

impl EcGeometry {
    /// Creates a geometry with explicit block sizes.
    #[must_use]
    pub const fn new(large_block_size: u64, small_block_size: u64) -> Self {
        Self {
            large_block_size,
            small_block_size,
        }
    }

    /// Bytes of the data file covered by one large row.
    #[must_use]
    pub const fn large_row_size(&self) -> u64 {
        self.large_block_size * DATA_SHARD_COUNT as u64
    }

    /// Bytes of the data file covered by one small row.
    #[must_use]
    pub const fn small_row_size(&self) -> u64 {
        self.small_block_size * DATA_SHARD_COUNT as u64
    }

    /// Computes the striping layout for a data file of `dat_size` bytes.
    #[must_use]
    pub fn layout(&self, dat_size: u64) -> EcLayout {
        let large_rows = dat_size / self.large_row_size();
        let remainder = dat_size % self.large_row_size();
        let small_rows = remainder.div_ceil(self.small_row_size());
        EcLayout {
            large_rows,
            small_rows,
            shard_size: large_rows * self.large_block_size + small_rows * self.small_block_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shard_extension_is_zero_padded() {
        assert_eq!(shard_file_ext(ShardId::new(0)), "ec00");
        assert_eq!(shard_file_ext(ShardId::new(7)), "ec07");
        assert_eq!(shard_file_ext(ShardId::new(13)), "ec13");
    }

    #[test]
    fn layout_of_empty_file() {
        let geo = EcGeometry::new(1024, 64);
        let layout = geo.layout(0);
        assert_eq!(layout.large_rows, 0);
        assert_eq!(layout.small_rows, 0);
        assert_eq!(layout.shard_size, 0);
    }

    #[test]
    fn layout_splits_into_large_then_small_rows() {
        let geo = EcGeometry::new(1024, 64);
        // Two full large rows plus a bit.
        let dat_size = 2 * geo.large_row_size() + 3 * geo.small_row_size() + 1;
        let layout = geo.layout(dat_size);
        assert_eq!(layout.large_rows, 2);
        assert_eq!(layout.small_rows, 4);
        assert_eq!(layout.shard_size, 2 * 1024 + 4 * 64);
    }

    #[test]
    fn layout_small_file_uses_only_small_rows() {
        let geo = EcGeometry::new(1024, 64);
        let layout = geo.layout(100);
        assert_eq!(layout.large_rows, 0);
        assert_eq!(layout.small_rows, 1);
        assert_eq!(layout.shard_size, 64);
    }

    #[test]
    fn default_geometry_uses_wire_constants() {
        let geo = EcGeometry::default();
        assert_eq!(geo.large_block_size, LARGE_BLOCK_SIZE);
        assert_eq!(geo.small_block_size, SMALL_BLOCK_SIZE);
    }
}
