//! The `.vif` sidecar: everything needed to serve and restore an
//! erasure-coded volume once its data file is gone.

use std::fs;
use std::path::Path;

use crate::error::{CoreError, CoreResult};
use crate::types::VolumeId;
use silo_needle::Version;

/// On-disk size of the sidecar.
pub const VOLUME_INFO_SIZE: usize = 16;

/// Sidecar written when a volume is erasure-coded.
///
/// The shard layout pads the tail with zeros, so the original data file size
/// must be recorded to truncate correctly when decoding shards back into a
/// volume. The compaction revision pins which generation of the volume the
/// shards were cut from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolumeInfo {
    /// Needle format version of the encoded volume.
    pub version: Version,
    /// Compaction revision the shards were cut from.
    pub compact_revision: u16,
    /// Exact byte size of the original data file.
    pub dat_size: u64,
}

impl VolumeInfo {
    /// Serializes the sidecar.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; VOLUME_INFO_SIZE] {
        let mut buf = [0u8; VOLUME_INFO_SIZE];
        buf[0] = self.version.as_byte();
        buf[2..4].copy_from_slice(&self.compact_revision.to_le_bytes());
        buf[4..12].copy_from_slice(&self.dat_size.to_le_bytes());
        buf
    }

    /// Parses a sidecar.
    pub fn from_bytes(volume_id: VolumeId, bytes: &[u8]) -> CoreResult<Self> {
        if bytes.len() < VOLUME_INFO_SIZE {
            return Err(CoreError::corrupt(
                volume_id,
                0,
                format!("volume info truncated: {} bytes", bytes.len()),
            ));
        }
        let version = Version::from_byte(bytes[0]).map_err(|_| {
            CoreError::corrupt(
                volume_id,
                0,
                format!("volume info has unknown version {}", bytes[0]),
            )
        })?;
        Ok(Self {
            version,
            compact_revision: u16::from_le_bytes([bytes[2], bytes[3]]),
            dat_size: u64::from_le_bytes(bytes[4..12].try_into().unwrap_or_default()),
        })
    }

    /// Writes the sidecar to `path`.
    pub fn save(&self, path: &Path) -> CoreResult<()> {
        fs::write(path, self.to_bytes())?;
        Ok(())
    }

    /// Reads a sidecar from `path`.
    pub fn load(volume_id: VolumeId, path: &Path) -> CoreResult<Self> {
        let bytes = fs::read(path)?;
        Self::from_bytes(volume_id, &bytes)
    }
}
