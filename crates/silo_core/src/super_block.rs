//! The volume superblock: a fixed 8-byte header at offset zero of every data
//! file, optionally followed by an opaque extension blob.
//!
//! Layout:
//!
//! ```text
//! byte 0      needle format version
//! byte 1      replica placement
//! bytes 2..4  volume TTL
//! bytes 4..6  compaction revision, little-endian
//! bytes 6..8  extension length, little-endian
//! bytes 8..   extension (opaque to the engine)
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::types::VolumeId;
use silo_needle::{Ttl, Version};

/// Size of the fixed superblock header in bytes.
pub const SUPER_BLOCK_SIZE: usize = 8;

/// Replica placement policy, one byte on disk.
///
/// Each digit counts *extra* copies: on other servers in the same rack, on
/// other racks in the same data center, and in other data centers. `000`
/// means a single copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReplicaPlacement {
    /// Extra copies on other servers within the same rack.
    pub same_rack_count: u8,
    /// Extra copies on other racks within the same data center.
    pub diff_rack_count: u8,
    /// Extra copies in other data centers.
    pub diff_data_center_count: u8,
}

impl ReplicaPlacement {
    /// Decodes the placement from its packed byte: `100*dc + 10*rack + server`.
    #[must_use]
    pub const fn from_byte(b: u8) -> Self {
        Self {
            diff_data_center_count: b / 100,
            diff_rack_count: b / 10 % 10,
            same_rack_count: b % 10,
        }
    }

    /// Encodes the placement to its packed byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self.diff_data_center_count * 100 + self.diff_rack_count * 10 + self.same_rack_count
    }

    /// Total number of copies, including the original.
    #[must_use]
    pub const fn copy_count(self) -> u8 {
        self.diff_data_center_count + self.diff_rack_count + self.same_rack_count + 1
    }
}

impl fmt::Display for ReplicaPlacement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{}",
            self.diff_data_center_count, self.diff_rack_count, self.same_rack_count
        )
    }
}

/// Parsed superblock of a volume data file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuperBlock {
    /// Needle format version used throughout the volume.
    pub version: Version,
    /// Replica placement policy.
    pub replica_placement: ReplicaPlacement,
    /// Volume-wide TTL inherited by needles appended without one.
    pub ttl: Ttl,
    /// Number of completed compactions.
    pub compact_revision: u16,
    /// Opaque extension blob; the engine round-trips it untouched.
    pub extension: Vec<u8>,
}

impl Default for SuperBlock {
    fn default() -> Self {
        Self {
            version: Version::CURRENT,
            replica_placement: ReplicaPlacement::default(),
            ttl: Ttl::EMPTY,
            compact_revision: 0,
            extension: Vec::new(),
        }
    }
}

impl SuperBlock {
    /// Creates a superblock for a new volume.
    #[must_use]
    pub fn new(replica_placement: ReplicaPlacement, ttl: Ttl) -> Self {
        Self {
            replica_placement,
            ttl,
            ..Self::default()
        }
    }

    /// Total on-disk size: fixed header plus extension.
    #[must_use]
    pub fn block_size(&self) -> u64 {
        (SUPER_BLOCK_SIZE + self.extension.len()) as u64
    }

    /// Serializes the superblock, header and extension.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(SUPER_BLOCK_SIZE + self.extension.len());
        buf.push(self.version.as_byte());
        buf.push(self.replica_placement.as_byte());
        buf.extend_from_slice(&self.ttl.to_bytes());
        buf.extend_from_slice(&self.compact_revision.to_le_bytes());
        buf.extend_from_slice(&(self.extension.len() as u16).to_le_bytes());
        buf.extend_from_slice(&self.extension);
        buf
    }

    /// Parses a superblock from the head of a data file.
    ///
    /// `bytes` must start at offset zero and cover the header plus any
    /// extension the header declares.
    pub fn parse(volume_id: VolumeId, bytes: &[u8]) -> CoreResult<Self> {
        if bytes.len() < SUPER_BLOCK_SIZE {
            return Err(CoreError::corrupt(
                volume_id,
                0,
                format!("superblock truncated: {} bytes", bytes.len()),
            ));
        }
        let version = Version::from_byte(bytes[0]).map_err(|_| {
            CoreError::corrupt(volume_id, 0, format!("unknown needle version {}", bytes[0]))
        })?;
        let replica_placement = ReplicaPlacement::from_byte(bytes[1]);
        let ttl = Ttl::from_bytes([bytes[2], bytes[3]]);
        let compact_revision = u16::from_le_bytes([bytes[4], bytes[5]]);
        let extension_len = u16::from_le_bytes([bytes[6], bytes[7]]) as usize;
        if bytes.len() < SUPER_BLOCK_SIZE + extension_len {
            return Err(CoreError::corrupt(
                volume_id,
                0,
                format!(
                    "superblock extension truncated: need {extension_len} bytes, have {}",
                    bytes.len() - SUPER_BLOCK_SIZE
                ),
            ));
        }
        let extension = bytes[SUPER_BLOCK_SIZE..SUPER_BLOCK_SIZE + extension_len].to_vec();
        Ok(Self {
            version,
            replica_placement,
            ttl,
            compact_revision,
            extension,
        })
    }
}

/// Reads and parses the superblock from the head of a data backend.
pub fn read_super_block(
    volume_id: VolumeId,
    backend: &dyn silo_storage::StorageBackend,
) -> CoreResult<SuperBlock> {
    let total = backend.size()?;
    if total < SUPER_BLOCK_SIZE as u64 {
        return Err(CoreError::corrupt(
            volume_id,
            0,
            format!("data file too small for a superblock: {total} bytes"),
        ));
    }
    let head = backend.read_at(0, SUPER_BLOCK_SIZE)?;
    let extension_len = u16::from_le_bytes([head[6], head[7]]) as usize;
    if extension_len == 0 {
        return SuperBlock::parse(volume_id, &head);
    }
    let full = backend.read_at(0, SUPER_BLOCK_SIZE + extension_len)?;
    SuperBlock::parse(volume_id, &full)
}
