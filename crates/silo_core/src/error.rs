//! Error types for the volume engine.

use thiserror::Error;

use crate::types::VolumeId;
use silo_needle::{NeedleError, NeedleId};
use silo_storage::StorageError;

/// Result alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors surfaced by volumes, the needle index, vacuum and erasure coding.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A storage backend failed.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// A needle record could not be encoded or decoded.
    #[error("needle codec error: {0}")]
    Needle(#[from] NeedleError),

    /// Plain I/O failure outside a backend (renames, directory scans).
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// The needle does not exist or has been deleted.
    #[error("needle {needle_id} not found in volume {volume_id}")]
    NotFound {
        /// Volume that was searched.
        volume_id: VolumeId,
        /// Needle that was requested.
        needle_id: NeedleId,
    },

    /// The needle exists but its TTL has elapsed.
    #[error("needle {needle_id} in volume {volume_id} has expired")]
    Expired {
        /// Volume holding the needle.
        volume_id: VolumeId,
        /// The expired needle.
        needle_id: NeedleId,
    },

    /// The presented cookie does not match the stored one.
    #[error("cookie mismatch for needle {needle_id}: expected {expected:016x}, got {actual:016x}")]
    CookieMismatch {
        /// Needle whose cookie was checked.
        needle_id: NeedleId,
        /// Cookie recorded in the volume.
        expected: u64,
        /// Cookie presented by the caller.
        actual: u64,
    },

    /// No volume with this id is mounted.
    #[error("volume {0} not found")]
    VolumeNotFound(VolumeId),

    /// The volume already exists on disk.
    #[error("volume {0} already exists")]
    VolumeExists(VolumeId),

    /// The volume reached its size limit and is read-only.
    #[error("volume {volume_id} is read-only ({size} of {limit} bytes used)")]
    VolumeFull {
        /// Volume that rejected the write.
        volume_id: VolumeId,
        /// Current data file size.
        size: u64,
        /// Configured size limit.
        limit: u64,
    },

    /// A write was attempted on a read-only volume.
    #[error("volume {0} is read-only")]
    ReadOnly(VolumeId),

    /// On-disk state is malformed.
    #[error("corrupt volume {volume_id} at offset {offset}: {message}")]
    Corruption {
        /// Affected volume.
        volume_id: VolumeId,
        /// Byte offset in the data file where corruption was detected.
        offset: u64,
        /// Description of the damage.
        message: String,
    },

    /// A compaction step observed a revision other than the one it staged.
    #[error("volume {volume_id} compact revision mismatch: expected {expected}, found {actual}")]
    CompactRevisionMismatch {
        /// Affected volume.
        volume_id: VolumeId,
        /// Revision the caller staged against.
        expected: u16,
        /// Revision found on disk.
        actual: u16,
    },

    /// A vacuum step was requested in the wrong state.
    #[error("volume {volume_id} vacuum is {state}, cannot {operation}")]
    VacuumState {
        /// Affected volume.
        volume_id: VolumeId,
        /// Current state name.
        state: &'static str,
        /// The rejected operation.
        operation: &'static str,
    },

    /// Too few erasure shards remain to reconstruct the volume.
    #[error(
        "volume {volume_id} is unrepairable: {available} of {required} required shards available"
    )]
    Unrepairable {
        /// Affected volume.
        volume_id: VolumeId,
        /// Shards that could be located.
        available: usize,
        /// Minimum shards needed to reconstruct.
        required: usize,
    },

    /// A requested erasure shard is not mounted here and has no known peer.
    #[error("shard {shard_id} of volume {volume_id} is not located")]
    ShardNotLocated {
        /// Affected volume.
        volume_id: VolumeId,
        /// Missing shard.
        shard_id: u8,
    },

    /// Reed-Solomon coding failed.
    #[error("erasure coding error: {0}")]
    ErasureCoding(String),

    /// Another process holds the store directory lock.
    #[error("store directory {0} is locked by another process")]
    StoreLocked(String),

    /// A request could not be delivered to a volume writer.
    #[error("volume {0} writer is shut down")]
    WriterClosed(VolumeId),

    /// Catch-all for invalid arguments or states.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),
}

impl CoreError {
    /// Builds a [`CoreError::Corruption`] from anything printable.
    pub fn corrupt(volume_id: VolumeId, offset: u64, message: impl Into<String>) -> Self {
        Self::Corruption {
            volume_id,
            offset,
            message: message.into(),
        }
    }
}

impl From<reed_solomon_erasure::Error> for CoreError {
    fn from(err: reed_solomon_erasure::Error) -> Self {
        Self::ErasureCoding(err.to_string())
    }
}
