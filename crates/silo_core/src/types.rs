//! Core identifier types.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of a volume within a store.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct VolumeId(u32);

impl VolumeId {
    /// Creates a volume id from a raw value.
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for VolumeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for VolumeId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

/// Identifier of an erasure shard, `0..TOTAL_SHARD_COUNT`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct ShardId(u8);

impl ShardId {
    /// Creates a shard id from a raw value.
    #[must_use]
    pub const fn new(id: u8) -> Self {
        Self(id)
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self.0
    }

    /// Returns the raw value widened for indexing.
    #[must_use]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn volume_id_display_and_raw() {
        let id = VolumeId::new(42);
        assert_eq!(id.to_string(), "42");
        assert_eq!(id.as_u32(), 42);
        assert_eq!(VolumeId::from(42), id);
    }

    #[test]
    fn shard_id_indexing() {
        let id = ShardId::new(13);
        assert_eq!(id.as_usize(), 13);
        assert_eq!(id.to_string(), "13");
    }
}
