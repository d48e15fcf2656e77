//! Compact set of shard ids.

use std::fmt;

use crate::ec::TOTAL_SHARD_COUNT;
use crate::types::ShardId;

/// Bitset over the 14 shard ids of one volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct ShardBits(u32);

impl ShardBits {
    /// The empty set.
    pub const EMPTY: Self = Self(0);

    /// Builds a set from raw bits.
    #[must_use]
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// Raw bits, one per shard id.
    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Returns the set with `shard` added.
    #[must_use]
    pub const fn with(self, shard: ShardId) -> Self {
        Self(self.0 | (1 << shard.as_u8()))
    }

    /// Returns the set with `shard` removed.
    #[must_use]
    pub const fn without(self, shard: ShardId) -> Self {
        Self(self.0 & !(1 << shard.as_u8()))
    }

    /// Whether `shard` is in the set.
    #[must_use]
    pub const fn has(self, shard: ShardId) -> bool {
        self.0 & (1 << shard.as_u8()) != 0
    }

    /// Number of shards in the set.
    #[must_use]
    pub const fn count(self) -> usize {
        self.0.count_ones() as usize
    }

    /// Union with another set.
    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Set difference.
    #[must_use]
    pub const fn minus(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    /// The shard ids in ascending order.
    #[must_use]
    pub fn ids(self) -> Vec<ShardId> {
        (0..TOTAL_SHARD_COUNT as u8)
            .map(ShardId::new)
            .filter(|shard| self.has(*shard))
            .collect()
    }
}

impl FromIterator<ShardId> for ShardBits {
    fn from_iter<I: IntoIterator<Item = ShardId>>(iter: I) -> Self {
        iter.into_iter().fold(Self::EMPTY, Self::with)
    }
}

impl fmt::Display for ShardBits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:014b}", self.0)
    }
}
