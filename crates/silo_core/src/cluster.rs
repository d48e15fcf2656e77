//! Seams to the rest of the cluster.
//!
//! The engine itself never speaks to the network; topology lookups and
//! shard transfer are injected behind these traits so the store can fan out
//! deletes and repair shards it does not hold locally.

use std::path::Path;

use crate::error::CoreResult;
use crate::types::{ShardId, VolumeId};
use silo_needle::NeedleId;

/// Resolves which servers hold a volume or its erasure shards.
pub trait PeerLookup: Send + Sync {
    /// Servers holding replicas of a regular volume.
    fn volume_locations(&self, volume_id: VolumeId) -> Vec<String>;

    /// Servers holding each erasure shard of a volume.
    fn shard_locations(&self, volume_id: VolumeId) -> Vec<(ShardId, Vec<String>)>;
}

/// Remote operations against peers holding erasure shards.
pub trait EcShardClient: Send + Sync {
    /// Asks `server` to mark a needle deleted in its shards of the volume.
    fn delete_needle(
        &self,
        server: &str,
        volume_id: VolumeId,
        collection: &str,
        needle_id: NeedleId,
    ) -> CoreResult<()>;

    /// Copies one shard file from `server` to `destination`, returning the
    /// number of bytes received.
    fn copy_shard(
        &self,
        server: &str,
        volume_id: VolumeId,
        collection: &str,
        shard: ShardId,
        destination: &Path,
    ) -> CoreResult<u64>;
}
