//! Core volume engine: append-only needle logs, superblocks, vacuum, and
//! Reed-Solomon erasure coding.
//!
//! A [`Store`] owns a locked directory of volumes. Each volume is a data log
//! of needle records behind an in-memory index, mutated through a
//! single-writer queue and reclaimed by staged vacuum cycles. Sealed volumes
//! can be cut into 10+4 erasure shards and served shard-by-shard.
//!
//! # Example
//!
//! ```no_run
//! use silo_core::{Store, StoreConfig, VolumeId, VolumeOptions};
//! use silo_needle::{Needle, NeedleId};
//!
//! # fn main() -> Result<(), silo_core::CoreError> {
//! let store = Store::open("/var/lib/silo", StoreConfig::default())?;
//! store.create_volume(VolumeId::new(1), "", VolumeOptions::default())?;
//!
//! let needle = Needle::new(NeedleId::new(42), b"hello".to_vec());
//! store.put(VolumeId::new(1), needle)?;
//! let read = store.get(VolumeId::new(1), NeedleId::new(42))?;
//! assert_eq!(read.data, b"hello");
//! # Ok(())
//! # }
//! ```

pub mod cluster;
pub mod config;
pub mod dir;
pub mod ec;
pub mod error;
pub mod index;
pub mod store;
pub mod super_block;
pub mod throttle;
pub mod types;
pub mod volume;

pub use cluster::{EcShardClient, PeerLookup};
pub use config::StoreConfig;
pub use dir::StoreDir;
pub use error::{CoreError, CoreResult};
pub use index::{NeedleMap, NeedleValue};
pub use store::{FileRangeStream, Store, StoreStatus};
pub use super_block::{ReplicaPlacement, SuperBlock, SUPER_BLOCK_SIZE};
pub use throttle::WriteThrottler;
pub use types::{ShardId, VolumeId};
pub use volume::{
    scan_data_file, AppendOutcome, VacuumState, Volume, VolumeOptions, VolumeStatus, VolumeWriter,
};
