//! Inspect command implementation.

use std::path::Path;
use std::sync::Arc;

use serde::Serialize;

use silo_core::ec::{local_shard_ids, VolumeInfo, ECX_EXT, VIF_EXT};
use silo_core::index::INDEX_ENTRY_SIZE;
use silo_core::volume::{Volume, DATA_EXT};
use silo_core::{VolumeId, VolumeStatus};
use silo_storage::BackendRegistry;

/// Inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Volume id.
    pub volume: u32,
    /// Collection name, empty for the default collection.
    pub collection: String,
    /// Status of the regular volume, absent if no data file exists.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub regular: Option<VolumeStatus>,
    /// Erasure-coded state, absent if the volume has not been sealed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub erasure: Option<EcInspect>,
}

/// Erasure-coded portion of an inspection.
#[derive(Debug, Serialize)]
pub struct EcInspect {
    /// Shards present locally, as a bitset string.
    pub shards: String,
    /// Number of shards present locally.
    pub shard_count: usize,
    /// Index entries in the sorted index, tombstones included.
    pub index_entries: u64,
    /// Needle format version recorded at seal time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<u8>,
    /// Compact revision recorded at seal time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compact_revision: Option<u16>,
    /// Size of the encoded data file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dat_size: Option<u64>,
}

/// Runs the inspect command.
pub fn run(
    path: &Path,
    collection: &str,
    volume: u32,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let base = super::volume_base(path, collection, volume);
    let id = VolumeId::new(volume);

    let regular = if super::volume_file(&base, DATA_EXT).exists() {
        let registry = Arc::new(BackendRegistry::with_defaults());
        let loaded = Volume::load(
            base.clone(),
            id,
            collection.to_string(),
            registry,
            "file",
            u64::MAX,
        )?;
        Some(loaded.status()?)
    } else {
        None
    };

    let ecx_path = super::volume_file(&base, ECX_EXT);
    let erasure = if ecx_path.exists() {
        let shards = local_shard_ids(&base);
        let index_entries = std::fs::metadata(&ecx_path)?.len() / INDEX_ENTRY_SIZE as u64;
        let vif_path = super::volume_file(&base, VIF_EXT);
        let info = if vif_path.exists() {
            Some(VolumeInfo::load(id, &vif_path)?)
        } else {
            None
        };
        Some(EcInspect {
            shards: shards.to_string(),
            shard_count: shards.count(),
            index_entries,
            version: info.as_ref().map(|i| i.version.as_byte()),
            compact_revision: info.as_ref().map(|i| i.compact_revision),
            dat_size: info.as_ref().map(|i| i.dat_size),
        })
    } else {
        None
    };

    if regular.is_none() && erasure.is_none() {
        return Err(format!("No volume files found at {}", base.display()).into());
    }

    let result = InspectResult {
        volume,
        collection: collection.to_string(),
        regular,
        erasure,
    };

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&result)?),
        _ => print_text(&result),
    }

    Ok(())
}

fn print_text(result: &InspectResult) {
    println!("Volume {}", result.volume);
    if !result.collection.is_empty() {
        println!("  Collection:       {}", result.collection);
    }
    if let Some(status) = &result.regular {
        println!("  Version:          {}", status.version);
        println!("  Replica placement: {}", status.replica_placement);
        if !status.ttl.is_empty() {
            println!("  TTL:              {}", status.ttl);
        }
        println!("  Size:             {} bytes", status.size);
        println!("  Live needles:     {}", status.live_count);
        println!("  Appended records: {}", status.file_count);
        println!("  Deleted records:  {}", status.deletion_count);
        println!("  Deleted bytes:    {}", status.deleted_bytes);
        println!("  Garbage ratio:    {:.3}", status.garbage_ratio);
        println!("  Compact revision: {}", status.compact_revision);
        println!("  Read only:        {}", status.read_only);
    }
    if let Some(ec) = &result.erasure {
        println!("  Erasure coded:");
        println!("    Local shards:   {} ({})", ec.shard_count, ec.shards);
        println!("    Index entries:  {}", ec.index_entries);
        if let Some(size) = ec.dat_size {
            println!("    Encoded size:   {size} bytes");
        }
        if let Some(revision) = ec.compact_revision {
            println!("    Compact revision: {revision}");
        }
    }
}
