//! Compact command implementation.

use std::path::Path;
use std::sync::Arc;

use silo_core::volume::{Volume, DATA_EXT};
use silo_core::VolumeId;
use silo_storage::BackendRegistry;

/// Runs the compact command.
///
/// Loads the volume directly (the store must not be running against the same
/// directory), stages a compacted copy, and swaps it in.
pub fn run(
    path: &Path,
    collection: &str,
    volume: u32,
    threshold: f64,
    dry_run: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let base = super::volume_base(path, collection, volume);
    if !super::volume_file(&base, DATA_EXT).exists() {
        return Err(format!("Data file not found: {}.{DATA_EXT}", base.display()).into());
    }

    let registry = Arc::new(BackendRegistry::with_defaults());
    let loaded = Volume::load(
        base,
        VolumeId::new(volume),
        collection.to_string(),
        registry,
        "file",
        u64::MAX,
    )?;

    let size_before = loaded.size()?;
    let ratio = loaded.garbage_ratio()?;
    println!("Compacting volume {volume} at {}", path.display());
    if dry_run {
        println!("(dry run - no changes will be made)");
    }
    println!();
    println!("  Size:          {size_before} bytes");
    println!("  Garbage ratio: {ratio:.3}");

    if ratio <= threshold {
        println!();
        println!("No compaction needed - garbage ratio at or below {threshold}");
        return Ok(());
    }
    if dry_run {
        println!();
        println!("Would compact: garbage ratio {ratio:.3} exceeds {threshold}");
        return Ok(());
    }

    println!();
    println!("Performing compaction...");
    loaded.compact()?;
    let revision = match loaded.commit_compact() {
        Ok(revision) => revision,
        Err(err) => {
            loaded.cleanup_compact()?;
            return Err(err.into());
        }
    };
    loaded.cleanup_compact()?;
    loaded.sync()?;

    let size_after = loaded.size()?;
    println!("✓ Compaction complete");
    println!("  Revision:   {revision}");
    println!("  Size after: {size_after} bytes");
    println!(
        "  Space saved: {} bytes ({:.1}%)",
        size_before.saturating_sub(size_after),
        if size_before > 0 {
            (size_before.saturating_sub(size_after)) as f64 / size_before as f64 * 100.0
        } else {
            0.0
        }
    );

    Ok(())
}
