//! Verify command implementation.

use std::collections::HashMap;
use std::path::Path;

use silo_core::index::{walk_index, NeedleValue, INDEX_ENTRY_SIZE};
use silo_core::volume::{scan_data_file, DATA_EXT, INDEX_EXT};
use silo_core::VolumeId;
use silo_needle::{actual_size, parse_header, NEEDLE_HEADER_SIZE, TOMBSTONE_SIZE};
use silo_storage::{FileBackend, StorageBackend};

/// Verification result.
#[derive(Debug)]
pub struct VerifyResult {
    /// Records decoded from the data log, tombstones included.
    pub records_checked: usize,
    /// Tombstone records in the log.
    pub tombstones: usize,
    /// Live entries in the index.
    pub live_entries: usize,
    /// List of errors found.
    pub errors: Vec<String>,
}

impl VerifyResult {
    fn new() -> Self {
        Self {
            records_checked: 0,
            tombstones: 0,
            live_entries: 0,
            errors: Vec::new(),
        }
    }

    fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Runs the verify command.
///
/// Walks the data log decoding every record (which checks each stored
/// checksum), then replays the index and confirms every live entry points at
/// a record with the matching id and size.
pub fn run(path: &Path, collection: &str, volume: u32) -> Result<(), Box<dyn std::error::Error>> {
    let base = super::volume_base(path, collection, volume);
    let id = VolumeId::new(volume);

    let data_path = super::volume_file(&base, DATA_EXT);
    if !data_path.exists() {
        return Err(format!("Data file not found: {}", data_path.display()).into());
    }

    println!("Verifying volume {volume} at {}", path.display());
    println!();

    let mut result = VerifyResult::new();
    let data = FileBackend::open_existing(&data_path)?;

    println!("Checking data log...");
    let super_block = match scan_data_file(id, &data, |needle, _offset, _len| {
        result.records_checked += 1;
        if needle.data.is_empty() && needle.cookie.as_u64() == 0 {
            result.tombstones += 1;
        }
        Ok(())
    }) {
        Ok(sb) => sb,
        Err(err) => {
            result.errors.push(format!("Data log scan failed: {err}"));
            println!();
            println!("✗ Volume verification failed");
            for error in &result.errors {
                println!("  ERROR: {error}");
            }
            return Err("Verification failed".into());
        }
    };
    println!(
        "  {} records decoded, {} tombstones",
        result.records_checked, result.tombstones
    );

    let index_path = super::volume_file(&base, INDEX_EXT);
    if index_path.exists() {
        println!("Checking index...");
        let index = FileBackend::open_existing(&index_path)?;
        let index_size = index.size()?;
        if index_size % INDEX_ENTRY_SIZE as u64 != 0 {
            result.errors.push(format!(
                "Index size {index_size} is not a multiple of {INDEX_ENTRY_SIZE}"
            ));
        } else {
            // Last entry per id wins, exactly as index replay does.
            let mut entries: HashMap<u64, (u32, u32)> = HashMap::new();
            walk_index(&index, |needle_id, offset, size| {
                entries.insert(needle_id.as_u64(), (offset, size));
                Ok(())
            })?;

            let data_size = data.size()?;
            let version = super_block.version;
            for (needle_id, (offset, size)) in &entries {
                if *size == TOMBSTONE_SIZE {
                    continue;
                }
                result.live_entries += 1;
                let byte_offset = NeedleValue {
                    offset: *offset,
                    size: *size,
                }
                .actual_offset();
                let record_len = actual_size(*size, version);
                if byte_offset + record_len > data_size {
                    result.errors.push(format!(
                        "Entry for needle {needle_id} points past the data file: \
                         offset {byte_offset}, record length {record_len}, file size {data_size}"
                    ));
                    continue;
                }
                let header_bytes = data.read_at(byte_offset, NEEDLE_HEADER_SIZE as usize)?;
                match parse_header(&header_bytes) {
                    Ok(header) if header.id.as_u64() != *needle_id => {
                        result.errors.push(format!(
                            "Entry for needle {needle_id} points at needle {} (offset {byte_offset})",
                            header.id
                        ));
                    }
                    Ok(header) if header.size != *size => {
                        result.errors.push(format!(
                            "Size mismatch for needle {needle_id}: index says {size}, record says {}",
                            header.size
                        ));
                    }
                    Ok(_) => {}
                    Err(err) => {
                        result.errors.push(format!(
                            "Unreadable record for needle {needle_id} at offset {byte_offset}: {err}"
                        ));
                    }
                }
            }
            println!("  {} live entries checked", result.live_entries);
        }
    } else {
        println!("Index file not found (rebuildable from the data log)");
    }

    println!();
    if result.is_ok() {
        println!("✓ Volume verification passed");
        Ok(())
    } else {
        println!("✗ Volume verification failed");
        for error in &result.errors {
            println!("  ERROR: {error}");
        }
        Err("Verification failed".into())
    }
}
