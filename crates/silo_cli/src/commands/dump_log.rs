//! Dump-log command implementation.

use std::path::Path;

use serde::Serialize;

use silo_core::volume::{scan_data_file, DATA_EXT};
use silo_core::VolumeId;
use silo_storage::FileBackend;

/// One dumped record.
#[derive(Debug, Serialize)]
pub struct DumpedRecord {
    /// Byte offset of the record in the data file.
    pub offset: u64,
    /// Needle id, hex.
    pub id: String,
    /// Cookie, hex.
    pub cookie: String,
    /// Payload length in bytes.
    pub data_len: usize,
    /// Full on-disk record length.
    pub record_len: u64,
    /// Whether the record is a deletion tombstone.
    pub tombstone: bool,
    /// File name, if stored.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Mime type, if stored.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime: Option<String>,
    /// Append timestamp in nanoseconds, zero for pre-v3 volumes.
    pub append_at_ns: u64,
}

/// Runs the dump-log command.
pub fn run(
    path: &Path,
    collection: &str,
    volume: u32,
    limit: Option<usize>,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let base = super::volume_base(path, collection, volume);
    let data_path = super::volume_file(&base, DATA_EXT);
    if !data_path.exists() {
        return Err(format!("Data file not found: {}", data_path.display()).into());
    }

    let backend = FileBackend::open_existing(&data_path)?;
    let max = limit.unwrap_or(usize::MAX);
    let mut records = Vec::new();

    scan_data_file(VolumeId::new(volume), &backend, |needle, offset, record_len| {
        if records.len() >= max {
            return Ok(());
        }
        records.push(DumpedRecord {
            offset,
            id: needle.id.to_string(),
            cookie: format!("{:x}", needle.cookie.as_u64()),
            data_len: needle.data.len(),
            record_len,
            tombstone: needle.data.is_empty() && needle.cookie.as_u64() == 0,
            name: (!needle.name.is_empty())
                .then(|| String::from_utf8_lossy(&needle.name).into_owned()),
            mime: (!needle.mime.is_empty())
                .then(|| String::from_utf8_lossy(&needle.mime).into_owned()),
            append_at_ns: needle.append_at_ns,
        });
        Ok(())
    })?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&records)?),
        _ => {
            for record in &records {
                let kind = if record.tombstone { "tombstone" } else { "needle" };
                print!(
                    "{:>10}  {kind:<9} id={} cookie={} data={}B record={}B",
                    record.offset, record.id, record.cookie, record.data_len, record.record_len
                );
                if let Some(name) = &record.name {
                    print!(" name={name}");
                }
                if let Some(mime) = &record.mime {
                    print!(" mime={mime}");
                }
                println!();
            }
            println!("{} records", records.len());
        }
    }

    Ok(())
}
