//! Volumes: append-only needle logs with an in-memory index, a single-writer
//! mutation queue, and vacuum-based space reclamation.

mod scanner;
mod vacuum;
#[allow(clippy::module_inception)]
mod volume;
mod writer;

pub use scanner::scan_data_file;
pub use vacuum::VacuumState;
pub use volume::{
    AppendOutcome, Volume, VolumeOptions, VolumeStatus, COMPACT_DATA_EXT, COMPACT_INDEX_EXT,
    DATA_EXT, INDEX_EXT,
};
pub use writer::VolumeWriter;

pub(crate) use volume::now_secs;
