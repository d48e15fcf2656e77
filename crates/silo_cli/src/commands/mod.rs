//! Command implementations.

pub mod compact;
pub mod dump_log;
pub mod inspect;
pub mod verify;

use std::path::{Path, PathBuf};

/// Base path of a volume's files (no extension) inside a store directory.
pub(crate) fn volume_base(path: &Path, collection: &str, volume: u32) -> PathBuf {
    if collection.is_empty() {
        path.join(volume.to_string())
    } else {
        path.join(format!("{collection}_{volume}"))
    }
}

/// One of a volume's files by extension. Appends rather than replacing, so
/// collection names containing dots stay intact.
pub(crate) fn volume_file(base: &Path, ext: &str) -> PathBuf {
    let mut os = base.as_os_str().to_os_string();
    os.push(format!(".{ext}"));
    PathBuf::from(os)
}
