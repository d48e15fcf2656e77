//! Store directory handling with exclusive locking.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::debug;

use crate::error::{CoreError, CoreResult};

const LOCK_FILE: &str = "LOCK";

/// A store's root directory, held under an exclusive advisory lock.
///
/// The lock file guards against two store processes mutating the same volume
/// files. It is released when the [`StoreDir`] is dropped.
#[derive(Debug)]
pub struct StoreDir {
    path: PathBuf,
    lock_file: File,
}

impl StoreDir {
    /// Opens (creating if needed) and locks a store directory.
    pub fn open(path: impl AsRef<Path>) -> CoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        fs::create_dir_all(&path)?;

        let lock_path = path.join(LOCK_FILE);
        let lock_file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)?;
        lock_file
            .try_lock_exclusive()
            .map_err(|_| CoreError::StoreLocked(path.display().to_string()))?;

        debug!(path = %path.display(), "store directory locked");
        Ok(Self { path, lock_file })
    }

    /// The directory path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Base path (without extension) for a volume's files.
    #[must_use]
    pub fn volume_base(&self, collection: &str, volume_id: crate::types::VolumeId) -> PathBuf {
        if collection.is_empty() {
            self.path.join(volume_id.to_string())
        } else {
            self.path.join(format!("{collection}_{volume_id}"))
        }
    }
}

impl Drop for StoreDir {
    fn drop(&mut self) {
        if let Err(err) = fs2::FileExt::unlock(&self.lock_file) {
            debug!(path = %self.path.display(), %err, "failed to unlock store directory");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::VolumeId;

    #[test]
    fn open_creates_and_locks() {
        let dir = tempfile::tempdir().unwrap();
        let store_dir = StoreDir::open(dir.path().join("store")).unwrap();
        assert!(store_dir.path().exists());
        assert!(store_dir.path().join(LOCK_FILE).exists());
    }

    #[test]
    fn second_open_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let _held = StoreDir::open(dir.path()).unwrap();
        assert!(matches!(
            StoreDir::open(dir.path()),
            Err(CoreError::StoreLocked(_))
        ));
    }

    #[test]
    fn lock_released_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        drop(StoreDir::open(dir.path()).unwrap());
        assert!(StoreDir::open(dir.path()).is_ok());
    }

    #[test]
    fn volume_base_names() {
        let dir = tempfile::tempdir().unwrap();
        let store_dir = StoreDir::open(dir.path()).unwrap();
        let plain = store_dir.volume_base("", VolumeId::new(3));
        assert!(plain.ends_with("3"));
        let scoped = store_dir.volume_base("photos", VolumeId::new(3));
        assert!(scoped.ends_with("photos_3"));
    }
}
