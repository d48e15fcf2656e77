//! Store configuration.

use serde::{Deserialize, Serialize};

/// Default volume size limit: 30 GiB, the point at which a volume flips
/// read-only and new writes go elsewhere.
pub const DEFAULT_VOLUME_SIZE_LIMIT: u64 = 30 * 1024 * 1024 * 1024;

/// Default depth of a volume writer's request queue.
pub const DEFAULT_WRITER_QUEUE_DEPTH: usize = 128;

/// Tunables for a [`Store`](crate::store::Store).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Data file size at which a volume becomes read-only.
    pub volume_size_limit: u64,
    /// Name of the storage backend to create volume files with.
    pub backend: String,
    /// Bound on queued mutations per volume writer.
    pub writer_queue_depth: usize,
    /// Throttle for bulk file copies, in bytes per second; zero disables it.
    pub copy_bytes_per_second: u64,
    /// Garbage ratio above which a vacuum request proceeds.
    pub garbage_threshold: f64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            volume_size_limit: DEFAULT_VOLUME_SIZE_LIMIT,
            backend: "file".to_string(),
            writer_queue_depth: DEFAULT_WRITER_QUEUE_DEPTH,
            copy_bytes_per_second: 0,
            garbage_threshold: 0.3,
        }
    }
}

impl StoreConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the volume size limit.
    #[must_use]
    pub fn with_volume_size_limit(mut self, limit: u64) -> Self {
        self.volume_size_limit = limit;
        self
    }

    /// Sets the backend name.
    #[must_use]
    pub fn with_backend(mut self, backend: impl Into<String>) -> Self {
        self.backend = backend.into();
        self
    }

    /// Sets the copy throttle in bytes per second.
    #[must_use]
    pub fn with_copy_bytes_per_second(mut self, rate: u64) -> Self {
        self.copy_bytes_per_second = rate;
        self
    }

    /// Sets the garbage threshold for vacuum decisions.
    #[must_use]
    pub fn with_garbage_threshold(mut self, threshold: f64) -> Self {
        self.garbage_threshold = threshold;
        self
    }
}
