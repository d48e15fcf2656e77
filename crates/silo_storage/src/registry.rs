//! Explicit backend registry.
//!
//! The registry maps a backend name to a factory that creates backends for
//! concrete paths. It is constructed once at process startup and passed to
//! whatever component needs to instantiate a backend - there is no implicit
//! global list of backends.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use crate::file::FileBackend;
use crate::memory::InMemoryBackend;
use std::collections::HashMap;
use std::path::Path;

/// Factory that creates a storage backend for a given path.
pub type BackendFactory =
    Box<dyn Fn(&Path) -> StorageResult<Box<dyn StorageBackend>> + Send + Sync>;

/// Registry mapping backend names to factories.
///
/// # Example
///
/// ```rust
/// use silo_storage::BackendRegistry;
/// use std::path::Path;
///
/// let registry = BackendRegistry::with_defaults();
/// let backend = registry.create("memory", Path::new("ignored")).unwrap();
/// assert_eq!(backend.size().unwrap(), 0);
/// ```
pub struct BackendRegistry {
    factories: HashMap<String, BackendFactory>,
}

impl BackendRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Creates a registry with the built-in `file` and `memory` backends.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("file", |path| {
            Ok(Box::new(FileBackend::open(path)?) as Box<dyn StorageBackend>)
        });
        registry.register("memory", |_path| {
            Ok(Box::new(InMemoryBackend::new()) as Box<dyn StorageBackend>)
        });
        registry
    }

    /// Registers a factory under `name`, replacing any existing entry.
    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&Path) -> StorageResult<Box<dyn StorageBackend>> + Send + Sync + 'static,
    {
        self.factories.insert(name.to_string(), Box::new(factory));
    }

    /// Creates a backend by name for the given path.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::UnknownBackend`] if no factory is registered
    /// under `name`, or the factory's error if creation fails.
    pub fn create(&self, name: &str, path: &Path) -> StorageResult<Box<dyn StorageBackend>> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| StorageError::UnknownBackend(name.to_string()))?;
        factory(path)
    }

    /// Returns whether a factory is registered under `name`.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl std::fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("backends", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn defaults_contain_file_and_memory() {
        let registry = BackendRegistry::with_defaults();
        assert!(registry.contains("file"));
        assert!(registry.contains("memory"));
        assert!(!registry.contains("nvme"));
    }

    #[test]
    fn unknown_backend_fails() {
        let registry = BackendRegistry::new();
        let result = registry.create("file", Path::new("x"));
        assert!(matches!(result, Err(StorageError::UnknownBackend(_))));
    }

    #[test]
    fn create_file_backend() {
        let registry = BackendRegistry::with_defaults();
        let dir = tempdir().unwrap();
        let path = dir.path().join("reg.dat");

        let mut backend = registry.create("file", &path).unwrap();
        backend.append(b"abc").unwrap();
        assert!(path.exists());
    }

    #[test]
    fn custom_factory() {
        let mut registry = BackendRegistry::new();
        registry.register("mem2", |_| Ok(Box::new(InMemoryBackend::new())));

        let backend = registry.create("mem2", Path::new("ignored")).unwrap();
        assert_eq!(backend.size().unwrap(), 0);
    }
}
