//! # Silo Storage
//!
//! Storage backend trait and implementations for silo volume servers.
//!
//! This crate provides the lowest-level storage abstraction for silo.
//! Storage backends are **opaque byte stores** - they do not interpret
//! the data they store.
//!
//! ## Design Principles
//!
//! - Backends are simple byte stores (read, append, flush)
//! - No knowledge of needle records, superblocks, or shard layouts
//! - Must be `Send + Sync` for concurrent access
//! - The volume engine owns all file format interpretation
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - For testing and ephemeral volumes
//! - [`FileBackend`] - For persistent storage using OS file APIs
//!
//! Backends are instantiated through a [`BackendRegistry`] constructed at
//! startup; there is no implicit global backend list.
//!
//! ## Example
//!
//! ```rust
//! use silo_storage::{StorageBackend, InMemoryBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! let offset = backend.append(b"hello world").unwrap();
//! let data = backend.read_at(offset, 11).unwrap();
//! assert_eq!(&data, b"hello world");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;
mod registry;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
pub use registry::{BackendFactory, BackendRegistry};
