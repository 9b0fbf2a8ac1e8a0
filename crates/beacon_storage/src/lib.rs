//! # Beacon Storage
//!
//! Byte-store backends for the Beacon action queue.
//!
//! Backends are **opaque byte stores**: they append, read back, truncate
//! and atomically replace bytes. They know nothing about queue records,
//! framing or checksums; `beacon_queue` owns that format.
//!
//! ## Available Backends
//!
//! - [`FileBackend`] - persistent storage on the local file system
//! - [`InMemoryBackend`] - shared in-process buffer for tests and ephemeral queues
//!
//! ## Example
//!
//! ```rust
//! use beacon_storage::{InMemoryBackend, StorageBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! let offset = backend.append(b"queued").unwrap();
//! assert_eq!(backend.read_at(offset, 6).unwrap(), b"queued");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
