//! # Beacon Queue
//!
//! The durable queue of report actions waiting to reach the server.
//!
//! Actions are appended to a framed, checksummed log and survive process
//! restarts. The queue is the only state shared between the foreground
//! (which enqueues) and the background dispatcher (which drains).
//!
//! ## Guarantees
//!
//! - ids are unique and strictly increasing per queue, across restarts
//!   and compactions
//! - [`QueueStore::list_pending`] returns a consistent snapshot, oldest first
//! - an incomplete record at the end of the log (crash mid-append) is
//!   dropped on open; damage anywhere else refuses to open
//! - opening never falls back to a non-durable queue
//!
//! ## Example
//!
//! ```rust,no_run
//! use beacon_queue::{QueueConfig, QueueStore};
//! use std::path::Path;
//!
//! let queue = QueueStore::open(Path::new("beacon-queue"), QueueConfig::default())?;
//! for action in queue.list_pending() {
//!     println!("{} {}", action.id, action.kind.name());
//! }
//! # Ok::<(), beacon_queue::QueueError>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod dir;
mod error;
mod migration;
mod record;
mod store;

pub use config::{QueueConfig, DEFAULT_COMPACT_THRESHOLD};
pub use dir::QueueDir;
pub use error::{QueueError, QueueResult};
pub use migration::{MigrationOperation, MigrationReport};
pub use record::{compute_crc32, decode_frame, QueueRecord, RecordType, RECORD_MAGIC, RECORD_VERSION};
pub use store::{CompactionStats, Enqueued, QueueStats, QueueStore, FORMAT_VERSION};
