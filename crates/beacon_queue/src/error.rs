//! Error types for the action queue.

use beacon_storage::StorageError;
use beacon_sync_protocol::ProtocolError;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for queue operations.
pub type QueueResult<T> = Result<T, QueueError>;

/// Errors raised by the action queue.
///
/// Every variant is fatal to the operation that produced it. The queue never
/// falls back to non-durable storage.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The storage backend failed.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// A file system operation outside the backend failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The log contains a malformed record before its tail.
    #[error("queue log corrupted at offset {offset}: {reason}")]
    Corrupted {
        /// Offset of the offending record.
        offset: u64,
        /// What was wrong with it.
        reason: String,
    },

    /// A record's checksum did not match its contents.
    #[error("checksum mismatch at offset {offset}: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch {
        /// Offset of the record.
        offset: u64,
        /// Checksum stored in the record.
        expected: u32,
        /// Checksum computed over the record.
        actual: u32,
    },

    /// The log was written by a newer, unknown format.
    #[error("unsupported queue format version {found} (this build reads {supported})")]
    UnsupportedFormat {
        /// Version found in the log header.
        found: u16,
        /// Version this build writes.
        supported: u16,
    },

    /// Another process holds the queue directory.
    #[error("queue directory is locked by another process: {}", path.display())]
    Locked {
        /// Locked directory.
        path: PathBuf,
    },

    /// The queue directory does not exist and creation was disabled.
    #[error("queue directory does not exist: {}", path.display())]
    MissingDirectory {
        /// Expected directory.
        path: PathBuf,
    },

    /// No pending action has this id.
    #[error("no pending action with id {id}")]
    NotFound {
        /// Requested id.
        id: u64,
    },

    /// The requested mutation is not allowed for this action.
    #[error("invalid mutation of action {id}: {reason}")]
    InvalidMutation {
        /// Action id, 0 for a rejected enqueue.
        id: u64,
        /// Why it was refused.
        reason: String,
    },

    /// An earlier failed write could not be rolled back, so the log may end
    /// in a partial record. Writes are refused until the rollback succeeds
    /// or the queue is reopened.
    #[error("unfinished write at offset {offset} could not be rolled back: {reason}")]
    Unsettled {
        /// Log size before the failed write.
        offset: u64,
        /// Why the rollback failed.
        reason: String,
    },

    /// A payload could not be encoded or decoded.
    #[error("payload error: {0}")]
    Payload(#[from] ProtocolError),
}

impl QueueError {
    /// Creates a corruption error.
    pub fn corrupted(offset: u64, reason: impl Into<String>) -> Self {
        Self::Corrupted {
            offset,
            reason: reason.into(),
        }
    }

    /// Creates an invalid-mutation error.
    pub fn invalid_mutation(id: u64, reason: impl Into<String>) -> Self {
        Self::InvalidMutation {
            id,
            reason: reason.into(),
        }
    }

    /// Returns true if the on-disk data itself is damaged.
    #[must_use]
    pub fn is_corruption(&self) -> bool {
        matches!(self, Self::Corrupted { .. } | Self::ChecksumMismatch { .. })
    }
}
