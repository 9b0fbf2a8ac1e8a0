//! Error types for the sync engine.

use beacon_queue::QueueError;
use beacon_sync_protocol::ProtocolError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur while syncing.
///
/// The variants fall into four classes:
///
/// | class        | variants                                    | handling                          |
/// |--------------|---------------------------------------------|-----------------------------------|
/// | connectivity | `Connectivity`, `Timeout`, `Offline`        | retried, then queued              |
/// | terminal     | `Application`, `Unauthorized`, `Protocol`, `Codec` | surfaced, never queued     |
/// | already gone | `NotFound`                                  | success for update/delete         |
/// | persistence  | `Persistence`                               | fatal to the local operation      |
#[derive(Error, Debug)]
pub enum SyncError {
    /// No response, or the authority is temporarily unavailable.
    #[error("connectivity error: {message}")]
    Connectivity {
        /// Error message.
        message: String,
    },

    /// The device is known to be offline; nothing was attempted.
    #[error("device is offline")]
    Offline,

    /// The request did not complete in time.
    #[error("request timed out")]
    Timeout,

    /// The server rejected the request.
    #[error("request rejected with status {status}: {message}")]
    Application {
        /// Response status.
        status: u16,
        /// Response body or reason.
        message: String,
    },

    /// The session is missing, expired or lacks rights.
    #[error("not authorized (status {status}): {message}")]
    Unauthorized {
        /// Response status.
        status: u16,
        /// Response body or reason.
        message: String,
    },

    /// The target report does not exist on the server.
    #[error("target not found: {message}")]
    NotFound {
        /// Response body or reason.
        message: String,
    },

    /// The local queue failed.
    #[error("queue error: {0}")]
    Persistence(#[from] QueueError),

    /// A payload could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(#[from] ProtocolError),

    /// The server answered with something that is not a valid response.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The push channel closed.
    #[error("push channel closed")]
    ChannelClosed,
}

impl SyncError {
    /// Creates a connectivity error.
    pub fn connectivity(message: impl Into<String>) -> Self {
        Self::Connectivity {
            message: message.into(),
        }
    }

    /// Creates an application error.
    pub fn application(status: u16, message: impl Into<String>) -> Self {
        Self::Application {
            status,
            message: message.into(),
        }
    }

    /// Returns true if another attempt may succeed.
    ///
    /// `Offline` is not retryable: the retry client checks connectivity
    /// before each attempt and stops without spending the budget.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connectivity { .. } | Self::Timeout)
    }

    /// Returns true for failures caused by missing connectivity. Such
    /// actions are queued rather than surfaced.
    #[must_use]
    pub fn is_connectivity(&self) -> bool {
        matches!(self, Self::Connectivity { .. } | Self::Timeout | Self::Offline)
    }

    /// Returns true if the target was already gone.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns true if the request must not be retried or queued.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Application { .. } | Self::Unauthorized { .. } | Self::Protocol(_) | Self::Codec(_)
        )
    }
}
