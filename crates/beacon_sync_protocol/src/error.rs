//! Protocol error types.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while encoding or decoding protocol values.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// CBOR encoding failed.
    #[error("CBOR encode error: {0}")]
    Encode(String),

    /// CBOR decoding failed.
    #[error("CBOR decode error: {0}")]
    Decode(String),

    /// JSON encoding or decoding failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// An unknown action kind code was read.
    #[error("unknown action kind code {0}")]
    UnknownActionKind(u8),

    /// A payload does not fit the action kind it is stored under.
    #[error("payload of kind {found} stored under {expected}")]
    KindMismatch {
        /// Kind recorded on the queue entry.
        expected: &'static str,
        /// Kind of the decoded payload.
        found: &'static str,
    },
}
