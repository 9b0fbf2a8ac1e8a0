//! Queued actions and their payloads.

use crate::error::{ProtocolError, ProtocolResult};
use crate::report::{NewReport, RemoteId, StatusUpdate};
use serde::{Deserialize, Serialize};

/// Kind of a queued mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ActionKind {
    /// Create a new report.
    Create = 1,
    /// Change the status of an existing report.
    Update = 2,
    /// Delete an existing report.
    Delete = 3,
}

impl ActionKind {
    /// Converts a stored byte to a kind.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::UnknownActionKind`] for unassigned codes.
    pub fn from_byte(b: u8) -> ProtocolResult<Self> {
        match b {
            1 => Ok(Self::Create),
            2 => Ok(Self::Update),
            3 => Ok(Self::Delete),
            other => Err(ProtocolError::UnknownActionKind(other)),
        }
    }

    /// Converts the kind to its stored byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }

    /// Returns the upper-case name used in logs and CLI output.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Create => "CREATE",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
        }
    }
}

/// Operation data carried by a queued action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionPayload {
    /// Create a report. `public` selects the unauthenticated endpoint.
    Create {
        /// Report body.
        report: NewReport,
        /// Submit through the public endpoint.
        public: bool,
    },
    /// Replace the status of the target report.
    UpdateStatus(StatusUpdate),
    /// Delete the target report.
    Delete,
}

impl ActionPayload {
    /// Returns the queue kind this payload is stored under.
    #[must_use]
    pub fn kind(&self) -> ActionKind {
        match self {
            Self::Create { .. } => ActionKind::Create,
            Self::UpdateStatus(_) => ActionKind::Update,
            Self::Delete => ActionKind::Delete,
        }
    }

    /// Encodes the payload as CBOR.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Encode`] if serialization fails.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf).map_err(|e| ProtocolError::Encode(e.to_string()))?;
        Ok(buf)
    }

    /// Decodes a CBOR payload.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Decode`] if the bytes are not a valid payload.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        ciborium::from_reader(bytes).map_err(|e| ProtocolError::Decode(e.to_string()))
    }
}

/// A mutation waiting in the durable queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingAction {
    /// Local id, unique and increasing per device.
    pub id: u64,
    /// Kind of mutation.
    pub kind: ActionKind,
    /// Remote id of the target report, absent for creates.
    pub target_id: Option<RemoteId>,
    /// Encoded [`ActionPayload`].
    pub payload: Vec<u8>,
    /// Enqueue time, unix milliseconds.
    pub enqueued_at: u64,
}

impl PendingAction {
    /// Decodes the payload and checks it matches [`Self::kind`].
    ///
    /// # Errors
    ///
    /// Returns a decode error, or [`ProtocolError::KindMismatch`] when the
    /// payload describes a different kind of mutation.
    pub fn decode_payload(&self) -> ProtocolResult<ActionPayload> {
        let payload = ActionPayload::decode(&self.payload)?;
        if payload.kind() != self.kind {
            return Err(ProtocolError::KindMismatch {
                expected: self.kind.name(),
                found: payload.kind().name(),
            });
        }
        Ok(payload)
    }
}
