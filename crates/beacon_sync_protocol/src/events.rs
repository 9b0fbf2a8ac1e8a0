//! Real-time channel events.

use crate::report::{RemoteId, Report};
use serde::{Deserialize, Serialize};

/// A change pushed by the server over the real-time channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ChangeEvent {
    /// A report was created.
    #[serde(rename = "entityCreated")]
    Created(Report),
    /// A report was changed.
    #[serde(rename = "entityUpdated")]
    Updated(Report),
    /// A report was deleted.
    #[serde(rename = "entityDeleted")]
    Deleted(RemoteId),
}

impl ChangeEvent {
    /// Returns the remote id the event is about.
    #[must_use]
    pub fn remote_id(&self) -> &RemoteId {
        match self {
            Self::Created(report) | Self::Updated(report) => &report.id,
            Self::Deleted(id) => id,
        }
    }

    /// Returns the wire name of the event.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Created(_) => "entityCreated",
            Self::Updated(_) => "entityUpdated",
            Self::Deleted(_) => "entityDeleted",
        }
    }
}

/// One delivery on a subscription.
///
/// `seq` starts at 1 for every subscription and increases by one per
/// delivered message, so a receiver detects missed events by a jump.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelMessage {
    /// Per-subscription sequence number.
    pub seq: u64,
    /// The change.
    pub event: ChangeEvent,
}

impl ChannelMessage {
    /// Creates a message.
    #[must_use]
    pub fn new(seq: u64, event: ChangeEvent) -> Self {
        Self { seq, event }
    }
}
