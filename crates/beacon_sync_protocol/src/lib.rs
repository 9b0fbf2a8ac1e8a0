//! # Beacon Sync Protocol
//!
//! Types shared by every layer of the Beacon sync stack.
//!
//! This crate provides:
//! - [`Report`] and its create/update bodies
//! - [`PendingAction`] and [`ActionPayload`], the unit of work held in the
//!   durable queue (payloads are CBOR)
//! - [`ChangeEvent`] and [`ChannelMessage`] pushed over the real-time channel
//! - [`ApiRequest`] / [`ApiResponse`] envelopes for the remote REST API (JSON)
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod action;
mod api;
mod error;
mod events;
mod report;

pub use action::{ActionKind, ActionPayload, PendingAction};
pub use api::{ApiRequest, ApiResponse, Endpoint, Method, StatusClass, REPORTS_PATH};
pub use error::{ProtocolError, ProtocolResult};
pub use events::{ChangeEvent, ChannelMessage};
pub use report::{IdentityKey, NewReport, RemoteId, Report, ReportStatus, StatusUpdate};
