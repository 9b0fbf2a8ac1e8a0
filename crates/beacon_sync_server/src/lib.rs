//! # Beacon Sync Server
//!
//! Reference report server for Beacon.
//!
//! This crate provides:
//! - The report REST surface (list, create, public create, status update,
//!   delete) over [`ApiRequest`](beacon_sync_protocol::ApiRequest) envelopes
//! - A change hub pushing `entityCreated` / `entityUpdated` /
//!   `entityDeleted` events, scoped per viewer
//! - Fault knobs for tests: warm-up 503s, session expiry, sequence gaps and
//!   dropped connections
//!
//! Restricted viewers see and receive only reports they authored; elevated
//! viewers see everything.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod config;
mod error;
mod hub;
mod server;
mod store;
mod viewer;

pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use hub::ChangeHub;
pub use server::ReportServer;
pub use store::ReportStore;
pub use viewer::{Viewer, ViewerRole};
