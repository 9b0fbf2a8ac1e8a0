//! # Beacon Sync Engine
//!
//! Offline-first synchronization for incident reports.
//!
//! This crate provides:
//! - A retrying remote API client with immediate or exponential backoff
//! - A background dispatcher draining the durable action queue
//! - An optimistic merger producing the list the UI renders
//! - A consumer applying real-time push events
//! - HTTP transport over `reqwest`, plus loopback and mock transports
//!
//! ## Architecture
//!
//! ```text
//!  user action ─► Merger ──send──► RetryClient ──► RemoteApi (HTTP)
//!                   │ connectivity failure              ▲
//!                   ▼                                   │
//!               QueueStore ◄──── Dispatcher ────────────┘
//!                   ▲               ▲
//!                   │           SyncTrigger / connectivity
//!               view() ◄── ChannelConsumer ◄── PushChannel
//! ```
//!
//! The foreground (merger) and the background (dispatcher) share nothing
//! but the queue, the trigger and the connectivity state.
//!
//! ## Key Invariants
//!
//! - An action is either confirmed by the server or durably queued
//! - Terminal rejections are surfaced, never queued or replayed
//! - "Not found" on update or delete counts as success
//! - Queue drain order is FIFO
//! - A report is never shown both as confirmed and as a local shadow
//!
//! Creates carry no idempotency key: a crash between the server accepting a
//! queued create and the queue entry being removed replays it on restart and
//! yields a second report.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod channel;
mod client;
mod config;
mod connectivity;
mod dispatcher;
mod error;
mod http;
mod merger;
mod retry;
mod transport;

pub use channel::{ChannelConsumer, ConsumerHandle, ConsumerStats, PushChannel};
pub use client::{SyncClient, SyncRuntime};
pub use config::{BackoffSchedule, DrainPolicy, RetryConfig, SyncConfig};
pub use connectivity::{Connectivity, ConnectivitySignal, ConnectivityState};
pub use dispatcher::{
    Delivery, DispatchStats, Dispatcher, DispatcherHandle, DispatcherState, DrainReport,
    SyncNotice, SyncTrigger,
};
pub use error::{SyncError, SyncResult};
pub use http::{HttpClient, HttpTransport, LoopbackClient, LoopbackServer, ReqwestClient};
pub use merger::{ApplyOutcome, MergedReport, Merger, Origin, SubmitOutcome, UserAction};
pub use retry::{RetryClient, RetryStats};
pub use transport::{MockCall, MockFailure, MockTransport, RemoteApi};
