//! # Beacon Testkit
//!
//! Test utilities for the action queue and the sync engine.
//!
//! This crate provides:
//! - Report fixtures and queue helpers
//! - Property-based generators and a reference model of the queue
//! - A storage backend that simulates crashes mid-write
//!
//! ## Usage
//!
//! ```rust
//! use beacon_testkit::prelude::*;
//!
//! let store = memory_queue();
//! let id = enqueue_create(&store, "Depot fire");
//! assert!(!store.get(id).unwrap().payload.is_empty());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod crash;
pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::crash::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}
