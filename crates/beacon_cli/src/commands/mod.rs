//! CLI command implementations.

pub mod compact;
pub mod drain;
pub mod dump;
pub mod inspect;
pub mod migrate;

use beacon_queue::{QueueConfig, QueueStore};
use std::path::Path;

/// Opens an existing queue directory. Never creates one.
pub(crate) fn open_existing(path: &Path) -> Result<QueueStore, Box<dyn std::error::Error>> {
    let config = QueueConfig::new().with_create_if_missing(false);
    Ok(QueueStore::open(path, config)?)
}
