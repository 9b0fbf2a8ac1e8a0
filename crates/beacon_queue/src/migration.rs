//! Upgrades of older on-disk queue stores.
//!
//! Two predecessors of the current log exist:
//!
//! - **Legacy reports store** (`reports.queue`): one JSON report body per
//!   line, create-only. Its entries are imported as CREATE actions and the
//!   file is deleted afterwards.
//! - **Format 1 action log**: same framing, JSON payloads. It cannot be
//!   read by this build and is moved aside to `actions.log.discarded-v1`,
//!   never deleted silently and never left where it would be opened again.
//!
//! Both steps run inside [`crate::QueueStore::open`] and are recorded in a
//! [`MigrationReport`].

use crate::dir::QueueDir;
use crate::error::QueueResult;
use crate::record::{decode_frame, QueueRecord};
use crate::store::{QueueStore, FORMAT_VERSION};
use beacon_sync_protocol::{ActionKind, ActionPayload, NewReport};
use std::fmt;
use std::fs;
use std::path::PathBuf;
use tracing::{info, warn};

/// A step performed while opening a queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationOperation {
    /// A legacy reports store was imported and removed.
    ImportedLegacyReports {
        /// Path of the removed store.
        path: PathBuf,
        /// Entries enqueued as CREATE actions.
        imported: usize,
        /// Entries already present in the queue from an interrupted import.
        already_queued: usize,
        /// Lines that were not valid report bodies.
        unreadable: usize,
    },
    /// An action log in an unsupported older format was moved aside.
    DiscardedOutdatedLog {
        /// Format version of the discarded log.
        format_version: u16,
        /// Where the log now lives.
        moved_to: PathBuf,
        /// Size of the discarded log.
        bytes: u64,
    },
}

impl fmt::Display for MigrationOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ImportedLegacyReports {
                path,
                imported,
                already_queued,
                unreadable,
            } => write!(
                f,
                "imported {imported} report(s) from {} ({already_queued} already queued, {unreadable} unreadable)",
                path.display()
            ),
            Self::DiscardedOutdatedLog {
                format_version,
                moved_to,
                bytes,
            } => write!(
                f,
                "discarded format {format_version} log ({bytes} bytes), kept at {}",
                moved_to.display()
            ),
        }
    }
}

/// What [`crate::QueueStore::open`] migrated or discarded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    /// Steps in the order they ran.
    pub operations: Vec<MigrationOperation>,
}

impl MigrationReport {
    /// Returns true if nothing needed migrating.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Returns the number of legacy entries imported.
    #[must_use]
    pub fn imported(&self) -> usize {
        self.operations
            .iter()
            .map(|op| match op {
                MigrationOperation::ImportedLegacyReports { imported, .. } => *imported,
                MigrationOperation::DiscardedOutdatedLog { .. } => 0,
            })
            .sum()
    }

    /// Returns true if an outdated log was discarded.
    #[must_use]
    pub fn discarded(&self) -> bool {
        self.operations
            .iter()
            .any(|op| matches!(op, MigrationOperation::DiscardedOutdatedLog { .. }))
    }
}

/// Moves an action log with an older format version out of the way.
pub(crate) fn discard_outdated_log(dir: &QueueDir, report: &mut MigrationReport) -> QueueResult<()> {
    let log_path = dir.log_path();
    if !log_path.exists() {
        return Ok(());
    }
    let bytes = fs::read(&log_path)?;
    // Torn or damaged headers are left for replay to report.
    let Ok(Some((QueueRecord::Header { format_version }, _))) = decode_frame(&bytes, 0) else {
        return Ok(());
    };
    if format_version >= FORMAT_VERSION {
        return Ok(());
    }

    let moved_to = dir.discarded_log_path(format_version);
    fs::rename(&log_path, &moved_to)?;
    warn!(
        format_version,
        moved_to = %moved_to.display(),
        "discarded queue log written by an unsupported older format"
    );
    report.operations.push(MigrationOperation::DiscardedOutdatedLog {
        format_version,
        moved_to,
        bytes: bytes.len() as u64,
    });
    Ok(())
}

/// Imports `reports.queue` into `store` as CREATE actions, then deletes it.
///
/// Bodies equal to a CREATE already in the queue are skipped, so an import
/// interrupted before the legacy file was deleted does not double up.
pub(crate) fn import_legacy_reports(
    dir: &QueueDir,
    store: &QueueStore,
    report: &mut MigrationReport,
) -> QueueResult<()> {
    let path = dir.legacy_reports_path();
    if !path.exists() {
        return Ok(());
    }
    let contents = fs::read(&path)?;

    let mut queued: Vec<NewReport> = store
        .list_pending()
        .into_iter()
        .filter(|a| a.kind == ActionKind::Create)
        .filter_map(|a| match a.decode_payload() {
            Ok(ActionPayload::Create { report, .. }) => Some(report),
            _ => None,
        })
        .collect();

    let (mut imported, mut already_queued, mut unreadable) = (0, 0, 0);
    for (line_no, raw) in contents.split(|&b| b == b'\n').enumerate() {
        let Ok(line) = std::str::from_utf8(raw) else {
            warn!(line = line_no + 1, "skipping legacy report that is not UTF-8");
            unreadable += 1;
            continue;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let body: NewReport = match serde_json::from_str(line) {
            Ok(body) => body,
            Err(err) => {
                warn!(line = line_no + 1, error = %err, "skipping unreadable legacy report");
                unreadable += 1;
                continue;
            }
        };
        if let Some(pos) = queued.iter().position(|q| *q == body) {
            queued.swap_remove(pos);
            already_queued += 1;
            continue;
        }
        store.enqueue_payload(
            None,
            &ActionPayload::Create {
                report: body,
                public: false,
            },
        )?;
        imported += 1;
    }

    fs::remove_file(&path)?;
    info!(imported, already_queued, unreadable, "legacy reports store migrated");
    report.operations.push(MigrationOperation::ImportedLegacyReports {
        path,
        imported,
        already_queued,
        unreadable,
    });
    Ok(())
}
