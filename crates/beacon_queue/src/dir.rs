//! Queue directory layout and locking.
//!
//! ```text
//! <queue_dir>/
//! ├─ LOCK            # advisory lock, one process at a time
//! ├─ actions.log     # framed action log
//! └─ reports.queue   # legacy single-purpose store, removed once migrated
//! ```

use crate::error::{QueueError, QueueResult};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

const LOCK_FILE: &str = "LOCK";
const LOG_FILE: &str = "actions.log";
const LEGACY_REPORTS_FILE: &str = "reports.queue";

/// An opened queue directory.
///
/// Holds an exclusive advisory lock on `LOCK` for its whole lifetime, so a
/// second process (or a second store in this process) cannot replay and
/// append to the same log concurrently.
#[derive(Debug)]
pub struct QueueDir {
    path: PathBuf,
    _lock: File,
}

impl QueueDir {
    /// Opens (and optionally creates) the directory and takes the lock.
    ///
    /// # Errors
    ///
    /// - [`QueueError::MissingDirectory`] if absent and `create_if_missing` is false
    /// - [`QueueError::Locked`] if another holder has the lock
    /// - I/O errors
    pub fn open(path: &Path, create_if_missing: bool) -> QueueResult<Self> {
        if !path.exists() {
            if !create_if_missing {
                return Err(QueueError::MissingDirectory {
                    path: path.to_path_buf(),
                });
            }
            fs::create_dir_all(path)?;
        }

        let lock = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;
        if lock.try_lock_exclusive().is_err() {
            return Err(QueueError::Locked {
                path: path.to_path_buf(),
            });
        }

        Ok(Self {
            path: path.to_path_buf(),
            _lock: lock,
        })
    }

    /// Returns the directory path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the path of the action log.
    #[must_use]
    pub fn log_path(&self) -> PathBuf {
        self.path.join(LOG_FILE)
    }

    /// Returns the path of the legacy reports store.
    #[must_use]
    pub fn legacy_reports_path(&self) -> PathBuf {
        self.path.join(LEGACY_REPORTS_FILE)
    }

    /// Returns where a log of an outdated format is moved when discarded.
    #[must_use]
    pub fn discarded_log_path(&self, format_version: u16) -> PathBuf {
        self.path
            .join(format!("{LOG_FILE}.discarded-v{format_version}"))
    }
}
