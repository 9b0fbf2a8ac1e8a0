//! Queue configuration.

/// Default log size above which an emptied queue is compacted.
pub const DEFAULT_COMPACT_THRESHOLD: u64 = 64 * 1024;

/// Configuration for opening a [`crate::QueueStore`].
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Create the queue directory when it does not exist.
    pub create_if_missing: bool,
    /// `fsync` the log after every record instead of only flushing it.
    pub sync_on_write: bool,
    /// Compact automatically once the queue drains and the log is at least
    /// this many bytes. `0` disables automatic compaction.
    pub compact_threshold: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            sync_on_write: true,
            compact_threshold: DEFAULT_COMPACT_THRESHOLD,
        }
    }
}

impl QueueConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether a missing directory is created.
    #[must_use]
    pub fn with_create_if_missing(mut self, create: bool) -> Self {
        self.create_if_missing = create;
        self
    }

    /// Sets whether each record is synced to disk.
    #[must_use]
    pub fn with_sync_on_write(mut self, sync: bool) -> Self {
        self.sync_on_write = sync;
        self
    }

    /// Sets the automatic compaction threshold in bytes.
    #[must_use]
    pub fn with_compact_threshold(mut self, bytes: u64) -> Self {
        self.compact_threshold = bytes;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_overrides_defaults() {
        let config = QueueConfig::new()
            .with_sync_on_write(false)
            .with_compact_threshold(0)
            .with_create_if_missing(false);
        assert!(!config.sync_on_write);
        assert_eq!(config.compact_threshold, 0);
        assert!(!config.create_if_missing);
        assert!(QueueConfig::default().sync_on_write);
    }
}
