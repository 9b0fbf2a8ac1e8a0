//! The durable action queue.

use crate::config::QueueConfig;
use crate::dir::QueueDir;
use crate::error::{QueueError, QueueResult};
use crate::migration::{self, MigrationReport};
use crate::record::{decode_frame, QueueRecord};
use beacon_storage::{FileBackend, InMemoryBackend, StorageBackend, StorageResult};
use beacon_sync_protocol::{ActionKind, ActionPayload, PendingAction, RemoteId};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

/// Store format version written by this build.
///
/// Version 1 logs kept JSON payloads and are discarded on open.
pub const FORMAT_VERSION: u16 = 2;

/// Outcome of [`QueueStore::enqueue_coalescing`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Enqueued {
    /// Id of the entry now holding the action.
    pub id: u64,
    /// True if an existing UPDATE for the same target was overwritten
    /// instead of appending a new entry.
    pub coalesced: bool,
}

/// Result of a compaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactionStats {
    /// Log size before compaction.
    pub bytes_before: u64,
    /// Log size after compaction.
    pub bytes_after: u64,
    /// Pending actions carried over.
    pub live_entries: usize,
}

/// Point-in-time statistics of a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueStats {
    /// Pending actions.
    pub pending: usize,
    /// Pending CREATE actions.
    pub creates: usize,
    /// Pending UPDATE actions.
    pub updates: usize,
    /// Pending DELETE actions.
    pub deletes: usize,
    /// Log size in bytes.
    pub log_bytes: u64,
    /// Records in the log.
    pub records: u64,
    /// Id the next enqueue will receive.
    pub next_id: u64,
    /// Store format version.
    pub format_version: u16,
}

struct Inner {
    backend: Box<dyn StorageBackend>,
    entries: BTreeMap<u64, PendingAction>,
    next_id: u64,
    records: u64,
    sync_on_write: bool,
    /// Log size to roll back to before the next write.
    unsettled: Option<u64>,
}

fn write_frame(backend: &mut dyn StorageBackend, frame: &[u8], sync: bool) -> StorageResult<()> {
    backend.append(frame)?;
    backend.flush()?;
    if sync {
        backend.sync()?;
    }
    Ok(())
}

pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

impl Inner {
    fn replay(&mut self) -> QueueResult<()> {
        let log = self.backend.read_all()?;
        let mut offset = 0u64;
        while let Some((record, len)) = decode_frame(&log, offset)? {
            self.apply(record, offset)?;
            self.records += 1;
            offset += len as u64;
        }

        let torn = log.len() as u64 - offset;
        if torn > 0 {
            warn!(offset, torn_bytes = torn, "truncating incomplete record at end of queue log");
            self.backend.truncate(offset)?;
        }
        Ok(())
    }

    fn apply(&mut self, record: QueueRecord, offset: u64) -> QueueResult<()> {
        let first = self.records == 0;
        match record {
            QueueRecord::Header { format_version } => {
                if !first {
                    return Err(QueueError::corrupted(offset, "header record after start of log"));
                }
                if format_version != FORMAT_VERSION {
                    return Err(QueueError::UnsupportedFormat {
                        found: format_version,
                        supported: FORMAT_VERSION,
                    });
                }
            }
            _ if first => {
                return Err(QueueError::corrupted(offset, "log does not start with a header"));
            }
            QueueRecord::Enqueue(action) => {
                if self.entries.contains_key(&action.id) {
                    return Err(QueueError::corrupted(
                        offset,
                        format!("action {} enqueued twice", action.id),
                    ));
                }
                self.next_id = self.next_id.max(action.id + 1);
                self.entries.insert(action.id, action);
            }
            QueueRecord::Update { id, payload } => match self.entries.get_mut(&id) {
                Some(entry) => entry.payload = payload,
                None => {
                    return Err(QueueError::corrupted(
                        offset,
                        format!("update of unknown action {id}"),
                    ))
                }
            },
            QueueRecord::Remove { id } => {
                self.entries.remove(&id);
            }
            QueueRecord::Checkpoint { next_id } => {
                self.next_id = self.next_id.max(next_id);
            }
        }
        Ok(())
    }

    fn settle(&mut self) -> QueueResult<()> {
        let Some(offset) = self.unsettled else {
            return Ok(());
        };
        self.backend
            .truncate(offset)
            .map_err(|err| QueueError::Unsettled {
                offset,
                reason: err.to_string(),
            })?;
        info!(offset, "rolled back earlier failed queue write");
        self.unsettled = None;
        Ok(())
    }

    fn append(&mut self, record: &QueueRecord) -> QueueResult<()> {
        self.settle()?;
        let frame = record.encode()?;
        let before = self.backend.size()?;
        if let Err(err) = write_frame(self.backend.as_mut(), &frame, self.sync_on_write) {
            if let Err(rollback) = self.backend.truncate(before) {
                warn!(
                    offset = before,
                    error = %rollback,
                    "could not roll back queue record, writes paused until it can be"
                );
                self.unsettled = Some(before);
            }
            return Err(err.into());
        }
        self.records += 1;
        Ok(())
    }

    fn push(
        &mut self,
        kind: ActionKind,
        target_id: Option<RemoteId>,
        payload: Vec<u8>,
    ) -> QueueResult<u64> {
        match (kind, &target_id) {
            (ActionKind::Create, Some(_)) => {
                return Err(QueueError::invalid_mutation(0, "CREATE cannot carry a target id"))
            }
            (ActionKind::Update | ActionKind::Delete, None) => {
                return Err(QueueError::invalid_mutation(
                    0,
                    format!("{} requires a target id", kind.name()),
                ))
            }
            _ => {}
        }

        // Ids are spent even when the write fails; a frame that could not be
        // rolled back may still carry this one.
        let id = self.next_id;
        self.next_id += 1;
        let action = PendingAction {
            id,
            kind,
            target_id,
            payload,
            enqueued_at: now_millis(),
        };
        self.append(&QueueRecord::Enqueue(action.clone()))?;
        debug!(id, kind = kind.name(), "action enqueued");
        self.entries.insert(id, action);
        Ok(id)
    }

    fn overwrite(&mut self, id: u64, payload: Vec<u8>) -> QueueResult<()> {
        match self.entries.get(&id) {
            None => return Err(QueueError::NotFound { id }),
            Some(entry) if entry.kind != ActionKind::Update => {
                return Err(QueueError::invalid_mutation(
                    id,
                    format!("{} actions are immutable", entry.kind.name()),
                ))
            }
            Some(_) => {}
        }
        self.append(&QueueRecord::Update {
            id,
            payload: payload.clone(),
        })?;
        if let Some(entry) = self.entries.get_mut(&id) {
            entry.payload = payload;
        }
        Ok(())
    }

    fn compact(&mut self) -> QueueResult<CompactionStats> {
        let bytes_before = self.backend.size()?;
        let mut image = QueueRecord::Header {
            format_version: FORMAT_VERSION,
        }
        .encode()?;
        image.extend(
            QueueRecord::Checkpoint {
                next_id: self.next_id,
            }
            .encode()?,
        );
        for action in self.entries.values() {
            image.extend(QueueRecord::Enqueue(action.clone()).encode()?);
        }

        self.backend.replace(&image)?;
        self.unsettled = None;
        self.records = 2 + self.entries.len() as u64;
        let stats = CompactionStats {
            bytes_before,
            bytes_after: image.len() as u64,
            live_entries: self.entries.len(),
        };
        info!(
            before = stats.bytes_before,
            after = stats.bytes_after,
            live = stats.live_entries,
            "queue log compacted"
        );
        Ok(stats)
    }
}

/// A durable FIFO of [`PendingAction`]s.
///
/// Every mutation is appended to the log and flushed before the in-memory
/// index changes. All operations run under one mutex, so a concurrent
/// [`QueueStore::list_pending`] sees each record either fully applied or
/// not at all.
///
/// # Example
///
/// ```rust
/// use beacon_queue::QueueStore;
/// use beacon_sync_protocol::{ActionPayload, NewReport};
///
/// let queue = QueueStore::open_in_memory().unwrap();
/// let payload = ActionPayload::Create {
///     report: NewReport::new("Fire", "Smoke on 5th", "12.9, 77.6", "asha"),
///     public: false,
/// };
/// let id = queue.enqueue_payload(None, &payload).unwrap();
/// assert_eq!(queue.list_pending()[0].id, id);
/// ```
pub struct QueueStore {
    inner: Mutex<Inner>,
    compact_threshold: u64,
    dir: Option<QueueDir>,
    migration: MigrationReport,
}

impl std::fmt::Debug for QueueStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueStore")
            .field("path", &self.path())
            .field("pending", &self.len())
            .finish_non_exhaustive()
    }
}

impl QueueStore {
    /// Opens the queue stored in directory `path`.
    ///
    /// Outdated logs are moved aside and a legacy reports store is imported
    /// before the store is returned; see [`QueueStore::migration_report`].
    ///
    /// # Errors
    ///
    /// Any failure is returned as is. There is no in-memory fallback.
    pub fn open(path: &Path, config: QueueConfig) -> QueueResult<Self> {
        let dir = QueueDir::open(path, config.create_if_missing)?;
        let mut report = MigrationReport::default();
        migration::discard_outdated_log(&dir, &mut report)?;

        let backend = FileBackend::open(&dir.log_path())?;
        let mut store = Self::with_backend(Box::new(backend), config)?;
        migration::import_legacy_reports(&dir, &store, &mut report)?;

        info!(
            path = %path.display(),
            pending = store.len(),
            migrations = report.operations.len(),
            "action queue opened"
        );
        store.dir = Some(dir);
        store.migration = report;
        Ok(store)
    }

    /// Opens an empty queue that lives in memory only.
    ///
    /// # Errors
    ///
    /// Returns an error if the log header cannot be written.
    pub fn open_in_memory() -> QueueResult<Self> {
        Self::with_backend(Box::new(InMemoryBackend::new()), QueueConfig::default())
    }

    /// Opens a queue over an arbitrary backend, replaying its contents.
    ///
    /// # Errors
    ///
    /// Returns an error if replay finds corruption or an unsupported format.
    pub fn with_backend(backend: Box<dyn StorageBackend>, config: QueueConfig) -> QueueResult<Self> {
        let mut inner = Inner {
            backend,
            entries: BTreeMap::new(),
            next_id: 1,
            records: 0,
            sync_on_write: config.sync_on_write,
            unsettled: None,
        };
        inner.replay()?;
        if inner.records == 0 {
            inner.append(&QueueRecord::Header {
                format_version: FORMAT_VERSION,
            })?;
        }
        debug!(pending = inner.entries.len(), next_id = inner.next_id, "queue replayed");

        Ok(Self {
            inner: Mutex::new(inner),
            compact_threshold: config.compact_threshold,
            dir: None,
            migration: MigrationReport::default(),
        })
    }

    /// Appends an action and returns its id.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::InvalidMutation`] when a CREATE has a target or an
    /// UPDATE/DELETE lacks one, or any write error.
    pub fn enqueue(
        &self,
        kind: ActionKind,
        target_id: Option<RemoteId>,
        payload: Vec<u8>,
    ) -> QueueResult<u64> {
        self.inner.lock().push(kind, target_id, payload)
    }

    /// Encodes `payload` and appends it under its own kind.
    ///
    /// # Errors
    ///
    /// Same as [`QueueStore::enqueue`], plus encoding errors.
    pub fn enqueue_payload(
        &self,
        target_id: Option<RemoteId>,
        payload: &ActionPayload,
    ) -> QueueResult<u64> {
        self.enqueue(payload.kind(), target_id, payload.encode()?)
    }

    /// Like [`QueueStore::enqueue`], but an UPDATE whose target's most recent
    /// queued action is also an UPDATE overwrites that entry in place.
    ///
    /// # Errors
    ///
    /// Same as [`QueueStore::enqueue`].
    pub fn enqueue_coalescing(
        &self,
        kind: ActionKind,
        target_id: Option<RemoteId>,
        payload: Vec<u8>,
    ) -> QueueResult<Enqueued> {
        let mut inner = self.inner.lock();
        if kind == ActionKind::Update {
            let latest = inner
                .entries
                .values()
                .rev()
                .find(|a| a.target_id.is_some() && a.target_id == target_id)
                .filter(|a| a.kind == ActionKind::Update)
                .map(|a| a.id);
            if let Some(id) = latest {
                inner.overwrite(id, payload)?;
                debug!(id, "queued update coalesced");
                return Ok(Enqueued {
                    id,
                    coalesced: true,
                });
            }
        }
        let id = inner.push(kind, target_id, payload)?;
        Ok(Enqueued {
            id,
            coalesced: false,
        })
    }

    /// Returns every pending action, oldest first.
    #[must_use]
    pub fn list_pending(&self) -> Vec<PendingAction> {
        self.inner.lock().entries.values().cloned().collect()
    }

    /// Returns one pending action.
    #[must_use]
    pub fn get(&self, id: u64) -> Option<PendingAction> {
        self.inner.lock().entries.get(&id).cloned()
    }

    /// Removes an action. Returns `false` if it was not pending.
    ///
    /// When this empties the queue and the log has grown past the configured
    /// threshold, the log is compacted.
    ///
    /// # Errors
    ///
    /// Returns an error if the removal cannot be persisted.
    pub fn remove(&self, id: u64) -> QueueResult<bool> {
        let mut inner = self.inner.lock();
        if !inner.entries.contains_key(&id) {
            return Ok(false);
        }
        self.remove_locked(&mut inner, id)
    }

    /// Removes `action` only if the queued entry still carries the same
    /// payload. Returns `false` if the entry is gone or was rewritten since
    /// `action` was read.
    ///
    /// # Errors
    ///
    /// Returns an error if the removal cannot be persisted.
    pub fn remove_if_unchanged(&self, action: &PendingAction) -> QueueResult<bool> {
        let mut inner = self.inner.lock();
        match inner.entries.get(&action.id) {
            Some(current) if current.payload == action.payload => {}
            _ => return Ok(false),
        }
        self.remove_locked(&mut inner, action.id)
    }

    fn remove_locked(&self, inner: &mut Inner, id: u64) -> QueueResult<bool> {
        inner.append(&QueueRecord::Remove { id })?;
        inner.entries.remove(&id);
        debug!(id, "action removed");

        if inner.entries.is_empty()
            && self.compact_threshold > 0
            && inner.backend.size()? >= self.compact_threshold
        {
            inner.compact()?;
        }
        Ok(true)
    }

    /// Replaces the payload of a pending UPDATE action.
    ///
    /// # Errors
    ///
    /// [`QueueError::NotFound`] for unknown ids, [`QueueError::InvalidMutation`]
    /// for CREATE and DELETE actions, or a write error.
    pub fn update(&self, id: u64, payload: Vec<u8>) -> QueueResult<()> {
        self.inner.lock().overwrite(id, payload)
    }

    /// Rewrites the log to hold only pending actions.
    ///
    /// # Errors
    ///
    /// Returns an error if the new log cannot be written. The old log is
    /// left in place in that case.
    pub fn compact(&self) -> QueueResult<CompactionStats> {
        self.inner.lock().compact()
    }

    /// Returns the number of pending actions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Returns true when nothing is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    /// Returns queue statistics.
    ///
    /// # Errors
    ///
    /// Returns an error if the log size cannot be read.
    pub fn stats(&self) -> QueueResult<QueueStats> {
        let inner = self.inner.lock();
        let mut stats = QueueStats {
            pending: inner.entries.len(),
            log_bytes: inner.backend.size()?,
            records: inner.records,
            next_id: inner.next_id,
            format_version: FORMAT_VERSION,
            ..QueueStats::default()
        };
        for action in inner.entries.values() {
            match action.kind {
                ActionKind::Create => stats.creates += 1,
                ActionKind::Update => stats.updates += 1,
                ActionKind::Delete => stats.deletes += 1,
            }
        }
        Ok(stats)
    }

    /// Returns what migration did while opening this store.
    #[must_use]
    pub fn migration_report(&self) -> &MigrationReport {
        &self.migration
    }

    /// Returns the queue directory, if file-backed.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.dir.as_ref().map(QueueDir::path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_storage::InMemoryBackend;
    use beacon_sync_protocol::{NewReport, ReportStatus, StatusUpdate};

    fn reopen(backend: &InMemoryBackend) -> QueueStore {
        QueueStore::with_backend(Box::new(backend.clone()), QueueConfig::default()).unwrap()
    }

    fn create_payload(title: &str) -> ActionPayload {
        ActionPayload::Create {
            report: NewReport::new("Fire", title, "12.9, 77.6", "asha"),
            public: false,
        }
    }

    fn status(status: ReportStatus) -> Vec<u8> {
        ActionPayload::UpdateStatus(StatusUpdate { status })
            .encode()
            .unwrap()
    }

    #[test]
    fn enqueue_lists_in_fifo_order() {
        let queue = QueueStore::open_in_memory().unwrap();
        let a = queue.enqueue_payload(None, &create_payload("a")).unwrap();
        let b = queue
            .enqueue(ActionKind::Delete, Some("r-1".into()), ActionPayload::Delete.encode().unwrap())
            .unwrap();
        let c = queue.enqueue_payload(None, &create_payload("c")).unwrap();

        let ids: Vec<u64> = queue.list_pending().iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![a, b, c]);
        assert!(a < b && b < c);
    }

    #[test]
    fn target_rules_are_enforced() {
        let queue = QueueStore::open_in_memory().unwrap();
        let err = queue
            .enqueue(ActionKind::Update, None, status(ReportStatus::Resolved))
            .unwrap_err();
        assert!(matches!(err, QueueError::InvalidMutation { .. }));
        let err = queue
            .enqueue_payload(Some("r-1".into()), &create_payload("x"))
            .unwrap_err();
        assert!(matches!(err, QueueError::InvalidMutation { .. }));
        assert!(queue.is_empty());
    }

    #[test]
    fn remove_is_idempotent() {
        let queue = QueueStore::open_in_memory().unwrap();
        let id = queue.enqueue_payload(None, &create_payload("a")).unwrap();
        assert!(queue.remove(id).unwrap());
        assert!(!queue.remove(id).unwrap());
        assert!(queue.is_empty());
    }

    #[test]
    fn conditional_remove_skips_rewritten_entries() {
        let queue = QueueStore::open_in_memory().unwrap();
        let id = queue
            .enqueue(ActionKind::Update, Some("r-2".into()), status(ReportStatus::Acknowledged))
            .unwrap();
        let sent = queue.get(id).unwrap();

        queue.update(id, status(ReportStatus::Resolved)).unwrap();
        assert!(!queue.remove_if_unchanged(&sent).unwrap());
        assert_eq!(queue.len(), 1);

        let current = queue.get(id).unwrap();
        assert!(queue.remove_if_unchanged(&current).unwrap());
        assert!(queue.is_empty());
    }

    #[test]
    fn update_only_touches_update_actions() {
        let queue = QueueStore::open_in_memory().unwrap();
        let create = queue.enqueue_payload(None, &create_payload("a")).unwrap();
        let update = queue
            .enqueue(ActionKind::Update, Some("r-7".into()), status(ReportStatus::Acknowledged))
            .unwrap();

        queue.update(update, status(ReportStatus::Resolved)).unwrap();
        let payload = queue.get(update).unwrap().decode_payload().unwrap();
        assert_eq!(
            payload,
            ActionPayload::UpdateStatus(StatusUpdate {
                status: ReportStatus::Resolved
            })
        );

        assert!(matches!(
            queue.update(create, status(ReportStatus::Resolved)),
            Err(QueueError::InvalidMutation { .. })
        ));
        assert!(matches!(
            queue.update(999, status(ReportStatus::Resolved)),
            Err(QueueError::NotFound { id: 999 })
        ));
    }

    #[test]
    fn coalescing_overwrites_latest_update_for_target() {
        let queue = QueueStore::open_in_memory().unwrap();
        let first = queue
            .enqueue_coalescing(ActionKind::Update, Some("r-1".into()), status(ReportStatus::Acknowledged))
            .unwrap();
        let second = queue
            .enqueue_coalescing(ActionKind::Update, Some("r-1".into()), status(ReportStatus::Resolved))
            .unwrap();
        let other = queue
            .enqueue_coalescing(ActionKind::Update, Some("r-2".into()), status(ReportStatus::Resolved))
            .unwrap();

        assert!(!first.coalesced);
        assert_eq!(second, Enqueued { id: first.id, coalesced: true });
        assert!(!other.coalesced);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn coalescing_does_not_jump_a_delete() {
        let queue = QueueStore::open_in_memory().unwrap();
        queue
            .enqueue_coalescing(ActionKind::Update, Some("r-1".into()), status(ReportStatus::Acknowledged))
            .unwrap();
        queue
            .enqueue(ActionKind::Delete, Some("r-1".into()), ActionPayload::Delete.encode().unwrap())
            .unwrap();
        let late = queue
            .enqueue_coalescing(ActionKind::Update, Some("r-1".into()), status(ReportStatus::Resolved))
            .unwrap();
        assert!(!late.coalesced);
        assert_eq!(queue.len(), 3);
    }

    #[test]
    fn replay_restores_state_without_duplicates() {
        let backend = InMemoryBackend::new();
        {
            let queue = reopen(&backend);
            let a = queue.enqueue_payload(None, &create_payload("a")).unwrap();
            queue.enqueue_payload(None, &create_payload("b")).unwrap();
            queue.remove(a).unwrap();
        }
        let queue = reopen(&backend);
        let pending = queue.list_pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, 2);

        let reloaded = reopen(&backend);
        assert_eq!(reloaded.list_pending(), pending);
    }

    #[test]
    fn ids_stay_monotonic_across_compaction_and_reopen() {
        let backend = InMemoryBackend::new();
        {
            let queue = reopen(&backend);
            for title in ["a", "b", "c"] {
                let id = queue.enqueue_payload(None, &create_payload(title)).unwrap();
                queue.remove(id).unwrap();
            }
            let stats = queue.compact().unwrap();
            assert_eq!(stats.live_entries, 0);
            assert!(stats.bytes_after < stats.bytes_before);
        }
        let queue = reopen(&backend);
        assert_eq!(queue.enqueue_payload(None, &create_payload("d")).unwrap(), 4);
    }

    #[test]
    fn emptied_queue_compacts_past_threshold() {
        let backend = InMemoryBackend::new();
        let queue = QueueStore::with_backend(
            Box::new(backend.clone()),
            QueueConfig::new().with_compact_threshold(1),
        )
        .unwrap();
        let id = queue.enqueue_payload(None, &create_payload("a")).unwrap();
        let grown = queue.stats().unwrap().log_bytes;
        queue.remove(id).unwrap();

        let stats = queue.stats().unwrap();
        assert_eq!(stats.records, 2);
        assert!(stats.log_bytes < grown);
        assert_eq!(stats.next_id, 2);
    }

    #[test]
    fn torn_tail_is_truncated_on_open() {
        let backend = InMemoryBackend::new();
        {
            let queue = reopen(&backend);
            queue.enqueue_payload(None, &create_payload("kept")).unwrap();
        }
        let intact = backend.snapshot();
        let mut torn = intact.clone();
        torn.extend(
            QueueRecord::Remove { id: 1 }
                .encode()
                .unwrap()
                .into_iter()
                .take(7),
        );
        let damaged = InMemoryBackend::with_data(torn);

        let queue = reopen(&damaged);
        assert_eq!(queue.len(), 1);
        assert_eq!(damaged.snapshot(), intact);
    }

    #[test]
    fn corruption_before_tail_refuses_to_open() {
        let backend = InMemoryBackend::new();
        {
            let queue = reopen(&backend);
            queue.enqueue_payload(None, &create_payload("a")).unwrap();
            queue.enqueue_payload(None, &create_payload("b")).unwrap();
        }
        let mut bytes = backend.snapshot();
        let header_len = QueueRecord::Header { format_version: FORMAT_VERSION }
            .encode()
            .unwrap()
            .len();
        // inside the id of the first enqueue record
        bytes[header_len + crate::record::HEADER_SIZE + 2] ^= 0x5a;

        let result = QueueStore::with_backend(
            Box::new(InMemoryBackend::with_data(bytes)),
            QueueConfig::default(),
        );
        assert!(result.unwrap_err().is_corruption());
    }

    #[test]
    fn newer_format_is_rejected() {
        let image = QueueRecord::Header { format_version: 9 }.encode().unwrap();
        let result = QueueStore::with_backend(
            Box::new(InMemoryBackend::with_data(image)),
            QueueConfig::default(),
        );
        assert!(matches!(
            result,
            Err(QueueError::UnsupportedFormat { found: 9, supported: FORMAT_VERSION })
        ));
    }

    #[test]
    fn stats_count_kinds() {
        let queue = QueueStore::open_in_memory().unwrap();
        queue.enqueue_payload(None, &create_payload("a")).unwrap();
        queue
            .enqueue(ActionKind::Update, Some("r-1".into()), status(ReportStatus::Resolved))
            .unwrap();
        queue
            .enqueue(ActionKind::Delete, Some("r-2".into()), ActionPayload::Delete.encode().unwrap())
            .unwrap();

        let stats = queue.stats().unwrap();
        assert_eq!((stats.creates, stats.updates, stats.deletes), (1, 1, 1));
        assert_eq!(stats.pending, 3);
        assert_eq!(stats.records, 4);
        assert_eq!(stats.next_id, 4);
    }
}
