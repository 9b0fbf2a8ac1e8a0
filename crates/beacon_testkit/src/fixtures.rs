//! Report fixtures and queue helpers.

use beacon_queue::{QueueConfig, QueueStore};
use beacon_sync_protocol::{ActionPayload, NewReport, RemoteId, ReportStatus, StatusUpdate};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// The canonical offline report: a fire at `12.9, 77.6`.
pub fn fire_report() -> NewReport {
    NewReport::new("Fire", "Warehouse fire", "12.9, 77.6", "asha")
        .with_description("Smoke from the east loading bay")
}

/// A flood report by another author.
pub fn flood_report() -> NewReport {
    NewReport::new("Flood", "Underpass flooded", "12.97, 77.59", "meera")
}

/// A fire report with a custom title.
pub fn titled_report(title: &str) -> NewReport {
    NewReport::new("Fire", title, "12.9, 77.6", "asha")
}

/// Returns a temp directory and a queue path inside it that does not exist
/// yet. Keep the [`TempDir`] alive for as long as the path is used.
pub fn temp_queue() -> (TempDir, PathBuf) {
    let dir = TempDir::new().expect("Failed to create temp directory");
    let path = dir.path().join("queue");
    (dir, path)
}

/// Opens (creating if needed) a file-backed queue with default settings.
pub fn open_queue(path: &Path) -> QueueStore {
    QueueStore::open(path, QueueConfig::default()).expect("Failed to open queue")
}

/// Opens an empty in-memory queue.
pub fn memory_queue() -> QueueStore {
    QueueStore::open_in_memory().expect("Failed to open in-memory queue")
}

/// Queues a private CREATE for [`titled_report`] and returns its id.
pub fn enqueue_create(store: &QueueStore, title: &str) -> u64 {
    let payload = ActionPayload::Create {
        report: titled_report(title),
        public: false,
    };
    store
        .enqueue_payload(None, &payload)
        .expect("Failed to enqueue create")
}

/// Queues a status UPDATE for `target` and returns its id.
pub fn enqueue_status(store: &QueueStore, target: &str, status: ReportStatus) -> u64 {
    store
        .enqueue_payload(
            Some(RemoteId::new(target)),
            &ActionPayload::UpdateStatus(StatusUpdate { status }),
        )
        .expect("Failed to enqueue update")
}

/// Queues a DELETE for `target` and returns its id.
pub fn enqueue_delete(store: &QueueStore, target: &str) -> u64 {
    store
        .enqueue_payload(Some(RemoteId::new(target)), &ActionPayload::Delete)
        .expect("Failed to enqueue delete")
}

/// Writes a legacy `reports.queue` store holding `reports` into the queue
/// directory at `path`, creating the directory.
pub fn write_legacy_store(path: &Path, reports: &[NewReport]) {
    fs::create_dir_all(path).expect("Failed to create queue directory");
    let lines: Vec<String> = reports
        .iter()
        .map(|r| serde_json::to_string(r).expect("Failed to encode report"))
        .collect();
    fs::write(path.join("reports.queue"), lines.join("\n") + "\n")
        .expect("Failed to write legacy store");
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_sync_protocol::ActionKind;

    #[test]
    fn helpers_queue_each_kind() {
        let store = memory_queue();
        enqueue_create(&store, "Depot fire");
        enqueue_status(&store, "r-1", ReportStatus::Acknowledged);
        enqueue_delete(&store, "r-2");

        let kinds: Vec<_> = store.list_pending().iter().map(|a| a.kind).collect();
        assert_eq!(
            kinds,
            vec![ActionKind::Create, ActionKind::Update, ActionKind::Delete]
        );
    }

    #[test]
    fn legacy_store_is_imported_on_open() {
        let (_dir, path) = temp_queue();
        write_legacy_store(&path, &[fire_report(), flood_report()]);

        let store = open_queue(&path);
        assert_eq!(store.len(), 2);
        assert_eq!(store.migration_report().imported(), 2);
    }
}
