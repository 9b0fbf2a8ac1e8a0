//! Inspect command implementation.

use crate::OutputFormat;
use beacon_queue::QueueStore;
use serde::Serialize;
use std::path::Path;

/// Queue inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Queue directory.
    pub path: String,
    /// Store format version.
    pub format_version: u16,
    /// Log size in bytes.
    pub log_bytes: u64,
    /// Records in the log, header included.
    pub records: u64,
    /// Pending actions.
    pub pending: usize,
    /// Pending CREATE actions.
    pub creates: usize,
    /// Pending UPDATE actions.
    pub updates: usize,
    /// Pending DELETE actions.
    pub deletes: usize,
    /// Id the next enqueue will receive.
    pub next_id: u64,
    /// Upgrades applied while opening.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub migrations: Vec<String>,
}

/// Runs the inspect command.
pub fn run(path: &Path, format: OutputFormat) -> Result<(), Box<dyn std::error::Error>> {
    let store = super::open_existing(path)?;
    let result = inspect(path, &store)?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&result)?),
        OutputFormat::Text => print_text_output(&result),
    }
    Ok(())
}

pub(crate) fn inspect(
    path: &Path,
    store: &QueueStore,
) -> Result<InspectResult, Box<dyn std::error::Error>> {
    let stats = store.stats()?;
    Ok(InspectResult {
        path: path.display().to_string(),
        format_version: stats.format_version,
        log_bytes: stats.log_bytes,
        records: stats.records,
        pending: stats.pending,
        creates: stats.creates,
        updates: stats.updates,
        deletes: stats.deletes,
        next_id: stats.next_id,
        migrations: store
            .migration_report()
            .operations
            .iter()
            .map(ToString::to_string)
            .collect(),
    })
}

fn print_text_output(result: &InspectResult) {
    println!("Queue: {}", result.path);
    println!();
    println!("Storage:");
    println!("  Format version: {}", result.format_version);
    println!("  Log size:       {} bytes", result.log_bytes);
    println!("  Records:        {}", result.records);
    println!();
    println!("Pending actions:  {}", result.pending);
    println!("  CREATE:         {}", result.creates);
    println!("  UPDATE:         {}", result.updates);
    println!("  DELETE:         {}", result.deletes);
    println!("Next id:          {}", result.next_id);

    if !result.migrations.is_empty() {
        println!();
        println!("Migrations applied on open:");
        for step in &result.migrations {
            println!("  - {step}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_testkit::fixtures::{enqueue_create, temp_queue};

    #[test]
    fn counts_pending_by_kind() {
        let (_dir, path) = temp_queue();
        {
            let store = crate::commands::open_existing(&path).unwrap();
            enqueue_create(&store, "Depot fire");
            enqueue_create(&store, "Bridge flooded");
        }

        let store = crate::commands::open_existing(&path).unwrap();
        let result = inspect(&path, &store).unwrap();
        assert_eq!(result.pending, 2);
        assert_eq!(result.creates, 2);
        assert_eq!(result.updates, 0);
        assert_eq!(result.next_id, 3);
        assert_eq!(result.format_version, beacon_queue::FORMAT_VERSION);
        assert!(result.migrations.is_empty());
    }

    #[test]
    fn missing_queue_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(crate::commands::open_existing(&dir.path().join("nope")).is_err());
    }
}
