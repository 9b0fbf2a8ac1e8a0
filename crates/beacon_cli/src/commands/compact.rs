//! Compact command implementation.

use crate::OutputFormat;
use beacon_queue::QueueStore;
use serde::Serialize;
use std::path::Path;

/// Compaction result.
#[derive(Debug, Serialize)]
pub struct CompactResult {
    /// Nothing was written.
    pub dry_run: bool,
    /// Records in the log before compaction.
    pub records_before: u64,
    /// Log size before compaction.
    pub bytes_before: u64,
    /// Log size after compaction; absent on a dry run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bytes_after: Option<u64>,
    /// Pending actions carried over.
    pub live_entries: usize,
}

/// Runs the compact command.
pub fn run(
    path: &Path,
    dry_run: bool,
    format: OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let store = super::open_existing(path)?;
    let result = compact(&store, dry_run)?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&result)?),
        OutputFormat::Text => print_text_output(path, &result),
    }
    Ok(())
}

pub(crate) fn compact(
    store: &QueueStore,
    dry_run: bool,
) -> Result<CompactResult, Box<dyn std::error::Error>> {
    let stats = store.stats()?;
    let mut result = CompactResult {
        dry_run,
        records_before: stats.records,
        bytes_before: stats.log_bytes,
        bytes_after: None,
        live_entries: stats.pending,
    };
    if !dry_run {
        let done = store.compact()?;
        result.bytes_after = Some(done.bytes_after);
        result.live_entries = done.live_entries;
    }
    Ok(result)
}

fn print_text_output(path: &Path, result: &CompactResult) {
    println!("Compacting queue at {}", path.display());
    if result.dry_run {
        println!("(dry run - no changes will be made)");
    }
    println!();
    println!("  Records:         {}", result.records_before);
    println!("  Pending actions: {}", result.live_entries);
    println!("  Size before:     {} bytes", result.bytes_before);

    if let Some(after) = result.bytes_after {
        let saved = result.bytes_before.saturating_sub(after);
        println!("  Size after:      {after} bytes");
        println!(
            "  Space saved:     {saved} bytes ({:.1}%)",
            if result.bytes_before > 0 {
                saved as f64 / result.bytes_before as f64 * 100.0
            } else {
                0.0
            }
        );
        println!();
        println!("✓ Compaction complete");
    }
}
