//! Migrate command implementation.

use crate::OutputFormat;
use beacon_queue::MigrationOperation;
use serde::Serialize;
use std::path::Path;

/// One upgrade step, for output.
#[derive(Debug, Serialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum StepInfo {
    /// Legacy reports store imported.
    ImportedLegacyReports {
        /// Removed file.
        path: String,
        /// Newly queued entries.
        imported: usize,
        /// Entries already queued.
        already_queued: usize,
        /// Unreadable lines.
        unreadable: usize,
    },
    /// Outdated log moved aside.
    DiscardedOutdatedLog {
        /// Format version of the old log.
        format_version: u16,
        /// New location.
        moved_to: String,
        /// Size in bytes.
        bytes: u64,
    },
}

impl From<&MigrationOperation> for StepInfo {
    fn from(op: &MigrationOperation) -> Self {
        match op {
            MigrationOperation::ImportedLegacyReports {
                path,
                imported,
                already_queued,
                unreadable,
            } => Self::ImportedLegacyReports {
                path: path.display().to_string(),
                imported: *imported,
                already_queued: *already_queued,
                unreadable: *unreadable,
            },
            MigrationOperation::DiscardedOutdatedLog {
                format_version,
                moved_to,
                bytes,
            } => Self::DiscardedOutdatedLog {
                format_version: *format_version,
                moved_to: moved_to.display().to_string(),
                bytes: *bytes,
            },
        }
    }
}

/// Migration result.
#[derive(Debug, Serialize)]
pub struct MigrateResult {
    /// Steps performed.
    pub steps: Vec<StepInfo>,
    /// Pending actions after migration.
    pub pending: usize,
}

/// Runs the migrate command.
pub fn run(path: &Path, format: OutputFormat) -> Result<(), Box<dyn std::error::Error>> {
    let result = migrate(path)?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&result)?),
        OutputFormat::Text => {
            if result.steps.is_empty() {
                println!("Queue at {} is up to date", path.display());
            } else {
                println!("Migrated queue at {}:", path.display());
                for step in &result.steps {
                    match step {
                        StepInfo::ImportedLegacyReports {
                            imported,
                            already_queued,
                            unreadable,
                            ..
                        } => println!(
                            "  ✓ imported {imported} legacy report(s) ({already_queued} already queued, {unreadable} unreadable)"
                        ),
                        StepInfo::DiscardedOutdatedLog {
                            format_version,
                            moved_to,
                            ..
                        } => println!(
                            "  ! discarded format {format_version} log, kept at {moved_to}"
                        ),
                    }
                }
            }
            println!("Pending actions: {}", result.pending);
        }
    }
    Ok(())
}

pub(crate) fn migrate(path: &Path) -> Result<MigrateResult, Box<dyn std::error::Error>> {
    let store = super::open_existing(path)?;
    Ok(MigrateResult {
        steps: store
            .migration_report()
            .operations
            .iter()
            .map(StepInfo::from)
            .collect(),
        pending: store.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_testkit::fixtures::{fire_report, temp_queue};
    use std::fs;

    #[test]
    fn imports_legacy_store_once() {
        let (_dir, path) = temp_queue();
        fs::create_dir_all(&path).unwrap();
        let line = serde_json::to_string(&fire_report()).unwrap();
        fs::write(path.join("reports.queue"), format!("{line}\nnot json\n")).unwrap();

        let result = migrate(&path).unwrap();
        assert_eq!(result.pending, 1);
        assert!(matches!(
            result.steps.as_slice(),
            [StepInfo::ImportedLegacyReports {
                imported: 1,
                unreadable: 1,
                ..
            }]
        ));
        assert!(!path.join("reports.queue").exists());

        let again = migrate(&path).unwrap();
        assert!(again.steps.is_empty());
        assert_eq!(again.pending, 1);
    }
}
