//! Dump command implementation.

use crate::OutputFormat;
use beacon_queue::QueueStore;
use serde::Serialize;
use std::path::Path;

/// One pending action, decoded for output.
#[derive(Debug, Serialize)]
pub struct ActionInfo {
    /// Queue id.
    pub id: u64,
    /// Kind name.
    pub kind: &'static str,
    /// Target report, for updates and deletes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_id: Option<String>,
    /// Enqueue time, unix milliseconds.
    pub enqueued_at: u64,
    /// Decoded payload, absent if it could not be decoded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    /// Decode failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Runs the dump command.
pub fn run(
    path: &Path,
    limit: Option<usize>,
    format: OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let store = super::open_existing(path)?;
    let actions = collect(&store, limit);

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&actions)?),
        OutputFormat::Text => print_text_output(&actions),
    }
    Ok(())
}

pub(crate) fn collect(store: &QueueStore, limit: Option<usize>) -> Vec<ActionInfo> {
    store
        .list_pending()
        .into_iter()
        .take(limit.unwrap_or(usize::MAX))
        .map(|action| {
            let decoded = action
                .decode_payload()
                .map_err(|e| e.to_string())
                .and_then(|p| serde_json::to_value(p).map_err(|e| e.to_string()));
            let (payload, error) = match decoded {
                Ok(value) => (Some(value), None),
                Err(e) => (None, Some(e)),
            };
            ActionInfo {
                id: action.id,
                kind: action.kind.name(),
                target_id: action.target_id.map(|id| id.to_string()),
                enqueued_at: action.enqueued_at,
                payload,
                error,
            }
        })
        .collect()
}

fn print_text_output(actions: &[ActionInfo]) {
    println!("{:<8} {:<8} {:<38} {:<15} PAYLOAD", "ID", "KIND", "TARGET", "ENQUEUED");
    println!("{}", "-".repeat(90));

    for action in actions {
        let target = action.target_id.as_deref().unwrap_or("-");
        let payload = match (&action.payload, &action.error) {
            (Some(value), _) => value.to_string(),
            (None, Some(e)) => format!("<undecodable: {e}>"),
            (None, None) => String::new(),
        };
        println!(
            "{:<8} {:<8} {:<38} {:<15} {}",
            action.id, action.kind, target, action.enqueued_at, payload
        );
    }

    println!();
    println!("Total: {} action(s)", actions.len());
}
