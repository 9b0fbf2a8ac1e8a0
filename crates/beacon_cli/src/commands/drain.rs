//! Drain command implementation.

use crate::OutputFormat;
use beacon_queue::QueueStore;
use beacon_sync_engine::{
    BackoffSchedule, ConnectivityState, HttpTransport, ReqwestClient, RetryConfig, SyncClient,
    SyncConfig, SyncNotice,
};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::TryRecvError;
use tracing::info;

/// Options of the drain command.
#[derive(Debug, Clone)]
pub struct DrainOptions {
    /// Base URL of the report API.
    pub server: String,
    /// Attempts per action.
    pub attempts: u32,
    /// Delay before the first retry in milliseconds; `0` retries at once.
    pub backoff_ms: u64,
    /// Bearer token.
    pub token: Option<String>,
}

impl DrainOptions {
    fn retry(&self) -> RetryConfig {
        if self.backoff_ms == 0 {
            return RetryConfig::immediate(self.attempts);
        }
        RetryConfig::exponential(self.attempts).with_schedule(BackoffSchedule::Exponential {
            initial_delay: Duration::from_millis(self.backoff_ms),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: true,
        })
    }
}

/// A refused action, for output.
#[derive(Debug, Serialize)]
pub struct RejectedInfo {
    /// Queue id.
    pub id: u64,
    /// Kind name.
    pub kind: &'static str,
    /// Server reason.
    pub reason: String,
}

/// Drain result.
#[derive(Debug, Default, Serialize)]
pub struct DrainSummary {
    /// Actions delivered.
    pub sent: usize,
    /// Updates and deletes whose target was already gone.
    pub already_gone: usize,
    /// Actions refused and dropped from the queue.
    pub rejected: Vec<RejectedInfo>,
    /// Actions that failed and stay queued.
    pub failed: usize,
    /// Actions held back behind a failure for the same report.
    pub skipped: usize,
    /// Actions still queued.
    pub remaining: usize,
}

/// Runs the drain command.
pub fn run(
    path: &Path,
    options: &DrainOptions,
    format: OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let store = Arc::new(super::open_existing(path)?);
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let summary = runtime.block_on(drain_queue(store, options))?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&summary)?),
        OutputFormat::Text => print_text_output(&summary),
    }
    Ok(())
}

pub(crate) async fn drain_queue(
    store: Arc<QueueStore>,
    options: &DrainOptions,
) -> Result<DrainSummary, Box<dyn std::error::Error>> {
    let config = SyncConfig::new(options.server.clone()).with_retry(options.retry());
    let mut http = ReqwestClient::new(options.server.clone());
    if let Some(token) = &options.token {
        http = http.with_bearer_token(token.clone());
    }
    let transport = HttpTransport::new(http, config.request_timeout);
    let client = SyncClient::new(config, transport, store, ConnectivityState::online());
    let mut notices = client.notices();

    info!(server = %options.server, pending = client.queue().len(), "draining queue");
    let report = client.drain().await?;

    let mut summary = DrainSummary {
        sent: report.sent,
        already_gone: report.already_gone,
        failed: report.failed,
        skipped: report.skipped,
        remaining: report.remaining,
        ..DrainSummary::default()
    };
    loop {
        match notices.try_recv() {
            Ok(SyncNotice::Rejected {
                action_id,
                kind,
                reason,
                ..
            }) => summary.rejected.push(RejectedInfo {
                id: action_id,
                kind: kind.name(),
                reason,
            }),
            Ok(SyncNotice::Delivered { .. }) | Err(TryRecvError::Lagged(_)) => {}
            Err(TryRecvError::Empty | TryRecvError::Closed) => break,
        }
    }
    Ok(summary)
}

fn print_text_output(summary: &DrainSummary) {
    println!("Drain complete:");
    println!("  Sent:          {}", summary.sent);
    println!("  Already gone:  {}", summary.already_gone);
    println!("  Failed:        {}", summary.failed);
    println!("  Skipped:       {}", summary.skipped);
    println!("  Remaining:     {}", summary.remaining);

    if !summary.rejected.is_empty() {
        println!();
        println!("Rejected by the server and removed from the queue:");
        for rejected in &summary.rejected {
            println!("  ✗ #{} {}: {}", rejected.id, rejected.kind, rejected.reason);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_testkit::fixtures::{enqueue_create, memory_queue};
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn options(server: &MockServer) -> DrainOptions {
        DrainOptions {
            server: server.uri(),
            attempts: 2,
            backoff_ms: 0,
            token: None,
        }
    }

    #[tokio::test]
    async fn sends_pending_creates() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/reports"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "id": "r-1",
                "type": "Fire",
                "title": "Depot fire",
                "location": "12.9, 77.6",
                "author": "asha"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let store = Arc::new(memory_queue());
        enqueue_create(&store, "Depot fire");

        let summary = drain_queue(store.clone(), &options(&server)).await.unwrap();
        assert_eq!(summary.sent, 1);
        assert_eq!(summary.remaining, 0);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn refused_actions_are_listed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/reports"))
            .respond_with(ResponseTemplate::new(422).set_body_string("title required"))
            .mount(&server)
            .await;

        let store = Arc::new(memory_queue());
        enqueue_create(&store, "");

        let summary = drain_queue(store.clone(), &options(&server)).await.unwrap();
        assert_eq!(summary.rejected.len(), 1);
        assert_eq!(summary.rejected[0].kind, "CREATE");
        assert!(summary.rejected[0].reason.contains("title required"));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn unavailable_server_keeps_actions_queued() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let store = Arc::new(memory_queue());
        enqueue_create(&store, "Depot fire");

        let summary = drain_queue(store.clone(), &options(&server)).await.unwrap();
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.remaining, 1);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn zero_backoff_retries_immediately() {
        let options = DrainOptions {
            server: "http://localhost".into(),
            attempts: 4,
            backoff_ms: 0,
            token: None,
        };
        assert_eq!(options.retry(), RetryConfig::immediate(4));
    }
}
