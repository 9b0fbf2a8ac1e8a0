//! End-to-end scenarios against the in-process report server.

use async_trait::async_trait;
use beacon_queue::{QueueConfig, QueueStore};
use beacon_sync_engine::{
    ConnectivitySignal, ConnectivityState, HttpTransport, LoopbackClient, LoopbackServer, Origin,
    PushChannel, RetryConfig, SubmitOutcome, SyncClient, SyncConfig, SyncError, SyncNotice,
    SyncResult, UserAction,
};
use beacon_sync_protocol::{
    ActionKind, ApiRequest, ApiResponse, ChangeEvent, ChannelMessage, NewReport, ReportStatus,
};
use beacon_sync_server::{ReportServer, ServerConfig, Viewer};
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;
use tokio::sync::mpsc;

// ── Harness ─────────────────────────────────────────────────────

struct ServerAdapter(Arc<ReportServer>);

impl LoopbackServer for ServerAdapter {
    fn handle(&self, request: &ApiRequest) -> ApiResponse {
        self.0.handle(request)
    }
}

struct ServerChannel {
    server: Arc<ReportServer>,
    viewer: Viewer,
}

#[async_trait]
impl PushChannel for ServerChannel {
    async fn subscribe(&self) -> SyncResult<mpsc::Receiver<ChannelMessage>> {
        Ok(self.server.subscribe(self.viewer.clone()))
    }
}

type Transport = HttpTransport<LoopbackClient<ServerAdapter>>;

fn config() -> SyncConfig {
    SyncConfig::new("loopback://")
        .with_retry(RetryConfig::immediate(3))
        .with_resubscribe_delay(Duration::from_millis(10))
}

fn client_with(server: &Arc<ReportServer>, queue: Arc<QueueStore>) -> SyncClient<Transport> {
    let transport = HttpTransport::new(
        LoopbackClient::new(ServerAdapter(server.clone())),
        Duration::from_secs(1),
    );
    SyncClient::new(config(), transport, queue, ConnectivityState::online())
}

fn client(server: &Arc<ReportServer>) -> SyncClient<Transport> {
    client_with(server, Arc::new(QueueStore::open_in_memory().unwrap()))
}

fn open_queue(path: &Path) -> Arc<QueueStore> {
    Arc::new(QueueStore::open(path, QueueConfig::new()).unwrap())
}

fn fire() -> NewReport {
    NewReport::new("Fire", "Warehouse fire", "12.9, 77.6", "asha")
}

fn set_reachable(client: &SyncClient<Transport>, reachable: bool) {
    client.api().inner().client().set_reachable(reachable);
}

async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

fn drain_events(rx: &mut mpsc::Receiver<ChannelMessage>) -> Vec<ChangeEvent> {
    let mut events = Vec::new();
    while let Ok(message) = rx.try_recv() {
        events.push(message.event);
    }
    events
}

// ── Offline capture and reconnect ───────────────────────────────

#[tokio::test]
async fn offline_report_is_delivered_once_after_reconnect() {
    let server = Arc::new(ReportServer::new(ServerConfig::default()));
    let mut probe = server.subscribe(Viewer::elevated("dispatch"));
    let client = client(&server);

    client.set_connectivity(ConnectivitySignal::WentOffline);
    let outcome = client.submit(UserAction::Create(fire())).await.unwrap();
    assert!(matches!(outcome, SubmitOutcome::Queued { .. }));
    assert_eq!(client.queue().len(), 1);
    assert!(server.reports().is_empty());

    let view = client.view();
    assert_eq!(view.len(), 1);
    assert!(view[0].syncing);

    let runtime = client.start_with_channel(ServerChannel {
        server: server.clone(),
        viewer: Viewer::restricted("asha"),
    });
    client.set_connectivity(ConnectivitySignal::WentOnline);

    eventually(|| async { client.queue().is_empty() }).await;
    eventually(|| async {
        let view = client.view();
        view.len() == 1 && view[0].origin == Origin::Confirmed
    })
    .await;

    let created = drain_events(&mut probe)
        .into_iter()
        .filter(|e| matches!(e, ChangeEvent::Created(_)))
        .count();
    assert_eq!(created, 1);
    assert_eq!(server.reports().len(), 1);

    let view = client.view();
    assert_eq!(view[0].fields.location, "12.9, 77.6");
    assert!(!view[0].syncing);

    runtime.shutdown().await;
}

#[tokio::test]
async fn queued_update_for_report_deleted_elsewhere_is_dropped_quietly() {
    let server = Arc::new(ReportServer::new(ServerConfig::default()));
    let client = client(&server);

    let outcome = client.submit(UserAction::Create(fire())).await.unwrap();
    let SubmitOutcome::Sent(Some(report)) = outcome else {
        panic!("expected a direct send, got {outcome:?}");
    };
    client.refresh().await.unwrap();

    set_reachable(&client, false);
    let outcome = client
        .submit(UserAction::UpdateStatus {
            id: report.id.clone(),
            status: ReportStatus::Resolved,
        })
        .await
        .unwrap();
    assert!(matches!(outcome, SubmitOutcome::Queued { .. }));
    assert_eq!(client.view()[0].status, ReportStatus::Resolved);

    server.delete_out_of_band(&report.id).unwrap();
    set_reachable(&client, true);

    let drained = client.drain().await.unwrap();
    assert_eq!(drained.already_gone, 1);
    assert_eq!(drained.rejected, 0);
    assert!(client.queue().is_empty());
    assert!(client.view().is_empty());
}

// ── Retry behaviour ─────────────────────────────────────────────

#[tokio::test]
async fn warming_backend_exhausts_retries_then_drain_succeeds() {
    let server = Arc::new(ReportServer::new(ServerConfig::default()));
    server.warm_up(3);
    let client = client(&server);

    let outcome = client.submit(UserAction::Create(fire())).await.unwrap();
    assert!(matches!(outcome, SubmitOutcome::Queued { .. }));
    assert_eq!(client.retry_stats().exhausted, 1);
    assert_eq!(client.retry_stats().attempts, 3);

    let drained = client.drain().await.unwrap();
    assert_eq!(drained.sent, 1);
    assert_eq!(drained.remaining, 0);
    assert_eq!(server.reports().len(), 1);
}

// ── Durability ──────────────────────────────────────────────────

#[tokio::test]
async fn restart_before_drain_does_not_duplicate_reports() {
    let dir = tempdir().unwrap();
    let queue_path = dir.path().join("queue");
    let server = Arc::new(ReportServer::new(ServerConfig::default()));

    {
        let client = client_with(&server, open_queue(&queue_path));
        client.set_connectivity(ConnectivitySignal::WentOffline);
        client.submit(UserAction::Create(fire())).await.unwrap();
        client
            .submit(UserAction::CreatePublic(
                NewReport::new("Flood", "Underpass flooded", "12.97, 77.59", "meera"),
            ))
            .await
            .unwrap();
        assert_eq!(client.queue().len(), 2);
    }

    let queue = open_queue(&queue_path);
    let pending = queue.list_pending();
    assert_eq!(pending.len(), 2);
    assert!(pending[0].id < pending[1].id);
    assert!(pending.iter().all(|a| a.kind == ActionKind::Create));

    let client = client_with(&server, queue);
    let drained = client.drain().await.unwrap();
    assert_eq!(drained.sent, 2);
    assert!(client.queue().is_empty());

    let again = client.drain().await.unwrap();
    assert_eq!(again.sent, 0);
    assert_eq!(server.reports().len(), 2);

    drop(client);
    assert!(open_queue(&queue_path).is_empty());
}

// ── Rejection ───────────────────────────────────────────────────

#[tokio::test]
async fn expired_session_rejects_instead_of_queuing() {
    let server = Arc::new(ReportServer::new(ServerConfig::new().with_sessions()));
    let client = client(&server);

    let err = client.submit(UserAction::Create(fire())).await.unwrap_err();
    assert!(matches!(err, SyncError::Unauthorized { status: 401, .. }));
    assert!(client.queue().is_empty());
    assert!(client.view().is_empty());
}

#[tokio::test]
async fn queued_action_refused_on_drain_is_reported() {
    let server = Arc::new(ReportServer::new(ServerConfig::new().with_sessions()));
    let client = client(&server);
    let mut notices = client.notices();

    client.set_connectivity(ConnectivitySignal::WentOffline);
    client.submit(UserAction::Create(fire())).await.unwrap();
    client.set_connectivity(ConnectivitySignal::WentOnline);

    let drained = client.drain().await.unwrap();
    assert_eq!(drained.rejected, 1);
    assert!(client.queue().is_empty());
    assert!(client.view().is_empty());

    match notices.try_recv().unwrap() {
        SyncNotice::Rejected { kind, reason, .. } => {
            assert_eq!(kind, ActionKind::Create);
            assert!(reason.contains("session"), "reason: {reason}");
        }
        other => panic!("expected a rejection, got {other:?}"),
    }
    assert!(server.reports().is_empty());
}
