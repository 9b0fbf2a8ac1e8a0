//! Background dispatcher.
//!
//! Drains the durable queue in FIFO order whenever a sync is requested or
//! connectivity comes back. The dispatcher owns only the queue, a remote
//! API handle and the connectivity state; it reports what happened through
//! a [`SyncNotice`] broadcast instead of touching any view state.

use crate::config::DrainPolicy;
use crate::connectivity::{Connectivity, ConnectivityState};
use crate::error::{SyncError, SyncResult};
use crate::transport::RemoteApi;
use beacon_queue::QueueStore;
use beacon_sync_protocol::{ActionKind, ActionPayload, NewReport, PendingAction, RemoteId, Report};
use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// The current state of the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherState {
    /// Nothing in progress; the queue was empty after the last pass.
    Idle,
    /// A drain pass is running.
    Draining,
    /// The last pass left actions behind; waiting for the next trigger.
    Waiting,
}

/// What the remote side did with a delivered action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// A report was created. `fields` is what was queued.
    Created {
        /// Queued body.
        fields: NewReport,
        /// Server copy.
        report: Report,
    },
    /// A status update was applied.
    Updated(Report),
    /// A report was deleted.
    Deleted(RemoteId),
    /// The target no longer existed; the action counts as done.
    AlreadyGone(RemoteId),
}

/// Events published by the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncNotice {
    /// A queued action reached the server and left the queue.
    Delivered {
        /// Queue id of the action.
        action_id: u64,
        /// Outcome.
        delivery: Delivery,
    },
    /// A queued action was refused for good and removed from the queue.
    /// The user must be told; the data in it did not reach the server.
    /// An update coalesced into the entry while it was in flight stays
    /// queued under the same id.
    Rejected {
        /// Queue id of the action.
        action_id: u64,
        /// Kind of the action.
        kind: ActionKind,
        /// Target, for updates and deletes.
        target_id: Option<RemoteId>,
        /// Why it was refused.
        reason: String,
    },
}

/// Result of one drain pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Actions delivered.
    pub sent: usize,
    /// Updates and deletes whose target was already gone.
    pub already_gone: usize,
    /// Actions refused and dropped.
    pub rejected: usize,
    /// Actions that failed and stay queued.
    pub failed: usize,
    /// Actions not attempted because an earlier action for the same report
    /// failed in this pass.
    pub skipped: usize,
    /// Actions still queued after the pass.
    pub remaining: usize,
    /// The pass stopped because the device went offline.
    pub stopped_offline: bool,
    /// Another pass was already running; this call did nothing.
    pub reentrant: bool,
}

/// Counters across all passes.
#[derive(Debug, Clone, Default)]
pub struct DispatchStats {
    /// Passes run.
    pub passes: u64,
    /// Actions delivered, already-gone included.
    pub delivered: u64,
    /// Actions rejected.
    pub rejected: u64,
    /// Failed attempts.
    pub failures: u64,
    /// End of the last pass.
    pub last_drain: Option<Instant>,
    /// Last failure message.
    pub last_error: Option<String>,
}

/// Wakes the dispatcher loop. Requests made while a pass is running are
/// coalesced into one follow-up pass.
#[derive(Debug, Clone, Default)]
pub struct SyncTrigger {
    notify: Arc<Notify>,
}

impl SyncTrigger {
    /// Creates a trigger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Asks for a drain pass.
    pub fn request(&self) {
        self.notify.notify_one();
    }

    /// Waits for a request.
    pub async fn requested(&self) {
        self.notify.notified().await;
    }
}

enum Outcome {
    Delivered(Delivery),
    Rejected(SyncError),
    Failed(SyncError),
}

struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Drains the durable queue against a remote API.
pub struct Dispatcher<A: RemoteApi> {
    queue: Arc<QueueStore>,
    api: A,
    connectivity: ConnectivityState,
    policy: DrainPolicy,
    state: RwLock<DispatcherState>,
    draining: AtomicBool,
    stats: RwLock<DispatchStats>,
    notices: broadcast::Sender<SyncNotice>,
}

impl<A: RemoteApi> Dispatcher<A> {
    /// Creates a dispatcher.
    pub fn new(
        queue: Arc<QueueStore>,
        api: A,
        connectivity: ConnectivityState,
        policy: DrainPolicy,
    ) -> Self {
        let (notices, _) = broadcast::channel(64);
        Self {
            queue,
            api,
            connectivity,
            policy,
            state: RwLock::new(DispatcherState::Idle),
            draining: AtomicBool::new(false),
            stats: RwLock::new(DispatchStats::default()),
            notices,
        }
    }

    /// Sets the notice buffer size. Must be called before subscribing.
    #[must_use]
    pub fn with_notice_capacity(mut self, capacity: usize) -> Self {
        self.notices = broadcast::channel(capacity.max(1)).0;
        self
    }

    /// Gets the current state.
    pub fn state(&self) -> DispatcherState {
        *self.state.read()
    }

    /// Gets the current stats.
    pub fn stats(&self) -> DispatchStats {
        self.stats.read().clone()
    }

    /// Gets the failure policy.
    pub fn policy(&self) -> DrainPolicy {
        self.policy
    }

    /// Returns the queue being drained.
    pub fn queue(&self) -> &Arc<QueueStore> {
        &self.queue
    }

    /// Subscribes to delivery and rejection notices.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncNotice> {
        self.notices.subscribe()
    }

    fn set_state(&self, state: DispatcherState) {
        *self.state.write() = state;
    }

    fn publish(&self, notice: SyncNotice) {
        // No subscribers is fine.
        let _ = self.notices.send(notice);
    }

    /// Runs one drain pass.
    ///
    /// A call made while another pass is running returns at once with
    /// [`DrainReport::reentrant`] set.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Persistence`] if the queue cannot be updated.
    /// Remote failures are reported in the [`DrainReport`], not as errors.
    pub async fn drain(&self) -> SyncResult<DrainReport> {
        if self
            .draining
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("drain already in progress");
            return Ok(DrainReport {
                reentrant: true,
                remaining: self.queue.len(),
                ..DrainReport::default()
            });
        }
        let _guard = DrainGuard(&self.draining);

        self.set_state(DispatcherState::Draining);
        let result = self.drain_pass().await;

        let next = match &result {
            Ok(report) if report.remaining == 0 => DispatcherState::Idle,
            _ => DispatcherState::Waiting,
        };
        self.set_state(next);

        let mut stats = self.stats.write();
        stats.passes += 1;
        stats.last_drain = Some(Instant::now());
        if let Err(e) = &result {
            stats.last_error = Some(e.to_string());
        }
        drop(stats);

        if let Ok(report) = &result {
            info!(
                sent = report.sent,
                already_gone = report.already_gone,
                rejected = report.rejected,
                failed = report.failed,
                remaining = report.remaining,
                "drain pass finished"
            );
        }
        result
    }

    async fn drain_pass(&self) -> SyncResult<DrainReport> {
        let mut report = DrainReport::default();
        let mut blocked: HashSet<RemoteId> = HashSet::new();

        for listed in self.queue.list_pending() {
            if !self.connectivity.is_online() {
                debug!("went offline, stopping drain");
                report.stopped_offline = true;
                break;
            }
            if let Some(target) = &listed.target_id {
                if blocked.contains(target) {
                    report.skipped += 1;
                    continue;
                }
            }
            // Re-read: the foreground may have coalesced a newer update into it.
            let Some(action) = self.queue.get(listed.id) else {
                continue;
            };

            match self.dispatch(&action).await {
                Outcome::Delivered(delivery) => {
                    if matches!(delivery, Delivery::AlreadyGone(_)) {
                        report.already_gone += 1;
                    } else {
                        report.sent += 1;
                    }
                    if !self.queue.remove_if_unchanged(&action)? {
                        debug!(id = action.id, "action rewritten during delivery, keeping it");
                    }
                    self.stats.write().delivered += 1;
                    self.publish(SyncNotice::Delivered {
                        action_id: action.id,
                        delivery,
                    });
                }
                Outcome::Rejected(error) => {
                    warn!(id = action.id, kind = action.kind.name(), error = %error, "queued action rejected");
                    if !self.queue.remove_if_unchanged(&action)? {
                        debug!(id = action.id, "action rewritten during delivery, keeping it");
                    }
                    report.rejected += 1;
                    self.stats.write().rejected += 1;
                    self.publish(SyncNotice::Rejected {
                        action_id: action.id,
                        kind: action.kind,
                        target_id: action.target_id.clone(),
                        reason: error.to_string(),
                    });
                }
                Outcome::Failed(error) => {
                    debug!(id = action.id, error = %error, "queued action failed");
                    report.failed += 1;
                    {
                        let mut stats = self.stats.write();
                        stats.failures += 1;
                        stats.last_error = Some(error.to_string());
                    }
                    if matches!(error, SyncError::Offline) {
                        report.stopped_offline = true;
                        break;
                    }
                    match self.policy {
                        DrainPolicy::HaltOnFailure => break,
                        DrainPolicy::ContinueOnFailure => {
                            if let Some(target) = action.target_id {
                                blocked.insert(target);
                            }
                        }
                    }
                }
            }
        }

        report.remaining = self.queue.len();
        Ok(report)
    }

    async fn dispatch(&self, action: &PendingAction) -> Outcome {
        match self.deliver(action).await {
            Ok(delivery) => Outcome::Delivered(delivery),
            Err(e) if e.is_terminal() => Outcome::Rejected(e),
            Err(e) => Outcome::Failed(e),
        }
    }

    async fn deliver(&self, action: &PendingAction) -> SyncResult<Delivery> {
        match action.decode_payload()? {
            ActionPayload::Create { report, public } => {
                let created = self.api.create(&report, public).await?;
                Ok(Delivery::Created {
                    fields: report,
                    report: created,
                })
            }
            ActionPayload::UpdateStatus(update) => {
                let target = target_of(action)?;
                match self.api.update_status(target, update.status).await {
                    Ok(report) => Ok(Delivery::Updated(report)),
                    Err(e) if e.is_not_found() => Ok(Delivery::AlreadyGone(target.clone())),
                    Err(e) => Err(e),
                }
            }
            ActionPayload::Delete => {
                let target = target_of(action)?;
                match self.api.delete(target).await {
                    Ok(()) => Ok(Delivery::Deleted(target.clone())),
                    Err(e) if e.is_not_found() => Ok(Delivery::AlreadyGone(target.clone())),
                    Err(e) => Err(e),
                }
            }
        }
    }
}

fn target_of(action: &PendingAction) -> SyncResult<&RemoteId> {
    action
        .target_id
        .as_ref()
        .ok_or_else(|| SyncError::Protocol(format!("action {} has no target", action.id)))
}

/// Handle to a spawned dispatcher loop.
#[derive(Debug)]
pub struct DispatcherHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl DispatcherHandle {
    /// Stops the loop after the current pass and waits for it.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            warn!(error = %e, "dispatcher task ended abnormally");
        }
    }

    /// Returns true once the loop has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl<A: RemoteApi + 'static> Dispatcher<A> {
    /// Spawns the drain loop on the current runtime.
    ///
    /// The loop runs one pass at start, then one per trigger request and
    /// one per offline to online transition. It exits on
    /// [`DispatcherHandle::shutdown`] or when the handle is dropped.
    pub fn spawn(self: Arc<Self>, trigger: SyncTrigger) -> DispatcherHandle {
        let (shutdown, mut stop) = watch::channel(false);
        let mut connectivity = self.connectivity.subscribe();
        trigger.request();

        let task = tokio::spawn(async move {
            info!("dispatcher started");
            loop {
                let wake = tokio::select! {
                    changed = stop.changed() => {
                        if changed.is_err() || *stop.borrow() {
                            break;
                        }
                        false
                    }
                    _ = trigger.requested() => true,
                    changed = connectivity.changed() => match changed {
                        Ok(()) => *connectivity.borrow_and_update() == Connectivity::Online,
                        Err(_) => false,
                    },
                };
                if wake {
                    if let Err(e) = self.drain().await {
                        warn!(error = %e, "drain pass failed");
                    }
                }
            }
            info!("dispatcher stopped");
        });

        DispatcherHandle { shutdown, task }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MockCall, MockFailure, MockTransport};
    use beacon_sync_protocol::{ReportStatus, StatusUpdate};

    fn fire(title: &str) -> ActionPayload {
        ActionPayload::Create {
            report: NewReport::new("Fire", title, "12.9, 77.6", "asha"),
            public: false,
        }
    }

    fn status(status: ReportStatus) -> ActionPayload {
        ActionPayload::UpdateStatus(StatusUpdate { status })
    }

    fn setup(policy: DrainPolicy) -> (Arc<QueueStore>, Arc<MockTransport>, Dispatcher<Arc<MockTransport>>) {
        let queue = Arc::new(QueueStore::open_in_memory().unwrap());
        let mock = Arc::new(MockTransport::new());
        let dispatcher = Dispatcher::new(
            queue.clone(),
            mock.clone(),
            ConnectivityState::online(),
            policy,
        );
        (queue, mock, dispatcher)
    }

    #[tokio::test]
    async fn drains_in_fifo_order() {
        let (queue, mock, dispatcher) = setup(DrainPolicy::ContinueOnFailure);
        queue.enqueue_payload(None, &fire("first")).unwrap();
        queue.enqueue_payload(None, &fire("second")).unwrap();

        let report = dispatcher.drain().await.unwrap();
        assert_eq!(report.sent, 2);
        assert_eq!(report.remaining, 0);
        assert!(queue.is_empty());
        assert_eq!(dispatcher.state(), DispatcherState::Idle);

        let titles: Vec<String> = mock
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                MockCall::Create { title, .. } => Some(title),
                _ => None,
            })
            .collect();
        assert_eq!(titles, vec!["first", "second"]);
    }

    #[tokio::test]
    async fn not_found_counts_as_done() {
        let (queue, _mock, dispatcher) = setup(DrainPolicy::ContinueOnFailure);
        let mut notices = dispatcher.subscribe();
        queue
            .enqueue_payload(Some("gone".into()), &status(ReportStatus::Resolved))
            .unwrap();
        queue
            .enqueue_payload(Some("gone-too".into()), &ActionPayload::Delete)
            .unwrap();

        let report = dispatcher.drain().await.unwrap();
        assert_eq!(report.already_gone, 2);
        assert_eq!(report.failed, 0);
        assert!(queue.is_empty());

        let notice = notices.recv().await.unwrap();
        assert!(matches!(
            notice,
            SyncNotice::Delivered {
                delivery: Delivery::AlreadyGone(_),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn continue_policy_skips_only_the_failing_target() {
        let (queue, mock, dispatcher) = setup(DrainPolicy::ContinueOnFailure);
        let created = mock.create(&NewReport::new("Flood", "t", "l", "a"), false).await.unwrap();
        queue
            .enqueue_payload(Some("missing-but-failing".into()), &status(ReportStatus::Acknowledged))
            .unwrap();
        queue
            .enqueue_payload(Some("missing-but-failing".into()), &ActionPayload::Delete)
            .unwrap();
        queue
            .enqueue_payload(Some(created.id.clone()), &status(ReportStatus::Resolved))
            .unwrap();
        mock.fail_next(MockFailure::Unavailable);

        let report = dispatcher.drain().await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.sent, 1);
        assert_eq!(report.remaining, 2);
        assert_eq!(dispatcher.state(), DispatcherState::Waiting);
        assert_eq!(mock.reports()[0].status, ReportStatus::Resolved);
    }

    #[tokio::test]
    async fn halt_policy_stops_the_pass() {
        let (queue, mock, dispatcher) = setup(DrainPolicy::HaltOnFailure);
        queue.enqueue_payload(None, &fire("a")).unwrap();
        queue.enqueue_payload(None, &fire("b")).unwrap();
        mock.fail_next(MockFailure::NoResponse);

        let report = dispatcher.drain().await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.sent, 0);
        assert_eq!(report.remaining, 2);
        assert_eq!(mock.call_count(), 1);

        let report = dispatcher.drain().await.unwrap();
        assert_eq!(report.sent, 2);
        assert_eq!(dispatcher.stats().passes, 2);
    }

    #[tokio::test]
    async fn rejected_actions_leave_the_queue_with_a_notice() {
        let (queue, mock, dispatcher) = setup(DrainPolicy::ContinueOnFailure);
        let mut notices = dispatcher.subscribe();
        let id = queue.enqueue_payload(None, &fire("bad")).unwrap();
        mock.fail_next(MockFailure::Unauthorized);

        let report = dispatcher.drain().await.unwrap();
        assert_eq!(report.rejected, 1);
        assert!(queue.is_empty());
        match notices.recv().await.unwrap() {
            SyncNotice::Rejected { action_id, kind, .. } => {
                assert_eq!(action_id, id);
                assert_eq!(kind, ActionKind::Create);
            }
            other => panic!("unexpected notice {other:?}"),
        }
    }

    struct RewriteWhileSending {
        queue: Arc<QueueStore>,
    }

    #[async_trait::async_trait]
    impl RemoteApi for RewriteWhileSending {
        async fn list(&self) -> SyncResult<Vec<Report>> {
            Ok(Vec::new())
        }

        async fn create(&self, _report: &NewReport, _public: bool) -> SyncResult<Report> {
            Err(SyncError::application(422, "invalid report"))
        }

        async fn update_status(&self, id: &RemoteId, _status: ReportStatus) -> SyncResult<Report> {
            self.queue
                .enqueue_coalescing(
                    ActionKind::Update,
                    Some(id.clone()),
                    status(ReportStatus::Resolved).encode().unwrap(),
                )
                .unwrap();
            Err(SyncError::application(422, "transition not allowed"))
        }

        async fn delete(&self, _id: &RemoteId) -> SyncResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn rejection_keeps_an_update_coalesced_in_flight() {
        let queue = Arc::new(QueueStore::open_in_memory().unwrap());
        let dispatcher = Dispatcher::new(
            queue.clone(),
            RewriteWhileSending {
                queue: queue.clone(),
            },
            ConnectivityState::online(),
            DrainPolicy::ContinueOnFailure,
        );
        let id = queue
            .enqueue_payload(Some("r-7".into()), &status(ReportStatus::Acknowledged))
            .unwrap();

        let report = dispatcher.drain().await.unwrap();
        assert_eq!(report.rejected, 1);
        assert_eq!(report.remaining, 1);

        let kept = queue.get(id).unwrap();
        assert_eq!(kept.decode_payload().unwrap(), status(ReportStatus::Resolved));
    }

    #[tokio::test]
    async fn undecodable_payload_is_rejected() {
        let (queue, mock, dispatcher) = setup(DrainPolicy::ContinueOnFailure);
        queue
            .enqueue(ActionKind::Create, None, vec![0xff, 0x00, 0x13])
            .unwrap();

        let report = dispatcher.drain().await.unwrap();
        assert_eq!(report.rejected, 1);
        assert_eq!(mock.call_count(), 0);
    }

    #[tokio::test]
    async fn offline_stops_scheduling() {
        let queue = Arc::new(QueueStore::open_in_memory().unwrap());
        let mock = Arc::new(MockTransport::new());
        let dispatcher = Dispatcher::new(
            queue.clone(),
            mock.clone(),
            ConnectivityState::offline(),
            DrainPolicy::ContinueOnFailure,
        );
        queue.enqueue_payload(None, &fire("a")).unwrap();

        let report = dispatcher.drain().await.unwrap();
        assert!(report.stopped_offline);
        assert_eq!(report.remaining, 1);
        assert_eq!(mock.call_count(), 0);
    }

    #[tokio::test]
    async fn second_drain_while_running_is_a_no_op() {
        let (queue, _mock, dispatcher) = setup(DrainPolicy::ContinueOnFailure);
        queue.enqueue_payload(None, &fire("a")).unwrap();

        dispatcher.draining.store(true, Ordering::SeqCst);
        let report = dispatcher.drain().await.unwrap();
        assert!(report.reentrant);
        assert_eq!(report.remaining, 1);
        assert_eq!(dispatcher.stats().passes, 0);

        dispatcher.draining.store(false, Ordering::SeqCst);
        assert_eq!(dispatcher.drain().await.unwrap().sent, 1);
    }

    #[tokio::test]
    async fn concurrent_drains_send_each_action_once() {
        let (queue, mock, dispatcher) = setup(DrainPolicy::ContinueOnFailure);
        for i in 0..5 {
            queue.enqueue_payload(None, &fire(&format!("r{i}"))).unwrap();
        }

        let (a, b) = tokio::join!(dispatcher.drain(), dispatcher.drain());
        let (a, b) = (a.unwrap(), b.unwrap());
        assert_eq!(a.sent + b.sent, 5);
        assert_eq!(mock.reports().len(), 5);
    }

    #[tokio::test]
    async fn spawned_loop_drains_on_trigger_and_reconnect() {
        let queue = Arc::new(QueueStore::open_in_memory().unwrap());
        let mock = Arc::new(MockTransport::new());
        let connectivity = ConnectivityState::offline();
        let dispatcher = Arc::new(Dispatcher::new(
            queue.clone(),
            mock.clone(),
            connectivity.clone(),
            DrainPolicy::ContinueOnFailure,
        ));
        let mut notices = dispatcher.subscribe();
        let trigger = SyncTrigger::new();
        let handle = dispatcher.clone().spawn(trigger.clone());

        queue.enqueue_payload(None, &fire("queued offline")).unwrap();
        trigger.request();
        tokio::task::yield_now().await;
        assert_eq!(queue.len(), 1);

        connectivity.apply(crate::connectivity::ConnectivitySignal::WentOnline);
        let notice = notices.recv().await.unwrap();
        assert!(matches!(notice, SyncNotice::Delivered { .. }));
        assert!(queue.is_empty());

        handle.shutdown().await;
    }
}
