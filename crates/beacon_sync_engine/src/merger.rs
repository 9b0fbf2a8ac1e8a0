//! Optimistic state merger.
//!
//! Produces the list the UI renders from three sources:
//!
//! 1. the confirmed server snapshot (full re-fetch plus push events),
//! 2. the durable queue (queued creates, updates and deletes),
//! 3. in-memory optimistic state for requests still in flight.
//!
//! A local create has no remote id, so pairing it with the server's copy
//! relies on [`IdentityKey`], a best-effort match on type, title, location
//! and author. Two reports agreeing on all four are indistinguishable.
//! In-memory shadows are removed when a matching confirmed report arrives;
//! queued shadows are only hidden, the queue entry stays until the
//! dispatcher delivers it.

use crate::connectivity::ConnectivityState;
use crate::dispatcher::{Delivery, SyncNotice, SyncTrigger};
use crate::error::SyncResult;
use crate::transport::RemoteApi;
use beacon_queue::QueueStore;
use beacon_sync_protocol::{
    ActionKind, ActionPayload, ChangeEvent, IdentityKey, NewReport, PendingAction, RemoteId,
    Report, ReportStatus, StatusUpdate,
};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

/// Arrivals kept for late delivery notices.
const UNCLAIMED_CAPACITY: usize = 256;

/// A mutation requested by the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserAction {
    /// File a new report.
    Create(NewReport),
    /// File a new report without a session.
    CreatePublic(NewReport),
    /// Change the status of a report.
    UpdateStatus {
        /// Target report.
        id: RemoteId,
        /// New status.
        status: ReportStatus,
    },
    /// Delete a report.
    Delete {
        /// Target report.
        id: RemoteId,
    },
}

impl UserAction {
    /// Returns the queue kind of this action.
    pub fn kind(&self) -> ActionKind {
        match self {
            Self::Create(_) | Self::CreatePublic(_) => ActionKind::Create,
            Self::UpdateStatus { .. } => ActionKind::Update,
            Self::Delete { .. } => ActionKind::Delete,
        }
    }

    /// Returns the target report, if any.
    pub fn target(&self) -> Option<&RemoteId> {
        match self {
            Self::Create(_) | Self::CreatePublic(_) => None,
            Self::UpdateStatus { id, .. } | Self::Delete { id } => Some(id),
        }
    }

    /// Returns the payload stored when this action is queued.
    pub fn payload(&self) -> ActionPayload {
        match self {
            Self::Create(report) => ActionPayload::Create {
                report: report.clone(),
                public: false,
            },
            Self::CreatePublic(report) => ActionPayload::Create {
                report: report.clone(),
                public: true,
            },
            Self::UpdateStatus { status, .. } => {
                ActionPayload::UpdateStatus(StatusUpdate { status: *status })
            }
            Self::Delete { .. } => ActionPayload::Delete,
        }
    }
}

/// What [`Merger::submit`] did with an action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// The server accepted it. Holds the server copy for creates and
    /// updates.
    Sent(Option<Report>),
    /// It was queued for the dispatcher.
    Queued {
        /// Queue id.
        action_id: u64,
    },
    /// The target was already deleted on the server.
    AlreadyGone,
}

/// Where a row of the merged view comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// The server snapshot.
    Confirmed,
    /// A queued, or delivered but not yet confirmed, create.
    Pending {
        /// Queue id.
        action_id: u64,
    },
    /// A create still being sent.
    Optimistic {
        /// Placeholder id.
        placeholder_id: u64,
    },
}

/// One row of the merged view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedReport {
    /// Source of the row.
    pub origin: Origin,
    /// Remote id, known only for confirmed rows.
    pub id: Option<RemoteId>,
    /// User-entered fields.
    pub fields: NewReport,
    /// Status shown, local changes applied.
    pub status: ReportStatus,
    /// Creation or enqueue time, unix milliseconds.
    pub created_at: u64,
    /// A local change for this row has not reached the server yet.
    pub syncing: bool,
}

impl MergedReport {
    /// Returns true for rows that only exist locally.
    pub fn is_local(&self) -> bool {
        !matches!(self.origin, Origin::Confirmed)
    }

    /// Returns true for rows backed by an in-flight request.
    pub fn is_optimistic(&self) -> bool {
        matches!(self.origin, Origin::Optimistic { .. })
    }
}

/// What a push event did to the confirmed snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// A new report was inserted.
    Inserted,
    /// The report was already present.
    Duplicate,
    /// An existing report was replaced.
    Updated,
    /// A report was removed.
    Deleted,
    /// The event referred to an unknown report and was ignored.
    Dropped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    InFlight,
    Sent,
}

#[derive(Debug, Clone)]
struct Placeholder {
    token: u64,
    fields: NewReport,
    created_at: u64,
    phase: Phase,
}

#[derive(Debug, Clone, Copy)]
enum Change {
    Status(ReportStatus),
    Delete,
}

#[derive(Debug, Clone)]
struct LocalChange {
    token: u64,
    target: RemoteId,
    change: Change,
}

#[derive(Debug, Default)]
struct Overlay {
    status: Option<ReportStatus>,
    deleted: bool,
}

impl Overlay {
    fn apply(&mut self, change: Change) {
        match change {
            Change::Status(status) => self.status = Some(status),
            Change::Delete => self.deleted = true,
        }
    }
}

#[derive(Debug, Default)]
struct ViewState {
    confirmed: Vec<Report>,
    placeholders: Vec<Placeholder>,
    changes: Vec<LocalChange>,
    delivered: Vec<(u64, NewReport, u64)>,
    unclaimed: VecDeque<IdentityKey>,
    stale: bool,
}

impl ViewState {
    fn position(&self, id: &RemoteId) -> Option<usize> {
        self.confirmed.iter().position(|r| &r.id == id)
    }

    fn begin(&mut self, token: u64, action: &UserAction) {
        match action {
            UserAction::Create(fields) | UserAction::CreatePublic(fields) => {
                self.placeholders.insert(
                    0,
                    Placeholder {
                        token,
                        fields: fields.clone(),
                        created_at: now_millis(),
                        phase: Phase::InFlight,
                    },
                );
            }
            UserAction::UpdateStatus { id, status } => self.changes.push(LocalChange {
                token,
                target: id.clone(),
                change: Change::Status(*status),
            }),
            UserAction::Delete { id } => self.changes.push(LocalChange {
                token,
                target: id.clone(),
                change: Change::Delete,
            }),
        }
    }

    fn discard(&mut self, token: u64) {
        self.placeholders.retain(|p| p.token != token);
        self.changes.retain(|c| c.token != token);
    }

    fn mark_sent(&mut self, token: u64) {
        if let Some(p) = self.placeholders.iter_mut().find(|p| p.token == token) {
            p.phase = Phase::Sent;
        }
    }

    fn replace(&mut self, report: Report) -> bool {
        match self.position(&report.id) {
            Some(pos) => {
                self.confirmed[pos] = report;
                true
            }
            None => false,
        }
    }

    fn evict(&mut self, id: &RemoteId) -> bool {
        match self.position(id) {
            Some(pos) => {
                self.confirmed.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Removes the oldest in-memory shadow matching a newly confirmed
    /// report, or remembers the arrival for a delivery notice still on its
    /// way.
    fn claim(&mut self, key: IdentityKey) {
        if let Some(pos) = self
            .delivered
            .iter()
            .position(|(_, fields, _)| fields.identity() == key)
        {
            let (action_id, _, _) = self.delivered.remove(pos);
            debug!(action_id, "delivered create confirmed");
            return;
        }
        if let Some(pos) = self
            .placeholders
            .iter()
            .rposition(|p| p.fields.identity() == key)
        {
            let placeholder = self.placeholders.remove(pos);
            debug!(
                placeholder = placeholder.token,
                sent = placeholder.phase == Phase::Sent,
                "placeholder confirmed"
            );
            return;
        }
        self.unclaimed.push_back(key);
        if self.unclaimed.len() > UNCLAIMED_CAPACITY {
            self.unclaimed.pop_front();
        }
    }

    fn note_delivered(&mut self, action_id: u64, fields: NewReport, enqueued_at: u64) {
        let key = fields.identity();
        if let Some(pos) = self.unclaimed.iter().position(|k| k == &key) {
            self.unclaimed.remove(pos);
            return;
        }
        self.delivered.push((action_id, fields, enqueued_at));
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Merges server state, the durable queue and in-flight requests into one
/// view, and routes user actions to the server or the queue.
pub struct Merger<A: RemoteApi> {
    api: A,
    queue: Arc<QueueStore>,
    connectivity: ConnectivityState,
    trigger: SyncTrigger,
    coalesce_updates: bool,
    state: RwLock<ViewState>,
    next_token: AtomicU64,
}

impl<A: RemoteApi> Merger<A> {
    /// Creates a merger with an empty snapshot.
    pub fn new(
        api: A,
        queue: Arc<QueueStore>,
        connectivity: ConnectivityState,
        trigger: SyncTrigger,
    ) -> Self {
        Self {
            api,
            queue,
            connectivity,
            trigger,
            coalesce_updates: true,
            state: RwLock::new(ViewState::default()),
            next_token: AtomicU64::new(1),
        }
    }

    /// Enables or disables coalescing of queued status updates.
    #[must_use]
    pub fn with_coalesce_updates(mut self, coalesce: bool) -> Self {
        self.coalesce_updates = coalesce;
        self
    }

    /// Submits a user action.
    ///
    /// The view reflects the action before this returns control to the
    /// network. Connectivity failures queue the action; terminal failures
    /// undo the optimistic change and are returned.
    ///
    /// # Errors
    ///
    /// Returns the terminal [`SyncError`](crate::SyncError) from the server,
    /// or [`SyncError::Persistence`](crate::SyncError::Persistence) when the action could not be queued.
    pub async fn submit(&self, action: UserAction) -> SyncResult<SubmitOutcome> {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        self.state.write().begin(token, &action);

        if !self.connectivity.is_online() {
            debug!(kind = action.kind().name(), "offline, queuing");
            return self.enqueue(token, &action);
        }

        let result = match &action {
            UserAction::Create(fields) => self.api.create(fields, false).await.map(Some),
            UserAction::CreatePublic(fields) => self.api.create(fields, true).await.map(Some),
            UserAction::UpdateStatus { id, status } => {
                self.api.update_status(id, *status).await.map(Some)
            }
            UserAction::Delete { id } => self.api.delete(id).await.map(|()| None),
        };

        match result {
            Ok(report) => {
                let mut state = self.state.write();
                match &action {
                    UserAction::Create(_) | UserAction::CreatePublic(_) => state.mark_sent(token),
                    UserAction::UpdateStatus { .. } => {
                        state.discard(token);
                        if let Some(report) = &report {
                            state.replace(report.clone());
                        }
                    }
                    UserAction::Delete { id } => {
                        state.discard(token);
                        state.evict(id);
                    }
                }
                Ok(SubmitOutcome::Sent(report))
            }
            Err(e) if e.is_not_found() && action.target().is_some() => {
                let mut state = self.state.write();
                state.discard(token);
                if let Some(id) = action.target() {
                    state.evict(id);
                }
                debug!("target already gone, evicted");
                Ok(SubmitOutcome::AlreadyGone)
            }
            Err(e) if e.is_connectivity() => {
                debug!(error = %e, "send failed, queuing");
                self.enqueue(token, &action)
            }
            Err(e) => {
                self.state.write().discard(token);
                warn!(kind = action.kind().name(), error = %e, "action rejected");
                Err(e)
            }
        }
    }

    fn enqueue(&self, token: u64, action: &UserAction) -> SyncResult<SubmitOutcome> {
        let result = self.persist(action);
        self.state.write().discard(token);
        let action_id = result?;
        self.trigger.request();
        Ok(SubmitOutcome::Queued { action_id })
    }

    fn persist(&self, action: &UserAction) -> SyncResult<u64> {
        let payload = action.payload().encode()?;
        let target = action.target().cloned();
        let id = if self.coalesce_updates && action.kind() == ActionKind::Update {
            self.queue
                .enqueue_coalescing(ActionKind::Update, target, payload)?
                .id
        } else {
            self.queue.enqueue(action.kind(), target, payload)?
        };
        Ok(id)
    }

    /// Replaces the confirmed snapshot with a full re-fetch.
    ///
    /// # Errors
    ///
    /// Returns the transport error; the snapshot is left unchanged.
    pub async fn refresh(&self) -> SyncResult<usize> {
        let reports = self.api.list().await?;
        let mut state = self.state.write();
        let known: HashSet<RemoteId> = state.confirmed.iter().map(|r| r.id.clone()).collect();
        for report in reports.iter().filter(|r| !known.contains(&r.id)) {
            state.claim(report.identity());
        }
        state.confirmed = reports;
        state.stale = false;
        debug!(count = state.confirmed.len(), "snapshot refreshed");
        Ok(state.confirmed.len())
    }

    /// Applies one push event to the confirmed snapshot.
    pub fn apply_event(&self, event: &ChangeEvent) -> ApplyOutcome {
        let mut state = self.state.write();
        match event {
            ChangeEvent::Created(report) => {
                if state.position(&report.id).is_some() {
                    return ApplyOutcome::Duplicate;
                }
                state.confirmed.insert(0, report.clone());
                state.claim(report.identity());
                ApplyOutcome::Inserted
            }
            ChangeEvent::Updated(report) => {
                if state.replace(report.clone()) {
                    ApplyOutcome::Updated
                } else {
                    debug!(id = %report.id, "update for unknown report dropped");
                    ApplyOutcome::Dropped
                }
            }
            ChangeEvent::Deleted(id) => {
                if state.evict(id) {
                    ApplyOutcome::Deleted
                } else {
                    ApplyOutcome::Dropped
                }
            }
        }
    }

    /// Applies a dispatcher notice.
    pub fn apply_notice(&self, notice: &SyncNotice) {
        match notice {
            SyncNotice::Delivered {
                action_id,
                delivery,
            } => {
                let mut state = self.state.write();
                match delivery {
                    Delivery::Created { fields, report } => {
                        state.note_delivered(*action_id, fields.clone(), report.created_at)
                    }
                    Delivery::Updated(report) => {
                        state.replace(report.clone());
                    }
                    Delivery::Deleted(id) | Delivery::AlreadyGone(id) => {
                        state.evict(id);
                    }
                }
            }
            SyncNotice::Rejected {
                action_id, reason, ..
            } => {
                warn!(action_id, reason = %reason, "queued action was rejected by the server");
            }
        }
    }

    /// Flags the snapshot as possibly missing events.
    pub fn mark_stale(&self) {
        self.state.write().stale = true;
    }

    /// Returns true if events may have been missed since the last refresh.
    pub fn is_stale(&self) -> bool {
        self.state.read().stale
    }

    /// Returns true if a create reached the server but its confirmed copy
    /// has not been seen yet.
    pub fn has_unconfirmed(&self) -> bool {
        let state = self.state.read();
        !state.delivered.is_empty() || state.placeholders.iter().any(|p| p.phase == Phase::Sent)
    }

    /// Returns a copy of the confirmed snapshot.
    pub fn confirmed(&self) -> Vec<Report> {
        self.state.read().confirmed.clone()
    }

    /// Returns the queue.
    pub fn queue(&self) -> &Arc<QueueStore> {
        &self.queue
    }

    /// Computes the merged view.
    ///
    /// Order: in-flight creates (newest first), the confirmed snapshot with
    /// local changes applied, then creates waiting in the queue or for
    /// confirmation.
    pub fn view(&self) -> Vec<MergedReport> {
        let pending = self.queue.list_pending();
        let state = self.state.read();

        let mut overlays: HashMap<&RemoteId, Overlay> = HashMap::new();
        let mut queued_creates: Vec<(&PendingAction, NewReport)> = Vec::new();
        for action in &pending {
            let payload = match action.decode_payload() {
                Ok(payload) => payload,
                Err(e) => {
                    debug!(id = action.id, error = %e, "skipping undecodable action");
                    continue;
                }
            };
            match (payload, &action.target_id) {
                (ActionPayload::Create { report, .. }, _) => queued_creates.push((action, report)),
                (ActionPayload::UpdateStatus(update), Some(target)) => overlays
                    .entry(target)
                    .or_default()
                    .apply(Change::Status(update.status)),
                (ActionPayload::Delete, Some(target)) => {
                    overlays.entry(target).or_default().apply(Change::Delete)
                }
                _ => {}
            }
        }
        for change in &state.changes {
            overlays
                .entry(&change.target)
                .or_default()
                .apply(change.change);
        }

        let mut rows = Vec::with_capacity(
            state.placeholders.len() + state.confirmed.len() + queued_creates.len(),
        );

        for placeholder in &state.placeholders {
            rows.push(MergedReport {
                origin: Origin::Optimistic {
                    placeholder_id: placeholder.token,
                },
                id: None,
                fields: placeholder.fields.clone(),
                status: ReportStatus::Reported,
                created_at: placeholder.created_at,
                syncing: true,
            });
        }

        let mut matches: HashMap<IdentityKey, usize> = HashMap::new();
        for report in &state.confirmed {
            *matches.entry(report.identity()).or_default() += 1;
            let overlay = overlays.get(&report.id);
            if overlay.is_some_and(|o| o.deleted) {
                continue;
            }
            rows.push(MergedReport {
                origin: Origin::Confirmed,
                id: Some(report.id.clone()),
                fields: report.fields(),
                status: overlay.and_then(|o| o.status).unwrap_or(report.status),
                created_at: report.created_at,
                syncing: overlay.is_some(),
            });
        }

        for (action, fields) in queued_creates {
            if let Some(count) = matches.get_mut(&fields.identity()).filter(|c| **c > 0) {
                *count -= 1;
                continue;
            }
            rows.push(MergedReport {
                origin: Origin::Pending {
                    action_id: action.id,
                },
                id: None,
                fields,
                status: ReportStatus::Reported,
                created_at: action.enqueued_at,
                syncing: true,
            });
        }

        for (action_id, fields, created_at) in &state.delivered {
            rows.push(MergedReport {
                origin: Origin::Pending {
                    action_id: *action_id,
                },
                id: None,
                fields: fields.clone(),
                status: ReportStatus::Reported,
                created_at: *created_at,
                syncing: true,
            });
        }

        rows
    }
}
