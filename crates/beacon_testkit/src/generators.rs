//! Property-based test generators using proptest.
//!
//! Besides value strategies this module holds [`QueueModel`], a plain
//! in-memory model of the action queue. Random [`QueueOp`] sequences are
//! applied to a real store and to the model, and the two must agree after
//! every step, including across reopen and compaction.

use beacon_queue::QueueStore;
use beacon_sync_protocol::{
    ActionKind, ActionPayload, NewReport, RemoteId, ReportStatus, StatusUpdate,
};
use proptest::prelude::*;

/// Strategy for report statuses.
pub fn status_strategy() -> impl Strategy<Value = ReportStatus> {
    prop_oneof![
        Just(ReportStatus::Reported),
        Just(ReportStatus::Acknowledged),
        Just(ReportStatus::InProgress),
        Just(ReportStatus::Resolved),
    ]
}

/// Strategy for remote ids drawn from a small pool, so that several
/// actions hit the same report.
pub fn remote_id_strategy() -> impl Strategy<Value = RemoteId> {
    (1u8..=3).prop_map(|n| RemoteId::new(format!("r-{n}")))
}

/// Strategy for report bodies.
pub fn new_report_strategy() -> impl Strategy<Value = NewReport> {
    (
        prop_oneof![Just("Fire"), Just("Flood"), Just("Medical"), Just("Collapse")],
        prop::string::string_regex("[A-Za-z][A-Za-z ]{0,23}").expect("Invalid regex"),
        (-90.0f64..90.0, -180.0f64..180.0),
        prop_oneof![Just("asha"), Just("meera"), Just("ravi")],
    )
        .prop_map(|(kind, title, (lat, lon), author)| {
            NewReport::new(kind, title, format!("{lat:.2}, {lon:.2}"), author)
        })
}

/// One step against the queue.
#[derive(Debug, Clone)]
pub enum QueueOp {
    /// Queue a CREATE.
    Create {
        /// Report body.
        report: NewReport,
        /// Use the public endpoint.
        public: bool,
    },
    /// Queue a status UPDATE, coalescing with a trailing update for the
    /// same target.
    UpdateStatus {
        /// Target report.
        target: RemoteId,
        /// New status.
        status: ReportStatus,
    },
    /// Queue a DELETE.
    Delete {
        /// Target report.
        target: RemoteId,
    },
    /// Remove the pending entry at this position, modulo the queue length.
    Remove(usize),
    /// Rewrite the status of the pending entry at this position, if it is
    /// an update.
    Rewrite(usize, ReportStatus),
    /// Compact the log.
    Compact,
    /// Drop the store and replay it from storage.
    Reopen,
}

/// Strategy for a single queue step.
pub fn queue_op_strategy() -> impl Strategy<Value = QueueOp> {
    prop_oneof![
        3 => (new_report_strategy(), any::<bool>())
            .prop_map(|(report, public)| QueueOp::Create { report, public }),
        3 => (remote_id_strategy(), status_strategy())
            .prop_map(|(target, status)| QueueOp::UpdateStatus { target, status }),
        1 => remote_id_strategy().prop_map(|target| QueueOp::Delete { target }),
        3 => any::<usize>().prop_map(QueueOp::Remove),
        1 => (any::<usize>(), status_strategy()).prop_map(|(i, s)| QueueOp::Rewrite(i, s)),
        1 => Just(QueueOp::Compact),
        1 => Just(QueueOp::Reopen),
    ]
}

/// Strategy for a sequence of queue steps.
pub fn queue_ops_strategy(max_len: usize) -> impl Strategy<Value = Vec<QueueOp>> {
    prop::collection::vec(queue_op_strategy(), 1..max_len)
}

/// An entry of the reference model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelEntry {
    /// Expected id.
    pub id: u64,
    /// Expected target.
    pub target_id: Option<RemoteId>,
    /// Expected payload.
    pub payload: ActionPayload,
}

/// Reference model of the queue.
#[derive(Debug, Clone)]
pub struct QueueModel {
    entries: Vec<ModelEntry>,
    next_id: u64,
}

impl Default for QueueModel {
    fn default() -> Self {
        Self::new()
    }
}

impl QueueModel {
    /// Creates the model of an empty queue.
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            next_id: 1,
        }
    }

    /// Returns the modelled entries, oldest first.
    pub fn entries(&self) -> &[ModelEntry] {
        &self.entries
    }

    fn push(&mut self, target_id: Option<RemoteId>, payload: ActionPayload) {
        self.entries.push(ModelEntry {
            id: self.next_id,
            target_id,
            payload,
        });
        self.next_id += 1;
    }

    /// Applies `op` to both `store` and the model.
    ///
    /// [`QueueOp::Reopen`] is a no-op here; the caller replaces the store.
    ///
    /// # Errors
    ///
    /// Returns the store error as a string.
    pub fn apply(&mut self, store: &QueueStore, op: &QueueOp) -> Result<(), String> {
        match op {
            QueueOp::Create { report, public } => {
                let payload = ActionPayload::Create {
                    report: report.clone(),
                    public: *public,
                };
                store
                    .enqueue_payload(None, &payload)
                    .map_err(|e| e.to_string())?;
                self.push(None, payload);
            }
            QueueOp::UpdateStatus { target, status } => {
                let payload = ActionPayload::UpdateStatus(StatusUpdate { status: *status });
                let bytes = payload.encode().map_err(|e| e.to_string())?;
                store
                    .enqueue_coalescing(ActionKind::Update, Some(target.clone()), bytes)
                    .map_err(|e| e.to_string())?;
                let latest = self
                    .entries
                    .iter_mut()
                    .rev()
                    .find(|e| e.target_id.as_ref() == Some(target));
                match latest {
                    Some(entry) if matches!(entry.payload, ActionPayload::UpdateStatus(_)) => {
                        entry.payload = payload;
                    }
                    _ => self.push(Some(target.clone()), payload),
                }
            }
            QueueOp::Delete { target } => {
                store
                    .enqueue_payload(Some(target.clone()), &ActionPayload::Delete)
                    .map_err(|e| e.to_string())?;
                self.push(Some(target.clone()), ActionPayload::Delete);
            }
            QueueOp::Remove(index) => {
                if self.entries.is_empty() {
                    return Ok(());
                }
                let entry = self.entries.remove(index % self.entries.len());
                let removed = store.remove(entry.id).map_err(|e| e.to_string())?;
                if !removed {
                    return Err(format!("entry {} was not in the store", entry.id));
                }
            }
            QueueOp::Rewrite(index, status) => {
                if self.entries.is_empty() {
                    return Ok(());
                }
                let i = index % self.entries.len();
                if !matches!(self.entries[i].payload, ActionPayload::UpdateStatus(_)) {
                    return Ok(());
                }
                let payload = ActionPayload::UpdateStatus(StatusUpdate { status: *status });
                let bytes = payload.encode().map_err(|e| e.to_string())?;
                store
                    .update(self.entries[i].id, bytes)
                    .map_err(|e| e.to_string())?;
                self.entries[i].payload = payload;
            }
            QueueOp::Compact => {
                store.compact().map_err(|e| e.to_string())?;
            }
            QueueOp::Reopen => {}
        }
        Ok(())
    }

    /// Checks that `store` holds exactly the modelled entries, in order.
    ///
    /// # Errors
    ///
    /// Describes the first difference found.
    pub fn check(&self, store: &QueueStore) -> Result<(), String> {
        let pending = store.list_pending();
        if pending.len() != self.entries.len() {
            return Err(format!(
                "store holds {} entries, model {}",
                pending.len(),
                self.entries.len()
            ));
        }
        for (actual, expected) in pending.iter().zip(&self.entries) {
            let payload = actual.decode_payload().map_err(|e| e.to_string())?;
            if actual.id != expected.id
                || actual.target_id != expected.target_id
                || payload != expected.payload
            {
                return Err(format!("store has {actual:?}, model expects {expected:?}"));
            }
        }
        let next_id = store.stats().map_err(|e| e.to_string())?.next_id;
        if next_id != self.next_id {
            return Err(format!("next id {next_id}, model expects {}", self.next_id));
        }
        Ok(())
    }
}
