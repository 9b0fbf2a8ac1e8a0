//! Remote API abstraction.

use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use beacon_sync_protocol::{NewReport, RemoteId, Report, ReportStatus};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// The remote report API.
///
/// Implementations classify every failure into a [`SyncError`]: no response
/// or an unavailable authority is `Connectivity`, a missing target on update
/// or delete is `NotFound`, a rejected request is `Application` or
/// `Unauthorized`.
#[async_trait]
pub trait RemoteApi: Send + Sync {
    /// Fetches every report visible to this client.
    async fn list(&self) -> SyncResult<Vec<Report>>;

    /// Creates a report. `public` uses the unauthenticated endpoint.
    async fn create(&self, report: &NewReport, public: bool) -> SyncResult<Report>;

    /// Changes the status of a report.
    async fn update_status(&self, id: &RemoteId, status: ReportStatus) -> SyncResult<Report>;

    /// Deletes a report.
    async fn delete(&self, id: &RemoteId) -> SyncResult<()>;
}

#[async_trait]
impl<T: RemoteApi + ?Sized> RemoteApi for Arc<T> {
    async fn list(&self) -> SyncResult<Vec<Report>> {
        (**self).list().await
    }

    async fn create(&self, report: &NewReport, public: bool) -> SyncResult<Report> {
        (**self).create(report, public).await
    }

    async fn update_status(&self, id: &RemoteId, status: ReportStatus) -> SyncResult<Report> {
        (**self).update_status(id, status).await
    }

    async fn delete(&self, id: &RemoteId) -> SyncResult<()> {
        (**self).delete(id).await
    }
}

/// A failure a [`MockTransport`] can be scripted to return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFailure {
    /// 503 from a backend that is warming up.
    Unavailable,
    /// No response at all.
    NoResponse,
    /// The attempt timed out.
    Timeout,
    /// The request was rejected with this status.
    Rejected(u16),
    /// The session expired.
    Unauthorized,
}

impl MockFailure {
    fn to_error(self) -> SyncError {
        match self {
            Self::Unavailable => SyncError::connectivity("503 service unavailable"),
            Self::NoResponse => SyncError::connectivity("connection refused"),
            Self::Timeout => SyncError::Timeout,
            Self::Rejected(status) => SyncError::application(status, "rejected by mock"),
            Self::Unauthorized => SyncError::Unauthorized {
                status: 401,
                message: "session expired".into(),
            },
        }
    }
}

/// A call received by a [`MockTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    /// `list`
    List,
    /// `create`
    Create {
        /// Title of the submitted report.
        title: String,
        /// Whether the public endpoint was used.
        public: bool,
    },
    /// `update_status`
    UpdateStatus {
        /// Target id.
        id: RemoteId,
        /// Requested status.
        status: ReportStatus,
    },
    /// `delete`
    Delete {
        /// Target id.
        id: RemoteId,
    },
}

/// An in-memory remote API for tests.
///
/// Behaves like a tiny server over a report table. Failures can be
/// scripted one call at a time or persistently.
#[derive(Debug, Default)]
pub struct MockTransport {
    reports: Mutex<Vec<Report>>,
    scripted: Mutex<VecDeque<MockFailure>>,
    persistent: Mutex<Option<MockFailure>>,
    calls: Mutex<Vec<MockCall>>,
    next_id: AtomicU64,
}

impl MockTransport {
    /// Creates a mock with an empty report table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a mock preloaded with reports.
    pub fn with_reports(reports: Vec<Report>) -> Self {
        let mock = Self::new();
        *mock.reports.lock() = reports;
        mock
    }

    /// Fails the next call with `failure`.
    pub fn fail_next(&self, failure: MockFailure) {
        self.scripted.lock().push_back(failure);
    }

    /// Fails the next `n` calls with `failure`.
    pub fn fail_next_n(&self, failure: MockFailure, n: usize) {
        self.scripted
            .lock()
            .extend(std::iter::repeat(failure).take(n));
    }

    /// Fails every call with `failure` until [`MockTransport::recover`].
    pub fn fail_always(&self, failure: MockFailure) {
        *self.persistent.lock() = Some(failure);
    }

    /// Clears scripted and persistent failures.
    pub fn recover(&self) {
        self.scripted.lock().clear();
        *self.persistent.lock() = None;
    }

    /// Returns every call received so far.
    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().clone()
    }

    /// Returns the number of calls received so far.
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Returns the current report table.
    pub fn reports(&self) -> Vec<Report> {
        self.reports.lock().clone()
    }

    /// Removes a report behind the client's back.
    pub fn remove_report(&self, id: &RemoteId) {
        self.reports.lock().retain(|r| &r.id != id);
    }

    fn begin(&self, call: MockCall) -> SyncResult<()> {
        self.calls.lock().push(call);
        let failure = self
            .scripted
            .lock()
            .pop_front()
            .or(*self.persistent.lock());
        match failure {
            Some(failure) => Err(failure.to_error()),
            None => Ok(()),
        }
    }
}

fn missing(id: &RemoteId) -> SyncError {
    SyncError::NotFound {
        message: format!("report {id} does not exist"),
    }
}

#[async_trait]
impl RemoteApi for MockTransport {
    async fn list(&self) -> SyncResult<Vec<Report>> {
        self.begin(MockCall::List)?;
        Ok(self.reports())
    }

    async fn create(&self, report: &NewReport, public: bool) -> SyncResult<Report> {
        self.begin(MockCall::Create {
            title: report.title.clone(),
            public,
        })?;
        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let created = Report {
            id: RemoteId::new(format!("m-{n}")),
            report_type: report.report_type.clone(),
            title: report.title.clone(),
            location: report.location.clone(),
            description: report.description.clone(),
            author: report.author.clone(),
            status: ReportStatus::Reported,
            created_at: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis() as u64)
                .unwrap_or(0),
        };
        self.reports.lock().insert(0, created.clone());
        Ok(created)
    }

    async fn update_status(&self, id: &RemoteId, status: ReportStatus) -> SyncResult<Report> {
        self.begin(MockCall::UpdateStatus {
            id: id.clone(),
            status,
        })?;
        let mut reports = self.reports.lock();
        let report = reports
            .iter_mut()
            .find(|r| &r.id == id)
            .ok_or_else(|| missing(id))?;
        report.status = status;
        Ok(report.clone())
    }

    async fn delete(&self, id: &RemoteId) -> SyncResult<()> {
        self.begin(MockCall::Delete { id: id.clone() })?;
        let mut reports = self.reports.lock();
        let before = reports.len();
        reports.retain(|r| &r.id != id);
        if reports.len() == before {
            return Err(missing(id));
        }
        Ok(())
    }
}
