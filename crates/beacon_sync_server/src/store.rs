//! In-memory report table.

use crate::error::{ServerError, ServerResult};
use beacon_sync_protocol::{NewReport, RemoteId, Report, ReportStatus};
use parking_lot::RwLock;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Server-side report table, newest first.
#[derive(Debug, Default)]
pub struct ReportStore {
    reports: RwLock<Vec<Report>>,
}

impl ReportStore {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of reports.
    pub fn len(&self) -> usize {
        self.reports.read().len()
    }

    /// Returns true if the table is empty.
    pub fn is_empty(&self) -> bool {
        self.reports.read().is_empty()
    }

    /// Returns every report matching `filter`, newest first.
    pub fn list(&self, filter: impl Fn(&Report) -> bool) -> Vec<Report> {
        self.reports
            .read()
            .iter()
            .filter(|r| filter(r))
            .cloned()
            .collect()
    }

    /// Returns one report.
    pub fn get(&self, id: &RemoteId) -> Option<Report> {
        self.reports.read().iter().find(|r| &r.id == id).cloned()
    }

    /// Inserts a report under a fresh id.
    pub fn create(&self, fields: NewReport) -> Report {
        let report = Report {
            id: RemoteId::new(Uuid::new_v4().to_string()),
            report_type: fields.report_type,
            title: fields.title,
            location: fields.location,
            description: fields.description,
            author: fields.author,
            status: ReportStatus::Reported,
            created_at: now_millis(),
        };
        self.reports.write().insert(0, report.clone());
        report
    }

    /// Sets the status of a report.
    pub fn update_status(&self, id: &RemoteId, status: ReportStatus) -> ServerResult<Report> {
        let mut reports = self.reports.write();
        let report = reports
            .iter_mut()
            .find(|r| &r.id == id)
            .ok_or_else(|| ServerError::NotFound(id.to_string()))?;
        report.status = status;
        Ok(report.clone())
    }

    /// Deletes a report.
    pub fn delete(&self, id: &RemoteId) -> ServerResult<Report> {
        let mut reports = self.reports.write();
        let pos = reports
            .iter()
            .position(|r| &r.id == id)
            .ok_or_else(|| ServerError::NotFound(id.to_string()))?;
        Ok(reports.remove(pos))
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
