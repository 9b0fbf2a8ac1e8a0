//! Incident report types.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Server-assigned identifier of a report.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemoteId(String);

impl RemoteId {
    /// Wraps a raw identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RemoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RemoteId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Lifecycle status of a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    /// Submitted, not yet seen by a responder.
    #[default]
    Reported,
    /// Seen by a responder.
    Acknowledged,
    /// Responders are on it.
    InProgress,
    /// Closed.
    Resolved,
}

impl ReportStatus {
    /// Returns the wire name of the status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Reported => "reported",
            Self::Acknowledged => "acknowledged",
            Self::InProgress => "in_progress",
            Self::Resolved => "resolved",
        }
    }
}

impl fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReportStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "reported" => Ok(Self::Reported),
            "acknowledged" => Ok(Self::Acknowledged),
            "in_progress" | "inprogress" => Ok(Self::InProgress),
            "resolved" => Ok(Self::Resolved),
            other => Err(format!("unknown report status: {other}")),
        }
    }
}

/// A report as stored by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    /// Server-assigned identifier.
    pub id: RemoteId,
    /// Incident type, e.g. `"Fire"`.
    #[serde(rename = "type")]
    pub report_type: String,
    /// Short headline.
    pub title: String,
    /// Free-form location, often `"lat, lon"`.
    pub location: String,
    /// Free-text description.
    #[serde(default)]
    pub description: String,
    /// Submitting user.
    pub author: String,
    /// Current status.
    #[serde(default)]
    pub status: ReportStatus,
    /// Creation time, unix milliseconds.
    #[serde(default)]
    pub created_at: u64,
}

impl Report {
    /// Returns the heuristic identity of this report.
    #[must_use]
    pub fn identity(&self) -> IdentityKey {
        IdentityKey::new(&self.report_type, &self.title, &self.location, &self.author)
    }

    /// Returns the user-entered fields of this report.
    #[must_use]
    pub fn fields(&self) -> NewReport {
        NewReport {
            report_type: self.report_type.clone(),
            title: self.title.clone(),
            location: self.location.clone(),
            description: self.description.clone(),
            author: self.author.clone(),
        }
    }
}

/// Body of a create request: everything the user types in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewReport {
    /// Incident type.
    #[serde(rename = "type")]
    pub report_type: String,
    /// Short headline.
    pub title: String,
    /// Free-form location.
    pub location: String,
    /// Free-text description.
    #[serde(default)]
    pub description: String,
    /// Submitting user.
    pub author: String,
}

impl NewReport {
    /// Creates a report body with an empty description.
    pub fn new(
        report_type: impl Into<String>,
        title: impl Into<String>,
        location: impl Into<String>,
        author: impl Into<String>,
    ) -> Self {
        Self {
            report_type: report_type.into(),
            title: title.into(),
            location: location.into(),
            description: String::new(),
            author: author.into(),
        }
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Returns the heuristic identity of this body.
    #[must_use]
    pub fn identity(&self) -> IdentityKey {
        IdentityKey::new(&self.report_type, &self.title, &self.location, &self.author)
    }
}

/// Body of a status update request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusUpdate {
    /// New status.
    pub status: ReportStatus,
}

/// Best-effort identity used to pair a locally-created report, which has no
/// remote id yet, with the server's copy of it.
///
/// Built from type, title, location and author, each trimmed, lower-cased
/// and with inner whitespace collapsed. Two distinct reports that agree on
/// all four fields are indistinguishable to this key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdentityKey {
    parts: [String; 4],
}

fn normalize(field: &str) -> String {
    field
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

impl IdentityKey {
    /// Builds a key from the identifying fields.
    #[must_use]
    pub fn new(report_type: &str, title: &str, location: &str, author: &str) -> Self {
        Self {
            parts: [
                normalize(report_type),
                normalize(title),
                normalize(location),
                normalize(author),
            ],
        }
    }
}
