//! Viewers and visibility.

use beacon_sync_protocol::Report;

/// What a viewer is allowed to see.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewerRole {
    /// Sees only reports it authored.
    Restricted,
    /// Sees every report and may change any status.
    Elevated,
}

/// A signed-in user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Viewer {
    /// User name, matched against [`Report::author`].
    pub name: String,
    /// Role.
    pub role: ViewerRole,
}

impl Viewer {
    /// Creates a restricted viewer.
    pub fn restricted(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            role: ViewerRole::Restricted,
        }
    }

    /// Creates an elevated viewer.
    pub fn elevated(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            role: ViewerRole::Elevated,
        }
    }

    /// Returns true if this viewer may see `report`.
    pub fn can_see(&self, report: &Report) -> bool {
        self.role == ViewerRole::Elevated || report.author == self.name
    }

    /// Returns true if this viewer may change `report`.
    pub fn can_modify(&self, report: &Report) -> bool {
        self.can_see(report)
    }
}
