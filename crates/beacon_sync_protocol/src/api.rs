//! Remote API envelopes.
//!
//! The remote store exposes a small REST surface:
//!
//! ```text
//! GET    /reports              list (full re-fetch)
//! POST   /reports              create
//! POST   /reports/public       create without a session (emergency bypass)
//! PATCH  /reports/{id}/status  status update
//! DELETE /reports/{id}         delete
//! ```
//!
//! Bodies are JSON.

use crate::error::ProtocolResult;
use crate::report::RemoteId;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;

/// Path of the report collection.
pub const REPORTS_PATH: &str = "/reports";

/// HTTP method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// GET
    Get,
    /// POST
    Post,
    /// PATCH
    Patch,
    /// DELETE
    Delete,
}

impl Method {
    /// Returns the method name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A remote API endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// List every report visible to the caller.
    List,
    /// Create a report.
    Create,
    /// Create a report without a session.
    CreatePublic,
    /// Update the status of a report.
    UpdateStatus(RemoteId),
    /// Delete a report.
    Delete(RemoteId),
}

impl Endpoint {
    /// Returns the HTTP method of the endpoint.
    #[must_use]
    pub const fn method(&self) -> Method {
        match self {
            Self::List => Method::Get,
            Self::Create | Self::CreatePublic => Method::Post,
            Self::UpdateStatus(_) => Method::Patch,
            Self::Delete(_) => Method::Delete,
        }
    }

    /// Returns the request path of the endpoint.
    #[must_use]
    pub fn path(&self) -> String {
        match self {
            Self::List | Self::Create => REPORTS_PATH.to_string(),
            Self::CreatePublic => format!("{REPORTS_PATH}/public"),
            Self::UpdateStatus(id) => format!("{REPORTS_PATH}/{id}/status"),
            Self::Delete(id) => format!("{REPORTS_PATH}/{id}"),
        }
    }

    /// Parses a method and path back into an endpoint.
    ///
    /// Returns `None` for anything outside the report API.
    #[must_use]
    pub fn parse(method: Method, path: &str) -> Option<Self> {
        let rest = path.strip_prefix(REPORTS_PATH)?;
        let segments: Vec<&str> = rest.split('/').filter(|s| !s.is_empty()).collect();
        match (method, segments.as_slice()) {
            (Method::Get, []) => Some(Self::List),
            (Method::Post, []) => Some(Self::Create),
            (Method::Post, ["public"]) => Some(Self::CreatePublic),
            (Method::Patch, [id, "status"]) => Some(Self::UpdateStatus(RemoteId::new(*id))),
            (Method::Delete, [id]) => Some(Self::Delete(RemoteId::new(*id))),
            _ => None,
        }
    }
}

/// An outbound request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiRequest {
    /// Method.
    pub method: Method,
    /// Path relative to the server base URL.
    pub path: String,
    /// JSON body, empty for GET and DELETE.
    pub body: Vec<u8>,
}

impl ApiRequest {
    /// Builds a request for an endpoint without a body.
    #[must_use]
    pub fn empty(endpoint: &Endpoint) -> Self {
        Self {
            method: endpoint.method(),
            path: endpoint.path(),
            body: Vec::new(),
        }
    }

    /// Builds a request for an endpoint with a JSON body.
    ///
    /// # Errors
    ///
    /// Returns an error if `body` cannot be serialized.
    pub fn json<T: Serialize>(endpoint: &Endpoint, body: &T) -> ProtocolResult<Self> {
        Ok(Self {
            method: endpoint.method(),
            path: endpoint.path(),
            body: serde_json::to_vec(body)?,
        })
    }

    /// Resolves the endpoint this request targets.
    #[must_use]
    pub fn endpoint(&self) -> Option<Endpoint> {
        Endpoint::parse(self.method, &self.path)
    }
}

/// Coarse classification of a response status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    /// 2xx.
    Success,
    /// 404: the target does not exist.
    NotFound,
    /// 401 or 403: the session is missing, expired or lacks rights.
    Unauthorized,
    /// 408, 429 or 5xx: the authority is temporarily unavailable.
    Unavailable,
    /// Any other 4xx: the request itself was rejected.
    Rejected,
    /// Anything else (1xx, 3xx).
    Unexpected,
}

impl StatusClass {
    /// Classifies a status code.
    #[must_use]
    pub const fn of(status: u16) -> Self {
        match status {
            200..=299 => Self::Success,
            404 => Self::NotFound,
            401 | 403 => Self::Unauthorized,
            408 | 429 | 500..=599 => Self::Unavailable,
            400..=499 => Self::Rejected,
            _ => Self::Unexpected,
        }
    }
}

/// A response from the remote API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    /// Status code.
    pub status: u16,
    /// Response body.
    pub body: Vec<u8>,
}

impl ApiResponse {
    /// Creates a response.
    #[must_use]
    pub fn new(status: u16, body: Vec<u8>) -> Self {
        Self { status, body }
    }

    /// Creates a JSON response.
    ///
    /// # Errors
    ///
    /// Returns an error if `body` cannot be serialized.
    pub fn json<T: Serialize>(status: u16, body: &T) -> ProtocolResult<Self> {
        Ok(Self::new(status, serde_json::to_vec(body)?))
    }

    /// Returns the status classification.
    #[must_use]
    pub const fn class(&self) -> StatusClass {
        StatusClass::of(self.status)
    }

    /// Parses the body as JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the body is not valid JSON for `T`.
    pub fn parse<T: DeserializeOwned>(&self) -> ProtocolResult<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// Returns the body as lossy UTF-8, for error messages.
    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}
