//! Error types for the report server.

use beacon_sync_protocol::ApiResponse;
use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur in the report server.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Invalid request format or failed validation.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// No session, or the session expired.
    #[error("authentication required: {0}")]
    Unauthenticated(String),

    /// The session lacks rights for this operation.
    #[error("not authorized: {0}")]
    NotAuthorized(String),

    /// The target report does not exist.
    #[error("report not found: {0}")]
    NotFound(String),

    /// The route does not exist.
    #[error("no route for {0}")]
    NoRoute(String),

    /// The backing database is not ready.
    #[error("service unavailable: {0}")]
    Unavailable(String),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServerError {
    /// Returns the HTTP status for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            ServerError::InvalidRequest(_) => 422,
            ServerError::Unauthenticated(_) => 401,
            ServerError::NotAuthorized(_) => 403,
            ServerError::NotFound(_) | ServerError::NoRoute(_) => 404,
            ServerError::Unavailable(_) => 503,
            ServerError::Internal(_) => 500,
        }
    }

    /// Returns true if this is a client error (4xx).
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status_code())
    }

    /// Returns true if this is a server error (5xx).
    pub fn is_server_error(&self) -> bool {
        self.status_code() >= 500
    }

    /// Renders the error as a JSON response.
    pub fn into_response(self) -> ApiResponse {
        let body = serde_json::json!({ "error": self.to_string() });
        ApiResponse::new(self.status_code(), body.to_string().into_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_classification() {
        assert!(ServerError::InvalidRequest("bad".into()).is_client_error());
        assert!(ServerError::Unavailable("warming up".into()).is_server_error());
        assert!(!ServerError::NotFound("r-1".into()).is_server_error());
        assert_eq!(ServerError::NotAuthorized("x".into()).status_code(), 403);
    }

    #[test]
    fn error_response_carries_message() {
        let response = ServerError::NotFound("r-42".into()).into_response();
        assert_eq!(response.status, 404);
        assert!(response.text().contains("r-42"));
    }
}
