//! HTTP transport.
//!
//! [`HttpTransport`] maps the remote API onto REST calls and classifies
//! responses. The client doing the actual I/O sits behind [`HttpClient`]:
//! [`ReqwestClient`] for real servers, [`LoopbackClient`] for an in-process
//! server.

use crate::error::{SyncError, SyncResult};
use crate::transport::RemoteApi;
use async_trait::async_trait;
use beacon_sync_protocol::{
    ApiRequest, ApiResponse, Endpoint, Method, NewReport, ProtocolError, RemoteId, Report,
    ReportStatus, StatusClass, StatusUpdate,
};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::debug;

/// Sends one request and returns whatever the server answered.
///
/// `Err` means no response was received at all.
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Sends the request.
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, String>;
}

/// REST transport over an [`HttpClient`].
pub struct HttpTransport<C: HttpClient> {
    client: C,
    timeout: Duration,
    last_error: RwLock<Option<String>>,
}

impl<C: HttpClient> HttpTransport<C> {
    /// Creates a transport with a per-request timeout.
    pub fn new(client: C, timeout: Duration) -> Self {
        Self {
            client,
            timeout,
            last_error: RwLock::new(None),
        }
    }

    /// Returns the underlying client.
    pub fn client(&self) -> &C {
        &self.client
    }

    /// Returns the message of the last failed call, if the most recent
    /// call failed.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    async fn call(&self, endpoint: &Endpoint, request: ApiRequest) -> SyncResult<ApiResponse> {
        debug!(method = %request.method, path = %request.path, "sending request");
        let result = match tokio::time::timeout(self.timeout, self.client.send(request)).await {
            Err(_) => Err(SyncError::Timeout),
            Ok(Err(message)) => Err(SyncError::connectivity(message)),
            Ok(Ok(response)) => classify(endpoint, response),
        };
        *self.last_error.write() = result.as_ref().err().map(ToString::to_string);
        result
    }
}

fn classify(endpoint: &Endpoint, response: ApiResponse) -> SyncResult<ApiResponse> {
    let status = response.status;
    match response.class() {
        StatusClass::Success => Ok(response),
        StatusClass::NotFound
            if matches!(endpoint, Endpoint::UpdateStatus(_) | Endpoint::Delete(_)) =>
        {
            Err(SyncError::NotFound {
                message: response.text(),
            })
        }
        StatusClass::Unauthorized => Err(SyncError::Unauthorized {
            status,
            message: response.text(),
        }),
        StatusClass::Unavailable => Err(SyncError::connectivity(format!(
            "status {status}: {}",
            response.text()
        ))),
        StatusClass::NotFound | StatusClass::Rejected | StatusClass::Unexpected => {
            Err(SyncError::application(status, response.text()))
        }
    }
}

fn bad_body(err: ProtocolError) -> SyncError {
    SyncError::Protocol(format!("invalid response body: {err}"))
}

#[async_trait]
impl<C: HttpClient> RemoteApi for HttpTransport<C> {
    async fn list(&self) -> SyncResult<Vec<Report>> {
        let endpoint = Endpoint::List;
        let response = self.call(&endpoint, ApiRequest::empty(&endpoint)).await?;
        response.parse().map_err(bad_body)
    }

    async fn create(&self, report: &NewReport, public: bool) -> SyncResult<Report> {
        let endpoint = if public {
            Endpoint::CreatePublic
        } else {
            Endpoint::Create
        };
        let request = ApiRequest::json(&endpoint, report)?;
        let response = self.call(&endpoint, request).await?;
        response.parse().map_err(bad_body)
    }

    async fn update_status(&self, id: &RemoteId, status: ReportStatus) -> SyncResult<Report> {
        let endpoint = Endpoint::UpdateStatus(id.clone());
        let request = ApiRequest::json(&endpoint, &StatusUpdate { status })?;
        let response = self.call(&endpoint, request).await?;
        response.parse().map_err(bad_body)
    }

    async fn delete(&self, id: &RemoteId) -> SyncResult<()> {
        let endpoint = Endpoint::Delete(id.clone());
        self.call(&endpoint, ApiRequest::empty(&endpoint)).await?;
        Ok(())
    }
}

/// [`HttpClient`] backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct ReqwestClient {
    base_url: String,
    client: reqwest::Client,
    bearer: Option<String>,
}

impl ReqwestClient {
    /// Creates a client for the server at `base_url`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
            bearer: None,
        }
    }

    /// Sends `token` as a bearer credential on every request.
    #[must_use]
    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer = Some(token.into());
        self
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl HttpClient for ReqwestClient {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, String> {
        let url = format!("{}{}", self.base_url, request.path);
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Patch => reqwest::Method::PATCH,
            Method::Delete => reqwest::Method::DELETE,
        };
        let mut builder = self.client.request(method, url);
        if let Some(token) = &self.bearer {
            builder = builder.bearer_auth(token);
        }
        if !request.body.is_empty() {
            builder = builder
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(request.body);
        }

        let response = builder.send().await.map_err(|e| e.to_string())?;
        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(|e| e.to_string())?;
        Ok(ApiResponse::new(status, body.to_vec()))
    }
}

/// A server that answers requests in-process.
pub trait LoopbackServer: Send + Sync {
    /// Handles one request.
    fn handle(&self, request: &ApiRequest) -> ApiResponse;
}

/// An [`HttpClient`] routing requests straight into a [`LoopbackServer`].
///
/// Can be switched unreachable to simulate a dead network.
pub struct LoopbackClient<S: LoopbackServer> {
    server: S,
    reachable: AtomicBool,
}

impl<S: LoopbackServer> LoopbackClient<S> {
    /// Creates a client connected to `server`.
    pub fn new(server: S) -> Self {
        Self {
            server,
            reachable: AtomicBool::new(true),
        }
    }

    /// Makes every request fail without a response, or restores delivery.
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Returns the server.
    pub fn server(&self) -> &S {
        &self.server
    }
}

#[async_trait]
impl<S: LoopbackServer> HttpClient for LoopbackClient<S> {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, String> {
        if !self.reachable.load(Ordering::SeqCst) {
            return Err("connection refused".to_string());
        }
        Ok(self.server.handle(&request))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_sync_protocol::RemoteId;

    struct Canned(u16, &'static str);

    impl LoopbackServer for Canned {
        fn handle(&self, _request: &ApiRequest) -> ApiResponse {
            ApiResponse::new(self.0, self.1.as_bytes().to_vec())
        }
    }

    fn transport(status: u16, body: &'static str) -> HttpTransport<LoopbackClient<Canned>> {
        HttpTransport::new(LoopbackClient::new(Canned(status, body)), Duration::from_secs(1))
    }

    #[tokio::test]
    async fn not_found_is_already_gone_for_update_and_delete() {
        let t = transport(404, "gone");
        let id = RemoteId::new("r-1");
        assert!(t.delete(&id).await.unwrap_err().is_not_found());
        assert!(t
            .update_status(&id, ReportStatus::Resolved)
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn not_found_on_create_is_terminal() {
        let t = transport(404, "no route");
        let err = t
            .create(&NewReport::new("Fire", "t", "l", "a"), false)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Application { status: 404, .. }));
    }

    #[tokio::test]
    async fn warming_up_is_connectivity() {
        let t = transport(503, "database warming up");
        let err = t.list().await.unwrap_err();
        assert!(err.is_retryable());
        assert!(t.last_error().unwrap().contains("warming up"));
    }

    #[tokio::test]
    async fn forbidden_is_terminal() {
        let t = transport(403, "session expired");
        let err = t.delete(&RemoteId::new("r-1")).await.unwrap_err();
        assert!(matches!(err, SyncError::Unauthorized { status: 403, .. }));
        assert!(err.is_terminal());
    }

    #[tokio::test]
    async fn validation_failure_is_terminal() {
        let t = transport(422, "title required");
        let err = t
            .create(&NewReport::new("Fire", "", "l", "a"), false)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Application { status: 422, .. }));
    }

    #[tokio::test]
    async fn unreachable_is_connectivity() {
        let t = transport(200, "[]");
        t.client().set_reachable(false);
        assert!(t.list().await.unwrap_err().is_retryable());
        t.client().set_reachable(true);
        assert!(t.list().await.unwrap().is_empty());
        assert!(t.last_error().is_none());
    }

    #[tokio::test]
    async fn malformed_success_body_is_protocol_error() {
        let t = transport(200, "{not json");
        assert!(matches!(t.list().await, Err(SyncError::Protocol(_))));
    }
}
