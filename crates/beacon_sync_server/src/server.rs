//! The report server.

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::hub::ChangeHub;
use crate::store::ReportStore;
use crate::viewer::{Viewer, ViewerRole};
use beacon_sync_protocol::{
    ApiRequest, ApiResponse, ChangeEvent, ChannelMessage, Endpoint, NewReport, RemoteId, Report,
    StatusUpdate,
};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Reference report server.
///
/// Serves the report REST surface from memory and fans changes out to push
/// subscribers. It has no listener of its own; requests arrive through
/// [`ReportServer::handle`], which a loopback transport or an HTTP adapter
/// calls.
///
/// # Example
///
/// ```
/// use beacon_sync_server::{ReportServer, ServerConfig};
/// use beacon_sync_protocol::{ApiRequest, Endpoint};
///
/// let server = ReportServer::new(ServerConfig::default());
/// let response = server.handle(&ApiRequest::empty(&Endpoint::List));
/// assert_eq!(response.status, 200);
/// ```
pub struct ReportServer {
    config: ServerConfig,
    store: ReportStore,
    hub: ChangeHub,
    session: RwLock<Option<Viewer>>,
    warmup_left: AtomicU32,
}

impl ReportServer {
    /// Creates a server.
    pub fn new(config: ServerConfig) -> Self {
        let hub = ChangeHub::new(config.channel_capacity);
        let warmup_left = AtomicU32::new(config.warmup_requests);
        Self {
            config,
            store: ReportStore::new(),
            hub,
            session: RwLock::new(None),
            warmup_left,
        }
    }

    /// Gets the configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Signs `viewer` in. Requests run as this viewer from now on.
    pub fn sign_in(&self, viewer: Viewer) {
        info!(viewer = %viewer.name, "session started");
        *self.session.write() = Some(viewer);
    }

    /// Ends the current session.
    pub fn expire_session(&self) {
        info!("session expired");
        *self.session.write() = None;
    }

    /// Answers the next `count` requests with 503.
    pub fn warm_up(&self, count: u32) {
        self.warmup_left.store(count, Ordering::SeqCst);
    }

    /// Handles one request.
    pub fn handle(&self, request: &ApiRequest) -> ApiResponse {
        let result = self.route(request);
        match result {
            Ok(response) => response,
            Err(e) => {
                debug!(method = %request.method, path = %request.path, status = e.status_code(), error = %e, "request failed");
                e.into_response()
            }
        }
    }

    fn route(&self, request: &ApiRequest) -> ServerResult<ApiResponse> {
        if self
            .warmup_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(ServerError::Unavailable("database warming up".into()));
        }

        let endpoint = request.endpoint().ok_or_else(|| {
            ServerError::NoRoute(format!("{} {}", request.method, request.path))
        })?;

        match endpoint {
            Endpoint::List => {
                let reports = self.list()?;
                json(200, &reports)
            }
            Endpoint::Create => {
                let viewer = self.viewer()?;
                let fields: NewReport = parse(request)?;
                if let Some(viewer) = &viewer {
                    if viewer.role != ViewerRole::Elevated && viewer.name != fields.author {
                        return Err(ServerError::NotAuthorized(
                            "cannot file reports for another user".into(),
                        ));
                    }
                }
                json(201, &self.create(fields)?)
            }
            Endpoint::CreatePublic => {
                let fields: NewReport = parse(request)?;
                json(201, &self.create(fields)?)
            }
            Endpoint::UpdateStatus(id) => {
                let update: StatusUpdate = parse(request)?;
                let viewer = self.viewer()?;
                self.check_modify(viewer.as_ref(), &id)?;
                let report = self.store.update_status(&id, update.status)?;
                info!(id = %id, status = %update.status, "report status changed");
                self.hub
                    .publish(&report, ChangeEvent::Updated(report.clone()));
                json(200, &report)
            }
            Endpoint::Delete(id) => {
                let viewer = self.viewer()?;
                self.check_modify(viewer.as_ref(), &id)?;
                let report = self.store.delete(&id)?;
                info!(id = %id, "report deleted");
                self.hub.publish(&report, ChangeEvent::Deleted(id));
                Ok(ApiResponse::new(204, Vec::new()))
            }
        }
    }

    /// Returns the session viewer; `Err` if one is required and missing.
    fn viewer(&self) -> ServerResult<Option<Viewer>> {
        let viewer = self.session.read().clone();
        if viewer.is_none() && self.config.require_session {
            return Err(ServerError::Unauthenticated("no active session".into()));
        }
        Ok(viewer)
    }

    fn check_modify(&self, viewer: Option<&Viewer>, id: &RemoteId) -> ServerResult<()> {
        let Some(viewer) = viewer else {
            return Ok(());
        };
        match self.store.get(id) {
            Some(report) if !viewer.can_modify(&report) => Err(ServerError::NotAuthorized(
                format!("{} may not change report {id}", viewer.name),
            )),
            _ => Ok(()),
        }
    }

    fn list(&self) -> ServerResult<Vec<Report>> {
        let viewer = self.viewer()?;
        Ok(self
            .store
            .list(|r| viewer.as_ref().map_or(true, |v| v.can_see(r))))
    }

    fn create(&self, fields: NewReport) -> ServerResult<Report> {
        if fields.report_type.trim().is_empty() || fields.title.trim().is_empty() {
            return Err(ServerError::InvalidRequest("type and title are required".into()));
        }
        if fields.title.chars().count() > self.config.max_title_len {
            return Err(ServerError::InvalidRequest(format!(
                "title longer than {} characters",
                self.config.max_title_len
            )));
        }
        let report = self.store.create(fields);
        info!(id = %report.id, report_type = %report.report_type, "report created");
        self.hub
            .publish(&report, ChangeEvent::Created(report.clone()));
        Ok(report)
    }

    /// Opens a push subscription scoped to `viewer`.
    pub fn subscribe(&self, viewer: Viewer) -> mpsc::Receiver<ChannelMessage> {
        self.hub.subscribe(viewer)
    }

    /// Returns the change hub.
    pub fn hub(&self) -> &ChangeHub {
        &self.hub
    }

    /// Returns every stored report.
    pub fn reports(&self) -> Vec<Report> {
        self.store.list(|_| true)
    }

    /// Deletes a report as another client would, notifying subscribers.
    pub fn delete_out_of_band(&self, id: &RemoteId) -> ServerResult<()> {
        let report = self.store.delete(id)?;
        self.hub.publish(&report, ChangeEvent::Deleted(id.clone()));
        Ok(())
    }
}

fn parse<T: serde::de::DeserializeOwned>(request: &ApiRequest) -> ServerResult<T> {
    serde_json::from_slice(&request.body)
        .map_err(|e| ServerError::InvalidRequest(format!("malformed body: {e}")))
}

fn json<T: serde::Serialize>(status: u16, body: &T) -> ServerResult<ApiResponse> {
    ApiResponse::json(status, body).map_err(|e| ServerError::Internal(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_sync_protocol::ReportStatus;

    fn fire(author: &str) -> NewReport {
        NewReport::new("Fire", "Warehouse fire", "12.9, 77.6", author)
    }

    fn create(server: &ReportServer, fields: &NewReport) -> ApiResponse {
        server.handle(&ApiRequest::json(&Endpoint::Create, fields).unwrap())
    }

    #[test]
    fn create_list_update_delete() {
        let server = ReportServer::new(ServerConfig::default());
        let response = create(&server, &fire("asha"));
        assert_eq!(response.status, 201);
        let report: Report = response.parse().unwrap();

        let list: Vec<Report> = server
            .handle(&ApiRequest::empty(&Endpoint::List))
            .parse()
            .unwrap();
        assert_eq!(list, vec![report.clone()]);

        let endpoint = Endpoint::UpdateStatus(report.id.clone());
        let request = ApiRequest::json(
            &endpoint,
            &StatusUpdate {
                status: ReportStatus::Resolved,
            },
        )
        .unwrap();
        let updated: Report = server.handle(&request).parse().unwrap();
        assert_eq!(updated.status, ReportStatus::Resolved);

        let response = server.handle(&ApiRequest::empty(&Endpoint::Delete(report.id.clone())));
        assert_eq!(response.status, 204);
        let response = server.handle(&ApiRequest::empty(&Endpoint::Delete(report.id)));
        assert_eq!(response.status, 404);
    }

    #[test]
    fn warmup_answers_503() {
        let server = ReportServer::new(ServerConfig::new().with_warmup(2));
        let list = ApiRequest::empty(&Endpoint::List);
        assert_eq!(server.handle(&list).status, 503);
        assert_eq!(server.handle(&list).status, 503);
        assert_eq!(server.handle(&list).status, 200);
    }

    #[test]
    fn validation_failures_are_422() {
        let server = ReportServer::new(ServerConfig::new().with_max_title_len(5));
        assert_eq!(create(&server, &NewReport::new("Fire", "", "l", "a")).status, 422);
        assert_eq!(create(&server, &fire("a")).status, 422);

        let garbage = ApiRequest {
            body: b"{".to_vec(),
            ..ApiRequest::empty(&Endpoint::Create)
        };
        assert_eq!(server.handle(&garbage).status, 422);
    }

    #[test]
    fn sessions_gate_everything_but_public_create() {
        let server = ReportServer::new(ServerConfig::new().with_sessions());
        assert_eq!(create(&server, &fire("asha")).status, 401);

        let public = ApiRequest::json(&Endpoint::CreatePublic, &fire("asha")).unwrap();
        assert_eq!(server.handle(&public).status, 201);

        server.sign_in(Viewer::restricted("asha"));
        assert_eq!(create(&server, &fire("asha")).status, 201);
        assert_eq!(create(&server, &fire("ravi")).status, 403);

        server.expire_session();
        assert_eq!(server.handle(&ApiRequest::empty(&Endpoint::List)).status, 401);
    }

    #[test]
    fn restricted_viewers_see_their_own_reports() {
        let server = ReportServer::new(ServerConfig::default());
        create(&server, &fire("asha"));
        create(&server, &fire("ravi"));

        server.sign_in(Viewer::restricted("asha"));
        let list: Vec<Report> = server
            .handle(&ApiRequest::empty(&Endpoint::List))
            .parse()
            .unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].author, "asha");

        let other = server.reports().into_iter().find(|r| r.author == "ravi").unwrap();
        let response = server.handle(&ApiRequest::empty(&Endpoint::Delete(other.id)));
        assert_eq!(response.status, 403);
    }

    #[test]
    fn unknown_routes_are_404() {
        let server = ReportServer::new(ServerConfig::default());
        let request = ApiRequest {
            method: beacon_sync_protocol::Method::Get,
            path: "/sessions".into(),
            body: Vec::new(),
        };
        assert_eq!(server.handle(&request).status, 404);
    }

    #[tokio::test]
    async fn changes_reach_subscribers() {
        let server = ReportServer::new(ServerConfig::default());
        let mut rx = server.subscribe(Viewer::elevated("admin"));

        let report: Report = create(&server, &fire("asha")).parse().unwrap();
        server.delete_out_of_band(&report.id).unwrap();

        let first = rx.recv().await.unwrap();
        assert_eq!(first.seq, 1);
        assert_eq!(first.event, ChangeEvent::Created(report.clone()));
        let second = rx.recv().await.unwrap();
        assert_eq!(second.event, ChangeEvent::Deleted(report.id));
    }
}
