//! Retrying remote API client.

use crate::config::RetryConfig;
use crate::connectivity::ConnectivityState;
use crate::error::{SyncError, SyncResult};
use crate::transport::RemoteApi;
use async_trait::async_trait;
use beacon_sync_protocol::{NewReport, RemoteId, Report, ReportStatus};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

/// Counters kept by a [`RetryClient`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryStats {
    /// Operations started.
    pub operations: u64,
    /// Attempts made, first attempts included.
    pub attempts: u64,
    /// Attempts made after a retryable failure.
    pub retries: u64,
    /// Operations that used up the whole budget.
    pub exhausted: u64,
    /// Operations refused because the device was offline.
    pub refused_offline: u64,
}

#[derive(Debug, Default)]
struct Counters {
    operations: AtomicU64,
    attempts: AtomicU64,
    retries: AtomicU64,
    exhausted: AtomicU64,
    refused_offline: AtomicU64,
}

/// Wraps a [`RemoteApi`] with a bounded retry budget.
///
/// Before every attempt the connectivity state is consulted; when offline
/// the operation fails with [`SyncError::Offline`] without touching the
/// network. Only retryable failures (no response, 5xx, 408, 429, timeout)
/// are retried. Everything else returns immediately.
pub struct RetryClient<A: RemoteApi> {
    inner: A,
    config: RetryConfig,
    connectivity: ConnectivityState,
    counters: Counters,
}

impl<A: RemoteApi> RetryClient<A> {
    /// Creates a retrying client.
    pub fn new(inner: A, config: RetryConfig, connectivity: ConnectivityState) -> Self {
        Self {
            inner,
            config,
            connectivity,
            counters: Counters::default(),
        }
    }

    /// Returns the wrapped client.
    pub fn inner(&self) -> &A {
        &self.inner
    }

    /// Returns the retry policy.
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Returns a snapshot of the counters.
    pub fn stats(&self) -> RetryStats {
        let c = &self.counters;
        RetryStats {
            operations: c.operations.load(Ordering::Relaxed),
            attempts: c.attempts.load(Ordering::Relaxed),
            retries: c.retries.load(Ordering::Relaxed),
            exhausted: c.exhausted.load(Ordering::Relaxed),
            refused_offline: c.refused_offline.load(Ordering::Relaxed),
        }
    }

    /// Runs `op` under the retry policy.
    pub async fn execute<T, F, Fut>(&self, name: &'static str, mut op: F) -> SyncResult<T>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = SyncResult<T>> + Send,
        T: Send,
    {
        self.counters.operations.fetch_add(1, Ordering::Relaxed);
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            if !self.connectivity.is_online() {
                self.counters.refused_offline.fetch_add(1, Ordering::Relaxed);
                debug!(operation = name, attempt, "offline, not attempting");
                return Err(SyncError::Offline);
            }

            self.counters.attempts.fetch_add(1, Ordering::Relaxed);
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt + 1 < max_attempts => {
                    attempt += 1;
                    let delay = self.config.delay_for_attempt(attempt);
                    debug!(operation = name, attempt, ?delay, error = %e, "retrying");
                    self.counters.retries.fetch_add(1, Ordering::Relaxed);
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
                Err(e) => {
                    if e.is_retryable() {
                        self.counters.exhausted.fetch_add(1, Ordering::Relaxed);
                        warn!(operation = name, attempts = max_attempts, error = %e, "retry budget exhausted");
                    }
                    return Err(e);
                }
            }
        }
    }
}

#[async_trait]
impl<A: RemoteApi> RemoteApi for RetryClient<A> {
    async fn list(&self) -> SyncResult<Vec<Report>> {
        self.execute("list", || self.inner.list()).await
    }

    async fn create(&self, report: &NewReport, public: bool) -> SyncResult<Report> {
        self.execute("create", || self.inner.create(report, public))
            .await
    }

    async fn update_status(&self, id: &RemoteId, status: ReportStatus) -> SyncResult<Report> {
        self.execute("update_status", || self.inner.update_status(id, status))
            .await
    }

    async fn delete(&self, id: &RemoteId) -> SyncResult<()> {
        self.execute("delete", || self.inner.delete(id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackoffSchedule;
    use crate::connectivity::ConnectivitySignal;
    use crate::transport::{MockFailure, MockTransport};
    use std::time::Duration;

    fn client(attempts: u32) -> RetryClient<MockTransport> {
        RetryClient::new(
            MockTransport::new(),
            RetryConfig::immediate(attempts),
            ConnectivityState::online(),
        )
    }

    fn fire() -> NewReport {
        NewReport::new("Fire", "Warehouse fire", "12.9, 77.6", "asha")
    }

    #[tokio::test]
    async fn transient_failure_then_success() {
        let client = client(3);
        client.inner().fail_next_n(MockFailure::Unavailable, 2);

        let report = client.create(&fire(), false).await.unwrap();
        assert_eq!(report.title, "Warehouse fire");
        assert_eq!(client.inner().call_count(), 3);

        let stats = client.stats();
        assert_eq!(stats.attempts, 3);
        assert_eq!(stats.retries, 2);
        assert_eq!(stats.exhausted, 0);
    }

    #[tokio::test]
    async fn budget_is_bounded() {
        let client = client(3);
        client.inner().fail_always(MockFailure::NoResponse);

        let err = client.list().await.unwrap_err();
        assert!(err.is_connectivity());
        assert_eq!(client.inner().call_count(), 3);
        assert_eq!(client.stats().exhausted, 1);
    }

    #[tokio::test]
    async fn terminal_failure_is_not_retried() {
        let client = client(5);
        client.inner().fail_next(MockFailure::Rejected(422));

        let err = client.create(&fire(), false).await.unwrap_err();
        assert!(err.is_terminal());
        assert_eq!(client.inner().call_count(), 1);
        assert_eq!(client.stats().retries, 0);
    }

    #[tokio::test]
    async fn not_found_is_not_retried() {
        let client = client(5);
        let err = client.delete(&RemoteId::new("nope")).await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(client.inner().call_count(), 1);
    }

    #[tokio::test]
    async fn offline_makes_no_attempt() {
        let client = RetryClient::new(
            MockTransport::new(),
            RetryConfig::immediate(3),
            ConnectivityState::offline(),
        );
        let err = client.list().await.unwrap_err();
        assert!(matches!(err, SyncError::Offline));
        assert_eq!(client.inner().call_count(), 0);
        assert_eq!(client.stats().refused_offline, 1);
    }

    #[tokio::test]
    async fn going_offline_mid_budget_stops_retrying() {
        let connectivity = ConnectivityState::online();
        let client = RetryClient::new(
            MockTransport::new(),
            RetryConfig::immediate(5),
            connectivity.clone(),
        );

        let mut calls = 0;
        let result: SyncResult<()> = client
            .execute("probe", || {
                calls += 1;
                if calls == 2 {
                    connectivity.apply(ConnectivitySignal::WentOffline);
                }
                async { Err(SyncError::Timeout) }
            })
            .await;
        assert!(matches!(result, Err(SyncError::Offline)));
        assert_eq!(calls, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn exponential_backoff_sleeps_between_attempts() {
        let config = RetryConfig::exponential(3).with_schedule(BackoffSchedule::Exponential {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            multiplier: 2.0,
            jitter: false,
        });
        let client = RetryClient::new(MockTransport::new(), config, ConnectivityState::online());
        client.inner().fail_always(MockFailure::Unavailable);

        let start = tokio::time::Instant::now();
        assert!(client.list().await.is_err());
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(300));
        assert!(elapsed < Duration::from_millis(400));
    }
}
