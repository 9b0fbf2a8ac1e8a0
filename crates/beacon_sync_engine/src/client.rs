//! Sync client: wires the retry client, merger, dispatcher and push
//! consumer around one durable queue.

use crate::channel::{ChannelConsumer, ConsumerHandle, PushChannel};
use crate::config::SyncConfig;
use crate::connectivity::{ConnectivitySignal, ConnectivityState};
use crate::dispatcher::{
    Delivery, Dispatcher, DispatcherHandle, DrainReport, SyncNotice, SyncTrigger,
};
use crate::error::SyncResult;
use crate::http::{HttpTransport, ReqwestClient};
use crate::merger::{MergedReport, Merger, SubmitOutcome, UserAction};
use crate::retry::{RetryClient, RetryStats};
use crate::transport::RemoteApi;
use beacon_queue::QueueStore;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

type Api<A> = Arc<RetryClient<A>>;

/// The assembled sync engine.
///
/// Foreground calls (`submit`, `view`, `refresh`) go through the merger.
/// Background work runs once [`SyncClient::start`] is called. Delivery
/// notices from the dispatcher are folded into the view on every
/// [`SyncClient::view`] and after every manual [`SyncClient::drain`].
///
/// Without a push channel nothing confirms a delivered create, so the
/// client re-fetches the snapshot after deliveries instead. A snapshot
/// marked stale is re-fetched the same way.
pub struct SyncClient<A: RemoteApi + 'static> {
    config: SyncConfig,
    queue: Arc<QueueStore>,
    connectivity: ConnectivityState,
    trigger: SyncTrigger,
    api: Api<A>,
    merger: Arc<Merger<Api<A>>>,
    dispatcher: Arc<Dispatcher<Api<A>>>,
    notices: Mutex<broadcast::Receiver<SyncNotice>>,
    push_attached: AtomicBool,
}

impl SyncClient<HttpTransport<ReqwestClient>> {
    /// Creates a client talking to `config.base_url` over HTTP.
    pub fn connect(
        config: SyncConfig,
        queue: Arc<QueueStore>,
        connectivity: ConnectivityState,
    ) -> Self {
        let transport = HttpTransport::new(
            ReqwestClient::new(config.base_url.clone()),
            config.request_timeout,
        );
        Self::new(config, transport, queue, connectivity)
    }
}

impl<A: RemoteApi + 'static> SyncClient<A> {
    /// Creates a client over any transport.
    pub fn new(
        config: SyncConfig,
        transport: A,
        queue: Arc<QueueStore>,
        connectivity: ConnectivityState,
    ) -> Self {
        let trigger = SyncTrigger::new();
        let api = Arc::new(RetryClient::new(
            transport,
            config.retry.clone(),
            connectivity.clone(),
        ));
        let merger = Arc::new(
            Merger::new(api.clone(), queue.clone(), connectivity.clone(), trigger.clone())
                .with_coalesce_updates(config.coalesce_updates),
        );
        let dispatcher = Arc::new(
            Dispatcher::new(
                queue.clone(),
                api.clone(),
                connectivity.clone(),
                config.drain_policy,
            )
            .with_notice_capacity(config.notice_capacity),
        );
        let notices = Mutex::new(dispatcher.subscribe());

        Self {
            config,
            queue,
            connectivity,
            trigger,
            api,
            merger,
            dispatcher,
            notices,
            push_attached: AtomicBool::new(false),
        }
    }

    /// Gets the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Returns the durable queue.
    pub fn queue(&self) -> &Arc<QueueStore> {
        &self.queue
    }

    /// Returns the connectivity state.
    pub fn connectivity(&self) -> &ConnectivityState {
        &self.connectivity
    }

    /// Returns the merger.
    pub fn merger(&self) -> &Arc<Merger<Api<A>>> {
        &self.merger
    }

    /// Returns the dispatcher.
    pub fn dispatcher(&self) -> &Arc<Dispatcher<Api<A>>> {
        &self.dispatcher
    }

    /// Returns the retrying transport.
    pub fn api(&self) -> &Api<A> {
        &self.api
    }

    /// Returns the retry counters.
    pub fn retry_stats(&self) -> RetryStats {
        self.api.stats()
    }

    /// Applies an online/offline transition reported by the environment.
    pub fn set_connectivity(&self, signal: ConnectivitySignal) -> bool {
        self.connectivity.apply(signal)
    }

    /// Submits a user action. See [`Merger::submit`].
    ///
    /// # Errors
    ///
    /// Terminal server errors and queue failures.
    pub async fn submit(&self, action: UserAction) -> SyncResult<SubmitOutcome> {
        let outcome = self.merger.submit(action).await?;
        if matches!(outcome, SubmitOutcome::Sent(_)) {
            self.reconcile_quietly().await;
        }
        Ok(outcome)
    }

    /// Re-fetches the confirmed snapshot.
    ///
    /// # Errors
    ///
    /// Returns the transport error.
    pub async fn refresh(&self) -> SyncResult<usize> {
        self.merger.refresh().await
    }

    /// Returns the merged view.
    pub fn view(&self) -> Vec<MergedReport> {
        self.pump_notices();
        self.merger.view()
    }

    /// Runs one drain pass now.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue cannot be updated.
    pub async fn drain(&self) -> SyncResult<DrainReport> {
        let report = self.dispatcher.drain().await?;
        self.reconcile_quietly().await;
        Ok(report)
    }

    /// Re-fetches the snapshot if it is stale, or if a create was delivered
    /// and no push channel is attached to confirm it. Returns whether a
    /// re-fetch happened.
    ///
    /// # Errors
    ///
    /// Returns the transport error of the re-fetch.
    pub async fn reconcile(&self) -> SyncResult<bool> {
        self.pump_notices();
        let unconfirmed =
            !self.push_attached.load(Ordering::SeqCst) && self.merger.has_unconfirmed();
        if !self.merger.is_stale() && !unconfirmed {
            return Ok(false);
        }
        self.merger.refresh().await?;
        Ok(true)
    }

    async fn reconcile_quietly(&self) {
        if let Err(e) = self.reconcile().await {
            debug!(error = %e, "re-fetch after delivery failed, view left as is");
        }
    }

    /// Asks the background dispatcher for a pass.
    pub fn request_sync(&self) {
        self.trigger.request();
    }

    /// Subscribes to dispatcher notices, e.g. to tell the user about
    /// rejected actions.
    pub fn notices(&self) -> broadcast::Receiver<SyncNotice> {
        self.dispatcher.subscribe()
    }

    fn pump_notices(&self) {
        let mut rx = self.notices.lock();
        loop {
            match rx.try_recv() {
                Ok(notice) => self.merger.apply_notice(&notice),
                Err(TryRecvError::Lagged(missed)) => {
                    warn!(missed, "dropped dispatcher notices, view marked stale");
                    self.merger.mark_stale();
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => break,
            }
        }
    }

    /// Starts the dispatcher loop.
    ///
    /// With no push channel, a create delivered in the background is
    /// confirmed by re-fetching the snapshot.
    pub fn start(&self) -> SyncRuntime {
        SyncRuntime {
            dispatcher: self.dispatcher.clone().spawn(self.trigger.clone()),
            consumer: None,
            reconciler: self.spawn_reconciler(true),
        }
    }

    /// Starts the dispatcher loop and a consumer for `channel`.
    pub fn start_with_channel<P: PushChannel + 'static>(&self, channel: P) -> SyncRuntime {
        self.push_attached.store(true, Ordering::SeqCst);
        let consumer = Arc::new(ChannelConsumer::new(
            self.merger.clone(),
            channel,
            self.config.resubscribe_delay,
        ));
        SyncRuntime {
            dispatcher: self.dispatcher.clone().spawn(self.trigger.clone()),
            consumer: Some(consumer.spawn()),
            reconciler: self.spawn_reconciler(false),
        }
    }

    fn spawn_reconciler(&self, after_creates: bool) -> Reconciler {
        let merger = self.merger.clone();
        let mut notices = self.dispatcher.subscribe();
        let (shutdown, mut stop) = watch::channel(false);
        let task = tokio::spawn(async move {
            loop {
                let wanted = tokio::select! {
                    changed = stop.changed() => {
                        if changed.is_err() || *stop.borrow() {
                            break;
                        }
                        false
                    }
                    notice = notices.recv() => match notice {
                        Ok(SyncNotice::Delivered {
                            delivery: Delivery::Created { .. },
                            ..
                        }) => after_creates,
                        Ok(_) => false,
                        Err(RecvError::Lagged(missed)) => {
                            warn!(missed, "dropped dispatcher notices, re-fetching");
                            merger.mark_stale();
                            true
                        }
                        Err(RecvError::Closed) => break,
                    },
                };
                if wanted || merger.is_stale() {
                    if let Err(e) = merger.refresh().await {
                        debug!(error = %e, "background re-fetch failed");
                    }
                }
            }
        });
        Reconciler { shutdown, task }
    }
}

#[derive(Debug)]
struct Reconciler {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Background tasks started by [`SyncClient::start`] or
/// [`SyncClient::start_with_channel`].
#[derive(Debug)]
pub struct SyncRuntime {
    dispatcher: DispatcherHandle,
    consumer: Option<ConsumerHandle>,
    reconciler: Reconciler,
}

impl SyncRuntime {
    /// Stops every task and waits for them.
    pub async fn shutdown(self) {
        if let Some(consumer) = self.consumer {
            consumer.shutdown().await;
        }
        self.dispatcher.shutdown().await;
        let _ = self.reconciler.shutdown.send(true);
        if let Err(e) = self.reconciler.task.await {
            warn!(error = %e, "reconciler task ended abnormally");
        }
    }
}
