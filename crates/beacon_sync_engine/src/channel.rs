//! Real-time channel consumer.
//!
//! Applies push events to the merger. Every (re)subscription is followed by
//! a full re-fetch, since events may have been missed while disconnected.
//! Inside one subscription a jump in the sequence number means events were
//! lost and also triggers a re-fetch.

use crate::error::SyncResult;
use crate::merger::{ApplyOutcome, Merger};
use crate::transport::RemoteApi;
use async_trait::async_trait;
use beacon_sync_protocol::ChannelMessage;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Source of push messages.
#[async_trait]
pub trait PushChannel: Send + Sync {
    /// Opens a subscription. The receiver closes when the connection drops.
    async fn subscribe(&self) -> SyncResult<mpsc::Receiver<ChannelMessage>>;
}

#[async_trait]
impl<T: PushChannel + ?Sized> PushChannel for Arc<T> {
    async fn subscribe(&self) -> SyncResult<mpsc::Receiver<ChannelMessage>> {
        (**self).subscribe().await
    }
}

/// Counters kept by a [`ChannelConsumer`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    /// Subscriptions opened.
    pub subscriptions: u64,
    /// Messages received.
    pub messages: u64,
    /// Reports inserted.
    pub inserted: u64,
    /// Creates for reports already present.
    pub duplicates: u64,
    /// Reports replaced.
    pub updated: u64,
    /// Reports removed.
    pub deleted: u64,
    /// Events for unknown reports.
    pub dropped: u64,
    /// Sequence gaps detected.
    pub gaps: u64,
    /// Successful re-fetches.
    pub refreshes: u64,
    /// Failed re-fetches.
    pub refresh_failures: u64,
}

/// Consumes a [`PushChannel`] into a [`Merger`].
pub struct ChannelConsumer<A: RemoteApi, P: PushChannel> {
    merger: Arc<Merger<A>>,
    channel: P,
    resubscribe_delay: Duration,
    last_seq: Mutex<Option<u64>>,
    stats: RwLock<ConsumerStats>,
}

impl<A: RemoteApi, P: PushChannel> ChannelConsumer<A, P> {
    /// Creates a consumer.
    pub fn new(merger: Arc<Merger<A>>, channel: P, resubscribe_delay: Duration) -> Self {
        Self {
            merger,
            channel,
            resubscribe_delay,
            last_seq: Mutex::new(None),
            stats: RwLock::new(ConsumerStats::default()),
        }
    }

    /// Gets the current stats.
    pub fn stats(&self) -> ConsumerStats {
        self.stats.read().clone()
    }

    /// Applies one message. A sequence gap marks the merger stale.
    pub fn handle_message(&self, message: &ChannelMessage) -> ApplyOutcome {
        {
            let mut last = self.last_seq.lock();
            if let Some(prev) = *last {
                if message.seq > prev + 1 {
                    warn!(expected = prev + 1, got = message.seq, "push sequence gap");
                    self.stats.write().gaps += 1;
                    self.merger.mark_stale();
                }
            }
            if last.map_or(true, |prev| message.seq > prev) {
                *last = Some(message.seq);
            }
        }

        let outcome = self.merger.apply_event(&message.event);
        debug!(event = message.event.name(), id = %message.event.remote_id(), ?outcome, "push event applied");

        let mut stats = self.stats.write();
        stats.messages += 1;
        match outcome {
            ApplyOutcome::Inserted => stats.inserted += 1,
            ApplyOutcome::Duplicate => stats.duplicates += 1,
            ApplyOutcome::Updated => stats.updated += 1,
            ApplyOutcome::Deleted => stats.deleted += 1,
            ApplyOutcome::Dropped => stats.dropped += 1,
        }
        outcome
    }

    async fn refresh(&self) {
        match self.merger.refresh().await {
            Ok(count) => {
                self.stats.write().refreshes += 1;
                debug!(count, "re-fetched after push gap");
            }
            Err(e) => {
                self.stats.write().refresh_failures += 1;
                self.merger.mark_stale();
                warn!(error = %e, "re-fetch failed");
            }
        }
    }

    /// Consumes one subscription until it closes or `stop` fires.
    ///
    /// Returns `true` if stopped.
    async fn consume(&self, mut rx: mpsc::Receiver<ChannelMessage>, stop: &mut watch::Receiver<bool>) -> bool {
        *self.last_seq.lock() = None;
        self.stats.write().subscriptions += 1;
        self.refresh().await;

        loop {
            tokio::select! {
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        return true;
                    }
                }
                message = rx.recv() => match message {
                    Some(message) => {
                        self.handle_message(&message);
                        if self.merger.is_stale() {
                            self.refresh().await;
                        }
                    }
                    None => return false,
                },
            }
        }
    }

    /// Runs until `stop` fires, re-subscribing whenever the channel closes.
    pub async fn run(&self, mut stop: watch::Receiver<bool>) {
        info!("push consumer started");
        loop {
            match self.channel.subscribe().await {
                Ok(rx) => {
                    if self.consume(rx, &mut stop).await {
                        break;
                    }
                    debug!("push channel closed");
                }
                Err(e) => warn!(error = %e, "push subscription failed"),
            }

            tokio::select! {
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break;
                    }
                }
                _ = tokio::time::sleep(self.resubscribe_delay) => {}
            }
        }
        info!("push consumer stopped");
    }
}

/// Handle to a spawned consumer.
#[derive(Debug)]
pub struct ConsumerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ConsumerHandle {
    /// Stops the consumer and waits for it.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            warn!(error = %e, "consumer task ended abnormally");
        }
    }
}

impl<A: RemoteApi + 'static, P: PushChannel + 'static> ChannelConsumer<A, P> {
    /// Spawns the consumer on the current runtime.
    pub fn spawn(self: Arc<Self>) -> ConsumerHandle {
        let (shutdown, stop) = watch::channel(false);
        let task = tokio::spawn(async move { self.run(stop).await });
        ConsumerHandle { shutdown, task }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectivity::ConnectivityState;
    use crate::dispatcher::SyncTrigger;
    use crate::error::SyncError;
    use crate::transport::MockTransport;
    use beacon_queue::QueueStore;
    use beacon_sync_protocol::{ChangeEvent, NewReport, RemoteId, Report, ReportStatus};
    use std::collections::VecDeque;

    struct ScriptedChannel {
        receivers: Mutex<VecDeque<mpsc::Receiver<ChannelMessage>>>,
    }

    #[async_trait]
    impl PushChannel for ScriptedChannel {
        async fn subscribe(&self) -> SyncResult<mpsc::Receiver<ChannelMessage>> {
            self.receivers.lock().pop_front().ok_or(SyncError::ChannelClosed)
        }
    }

    fn report(id: &str, title: &str) -> Report {
        Report {
            id: RemoteId::new(id),
            report_type: "Fire".into(),
            title: title.into(),
            location: "12.9, 77.6".into(),
            description: String::new(),
            author: "asha".into(),
            status: ReportStatus::Reported,
            created_at: 7,
        }
    }

    fn merger(mock: Arc<MockTransport>) -> Arc<Merger<Arc<MockTransport>>> {
        Arc::new(Merger::new(
            mock,
            Arc::new(QueueStore::open_in_memory().unwrap()),
            ConnectivityState::online(),
            SyncTrigger::new(),
        ))
    }

    fn consumer(
        merger: Arc<Merger<Arc<MockTransport>>>,
        receivers: Vec<mpsc::Receiver<ChannelMessage>>,
    ) -> Arc<ChannelConsumer<Arc<MockTransport>, ScriptedChannel>> {
        Arc::new(ChannelConsumer::new(
            merger,
            ScriptedChannel {
                receivers: Mutex::new(receivers.into()),
            },
            Duration::from_millis(5),
        ))
    }

    async fn eventually(mut check: impl FnMut() -> bool) {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    #[test]
    fn sequence_gap_marks_stale() {
        let mock = Arc::new(MockTransport::new());
        let merger = merger(mock);
        let consumer = consumer(merger.clone(), Vec::new());

        let created = ChangeEvent::Created(report("r-1", "a"));
        consumer.handle_message(&ChannelMessage::new(1, created.clone()));
        consumer.handle_message(&ChannelMessage::new(2, created));
        assert!(!merger.is_stale());

        consumer.handle_message(&ChannelMessage::new(
            5,
            ChangeEvent::Deleted(RemoteId::new("r-1")),
        ));
        assert!(merger.is_stale());

        let stats = consumer.stats();
        assert_eq!(stats.inserted, 1);
        assert_eq!(stats.duplicates, 1);
        assert_eq!(stats.deleted, 1);
        assert_eq!(stats.gaps, 1);
    }

    #[tokio::test]
    async fn consumes_and_resubscribes_with_refresh() {
        let mock = Arc::new(MockTransport::new());
        mock.create(&NewReport::new("Flood", "River", "13.0, 77.5", "ravi"), false)
            .await
            .unwrap();
        let merger = merger(mock.clone());

        let (first_tx, first_rx) = mpsc::channel(8);
        let (second_tx, second_rx) = mpsc::channel(8);
        let consumer = consumer(merger.clone(), vec![first_rx, second_rx]);
        let handle = consumer.clone().spawn();

        eventually(|| merger.confirmed().len() == 1).await;

        first_tx
            .send(ChannelMessage::new(1, ChangeEvent::Created(report("r-9", "Warehouse"))))
            .await
            .unwrap();
        eventually(|| merger.confirmed().len() == 2).await;

        drop(first_tx);
        eventually(|| consumer.stats().subscriptions == 2).await;
        // The re-fetch replaced the snapshot with what the server holds.
        eventually(|| merger.confirmed().len() == 1).await;
        assert!(consumer.stats().refreshes >= 2);

        second_tx
            .send(ChannelMessage::new(1, ChangeEvent::Created(report("r-10", "Market"))))
            .await
            .unwrap();
        eventually(|| merger.confirmed().len() == 2).await;

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn gap_inside_a_subscription_refetches() {
        let mock = Arc::new(MockTransport::new());
        let merger = merger(mock.clone());
        let (tx, rx) = mpsc::channel(8);
        let consumer = consumer(merger.clone(), vec![rx]);
        let handle = consumer.clone().spawn();
        eventually(|| consumer.stats().refreshes == 1).await;

        tx.send(ChannelMessage::new(1, ChangeEvent::Created(report("r-1", "a"))))
            .await
            .unwrap();
        tx.send(ChannelMessage::new(3, ChangeEvent::Created(report("r-3", "c"))))
            .await
            .unwrap();

        eventually(|| consumer.stats().refreshes == 2).await;
        assert!(!merger.is_stale());
        assert_eq!(consumer.stats().gaps, 1);

        handle.shutdown().await;
    }
}
