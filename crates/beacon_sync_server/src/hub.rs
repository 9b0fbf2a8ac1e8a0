//! Real-time change fan-out.

use crate::viewer::Viewer;
use beacon_sync_protocol::{ChangeEvent, ChannelMessage, Report};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

struct Subscription {
    viewer: Viewer,
    sender: mpsc::Sender<ChannelMessage>,
    seq: u64,
}

/// Delivers change events to subscribers, scoped to what each viewer may
/// see.
///
/// Each subscription numbers its own messages from 1. A message that does
/// not fit in the subscriber's buffer is dropped but still consumes a
/// sequence number, so the subscriber observes a gap.
pub struct ChangeHub {
    capacity: usize,
    subscriptions: Mutex<Vec<Subscription>>,
}

impl ChangeHub {
    /// Creates a hub with the given per-subscription buffer.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            subscriptions: Mutex::new(Vec::new()),
        }
    }

    /// Opens a subscription for `viewer`.
    pub fn subscribe(&self, viewer: Viewer) -> mpsc::Receiver<ChannelMessage> {
        let (sender, receiver) = mpsc::channel(self.capacity);
        debug!(viewer = %viewer.name, "push subscription opened");
        self.subscriptions.lock().push(Subscription {
            viewer,
            sender,
            seq: 0,
        });
        receiver
    }

    /// Returns the number of open subscriptions.
    pub fn subscriber_count(&self) -> usize {
        let mut subs = self.subscriptions.lock();
        subs.retain(|s| !s.sender.is_closed());
        subs.len()
    }

    /// Publishes an event about `subject` to every viewer allowed to see it.
    pub fn publish(&self, subject: &Report, event: ChangeEvent) {
        let mut subs = self.subscriptions.lock();
        subs.retain(|s| !s.sender.is_closed());
        for sub in subs.iter_mut().filter(|s| s.viewer.can_see(subject)) {
            sub.seq += 1;
            let message = ChannelMessage::new(sub.seq, event.clone());
            if sub.sender.try_send(message).is_err() {
                debug!(viewer = %sub.viewer.name, seq = sub.seq, "subscriber buffer full, message dropped");
            }
        }
    }

    /// Consumes the next `n` sequence numbers of every subscription without
    /// delivering anything.
    pub fn skip(&self, n: u64) {
        for sub in self.subscriptions.lock().iter_mut() {
            sub.seq += n;
        }
    }

    /// Closes every subscription, as a dropped connection would.
    pub fn disconnect_all(&self) {
        self.subscriptions.lock().clear();
    }
}
