//! Process-wide connectivity state.
//!
//! The environment reports online/offline transitions through
//! [`ConnectivityState::apply`]; that is the only write path. The retry
//! client, the merger and the dispatcher loop only read it.

use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

/// Whether the device can reach the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connectivity {
    /// Network reachable.
    Online,
    /// Network unreachable.
    Offline,
}

/// A transition reported by the environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivitySignal {
    /// The network came back.
    WentOnline,
    /// The network went away.
    WentOffline,
}

impl ConnectivitySignal {
    fn target(self) -> Connectivity {
        match self {
            Self::WentOnline => Connectivity::Online,
            Self::WentOffline => Connectivity::Offline,
        }
    }
}

/// Shared handle to the connectivity state. Clones observe the same state.
#[derive(Debug, Clone)]
pub struct ConnectivityState {
    sender: Arc<watch::Sender<Connectivity>>,
}

impl ConnectivityState {
    /// Creates a state starting at `initial`.
    #[must_use]
    pub fn new(initial: Connectivity) -> Self {
        let (sender, _) = watch::channel(initial);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Creates a state that starts online.
    #[must_use]
    pub fn online() -> Self {
        Self::new(Connectivity::Online)
    }

    /// Creates a state that starts offline.
    #[must_use]
    pub fn offline() -> Self {
        Self::new(Connectivity::Offline)
    }

    /// Applies an environment signal. Returns true if the state changed.
    pub fn apply(&self, signal: ConnectivitySignal) -> bool {
        let target = signal.target();
        let changed = self.sender.send_if_modified(|current| {
            if *current == target {
                false
            } else {
                *current = target;
                true
            }
        });
        if changed {
            info!(state = ?target, "connectivity changed");
        }
        changed
    }

    /// Returns the current state.
    #[must_use]
    pub fn current(&self) -> Connectivity {
        *self.sender.borrow()
    }

    /// Returns true when online.
    #[must_use]
    pub fn is_online(&self) -> bool {
        self.current() == Connectivity::Online
    }

    /// Returns a receiver notified on every change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Connectivity> {
        self.sender.subscribe()
    }
}

impl Default for ConnectivityState {
    fn default() -> Self {
        Self::online()
    }
}
