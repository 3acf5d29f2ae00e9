// Connectivity Port (online state + became-online edges)

use tokio::sync::watch;

pub trait ConnectivitySource: Send + Sync {
    /// Current reachability of the backend
    fn is_online(&self) -> bool;

    /// Receiver that changes whenever the online state flips
    fn subscribe(&self) -> watch::Receiver<bool>;
}

/// Connectivity state held in a watch channel.
///
/// Adapters (reachability poller, tests) push state with `set_online`; consumers
/// read the current value or await the next edge.
pub struct WatchConnectivity {
    tx: watch::Sender<bool>,
}

impl WatchConnectivity {
    pub fn new(initially_online: bool) -> Self {
        let (tx, _rx) = watch::channel(initially_online);
        Self { tx }
    }

    /// Returns true if the state actually changed
    pub fn set_online(&self, online: bool) -> bool {
        let changed = self.tx.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
        if changed {
            tracing::info!(online = online, "Connectivity changed");
        }
        changed
    }
}

impl ConnectivitySource for WatchConnectivity {
    fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}
