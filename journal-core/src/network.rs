//! Connectivity observation driving the queue and the WiFi gate.
//!
//! The host app owns the actual platform reachability callbacks (Network.framework,
//! ConnectivityManager, …); this module only defines the shared vocabulary and
//! a broadcast channel so `SyncManager` and `AssetPipeline` can both react to
//! transitions without polling.

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Connectivity {
    None,
    Cellular,
    Wifi,
}

impl Connectivity {
    pub fn is_online(self) -> bool {
        !matches!(self, Connectivity::None)
    }

    pub fn satisfies_wifi_gate(self) -> bool {
        matches!(self, Connectivity::Wifi)
    }
}

/// Shared connectivity state. The host app calls `set()` from its platform
/// reachability callback; `SyncManager`/`AssetPipeline` hold a `watch::Receiver`
/// and react to transitions (e.g. trigger a fresh queue drain on
/// `None -> {Cellular,Wifi}`, release WiFi-gated uploads on `* -> Wifi`).
pub struct NetworkMonitor {
    tx: watch::Sender<Connectivity>,
}

impl NetworkMonitor {
    pub fn new(initial: Connectivity) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx }
    }

    pub fn set(&self, state: Connectivity) {
        self.tx.send_replace(state);
    }

    pub fn current(&self) -> Connectivity {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<Connectivity> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wifi_gate_only_satisfied_by_wifi() {
        assert!(!Connectivity::None.satisfies_wifi_gate());
        assert!(!Connectivity::Cellular.satisfies_wifi_gate());
        assert!(Connectivity::Wifi.satisfies_wifi_gate());
    }

    #[tokio::test]
    async fn subscriber_observes_transition() {
        let monitor = NetworkMonitor::new(Connectivity::None);
        let mut rx = monitor.subscribe();
        monitor.set(Connectivity::Wifi);
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), Connectivity::Wifi);
    }
}
