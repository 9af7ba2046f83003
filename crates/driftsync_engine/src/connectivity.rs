//! Connectivity signal consulted before remote round-trips.

use std::sync::Arc;
use tokio::sync::watch;

/// Network state as reported by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NetworkStatus {
    /// No network.
    Offline,
    /// Connected over a metered link (e.g. cellular).
    Metered,
    /// Connected over an unmetered link (e.g. wifi).
    Unmetered,
}

impl NetworkStatus {
    /// Returns true unless offline.
    pub fn is_online(&self) -> bool {
        !matches!(self, NetworkStatus::Offline)
    }
}

/// Source of the current network status.
pub trait Connectivity: Send + Sync {
    /// Returns the current status.
    fn status(&self) -> NetworkStatus;

    /// Returns true if any network is available.
    fn is_online(&self) -> bool {
        self.status().is_online()
    }

    /// Returns true if reads should be served from the local store.
    ///
    /// Local-only when offline or on a metered link.
    fn should_load_local(&self) -> bool {
        self.status() != NetworkStatus::Unmetered
    }
}

/// Connectivity that always reports an unmetered network.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysOnline;

impl Connectivity for AlwaysOnline {
    fn status(&self) -> NetworkStatus {
        NetworkStatus::Unmetered
    }
}

/// Connectivity fed by the application, observable by async tasks.
///
/// Clones share the same signal. The application calls
/// [`SharedConnectivity::set`] from its network callbacks; tasks can await
/// [`SharedConnectivity::wait_online`] to trigger a pending replay.
#[derive(Debug, Clone)]
pub struct SharedConnectivity {
    tx: Arc<watch::Sender<NetworkStatus>>,
}

impl SharedConnectivity {
    /// Creates a signal with an initial status.
    pub fn new(initial: NetworkStatus) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx: Arc::new(tx) }
    }

    /// Updates the status. Returns the previous one.
    pub fn set(&self, status: NetworkStatus) -> NetworkStatus {
        let previous = self.tx.send_replace(status);
        if previous != status {
            tracing::debug!(?previous, current = ?status, "network status changed");
        }
        previous
    }

    /// Returns a receiver that observes every change.
    pub fn subscribe(&self) -> watch::Receiver<NetworkStatus> {
        self.tx.subscribe()
    }

    /// Resolves once the status is online. Returns immediately if it already is.
    pub async fn wait_online(&self) -> NetworkStatus {
        let mut rx = self.tx.subscribe();
        let status = match rx.wait_for(|status| status.is_online()).await {
            Ok(status) => *status,
            // The sender lives in `self`, so the channel cannot close here.
            Err(_) => *self.tx.borrow(),
        };
        status
    }
}

impl Default for SharedConnectivity {
    fn default() -> Self {
        Self::new(NetworkStatus::Unmetered)
    }
}

impl Connectivity for SharedConnectivity {
    fn status(&self) -> NetworkStatus {
        *self.tx.borrow()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn load_local_unless_unmetered() {
        let signal = SharedConnectivity::new(NetworkStatus::Offline);
        assert!(!signal.is_online());
        assert!(signal.should_load_local());

        signal.set(NetworkStatus::Metered);
        assert!(signal.is_online());
        assert!(signal.should_load_local());

        assert_eq!(signal.set(NetworkStatus::Unmetered), NetworkStatus::Metered);
        assert!(!signal.should_load_local());
        assert!(!AlwaysOnline.should_load_local());
    }

    #[test]
    fn clones_share_status() {
        let signal = SharedConnectivity::default();
        let clone = signal.clone();
        signal.set(NetworkStatus::Offline);
        assert_eq!(clone.status(), NetworkStatus::Offline);
    }

    #[tokio::test]
    async fn wait_online_resolves_on_reconnect() {
        let signal = SharedConnectivity::new(NetworkStatus::Offline);
        let waiter = {
            let signal = signal.clone();
            tokio::spawn(async move { signal.wait_online().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());
        signal.set(NetworkStatus::Metered);

        let status = tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(status, NetworkStatus::Metered);
    }

    #[tokio::test]
    async fn wait_online_is_immediate_when_online() {
        let signal = SharedConnectivity::new(NetworkStatus::Unmetered);
        assert_eq!(signal.wait_online().await, NetworkStatus::Unmetered);
    }
}
