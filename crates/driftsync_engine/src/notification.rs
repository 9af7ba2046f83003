//! Notifications emitted by the sync managers.
//!
//! Managers never post to ambient global state. The composing application
//! hands each manager a [`NotificationSink`] and receives every outcome as a
//! [`SyncNotification`] value.

use driftsync_core::{SyncOperation, SyncStatus};
use driftsync_protocol::AuthData;
use std::fmt;
use uuid::Uuid;

/// Identity of one manager instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ManagerId(Uuid);

impl ManagerId {
    /// Creates a fresh random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying uuid.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ManagerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ManagerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Identity of one call, returned to the caller and echoed in its notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    /// Creates a fresh random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying uuid.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// An outcome reported by a manager.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncNotification {
    /// A local mutation was acknowledged and its synced status persisted.
    SyncSucceeded {
        /// Emitting manager.
        manager: ManagerId,
        /// Originating call.
        correlation: CorrelationId,
        /// Collection of the record.
        collection: String,
        /// Record id.
        id: String,
        /// Acknowledged operation.
        operation: SyncOperation,
    },
    /// A local mutation was not acknowledged; the record stays pending.
    SyncFailed {
        /// Emitting manager.
        manager: ManagerId,
        /// Originating call.
        correlation: CorrelationId,
        /// Collection of the record.
        collection: String,
        /// Record id.
        id: String,
        /// Attempted operation.
        operation: SyncOperation,
        /// What went wrong.
        error: String,
        /// Whether a later replay may succeed.
        retryable: bool,
    },
    /// A list refresh failed; local rows were served instead.
    RefreshFailed {
        /// Emitting manager.
        manager: ManagerId,
        /// Originating call.
        correlation: CorrelationId,
        /// Refreshed collection.
        collection: String,
        /// What went wrong.
        error: String,
    },
    /// A remote-origin change was written locally.
    RemoteApplied {
        /// Emitting manager.
        manager: ManagerId,
        /// Collection of the record.
        collection: String,
        /// Record id.
        id: String,
        /// Status the record was written at.
        status: SyncStatus,
    },
    /// The realtime handshake succeeded.
    AuthSucceeded {
        /// Emitting manager.
        manager: ManagerId,
        /// Granted session.
        auth: AuthData,
    },
    /// The realtime handshake failed. No retry is attempted.
    AuthFailed {
        /// Emitting manager.
        manager: ManagerId,
        /// What went wrong.
        error: String,
    },
    /// An inbound realtime event could not be applied, or the stream ended.
    StreamFailed {
        /// Emitting manager.
        manager: ManagerId,
        /// What went wrong.
        error: String,
    },
}

impl SyncNotification {
    /// Returns the emitting manager.
    pub fn manager(&self) -> ManagerId {
        match self {
            SyncNotification::SyncSucceeded { manager, .. }
            | SyncNotification::SyncFailed { manager, .. }
            | SyncNotification::RefreshFailed { manager, .. }
            | SyncNotification::RemoteApplied { manager, .. }
            | SyncNotification::AuthSucceeded { manager, .. }
            | SyncNotification::AuthFailed { manager, .. }
            | SyncNotification::StreamFailed { manager, .. } => *manager,
        }
    }

    /// Returns the originating call, for call-driven notifications.
    pub fn correlation(&self) -> Option<CorrelationId> {
        match self {
            SyncNotification::SyncSucceeded { correlation, .. }
            | SyncNotification::SyncFailed { correlation, .. }
            | SyncNotification::RefreshFailed { correlation, .. } => Some(*correlation),
            _ => None,
        }
    }

    /// Returns true for every failure notification.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            SyncNotification::SyncFailed { .. }
                | SyncNotification::RefreshFailed { .. }
                | SyncNotification::AuthFailed { .. }
                | SyncNotification::StreamFailed { .. }
        )
    }
}

/// Receives notifications from a manager.
///
/// Called on whichever thread completes the operation, possibly a
/// transport-owned one. Implementations must not block for long.
pub trait NotificationSink: Send + Sync {
    /// Delivers one notification.
    fn notify(&self, notification: SyncNotification);
}

/// Adapts a closure into a sink.
pub struct FnSink<F>(pub F);

impl<F> NotificationSink for FnSink<F>
where
    F: Fn(SyncNotification) + Send + Sync,
{
    fn notify(&self, notification: SyncNotification) {
        (self.0)(notification);
    }
}

impl<F> fmt::Debug for FnSink<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnSink")
    }
}

impl NotificationSink for std::sync::mpsc::Sender<SyncNotification> {
    fn notify(&self, notification: SyncNotification) {
        if self.send(notification).is_err() {
            tracing::debug!("notification receiver dropped");
        }
    }
}

impl NotificationSink for tokio::sync::mpsc::UnboundedSender<SyncNotification> {
    fn notify(&self, notification: SyncNotification) {
        if self.send(notification).is_err() {
            tracing::debug!("notification receiver dropped");
        }
    }
}

/// A sink that drops every notification.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiscardSink;

impl NotificationSink for DiscardSink {
    fn notify(&self, _notification: SyncNotification) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn failed(manager: ManagerId, correlation: CorrelationId) -> SyncNotification {
        SyncNotification::SyncFailed {
            manager,
            correlation,
            collection: "notes".into(),
            id: "a1".into(),
            operation: SyncOperation::Create,
            error: "timeout".into(),
            retryable: true,
        }
    }

    #[test]
    fn ids_are_unique() {
        assert_ne!(ManagerId::new(), ManagerId::new());
        assert_ne!(CorrelationId::new(), CorrelationId::new());
    }

    #[test]
    fn accessors() {
        let manager = ManagerId::new();
        let correlation = CorrelationId::new();
        let n = failed(manager, correlation);
        assert_eq!(n.manager(), manager);
        assert_eq!(n.correlation(), Some(correlation));
        assert!(n.is_failure());

        let auth = SyncNotification::AuthSucceeded {
            manager,
            auth: AuthData::custom("u1"),
        };
        assert_eq!(auth.correlation(), None);
        assert!(!auth.is_failure());
    }

    #[test]
    fn closure_sink() {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        let sink = FnSink(move |_n: SyncNotification| {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        sink.notify(failed(ManagerId::new(), CorrelationId::new()));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn std_channel_sink() {
        let (tx, rx) = std::sync::mpsc::channel();
        let correlation = CorrelationId::new();
        tx.notify(failed(ManagerId::new(), correlation));
        assert_eq!(rx.recv().unwrap().correlation(), Some(correlation));

        drop(rx);
        tx.notify(failed(ManagerId::new(), correlation));
    }

    #[tokio::test]
    async fn tokio_channel_sink() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let correlation = CorrelationId::new();
        tx.notify(failed(ManagerId::new(), correlation));
        assert_eq!(rx.recv().await.unwrap().correlation(), Some(correlation));
    }
}
