//! Realtime push/subscribe collaborator.
//!
//! A realtime remote holds one collection of JSON children addressed by
//! server-assigned keys. Every mutation, including the caller's own, is
//! echoed back to subscribed listeners as a child event.

use crate::error::{RemoteError, RemoteResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Session granted by a successful authentication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthData {
    /// Authenticated user id.
    pub uid: String,
    /// Auth provider name, e.g. `"custom"`.
    pub provider: String,
    /// Session expiry as unix seconds, if the remote reports one.
    pub expires_at: Option<i64>,
}

impl AuthData {
    /// Creates auth data for a custom-token session.
    pub fn custom(uid: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            provider: "custom".into(),
            expires_at: None,
        }
    }
}

/// Callback receiving the outcome of an authentication attempt.
pub type AuthHandler = Box<dyn FnOnce(RemoteResult<AuthData>) + Send + 'static>;

/// One child of the remote collection, as delivered to listeners.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Server-assigned key.
    pub key: String,
    /// Child value.
    pub value: serde_json::Value,
}

impl Snapshot {
    /// Creates a snapshot.
    pub fn new(key: impl Into<String>, value: serde_json::Value) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }

    /// Deserializes the value.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::Decode`] if the value does not match `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> RemoteResult<T> {
        serde_json::from_value(self.value.clone()).map_err(RemoteError::from)
    }
}

/// Receives child events from a subscription.
///
/// Events are delivered in the remote's order, on a transport-owned thread.
pub trait ChildListener: Send + Sync {
    /// A child entered the subscribed window. `prev_key` is the key of the
    /// preceding sibling, if any.
    fn on_child_added(&self, snapshot: &Snapshot, prev_key: Option<&str>);

    /// A child's value changed.
    fn on_child_changed(&self, snapshot: &Snapshot, prev_key: Option<&str>);

    /// A child was removed. The snapshot carries its last value.
    fn on_child_removed(&self, snapshot: &Snapshot);

    /// A child moved within the ordering.
    fn on_child_moved(&self, snapshot: &Snapshot, prev_key: Option<&str>);

    /// The subscription was terminated by the remote.
    fn on_cancelled(&self, error: &RemoteError);
}

/// Window of the remote collection a subscription observes.
///
/// Children are ordered by key unless `order_by` names a child field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RealtimeQuery {
    /// Child field to order by.
    pub order_by: Option<String>,
    /// Only the last `n` children in order.
    pub limit_to_last: Option<usize>,
    /// Only children whose key sorts at or before this key.
    pub end_at: Option<String>,
}

impl RealtimeQuery {
    /// Creates an unbounded query ordered by key.
    pub fn new() -> Self {
        Self::default()
    }

    /// Orders children by a child field.
    #[must_use]
    pub fn order_by(mut self, field: impl Into<String>) -> Self {
        self.order_by = Some(field.into());
        self
    }

    /// Keeps only the last `limit` children.
    #[must_use]
    pub fn limit_to_last(mut self, limit: usize) -> Self {
        self.limit_to_last = Some(limit);
        self
    }

    /// Ends the window at `key`, inclusive.
    #[must_use]
    pub fn end_at(mut self, key: impl Into<String>) -> Self {
        self.end_at = Some(key.into());
        self
    }
}

/// Handle of an attached listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(pub u64);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

/// A realtime remote collection.
///
/// Mutations report only whether the remote accepted the write. Their
/// effect becomes observable through the listener events that follow.
pub trait RealtimeRemote: Send + Sync {
    /// Authenticates with a custom token. `handler` runs exactly once.
    fn authenticate(&self, token: &str, handler: AuthHandler);

    /// Attaches `listener` to the window described by `query`.
    ///
    /// Children already inside the window are delivered as added events.
    fn subscribe(
        &self,
        query: &RealtimeQuery,
        listener: Arc<dyn ChildListener>,
    ) -> RemoteResult<ListenerId>;

    /// Detaches a listener. Unknown ids are ignored.
    fn unsubscribe(&self, id: ListenerId) -> RemoteResult<()>;

    /// Appends a child under a new server-assigned key and returns the key.
    fn push(&self, value: serde_json::Value) -> RemoteResult<String>;

    /// Writes the child at `key`, creating it if absent.
    fn set_value(&self, key: &str, value: serde_json::Value) -> RemoteResult<()>;

    /// Removes the child at `key`.
    fn remove_value(&self, key: &str) -> RemoteResult<()>;
}
