//! Error types for the sync managers.

use driftsync_core::CoreError;
use driftsync_protocol::RemoteError;
use driftsync_storage::StorageError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Local store error. The record's stored status is unchanged.
    #[error("local store error: {0}")]
    Core(#[from] CoreError),

    /// The remote call failed.
    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),

    /// The connectivity signal reports no network; the remote was not tried.
    #[error("offline: change kept locally")]
    Offline,

    /// The realtime remote rejected the auth token.
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// No remote key is known for a local id.
    #[error("no remote key known for record {id}")]
    UnknownRemoteKey {
        /// Local record id.
        id: String,
    },

    /// A record could not be encoded for the remote.
    #[error("cannot encode record: {0}")]
    Encode(String),

    /// Invalid or incomplete configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

impl SyncError {
    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Creates an unknown-remote-key error.
    pub fn unknown_key(id: impl Into<String>) -> Self {
        Self::UnknownRemoteKey { id: id.into() }
    }

    /// Returns true if this error can be retried.
    ///
    /// Failed operations keep their pending status, so a retry is a later
    /// replay of the pending queue.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Remote(err) => err.is_retryable(),
            SyncError::Offline => true,
            SyncError::Core(CoreError::Storage(_)) => true,
            SyncError::UnknownRemoteKey { .. } => true,
            _ => false,
        }
    }

    /// Returns true for deserialization and protocol failures.
    pub fn is_protocol(&self) -> bool {
        matches!(self, SyncError::Remote(err) if err.is_protocol())
    }
}

impl From<StorageError> for SyncError {
    fn from(err: StorageError) -> Self {
        Self::Core(CoreError::Storage(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(SyncError::from(RemoteError::Timeout).is_retryable());
        assert!(!SyncError::from(RemoteError::rejected("denied")).is_retryable());
        assert!(SyncError::Offline.is_retryable());
        assert!(SyncError::from(StorageError::Locked).is_retryable());
        assert!(SyncError::unknown_key("a1").is_retryable());
        assert!(!SyncError::config("missing url").is_retryable());
        assert!(!SyncError::AuthFailed("bad token".into()).is_retryable());
    }

    #[test]
    fn protocol_errors() {
        assert!(SyncError::from(RemoteError::decode("eof")).is_protocol());
        assert!(!SyncError::Offline.is_protocol());
    }

    #[test]
    fn error_display() {
        assert_eq!(
            SyncError::unknown_key("a1").to_string(),
            "no remote key known for record a1"
        );
        assert_eq!(SyncError::Offline.to_string(), "offline: change kept locally");
    }
}
