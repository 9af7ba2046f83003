//! Error types for driftsync core.

use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] driftsync_storage::StorageError),

    /// Encoding or decoding a row body failed.
    #[error("codec error: {0}")]
    Codec(String),

    /// A stored status code has no matching [`crate::SyncStatus`].
    #[error("invalid sync status code: {0}")]
    InvalidStatus(u8),

    /// A row could not be turned back into a record.
    #[error("cannot rehydrate {collection}/{id}: {message}")]
    RecordDecode {
        /// Collection of the row.
        collection: String,
        /// Id of the row.
        id: String,
        /// What went wrong.
        message: String,
    },
}

impl CoreError {
    /// Creates a codec error.
    pub fn codec(message: impl Into<String>) -> Self {
        Self::Codec(message.into())
    }

    /// Creates a record decode error.
    pub fn record_decode(
        collection: impl Into<String>,
        id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::RecordDecode {
            collection: collection.into(),
            id: id.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use driftsync_storage::StorageError;

    #[test]
    fn storage_errors_convert() {
        let err: CoreError = StorageError::Locked.into();
        assert!(matches!(err, CoreError::Storage(StorageError::Locked)));
        assert!(err.to_string().contains("locked"));
    }

    #[test]
    fn decode_error_names_the_row() {
        let err = CoreError::record_decode("notes", "a1", "missing title");
        assert_eq!(
            err.to_string(),
            "cannot rehydrate notes/a1: missing title"
        );
    }
}
