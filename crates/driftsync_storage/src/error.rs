//! Error types for storage operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The store file is corrupted.
    #[error("store corrupted: {0}")]
    Corrupted(String),

    /// Another process holds the store.
    #[error("store locked: another process has exclusive access")]
    Locked,

    /// Encoding the store snapshot failed.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// The commit could not be applied; nothing was written.
    #[error("commit failed: {0}")]
    CommitFailed(String),
}

impl StorageError {
    /// Creates a corruption error.
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::Corrupted(message.into())
    }

    /// Creates a commit failure.
    pub fn commit_failed(message: impl Into<String>) -> Self {
        Self::CommitFailed(message.into())
    }
}
