//! Remote failure taxonomy.

use thiserror::Error;

/// Result type for remote operations.
pub type RemoteResult<T> = Result<T, RemoteError>;

/// Errors reported by a remote collaborator.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    /// Connection refused, reset or otherwise failed below the protocol.
    #[error("transport error: {0}")]
    Transport(String),

    /// No response within the transport's deadline.
    #[error("request timed out")]
    Timeout,

    /// The remote answered with a non-success status.
    #[error("remote returned status {code}")]
    Status {
        /// Status code.
        code: u16,
        /// Response body, possibly empty.
        body: String,
    },

    /// The response could not be deserialized.
    #[error("cannot decode response: {0}")]
    Decode(String),

    /// The request was cancelled before completing.
    #[error("request cancelled")]
    Cancelled,

    /// The remote refused the operation (permissions, validation, auth).
    #[error("rejected by remote: {0}")]
    Rejected(String),
}

impl RemoteError {
    /// Creates a transport error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    /// Creates a decode error.
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode(message.into())
    }

    /// Creates a rejection.
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected(message.into())
    }

    /// Returns true if retrying the same request later may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            RemoteError::Transport(_) | RemoteError::Timeout | RemoteError::Cancelled => true,
            RemoteError::Status { code, .. } => *code >= 500 || *code == 408 || *code == 429,
            RemoteError::Decode(_) | RemoteError::Rejected(_) => false,
        }
    }

    /// Returns true for deserialization and protocol failures.
    pub fn is_protocol(&self) -> bool {
        matches!(self, RemoteError::Decode(_))
    }
}

impl From<serde_json::Error> for RemoteError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}
