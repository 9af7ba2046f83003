//! CLI command implementations.

pub mod clear;
pub mod inspect;
pub mod pending;

use driftsync_core::{CoreError, LocalStore};
use driftsync_storage::{FileStore, StorageError};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors surfaced by CLI commands.
#[derive(Debug, Error)]
pub enum CliError {
    /// No store file at the given path.
    #[error("no store found at {}", .0.display())]
    NotFound(PathBuf),

    /// Unknown `--format` value.
    #[error("unknown output format '{0}' (expected text or json)")]
    UnknownFormat(String),

    /// The store could not be opened or read.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// A row could not be interpreted.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// JSON output failed.
    #[error("json output failed: {0}")]
    Json(#[from] serde_json::Error),
}

/// Output format of reporting commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    pub fn parse(format: &str) -> Result<Self, CliError> {
        match format {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(CliError::UnknownFormat(other.to_string())),
        }
    }
}

/// Opens an existing store. Refuses to create one.
pub fn open_store(path: &Path) -> Result<LocalStore<FileStore>, CliError> {
    if !path.is_file() {
        return Err(CliError::NotFound(path.to_path_buf()));
    }
    Ok(LocalStore::new(FileStore::open(path)?))
}
