//! Configuration for the sync managers.

use crate::error::{SyncError, SyncResult};
use driftsync_protocol::RealtimeQuery;
use serde::Deserialize;
use std::path::Path;

/// Default size of the realtime subscription window.
pub const DEFAULT_STANDARD_LIMIT: usize = 100;

/// Configuration for [`crate::RestSyncManager`].
#[derive(Debug, Clone)]
pub struct RestConfig {
    /// Stop a pending replay at the first failed submission.
    ///
    /// Later records are left pending, so user intent order is preserved.
    pub stop_replay_on_failure: bool,
}

impl RestConfig {
    /// Creates the default configuration.
    pub fn new() -> Self {
        Self {
            stop_replay_on_failure: true,
        }
    }

    /// Sets whether a replay stops at the first failure.
    #[must_use]
    pub fn with_stop_replay_on_failure(mut self, stop: bool) -> Self {
        self.stop_replay_on_failure = stop;
        self
    }
}

impl Default for RestConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for [`crate::RealtimeSyncManager`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RealtimeConfig {
    /// Location of the remote collection.
    pub url: String,
    /// Custom auth token presented on start.
    pub auth_token: String,
    /// Number of most recent children the subscription observes.
    pub standard_limit: usize,
    /// Child field the window is ordered by; key order if unset.
    pub order_by: Option<String>,
}

#[derive(Deserialize)]
struct RawRealtimeConfig {
    url: Option<String>,
    auth: Option<String>,
    standard_limit: Option<usize>,
    order_by: Option<String>,
}

impl RealtimeConfig {
    /// Creates a configuration with the default window.
    pub fn new(url: impl Into<String>, auth_token: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            auth_token: auth_token.into(),
            standard_limit: DEFAULT_STANDARD_LIMIT,
            order_by: None,
        }
    }

    /// Sets the window size.
    #[must_use]
    pub fn with_standard_limit(mut self, limit: usize) -> Self {
        self.standard_limit = limit;
        self
    }

    /// Orders the window by a child field.
    #[must_use]
    pub fn with_order_by(mut self, field: impl Into<String>) -> Self {
        self.order_by = Some(field.into());
        self
    }

    /// Parses a JSON settings object.
    ///
    /// Recognized keys: `url` and `auth` (required), `standard_limit` and
    /// `order_by` (optional).
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Config`] if the JSON is malformed, a required key
    /// is missing or empty, or `standard_limit` is zero.
    pub fn from_json_str(json: &str) -> SyncResult<Self> {
        let raw: RawRealtimeConfig = serde_json::from_str(json)
            .map_err(|e| SyncError::config(format!("invalid realtime settings: {e}")))?;

        let url = required(raw.url, "url")?;
        let auth_token = required(raw.auth, "auth")?;
        let standard_limit = raw.standard_limit.unwrap_or(DEFAULT_STANDARD_LIMIT);
        if standard_limit == 0 {
            return Err(SyncError::config("standard_limit must be positive"));
        }

        Ok(Self {
            url,
            auth_token,
            standard_limit,
            order_by: raw.order_by.filter(|field| !field.is_empty()),
        })
    }

    /// Reads a JSON settings file. See [`RealtimeConfig::from_json_str`].
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Config`] if the file cannot be read or parsed.
    pub fn from_json_file(path: &Path) -> SyncResult<Self> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            SyncError::config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_json_str(&json)
    }

    /// Returns the standard subscription window.
    pub fn query(&self) -> RealtimeQuery {
        let query = RealtimeQuery::new().limit_to_last(self.standard_limit);
        match &self.order_by {
            Some(field) => query.order_by(field.clone()),
            None => query,
        }
    }
}

fn required(value: Option<String>, key: &str) -> SyncResult<String> {
    match value {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(SyncError::config(format!("missing required key `{key}`"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rest_config_builder() {
        assert!(RestConfig::default().stop_replay_on_failure);
        let config = RestConfig::new().with_stop_replay_on_failure(false);
        assert!(!config.stop_replay_on_failure);
    }

    #[test]
    fn realtime_config_builder() {
        let config = RealtimeConfig::new("https://notes.example.com", "secret")
            .with_standard_limit(20)
            .with_order_by("request_time");

        assert_eq!(config.url, "https://notes.example.com");
        assert_eq!(config.standard_limit, 20);
        let query = config.query();
        assert_eq!(query.limit_to_last, Some(20));
        assert_eq!(query.order_by.as_deref(), Some("request_time"));
        assert_eq!(query.end_at, None);
    }

    #[test]
    fn realtime_config_from_json() {
        let config = RealtimeConfig::from_json_str(
            r#"{"url": "https://notes.example.com", "auth": "secret", "standard_limit": 25}"#,
        )
        .unwrap();
        assert_eq!(config.auth_token, "secret");
        assert_eq!(config.standard_limit, 25);
        assert_eq!(config.order_by, None);
    }

    #[test]
    fn missing_limit_uses_default() {
        let config =
            RealtimeConfig::from_json_str(r#"{"url": "u", "auth": "a", "order_by": ""}"#).unwrap();
        assert_eq!(config.standard_limit, DEFAULT_STANDARD_LIMIT);
        assert_eq!(config.order_by, None);
    }

    #[test]
    fn missing_required_keys_are_config_errors() {
        let err = RealtimeConfig::from_json_str(r#"{"auth": "a"}"#).unwrap_err();
        assert!(matches!(err, SyncError::Config(ref m) if m.contains("url")));

        let err = RealtimeConfig::from_json_str(r#"{"url": "u", "auth": ""}"#).unwrap_err();
        assert!(matches!(err, SyncError::Config(ref m) if m.contains("auth")));

        let err = RealtimeConfig::from_json_str("not json").unwrap_err();
        assert!(matches!(err, SyncError::Config(_)));

        let err =
            RealtimeConfig::from_json_str(r#"{"url": "u", "auth": "a", "standard_limit": 0}"#)
                .unwrap_err();
        assert!(matches!(err, SyncError::Config(_)));
    }

    #[test]
    fn config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("realtime.json");
        std::fs::write(&path, r#"{"url": "u", "auth": "a", "standard_limit": 5}"#).unwrap();
        let config = RealtimeConfig::from_json_file(&path).unwrap();
        assert_eq!(config.standard_limit, 5);

        let missing = dir.path().join("missing.json");
        assert!(matches!(
            RealtimeConfig::from_json_file(&missing),
            Err(SyncError::Config(_))
        ));
    }
}
