//! Counters kept by the sync managers.

use std::time::Instant;

/// Statistics about one manager's operations.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Mutations acknowledged by the remote.
    pub succeeded: u64,
    /// Mutations that failed and stayed pending.
    pub failed: u64,
    /// Remote-origin changes written locally.
    pub remote_applied: u64,
    /// Time of the last acknowledgement.
    pub last_success: Option<Instant>,
    /// Last error message.
    pub last_error: Option<String>,
}

impl SyncStats {
    pub(crate) fn record_success(&mut self) {
        self.succeeded += 1;
        self.last_success = Some(Instant::now());
    }

    pub(crate) fn record_failure(&mut self, error: &str) {
        self.failed += 1;
        self.last_error = Some(error.to_string());
    }

    pub(crate) fn record_remote_applied(&mut self) {
        self.remote_applied += 1;
    }
}

/// Result of replaying a pending queue.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplayReport {
    /// Records submitted to the remote.
    pub submitted: usize,
    /// Submissions that succeeded.
    pub succeeded: usize,
    /// Submissions that failed.
    pub failed: usize,
    /// Records left untried because the replay stopped at a failure.
    pub skipped: usize,
}

impl ReplayReport {
    /// Returns true if every pending record was submitted successfully.
    pub fn is_complete(&self) -> bool {
        self.failed == 0 && self.skipped == 0
    }
}
