//! Sync status state machine.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Synchronization state of a locally stored record.
///
/// Exactly one status per record at any instant. The numeric codes are the
/// ones written to the store and must never be renumbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyncStatus {
    /// Created locally, not yet acknowledged by the remote.
    NotSynced,
    /// Acknowledged by the remote.
    Synced,
    /// Deleted locally, delete not yet acknowledged.
    DeletePending,
    /// Delete acknowledged; the row is removed, never kept as a tombstone.
    DeleteSynced,
    /// Updated locally, update not yet acknowledged.
    UpdatePending,
    /// Update acknowledged by the remote.
    UpdateSynced,
}

impl SyncStatus {
    /// All statuses, in code order.
    pub const ALL: [SyncStatus; 6] = [
        SyncStatus::NotSynced,
        SyncStatus::Synced,
        SyncStatus::DeletePending,
        SyncStatus::DeleteSynced,
        SyncStatus::UpdatePending,
        SyncStatus::UpdateSynced,
    ];

    /// The three statuses that await a remote acknowledgement.
    pub const PENDING: [SyncStatus; 3] = [
        SyncStatus::NotSynced,
        SyncStatus::UpdatePending,
        SyncStatus::DeletePending,
    ];

    /// Converts to the numeric code stored in rows.
    pub fn code(&self) -> u8 {
        match self {
            SyncStatus::NotSynced => 0,
            SyncStatus::Synced => 1,
            SyncStatus::DeletePending => 2,
            SyncStatus::DeleteSynced => 3,
            SyncStatus::UpdatePending => 4,
            SyncStatus::UpdateSynced => 5,
        }
    }

    /// Converts from a stored numeric code.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(SyncStatus::NotSynced),
            1 => Some(SyncStatus::Synced),
            2 => Some(SyncStatus::DeletePending),
            3 => Some(SyncStatus::DeleteSynced),
            4 => Some(SyncStatus::UpdatePending),
            5 => Some(SyncStatus::UpdateSynced),
            _ => None,
        }
    }

    /// Returns true for the statuses that await a remote acknowledgement.
    pub fn is_pending(&self) -> bool {
        matches!(
            self,
            SyncStatus::NotSynced | SyncStatus::DeletePending | SyncStatus::UpdatePending
        )
    }

    /// Returns true if a record at this status stays in the store.
    pub fn is_resident(&self) -> bool {
        !matches!(self, SyncStatus::DeleteSynced)
    }

    /// Returns the status a pending status advances to on acknowledgement.
    ///
    /// Non-pending statuses map to themselves.
    pub fn synced_counterpart(&self) -> SyncStatus {
        match self {
            SyncStatus::NotSynced => SyncStatus::Synced,
            SyncStatus::DeletePending => SyncStatus::DeleteSynced,
            SyncStatus::UpdatePending => SyncStatus::UpdateSynced,
            other => *other,
        }
    }

    /// Returns the operation whose intent this pending status records.
    pub fn operation(&self) -> Option<SyncOperation> {
        match self {
            SyncStatus::NotSynced => Some(SyncOperation::Create),
            SyncStatus::UpdatePending => Some(SyncOperation::Update),
            SyncStatus::DeletePending => Some(SyncOperation::Delete),
            _ => None,
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncStatus::NotSynced => "not-synced",
            SyncStatus::Synced => "synced",
            SyncStatus::DeletePending => "delete-pending",
            SyncStatus::DeleteSynced => "delete-synced",
            SyncStatus::UpdatePending => "update-pending",
            SyncStatus::UpdateSynced => "update-synced",
        };
        f.write_str(name)
    }
}

/// A mutation kind, identified by its `(before, after)` status pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncOperation {
    /// Create a record.
    Create,
    /// Update a record.
    Update,
    /// Delete a record.
    Delete,
}

impl SyncOperation {
    /// Every operation, in replay order.
    pub const ALL: [SyncOperation; 3] = [
        SyncOperation::Create,
        SyncOperation::Update,
        SyncOperation::Delete,
    ];

    /// Status persisted optimistically before the remote call.
    pub fn status_before(&self) -> SyncStatus {
        match self {
            SyncOperation::Create => SyncStatus::NotSynced,
            SyncOperation::Update => SyncStatus::UpdatePending,
            SyncOperation::Delete => SyncStatus::DeletePending,
        }
    }

    /// Status persisted once the remote acknowledges.
    pub fn status_after(&self) -> SyncStatus {
        self.status_before().synced_counterpart()
    }

    /// Returns the `(before, after)` pair.
    pub fn statuses(&self) -> (SyncStatus, SyncStatus) {
        (self.status_before(), self.status_after())
    }
}

impl fmt::Display for SyncOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncOperation::Create => f.write_str("create"),
            SyncOperation::Update => f.write_str("update"),
            SyncOperation::Delete => f.write_str("delete"),
        }
    }
}
