//! Replay surface for records awaiting a remote acknowledgement.

use crate::error::CoreResult;
use crate::record::Record;
use crate::status::SyncStatus;
use crate::store::LocalStore;
use driftsync_storage::{SortDirection, StoreBackend};

/// Selects pending records and hands them, oldest first, to a replay function.
///
/// The queue knows what needs redoing, not how: the replay function decides
/// how each record is resubmitted.
#[derive(Debug)]
pub struct PendingQueue<B: StoreBackend> {
    store: LocalStore<B>,
}

impl<B: StoreBackend> Clone for PendingQueue<B> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
        }
    }
}

impl<B: StoreBackend> PendingQueue<B> {
    /// Creates a queue over `store`.
    pub fn new(store: LocalStore<B>) -> Self {
        Self { store }
    }

    /// Returns the underlying store.
    pub fn store(&self) -> &LocalStore<B> {
        &self.store
    }

    /// Rehydrates every `R` at `status_before`, ordered by request time,
    /// oldest first. Ties are broken by id.
    ///
    /// Reading does not change any status, so repeated calls without an
    /// intervening acknowledgement return the same list.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or a row cannot be rehydrated.
    pub fn collect<R: Record>(&self, status_before: SyncStatus) -> CoreResult<Vec<R>> {
        self.store.load(status_before, SortDirection::Ascending)
    }

    /// Collects the records at `status_before` and passes them to `replay`.
    ///
    /// # Errors
    ///
    /// Returns an error if collecting fails; `replay` is not called then.
    pub fn execute_pending<R, F, T>(&self, status_before: SyncStatus, replay: F) -> CoreResult<T>
    where
        R: Record,
        F: FnOnce(Vec<R>) -> T,
    {
        let records = self.collect::<R>(status_before)?;
        tracing::debug!(
            collection = R::COLLECTION,
            %status_before,
            count = records.len(),
            "replaying pending records"
        );
        Ok(replay(records))
    }

    /// Returns the number of `collection` rows at `status`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend query fails.
    pub fn len(&self, collection: &str, status: SyncStatus) -> CoreResult<usize> {
        self.store.count(collection, Some(status))
    }

    /// Returns the number of `collection` rows at any pending status.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend query fails.
    pub fn total(&self, collection: &str) -> CoreResult<usize> {
        SyncStatus::PENDING
            .iter()
            .map(|status| self.len(collection, *status))
            .sum()
    }
}
