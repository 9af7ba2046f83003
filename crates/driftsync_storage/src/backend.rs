//! Store backend and transaction traits.

use crate::error::StorageResult;
use crate::row::{RowKey, RowQuery, StoredRow};

/// A transactional, key-indexed row store.
///
/// Backends hold **opaque rows**. They index rows by [`RowKey`], filter on the
/// status code and order on `request_time` or `id`, but never decode bodies.
///
/// # Invariants
///
/// - At most one [`StoreTransaction`] is open at a time; `begin_transaction`
///   blocks until the current writer finishes
/// - Writes of a transaction become visible together on `commit`, or not at all
/// - Dropping a transaction without committing discards its writes and releases
///   the writer lock
/// - Backends must be `Send + Sync` for access from transport callback threads
///
/// # Implementors
///
/// - [`super::InMemoryStore`] - For testing
/// - [`super::FileStore`] - For persistent storage
pub trait StoreBackend: Send + Sync {
    /// Begins an exclusive write transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend can no longer accept writes.
    fn begin_transaction(&self) -> StorageResult<Box<dyn StoreTransaction + '_>>;

    /// Reads committed rows matching `query`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    fn query(&self, query: &RowQuery) -> StorageResult<Vec<StoredRow>>;

    /// Reads a single committed row.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    fn get(&self, key: &RowKey) -> StorageResult<Option<StoredRow>>;

    /// Lists the collections that currently hold at least one row.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    fn collections(&self) -> StorageResult<Vec<String>>;
}

/// An exclusive write transaction.
///
/// Reads through a transaction see committed rows overlaid with the
/// transaction's own pending writes.
pub trait StoreTransaction {
    /// Inserts a row, or replaces the row with the same key.
    fn upsert(&mut self, row: StoredRow) -> StorageResult<()>;

    /// Deletes the row with `key`. Deleting a missing row is not an error.
    fn delete(&mut self, key: &RowKey) -> StorageResult<()>;

    /// Reads rows as this transaction currently sees them.
    fn query(&self, query: &RowQuery) -> StorageResult<Vec<StoredRow>>;

    /// Reads one row as this transaction currently sees it.
    fn get(&self, key: &RowKey) -> StorageResult<Option<StoredRow>> {
        Ok(self
            .query(&RowQuery::collection(key.collection.clone()))?
            .into_iter()
            .find(|row| row.id == key.id))
    }

    /// Returns the number of pending writes.
    fn write_count(&self) -> usize;

    /// Atomically applies all pending writes.
    ///
    /// # Errors
    ///
    /// On error nothing was applied and the store keeps its pre-transaction state.
    fn commit(self: Box<Self>) -> StorageResult<()>;
}
