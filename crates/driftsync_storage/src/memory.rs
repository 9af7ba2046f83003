//! In-memory store backend for testing.

use crate::backend::{StoreBackend, StoreTransaction};
use crate::error::{StorageError, StorageResult};
use crate::row::{RowKey, RowQuery, StoredRow};
use crate::table::{self, Table, WriteSet};
use parking_lot::{Mutex, MutexGuard, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};

/// An in-memory store backend.
///
/// This backend keeps all rows in memory and is suitable for:
/// - Unit tests
/// - Integration tests
/// - Ephemeral caches that don't need persistence
///
/// # Thread Safety
///
/// This backend is thread-safe and can be shared across threads. Writers are
/// serialized by an internal writer lock held for a transaction's lifetime.
///
/// # Example
///
/// ```rust
/// use driftsync_storage::{InMemoryStore, RowKey, StoreBackend, StoredRow};
///
/// let store = InMemoryStore::new();
/// let mut txn = store.begin_transaction().unwrap();
/// txn.upsert(StoredRow::new("notes", "a1", 1, 0, Vec::new())).unwrap();
/// txn.commit().unwrap();
/// assert!(store.get(&RowKey::new("notes", "a1")).unwrap().is_some());
/// ```
#[derive(Debug, Default)]
pub struct InMemoryStore {
    rows: RwLock<Table>,
    writer: Mutex<()>,
    fail_commits: AtomicBool,
}

impl InMemoryStore {
    /// Creates a new empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-populated with rows.
    #[must_use]
    pub fn with_rows(rows: Vec<StoredRow>) -> Self {
        let table = rows.into_iter().map(|row| (row.key(), row)).collect();
        Self {
            rows: RwLock::new(table),
            ..Self::default()
        }
    }

    /// Returns a copy of every row, ordered by key.
    #[must_use]
    pub fn rows(&self) -> Vec<StoredRow> {
        self.rows.read().values().cloned().collect()
    }

    /// Returns the total number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    /// Returns true if the store holds no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }

    /// Makes every subsequent commit fail until switched off.
    ///
    /// Used to exercise storage failure paths.
    pub fn set_fail_commits(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::SeqCst);
    }
}

impl StoreBackend for InMemoryStore {
    fn begin_transaction(&self) -> StorageResult<Box<dyn StoreTransaction + '_>> {
        let guard = self.writer.lock();
        Ok(Box::new(MemoryTransaction {
            store: self,
            _guard: guard,
            writes: WriteSet::default(),
            finished: false,
        }))
    }

    fn query(&self, query: &RowQuery) -> StorageResult<Vec<StoredRow>> {
        Ok(query.apply(self.rows.read().values()))
    }

    fn get(&self, key: &RowKey) -> StorageResult<Option<StoredRow>> {
        Ok(self.rows.read().get(key).cloned())
    }

    fn collections(&self) -> StorageResult<Vec<String>> {
        Ok(table::collections(&self.rows.read()))
    }
}

struct MemoryTransaction<'a> {
    store: &'a InMemoryStore,
    _guard: MutexGuard<'a, ()>,
    writes: WriteSet,
    finished: bool,
}

impl StoreTransaction for MemoryTransaction<'_> {
    fn upsert(&mut self, row: StoredRow) -> StorageResult<()> {
        self.writes.upsert(row);
        Ok(())
    }

    fn delete(&mut self, key: &RowKey) -> StorageResult<()> {
        self.writes.delete(key);
        Ok(())
    }

    fn query(&self, query: &RowQuery) -> StorageResult<Vec<StoredRow>> {
        Ok(self.writes.query_overlay(&self.store.rows.read(), query))
    }

    fn write_count(&self) -> usize {
        self.writes.len()
    }

    fn commit(mut self: Box<Self>) -> StorageResult<()> {
        self.finished = true;
        if self.store.fail_commits.load(Ordering::SeqCst) {
            return Err(StorageError::commit_failed("commit failure injected"));
        }
        let writes = std::mem::take(&mut self.writes);
        writes.apply_to(&mut self.store.rows.write());
        Ok(())
    }
}

impl Drop for MemoryTransaction<'_> {
    fn drop(&mut self) {
        if !self.finished && !self.writes.is_empty() {
            tracing::debug!(writes = self.writes.len(), "transaction rolled back");
        }
    }
}
