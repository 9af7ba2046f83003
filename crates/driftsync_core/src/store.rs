//! Transactional adapter between records and a store backend.

use crate::error::CoreResult;
use crate::record::{Record, Row};
use crate::status::SyncStatus;
use driftsync_storage::{RowKey, RowQuery, SortDirection, SortField, StoreBackend};
use std::sync::Arc;

/// Outcome of [`LocalStore::clear_pending`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClearPendingReport {
    /// `NotSynced` rows deleted.
    pub discarded: usize,
    /// `DeletePending` rows reverted to `Synced`.
    pub reverted: usize,
}

/// The local store adapter.
///
/// Every write goes through one backend transaction. If mapping a record to
/// rows or any write fails, the transaction is dropped and nothing of the
/// batch is applied, so the caller may retry the whole call.
///
/// Cloning is cheap; clones share the backend.
#[derive(Debug)]
pub struct LocalStore<B: StoreBackend> {
    backend: Arc<B>,
}

impl<B: StoreBackend> Clone for LocalStore<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
        }
    }
}

impl<B: StoreBackend> LocalStore<B> {
    /// Creates an adapter owning `backend`.
    pub fn new(backend: B) -> Self {
        Self {
            backend: Arc::new(backend),
        }
    }

    /// Creates an adapter over a shared backend.
    pub fn from_arc(backend: Arc<B>) -> Self {
        Self { backend }
    }

    /// Returns the underlying backend.
    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    /// Writes `records` at `status` in a single transaction.
    ///
    /// `DeleteSynced` removes every row the records map to; any other status
    /// upserts them. Returns the number of rows written or removed.
    ///
    /// # Errors
    ///
    /// Returns an error if a record cannot be mapped to rows or the storage
    /// transaction fails. Nothing is applied in that case.
    pub fn persist<R: Record>(&self, records: &[R], status: SyncStatus) -> CoreResult<usize> {
        let mut txn = self.backend.begin_transaction()?;
        let mut written = 0;

        for record in records {
            for row in record.to_rows(status)? {
                if status.is_resident() {
                    txn.upsert(row.with_status(status).into_stored())?;
                } else {
                    txn.delete(&row.key())?;
                }
                written += 1;
            }
        }

        txn.commit()?;
        tracing::debug!(
            collection = R::COLLECTION,
            records = records.len(),
            rows = written,
            %status,
            "persisted records"
        );
        Ok(written)
    }

    /// Writes `records` at `status`, skipping every record whose stored
    /// status satisfies `keep`.
    ///
    /// The status check and the writes share one transaction, so a local
    /// write cannot land between them. Records with no stored row are
    /// written. Returns the ids of the skipped records.
    ///
    /// # Errors
    ///
    /// Returns an error if a stored row carries an unknown status code, a
    /// record cannot be mapped to rows, or the transaction fails. Nothing is
    /// applied in that case.
    pub fn persist_unless<R, F>(
        &self,
        records: &[R],
        status: SyncStatus,
        keep: F,
    ) -> CoreResult<Vec<String>>
    where
        R: Record,
        F: Fn(SyncStatus) -> bool,
    {
        let mut txn = self.backend.begin_transaction()?;
        let mut kept = Vec::new();
        let mut written = 0;

        for record in records {
            if let Some(current) = txn.get(&RowKey::new(R::COLLECTION, record.id()))? {
                if keep(Row::from_stored(current)?.status) {
                    kept.push(record.id().to_string());
                    continue;
                }
            }
            for row in record.to_rows(status)? {
                if status.is_resident() {
                    txn.upsert(row.with_status(status).into_stored())?;
                } else {
                    txn.delete(&row.key())?;
                }
                written += 1;
            }
        }

        txn.commit()?;
        tracing::debug!(
            collection = R::COLLECTION,
            records = records.len(),
            kept = kept.len(),
            rows = written,
            %status,
            "persisted records"
        );
        Ok(kept)
    }

    /// Writes a single record at `status`.
    ///
    /// # Errors
    ///
    /// See [`LocalStore::persist`].
    pub fn persist_one<R: Record>(&self, record: &R, status: SyncStatus) -> CoreResult<usize> {
        self.persist(std::slice::from_ref(record), status)
    }

    /// Returns the rows of `collection` at `status`, ordered.
    ///
    /// Replay reads ascending by request time (oldest first); UI binding
    /// reads descending.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend query fails or a row carries an
    /// unknown status code.
    pub fn query_by_status(
        &self,
        collection: &str,
        status: SyncStatus,
        order_by: SortField,
        direction: SortDirection,
    ) -> CoreResult<Vec<Row>> {
        let query = RowQuery::collection(collection)
            .with_status(status.code())
            .order_by(order_by, direction);
        self.run(&query)
    }

    /// Loads the records of type `R` at `status`, ordered by request time.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or a row cannot be rehydrated.
    pub fn load<R: Record>(&self, status: SyncStatus, direction: SortDirection) -> CoreResult<Vec<R>> {
        self.query_by_status(R::COLLECTION, status, SortField::RequestTime, direction)?
            .iter()
            .map(R::from_row)
            .collect()
    }

    /// Loads every resident record of type `R` with its status.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or a row cannot be rehydrated.
    pub fn load_resident<R: Record>(
        &self,
        direction: SortDirection,
    ) -> CoreResult<Vec<(R, SyncStatus)>> {
        let query =
            RowQuery::collection(R::COLLECTION).order_by(SortField::RequestTime, direction);
        self.run(&query)?
            .iter()
            .map(|row| Ok((R::from_row(row)?, row.status)))
            .collect()
    }

    /// Returns one row by key.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend read fails.
    pub fn get(&self, collection: &str, id: &str) -> CoreResult<Option<Row>> {
        self.backend
            .get(&RowKey::new(collection, id))?
            .map(Row::from_stored)
            .transpose()
    }

    /// Counts the rows of `collection`, optionally at one status.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend query fails.
    pub fn count(&self, collection: &str, status: Option<SyncStatus>) -> CoreResult<usize> {
        let mut query = RowQuery::collection(collection);
        if let Some(status) = status {
            query = query.with_status(status.code());
        }
        Ok(self.backend.query(&query)?.len())
    }

    /// Abandons the uncertain pending states of `collection`.
    ///
    /// `NotSynced` rows are deleted and `DeletePending` rows revert to
    /// `Synced`. `UpdatePending` rows are left untouched.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction fails; nothing is applied then.
    pub fn clear_pending(&self, collection: &str) -> CoreResult<ClearPendingReport> {
        let mut txn = self.backend.begin_transaction()?;

        let unsent =
            txn.query(&RowQuery::collection(collection).with_status(SyncStatus::NotSynced.code()))?;
        for row in &unsent {
            txn.delete(&row.key())?;
        }

        let deletes = txn
            .query(&RowQuery::collection(collection).with_status(SyncStatus::DeletePending.code()))?;
        let reverted = deletes.len();
        for mut row in deletes {
            row.status = SyncStatus::Synced.code();
            txn.upsert(row)?;
        }

        txn.commit()?;
        let report = ClearPendingReport {
            discarded: unsent.len(),
            reverted,
        };
        tracing::debug!(
            collection,
            discarded = report.discarded,
            reverted = report.reverted,
            "cleared pending rows"
        );
        Ok(report)
    }

    /// Deletes every row of `collection`. Returns the number removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction fails; nothing is applied then.
    pub fn clear_all(&self, collection: &str) -> CoreResult<usize> {
        let mut txn = self.backend.begin_transaction()?;
        let rows = txn.query(&RowQuery::collection(collection))?;
        for row in &rows {
            txn.delete(&row.key())?;
        }
        txn.commit()?;
        tracing::debug!(collection, removed = rows.len(), "cleared collection");
        Ok(rows.len())
    }

    fn run(&self, query: &RowQuery) -> CoreResult<Vec<Row>> {
        self.backend
            .query(query)?
            .into_iter()
            .map(Row::from_stored)
            .collect()
    }
}
