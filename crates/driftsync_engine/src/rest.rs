//! Request/response sync manager.
//!
//! Every mutation follows the same steps, parameterized by the operation's
//! `(status_before, status_after)` pair:
//!
//! 1. persist the local record at `status_before`
//! 2. run the remote call
//! 3. on success persist the server copy at `status_after` and notify
//! 4. on failure notify; the record stays at `status_before` for a later
//!    replay
//!
//! The blocking and the callback-driven variants share this path and differ
//! only in where the caller waits.

use crate::config::RestConfig;
use crate::connectivity::{AlwaysOnline, Connectivity};
use crate::error::{SyncError, SyncResult};
use crate::notification::{CorrelationId, ManagerId, NotificationSink, SyncNotification};
use crate::stats::{ReplayReport, SyncStats};
use driftsync_core::{
    LocalStore, PendingQueue, Record, SortDirection, SyncOperation, SyncStatus,
};
use driftsync_protocol::{RemoteCall, RemoteError, RemoteResult};
use driftsync_storage::StoreBackend;
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::oneshot;

/// State shared with in-flight completion callbacks.
struct RestShared<B: StoreBackend> {
    id: ManagerId,
    store: LocalStore<B>,
    sink: Arc<dyn NotificationSink>,
    stats: RwLock<SyncStats>,
}

impl<B: StoreBackend> RestShared<B> {
    fn complete<R: Record>(
        &self,
        correlation: CorrelationId,
        operation: SyncOperation,
        id: &str,
        result: RemoteResult<R>,
    ) -> SyncResult<R> {
        let server = match result {
            Ok(server) => server,
            Err(err) => {
                let err = SyncError::Remote(err);
                self.fail::<R>(correlation, operation, id, &err);
                return Err(err);
            }
        };

        if let Err(err) = self.store.persist_one(&server, operation.status_after()) {
            let err = SyncError::from(err);
            self.fail::<R>(correlation, operation, id, &err);
            return Err(err);
        }

        tracing::info!(
            manager = %self.id,
            %correlation,
            collection = R::COLLECTION,
            id,
            %operation,
            "remote acknowledged"
        );
        self.stats.write().record_success();
        self.sink.notify(SyncNotification::SyncSucceeded {
            manager: self.id,
            correlation,
            collection: R::COLLECTION.to_string(),
            id: id.to_string(),
            operation,
        });
        Ok(server)
    }

    fn fail<R: Record>(
        &self,
        correlation: CorrelationId,
        operation: SyncOperation,
        id: &str,
        err: &SyncError,
    ) {
        if err.is_protocol() {
            tracing::warn!(
                kind = "protocol",
                manager = %self.id,
                %correlation,
                collection = R::COLLECTION,
                id,
                %operation,
                error = %err,
                "sync failed"
            );
        } else {
            tracing::warn!(
                manager = %self.id,
                %correlation,
                collection = R::COLLECTION,
                id,
                %operation,
                error = %err,
                "sync failed"
            );
        }

        let message = err.to_string();
        self.stats.write().record_failure(&message);
        self.sink.notify(SyncNotification::SyncFailed {
            manager: self.id,
            correlation,
            collection: R::COLLECTION.to_string(),
            id: id.to_string(),
            operation,
            error: message,
            retryable: err.is_retryable(),
        });
    }
}

/// Drives create/update/delete operations against a request/response remote.
///
/// The remote is expected to answer a mutation with its copy of the record,
/// under the same id.
///
/// # Example
///
/// ```rust
/// use driftsync_core::{CoreResult, LocalStore, Record, Row, SyncStatus};
/// use driftsync_engine::{MockCall, RecordingSink, RestSyncManager};
/// use driftsync_storage::InMemoryStore;
/// use serde::{Deserialize, Serialize};
/// use std::sync::Arc;
///
/// #[derive(Clone, Serialize, Deserialize)]
/// struct Note {
///     id: String,
///     request_time: i64,
/// }
///
/// impl Record for Note {
///     const COLLECTION: &'static str = "notes";
///     fn id(&self) -> &str { &self.id }
///     fn request_time(&self) -> i64 { self.request_time }
///     fn to_rows(&self, status: SyncStatus) -> CoreResult<Vec<Row>> {
///         Ok(vec![Row::for_record(self, status)?])
///     }
///     fn from_row(row: &Row) -> CoreResult<Self> { row.decode() }
/// }
///
/// let store = LocalStore::new(InMemoryStore::new());
/// let sink = Arc::new(RecordingSink::new());
/// let manager = RestSyncManager::new(store.clone(), sink.clone());
///
/// let note = Note { id: "a1".into(), request_time: 1000 };
/// manager.create_sync(MockCall::ok(note.clone()), &note).unwrap();
///
/// let row = store.get("notes", "a1").unwrap().unwrap();
/// assert_eq!(row.status, SyncStatus::Synced);
/// assert_eq!(sink.succeeded().len(), 1);
/// ```
pub struct RestSyncManager<B: StoreBackend> {
    shared: Arc<RestShared<B>>,
    queue: PendingQueue<B>,
    connectivity: Arc<dyn Connectivity>,
    config: RestConfig,
}

impl<B: StoreBackend + 'static> RestSyncManager<B> {
    /// Creates a manager that always attempts the remote.
    pub fn new(store: LocalStore<B>, sink: Arc<dyn NotificationSink>) -> Self {
        let id = ManagerId::new();
        tracing::debug!(manager = %id, "rest sync manager created");
        Self {
            queue: PendingQueue::new(store.clone()),
            shared: Arc::new(RestShared {
                id,
                store,
                sink,
                stats: RwLock::new(SyncStats::default()),
            }),
            connectivity: Arc::new(AlwaysOnline),
            config: RestConfig::default(),
        }
    }

    /// Consults `connectivity` before every remote round-trip.
    #[must_use]
    pub fn with_connectivity(mut self, connectivity: Arc<dyn Connectivity>) -> Self {
        self.connectivity = connectivity;
        self
    }

    /// Sets the configuration.
    #[must_use]
    pub fn with_config(mut self, config: RestConfig) -> Self {
        self.config = config;
        self
    }

    /// Returns this manager's id.
    pub fn id(&self) -> ManagerId {
        self.shared.id
    }

    /// Returns the local store.
    pub fn store(&self) -> &LocalStore<B> {
        &self.shared.store
    }

    /// Returns the configuration.
    pub fn config(&self) -> &RestConfig {
        &self.config
    }

    /// Returns a snapshot of the statistics.
    pub fn stats(&self) -> SyncStats {
        self.shared.stats.read().clone()
    }

    /// Runs `operation` for `record`, blocking until the remote answers.
    ///
    /// Returns the server copy, which is persisted at the operation's
    /// `status_after`.
    ///
    /// # Errors
    ///
    /// On any failure exactly one `SyncFailed` notification is emitted and
    /// the record is left at `status_before` (or at its prior status if the
    /// optimistic write itself failed).
    pub fn exec_sync<C, R>(&self, call: C, record: &R, operation: SyncOperation) -> SyncResult<R>
    where
        C: RemoteCall<Response = R>,
        R: Record,
    {
        let correlation = CorrelationId::new();
        self.prepare(record, operation, correlation)?;
        let result = call.execute();
        self.shared
            .complete(correlation, operation, record.id(), result)
    }

    /// Creates `record` remotely, blocking.
    ///
    /// # Errors
    ///
    /// See [`RestSyncManager::exec_sync`].
    pub fn create_sync<C, R>(&self, call: C, record: &R) -> SyncResult<R>
    where
        C: RemoteCall<Response = R>,
        R: Record,
    {
        self.exec_sync(call, record, SyncOperation::Create)
    }

    /// Updates `record` remotely, blocking.
    ///
    /// # Errors
    ///
    /// See [`RestSyncManager::exec_sync`].
    pub fn update_sync<C, R>(&self, call: C, record: &R) -> SyncResult<R>
    where
        C: RemoteCall<Response = R>,
        R: Record,
    {
        self.exec_sync(call, record, SyncOperation::Update)
    }

    /// Deletes `record` remotely, blocking. On success its rows are removed.
    ///
    /// # Errors
    ///
    /// See [`RestSyncManager::exec_sync`].
    pub fn delete_sync<C, R>(&self, call: C, record: &R) -> SyncResult<R>
    where
        C: RemoteCall<Response = R>,
        R: Record,
    {
        self.exec_sync(call, record, SyncOperation::Delete)
    }

    /// Runs `operation` for `record` without blocking on the remote.
    ///
    /// The optimistic write happens before this returns. `on_complete` runs
    /// exactly once: on the transport's thread when the call finishes, or on
    /// the caller's thread if the call could not be issued.
    pub fn exec_async<C, R, F>(
        &self,
        call: C,
        record: &R,
        operation: SyncOperation,
        on_complete: F,
    ) -> CorrelationId
    where
        C: RemoteCall<Response = R>,
        R: Record + Send + 'static,
        F: FnOnce(SyncResult<R>) + Send + 'static,
    {
        let correlation = CorrelationId::new();
        if let Err(err) = self.prepare(record, operation, correlation) {
            on_complete(Err(err));
            return correlation;
        }

        let shared = Arc::clone(&self.shared);
        let id = record.id().to_string();
        call.enqueue(Box::new(move |result: RemoteResult<R>| {
            on_complete(shared.complete(correlation, operation, &id, result));
        }));
        correlation
    }

    /// Creates `record` remotely without blocking.
    pub fn create_async<C, R, F>(&self, call: C, record: &R, on_complete: F) -> CorrelationId
    where
        C: RemoteCall<Response = R>,
        R: Record + Send + 'static,
        F: FnOnce(SyncResult<R>) + Send + 'static,
    {
        self.exec_async(call, record, SyncOperation::Create, on_complete)
    }

    /// Updates `record` remotely without blocking.
    pub fn update_async<C, R, F>(&self, call: C, record: &R, on_complete: F) -> CorrelationId
    where
        C: RemoteCall<Response = R>,
        R: Record + Send + 'static,
        F: FnOnce(SyncResult<R>) + Send + 'static,
    {
        self.exec_async(call, record, SyncOperation::Update, on_complete)
    }

    /// Deletes `record` remotely without blocking.
    pub fn delete_async<C, R, F>(&self, call: C, record: &R, on_complete: F) -> CorrelationId
    where
        C: RemoteCall<Response = R>,
        R: Record + Send + 'static,
        F: FnOnce(SyncResult<R>) + Send + 'static,
    {
        self.exec_async(call, record, SyncOperation::Delete, on_complete)
    }

    /// Runs `operation` for `record` and awaits the outcome.
    ///
    /// # Errors
    ///
    /// See [`RestSyncManager::exec_sync`].
    pub async fn exec_future<C, R>(
        &self,
        call: C,
        record: &R,
        operation: SyncOperation,
    ) -> SyncResult<R>
    where
        C: RemoteCall<Response = R>,
        R: Record + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.exec_async(call, record, operation, move |result| {
            // The receiver is gone only if the awaiting task was dropped.
            let _ = tx.send(result);
        });
        rx.await
            .unwrap_or(Err(SyncError::Remote(RemoteError::Cancelled)))
    }

    /// Hands every `R` at `status_before`, oldest first, to `replay`.
    ///
    /// # Errors
    ///
    /// Returns an error if the pending records cannot be read.
    pub fn execute_pending<R, F, T>(&self, status_before: SyncStatus, replay: F) -> SyncResult<T>
    where
        R: Record,
        F: FnOnce(Vec<R>) -> T,
    {
        Ok(self.queue.execute_pending(status_before, replay)?)
    }

    /// Resubmits every record pending for `operation`, oldest first, one at
    /// a time.
    ///
    /// `make_call` builds the remote call for each record. With
    /// [`RestConfig::stop_replay_on_failure`] the replay stops at the first
    /// failure and the rest stay pending untried.
    ///
    /// # Errors
    ///
    /// Returns an error if the pending records cannot be read. Failures of
    /// individual submissions are counted in the report.
    pub fn replay_pending<R, C, F>(
        &self,
        operation: SyncOperation,
        mut make_call: F,
    ) -> SyncResult<ReplayReport>
    where
        R: Record,
        C: RemoteCall<Response = R>,
        F: FnMut(&R) -> C,
    {
        let records: Vec<R> = self.queue.collect(operation.status_before())?;
        let total = records.len();
        let mut report = ReplayReport::default();

        for (index, record) in records.iter().enumerate() {
            report.submitted += 1;
            match self.exec_sync(make_call(record), record, operation) {
                Ok(_) => report.succeeded += 1,
                Err(_) => {
                    report.failed += 1;
                    if self.config.stop_replay_on_failure {
                        report.skipped = total - index - 1;
                        break;
                    }
                }
            }
        }

        tracing::debug!(
            manager = %self.shared.id,
            collection = R::COLLECTION,
            %operation,
            submitted = report.submitted,
            succeeded = report.succeeded,
            failed = report.failed,
            skipped = report.skipped,
            "pending replay finished"
        );
        Ok(report)
    }

    /// Loads the list of `R`, from the remote when the network allows.
    ///
    /// When connectivity says to load locally, the stored rows are returned
    /// without a remote call. Otherwise the remote list is stored as
    /// `Synced`, except for records with a local pending change, which keep
    /// it. If the remote call fails a `RefreshFailed` notification is emitted
    /// and the stored rows are returned. Rows come back newest first.
    ///
    /// # Errors
    ///
    /// Returns an error only if the local store fails.
    pub fn refresh<C, R>(&self, call: C) -> SyncResult<Vec<(R, SyncStatus)>>
    where
        C: RemoteCall<Response = Vec<R>>,
        R: Record,
    {
        let store = &self.shared.store;
        if self.connectivity.should_load_local() {
            tracing::debug!(collection = R::COLLECTION, "serving local rows");
            return Ok(store.load_resident(SortDirection::Descending)?);
        }

        let correlation = CorrelationId::new();
        match call.execute() {
            Ok(remote) => {
                let kept = store.persist_unless(&remote, SyncStatus::Synced, |s| s.is_pending())?;
                tracing::debug!(
                    collection = R::COLLECTION,
                    refreshed = remote.len() - kept.len(),
                    kept = kept.len(),
                    "refreshed from remote"
                );
            }
            Err(err) => {
                if err.is_protocol() {
                    tracing::warn!(kind = "protocol", collection = R::COLLECTION, error = %err, "refresh failed");
                } else {
                    tracing::warn!(collection = R::COLLECTION, error = %err, "refresh failed");
                }
                self.shared.sink.notify(SyncNotification::RefreshFailed {
                    manager: self.shared.id,
                    correlation,
                    collection: R::COLLECTION.to_string(),
                    error: err.to_string(),
                });
            }
        }

        Ok(store.load_resident(SortDirection::Descending)?)
    }

    /// Writes `record` at `status_before` and checks the network.
    fn prepare<R: Record>(
        &self,
        record: &R,
        operation: SyncOperation,
        correlation: CorrelationId,
    ) -> SyncResult<()> {
        let result = self
            .shared
            .store
            .persist_one(record, operation.status_before())
            .map_err(SyncError::from)
            .and_then(|_| {
                if self.connectivity.is_online() {
                    Ok(())
                } else {
                    Err(SyncError::Offline)
                }
            });

        if let Err(err) = &result {
            self.shared.fail::<R>(correlation, operation, record.id(), err);
        }
        result
    }
}

impl<B: StoreBackend> std::fmt::Debug for RestSyncManager<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestSyncManager")
            .field("id", &self.shared.id)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
