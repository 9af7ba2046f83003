//! Realtime sync manager.
//!
//! Mutations are fire-and-wait-for-echo: the manager stamps the local record
//! with its pending status and writes it to the remote collection, and only
//! the child event the remote echoes back advances the record to its synced
//! counterpart:
//!
//! ```text
//! child added   -> Synced
//! child changed -> UpdateSynced
//! child removed -> DeleteSynced (row removed)
//! ```
//!
//! The remote's acceptance of a write is not an acknowledgement.

use crate::config::RealtimeConfig;
use crate::error::{SyncError, SyncResult};
use crate::notification::{CorrelationId, ManagerId, NotificationSink, SyncNotification};
use crate::stats::{ReplayReport, SyncStats};
use driftsync_core::{LocalStore, PendingQueue, Record, SortDirection, SyncOperation, SyncStatus};
use driftsync_protocol::{
    AuthData, ChildListener, ListenerId, RealtimeRemote, RemoteError, RemoteResult, Snapshot,
};
use driftsync_storage::StoreBackend;
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::marker::PhantomData;
use std::sync::{Arc, Weak};

/// Lifecycle of a [`RealtimeSyncManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RealtimeState {
    /// Constructed; nothing attached.
    Created,
    /// Waiting for the auth handshake.
    Authenticating,
    /// The handshake failed. Call `start` again to retry.
    AuthFailed,
    /// The change listener is attached.
    Subscribed,
    /// The listener was detached by `stop` or by the remote.
    Unsubscribed,
}

impl RealtimeState {
    /// Returns true while the change listener is attached.
    pub fn is_subscribed(&self) -> bool {
        matches!(self, RealtimeState::Subscribed)
    }
}

/// Single-owner state guarded by one lock. Never held across a remote call.
struct ManagerState {
    lifecycle: RealtimeState,
    /// Set once a handshake succeeds. Independent of the listener.
    authenticated: bool,
    listener: Option<ListenerId>,
    pages: Vec<ListenerId>,
    /// Local id to server-assigned key.
    keys: HashMap<String, String>,
    /// Writes waiting for their echo, oldest first per local id.
    in_flight: HashMap<String, VecDeque<(CorrelationId, SyncOperation)>>,
}

impl ManagerState {
    /// Removes and returns the writes an echo at `status` settles: the
    /// oldest write expecting `status` and every older write it overtook.
    fn settle(&mut self, id: &str, status: SyncStatus) -> Vec<(CorrelationId, SyncOperation)> {
        let Some(queue) = self.in_flight.get_mut(id) else {
            return Vec::new();
        };
        let Some(position) = queue
            .iter()
            .position(|(_, operation)| operation.status_after() == status)
        else {
            return Vec::new();
        };
        let settled = queue.drain(..=position).collect();
        if queue.is_empty() {
            self.in_flight.remove(id);
        }
        settled
    }

    /// Drops one write that never reached the remote.
    fn forget(&mut self, id: &str, correlation: CorrelationId) {
        if let Some(queue) = self.in_flight.get_mut(id) {
            queue.retain(|(pending, _)| *pending != correlation);
            if queue.is_empty() {
                self.in_flight.remove(id);
            }
        }
    }

    fn in_flight_count(&self) -> usize {
        self.in_flight.values().map(VecDeque::len).sum()
    }
}

struct Inner<B, R, T>
where
    B: StoreBackend + 'static,
    R: Record + Serialize + DeserializeOwned + 'static,
    T: RealtimeRemote + 'static,
{
    id: ManagerId,
    store: LocalStore<B>,
    remote: Arc<T>,
    sink: Arc<dyn NotificationSink>,
    config: RealtimeConfig,
    state: Mutex<ManagerState>,
    stats: RwLock<SyncStats>,
    _record: PhantomData<fn() -> R>,
}

impl<B, R, T> Inner<B, R, T>
where
    B: StoreBackend + 'static,
    R: Record + Serialize + DeserializeOwned + 'static,
    T: RealtimeRemote + 'static,
{
    fn listener(self: &Arc<Self>, page: bool) -> Arc<dyn ChildListener> {
        Arc::new(RecordListener {
            inner: Arc::downgrade(self),
            page,
        })
    }

    /// Attaches the change listener unless it already is.
    fn ensure_listener(self: &Arc<Self>) -> SyncResult<()> {
        if self.state.lock().listener.is_some() {
            return Ok(());
        }

        // Subscribing may deliver the current window synchronously, which
        // takes the state lock, so it is released here.
        let listener = self.remote.subscribe(&self.config.query(), self.listener(false))?;

        let mut state = self.state.lock();
        if state.listener.is_some() {
            drop(state);
            tracing::debug!(manager = %self.id, %listener, "concurrent attach, detaching duplicate");
            self.remote.unsubscribe(listener)?;
            return Ok(());
        }
        state.listener = Some(listener);
        // A running handshake reports the lifecycle itself.
        if state.lifecycle != RealtimeState::Authenticating {
            state.lifecycle = RealtimeState::Subscribed;
        }
        drop(state);

        tracing::debug!(
            manager = %self.id,
            %listener,
            collection = R::COLLECTION,
            url = %self.config.url,
            "listener attached"
        );
        Ok(())
    }

    /// Attaches the listener, or reports why it cannot be.
    fn attach(self: &Arc<Self>) {
        if let Err(err) = self.ensure_listener() {
            tracing::warn!(manager = %self.id, error = %err, "cannot attach listener");
            self.state.lock().lifecycle = RealtimeState::Unsubscribed;
            self.sink.notify(SyncNotification::StreamFailed {
                manager: self.id,
                error: err.to_string(),
            });
        }
    }

    fn on_auth(self: &Arc<Self>, result: RemoteResult<AuthData>) {
        match result {
            Ok(auth) => {
                tracing::info!(manager = %self.id, uid = %auth.uid, "authenticated");
                {
                    let mut state = self.state.lock();
                    state.authenticated = true;
                    // A mutation may have attached the listener already.
                    state.lifecycle = if state.listener.is_some() {
                        RealtimeState::Subscribed
                    } else {
                        RealtimeState::Unsubscribed
                    };
                }
                self.sink.notify(SyncNotification::AuthSucceeded {
                    manager: self.id,
                    auth,
                });
                self.attach();
            }
            Err(err) => {
                tracing::warn!(manager = %self.id, error = %err, "authentication failed");
                self.state.lock().lifecycle = RealtimeState::AuthFailed;
                self.sink.notify(SyncNotification::AuthFailed {
                    manager: self.id,
                    error: err.to_string(),
                });
            }
        }
    }

    /// Writes `record` at the operation's pending status and sends it.
    fn submit(
        self: &Arc<Self>,
        record: &R,
        operation: SyncOperation,
    ) -> SyncResult<CorrelationId> {
        let correlation = CorrelationId::new();
        let result = self.try_submit(record, operation, correlation);

        if let Err(err) = &result {
            self.state.lock().forget(record.id(), correlation);
            if err.is_protocol() {
                tracing::warn!(kind = "protocol", manager = %self.id, %correlation, id = record.id(), %operation, error = %err, "sync failed");
            } else {
                tracing::warn!(manager = %self.id, %correlation, id = record.id(), %operation, error = %err, "sync failed");
            }
            let message = err.to_string();
            self.stats.write().record_failure(&message);
            self.sink.notify(SyncNotification::SyncFailed {
                manager: self.id,
                correlation,
                collection: R::COLLECTION.to_string(),
                id: record.id().to_string(),
                operation,
                error: message,
                retryable: err.is_retryable(),
            });
        }
        result.map(|_| correlation)
    }

    fn try_submit(
        self: &Arc<Self>,
        record: &R,
        operation: SyncOperation,
        correlation: CorrelationId,
    ) -> SyncResult<()> {
        // Attach first so the current window cannot overwrite the pending write.
        let attached = self.ensure_listener();
        self.store.persist_one(record, operation.status_before())?;
        attached?;

        let value = serde_json::to_value(record).map_err(|e| SyncError::Encode(e.to_string()))?;
        let id = record.id().to_string();

        let key = {
            let mut state = self.state.lock();
            let key = state.keys.get(&id).cloned();
            if operation != SyncOperation::Create && key.is_none() {
                return Err(SyncError::unknown_key(id));
            }
            state
                .in_flight
                .entry(id.clone())
                .or_default()
                .push_back((correlation, operation));
            key
        };

        // The echo may arrive before these return.
        match (operation, key) {
            (SyncOperation::Create, _) => {
                let key = self.remote.push(value)?;
                self.state.lock().keys.entry(id.clone()).or_insert(key);
            }
            (SyncOperation::Update, Some(key)) => self.remote.set_value(&key, value)?,
            (SyncOperation::Delete, Some(key)) => self.remote.remove_value(&key)?,
            (_, None) => return Err(SyncError::unknown_key(id)),
        }

        tracing::debug!(manager = %self.id, %correlation, id = %id, %operation, "write sent, awaiting echo");
        Ok(())
    }

    /// Applies one inbound child event at `status`.
    fn apply(&self, snapshot: &Snapshot, status: SyncStatus) {
        let record: R = match snapshot.decode() {
            Ok(record) => record,
            Err(err) => {
                tracing::warn!(
                    kind = "protocol",
                    manager = %self.id,
                    key = %snapshot.key,
                    error = %err,
                    "cannot decode child"
                );
                self.stream_failed(format!("child {}: {err}", snapshot.key));
                return;
            }
        };
        let id = record.id().to_string();

        // A child entering the window must not overwrite a newer local intent.
        let written = if status == SyncStatus::Synced {
            self.store
                .persist_unless(std::slice::from_ref(&record), status, |current| {
                    matches!(current, SyncStatus::UpdatePending | SyncStatus::DeletePending)
                })
                .map(|kept| kept.is_empty())
        } else {
            self.store.persist_one(&record, status).map(|_| true)
        };
        let written = match written {
            Ok(written) => written,
            Err(err) => {
                tracing::warn!(manager = %self.id, id = %id, %status, error = %err, "cannot apply child event");
                self.stream_failed(err.to_string());
                return;
            }
        };
        if !written {
            tracing::debug!(manager = %self.id, id = %id, "keeping pending row");
        }

        let settled = {
            let mut state = self.state.lock();
            if status == SyncStatus::DeleteSynced {
                state.keys.remove(&id);
            } else {
                state.keys.insert(id.clone(), snapshot.key.clone());
            }
            state.settle(&id, status)
        };

        if settled.is_empty() {
            if written {
                tracing::debug!(manager = %self.id, id = %id, %status, "remote change applied");
                self.stats.write().record_remote_applied();
                self.sink.notify(SyncNotification::RemoteApplied {
                    manager: self.id,
                    collection: R::COLLECTION.to_string(),
                    id,
                    status,
                });
            }
            return;
        }

        // Writes on one key land in order, so an echo also confirms the
        // writes it overtook.
        for (correlation, operation) in settled {
            tracing::info!(
                manager = %self.id,
                %correlation,
                collection = R::COLLECTION,
                id = %id,
                %operation,
                overtaken = operation.status_after() != status,
                "echo acknowledged"
            );
            self.stats.write().record_success();
            self.sink.notify(SyncNotification::SyncSucceeded {
                manager: self.id,
                correlation,
                collection: R::COLLECTION.to_string(),
                id: id.clone(),
                operation,
            });
        }
    }

    fn stream_failed(&self, error: String) {
        self.stats.write().record_failure(&error);
        self.sink.notify(SyncNotification::StreamFailed {
            manager: self.id,
            error,
        });
    }

    fn cancelled(&self, page: bool, error: &RemoteError) {
        tracing::warn!(manager = %self.id, page, error = %error, "subscription cancelled by remote");
        if !page {
            let mut state = self.state.lock();
            state.listener = None;
            state.lifecycle = RealtimeState::Unsubscribed;
        }
        self.stream_failed(error.to_string());
    }

    fn detach_all(&self) -> bool {
        let (listener, pages) = {
            let mut state = self.state.lock();
            let listener = state.listener.take();
            let pages = std::mem::take(&mut state.pages);
            if listener.is_some() {
                state.lifecycle = RealtimeState::Unsubscribed;
            }
            (listener, pages)
        };

        for id in listener.iter().chain(pages.iter()) {
            if let Err(err) = self.remote.unsubscribe(*id) {
                tracing::warn!(manager = %self.id, listener = %id, error = %err, "cannot detach listener");
            }
        }
        listener.is_some()
    }
}

/// Listener handed to the remote. Holds the manager weakly so an attached
/// subscription does not keep a dropped manager alive.
struct RecordListener<B, R, T>
where
    B: StoreBackend + 'static,
    R: Record + Serialize + DeserializeOwned + 'static,
    T: RealtimeRemote + 'static,
{
    inner: Weak<Inner<B, R, T>>,
    page: bool,
}

impl<B, R, T> ChildListener for RecordListener<B, R, T>
where
    B: StoreBackend + 'static,
    R: Record + Serialize + DeserializeOwned + 'static,
    T: RealtimeRemote + 'static,
{
    fn on_child_added(&self, snapshot: &Snapshot, _prev_key: Option<&str>) {
        if let Some(inner) = self.inner.upgrade() {
            inner.apply(snapshot, SyncStatus::Synced);
        }
    }

    fn on_child_changed(&self, snapshot: &Snapshot, _prev_key: Option<&str>) {
        if let Some(inner) = self.inner.upgrade() {
            inner.apply(snapshot, SyncStatus::UpdateSynced);
        }
    }

    fn on_child_removed(&self, snapshot: &Snapshot) {
        if let Some(inner) = self.inner.upgrade() {
            inner.apply(snapshot, SyncStatus::DeleteSynced);
        }
    }

    fn on_child_moved(&self, snapshot: &Snapshot, prev_key: Option<&str>) {
        tracing::debug!(key = %snapshot.key, prev_key, "child moved");
    }

    fn on_cancelled(&self, error: &RemoteError) {
        if let Some(inner) = self.inner.upgrade() {
            inner.cancelled(self.page, error);
        }
    }
}

/// Keeps one collection of `R` in sync with a realtime remote.
///
/// Read-only use never attaches a listener; the first mutation does, if
/// [`RealtimeSyncManager::start`] has not already.
///
/// # Example
///
/// ```rust
/// use driftsync_core::{CoreResult, LocalStore, Record, Row, SyncStatus};
/// use driftsync_engine::{DiscardSink, InMemoryRealtime, RealtimeConfig, RealtimeSyncManager};
/// use driftsync_storage::InMemoryStore;
/// use serde::{Deserialize, Serialize};
/// use std::sync::Arc;
///
/// #[derive(Clone, Serialize, Deserialize)]
/// struct Message {
///     id: String,
///     request_time: i64,
/// }
///
/// impl Record for Message {
///     const COLLECTION: &'static str = "messages";
///     fn id(&self) -> &str { &self.id }
///     fn request_time(&self) -> i64 { self.request_time }
///     fn to_rows(&self, status: SyncStatus) -> CoreResult<Vec<Row>> {
///         Ok(vec![Row::for_record(self, status)?])
///     }
///     fn from_row(row: &Row) -> CoreResult<Self> { row.decode() }
/// }
///
/// let store = LocalStore::new(InMemoryStore::new());
/// let remote = Arc::new(InMemoryRealtime::new());
/// let config = RealtimeConfig::new("memory://messages", "token");
/// let manager: RealtimeSyncManager<_, Message, _> =
///     RealtimeSyncManager::new(store.clone(), remote, config, Arc::new(DiscardSink));
///
/// manager.start();
/// manager.save(&Message { id: "m1".into(), request_time: 1 }).unwrap();
///
/// // The in-memory remote echoes immediately.
/// let row = store.get("messages", "m1").unwrap().unwrap();
/// assert_eq!(row.status, SyncStatus::Synced);
/// assert!(manager.remote_key("m1").is_some());
/// ```
pub struct RealtimeSyncManager<B, R, T>
where
    B: StoreBackend + 'static,
    R: Record + Serialize + DeserializeOwned + 'static,
    T: RealtimeRemote + 'static,
{
    inner: Arc<Inner<B, R, T>>,
    queue: PendingQueue<B>,
}

impl<B, R, T> RealtimeSyncManager<B, R, T>
where
    B: StoreBackend + 'static,
    R: Record + Serialize + DeserializeOwned + 'static,
    T: RealtimeRemote + 'static,
{
    /// Creates a manager in the `Created` state.
    pub fn new(
        store: LocalStore<B>,
        remote: Arc<T>,
        config: RealtimeConfig,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        let id = ManagerId::new();
        tracing::debug!(manager = %id, collection = R::COLLECTION, url = %config.url, "realtime sync manager created");
        Self {
            queue: PendingQueue::new(store.clone()),
            inner: Arc::new(Inner {
                id,
                store,
                remote,
                sink,
                config,
                state: Mutex::new(ManagerState {
                    lifecycle: RealtimeState::Created,
                    authenticated: false,
                    listener: None,
                    pages: Vec::new(),
                    keys: HashMap::new(),
                    in_flight: HashMap::new(),
                }),
                stats: RwLock::new(SyncStats::default()),
                _record: PhantomData,
            }),
        }
    }

    /// Returns this manager's id.
    pub fn id(&self) -> ManagerId {
        self.inner.id
    }

    /// Returns the local store.
    pub fn store(&self) -> &LocalStore<B> {
        &self.inner.store
    }

    /// Returns the configuration.
    pub fn config(&self) -> &RealtimeConfig {
        &self.inner.config
    }

    /// Returns the lifecycle state.
    pub fn state(&self) -> RealtimeState {
        self.inner.state.lock().lifecycle
    }

    /// Returns true while the change listener is attached.
    pub fn is_listening(&self) -> bool {
        self.inner.state.lock().listener.is_some()
    }

    /// Returns a snapshot of the statistics.
    pub fn stats(&self) -> SyncStats {
        self.inner.stats.read().clone()
    }

    /// Returns the server key known for a local id.
    pub fn remote_key(&self, id: &str) -> Option<String> {
        self.inner.state.lock().keys.get(id).cloned()
    }

    /// Performs the auth handshake, then attaches the change listener.
    ///
    /// The outcome is reported as `AuthSucceeded` or `AuthFailed`. A failed
    /// handshake is not retried; call `start` again. A listener a mutation
    /// already attached is kept. Once authenticated, `start` only re-attaches
    /// a detached listener. Does nothing while a handshake is running.
    pub fn start(&self) {
        {
            let mut state = self.inner.state.lock();
            if state.lifecycle == RealtimeState::Authenticating {
                return;
            }
            if state.authenticated {
                if state.listener.is_some() {
                    return;
                }
                drop(state);
                self.inner.attach();
                return;
            }
            state.lifecycle = RealtimeState::Authenticating;
        }
        tracing::debug!(manager = %self.inner.id, "authenticating");

        let inner = Arc::downgrade(&self.inner);
        self.inner.remote.authenticate(
            &self.inner.config.auth_token,
            Box::new(move |result: RemoteResult<AuthData>| {
                if let Some(inner) = inner.upgrade() {
                    inner.on_auth(result);
                }
            }),
        );
    }

    /// Detaches every listener. Safe to call repeatedly or before `start`.
    pub fn stop(&self) {
        if self.inner.detach_all() {
            tracing::debug!(manager = %self.inner.id, "listener detached");
        }
    }

    /// Creates `record` remotely.
    ///
    /// The record is stored as `NotSynced` and becomes `Synced` when the
    /// remote echoes it. Returns the id carried by the eventual notification.
    ///
    /// # Errors
    ///
    /// Returns an error, after one `SyncFailed` notification, if the record
    /// cannot be stored or the remote refuses the write. The record keeps
    /// its pending status.
    pub fn save(&self, record: &R) -> SyncResult<CorrelationId> {
        self.inner.submit(record, SyncOperation::Create)
    }

    /// Updates `record` remotely. Settles at `UpdateSynced` on echo.
    ///
    /// # Errors
    ///
    /// As [`RealtimeSyncManager::save`]; also fails with
    /// [`SyncError::UnknownRemoteKey`] if the record was never seen remotely.
    pub fn update(&self, record: &R) -> SyncResult<CorrelationId> {
        self.inner.submit(record, SyncOperation::Update)
    }

    /// Deletes `record` remotely. The row is removed on echo.
    ///
    /// # Errors
    ///
    /// As [`RealtimeSyncManager::update`].
    pub fn delete(&self, record: &R) -> SyncResult<CorrelationId> {
        self.inner.submit(record, SyncOperation::Delete)
    }

    /// Returns every stored record with its status, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the local store fails.
    pub fn select_all(&self) -> SyncResult<Vec<(R, SyncStatus)>> {
        Ok(self.inner.store.load_resident(SortDirection::Descending)?)
    }

    /// Returns a page of at most `standard_limit` records, newest first,
    /// starting at record `id`.
    ///
    /// Also attaches a listener to the matching remote window, which ends at
    /// the record's server key, so older children reach the store.
    ///
    /// # Errors
    ///
    /// Fails with [`SyncError::UnknownRemoteKey`] if no key is known for
    /// `id`, or if the store or the remote fails.
    pub fn select_from(&self, id: &str) -> SyncResult<Vec<(R, SyncStatus)>> {
        let key = self
            .remote_key(id)
            .ok_or_else(|| SyncError::unknown_key(id))?;

        let query = self.inner.config.query().end_at(key.clone());
        let page = self.inner.remote.subscribe(&query, self.inner.listener(true))?;
        self.inner.state.lock().pages.push(page);
        tracing::debug!(manager = %self.inner.id, listener = %page, end_at = %key, "page listener attached");

        let rows: Vec<(R, SyncStatus)> = self.inner.store.load_resident(SortDirection::Descending)?;
        Ok(rows
            .into_iter()
            .skip_while(|(record, _)| record.id() != id)
            .take(self.inner.config.standard_limit)
            .collect())
    }

    /// Hands every `R` at `status_before`, oldest first, to `replay`.
    ///
    /// # Errors
    ///
    /// Returns an error if the pending records cannot be read.
    pub fn execute_pending<F, U>(&self, status_before: SyncStatus, replay: F) -> SyncResult<U>
    where
        F: FnOnce(Vec<R>) -> U,
    {
        Ok(self.queue.execute_pending(status_before, replay)?)
    }

    /// Re-sends every pending record: creates, then updates, then deletes,
    /// each oldest first, one at a time.
    ///
    /// Stops at the first refused write and counts the rest as skipped. A
    /// success means the remote accepted the write; the records settle when
    /// their echoes arrive.
    ///
    /// # Errors
    ///
    /// Returns an error if the pending records cannot be read.
    pub fn resubmit_pending(&self) -> SyncResult<ReplayReport> {
        let mut batches = Vec::with_capacity(SyncOperation::ALL.len());
        for operation in SyncOperation::ALL {
            let records: Vec<R> = self.queue.collect(operation.status_before())?;
            batches.push((operation, records));
        }

        let total: usize = batches.iter().map(|(_, records)| records.len()).sum();
        let mut report = ReplayReport::default();

        'replay: for (operation, records) in &batches {
            for record in records {
                report.submitted += 1;
                if self.inner.submit(record, *operation).is_ok() {
                    report.succeeded += 1;
                } else {
                    report.failed += 1;
                    report.skipped = total - report.submitted;
                    break 'replay;
                }
            }
        }

        tracing::debug!(
            manager = %self.inner.id,
            collection = R::COLLECTION,
            submitted = report.submitted,
            succeeded = report.succeeded,
            failed = report.failed,
            skipped = report.skipped,
            "pending resubmission finished"
        );
        Ok(report)
    }
}

impl<B, R, T> Drop for RealtimeSyncManager<B, R, T>
where
    B: StoreBackend + 'static,
    R: Record + Serialize + DeserializeOwned + 'static,
    T: RealtimeRemote + 'static,
{
    fn drop(&mut self) {
        self.inner.detach_all();
    }
}

impl<B, R, T> std::fmt::Debug for RealtimeSyncManager<B, R, T>
where
    B: StoreBackend + 'static,
    R: Record + Serialize + DeserializeOwned + 'static,
    T: RealtimeRemote + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("RealtimeSyncManager")
            .field("id", &self.inner.id)
            .field("collection", &R::COLLECTION)
            .field("state", &state.lifecycle)
            .field("keys", &state.keys.len())
            .field("in_flight", &state.in_flight_count())
            .finish()
    }
}
