//! Test fixtures and store helpers.
//!
//! Provides sample record types and temporary stores for setting up sync
//! scenarios.

use driftsync_core::{new_record_id, CoreResult, LocalStore, Record, Row, SyncStatus};
use driftsync_storage::{
    FileStore, InMemoryStore, RowKey, RowQuery, StorageResult, StoreBackend, StoreTransaction,
    StoredRow,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::TempDir;

/// Collection of the secondary rows written by [`TaggedNote`].
pub const TAG_COLLECTION: &str = "note_tags";

/// A plain record stored as one row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    /// Client-assigned id.
    pub id: String,
    /// Creation time, used for pending replay order.
    pub request_time: i64,
    /// Title.
    pub title: String,
    /// Tags.
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Note {
    /// Creates a note.
    pub fn new(id: impl Into<String>, request_time: i64, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            request_time,
            title: title.into(),
            tags: Vec::new(),
        }
    }

    /// Creates a note with a fresh random id.
    pub fn generated(request_time: i64) -> Self {
        Self::new(new_record_id(), request_time, format!("note at {request_time}"))
    }

    /// Adds tags.
    #[must_use]
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    /// Returns the note as the JSON a remote would hold.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).expect("Note serializes to JSON")
    }
}

impl Record for Note {
    const COLLECTION: &'static str = "notes";

    fn id(&self) -> &str {
        &self.id
    }

    fn request_time(&self) -> i64 {
        self.request_time
    }

    fn to_rows(&self, status: SyncStatus) -> CoreResult<Vec<Row>> {
        Ok(vec![Row::for_record(self, status)?])
    }

    fn from_row(row: &Row) -> CoreResult<Self> {
        row.decode()
    }
}

/// A note that also writes one row per tag into [`TAG_COLLECTION`].
///
/// Exercises records that map to several rows across collections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaggedNote(pub Note);

impl TaggedNote {
    /// Returns the id of the tag row for `tag`.
    pub fn tag_row_id(note_id: &str, tag: &str) -> String {
        format!("{note_id}:{tag}")
    }
}

impl Record for TaggedNote {
    const COLLECTION: &'static str = "tagged_notes";

    fn id(&self) -> &str {
        &self.0.id
    }

    fn request_time(&self) -> i64 {
        self.0.request_time
    }

    fn to_rows(&self, status: SyncStatus) -> CoreResult<Vec<Row>> {
        let mut rows = vec![Row::for_record(self, status)?];
        for tag in &self.0.tags {
            rows.push(Row::encode(
                TAG_COLLECTION,
                Self::tag_row_id(&self.0.id, tag),
                self.0.request_time,
                status,
                tag,
            )?);
        }
        Ok(rows)
    }

    fn from_row(row: &Row) -> CoreResult<Self> {
        row.decode()
    }
}

/// Builds `count` notes with ids `n0, n1, ...` and request times
/// `start, start + 1, ...`.
pub fn notes(count: usize, start: i64) -> Vec<Note> {
    (0..count)
        .map(|i| Note::new(format!("n{i}"), start + i as i64, format!("note {i}")))
        .collect()
}

/// A local store with automatic cleanup.
pub struct TestStore<B: StoreBackend> {
    /// The store.
    pub store: LocalStore<B>,
    /// The temporary directory (kept alive to prevent cleanup).
    temp_dir: Option<TempDir>,
}

impl TestStore<InMemoryStore> {
    /// Creates an in-memory store.
    pub fn memory() -> Self {
        Self {
            store: LocalStore::new(InMemoryStore::new()),
            temp_dir: None,
        }
    }
}

impl TestStore<FileStore> {
    /// Creates a file-backed store in a fresh temporary directory.
    pub fn file() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let path = temp_dir.path().join(Self::FILE_NAME);
        let backend = FileStore::open_with_create_dirs(&path).expect("Failed to open file store");
        Self {
            store: LocalStore::new(backend),
            temp_dir: Some(temp_dir),
        }
    }

    const FILE_NAME: &'static str = "store.driftsync";
}

impl<B: StoreBackend> TestStore<B> {
    /// Returns the store path if file-backed, None if in-memory.
    pub fn path(&self) -> Option<PathBuf> {
        self.temp_dir
            .as_ref()
            .map(|d| d.path().join(TestStore::<FileStore>::FILE_NAME))
    }
}

impl<B: StoreBackend> std::ops::Deref for TestStore<B> {
    type Target = LocalStore<B>;

    fn deref(&self) -> &Self::Target {
        &self.store
    }
}

/// Runs a test with a temporary in-memory store.
///
/// # Example
///
/// ```rust
/// use driftsync_core::SyncStatus;
/// use driftsync_testkit::{with_temp_store, Note};
///
/// with_temp_store(|store| {
///     store.persist_one(&Note::new("a1", 1000, "hello"), SyncStatus::NotSynced).unwrap();
///     assert_eq!(store.count("notes", None).unwrap(), 1);
/// });
/// ```
pub fn with_temp_store<F, R>(f: F) -> R
where
    F: FnOnce(&LocalStore<InMemoryStore>) -> R,
{
    let test_store = TestStore::memory();
    f(&test_store.store)
}

/// Runs a test with a temporary file-backed store and its path.
///
/// The store is still open while `f` runs.
pub fn with_file_store<F, R>(f: F) -> R
where
    F: FnOnce(&LocalStore<FileStore>, &Path) -> R,
{
    let test_store = TestStore::file();
    let path = test_store
        .path()
        .expect("File store should have a path");
    f(&test_store.store, &path)
}

/// An in-memory backend that commits a queued local write just before the
/// next write transaction opens.
///
/// Stands in for an edit that lands while a sync operation is between its
/// remote call and its store write.
#[derive(Debug, Default)]
pub struct InterleavingStore {
    inner: InMemoryStore,
    queued: Mutex<Vec<StoredRow>>,
}

impl InterleavingStore {
    /// Creates an empty store with nothing queued.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues the rows of `record` at `status` for the next transaction.
    pub fn write_before_next_transaction<R: Record>(&self, record: &R, status: SyncStatus) {
        let rows = record
            .to_rows(status)
            .expect("Failed to map record")
            .into_iter()
            .map(|row| row.with_status(status).into_stored());
        self.queued
            .lock()
            .expect("Queue lock poisoned")
            .extend(rows);
    }

    /// Returns true while a queued write has not landed.
    pub fn has_queued(&self) -> bool {
        !self.queued.lock().expect("Queue lock poisoned").is_empty()
    }
}

impl StoreBackend for InterleavingStore {
    fn begin_transaction(&self) -> StorageResult<Box<dyn StoreTransaction + '_>> {
        let queued = std::mem::take(&mut *self.queued.lock().expect("Queue lock poisoned"));
        if !queued.is_empty() {
            let mut txn = self.inner.begin_transaction()?;
            for row in queued {
                txn.upsert(row)?;
            }
            txn.commit()?;
        }
        self.inner.begin_transaction()
    }

    fn query(&self, query: &RowQuery) -> StorageResult<Vec<StoredRow>> {
        self.inner.query(query)
    }

    fn get(&self, key: &RowKey) -> StorageResult<Option<StoredRow>> {
        self.inner.get(key)
    }

    fn collections(&self) -> StorageResult<Vec<String>> {
        self.inner.collections()
    }
}

/// Prepared stores for common scenarios.
pub mod scenarios {
    use super::*;

    /// A store holding one `NotSynced` note (`"unsent"`) and one
    /// `DeletePending` note (`"doomed"`).
    pub fn unsent_and_delete_pending() -> TestStore<InMemoryStore> {
        let test_store = TestStore::memory();
        test_store
            .persist_one(&Note::new("unsent", 100, "unsent"), SyncStatus::NotSynced)
            .expect("Failed to persist note");
        test_store
            .persist_one(&Note::new("doomed", 200, "doomed"), SyncStatus::DeletePending)
            .expect("Failed to persist note");
        test_store
    }

    /// A store holding `per_status` notes at each pending status.
    ///
    /// Ids are prefixed `c`, `u` and `d` for creates, updates and deletes.
    /// Request times increase with the index, so each group replays in id
    /// order.
    pub fn pending_store(per_status: usize) -> TestStore<InMemoryStore> {
        let test_store = TestStore::memory();
        for (prefix, status) in [
            ("c", SyncStatus::NotSynced),
            ("u", SyncStatus::UpdatePending),
            ("d", SyncStatus::DeletePending),
        ] {
            let batch: Vec<Note> = (0..per_status)
                .map(|i| Note::new(format!("{prefix}{i}"), i as i64 * 10, prefix))
                .collect();
            test_store
                .persist(&batch, status)
                .expect("Failed to persist notes");
        }
        test_store
    }
}
