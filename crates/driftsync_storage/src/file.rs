//! File-based store backend for persistent storage.

use crate::backend::{StoreBackend, StoreTransaction};
use crate::error::{StorageError, StorageResult};
use crate::row::{RowKey, RowQuery, StoredRow};
use crate::table::{self, Table, WriteSet};
use fs2::FileExt;
use parking_lot::{Mutex, MutexGuard, RwLock};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Current snapshot format version.
const SNAPSHOT_VERSION: u16 = 1;

#[derive(Serialize, Deserialize)]
struct Snapshot {
    version: u16,
    rows: Vec<StoredRow>,
}

/// A file-based store backend.
///
/// Rows are kept in memory and the whole table is written as a CBOR snapshot
/// on every commit. The snapshot goes to a temporary file first, is synced,
/// and then atomically renamed over the store file, so a crash mid-commit
/// leaves the previous snapshot intact.
///
/// # Locking
///
/// An exclusive lock on `<path>.lock` is held while the store is open. A second
/// `open` of the same path, from this or another process, fails with
/// [`StorageError::Locked`].
///
/// # Example
///
/// ```no_run
/// use driftsync_storage::{FileStore, StoreBackend, StoredRow};
/// use std::path::Path;
///
/// let store = FileStore::open(Path::new("local.store")).unwrap();
/// let mut txn = store.begin_transaction().unwrap();
/// txn.upsert(StoredRow::new("notes", "a1", 1, 0, Vec::new())).unwrap();
/// txn.commit().unwrap();
/// ```
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    rows: RwLock<Table>,
    writer: Mutex<()>,
    _lock_file: File,
}

impl FileStore {
    /// Opens or creates a store at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is locked by another handle, the
    /// snapshot cannot be read, or it is corrupted.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(lock_path(path))?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(StorageError::Locked);
        }

        let rows = load_snapshot(path)?;
        tracing::debug!(path = %path.display(), rows = rows.len(), "opened file store");

        Ok(Self {
            path: path.to_path_buf(),
            rows: RwLock::new(rows),
            writer: Mutex::new(()),
            _lock_file: lock_file,
        })
    }

    /// Opens or creates a store, creating parent directories if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if directories cannot be created or the store cannot be opened.
    pub fn open_with_create_dirs(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Self::open(path)
    }

    /// Returns the path to the snapshot file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
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

    fn write_snapshot(&self, table: &Table) -> StorageResult<()> {
        let snapshot = Snapshot {
            version: SNAPSHOT_VERSION,
            rows: table.values().cloned().collect(),
        };

        let tmp_path = tmp_path(&self.path);
        {
            let file = File::create(&tmp_path)?;
            let mut writer = BufWriter::new(file);
            ciborium::into_writer(&snapshot, &mut writer)
                .map_err(|e| StorageError::Encoding(e.to_string()))?;
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

fn lock_path(path: &Path) -> PathBuf {
    with_suffix(path, ".lock")
}

fn tmp_path(path: &Path) -> PathBuf {
    with_suffix(path, ".tmp")
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

fn load_snapshot(path: &Path) -> StorageResult<Table> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Table::new()),
        Err(e) => return Err(e.into()),
    };

    if file.metadata()?.len() == 0 {
        return Ok(Table::new());
    }

    let snapshot: Snapshot = ciborium::from_reader(BufReader::new(file))
        .map_err(|e| StorageError::corrupted(format!("unreadable snapshot: {e}")))?;

    if snapshot.version != SNAPSHOT_VERSION {
        return Err(StorageError::corrupted(format!(
            "unsupported snapshot version {}",
            snapshot.version
        )));
    }

    Ok(snapshot
        .rows
        .into_iter()
        .map(|row| (row.key(), row))
        .collect())
}

impl StoreBackend for FileStore {
    fn begin_transaction(&self) -> StorageResult<Box<dyn StoreTransaction + '_>> {
        let guard = self.writer.lock();
        Ok(Box::new(FileTransaction {
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

struct FileTransaction<'a> {
    store: &'a FileStore,
    _guard: MutexGuard<'a, ()>,
    writes: WriteSet,
    finished: bool,
}

impl StoreTransaction for FileTransaction<'_> {
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
        if self.writes.is_empty() {
            return Ok(());
        }

        // Build the next table aside; the live one only changes once the
        // snapshot is durable.
        let mut next = self.store.rows.read().clone();
        std::mem::take(&mut self.writes).apply_to(&mut next);
        self.store.write_snapshot(&next)?;
        *self.store.rows.write() = next;
        Ok(())
    }
}

impl Drop for FileTransaction<'_> {
    fn drop(&mut self) {
        if !self.finished && !self.writes.is_empty() {
            tracing::debug!(writes = self.writes.len(), "transaction rolled back");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn row(id: &str, time: i64, status: u8) -> StoredRow {
        StoredRow::new("notes", id, time, status, vec![0xA0])
    }

    #[test]
    fn file_create_new() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("local.store");

        let store = FileStore::open(&path).unwrap();
        assert!(store.is_empty());
        assert_eq!(store.path(), path);
    }

    #[test]
    fn file_persistence() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("local.store");

        {
            let store = FileStore::open(&path).unwrap();
            let mut txn = store.begin_transaction().unwrap();
            txn.upsert(row("a", 1, 0)).unwrap();
            txn.upsert(row("b", 2, 1)).unwrap();
            txn.commit().unwrap();
        }

        {
            let store = FileStore::open(&path).unwrap();
            assert_eq!(store.len(), 2);
            let stored = store.get(&RowKey::new("notes", "b")).unwrap().unwrap();
            assert_eq!(stored, row("b", 2, 1));
        }
    }

    #[test]
    fn rolled_back_writes_are_not_persisted() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("local.store");

        {
            let store = FileStore::open(&path).unwrap();
            let mut txn = store.begin_transaction().unwrap();
            txn.upsert(row("a", 1, 0)).unwrap();
            drop(txn);
        }

        let store = FileStore::open(&path).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn second_open_is_locked() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("local.store");

        let _first = FileStore::open(&path).unwrap();
        assert!(matches!(FileStore::open(&path), Err(StorageError::Locked)));
    }

    #[test]
    fn corrupted_snapshot_is_reported() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("local.store");
        fs::write(&path, b"definitely not cbor").unwrap();

        assert!(matches!(
            FileStore::open(&path),
            Err(StorageError::Corrupted(_))
        ));
    }

    #[test]
    fn file_create_with_dirs() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("path").join("local.store");

        let store = FileStore::open_with_create_dirs(&path).unwrap();
        let mut txn = store.begin_transaction().unwrap();
        txn.upsert(row("a", 1, 0)).unwrap();
        txn.commit().unwrap();
        assert!(path.exists());
    }

    #[test]
    fn delete_is_persisted() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("local.store");

        {
            let store = FileStore::open(&path).unwrap();
            let mut txn = store.begin_transaction().unwrap();
            txn.upsert(row("a", 1, 0)).unwrap();
            txn.commit().unwrap();

            let mut txn = store.begin_transaction().unwrap();
            txn.delete(&RowKey::new("notes", "a")).unwrap();
            txn.commit().unwrap();
        }

        let store = FileStore::open(&path).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn stores_sharing_a_stem_use_distinct_temp_files() {
        let dir = tempdir().unwrap();
        let store_path = dir.path().join("notes.store");
        let db_path = dir.path().join("notes.db");
        assert_ne!(tmp_path(&store_path), tmp_path(&db_path));
        assert_eq!(tmp_path(&store_path), dir.path().join("notes.store.tmp"));

        let first = FileStore::open(&store_path).unwrap();
        let second = FileStore::open(&db_path).unwrap();
        for (store, id) in [(&first, "a"), (&second, "b")] {
            let mut txn = store.begin_transaction().unwrap();
            txn.upsert(row(id, 1, 0)).unwrap();
            txn.commit().unwrap();
        }
        drop((first, second));

        let reopened = FileStore::open(&db_path).unwrap();
        assert_eq!(reopened.len(), 1);
        assert!(reopened.get(&RowKey::new("notes", "b")).unwrap().is_some());
        assert!(!dir.path().join("notes.tmp").exists());
    }
}
