//! Clear commands - discard pending work or a whole collection.

use super::{open_store, CliError};
use driftsync_core::{ClearPendingReport, LocalStore};
use driftsync_storage::{RowQuery, StoreBackend};
use std::path::Path;
use tracing::info;

/// Runs `clear-pending`.
pub fn run_pending(path: &Path, collection: &str) -> Result<(), CliError> {
    let store = open_store(path)?;
    let report = clear_pending(&store, collection)?;
    println!(
        "Discarded {} unsent rows, reverted {} pending deletes in '{}'.",
        report.discarded, report.reverted, collection
    );
    Ok(())
}

/// Runs `clear`.
pub fn run_all(path: &Path, collection: &str, dry_run: bool) -> Result<(), CliError> {
    let store = open_store(path)?;
    let removed = clear_all(&store, collection, dry_run)?;
    if dry_run {
        println!("Would remove {removed} rows from '{collection}' (dry run).");
    } else {
        println!("Removed {removed} rows from '{collection}'.");
    }
    Ok(())
}

/// Discards `NotSynced` rows and reverts `DeletePending` rows to `Synced`.
pub fn clear_pending<B: StoreBackend>(
    store: &LocalStore<B>,
    collection: &str,
) -> Result<ClearPendingReport, CliError> {
    let report = store.clear_pending(collection)?;
    info!(
        collection,
        discarded = report.discarded,
        reverted = report.reverted,
        "cleared pending rows"
    );
    Ok(report)
}

/// Removes every row of `collection`, or only counts them on a dry run.
pub fn clear_all<B: StoreBackend>(
    store: &LocalStore<B>,
    collection: &str,
    dry_run: bool,
) -> Result<usize, CliError> {
    if dry_run {
        return Ok(store.backend().query(&RowQuery::collection(collection))?.len());
    }
    let removed = store.clear_all(collection)?;
    info!(collection, removed, "cleared collection");
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use driftsync_core::SyncStatus;
    use driftsync_storage::FileStore;
    use driftsync_testkit::{notes, scenarios};
    use tempfile::tempdir;

    #[test]
    fn clear_pending_discards_and_reverts() {
        let test_store = scenarios::unsent_and_delete_pending();
        let report = clear_pending(&test_store.store, "notes").unwrap();
        assert_eq!(report.discarded, 1);
        assert_eq!(report.reverted, 1);

        assert!(test_store.get("notes", "unsent").unwrap().is_none());
        let doomed = test_store.get("notes", "doomed").unwrap().unwrap();
        assert_eq!(doomed.status, SyncStatus::Synced);
    }

    #[test]
    fn dry_run_keeps_rows() {
        let test_store = scenarios::pending_store(2);
        assert_eq!(clear_all(&test_store.store, "notes", true).unwrap(), 6);
        assert_eq!(test_store.count("notes", None).unwrap(), 6);

        assert_eq!(clear_all(&test_store.store, "notes", false).unwrap(), 6);
        assert_eq!(test_store.count("notes", None).unwrap(), 0);
    }

    #[test]
    fn run_clears_file_store() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.driftsync");
        {
            let store = LocalStore::new(FileStore::open(&path).unwrap());
            store.persist(&notes(2, 0), SyncStatus::NotSynced).unwrap();
            store.persist(&notes(1, 5), SyncStatus::Synced).unwrap();
        }

        run_pending(&path, "notes").unwrap();
        let store = open_store(&path).unwrap();
        // notes(1, 5) reuses id n0, so only n1 was still unsent.
        assert_eq!(store.count("notes", None).unwrap(), 1);
        drop(store);

        run_all(&path, "notes", false).unwrap();
        let store = open_store(&path).unwrap();
        assert_eq!(store.count("notes", None).unwrap(), 0);
    }
}
