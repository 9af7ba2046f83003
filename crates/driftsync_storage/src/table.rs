//! Shared in-memory table and write set used by the backends.

use crate::row::{RowKey, RowQuery, StoredRow};
use std::collections::BTreeMap;

/// Committed rows, ordered by key.
pub(crate) type Table = BTreeMap<RowKey, StoredRow>;

/// Pending writes of a transaction: `Some` is an upsert, `None` a delete.
#[derive(Debug, Default)]
pub(crate) struct WriteSet {
    writes: BTreeMap<RowKey, Option<StoredRow>>,
}

impl WriteSet {
    pub(crate) fn upsert(&mut self, row: StoredRow) {
        self.writes.insert(row.key(), Some(row));
    }

    pub(crate) fn delete(&mut self, key: &RowKey) {
        self.writes.insert(key.clone(), None);
    }

    pub(crate) fn len(&self) -> usize {
        self.writes.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    /// Applies the writes to `table`.
    pub(crate) fn apply_to(self, table: &mut Table) {
        for (key, write) in self.writes {
            match write {
                Some(row) => {
                    table.insert(key, row);
                }
                None => {
                    table.remove(&key);
                }
            }
        }
    }

    /// Runs `query` over `table` as modified by these writes.
    pub(crate) fn query_overlay(&self, table: &Table, query: &RowQuery) -> Vec<StoredRow> {
        let untouched = table
            .iter()
            .filter(|(key, _)| !self.writes.contains_key(*key))
            .map(|(_, row)| row);
        let written = self.writes.values().flatten();
        query.apply(untouched.chain(written))
    }
}

/// Distinct collection names present in `table`.
pub(crate) fn collections(table: &Table) -> Vec<String> {
    let mut names: Vec<String> = table.keys().map(|k| k.collection.clone()).collect();
    names.dedup();
    names
}
