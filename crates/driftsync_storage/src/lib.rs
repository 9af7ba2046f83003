//! # driftsync Storage
//!
//! The local store that driftsync persists records into.
//!
//! This crate provides the lowest-level storage abstraction for driftsync.
//! Backends hold **opaque rows**: a collection name, an id, an ordering
//! timestamp, a numeric status code and a body of bytes. They never decode
//! the body and never interpret the status code beyond filtering on it.
//!
//! ## Design Principles
//!
//! - Every write goes through an exclusive [`StoreTransaction`]
//! - A transaction that is dropped without `commit` is rolled back
//! - A failed commit leaves the store exactly as it was before the transaction
//! - Backends must be `Send + Sync` so transport callbacks can write from any thread
//!
//! ## Available Backends
//!
//! - [`InMemoryStore`] - For testing and ephemeral caches
//! - [`FileStore`] - Persistent snapshot file with atomic replace on commit
//!
//! ## Example
//!
//! ```rust
//! use driftsync_storage::{InMemoryStore, RowQuery, StoreBackend, StoredRow};
//!
//! let store = InMemoryStore::new();
//! let mut txn = store.begin_transaction().unwrap();
//! txn.upsert(StoredRow::new("notes", "a1", 1000, 0, vec![0xA0])).unwrap();
//! txn.commit().unwrap();
//!
//! let rows = store.query(&RowQuery::collection("notes").with_status(0)).unwrap();
//! assert_eq!(rows.len(), 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;
mod row;
mod table;

pub use backend::{StoreBackend, StoreTransaction};
pub use error::{StorageError, StorageResult};
pub use file::FileStore;
pub use memory::InMemoryStore;
pub use row::{RowKey, RowQuery, SortDirection, SortField, StoredRow};
