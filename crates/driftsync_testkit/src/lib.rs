//! # driftsync Testkit
//!
//! Test utilities for driftsync.
//!
//! This crate provides:
//! - Sample record types, including one that fans out across collections
//! - Temporary in-memory and file-backed stores
//! - Prepared pending-queue scenarios
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust
//! use driftsync_core::SyncStatus;
//! use driftsync_testkit::prelude::*;
//!
//! with_temp_store(|store| {
//!     store.persist(&notes(3, 100), SyncStatus::NotSynced).unwrap();
//!     assert_eq!(store.count("notes", Some(SyncStatus::NotSynced)).unwrap(), 3);
//! });
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use fixtures::*;
pub use generators::*;
