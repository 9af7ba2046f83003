//! # driftsync Core
//!
//! Record model and local persistence for the driftsync engine.
//!
//! This crate provides:
//! - [`SyncStatus`], the six-state synchronization state machine
//! - [`Record`], the capability a domain type implements to be stored
//! - [`LocalStore`], the transactional adapter over a [`StoreBackend`]
//! - [`PendingQueue`], the oldest-first replay surface for unsynced records
//!
//! ## Lifecycle
//!
//! ```text
//! local create  -> NotSynced     --ack--> Synced
//! local update  -> UpdatePending --ack--> UpdateSynced
//! local delete  -> DeletePending --ack--> DeleteSynced (row removed)
//! ```
//!
//! Remote-origin changes are written directly at a `Synced*` status.
//!
//! [`StoreBackend`]: driftsync_storage::StoreBackend

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod pending;
mod record;
mod status;
mod store;

pub use error::{CoreError, CoreResult};
pub use pending::PendingQueue;
pub use record::{new_record_id, Record, Row};
pub use status::{SyncOperation, SyncStatus};
pub use store::{ClearPendingReport, LocalStore};

pub use driftsync_storage::{SortDirection, SortField};
