//! # driftsync Engine
//!
//! Sync managers that keep a [`LocalStore`] consistent with a remote.
//!
//! This crate provides:
//! - [`RestSyncManager`]: optimistic local write, then one request/response
//!   round-trip per mutation
//! - [`RealtimeSyncManager`]: a long-lived subscription whose echoed child
//!   events settle local writes
//! - [`SyncNotification`] values delivered to an application-owned
//!   [`NotificationSink`]
//! - A [`Connectivity`] signal consulted before every round-trip
//! - An HTTP adapter ([`HttpCall`]) over a pluggable [`HttpClient`]
//! - In-memory remotes in [`mock`] for tests
//!
//! ## Failure model
//!
//! A failed mutation never advances the record: it keeps its pending status
//! and is picked up by the next replay of the pending queue. Every failure
//! produces exactly one failure notification.
//!
//! [`LocalStore`]: driftsync_core::LocalStore

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod connectivity;
mod error;
mod http;
pub mod mock;
mod notification;
mod realtime;
mod rest;
mod stats;

pub use config::{RealtimeConfig, RestConfig, DEFAULT_STANDARD_LIMIT};
pub use connectivity::{AlwaysOnline, Connectivity, NetworkStatus, SharedConnectivity};
pub use error::{SyncError, SyncResult};
pub use http::{
    HttpCall, HttpClient, HttpMethod, HttpRequest, HttpResponse, LoopbackClient, LoopbackServer,
};
pub use mock::{Delivery, InMemoryRealtime, MockCall, RecordingSink};
pub use notification::{
    CorrelationId, DiscardSink, FnSink, ManagerId, NotificationSink, SyncNotification,
};
pub use realtime::{RealtimeState, RealtimeSyncManager};
pub use rest::RestSyncManager;
pub use stats::{ReplayReport, SyncStats};
