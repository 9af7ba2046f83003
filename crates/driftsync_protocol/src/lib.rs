//! # driftsync Protocol
//!
//! Contracts for the two remote collaborators of the sync engine.
//!
//! This crate provides:
//! - [`RemoteCall`], a single-use request/response call with blocking and
//!   callback-driven execution
//! - [`RemoteError`], the failure taxonomy shared by every transport
//! - [`RealtimeRemote`] and [`ChildListener`], the push/subscribe surface of a
//!   realtime collection
//!
//! This is a pure contract crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod call;
mod error;
mod realtime;

pub use call::{Completion, RemoteCall};
pub use error::{RemoteError, RemoteResult};
pub use realtime::{
    AuthData, AuthHandler, ChildListener, ListenerId, RealtimeQuery, RealtimeRemote, Snapshot,
};
