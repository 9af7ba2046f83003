//! Request/response remote calls.

use crate::error::{RemoteError, RemoteResult};
use parking_lot::Mutex;
use std::sync::Arc;

/// Completion callback of an enqueued call.
pub type Completion<T> = Box<dyn FnOnce(RemoteResult<T>) + Send + 'static>;

/// A single-use request against a request/response remote.
///
/// A call is consumed by running it, either blocking the current thread with
/// [`RemoteCall::execute`] or in the background with [`RemoteCall::enqueue`].
///
/// # Example
///
/// ```rust
/// use driftsync_protocol::{RemoteCall, RemoteResult};
///
/// struct Ping;
///
/// impl RemoteCall for Ping {
///     type Response = &'static str;
///
///     fn execute(self) -> RemoteResult<&'static str> {
///         Ok("pong")
///     }
/// }
///
/// assert_eq!(Ping.execute().unwrap(), "pong");
/// ```
pub trait RemoteCall: Send + 'static {
    /// Typed response of a successful call.
    type Response: Send + 'static;

    /// Runs the call on the current thread.
    fn execute(self) -> RemoteResult<Self::Response>;

    /// Runs the call without blocking the current thread.
    ///
    /// `callback` runs exactly once, with the response or the failure, on a
    /// transport-owned thread. The default implementation spawns a thread per
    /// call; transports with their own event loop should override it.
    fn enqueue(self, callback: Completion<Self::Response>)
    where
        Self: Sized,
    {
        let slot = Arc::new(Mutex::new(Some(callback)));
        let worker_slot = Arc::clone(&slot);

        let spawned = std::thread::Builder::new()
            .name("driftsync-call".into())
            .spawn(move || {
                let result = self.execute();
                if let Some(callback) = worker_slot.lock().take() {
                    callback(result);
                }
            });

        if let Err(err) = spawned {
            // The closure (and the call) is gone; the callback is still here.
            if let Some(callback) = slot.lock().take() {
                callback(Err(RemoteError::transport(format!(
                    "cannot spawn call thread: {err}"
                ))));
            }
        }
    }
}
