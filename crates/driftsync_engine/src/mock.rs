//! In-process remotes and sinks for tests.
//!
//! These are public so applications embedding the engine can test their own
//! record types and flows without a network.

use crate::notification::{NotificationSink, SyncNotification};
use driftsync_protocol::{
    AuthData, AuthHandler, ChildListener, ListenerId, RealtimeQuery, RealtimeRemote, RemoteCall,
    RemoteError, RemoteResult, Snapshot,
};
use parking_lot::{Condvar, Mutex};
use serde_json::Value;
use std::cmp::Ordering as CmpOrdering;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A request/response call with a canned result.
#[derive(Debug)]
pub struct MockCall<T> {
    result: RemoteResult<T>,
    delay: Option<Duration>,
    executions: Option<Arc<AtomicUsize>>,
}

impl<T> MockCall<T> {
    /// A call that succeeds with `value`.
    pub fn ok(value: T) -> Self {
        Self {
            result: Ok(value),
            delay: None,
            executions: None,
        }
    }

    /// A call that fails with `error`.
    pub fn err(error: RemoteError) -> Self {
        Self {
            result: Err(error),
            delay: None,
            executions: None,
        }
    }

    /// Sleeps for `delay` before completing.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Increments `counter` each time the call runs.
    #[must_use]
    pub fn with_counter(mut self, counter: Arc<AtomicUsize>) -> Self {
        self.executions = Some(counter);
        self
    }
}

impl<T: Send + 'static> RemoteCall for MockCall<T> {
    type Response = T;

    fn execute(self) -> RemoteResult<T> {
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        if let Some(counter) = &self.executions {
            counter.fetch_add(1, Ordering::SeqCst);
        }
        self.result
    }
}

/// A sink that records every notification.
#[derive(Debug, Default)]
pub struct RecordingSink {
    seen: Mutex<Vec<SyncNotification>>,
    arrived: Condvar,
}

impl RecordingSink {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of every notification, in arrival order.
    pub fn notifications(&self) -> Vec<SyncNotification> {
        self.seen.lock().clone()
    }

    /// Returns the number of notifications received.
    pub fn len(&self) -> usize {
        self.seen.lock().len()
    }

    /// Returns true if nothing was received.
    pub fn is_empty(&self) -> bool {
        self.seen.lock().is_empty()
    }

    /// Returns the `SyncSucceeded` notifications.
    pub fn succeeded(&self) -> Vec<SyncNotification> {
        self.matching(|n| matches!(n, SyncNotification::SyncSucceeded { .. }))
    }

    /// Returns every failure notification.
    pub fn failures(&self) -> Vec<SyncNotification> {
        self.matching(SyncNotification::is_failure)
    }

    /// Returns the notifications accepted by `filter`.
    pub fn matching(&self, filter: impl Fn(&SyncNotification) -> bool) -> Vec<SyncNotification> {
        self.seen.lock().iter().filter(|n| filter(n)).cloned().collect()
    }

    /// Forgets everything received so far.
    pub fn clear(&self) {
        self.seen.lock().clear();
    }

    /// Blocks until at least `count` notifications arrived or `timeout`
    /// elapsed. Returns true if the count was reached.
    pub fn wait_for(&self, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut seen = self.seen.lock();
        while seen.len() < count {
            if self.arrived.wait_until(&mut seen, deadline).timed_out() {
                return seen.len() >= count;
            }
        }
        true
    }
}

impl NotificationSink for RecordingSink {
    fn notify(&self, notification: SyncNotification) {
        self.seen.lock().push(notification);
        self.arrived.notify_all();
    }
}

/// When an [`InMemoryRealtime`] delivers child events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// On the mutating thread, before the mutation call returns.
    Immediate,
    /// Queued until [`InMemoryRealtime::flush`].
    Deferred,
}

enum ChildEvent {
    Added(Snapshot, Option<String>),
    Changed(Snapshot, Option<String>),
    Removed(Snapshot),
    Cancelled(RemoteError),
}

type Dispatch = (Arc<dyn ChildListener>, ChildEvent);

struct Subscription {
    query: RealtimeQuery,
    listener: Arc<dyn ChildListener>,
}

#[derive(Default)]
struct RealtimeData {
    children: BTreeMap<String, Value>,
    subscriptions: BTreeMap<ListenerId, Subscription>,
    next_key: u64,
    next_listener: u64,
    queued: VecDeque<Dispatch>,
}

impl RealtimeData {
    /// Children of the window, in window order.
    fn window(&self, query: &RealtimeQuery) -> Vec<(String, Value)> {
        let mut children: Vec<(String, Value)> = self
            .children
            .iter()
            .filter(|(key, _)| query.end_at.as_ref().map_or(true, |end| *key <= end))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        if let Some(field) = &query.order_by {
            children.sort_by(|a, b| {
                compare_field(a.1.get(field), b.1.get(field)).then_with(|| a.0.cmp(&b.0))
            });
        }

        if let Some(limit) = query.limit_to_last {
            let excess = children.len().saturating_sub(limit);
            children.drain(..excess);
        }
        children
    }

    /// Position of `key` in the window and its predecessor's key.
    fn locate(&self, query: &RealtimeQuery, key: &str) -> Option<Option<String>> {
        let window = self.window(query);
        let index = window.iter().position(|(k, _)| k == key)?;
        Some(index.checked_sub(1).map(|i| window[i].0.clone()))
    }
}

/// Orders JSON field values: missing, null, bool, numbers, strings, other.
fn compare_field(a: Option<&Value>, b: Option<&Value>) -> CmpOrdering {
    fn rank(value: Option<&Value>) -> u8 {
        match value {
            None | Some(Value::Null) => 0,
            Some(Value::Bool(_)) => 1,
            Some(Value::Number(_)) => 2,
            Some(Value::String(_)) => 3,
            Some(_) => 4,
        }
    }

    match (a, b) {
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let x = x.as_f64().unwrap_or(0.0);
            let y = y.as_f64().unwrap_or(0.0);
            x.partial_cmp(&y).unwrap_or(CmpOrdering::Equal)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}

/// A realtime collection held in memory.
///
/// Behaves like a hosted realtime database: `push` assigns ordered keys,
/// every write is echoed to the listeners whose window contains the child,
/// and subscribing delivers the current window as added events. Listeners
/// are always invoked with no internal lock held, so they may call back into
/// the remote.
pub struct InMemoryRealtime {
    data: Mutex<RealtimeData>,
    delivery: Delivery,
    auth: Mutex<RemoteResult<AuthData>>,
    fail_writes: Mutex<Option<RemoteError>>,
    auth_attempts: AtomicUsize,
}

impl InMemoryRealtime {
    /// Creates an empty collection that echoes immediately.
    pub fn new() -> Self {
        Self::with_delivery(Delivery::Immediate)
    }

    /// Creates an empty collection with the given delivery mode.
    pub fn with_delivery(delivery: Delivery) -> Self {
        Self {
            data: Mutex::new(RealtimeData::default()),
            delivery,
            auth: Mutex::new(Ok(AuthData::custom("test-user"))),
            fail_writes: Mutex::new(None),
            auth_attempts: AtomicUsize::new(0),
        }
    }

    /// Sets the outcome of subsequent authentications.
    pub fn set_auth_result(&self, result: RemoteResult<AuthData>) {
        *self.auth.lock() = result;
    }

    /// Makes every write fail with `error` until cleared with `None`.
    pub fn set_fail_writes(&self, error: Option<RemoteError>) {
        *self.fail_writes.lock() = error;
    }

    /// Returns how many times `authenticate` was called.
    pub fn auth_attempts(&self) -> usize {
        self.auth_attempts.load(Ordering::SeqCst)
    }

    /// Returns the child at `key`.
    pub fn child(&self, key: &str) -> Option<Value> {
        self.data.lock().children.get(key).cloned()
    }

    /// Returns every child, ordered by key.
    pub fn children(&self) -> Vec<Snapshot> {
        self.data
            .lock()
            .children
            .iter()
            .map(|(k, v)| Snapshot::new(k.clone(), v.clone()))
            .collect()
    }

    /// Returns the number of attached listeners.
    pub fn listener_count(&self) -> usize {
        self.data.lock().subscriptions.len()
    }

    /// Returns the number of events awaiting [`InMemoryRealtime::flush`].
    pub fn queued_events(&self) -> usize {
        self.data.lock().queued.len()
    }

    /// Delivers every queued event in order. Returns how many were delivered.
    pub fn flush(&self) -> usize {
        let mut delivered = 0;
        loop {
            // Pop one at a time so listeners that write are queued behind.
            let next = self.data.lock().queued.pop_front();
            match next {
                Some(dispatch) => {
                    deliver(dispatch);
                    delivered += 1;
                }
                None => return delivered,
            }
        }
    }

    /// Drops queued events without delivering them.
    pub fn discard_queued(&self) -> usize {
        let mut data = self.data.lock();
        let count = data.queued.len();
        data.queued.clear();
        count
    }

    /// Terminates every subscription with `error`.
    pub fn cancel_all(&self, error: RemoteError) {
        let dispatches: Vec<Dispatch> = {
            let mut data = self.data.lock();
            std::mem::take(&mut data.subscriptions)
                .into_values()
                .map(|sub| (sub.listener, ChildEvent::Cancelled(error.clone())))
                .collect()
        };
        self.dispatch(dispatches);
    }

    fn check_writable(&self) -> RemoteResult<()> {
        match &*self.fail_writes.lock() {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    fn dispatch(&self, dispatches: Vec<Dispatch>) {
        match self.delivery {
            Delivery::Immediate => dispatches.into_iter().for_each(deliver),
            Delivery::Deferred => self.data.lock().queued.extend(dispatches),
        }
    }

    /// Writes `value` at `key` and returns the resulting events.
    fn write(data: &mut RealtimeData, key: &str, value: Value) -> Vec<Dispatch> {
        let existed = data.children.insert(key.to_string(), value.clone()).is_some();
        let mut dispatches = Vec::new();
        for sub in data.subscriptions.values() {
            if let Some(prev) = data.locate(&sub.query, key) {
                let snapshot = Snapshot::new(key, value.clone());
                let event = if existed {
                    ChildEvent::Changed(snapshot, prev)
                } else {
                    ChildEvent::Added(snapshot, prev)
                };
                dispatches.push((Arc::clone(&sub.listener), event));
            }
        }
        dispatches
    }
}

impl Default for InMemoryRealtime {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryRealtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let data = self.data.lock();
        f.debug_struct("InMemoryRealtime")
            .field("children", &data.children.len())
            .field("listeners", &data.subscriptions.len())
            .field("queued", &data.queued.len())
            .field("delivery", &self.delivery)
            .finish()
    }
}

fn deliver((listener, event): Dispatch) {
    match event {
        ChildEvent::Added(snapshot, prev) => listener.on_child_added(&snapshot, prev.as_deref()),
        ChildEvent::Changed(snapshot, prev) => {
            listener.on_child_changed(&snapshot, prev.as_deref())
        }
        ChildEvent::Removed(snapshot) => listener.on_child_removed(&snapshot),
        ChildEvent::Cancelled(error) => listener.on_cancelled(&error),
    }
}

impl RealtimeRemote for InMemoryRealtime {
    fn authenticate(&self, token: &str, handler: AuthHandler) {
        self.auth_attempts.fetch_add(1, Ordering::SeqCst);
        let result = if token.is_empty() {
            Err(RemoteError::rejected("empty auth token"))
        } else {
            self.auth.lock().clone()
        };
        handler(result);
    }

    fn subscribe(
        &self,
        query: &RealtimeQuery,
        listener: Arc<dyn ChildListener>,
    ) -> RemoteResult<ListenerId> {
        let (id, dispatches) = {
            let mut data = self.data.lock();
            data.next_listener += 1;
            let id = ListenerId(data.next_listener);

            let mut prev: Option<String> = None;
            let mut dispatches = Vec::new();
            for (key, value) in data.window(query) {
                dispatches.push((
                    Arc::clone(&listener),
                    ChildEvent::Added(Snapshot::new(key.clone(), value), prev.take()),
                ));
                prev = Some(key);
            }

            data.subscriptions.insert(
                id,
                Subscription {
                    query: query.clone(),
                    listener,
                },
            );
            (id, dispatches)
        };
        self.dispatch(dispatches);
        Ok(id)
    }

    fn unsubscribe(&self, id: ListenerId) -> RemoteResult<()> {
        self.data.lock().subscriptions.remove(&id);
        Ok(())
    }

    fn push(&self, value: Value) -> RemoteResult<String> {
        self.check_writable()?;
        let (key, dispatches) = {
            let mut data = self.data.lock();
            data.next_key += 1;
            let key = format!("-k{:012}", data.next_key);
            let dispatches = Self::write(&mut data, &key, value);
            (key, dispatches)
        };
        self.dispatch(dispatches);
        Ok(key)
    }

    fn set_value(&self, key: &str, value: Value) -> RemoteResult<()> {
        self.check_writable()?;
        let dispatches = Self::write(&mut self.data.lock(), key, value);
        self.dispatch(dispatches);
        Ok(())
    }

    fn remove_value(&self, key: &str) -> RemoteResult<()> {
        self.check_writable()?;
        let dispatches = {
            let mut data = self.data.lock();
            let watchers: Vec<Arc<dyn ChildListener>> = data
                .subscriptions
                .values()
                .filter(|sub| data.locate(&sub.query, key).is_some())
                .map(|sub| Arc::clone(&sub.listener))
                .collect();

            match data.children.remove(key) {
                Some(old) => watchers
                    .into_iter()
                    .map(|listener| {
                        (listener, ChildEvent::Removed(Snapshot::new(key, old.clone())))
                    })
                    .collect(),
                None => Vec::new(),
            }
        };
        self.dispatch(dispatches);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Default)]
    struct Log {
        events: Mutex<Vec<String>>,
    }

    impl ChildListener for Log {
        fn on_child_added(&self, snapshot: &Snapshot, prev_key: Option<&str>) {
            self.events
                .lock()
                .push(format!("added {} after {:?}", snapshot.key, prev_key));
        }

        fn on_child_changed(&self, snapshot: &Snapshot, _prev_key: Option<&str>) {
            self.events.lock().push(format!("changed {}", snapshot.key));
        }

        fn on_child_removed(&self, snapshot: &Snapshot) {
            self.events.lock().push(format!("removed {}", snapshot.key));
        }

        fn on_child_moved(&self, snapshot: &Snapshot, _prev_key: Option<&str>) {
            self.events.lock().push(format!("moved {}", snapshot.key));
        }

        fn on_cancelled(&self, error: &RemoteError) {
            self.events.lock().push(format!("cancelled {error}"));
        }
    }

    #[test]
    fn mock_call_counts_executions() {
        let counter = Arc::new(AtomicUsize::new(0));
        let call = MockCall::ok(5u32).with_counter(Arc::clone(&counter));
        assert_eq!(call.execute().unwrap(), 5);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(
            MockCall::<u32>::err(RemoteError::Timeout).execute(),
            Err(RemoteError::Timeout)
        );
    }

    #[test]
    fn recording_sink_waits() {
        let sink = Arc::new(RecordingSink::new());
        assert!(!sink.wait_for(1, Duration::from_millis(10)));

        let producer = Arc::clone(&sink);
        std::thread::spawn(move || {
            producer.notify(SyncNotification::StreamFailed {
                manager: crate::ManagerId::new(),
                error: "closed".into(),
            });
        });
        assert!(sink.wait_for(1, Duration::from_secs(5)));
        assert_eq!(sink.failures().len(), 1);
        sink.clear();
        assert!(sink.is_empty());
    }

    #[test]
    fn push_keys_are_ordered() {
        let remote = InMemoryRealtime::new();
        let a = remote.push(json!({"n": 1})).unwrap();
        let b = remote.push(json!({"n": 2})).unwrap();
        assert!(a < b);
        assert_eq!(remote.child(&b), Some(json!({"n": 2})));
    }

    #[test]
    fn writes_echo_to_listeners() {
        let remote = InMemoryRealtime::new();
        let log = Arc::new(Log::default());
        remote.subscribe(&RealtimeQuery::new(), log.clone()).unwrap();

        let key = remote.push(json!({"n": 1})).unwrap();
        remote.set_value(&key, json!({"n": 2})).unwrap();
        remote.remove_value(&key).unwrap();
        remote.remove_value("missing").unwrap();

        assert_eq!(
            *log.events.lock(),
            vec![
                format!("added {key} after None"),
                format!("changed {key}"),
                format!("removed {key}"),
            ]
        );
    }

    #[test]
    fn subscribe_delivers_window() {
        let remote = InMemoryRealtime::new();
        let keys: Vec<String> = (0..5)
            .map(|n| remote.push(json!({ "n": n })).unwrap())
            .collect();

        let log = Arc::new(Log::default());
        let query = RealtimeQuery::new().end_at(keys[3].clone()).limit_to_last(2);
        remote.subscribe(&query, log.clone()).unwrap();

        assert_eq!(
            *log.events.lock(),
            vec![
                format!("added {} after None", keys[2]),
                format!("added {} after {:?}", keys[3], Some(&keys[2])),
            ]
        );
    }

    #[test]
    fn order_by_field() {
        let remote = InMemoryRealtime::new();
        let late = remote.push(json!({"t": 300})).unwrap();
        let early = remote.push(json!({"t": 100})).unwrap();
        let data = remote.data.lock();
        let window = data.window(&RealtimeQuery::new().order_by("t"));
        let keys: Vec<_> = window.iter().map(|(k, _)| k.clone()).collect();
        assert_eq!(keys, vec![early, late]);
    }

    #[test]
    fn deferred_delivery_waits_for_flush() {
        let remote = InMemoryRealtime::with_delivery(Delivery::Deferred);
        let log = Arc::new(Log::default());
        remote.subscribe(&RealtimeQuery::new(), log.clone()).unwrap();

        remote.push(json!({"n": 1})).unwrap();
        assert!(log.events.lock().is_empty());
        assert_eq!(remote.queued_events(), 1);

        assert_eq!(remote.flush(), 1);
        assert_eq!(log.events.lock().len(), 1);
    }

    #[test]
    fn failing_writes_and_cancel() {
        let remote = InMemoryRealtime::new();
        let log = Arc::new(Log::default());
        remote.subscribe(&RealtimeQuery::new(), log.clone()).unwrap();

        remote.set_fail_writes(Some(RemoteError::transport("offline")));
        assert!(remote.push(json!({})).is_err());
        assert!(remote.children().is_empty());
        remote.set_fail_writes(None);

        remote.cancel_all(RemoteError::rejected("revoked"));
        assert_eq!(remote.listener_count(), 0);
        assert_eq!(
            log.events.lock().last().map(String::as_str),
            Some("cancelled rejected by remote: revoked")
        );
    }

    #[test]
    fn authentication_outcomes() {
        let remote = InMemoryRealtime::new();
        let result = Arc::new(Mutex::new(None));

        let slot = Arc::clone(&result);
        remote.authenticate("token", Box::new(move |r| *slot.lock() = Some(r)));
        assert!(matches!(*result.lock(), Some(Ok(_))));

        remote.set_auth_result(Err(RemoteError::rejected("bad token")));
        let slot = Arc::clone(&result);
        remote.authenticate("token", Box::new(move |r| *slot.lock() = Some(r)));
        assert!(matches!(*result.lock(), Some(Err(RemoteError::Rejected(_)))));
        assert_eq!(remote.auth_attempts(), 2);
    }
}
