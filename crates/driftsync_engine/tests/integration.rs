//! Integration tests for the sync managers against in-process remotes.

use driftsync_core::{LocalStore, Record, SyncOperation, SyncStatus};
use driftsync_engine::{
    Delivery, HttpCall, HttpMethod, HttpResponse, InMemoryRealtime, LoopbackClient,
    LoopbackServer, MockCall, NetworkStatus, RealtimeConfig, RealtimeSyncManager, RecordingSink,
    RestSyncManager, SharedConnectivity, SyncError, SyncNotification,
};
use driftsync_protocol::{RealtimeRemote, RemoteError};
use driftsync_storage::{FileStore, InMemoryStore};
use driftsync_testkit::prelude::*;
use parking_lot::Mutex;
use proptest::prelude::*;
use std::collections::BTreeMap;
use std::sync::{mpsc, Arc};
use std::time::Duration;

const BASE_URL: &str = "http://notes.test";

/// A JSON notes API: `POST /notes`, `GET /notes`, `PUT /notes/{id}`,
/// `DELETE /notes/{id}`. Stored copies get a server-side title suffix.
#[derive(Default)]
struct NotesApi {
    notes: Mutex<BTreeMap<String, Note>>,
}

impl NotesApi {
    fn accept(&self, body: &[u8]) -> HttpResponse {
        let Ok(mut note) = serde_json::from_slice::<Note>(body) else {
            return HttpResponse::new(400, "malformed note");
        };
        note.title.push_str(" (server)");
        let response = serde_json::to_vec(&note).unwrap();
        self.notes.lock().insert(note.id.clone(), note);
        HttpResponse::new(200, response)
    }
}

impl LoopbackServer for NotesApi {
    fn handle(&self, method: HttpMethod, path: &str, body: &[u8]) -> HttpResponse {
        match (method, path) {
            (HttpMethod::Post, "/notes") => self.accept(body),
            (HttpMethod::Get, "/notes") => {
                let all: Vec<Note> = self.notes.lock().values().cloned().collect();
                HttpResponse::new(200, serde_json::to_vec(&all).unwrap())
            }
            (HttpMethod::Put, p) if p.starts_with("/notes/") => self.accept(body),
            (HttpMethod::Delete, p) => match p
                .strip_prefix("/notes/")
                .and_then(|id| self.notes.lock().remove(id))
            {
                Some(note) => HttpResponse::new(200, serde_json::to_vec(&note).unwrap()),
                None => HttpResponse::new(404, "no such note"),
            },
            _ => HttpResponse::new(405, "method not allowed"),
        }
    }
}

type Client = Arc<LoopbackClient<NotesApi>>;

fn api() -> Client {
    Arc::new(LoopbackClient::new(BASE_URL, NotesApi::default()))
}

fn create_call(client: &Client, note: &Note) -> HttpCall<Client, Note> {
    HttpCall::post_json(Arc::clone(client), format!("{BASE_URL}/notes"), note).unwrap()
}

fn status_of<B: driftsync_storage::StoreBackend>(
    store: &LocalStore<B>,
    id: &str,
) -> Option<SyncStatus> {
    store.get(Note::COLLECTION, id).unwrap().map(|row| row.status)
}

#[test]
fn async_create_settles_once() {
    let test_store = TestStore::memory();
    let sink = Arc::new(RecordingSink::new());
    let manager = RestSyncManager::new(test_store.store.clone(), sink.clone());

    let record = Note::new("a1", 1000, "first");
    let server = record.clone();
    let (tx, rx) = mpsc::channel();
    manager.create_async(
        MockCall::ok(server).with_delay(Duration::from_millis(10)),
        &record,
        move |result| tx.send(result).unwrap(),
    );

    let settled = rx.recv_timeout(Duration::from_secs(5)).unwrap().unwrap();
    assert_eq!(settled, record);
    assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());

    assert_eq!(test_store.count(Note::COLLECTION, None).unwrap(), 1);
    assert_eq!(status_of(&test_store.store, "a1"), Some(SyncStatus::Synced));
    assert_eq!(sink.succeeded().len(), 1);
    assert!(sink.failures().is_empty());
}

#[test]
fn http_round_trips_store_server_copy() {
    let client = api();
    let test_store = TestStore::memory();
    let sink = Arc::new(RecordingSink::new());
    let manager = RestSyncManager::new(test_store.store.clone(), sink.clone());

    let mut note = Note::new("h1", 10, "draft");
    let created = manager.create_sync(create_call(&client, &note), &note).unwrap();
    assert_eq!(created.title, "draft (server)");

    let stored: Vec<Note> = test_store
        .load(SyncStatus::Synced, driftsync_core::SortDirection::Ascending)
        .unwrap();
    assert_eq!(stored, vec![created.clone()]);

    note.title = "final".into();
    let put = HttpCall::put_json(Arc::clone(&client), format!("{BASE_URL}/notes/h1"), &note).unwrap();
    manager.update_sync(put, &note).unwrap();
    assert_eq!(status_of(&test_store.store, "h1"), Some(SyncStatus::UpdateSynced));

    let delete = HttpCall::delete(Arc::clone(&client), format!("{BASE_URL}/notes/h1"));
    manager.delete_sync(delete, &note).unwrap();
    assert_eq!(status_of(&test_store.store, "h1"), None);

    // Deleting again hits a 404 and leaves the tombstone pending.
    let delete = HttpCall::delete(Arc::clone(&client), format!("{BASE_URL}/notes/h1"));
    let err = manager.delete_sync(delete, &note).unwrap_err();
    assert!(matches!(
        err,
        SyncError::Remote(RemoteError::Status { code: 404, .. })
    ));
    assert_eq!(status_of(&test_store.store, "h1"), Some(SyncStatus::DeletePending));
    assert_eq!(sink.succeeded().len(), 3);
    assert_eq!(sink.failures().len(), 1);
}

#[test]
fn refresh_merges_remote_list() {
    let client = api();
    client.server().accept(&serde_json::to_vec(&Note::new("r1", 1, "remote")).unwrap());

    let test_store = TestStore::memory();
    let manager = RestSyncManager::new(test_store.store.clone(), Arc::new(RecordingSink::new()));
    test_store
        .persist_one(&Note::new("local", 2, "unsent"), SyncStatus::NotSynced)
        .unwrap();

    let rows: Vec<(Note, SyncStatus)> = manager
        .refresh(HttpCall::get(Arc::clone(&client), format!("{BASE_URL}/notes")))
        .unwrap();
    let seen: Vec<(&str, SyncStatus)> = rows.iter().map(|(n, s)| (n.id.as_str(), *s)).collect();
    assert_eq!(
        seen,
        vec![("local", SyncStatus::NotSynced), ("r1", SyncStatus::Synced)]
    );
}

#[test]
fn clear_pending_scenario() {
    let test_store = scenarios::unsent_and_delete_pending();

    let report = test_store.clear_pending(Note::COLLECTION).unwrap();
    assert_eq!(report.discarded, 1);
    assert_eq!(report.reverted, 1);

    assert_eq!(
        test_store
            .count(Note::COLLECTION, Some(SyncStatus::NotSynced))
            .unwrap(),
        0
    );
    assert_eq!(status_of(&test_store.store, "doomed"), Some(SyncStatus::Synced));
}

#[tokio::test]
async fn offline_changes_replay_when_back_online() {
    let test_store = TestStore::memory();
    let connectivity = SharedConnectivity::new(NetworkStatus::Offline);
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<SyncNotification>();
    let manager = Arc::new(
        RestSyncManager::new(test_store.store.clone(), Arc::new(tx))
            .with_connectivity(Arc::new(connectivity.clone())),
    );

    for note in notes(3, 100) {
        let err = manager.create_sync(MockCall::ok(note.clone()), &note).unwrap_err();
        assert!(matches!(err, SyncError::Offline));
    }
    for _ in 0..3 {
        let notification = rx.recv().await.unwrap();
        assert!(matches!(
            notification,
            SyncNotification::SyncFailed { retryable: true, .. }
        ));
    }

    let replay = {
        let manager = Arc::clone(&manager);
        let connectivity = connectivity.clone();
        tokio::spawn(async move {
            connectivity.wait_online().await;
            tokio::task::spawn_blocking(move || {
                manager.replay_pending(SyncOperation::Create, |note: &Note| {
                    MockCall::ok(note.clone())
                })
            })
            .await
            .unwrap()
        })
    };

    connectivity.set(NetworkStatus::Unmetered);
    let report = tokio::time::timeout(Duration::from_secs(5), replay)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    assert_eq!(report.succeeded, 3);
    assert!(report.is_complete());
    assert_eq!(
        test_store
            .count(Note::COLLECTION, Some(SyncStatus::Synced))
            .unwrap(),
        3
    );
}

#[tokio::test]
async fn future_failure_reports_through_channel_sink() {
    let test_store = TestStore::memory();
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<SyncNotification>();
    let manager = RestSyncManager::new(test_store.store.clone(), Arc::new(tx));

    let note = Note::new("f1", 1, "future");
    let err = manager
        .exec_future(
            MockCall::<Note>::err(RemoteError::Cancelled),
            &note,
            SyncOperation::Create,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::Remote(RemoteError::Cancelled)));
    assert!(matches!(
        rx.recv().await.unwrap(),
        SyncNotification::SyncFailed { .. }
    ));
    assert_eq!(status_of(&test_store.store, "f1"), Some(SyncStatus::NotSynced));
}

#[test]
fn file_store_keeps_settled_status_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("notes.driftsync");

    {
        let store = LocalStore::new(FileStore::open(&path).unwrap());
        let manager = RestSyncManager::new(store, Arc::new(RecordingSink::new()));
        let settled = Note::new("p1", 1, "persisted");
        manager
            .create_sync(MockCall::ok(settled.clone()), &settled)
            .unwrap();
        let pending = Note::new("p2", 2, "pending");
        manager
            .create_sync(MockCall::err(RemoteError::Timeout), &pending)
            .unwrap_err();
    }

    let store = LocalStore::new(FileStore::open(&path).unwrap());
    assert_eq!(status_of(&store, "p1"), Some(SyncStatus::Synced));
    assert_eq!(status_of(&store, "p2"), Some(SyncStatus::NotSynced));
}

#[test]
fn realtime_write_settles_only_on_echo() {
    let remote = Arc::new(InMemoryRealtime::with_delivery(Delivery::Deferred));
    let test_store = TestStore::memory();
    let sink = Arc::new(RecordingSink::new());
    let manager: RealtimeSyncManager<InMemoryStore, Note, InMemoryRealtime> =
        RealtimeSyncManager::new(
            test_store.store.clone(),
            Arc::clone(&remote),
            RealtimeConfig::new("memory://notes", "token"),
            sink.clone(),
        );

    manager.start();
    remote.flush();
    let note = Note::new("e1", 1, "echo me");
    let correlation = manager.save(&note).unwrap();

    assert_eq!(status_of(&test_store.store, "e1"), Some(SyncStatus::NotSynced));
    assert!(sink.succeeded().is_empty());

    assert_eq!(remote.flush(), 1);
    assert_eq!(status_of(&test_store.store, "e1"), Some(SyncStatus::Synced));
    assert_eq!(sink.succeeded()[0].correlation(), Some(correlation));
}

#[test]
fn realtime_devices_converge() {
    let remote = Arc::new(InMemoryRealtime::new());
    let config = RealtimeConfig::new("memory://notes", "token").with_standard_limit(10);

    let phone_store = TestStore::memory();
    let phone_sink = Arc::new(RecordingSink::new());
    let phone: RealtimeSyncManager<_, Note, _> = RealtimeSyncManager::new(
        phone_store.store.clone(),
        Arc::clone(&remote),
        config.clone(),
        phone_sink.clone(),
    );
    let laptop_store = TestStore::memory();
    let laptop_sink = Arc::new(RecordingSink::new());
    let laptop: RealtimeSyncManager<_, Note, _> = RealtimeSyncManager::new(
        laptop_store.store.clone(),
        Arc::clone(&remote),
        config,
        laptop_sink.clone(),
    );
    phone.start();
    laptop.start();

    let mut note = Note::new("shared", 1, "from phone");
    phone.save(&note).unwrap();
    assert_eq!(status_of(&laptop_store.store, "shared"), Some(SyncStatus::Synced));
    assert_eq!(phone.remote_key("shared"), laptop.remote_key("shared"));
    assert_eq!(
        laptop_sink
            .matching(|n| matches!(n, SyncNotification::RemoteApplied { .. }))
            .len(),
        1
    );

    note.title = "edited on laptop".into();
    laptop.update(&note).unwrap();
    let on_phone: Vec<(Note, SyncStatus)> = phone.select_all().unwrap();
    assert_eq!(on_phone, vec![(note.clone(), SyncStatus::UpdateSynced)]);

    phone.delete(&note).unwrap();
    assert_eq!(status_of(&phone_store.store, "shared"), None);
    assert_eq!(status_of(&laptop_store.store, "shared"), None);
    assert_eq!(remote.children().len(), 0);
}

#[test]
fn realtime_remote_origin_children_fill_store() {
    let remote = Arc::new(InMemoryRealtime::new());
    for note in notes(5, 100) {
        remote.push(note.to_json()).unwrap();
    }

    let test_store = TestStore::memory();
    let manager: RealtimeSyncManager<_, Note, _> = RealtimeSyncManager::new(
        test_store.store.clone(),
        Arc::clone(&remote),
        RealtimeConfig::new("memory://notes", "token").with_standard_limit(3),
        Arc::new(RecordingSink::new()),
    );
    manager.start();

    // Only the newest three children are in the window.
    let ids: Vec<String> = manager
        .select_all()
        .unwrap()
        .into_iter()
        .map(|(n, _)| n.id)
        .collect();
    assert_eq!(ids, vec!["n4", "n3", "n2"]);

    // Paging from the oldest known record pulls in the older children.
    let page = manager.select_from("n2").unwrap();
    let ids: Vec<&str> = page.iter().map(|(n, _)| n.id.as_str()).collect();
    assert_eq!(ids, vec!["n2", "n1", "n0"]);
}

proptest! {
    #![proptest_config(PropTestConfig::quick().to_proptest_config())]

    #[test]
    fn failed_call_leaves_status_before(
        stored in stored_notes_strategy(6),
        operation in operation_strategy(),
    ) {
        let test_store = TestStore::memory();
        for (note, status) in &stored {
            test_store.persist_one(note, *status).unwrap();
        }
        let sink = Arc::new(RecordingSink::new());
        let manager = RestSyncManager::new(test_store.store.clone(), sink.clone());

        for (note, _) in &stored {
            let result = manager.exec_sync(MockCall::<Note>::err(RemoteError::Timeout), note, operation);
            prop_assert!(result.is_err());
            prop_assert_eq!(status_of(&test_store.store, &note.id), Some(operation.status_before()));
        }
        prop_assert_eq!(sink.failures().len(), stored.len());
        prop_assert!(sink.succeeded().is_empty());
    }

    #[test]
    fn acknowledged_call_reaches_status_after(
        note in note_strategy(),
        operation in operation_strategy(),
    ) {
        let test_store = TestStore::memory();
        let manager = RestSyncManager::new(test_store.store.clone(), Arc::new(RecordingSink::new()));

        manager.exec_sync(MockCall::ok(note.clone()), &note, operation).unwrap();
        let expected = operation.status_after();
        let actual = status_of(&test_store.store, &note.id);
        if expected.is_resident() {
            prop_assert_eq!(actual, Some(expected));
            prop_assert_eq!(test_store.count(Note::COLLECTION, None).unwrap(), 1);
        } else {
            prop_assert_eq!(actual, None);
        }
    }
}
