//! Persistence integration tests.
//!
//! Verifies:
//! - Edits made offline survive closing and reopening the RocksDB store
//! - Names and remote changes are mirrored to disk
//! - A reopened document pushes its offline backlog once signed in

use std::sync::Arc;

use tempfile::tempdir;
use tokio::time::{sleep, Duration, Instant};
use veil_core::DeltaOp;
use veil_sync::editor::Origin;
use veil_sync::library;
use veil_sync::scope::changes_scope;
use veil_sync::{
    DocumentSession, DocumentSource, Hub, LocalStore, RocksStore, StoreConfig, SyncConfig,
};

fn open_store(path: &std::path::Path) -> Arc<RocksStore> {
    Arc::new(RocksStore::open(StoreConfig::for_testing(path)).unwrap())
}

#[tokio::test]
async fn test_offline_edits_survive_reopen() {
    let dir = tempdir().unwrap();
    let hub = Hub::new();

    let id = {
        let store = open_store(dir.path());
        let id = library::create_document(store.as_ref()).unwrap();
        let session = DocumentSession::open(
            DocumentSource::Local(id),
            store.clone(),
            Arc::new(hub.connect(None)),
            SyncConfig::for_testing(),
        )
        .await
        .unwrap();
        session
            .on_editor_change(&[DeltaOp::insert("Draft")], Origin::User)
            .await
            .unwrap();
        session
            .on_editor_change(&[DeltaOp::retain(5), DeltaOp::insert(" one")], Origin::User)
            .await
            .unwrap();
        assert!(session.commit_name("Notes").await);
        session.close().await;
        store.flush().unwrap();
        id
    };

    let store = open_store(dir.path());
    let listed = library::list_documents(store.as_ref()).unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, id);
    assert_eq!(listed[0].name, "Notes");

    let loaded = library::load_document(store.as_ref(), id).unwrap().unwrap();
    assert_eq!(loaded.replica.text(), "Draft one\n");
    assert_eq!(loaded.changes.len(), 3);
}

#[tokio::test]
async fn test_reopened_document_pushes_backlog() {
    let dir = tempdir().unwrap();
    let hub = Hub::new();

    let id = {
        let store = open_store(dir.path());
        let id = library::create_document(store.as_ref()).unwrap();
        let session = DocumentSession::open(
            DocumentSource::Local(id),
            store.clone(),
            Arc::new(hub.connect(None)),
            SyncConfig::for_testing(),
        )
        .await
        .unwrap();
        session
            .on_editor_change(&[DeltaOp::insert("written on a plane")], Origin::User)
            .await
            .unwrap();
        session.close().await;
        id
    };

    let store = open_store(dir.path());
    let session = DocumentSession::open(
        DocumentSource::Local(id),
        store.clone(),
        Arc::new(hub.connect(Some("alice"))),
        SyncConfig::for_testing(),
    )
    .await
    .unwrap();
    assert_eq!(session.text().await, "written on a plane\n");

    let deadline = Instant::now() + Duration::from_secs(5);
    while hub.items("alice", &changes_scope(&id)).len() < 2 {
        assert!(Instant::now() < deadline, "backlog never pushed");
        sleep(Duration::from_millis(10)).await;
    }
    session.close().await;
}

#[tokio::test]
async fn test_store_scopes_index_documents() {
    let dir = tempdir().unwrap();
    let store = open_store(dir.path());
    let first = library::create_document(store.as_ref()).unwrap();
    let second = library::create_document(store.as_ref()).unwrap();

    let scopes = store.list_scopes().unwrap();
    assert!(scopes.contains(&changes_scope(&first)));
    assert!(scopes.contains(&changes_scope(&second)));

    let mut ids: Vec<_> = library::list_documents(store.as_ref())
        .unwrap()
        .into_iter()
        .map(|doc| doc.id)
        .collect();
    ids.sort();
    let mut expected = vec![first, second];
    expected.sort();
    assert_eq!(ids, expected);
}
