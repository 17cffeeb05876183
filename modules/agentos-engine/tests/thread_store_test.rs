//! Behaviour shared by both thread stores, plus file-store specifics.

use std::time::Duration;

use agentos_engine::{
    Event, FileThreadStore, MemoryThreadStore, StoreError, ThreadStatus, ThreadStore,
};
use serde_json::{json, Map, Value};
use tempfile::TempDir;

fn completed(name: &str, result: Value) -> Event {
    let mut event = Event::new(name, json!({}));
    event.complete(result);
    event
}

fn patch(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => panic!("expected object, got {other}"),
    }
}

async fn pause() {
    tokio::time::sleep(Duration::from_millis(5)).await;
}

fn file_store() -> (TempDir, FileThreadStore) {
    let tmp = tempfile::tempdir().unwrap();
    let store = FileThreadStore::new(tmp.path().join("threads"));
    (tmp, store)
}

// ---------------------------------------------------------------------------
// Shared scenarios
// ---------------------------------------------------------------------------

async fn create_and_get(store: &dyn ThreadStore) {
    let created = store.create(Some("t1"), Some("Trip to Lisbon")).await.unwrap();
    assert_eq!(created.thread_id, "t1");
    assert_eq!(created.summary, "Trip to Lisbon");
    assert_eq!(created.status, ThreadStatus::Active);
    assert_eq!(created.events.len(), 1);
    assert_eq!(created.events[0].name, "thread.created");
    assert_eq!(created.events[0].source, "thread_store");

    let fetched = store.get("t1").await.unwrap().unwrap();
    assert_eq!(fetched, created);
    assert!(store.get("missing").await.unwrap().is_none());

    let generated = store.create(None, None).await.unwrap();
    assert!(generated.thread_id.starts_with("thread_"));
    assert!(generated.summary.starts_with("Thread created at "));

    match store.create(Some("t1"), None).await {
        Err(StoreError::AlreadyExists(id)) => assert_eq!(id, "t1"),
        other => panic!("expected AlreadyExists, got {other:?}"),
    }
}

async fn append_preserves_order(store: &dyn ThreadStore) {
    store.create(Some("t1"), None).await.unwrap();
    let before = store.get("t1").await.unwrap().unwrap();

    pause().await;
    store
        .append_event("t1", completed("tools.now", json!("09:30")))
        .await
        .unwrap();
    store
        .append_event("t1", completed("tools.date_calc", json!({"days": 7})))
        .await
        .unwrap();

    let after = store.get("t1").await.unwrap().unwrap();
    let names: Vec<&str> = after.events.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, vec!["thread.created", "tools.now", "tools.date_calc"]);
    assert!(after.updated_at > before.updated_at);
    assert_eq!(after.created_at, before.created_at);

    match store.append_event("missing", completed("x.y", json!(1))).await {
        Err(StoreError::NotFound(id)) => assert_eq!(id, "missing"),
        other => panic!("expected NotFound, got {other:?}"),
    }
}

async fn list_newest_first_with_filter(store: &dyn ThreadStore) {
    store.create(Some("old"), None).await.unwrap();
    pause().await;
    store.create(Some("mid"), None).await.unwrap();
    pause().await;
    store.create(Some("new"), None).await.unwrap();
    pause().await;
    store
        .append_event("old", completed("tools.now", json!("now")))
        .await
        .unwrap();
    pause().await;
    store.archive("mid").await.unwrap();

    let all: Vec<String> = store
        .list(None)
        .await
        .unwrap()
        .into_iter()
        .map(|t| t.thread_id)
        .collect();
    assert_eq!(all, vec!["mid", "old", "new"]);

    let active: Vec<String> = store
        .list(Some(ThreadStatus::Active))
        .await
        .unwrap()
        .into_iter()
        .map(|t| t.thread_id)
        .collect();
    assert_eq!(active, vec!["old", "new"]);

    let archived = store.list(Some(ThreadStatus::Archived)).await.unwrap();
    assert_eq!(archived.len(), 1);
    assert_eq!(archived[0].thread_id, "mid");
}

async fn archive_is_idempotent(store: &dyn ThreadStore) {
    store.create(Some("t1"), None).await.unwrap();

    let archived = store.archive("t1").await.unwrap();
    assert_eq!(archived.status, ThreadStatus::Archived);
    assert_eq!(archived.events.last().unwrap().name, "thread.archived");

    let again = store.archive("t1").await.unwrap();
    assert_eq!(again.events.len(), archived.events.len());

    assert!(matches!(
        store.archive("missing").await,
        Err(StoreError::NotFound(_))
    ));
}

async fn search_active_threads(store: &dyn ThreadStore) {
    store.create(Some("a"), Some("Weekend in Porto")).await.unwrap();
    pause().await;
    store.create(Some("b"), Some("Groceries")).await.unwrap();
    store
        .append_event("b", completed("shop.list", json!(["bread", "PORTO wine"])))
        .await
        .unwrap();
    pause().await;
    store.create(Some("c"), Some("Porto again")).await.unwrap();
    store.archive("c").await.unwrap();

    let hits: Vec<String> = store
        .search("porto", 10)
        .await
        .unwrap()
        .into_iter()
        .map(|t| t.thread_id)
        .collect();
    assert_eq!(hits, vec!["b", "a"]);

    assert_eq!(store.search("porto", 1).await.unwrap().len(), 1);
    assert!(store.search("lisbon", 10).await.unwrap().is_empty());
}

async fn metadata_merges_shallowly(store: &dyn ThreadStore) {
    store.create(Some("t1"), None).await.unwrap();

    store
        .update_metadata("t1", patch(json!({"user": "ana", "tags": ["trip"]})))
        .await
        .unwrap();
    let updated = store
        .update_metadata("t1", patch(json!({"tags": ["work"], "priority": 2})))
        .await
        .unwrap();

    assert_eq!(
        Value::Object(updated.metadata.clone()),
        json!({"user": "ana", "tags": ["work"], "priority": 2})
    );
    assert_eq!(store.get("t1").await.unwrap().unwrap().metadata, updated.metadata);
    assert!(matches!(
        store.update_metadata("missing", Map::new()).await,
        Err(StoreError::NotFound(_))
    ));
}

// =========================================================================
// MemoryThreadStore
// =========================================================================

#[tokio::test]
async fn memory_create_and_get() {
    create_and_get(&MemoryThreadStore::new()).await;
}

#[tokio::test]
async fn memory_append_preserves_order() {
    append_preserves_order(&MemoryThreadStore::new()).await;
}

#[tokio::test]
async fn memory_list_newest_first_with_filter() {
    list_newest_first_with_filter(&MemoryThreadStore::new()).await;
}

#[tokio::test]
async fn memory_archive_is_idempotent() {
    archive_is_idempotent(&MemoryThreadStore::new()).await;
}

#[tokio::test]
async fn memory_search_active_threads() {
    search_active_threads(&MemoryThreadStore::new()).await;
}

#[tokio::test]
async fn memory_metadata_merges_shallowly() {
    metadata_merges_shallowly(&MemoryThreadStore::new()).await;
}

// =========================================================================
// FileThreadStore
// =========================================================================

#[tokio::test]
async fn file_create_and_get() {
    let (_tmp, store) = file_store();
    create_and_get(&store).await;
    assert!(store.dir().join("t1.json").exists());
}

#[tokio::test]
async fn file_append_preserves_order() {
    let (_tmp, store) = file_store();
    append_preserves_order(&store).await;
}

#[tokio::test]
async fn file_list_newest_first_with_filter() {
    let (_tmp, store) = file_store();
    list_newest_first_with_filter(&store).await;
}

#[tokio::test]
async fn file_archive_is_idempotent() {
    let (_tmp, store) = file_store();
    archive_is_idempotent(&store).await;
}

#[tokio::test]
async fn file_search_active_threads() {
    let (_tmp, store) = file_store();
    search_active_threads(&store).await;
}

#[tokio::test]
async fn file_metadata_merges_shallowly() {
    let (_tmp, store) = file_store();
    metadata_merges_shallowly(&store).await;
}

#[tokio::test]
async fn file_store_survives_reopen() {
    let (tmp, store) = file_store();
    store.create(Some("t1"), Some("Persisted")).await.unwrap();
    store
        .append_event("t1", completed("tools.now", json!("09:30")))
        .await
        .unwrap();
    store
        .update_metadata("t1", patch(json!({"owner": "ops"})))
        .await
        .unwrap();
    let original = store.get("t1").await.unwrap().unwrap();
    drop(store);

    let reopened = FileThreadStore::new(tmp.path().join("threads"));
    let loaded = reopened.get("t1").await.unwrap().unwrap();
    assert_eq!(loaded, original);
    assert_eq!(reopened.list(None).await.unwrap().len(), 1);

    let document: Value =
        serde_json::from_slice(&std::fs::read(reopened.dir().join("t1.json")).unwrap()).unwrap();
    assert_eq!(document["threadId"], "t1");
    assert_eq!(document["status"], "active");
    assert_eq!(document["metadata"]["owner"], "ops");
    assert!(!reopened.dir().join("t1.json.tmp").exists());
}

#[tokio::test]
async fn file_store_reports_corrupt_documents() {
    let (_tmp, store) = file_store();
    store.create(Some("good"), None).await.unwrap();
    std::fs::write(store.dir().join("bad.json"), "{not json").unwrap();

    match store.get("bad").await {
        Err(StoreError::Corrupt { path, .. }) => assert!(path.ends_with("bad.json")),
        other => panic!("expected Corrupt, got {other:?}"),
    }

    let listed = store.list(None).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].thread_id, "good");
}

#[tokio::test]
async fn file_store_rejects_path_like_ids() {
    let (_tmp, store) = file_store();

    for id in ["../escape", "a/b", ".."] {
        assert!(
            matches!(store.get(id).await, Err(StoreError::InvalidId(_))),
            "{id} should be rejected"
        );
        assert!(matches!(
            store.create(Some(id), None).await,
            Err(StoreError::InvalidId(_))
        ));
    }
}

#[tokio::test]
async fn missing_directory_lists_empty() {
    let tmp = tempfile::tempdir().unwrap();
    let store = FileThreadStore::new(tmp.path().join("nowhere"));

    assert!(store.list(None).await.unwrap().is_empty());
    assert!(store.get("t1").await.unwrap().is_none());
}
