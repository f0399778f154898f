//! Store Module Tests
//!
//! Covers the canonical path layout, the compare-and-swap and create
//! semantics the occupier and epoch logic depend on, and the watch contract:
//! history replay from an index, live-only subscription, recursive prefix
//! watches, and TTL expiry events.

use std::time::Duration;

use crate::store::kv::{Action, Store, StoreError};
use crate::store::{layout, MemoryStore};

// ============================================================
// Layout
// ============================================================

#[test]
fn layout_paths_are_canonical() {
    assert_eq!(layout::epoch_path("job"), "/job/epoch");
    assert_eq!(layout::slot_path("job", 3), "/job/tasks/3/0");
    assert_eq!(layout::parent_meta_path("job", 3), "/job/tasks/3/ParentMeta");
    assert_eq!(layout::child_meta_path("job", 3), "/job/tasks/3/ChildMeta");
    assert_eq!(layout::healthy_path("job", 7), "/job/healthy/7");
    assert_eq!(layout::free_task_path("job", 7), "/job/freetasks/7");
    assert_eq!(layout::SLOT_VACANT, "empty");
    assert_eq!(layout::EPOCH_SHUTDOWN.to_string(), u64::MAX.to_string());
}

#[test]
fn task_ids_parse_from_keys() {
    assert_eq!(layout::task_id_from_key("/job/healthy/12"), Some(12));
    assert_eq!(layout::task_id_from_key("/job/freetasks/0"), Some(0));
    assert_eq!(layout::task_id_from_key("/job/healthy/bogus"), None);

    assert_eq!(layout::slot_task_id("/job/tasks/5/0"), Some(5));
    assert_eq!(layout::slot_task_id("/job/tasks/5/ParentMeta"), None);
}

// ============================================================
// Keys, create, compare-and-swap
// ============================================================

#[tokio::test]
async fn get_missing_key_returns_none_with_index() {
    let store = MemoryStore::new();
    let read = store.get("/job/epoch").await.unwrap();
    assert!(read.entry.is_none());

    store.set("/job/epoch", "0", None).await.unwrap();
    let read = store.get("/job/epoch").await.unwrap();
    assert_eq!(read.entry.unwrap().value, "0");
    assert!(read.index >= 1);
}

#[tokio::test]
async fn create_fails_on_existing_key() {
    let store = MemoryStore::new();
    store.create("/job/tasks/1/ParentMeta", "").await.unwrap();
    let err = store.create("/job/tasks/1/ParentMeta", "").await.unwrap_err();
    assert!(matches!(err, StoreError::KeyExists(_)));
}

#[tokio::test]
async fn compare_and_swap_arbitrates() {
    let store = MemoryStore::new();
    store.set("/job/tasks/0/0", "empty", None).await.unwrap();

    store
        .compare_and_swap("/job/tasks/0/0", "empty", "127.0.0.1:4000")
        .await
        .unwrap();

    // The loser of the race sees the winner's value.
    let err = store
        .compare_and_swap("/job/tasks/0/0", "empty", "127.0.0.1:5000")
        .await
        .unwrap_err();
    match err {
        StoreError::CasFailed { actual, .. } => {
            assert_eq!(actual.as_deref(), Some("127.0.0.1:4000"));
        }
        other => panic!("expected CasFailed, got {other:?}"),
    }

    let read = store.get("/job/tasks/0/0").await.unwrap();
    assert_eq!(read.entry.unwrap().value, "127.0.0.1:4000");
}

#[tokio::test]
async fn cas_on_missing_key_fails() {
    let store = MemoryStore::new();
    let err = store
        .compare_and_swap("/job/epoch", "0", "1")
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::CasFailed { actual: None, .. }));
}

// ============================================================
// Watches
// ============================================================

#[tokio::test]
async fn repeated_identical_sets_fire_watchers() {
    let store = MemoryStore::new();
    let mut events = store.watch("/job/tasks/1/ChildMeta", 0, false).await;

    store.set("/job/tasks/1/ChildMeta", "ParamReady", None).await.unwrap();
    store.set("/job/tasks/1/ChildMeta", "ParamReady", None).await.unwrap();

    let first = events.recv().await.unwrap();
    let second = events.recv().await.unwrap();
    assert_eq!(first.value.as_deref(), Some("ParamReady"));
    assert_eq!(second.value.as_deref(), Some("ParamReady"));
    assert!(second.index > first.index);
}

#[tokio::test]
async fn watch_replays_history_from_index() {
    let store = MemoryStore::new();
    store.set("/job/epoch", "0", None).await.unwrap();
    store.set("/job/epoch", "1", None).await.unwrap();
    store.set("/job/epoch", "2", None).await.unwrap();

    let mut events = store.watch("/job/epoch", 1, false).await;
    for expected in ["0", "1", "2"] {
        let event = events.recv().await.unwrap();
        assert_eq!(event.action, Action::Set);
        assert_eq!(event.value.as_deref(), Some(expected));
    }

    // Still live after replay.
    store.set("/job/epoch", "3", None).await.unwrap();
    assert_eq!(events.recv().await.unwrap().value.as_deref(), Some("3"));
}

#[tokio::test]
async fn live_watch_skips_prior_events() {
    let store = MemoryStore::new();
    store.set("/job/epoch", "0", None).await.unwrap();

    let mut events = store.watch("/job/epoch", 0, false).await;
    store.set("/job/epoch", "1", None).await.unwrap();

    let event = events.recv().await.unwrap();
    assert_eq!(event.value.as_deref(), Some("1"));
}

#[tokio::test]
async fn read_index_continues_watch_without_gap() {
    let store = MemoryStore::new();
    store.set("/job/epoch", "0", None).await.unwrap();

    let read = store.get("/job/epoch").await.unwrap();
    let mut events = store.watch("/job/epoch", read.index + 1, false).await;

    store.set("/job/epoch", "1", None).await.unwrap();
    // The set observed by the read is not re-delivered.
    let event = events.recv().await.unwrap();
    assert_eq!(event.value.as_deref(), Some("1"));
}

#[tokio::test]
async fn recursive_watch_covers_subtree() {
    let store = MemoryStore::new();
    let mut events = store.watch("/job/healthy", 0, true).await;

    store.set("/job/healthy/4", "health", None).await.unwrap();
    store.set("/job/tasks/4/0", "addr", None).await.unwrap();
    store.set("/job/healthy/9", "health", None).await.unwrap();

    assert_eq!(events.recv().await.unwrap().key, "/job/healthy/4");
    // The unrelated key never shows up.
    assert_eq!(events.recv().await.unwrap().key, "/job/healthy/9");
}

#[tokio::test]
async fn ttl_expiry_emits_expire_event() {
    let store = MemoryStore::new();
    let mut events = store.watch("/job/healthy", 0, true).await;

    store
        .set("/job/healthy/2", "health", Some(Duration::from_millis(100)))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(400)).await;

    let set = events.recv().await.unwrap();
    assert_eq!(set.action, Action::Set);
    let expire = events.recv().await.unwrap();
    assert_eq!(expire.action, Action::Expire);
    assert_eq!(expire.key, "/job/healthy/2");

    assert!(store.get("/job/healthy/2").await.unwrap().entry.is_none());
}

#[tokio::test]
async fn refresh_extends_ttl() {
    let store = MemoryStore::new();
    store
        .set("/job/healthy/2", "health", Some(Duration::from_millis(200)))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(120)).await;
    store
        .set("/job/healthy/2", "health", Some(Duration::from_millis(200)))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(120)).await;

    // Alive past the original deadline thanks to the refresh.
    assert!(store.get("/job/healthy/2").await.unwrap().entry.is_some());
}

// ============================================================
// Listing and teardown
// ============================================================

#[tokio::test]
async fn list_returns_sorted_subtree() {
    let store = MemoryStore::new();
    store.set("/job/freetasks/9", "failed", None).await.unwrap();
    store.set("/job/freetasks/2", "failed", None).await.unwrap();
    store.set("/job/epoch", "0", None).await.unwrap();

    let listing = store.list("/job/freetasks").await.unwrap();
    let keys: Vec<&str> = listing.entries.iter().map(|e| e.key.as_str()).collect();
    assert_eq!(keys, vec!["/job/freetasks/2", "/job/freetasks/9"]);

    let empty = store.list("/job/healthy").await.unwrap();
    assert!(empty.entries.is_empty());
}

#[tokio::test]
async fn delete_prefix_removes_job_subtree() {
    let store = MemoryStore::new();
    store.set("/job/epoch", "0", None).await.unwrap();
    store.set("/job/tasks/0/0", "empty", None).await.unwrap();
    store.set("/other/epoch", "0", None).await.unwrap();

    store.delete_prefix("/job").await.unwrap();

    assert!(store.get("/job/epoch").await.unwrap().entry.is_none());
    assert!(store.get("/job/tasks/0/0").await.unwrap().entry.is_none());
    assert!(store.get("/other/epoch").await.unwrap().entry.is_some());
}
