//! Membership Module Tests
//!
//! Heartbeat TTL computation and refresh, failure detection round-trip
//! (expiry to free-task marker), and the slot occupier: racing initial
//! claims, replacement claims, and the bounded free-task wait.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::membership::heartbeat::{detect_failures, heartbeat, report_failure, ttl_for_interval};
use crate::membership::occupy::{occupy_slot, wait_free_task, OccupyError};
use crate::store::{layout, MemoryStore, Store};

async fn seeded_store(job: &str, num_tasks: u64) -> Arc<dyn Store> {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    for task_id in 0..num_tasks {
        store
            .set(&layout::slot_path(job, task_id), layout::SLOT_VACANT, None)
            .await
            .unwrap();
    }
    store
}

// ============================================================
// Heartbeat and failure detection
// ============================================================

#[test]
fn ttl_never_drops_below_three_seconds() {
    assert_eq!(ttl_for_interval(Duration::from_millis(100)), Duration::from_secs(3));
    assert_eq!(ttl_for_interval(Duration::from_secs(1)), Duration::from_secs(3));
    assert_eq!(ttl_for_interval(Duration::from_secs(2)), Duration::from_secs(6));
}

#[tokio::test]
async fn heartbeat_publishes_health_until_cancelled() {
    let store = seeded_store("hb", 1).await;
    let cancel = CancellationToken::new();

    let handle = {
        let store = store.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            heartbeat(store.as_ref(), "hb", 0, Duration::from_millis(50), cancel).await
        })
    };

    tokio::time::sleep(Duration::from_millis(150)).await;
    let read = store.get(&layout::healthy_path("hb", 0)).await.unwrap();
    assert_eq!(read.entry.unwrap().value, layout::HEALTH_VALUE);

    cancel.cancel();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn detector_converts_expiry_into_free_task() {
    let store = seeded_store("det", 2).await;
    let cancel = CancellationToken::new();
    tokio::spawn(detect_failures(store.clone(), "det".into(), cancel.clone()));
    tokio::time::sleep(Duration::from_millis(50)).await;

    // A node that stops refreshing: the key expires on its own.
    store
        .set(
            &layout::healthy_path("det", 1),
            layout::HEALTH_VALUE,
            Some(Duration::from_millis(100)),
        )
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(500)).await;
    let marker = store.get(&layout::free_task_path("det", 1)).await.unwrap();
    assert_eq!(marker.entry.unwrap().value, layout::FAILED_VALUE);

    cancel.cancel();
}

#[tokio::test]
async fn report_failure_writes_marker() {
    let store = seeded_store("rep", 1).await;
    report_failure(store.as_ref(), "rep", 0).await.unwrap();
    let marker = store.get(&layout::free_task_path("rep", 0)).await.unwrap();
    assert_eq!(marker.entry.unwrap().value, layout::FAILED_VALUE);
}

// ============================================================
// Slot occupier
// ============================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_nodes_occupy_distinct_slots() {
    let num_tasks = 8;
    let store = seeded_store("race", num_tasks).await;

    let mut claims = Vec::new();
    for node in 0..num_tasks {
        let store = store.clone();
        claims.push(tokio::spawn(async move {
            occupy_slot(store.as_ref(), "race", &format!("127.0.0.1:{}", 5000 + node))
                .await
                .unwrap()
        }));
    }

    let mut assigned = HashSet::new();
    for claim in claims {
        assert!(assigned.insert(claim.await.unwrap()), "slot claimed twice");
    }
    assert_eq!(assigned, (0..num_tasks).collect::<HashSet<_>>());

    // Every slot now carries an address, none is vacant.
    for task_id in 0..num_tasks {
        let read = store.get(&layout::slot_path("race", task_id)).await.unwrap();
        assert_ne!(read.entry.unwrap().value, layout::SLOT_VACANT);
    }
}

#[tokio::test]
async fn replacement_claims_failed_slot_and_clears_marker() {
    let store = seeded_store("repl", 3).await;
    for task_id in 0..3 {
        occupy_slot(store.as_ref(), "repl", &format!("127.0.0.1:{}", 6000 + task_id))
            .await
            .unwrap();
    }

    report_failure(store.as_ref(), "repl", 1).await.unwrap();

    let claimed = occupy_slot(store.as_ref(), "repl", "127.0.0.1:7000").await.unwrap();
    assert_eq!(claimed, 1);

    let slot = store.get(&layout::slot_path("repl", 1)).await.unwrap();
    assert_eq!(slot.entry.unwrap().value, "127.0.0.1:7000");
    let marker = store.get(&layout::free_task_path("repl", 1)).await.unwrap();
    assert!(marker.entry.is_none(), "marker survives the claim");
}

#[tokio::test]
async fn waiter_is_woken_by_new_failure() {
    let store = seeded_store("wake", 2).await;
    for task_id in 0..2 {
        occupy_slot(store.as_ref(), "wake", &format!("127.0.0.1:{}", 6100 + task_id))
            .await
            .unwrap();
    }

    let waiter = {
        let store = store.clone();
        tokio::spawn(async move { occupy_slot(store.as_ref(), "wake", "127.0.0.1:7100").await })
    };

    tokio::time::sleep(Duration::from_millis(100)).await;
    report_failure(store.as_ref(), "wake", 0).await.unwrap();

    let claimed = tokio::time::timeout(Duration::from_secs(5), waiter)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(claimed, 0);
}

#[tokio::test(start_paused = true)]
async fn free_task_wait_times_out_after_ten_seconds() {
    let store = seeded_store("timeout", 1).await;
    let started = tokio::time::Instant::now();
    let err = wait_free_task(store.as_ref(), "timeout").await.unwrap_err();
    assert!(matches!(err, OccupyError::WaitTimeout));
    assert!(started.elapsed() >= Duration::from_secs(10));
}
