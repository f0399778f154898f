use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::store::kv::Action;
use crate::store::{layout, Store, StoreError};

/// Liveness TTL for a heartbeat refreshed every `interval`: three intervals,
/// but never below three seconds.
pub fn ttl_for_interval(interval: Duration) -> Duration {
    if interval < Duration::from_secs(1) {
        Duration::from_secs(3)
    } else {
        Duration::from_secs(3 * interval.as_secs())
    }
}

/// Refresh the liveness key for `task_id` every `interval` until cancelled.
///
/// A failed refresh is returned to the caller; the node must treat it as
/// fatal, which lets the failure detector hand the slot to a replacement.
pub async fn heartbeat(
    store: &dyn Store,
    job: &str,
    task_id: u64,
    interval: Duration,
    cancel: CancellationToken,
) -> Result<(), StoreError> {
    let key = layout::healthy_path(job, task_id);
    let ttl = ttl_for_interval(interval);
    loop {
        store.set(&key, layout::HEALTH_VALUE, Some(ttl)).await?;
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = cancel.cancelled() => return Ok(()),
        }
    }
}

/// Watch the liveness directory and publish a free-task marker for every
/// expired or deleted key. Individual failures are logged; the detector keeps
/// running until cancelled.
pub async fn detect_failures(store: Arc<dyn Store>, job: String, cancel: CancellationToken) {
    let mut events = store.watch(&layout::healthy_dir(&job), 0, true).await;
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => return,
            event = events.recv() => match event {
                Some(event) => event,
                None => return,
            },
        };
        if event.action != Action::Expire && event.action != Action::Delete {
            continue;
        }
        let Some(task_id) = layout::task_id_from_key(&event.key) else {
            tracing::warn!("unparseable liveness key {}", event.key);
            continue;
        };
        tracing::info!("task {} liveness lost, reporting failure", task_id);
        if let Err(e) = report_failure(store.as_ref(), &job, task_id).await {
            tracing::warn!("reporting failure of task {} failed: {}", task_id, e);
        }
    }
}

/// Mark `task_id` as free for a replacement node to claim.
pub async fn report_failure(store: &dyn Store, job: &str, task_id: u64) -> Result<(), StoreError> {
    store
        .set(&layout::free_task_path(job, task_id), layout::FAILED_VALUE, None)
        .await?;
    Ok(())
}
