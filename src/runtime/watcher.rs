use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::protocol::LoopEvent;
use super::RuntimeError;
use crate::store::kv::Action;
use crate::store::{layout, Store};

/// Which side of the topology a neighbor sits on. A node watches the key its
/// neighbor writes *to it*: a parent's `ChildMeta`, a child's `ParentMeta`.
#[derive(Debug, Clone, Copy)]
pub(crate) enum NeighborRole {
    Parent,
    Child,
}

/// Spawn one meta watcher per neighbor. Each watcher resumes from the
/// caller-maintained per-key cursor (index 1 for keys never watched), so the
/// delivery stream stays gap-free across the per-epoch teardown and restart
/// of watchers. Only `set` events are meta notifications.
pub(crate) async fn watch_neighbors(
    store: &Arc<dyn Store>,
    job: &str,
    role: NeighborRole,
    neighbor_ids: &[u64],
    cursors: &HashMap<String, u64>,
    events: mpsc::Sender<LoopEvent>,
) -> Vec<JoinHandle<()>> {
    let mut handles = Vec::with_capacity(neighbor_ids.len());
    for &neighbor in neighbor_ids {
        let key = match role {
            NeighborRole::Parent => layout::child_meta_path(job, neighbor),
            NeighborRole::Child => layout::parent_meta_path(job, neighbor),
        };
        let since = cursors.get(&key).copied().unwrap_or(1);
        let mut watch = store.watch(&key, since, false).await;
        let events = events.clone();
        handles.push(tokio::spawn(async move {
            while let Some(event) = watch.recv().await {
                if event.action != Action::Set {
                    continue;
                }
                let meta = event.value.unwrap_or_default();
                let loop_event = match role {
                    NeighborRole::Parent => LoopEvent::ParentMeta {
                        parent_id: neighbor,
                        meta,
                        key: event.key,
                        index: event.index,
                    },
                    NeighborRole::Child => LoopEvent::ChildMeta {
                        child_id: neighbor,
                        meta,
                        key: event.key,
                        index: event.index,
                    },
                };
                if events.send(loop_event).await.is_err() {
                    return;
                }
            }
        }));
    }
    handles
}

/// Read the authoritative epoch. Returns the parsed value and the store index
/// at read time; watching from `index + 1` avoids a duplicate delivery.
pub(crate) async fn fetch_epoch(store: &dyn Store, job: &str) -> Result<(u64, u64), RuntimeError> {
    let read = store.get(&layout::epoch_path(job)).await?;
    let entry = read
        .entry
        .ok_or_else(|| RuntimeError::EpochMissing(job.to_string()))?;
    let epoch = entry
        .value
        .parse::<u64>()
        .map_err(|_| RuntimeError::EpochParse(entry.value))?;
    Ok((epoch, read.index))
}

/// Watch the epoch key and publish transitions into the capacity-1 epoch
/// channel. Advancement arrives as `compareAndSwap`, shutdown as an
/// unconditional `set`; everything else is ignored. An unparseable value is a
/// configuration error and aborts the node.
pub(crate) async fn watch_epoch(
    store: &Arc<dyn Store>,
    job: &str,
    since: u64,
    epochs: mpsc::Sender<u64>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    let mut watch = store.watch(&layout::epoch_path(job), since, false).await;
    tokio::spawn(async move {
        while let Some(event) = watch.recv().await {
            if event.action != Action::Set && event.action != Action::CompareAndSwap {
                continue;
            }
            let value = event.value.unwrap_or_default();
            let Ok(epoch) = value.parse::<u64>() else {
                tracing::error!("can't parse epoch value {:?}, aborting node", value);
                cancel.cancel();
                return;
            };
            if epochs.send(epoch).await.is_err() {
                return;
            }
        }
    })
}

/// Live-watch the free-task directory and surface failure markers as
/// neighbor-death notices; the event loop decides whether the failed task is
/// a current neighbor and whether the task cares.
pub(crate) async fn watch_failures(
    store: &Arc<dyn Store>,
    job: &str,
    events: mpsc::Sender<LoopEvent>,
) -> JoinHandle<()> {
    let mut watch = store.watch(&layout::free_task_dir(job), 0, true).await;
    tokio::spawn(async move {
        while let Some(event) = watch.recv().await {
            if event.action != Action::Set {
                continue;
            }
            let Some(task_id) = layout::task_id_from_key(&event.key) else {
                continue;
            };
            if events.send(LoopEvent::NeighborFailed { task_id }).await.is_err() {
                return;
            }
        }
    })
}

/// Live-watch every slot key for re-claims. A compare-and-swap observed after
/// this node joined means a replacement took the slot over.
pub(crate) async fn watch_reclaims(
    store: &Arc<dyn Store>,
    job: &str,
    slot_ids: &[u64],
    events: mpsc::Sender<LoopEvent>,
) -> Vec<JoinHandle<()>> {
    let mut handles = Vec::with_capacity(slot_ids.len());
    for &task_id in slot_ids {
        let mut watch = store.watch(&layout::slot_path(job, task_id), 0, false).await;
        let events = events.clone();
        handles.push(tokio::spawn(async move {
            while let Some(event) = watch.recv().await {
                if event.action != Action::CompareAndSwap {
                    continue;
                }
                if events
                    .send(LoopEvent::NeighborRestarted { task_id })
                    .await
                    .is_err()
                {
                    return;
                }
            }
        }));
    }
    handles
}
