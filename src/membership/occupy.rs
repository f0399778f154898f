use rand::Rng;
use std::time::Duration;
use thiserror::Error;

use crate::store::kv::Action;
use crate::store::{layout, Store, StoreError};

/// How long a replacement node blocks for a failure to be published before
/// giving up.
pub const FREE_TASK_WAIT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum OccupyError {
    #[error("no unassigned task slot in job")]
    NoVacantSlot,

    #[error("timed out waiting for a free task")]
    WaitTimeout,

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Claim a task slot for the node listening at `addr`.
///
/// Unassigned slots are tried first (initial claim); when every slot is
/// taken, the node waits on the free-task directory for a failed slot to
/// re-take (replacement claim). Lost compare-and-swap races simply move on to
/// the next candidate.
pub async fn occupy_slot(store: &dyn Store, job: &str, addr: &str) -> Result<u64, OccupyError> {
    match claim_vacant(store, job, addr).await {
        Err(OccupyError::NoVacantSlot) => claim_free(store, job, addr).await,
        outcome => outcome,
    }
}

async fn claim_vacant(store: &dyn Store, job: &str, addr: &str) -> Result<u64, OccupyError> {
    let listing = store.list(&layout::task_dir(job)).await?;
    let mut slot_ids: Vec<u64> = listing
        .entries
        .iter()
        .filter_map(|e| layout::slot_task_id(&e.key))
        .collect();
    slot_ids.sort_unstable();

    for task_id in slot_ids {
        let slot = layout::slot_path(job, task_id);
        match store.compare_and_swap(&slot, layout::SLOT_VACANT, addr).await {
            Ok(_) => {
                tracing::info!("occupied vacant slot {} as {}", task_id, addr);
                return Ok(task_id);
            }
            Err(StoreError::CasFailed { .. }) => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Err(OccupyError::NoVacantSlot)
}

async fn claim_free(store: &dyn Store, job: &str, addr: &str) -> Result<u64, OccupyError> {
    loop {
        let task_id = wait_free_task(store, job).await?;
        let slot = layout::slot_path(job, task_id);
        let read = store.get(&slot).await?;
        let Some(entry) = read.entry else {
            tracing::warn!("free task {} has no slot key, skipping", task_id);
            continue;
        };
        match store.compare_and_swap(&slot, &entry.value, addr).await {
            Ok(_) => {
                tracing::info!("re-occupied failed slot {} as {}", task_id, addr);
                // The marker served its purpose; a racing claimant may have
                // removed it already.
                if let Err(e) = store.delete(&layout::free_task_path(job, task_id)).await {
                    tracing::debug!("free-task marker for {} already gone: {}", task_id, e);
                }
                return Ok(task_id);
            }
            Err(StoreError::CasFailed { .. }) => continue,
            Err(e) => return Err(e.into()),
        }
    }
}

/// Block until the free-task directory names a failed slot, up to
/// [`FREE_TASK_WAIT`]. Picks uniformly when several slots are free.
pub async fn wait_free_task(store: &dyn Store, job: &str) -> Result<u64, OccupyError> {
    let dir = layout::free_task_dir(job);
    let listing = store.list(&dir).await?;
    if !listing.entries.is_empty() {
        let pick = rand::thread_rng().gen_range(0..listing.entries.len());
        let key = &listing.entries[pick].key;
        return layout::task_id_from_key(key)
            .ok_or_else(|| StoreError::Unavailable(format!("unparseable free-task key {key}")).into());
    }

    let mut events = store.watch(&dir, listing.index + 1, true).await;
    let deadline = tokio::time::sleep(FREE_TASK_WAIT);
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            _ = &mut deadline => return Err(OccupyError::WaitTimeout),
            event = events.recv() => match event {
                Some(event) if event.action == Action::Set => {
                    return layout::task_id_from_key(&event.key).ok_or_else(|| {
                        StoreError::Unavailable(format!("unparseable free-task key {}", event.key))
                            .into()
                    });
                }
                Some(_) => continue,
                None => {
                    return Err(OccupyError::Store(StoreError::Unavailable(
                        "free-task watch closed".into(),
                    )))
                }
            },
        }
    }
}
