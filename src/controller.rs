//! Controller surface.
//!
//! The controller runs outside the nodes: it seeds the store layout for a job
//! before any node starts, hosts the failure detector for the job's lifetime,
//! and removes the job's subtree once the job is done. None of this is on the
//! hot path.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::membership;
use crate::store::{layout, Store, StoreError};

pub struct Controller {
    job: String,
    store: Arc<dyn Store>,
    num_tasks: u64,
}

impl Controller {
    pub fn new(job: impl Into<String>, store: Arc<dyn Store>, num_tasks: u64) -> Self {
        Self {
            job: job.into(),
            store,
            num_tasks,
        }
    }

    /// Seed the job's subtree: one unassigned slot key per task and the epoch
    /// key at zero. Directories are implicit prefixes, so the free-task
    /// directory needs no explicit creation.
    pub async fn init_layout(&self) -> Result<(), StoreError> {
        for task_id in 0..self.num_tasks {
            self.store
                .set(&layout::slot_path(&self.job, task_id), layout::SLOT_VACANT, None)
                .await?;
        }
        self.store
            .set(&layout::epoch_path(&self.job), "0", None)
            .await?;
        tracing::info!("initialized layout for job {} with {} tasks", self.job, self.num_tasks);
        Ok(())
    }

    /// Remove everything under the job root.
    pub async fn destroy_layout(&self) -> Result<(), StoreError> {
        self.store.delete_prefix(&layout::job_root(&self.job)).await?;
        tracing::info!("destroyed layout for job {}", self.job);
        Ok(())
    }

    /// Run the failure detector for this job in the background. Cancel the
    /// returned token to stop it.
    pub fn start_failure_detector(&self) -> CancellationToken {
        let cancel = CancellationToken::new();
        let store = self.store.clone();
        let job = self.job.clone();
        tokio::spawn(membership::detect_failures(store, job, cancel.clone()));
        cancel
    }
}
