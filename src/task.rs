//! Application contracts.
//!
//! `Task`, `TaskBuilder`, and `Topology` are capability sets, not inheritance
//! hierarchies: the runtime owns one boxed `Task` per node and calls into it
//! from a single event loop, so implementations never need their own
//! synchronization. `StatefulTask` and `Backupable` are optional capabilities
//! the runtime detects through the `as_*` hooks.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use crate::runtime::Framework;

/// Opaque application configuration handed to `Task::init`.
pub type Config = HashMap<String, String>;

/// A logical computing unit, one per node.
///
/// All methods run on the node's event loop; a callback that blocks blocks
/// the loop. In response to any callback the task may call back into the
/// [`Framework`] it received at `init`.
#[async_trait]
pub trait Task: Send {
    /// Called once per process, before the first `set_epoch`. Useful to bring
    /// the task up to speed from scratch or after recovery.
    async fn init(&mut self, task_id: u64, framework: Arc<Framework>, config: Config);

    /// Last chance to save work before the node shuts down.
    async fn exit(&mut self);

    /// Called on every epoch entry, including the first.
    async fn set_epoch(&mut self, epoch: u64);

    async fn parent_meta_ready(&mut self, parent_id: u64, meta: &str);
    async fn child_meta_ready(&mut self, child_id: u64, meta: &str);

    /// Answer a data request from a child (`from_id` is below us).
    async fn serve_as_parent(&mut self, from_id: u64, req: &str) -> Vec<u8>;
    /// Answer a data request from a parent (`from_id` is above us).
    async fn serve_as_child(&mut self, from_id: u64, req: &str) -> Vec<u8>;

    async fn parent_data_ready(&mut self, from_id: u64, req: &str, data: &[u8]);
    async fn child_data_ready(&mut self, from_id: u64, req: &str, data: &[u8]);

    /// Capability detection; override to receive neighbor lifecycle notices.
    fn as_stateful(&mut self) -> Option<&mut dyn StatefulTask> {
        None
    }

    /// Capability detection; reserved for hot-standby replica deployments.
    fn as_backupable(&mut self) -> Option<&mut dyn Backupable> {
        None
    }
}

/// Optional capability: react to neighbor restarts and deaths. The state of a
/// job should otherwise be fully encoded in the epoch, the topology, and the
/// meta flags of neighbors.
#[async_trait]
pub trait StatefulTask: Send {
    async fn parent_restart(&mut self, parent_id: u64);
    async fn child_restart(&mut self, child_id: u64);
    async fn parent_die(&mut self, parent_id: u64);
    async fn child_die(&mut self, child_id: u64);
}

/// An ordered record applied to a backup copy.
pub trait UpdateLog: Send {
    fn update_id(&self) -> u64;
}

/// Optional capability for tasks that keep a hot standby copy. The current
/// slot layout carries no replicas, so the runtime never invokes these; the
/// contract is declared for deployments that add them.
#[async_trait]
pub trait Backupable: Send {
    async fn became_primary(&mut self);
    async fn became_backup(&mut self);

    /// The only way the state of a backup copy is advanced.
    async fn update(&mut self, log: &dyn UpdateLog);
}

/// Produces the task implementation for whichever slot a node ends up
/// occupying.
pub trait TaskBuilder: Send + Sync {
    fn get_task(&self, task_id: u64) -> Box<dyn Task>;
}

/// Per-epoch neighborhood of a task. Shared read-only after the runtime calls
/// `set_task_id`.
pub trait Topology: Send + Sync {
    /// Pin the topology to the slot this node occupies. Called once by the
    /// runtime before any `parents`/`children` query.
    fn set_task_id(&mut self, task_id: u64);

    fn parents(&self, epoch: u64) -> Vec<u64>;
    fn children(&self, epoch: u64) -> Vec<u64>;
}
