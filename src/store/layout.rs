//! Canonical store layout for a job.
//!
//! The directory scheme under `/{job}`:
//!
//! ```text
//! /{job}/epoch                      -> authoritative epoch value
//! /{job}/tasks/{id}/0               -> slot key: "empty" or the occupant's host:port
//! /{job}/tasks/{id}/ParentMeta      -> meta flag written for the task's parent
//! /{job}/tasks/{id}/ChildMeta       -> meta flag written for the task's children
//! /{job}/healthy/{id}               -> TTL'd liveness key
//! /{job}/freetasks/{id}             -> failure marker
//! ```
//!
//! Every participant derives paths through these functions; the layout is a
//! wire contract between nodes, controllers, and detectors.

/// Value of an unassigned slot key.
pub const SLOT_VACANT: &str = "empty";

/// Value written by the heartbeat loop.
pub const HEALTH_VALUE: &str = "health";

/// Value written into a free-task marker by the failure detector.
pub const FAILED_VALUE: &str = "failed";

/// Epoch sentinel meaning "terminate the job".
pub const EPOCH_SHUTDOWN: u64 = u64::MAX;

pub fn job_root(job: &str) -> String {
    format!("/{job}")
}

pub fn epoch_path(job: &str) -> String {
    format!("/{job}/epoch")
}

pub fn task_dir(job: &str) -> String {
    format!("/{job}/tasks")
}

pub fn slot_path(job: &str, task_id: u64) -> String {
    format!("/{job}/tasks/{task_id}/0")
}

pub fn parent_meta_path(job: &str, task_id: u64) -> String {
    format!("/{job}/tasks/{task_id}/ParentMeta")
}

pub fn child_meta_path(job: &str, task_id: u64) -> String {
    format!("/{job}/tasks/{task_id}/ChildMeta")
}

pub fn healthy_dir(job: &str) -> String {
    format!("/{job}/healthy")
}

pub fn healthy_path(job: &str, task_id: u64) -> String {
    format!("/{job}/healthy/{task_id}")
}

pub fn free_task_dir(job: &str) -> String {
    format!("/{job}/freetasks")
}

pub fn free_task_path(job: &str, task_id: u64) -> String {
    format!("/{job}/freetasks/{task_id}")
}

/// Task ID from a key whose last segment is the ID (healthy and freetask
/// keys).
pub fn task_id_from_key(key: &str) -> Option<u64> {
    key.rsplit('/').next()?.parse().ok()
}

/// Task ID from a slot key (`.../tasks/{id}/0`).
pub fn slot_task_id(key: &str) -> Option<u64> {
    key.strip_suffix("/0")?.rsplit('/').next()?.parse().ok()
}
