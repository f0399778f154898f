//! Membership Module
//!
//! Node liveness and slot ownership over the coordination store.
//!
//! ## Core Mechanisms
//! - **Heartbeat**: each node refreshes a TTL'd liveness key for its slot.
//!   A key that expires is the store-level signal that the node is gone.
//! - **Failure Detection**: an observer (conventionally the controller)
//!   watches the liveness directory and converts expirations into free-task
//!   markers that replacement nodes claim.
//! - **Slot Occupancy**: compare-and-swap on the slot key is the only arbiter
//!   of ownership. A starting node claims an unassigned slot; a replacement
//!   node claims a slot published in the free-task directory.

pub mod heartbeat;
pub mod occupy;

pub use heartbeat::{detect_failures, heartbeat, report_failure};
pub use occupy::{occupy_slot, wait_free_task, OccupyError};

#[cfg(test)]
mod tests;
