//! Coordination Store Module
//!
//! Everything the framework knows about its external coordination store lives
//! here. The framework never talks to a concrete store type; it holds an
//! `Arc<dyn Store>` and relies on three primitives every strongly-consistent
//! store offers: compare-and-swap (the sole arbiter of slot and epoch
//! ownership), TTL'd keys (liveness), and index-ordered watches (meta flags
//! and epoch fan-out).
//!
//! ## Submodules
//! - **`kv`**: The `Store` trait, watch events, and the typed error space.
//! - **`layout`**: Canonical path derivation for every coordination key of a
//!   job. All participants must agree on this layout bit-for-bit.
//! - **`memory`**: `MemoryStore`, an in-process implementation with a global
//!   modification index, replayable watch history, and a TTL sweeper. Backs
//!   the demo binary and the regression tests.

pub mod kv;
pub mod layout;
pub mod memory;

pub use kv::{Action, KvEntry, ListResponse, ReadResponse, Store, StoreError, WatchEvent};
pub use memory::MemoryStore;

#[cfg(test)]
mod tests;
