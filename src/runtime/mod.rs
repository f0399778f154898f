//! Task Runtime Module
//!
//! The per-node runtime. `Bootstrap` carries a node from a bare listener to a
//! running task: it claims a slot, starts the heartbeat, the data-RPC server,
//! and the store watchers, then drives the task through epochs on a
//! single-threaded event loop.
//!
//! ## Concurrency model
//! The event loop is the serialization point. Every other activity - the
//! epoch watcher, one watcher per neighbor meta key, the HTTP handlers, and
//! the outbound data fetches - marshals into the loop through channels, so
//! the task instance is mutated (and read) by exactly one thread and
//! application code needs no locks.
//!
//! ## Submodules
//! - **`protocol`**: The `/datareq` wire contract and channel capacities.
//! - **`server`**: Axum handlers answering data requests by role.
//! - **`client`**: Outbound data fetches with address resolution via the
//!   store and bounded retry.
//! - **`watcher`**: Store watchers feeding the event loop.
//! - **`bootstrap`**: The bootstrap surface, the `Framework` handle tasks
//!   call back into, and the event loop itself.

pub mod bootstrap;
pub mod protocol;

mod client;
mod server;
mod watcher;

pub use bootstrap::{Bootstrap, Framework, StopHandle};
pub use protocol::DataResponse;


use thiserror::Error;

use crate::membership::OccupyError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("task builder not set")]
    MissingTaskBuilder,

    #[error("topology not set")]
    MissingTopology,

    #[error("epoch key missing for job {0}")]
    EpochMissing(String),

    #[error("can't parse epoch value {0:?}")]
    EpochParse(String),

    #[error("no address registered for task {0}")]
    AddressUnresolved(u64),

    #[error("data request to task {to} returned status {status}")]
    DataRequestStatus { to: u64, status: u16 },

    #[error("data request to task {to} failed: {source}")]
    Transport {
        to: u64,
        #[source]
        source: reqwest::Error,
    },

    #[error("epoch watch closed")]
    EpochWatchClosed,

    #[error("node aborted")]
    Aborted,

    #[error(transparent)]
    Occupy(#[from] OccupyError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
