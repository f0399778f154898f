//! Taskmesh Distributed Task-Graph Runtime
//!
//! This library crate defines the core modules of a framework for fault-tolerant
//! distributed applications structured as a task graph: application tasks
//! connected by a per-epoch topology, each executing on its own node, all
//! advancing through a globally coordinated sequence of epochs.
//!
//! ## Architecture Modules
//! The system is composed of loosely coupled subsystems:
//!
//! - **`store`**: The coordination layer. A strongly-consistent key-value
//!   abstraction with watches, TTLs, and compare-and-swap, plus the canonical
//!   path layout every coordination key lives under and an in-process
//!   implementation (`MemoryStore`).
//! - **`membership`**: Node liveness and slot ownership. Heartbeats refresh a
//!   TTL'd key per occupied slot, a failure detector converts expirations into
//!   free-task markers, and the occupier claims slots by compare-and-swap.
//! - **`runtime`**: The per-node task runtime. Bootstraps a node into a task
//!   slot, drives the single-threaded event loop through epochs, watches
//!   neighbor meta flags, and moves data payloads between neighbors over HTTP.
//! - **`controller`**: External tool surface. Seeds the store layout for a job
//!   before any node starts and tears it down afterwards; conventionally hosts
//!   the failure detector.
//! - **`task`** / **`topology`**: The application contracts - `Task`,
//!   `TaskBuilder`, and `Topology` - plus the complete k-ary `TreeTopology`.
//! - **`demo`**: A tree-reduce application (parameter broadcast down, gradient
//!   reduction up) used by the demo binary and the regression tests.

pub mod controller;
pub mod demo;
pub mod membership;
pub mod runtime;
pub mod store;
pub mod task;
pub mod topology;
