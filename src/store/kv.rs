use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("key not found: {0}")]
    KeyNotFound(String),

    #[error("key already exists: {0}")]
    KeyExists(String),

    #[error("compare-and-swap failed for {key}: expected {expected:?}, found {actual:?}")]
    CasFailed {
        key: String,
        expected: String,
        actual: Option<String>,
    },

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Mutation kinds, mirrored one-to-one in watch events. Consumers filter on
/// these: meta watchers only act on `Set`, the epoch watcher on `Set` and
/// `CompareAndSwap`, the failure detector on `Delete` and `Expire`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Create,
    Set,
    CompareAndSwap,
    Delete,
    Expire,
}

/// A single mutation observed through a watch. `index` is the store-wide
/// modification index assigned to the mutation; indices are strictly
/// increasing across the whole store.
#[derive(Debug, Clone, PartialEq)]
pub struct WatchEvent {
    pub action: Action,
    pub key: String,
    /// Value after the mutation; the last value for `Delete` and `Expire`.
    pub value: Option<String>,
    pub index: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct KvEntry {
    pub key: String,
    pub value: String,
    pub modified_index: u64,
}

/// A point-in-time read. `index` is the global store index observed at read
/// time, so a caller can continue with `watch(key, index + 1, ..)` without a
/// delivery gap.
#[derive(Debug, Clone)]
pub struct ReadResponse {
    pub entry: Option<KvEntry>,
    pub index: u64,
}

#[derive(Debug, Clone)]
pub struct ListResponse {
    pub entries: Vec<KvEntry>,
    pub index: u64,
}

/// A strongly-consistent coordination store.
///
/// Directories are implicit prefixes: listing a prefix nobody wrote under
/// yields an empty response, and "creating" a directory is a no-op.
#[async_trait]
pub trait Store: Send + Sync {
    async fn get(&self, key: &str) -> Result<ReadResponse, StoreError>;

    /// Set a key, overwriting any previous value. A `ttl` makes the key
    /// expire unless refreshed by another set.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<u64, StoreError>;

    /// Create a key; fails with `KeyExists` if it is already present.
    async fn create(&self, key: &str, value: &str) -> Result<u64, StoreError>;

    /// Atomically replace the value of `key` if it currently equals
    /// `expected`. The only arbiter of slot occupancy and epoch advancement.
    async fn compare_and_swap(
        &self,
        key: &str,
        expected: &str,
        value: &str,
    ) -> Result<u64, StoreError>;

    async fn delete(&self, key: &str) -> Result<u64, StoreError>;

    /// Every key under `dir`, sorted by key.
    async fn list(&self, dir: &str) -> Result<ListResponse, StoreError>;

    /// Delete `dir` itself (if it is a key) and every key under it.
    async fn delete_prefix(&self, dir: &str) -> Result<(), StoreError>;

    /// Stream events for `key`, or for everything under it when `recursive`.
    ///
    /// `since = 0` subscribes to live events only. `since >= 1` first replays
    /// retained history from that index in order, then streams live events.
    async fn watch(
        &self,
        key: &str,
        since: u64,
        recursive: bool,
    ) -> mpsc::UnboundedReceiver<WatchEvent>;
}
