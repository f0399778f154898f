use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::time::Instant;

use super::kv::{
    Action, KvEntry, ListResponse, ReadResponse, Store, StoreError, WatchEvent,
};

const SWEEP_INTERVAL: Duration = Duration::from_millis(50);

/// In-process strongly-consistent store.
///
/// A single lock orders every mutation, which keeps the global modification
/// index, the retained event history, and watcher delivery mutually
/// consistent: a watcher registered at index `i` sees exactly the events with
/// index `>= i`, each once, in order. TTL'd keys are expired by a background
/// sweeper (and lazily at read time, so a read never observes a key past its
/// deadline).
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

#[derive(Default)]
struct State {
    entries: HashMap<String, Entry>,
    history: Vec<WatchEvent>,
    watchers: Vec<Watcher>,
    index: u64,
}

struct Entry {
    value: String,
    modified_index: u64,
    expires_at: Option<Instant>,
}

struct Watcher {
    key: String,
    recursive: bool,
    tx: mpsc::UnboundedSender<WatchEvent>,
}

impl Watcher {
    fn matches(&self, key: &str) -> bool {
        key == self.key || (self.recursive && key.starts_with(&format!("{}/", self.key)))
    }
}

impl State {
    fn emit(&mut self, action: Action, key: &str, value: Option<String>) -> u64 {
        self.index += 1;
        let event = WatchEvent {
            action,
            key: key.to_string(),
            value,
            index: self.index,
        };
        self.history.push(event.clone());
        self.watchers
            .retain(|w| !w.matches(key) || w.tx.send(event.clone()).is_ok());
        self.index
    }

    /// Drop every entry past its deadline, emitting `Expire` events.
    fn sweep(&mut self, now: Instant) {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, e)| e.expires_at.is_some_and(|at| at <= now))
            .map(|(k, _)| k.clone())
            .collect();
        for key in expired {
            let value = self.entries.remove(&key).map(|e| e.value);
            self.emit(Action::Expire, &key, value);
        }
    }
}

impl MemoryStore {
    /// Create a store. Must be called inside a Tokio runtime; the TTL sweeper
    /// runs as a background task and stops once the store is dropped.
    pub fn new() -> Self {
        let state = Arc::new(Mutex::new(State::default()));
        let weak = Arc::downgrade(&state);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(SWEEP_INTERVAL);
            loop {
                tick.tick().await;
                let Some(state) = weak.upgrade() else { break };
                state.lock().await.sweep(Instant::now());
            }
        });
        Self { state }
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, key: &str) -> Result<ReadResponse, StoreError> {
        let mut state = self.state.lock().await;
        state.sweep(Instant::now());
        let entry = state.entries.get(key).map(|e| KvEntry {
            key: key.to_string(),
            value: e.value.clone(),
            modified_index: e.modified_index,
        });
        Ok(ReadResponse {
            entry,
            index: state.index,
        })
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<u64, StoreError> {
        let mut state = self.state.lock().await;
        state.sweep(Instant::now());
        let index = state.emit(Action::Set, key, Some(value.to_string()));
        state.entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                modified_index: index,
                expires_at: ttl.map(|t| Instant::now() + t),
            },
        );
        Ok(index)
    }

    async fn create(&self, key: &str, value: &str) -> Result<u64, StoreError> {
        let mut state = self.state.lock().await;
        state.sweep(Instant::now());
        if state.entries.contains_key(key) {
            return Err(StoreError::KeyExists(key.to_string()));
        }
        let index = state.emit(Action::Create, key, Some(value.to_string()));
        state.entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                modified_index: index,
                expires_at: None,
            },
        );
        Ok(index)
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: &str,
        value: &str,
    ) -> Result<u64, StoreError> {
        let mut state = self.state.lock().await;
        state.sweep(Instant::now());
        let actual = state.entries.get(key).map(|e| e.value.clone());
        match actual {
            Some(ref current) if current == expected => {
                let index = state.emit(Action::CompareAndSwap, key, Some(value.to_string()));
                state.entries.insert(
                    key.to_string(),
                    Entry {
                        value: value.to_string(),
                        modified_index: index,
                        expires_at: None,
                    },
                );
                Ok(index)
            }
            actual => Err(StoreError::CasFailed {
                key: key.to_string(),
                expected: expected.to_string(),
                actual,
            }),
        }
    }

    async fn delete(&self, key: &str) -> Result<u64, StoreError> {
        let mut state = self.state.lock().await;
        state.sweep(Instant::now());
        match state.entries.remove(key) {
            Some(entry) => Ok(state.emit(Action::Delete, key, Some(entry.value))),
            None => Err(StoreError::KeyNotFound(key.to_string())),
        }
    }

    async fn list(&self, dir: &str) -> Result<ListResponse, StoreError> {
        let mut state = self.state.lock().await;
        state.sweep(Instant::now());
        let prefix = format!("{}/", dir.trim_end_matches('/'));
        let mut entries: Vec<KvEntry> = state
            .entries
            .iter()
            .filter(|(k, _)| k.starts_with(&prefix))
            .map(|(k, e)| KvEntry {
                key: k.clone(),
                value: e.value.clone(),
                modified_index: e.modified_index,
            })
            .collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(ListResponse {
            entries,
            index: state.index,
        })
    }

    async fn delete_prefix(&self, dir: &str) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.sweep(Instant::now());
        let prefix = format!("{}/", dir.trim_end_matches('/'));
        let doomed: Vec<String> = state
            .entries
            .keys()
            .filter(|k| k.as_str() == dir || k.starts_with(&prefix))
            .cloned()
            .collect();
        for key in doomed {
            let value = state.entries.remove(&key).map(|e| e.value);
            state.emit(Action::Delete, &key, value);
        }
        Ok(())
    }

    async fn watch(
        &self,
        key: &str,
        since: u64,
        recursive: bool,
    ) -> mpsc::UnboundedReceiver<WatchEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state.lock().await;
        let watcher = Watcher {
            key: key.to_string(),
            recursive,
            tx,
        };
        if since >= 1 {
            for event in &state.history {
                if event.index >= since && watcher.matches(&event.key) {
                    // Receiver is unbounded and fresh; send can only fail if
                    // the caller already dropped it.
                    let _ = watcher.tx.send(event.clone());
                }
            }
        }
        state.watchers.push(watcher);
        rx
    }
}
