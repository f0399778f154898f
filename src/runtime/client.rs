use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::protocol::{DataResponse, ENDPOINT_DATA_REQUEST, QUERY_REQ, QUERY_TASK_ID};
use super::RuntimeError;
use crate::store::{layout, Store};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(1);
// The backoff schedule spans the liveness TTL plus marker and re-claim
// latency, so a request issued just before a neighbor dies can still land on
// its replacement.
const RETRY_ATTEMPTS: usize = 7;

/// Outbound half of the data RPC. Resolves the target's address through its
/// slot key, fetches the payload over HTTP, and queues the bytes for the
/// event loop. Addresses are cached and invalidated on transport failure, so
/// a request outlives the re-claim of a neighbor's slot.
pub(crate) struct DataClient {
    http: reqwest::Client,
    store: Arc<dyn Store>,
    job: String,
    task_id: u64,
    addr_cache: DashMap<u64, String>,
    responses: mpsc::Sender<DataResponse>,
    cancel: CancellationToken,
}

impl DataClient {
    pub fn new(
        store: Arc<dyn Store>,
        job: String,
        task_id: u64,
        responses: mpsc::Sender<DataResponse>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            store,
            job,
            task_id,
            addr_cache: DashMap::new(),
            responses,
            cancel,
        }
    }

    /// Issue a data request without blocking the event loop. Exhausted
    /// retries abort the node: a task that cannot reach its neighbor cannot
    /// make progress, and a replacement can.
    pub fn spawn_request(self: &Arc<Self>, to: u64, req: String) {
        let client = self.clone();
        tokio::spawn(async move {
            if let Err(e) = client.fetch(to, &req).await {
                tracing::error!("data request to task {} failed, aborting node: {}", to, e);
                client.cancel.cancel();
            }
        });
    }

    async fn fetch(&self, to: u64, req: &str) -> Result<(), RuntimeError> {
        let mut delay_ms = 150u64;

        for attempt in 0..RETRY_ATTEMPTS {
            let addr = self.resolve(to).await?;
            let response = self
                .http
                .get(format!("http://{addr}{ENDPOINT_DATA_REQUEST}"))
                .query(&[
                    (QUERY_TASK_ID, self.task_id.to_string().as_str()),
                    (QUERY_REQ, req),
                ])
                .timeout(REQUEST_TIMEOUT)
                .send()
                .await;

            match response {
                Ok(response) if response.status().is_success() => {
                    let payload = response
                        .bytes()
                        .await
                        .map_err(|source| RuntimeError::Transport { to, source })?;
                    // Receiver gone means the node is shutting down; the
                    // payload has nowhere to go.
                    let _ = self
                        .responses
                        .send(DataResponse {
                            from: to,
                            req: req.to_string(),
                            payload: payload.to_vec(),
                        })
                        .await;
                    return Ok(());
                }
                // A non-200 is a protocol answer, not a flaky link; retrying
                // cannot change it.
                Ok(response) => {
                    return Err(RuntimeError::DataRequestStatus {
                        to,
                        status: response.status().as_u16(),
                    })
                }
                Err(source) => {
                    if attempt + 1 == RETRY_ATTEMPTS {
                        return Err(RuntimeError::Transport { to, source });
                    }
                    // The neighbor may have been re-claimed at a new address.
                    self.addr_cache.remove(&to);
                    let jitter = rand::random::<u64>() % 50;
                    tokio::time::sleep(Duration::from_millis(delay_ms + jitter)).await;
                    delay_ms = (delay_ms * 2).min(1200);
                }
            }
        }

        Err(RuntimeError::AddressUnresolved(to))
    }

    async fn resolve(&self, to: u64) -> Result<String, RuntimeError> {
        if let Some(addr) = self.addr_cache.get(&to) {
            return Ok(addr.clone());
        }
        let read = self.store.get(&layout::slot_path(&self.job, to)).await?;
        match read.entry {
            Some(entry) if entry.value != layout::SLOT_VACANT => {
                self.addr_cache.insert(to, entry.value.clone());
                Ok(entry.value)
            }
            _ => Err(RuntimeError::AddressUnresolved(to)),
        }
    }
}
