use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::client::DataClient;
use super::protocol::{
    DataResponse, LoopEvent, ServeError, DATA_RESPONSE_CAPACITY, EPOCH_CHANNEL_CAPACITY,
    EVENT_CHANNEL_CAPACITY,
};
use super::server::{router, ServerState};
use super::watcher::{
    fetch_epoch, watch_epoch, watch_failures, watch_neighbors, watch_reclaims, NeighborRole,
};
use super::RuntimeError;
use crate::membership;
use crate::store::{layout, Store, StoreError};
use crate::task::{Config, Task, TaskBuilder, Topology};

const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);

/// Handle the runtime gives every task at `init`. All callbacks a task may
/// issue in response to framework events go through here.
///
/// Store failures behind these calls are not recoverable by the task: the
/// handle logs and aborts the node, and the failure detector hands the slot
/// to a replacement.
pub struct Framework {
    job: String,
    task_id: u64,
    store: Arc<dyn Store>,
    epoch: Arc<AtomicU64>,
    topology: Arc<dyn Topology>,
    client: Arc<DataClient>,
    cancel: CancellationToken,
}

impl Framework {
    pub fn task_id(&self) -> u64 {
        self.task_id
    }

    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    pub fn topology(&self) -> &dyn Topology {
        self.topology.as_ref()
    }

    /// Publish a meta hint for this task's parent.
    pub async fn flag_meta_to_parent(&self, meta: &str) {
        let key = layout::parent_meta_path(&self.job, self.task_id);
        if let Err(e) = self.store.set(&key, meta, None).await {
            self.fatal(&format!("flagging meta to parent failed: {e}"));
        }
    }

    /// Publish a meta hint for this task's children.
    pub async fn flag_meta_to_child(&self, meta: &str) {
        let key = layout::child_meta_path(&self.job, self.task_id);
        if let Err(e) = self.store.set(&key, meta, None).await {
            self.fatal(&format!("flagging meta to child failed: {e}"));
        }
    }

    /// Fetch data from neighbor `to`. The fetch runs concurrently; the
    /// payload comes back through `parent_data_ready` / `child_data_ready`.
    pub fn data_request(&self, to: u64, req: &str) {
        self.client.spawn_request(to, req.to_string());
    }

    /// Advance the job from the caller's current epoch to the next one. Only
    /// the coordinator of the current epoch may advance it; a lost
    /// compare-and-swap means this node is stale and it aborts.
    pub async fn inc_epoch(&self) {
        let current = self.epoch();
        let result = self
            .store
            .compare_and_swap(
                &layout::epoch_path(&self.job),
                &current.to_string(),
                &(current + 1).to_string(),
            )
            .await;
        if let Err(e) = result {
            self.fatal(&format!("advancing epoch from {current} rejected: {e}"));
        }
    }

    /// Cooperative termination: set the epoch to the shutdown sentinel, which
    /// every node (including this one) observes through its epoch watcher.
    pub async fn shutdown_job(&self) {
        let result = self
            .store
            .set(
                &layout::epoch_path(&self.job),
                &layout::EPOCH_SHUTDOWN.to_string(),
                None,
            )
            .await;
        if let Err(e) = result {
            self.fatal(&format!("setting shutdown sentinel failed: {e}"));
        }
    }

    fn fatal(&self, msg: &str) {
        tracing::error!("task {} fatal: {}", self.task_id, msg);
        self.cancel.cancel();
    }
}

/// Kill switch for a running node; severs everything the node spawned.
/// Killing a node does not release its slot - that is the failure detector's
/// job, so recovery always takes the same path.
#[derive(Clone)]
pub struct StopHandle(CancellationToken);

impl StopHandle {
    pub fn kill(&self) {
        self.0.cancel();
    }
}

/// Entry point for a node. Configure with a builder and a topology, then
/// `start()` runs until the job terminates or the node fatally aborts.
pub struct Bootstrap {
    job: String,
    store: Arc<dyn Store>,
    config: Config,
    listener: TcpListener,
    task_builder: Option<Box<dyn TaskBuilder>>,
    topology: Option<Box<dyn Topology>>,
    heartbeat_interval: Duration,
    cancel: CancellationToken,
}

impl Bootstrap {
    pub fn new(
        job: impl Into<String>,
        store: Arc<dyn Store>,
        config: Config,
        listener: TcpListener,
    ) -> Self {
        Self {
            job: job.into(),
            store,
            config,
            listener,
            task_builder: None,
            topology: None,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            cancel: CancellationToken::new(),
        }
    }

    pub fn set_task_builder(&mut self, builder: Box<dyn TaskBuilder>) {
        self.task_builder = Some(builder);
    }

    pub fn set_topology(&mut self, topology: Box<dyn Topology>) {
        self.topology = Some(topology);
    }

    pub fn set_heartbeat_interval(&mut self, interval: Duration) {
        self.heartbeat_interval = interval;
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle(self.cancel.clone())
    }

    /// Run the node: claim a slot, wire up liveness, watchers, and the data
    /// server, then drive the task through epochs until the shutdown sentinel
    /// appears. Returns `Ok` on clean termination and `Err` when the node
    /// fatally aborts.
    pub async fn start(mut self) -> Result<(), RuntimeError> {
        let builder = self
            .task_builder
            .take()
            .ok_or(RuntimeError::MissingTaskBuilder)?;
        let mut topology = self.topology.take().ok_or(RuntimeError::MissingTopology)?;
        let store = self.store.clone();
        let cancel = self.cancel.clone();
        let job = self.job.clone();
        let addr = self.listener.local_addr()?.to_string();

        let (mut current, epoch_read_index) = fetch_epoch(store.as_ref(), &job).await?;
        let task_id = membership::occupy_slot(store.as_ref(), &job, &addr).await?;
        tracing::info!("job {} task {} starting at epoch {} on {}", job, task_id, current, addr);

        topology.set_task_id(task_id);
        let topology: Arc<dyn Topology> = Arc::from(topology);
        let mut task = builder.get_task(task_id);

        // Own meta keys, created idempotently so a replacement re-entry is a
        // no-op.
        for key in [
            layout::parent_meta_path(&job, task_id),
            layout::child_meta_path(&job, task_id),
        ] {
            match store.create(&key, "").await {
                Ok(_) | Err(StoreError::KeyExists(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }

        let (epoch_tx, mut epoch_rx) = mpsc::channel::<u64>(EPOCH_CHANNEL_CAPACITY);
        let (event_tx, mut event_rx) = mpsc::channel::<LoopEvent>(EVENT_CHANNEL_CAPACITY);
        let (response_tx, mut response_rx) =
            mpsc::channel::<DataResponse>(DATA_RESPONSE_CAPACITY);

        let epoch_shared = Arc::new(AtomicU64::new(current));
        let client = Arc::new(DataClient::new(
            store.clone(),
            job.clone(),
            task_id,
            response_tx,
            cancel.clone(),
        ));
        let framework = Arc::new(Framework {
            job: job.clone(),
            task_id,
            store: store.clone(),
            epoch: epoch_shared.clone(),
            topology: topology.clone(),
            client,
            cancel: cancel.clone(),
        });

        let epoch_watch =
            watch_epoch(&store, &job, epoch_read_index + 1, epoch_tx, cancel.clone()).await;

        // Neighbor lifecycle notices for tasks that opt into them.
        let slot_ids = known_slot_ids(store.as_ref(), &job).await?;
        let mut notice_handles =
            vec![watch_failures(&store, &job, event_tx.clone()).await];
        notice_handles
            .extend(watch_reclaims(&store, &job, &slot_ids, event_tx.clone()).await);

        {
            let store = store.clone();
            let job = job.clone();
            let interval = self.heartbeat_interval;
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let result =
                    membership::heartbeat(store.as_ref(), &job, task_id, interval, cancel.clone())
                        .await;
                if let Err(e) = result {
                    tracing::error!("heartbeat for task {} failed, aborting node: {}", task_id, e);
                    cancel.cancel();
                }
            });
        }

        {
            let state = ServerState {
                events: event_tx.clone(),
            };
            let shutdown = cancel.clone().cancelled_owned();
            let server = axum::serve(self.listener, router(state)).with_graceful_shutdown(shutdown);
            tokio::spawn(async move {
                if let Err(e) = server.await {
                    tracing::error!("data server exited: {}", e);
                }
            });
        }

        task.init(task_id, framework, self.config.clone()).await;

        // Next watch index per meta key; keeps the delivery stream gap-free
        // across per-epoch watcher restarts.
        let mut meta_cursors: HashMap<String, u64> = HashMap::new();
        let mut meta_handles: Vec<JoinHandle<()>> = Vec::new();

        let outcome: Result<(), RuntimeError> = 'job: loop {
            if current == layout::EPOCH_SHUTDOWN {
                break 'job Ok(());
            }
            epoch_shared.store(current, Ordering::SeqCst);

            for handle in meta_handles.drain(..) {
                handle.abort();
            }
            let parents = topology.parents(current);
            let children = topology.children(current);
            meta_handles.extend(
                watch_neighbors(
                    &store,
                    &job,
                    NeighborRole::Parent,
                    &parents,
                    &meta_cursors,
                    event_tx.clone(),
                )
                .await,
            );
            meta_handles.extend(
                watch_neighbors(
                    &store,
                    &job,
                    NeighborRole::Child,
                    &children,
                    &meta_cursors,
                    event_tx.clone(),
                )
                .await,
            );

            task.set_epoch(current).await;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        break 'job Err(RuntimeError::Aborted);
                    }
                    next = epoch_rx.recv() => match next {
                        Some(epoch) if epoch > current => {
                            current = epoch;
                            continue 'job;
                        }
                        Some(_) => {} // stale or duplicate delivery
                        None => break 'job Err(RuntimeError::EpochWatchClosed),
                    },
                    event = event_rx.recv() => {
                        if let Some(event) = event {
                            dispatch_event(
                                event,
                                task.as_mut(),
                                topology.as_ref(),
                                current,
                                task_id,
                                &mut meta_cursors,
                            )
                            .await;
                        }
                    }
                    response = response_rx.recv() => {
                        if let Some(response) = response {
                            dispatch_data(response, task.as_mut(), topology.as_ref(), current)
                                .await;
                        }
                    }
                }
            }
        };

        for handle in meta_handles {
            handle.abort();
        }
        for handle in notice_handles {
            handle.abort();
        }
        epoch_watch.abort();

        match outcome {
            Ok(()) => {
                task.exit().await;
                cancel.cancel();
                tracing::info!("job {} task {} exited cleanly", job, task_id);
                Ok(())
            }
            Err(e) => {
                cancel.cancel();
                tracing::warn!("job {} task {} aborted: {}", job, task_id, e);
                Err(e)
            }
        }
    }
}

async fn known_slot_ids(store: &dyn Store, job: &str) -> Result<Vec<u64>, RuntimeError> {
    let listing = store.list(&layout::task_dir(job)).await?;
    let mut ids: Vec<u64> = listing
        .entries
        .iter()
        .filter_map(|e| layout::slot_task_id(&e.key))
        .collect();
    ids.sort_unstable();
    Ok(ids)
}

async fn dispatch_event(
    event: LoopEvent,
    task: &mut dyn Task,
    topology: &dyn Topology,
    epoch: u64,
    self_id: u64,
    meta_cursors: &mut HashMap<String, u64>,
) {
    match event {
        LoopEvent::ParentMeta {
            parent_id,
            meta,
            key,
            index,
        } => {
            meta_cursors.insert(key, index + 1);
            task.parent_meta_ready(parent_id, &meta).await;
        }
        LoopEvent::ChildMeta {
            child_id,
            meta,
            key,
            index,
        } => {
            meta_cursors.insert(key, index + 1);
            task.child_meta_ready(child_id, &meta).await;
        }
        LoopEvent::Serve { from, req, reply } => {
            let answer = if topology.parents(epoch).contains(&from) {
                Ok(task.serve_as_child(from, &req).await)
            } else if topology.children(epoch).contains(&from) {
                Ok(task.serve_as_parent(from, &req).await)
            } else {
                Err(ServeError::NotNeighbor)
            };
            // Caller may have given up on the request already.
            let _ = reply.send(answer);
        }
        LoopEvent::NeighborFailed { task_id } if task_id != self_id => {
            let is_parent = topology.parents(epoch).contains(&task_id);
            let is_child = topology.children(epoch).contains(&task_id);
            if let Some(stateful) = task.as_stateful() {
                if is_parent {
                    stateful.parent_die(task_id).await;
                } else if is_child {
                    stateful.child_die(task_id).await;
                }
            }
        }
        LoopEvent::NeighborRestarted { task_id } if task_id != self_id => {
            let is_parent = topology.parents(epoch).contains(&task_id);
            let is_child = topology.children(epoch).contains(&task_id);
            if let Some(stateful) = task.as_stateful() {
                if is_parent {
                    stateful.parent_restart(task_id).await;
                } else if is_child {
                    stateful.child_restart(task_id).await;
                }
            }
        }
        LoopEvent::NeighborFailed { .. } | LoopEvent::NeighborRestarted { .. } => {}
    }
}

async fn dispatch_data(
    response: DataResponse,
    task: &mut dyn Task,
    topology: &dyn Topology,
    epoch: u64,
) {
    if topology.parents(epoch).contains(&response.from) {
        task.parent_data_ready(response.from, &response.req, &response.payload)
            .await;
    } else if topology.children(epoch).contains(&response.from) {
        task.child_data_ready(response.from, &response.req, &response.payload)
            .await;
    } else {
        tracing::warn!(
            "dropping data response from task {}: not a neighbor at epoch {}",
            response.from,
            epoch
        );
    }
}
