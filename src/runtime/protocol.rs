use thiserror::Error;
use tokio::sync::oneshot;

// Wire contract of the data RPC: GET /datareq?taskID={caller}&req={hint}.
// The response body is raw bytes; failures are 400 with a short plaintext
// body.
pub const ENDPOINT_DATA_REQUEST: &str = "/datareq";
pub const QUERY_TASK_ID: &str = "taskID";
pub const QUERY_REQ: &str = "req";

/// Epoch transitions are consumed one at a time.
pub const EPOCH_CHANNEL_CAPACITY: usize = 1;

/// Completed outbound fetches waiting for the event loop.
pub const DATA_RESPONSE_CAPACITY: usize = 100;

/// Meta notifications, serve requests, and neighbor lifecycle notices.
pub const EVENT_CHANNEL_CAPACITY: usize = 100;

/// A completed outbound fetch, queued for the event loop.
#[derive(Debug)]
pub struct DataResponse {
    /// Task that answered the request.
    pub from: u64,
    /// The request hint that was sent.
    pub req: String,
    pub payload: Vec<u8>,
}

/// Everything the event loop consumes besides epoch transitions and data
/// responses. Watchers and HTTP handlers produce these; only the loop touches
/// the task.
pub(crate) enum LoopEvent {
    ParentMeta {
        parent_id: u64,
        meta: String,
        key: String,
        index: u64,
    },
    ChildMeta {
        child_id: u64,
        meta: String,
        key: String,
        index: u64,
    },
    Serve {
        from: u64,
        req: String,
        reply: oneshot::Sender<Result<Vec<u8>, ServeError>>,
    },
    NeighborFailed {
        task_id: u64,
    },
    NeighborRestarted {
        task_id: u64,
    },
}

#[derive(Debug, Error)]
pub(crate) enum ServeError {
    #[error("taskID isn't a parent or child of this task")]
    NotNeighbor,
}
