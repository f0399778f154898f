use axum::extract::Query;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Extension, Router};
use std::collections::HashMap;
use tokio::sync::{mpsc, oneshot};

use super::protocol::{LoopEvent, ENDPOINT_DATA_REQUEST, QUERY_REQ, QUERY_TASK_ID};

/// Shared with every `/datareq` handler; serve calls are marshalled onto the
/// event loop so the task never sees concurrent access.
#[derive(Clone)]
pub(crate) struct ServerState {
    pub events: mpsc::Sender<LoopEvent>,
}

pub(crate) fn router(state: ServerState) -> Router {
    Router::new()
        .route(ENDPOINT_DATA_REQUEST, get(handle_data_request))
        .fallback(handle_bad_path)
        .layer(Extension(state))
}

/// Answer `/datareq?taskID={caller}&req={hint}`.
///
/// The caller's role decides which serve hook runs: a parent is answered with
/// `serve_as_child`, a child with `serve_as_parent`, anyone else with 400.
async fn handle_data_request(
    Extension(state): Extension<ServerState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let Some(from) = params.get(QUERY_TASK_ID).and_then(|v| v.parse::<u64>().ok()) else {
        return (StatusCode::BAD_REQUEST, "can't parse taskID").into_response();
    };
    let req = params.get(QUERY_REQ).cloned().unwrap_or_default();

    let (reply, answer) = oneshot::channel();
    if state
        .events
        .send(LoopEvent::Serve { from, req, reply })
        .await
        .is_err()
    {
        return (StatusCode::INTERNAL_SERVER_ERROR, "node stopped").into_response();
    }

    match answer.await {
        Ok(Ok(payload)) => (StatusCode::OK, payload).into_response(),
        Ok(Err(e)) => (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
        Err(_) => (StatusCode::INTERNAL_SERVER_ERROR, "node stopped").into_response(),
    }
}

async fn handle_bad_path() -> Response {
    (StatusCode::BAD_REQUEST, "bad path").into_response()
}
