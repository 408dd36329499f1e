//! Durable messaging: the log, the ingress gateway, the catch-up reader,
//! and their HTTP surface.

pub mod gateway;
pub mod history;
pub mod log;

use axum::extract::{Path, Query, State};
use axum::routing::post;
use axum::{Json, Router, debug_handler};
use serde::Deserialize;

use crate::AppState;
use crate::error::ChatResult;
use crate::messages::log::{Message, Page};

pub fn router() -> Router<AppState> {
    Router::new().route(
        "/{group_id}/messages",
        post(send_message).get(fetch_history),
    )
}

#[derive(Debug, Deserialize)]
pub(crate) struct SendRequest {
    device_id: String,
    body: String,
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn send_message(
    Path(group_id): Path<String>,
    State(state): State<AppState>,
    Json(req): Json<SendRequest>,
) -> ChatResult<Json<Message>> {
    let message = gateway::send(
        &state.oracle,
        &state.log,
        &state.rooms,
        &state.notifier,
        &group_id,
        &req.device_id,
        &req.body,
    )
    .await?;

    Ok(Json(message))
}

#[derive(Debug, Deserialize)]
pub(crate) struct HistoryParams {
    device_id: String,
    /// Id of the last message the client already has.
    after: Option<String>,
    limit: Option<usize>,
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn fetch_history(
    Path(group_id): Path<String>,
    Query(params): Query<HistoryParams>,
    State(state): State<AppState>,
) -> ChatResult<Json<Page>> {
    let page = history::fetch_history(
        &state.oracle,
        &state.log,
        &group_id,
        &params.device_id,
        params.after.as_deref(),
        params.limit,
    )
    .await?;

    Ok(Json(page))
}
