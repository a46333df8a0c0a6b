mod pipeline;

use std::sync::Arc;

use axum::{
    Json, Router, debug_handler,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, patch},
};
use serde::Deserialize;

use crate::{AppResult, AppState, auth::Principal, chat::ChatService, sessions::SessionLifecycleManager};

pub use pipeline::{EditMessageRequest, MAX_PAGE_SIZE, MessagePage, MessagePipeline, MessageView, SendMessageRequest};

pub const DEFAULT_PAGE_SIZE: u32 = 10;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/sessions/{id}", get(history).post(send))
        .route("/{id}", patch(edit).delete(delete))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct HistoryQuery {
    before_id: Option<i64>,
    size: Option<u32>,
}

#[debug_handler(state = AppState)]
pub(crate) async fn history(
    State(sessions): State<Arc<SessionLifecycleManager>>,
    State(chat): State<Arc<ChatService>>,
    principal: Principal,
    Path(session_id): Path<i64>,
    Query(HistoryQuery { before_id, size }): Query<HistoryQuery>,
) -> AppResult<Json<MessagePage>> {
    sessions.ensure_session_member(session_id, &principal).await?;
    let page = chat.history(session_id, before_id, size.unwrap_or(DEFAULT_PAGE_SIZE)).await?;
    Ok(Json(page))
}

#[debug_handler(state = AppState)]
pub(crate) async fn send(
    State(sessions): State<Arc<SessionLifecycleManager>>,
    State(chat): State<Arc<ChatService>>,
    principal: Principal,
    Path(session_id): Path<i64>,
    Json(request): Json<SendMessageRequest>,
) -> AppResult<impl IntoResponse> {
    sessions.ensure_session_member(session_id, &principal).await?;
    let message = chat.send(session_id, principal.user_id, request).await?;
    Ok((StatusCode::CREATED, Json(message)))
}

#[debug_handler(state = AppState)]
pub(crate) async fn edit(
    State(chat): State<Arc<ChatService>>,
    principal: Principal,
    Path(message_id): Path<i64>,
    Json(request): Json<EditMessageRequest>,
) -> AppResult<Json<MessageView>> {
    Ok(Json(chat.edit(message_id, principal.user_id, request).await?))
}

#[debug_handler(state = AppState)]
pub(crate) async fn delete(
    State(chat): State<Arc<ChatService>>,
    principal: Principal,
    Path(message_id): Path<i64>,
) -> AppResult<Json<MessageView>> {
    Ok(Json(chat.delete(message_id, principal.user_id).await?))
}
