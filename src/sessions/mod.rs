mod lifecycle;

use std::sync::Arc;

use axum::{
    Json, Router, debug_handler,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};

use crate::{AppResult, AppState, auth::Principal};

pub use lifecycle::{SessionLifecycleManager, SessionView};

type Sessions = Arc<SessionLifecycleManager>;

/// Mounted under `/rooms`.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/{code}/sessions/start", post(start))
        .route("/{code}/sessions/active", get(active))
        .route("/{code}/sessions/archive", get(archive))
        .route("/{code}/sessions/{id}", get(session))
        .route("/{code}/sessions/{id}/close", post(close))
}

#[debug_handler(state = AppState)]
pub(crate) async fn start(
    State(sessions): State<Sessions>,
    principal: Principal,
    Path(code): Path<String>,
) -> AppResult<impl IntoResponse> {
    let session = sessions.start_or_resume(&code, &principal).await?;
    Ok((StatusCode::CREATED, Json(session)))
}

#[debug_handler(state = AppState)]
pub(crate) async fn active(
    State(sessions): State<Sessions>,
    principal: Principal,
    Path(code): Path<String>,
) -> AppResult<Response> {
    Ok(match sessions.find_active(&code, &principal).await? {
        Some(session) => Json(session).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    })
}

#[debug_handler(state = AppState)]
pub(crate) async fn archive(
    State(sessions): State<Sessions>,
    principal: Principal,
    Path(code): Path<String>,
) -> AppResult<Json<Vec<SessionView>>> {
    Ok(Json(sessions.get_archive(&code, &principal).await?))
}

#[debug_handler(state = AppState)]
pub(crate) async fn session(
    State(sessions): State<Sessions>,
    principal: Principal,
    Path((code, id)): Path<(String, i64)>,
) -> AppResult<Json<SessionView>> {
    Ok(Json(sessions.get_in_room(&code, id, &principal).await?))
}

#[debug_handler(state = AppState)]
pub(crate) async fn close(
    State(sessions): State<Sessions>,
    principal: Principal,
    Path((code, id)): Path<(String, i64)>,
) -> AppResult<Json<SessionView>> {
    Ok(Json(sessions.close_as(&code, id, &principal).await?))
}
