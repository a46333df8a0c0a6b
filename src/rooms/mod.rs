mod directory;

use axum::{
    Json, Router, debug_handler,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::{AppResult, AppState, auth::Principal, db::Room};

pub use directory::RoomDirectory;
pub(crate) use directory::is_unique_violation;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_room))
        .route("/{code}", get(room))
        .route("/{code}/enrollment", post(join).delete(leave))
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomView {
    pub id: i64,
    pub code: String,
    pub title: String,
    pub instructor_id: i64,
    pub created_at: NaiveDateTime,
}

impl From<Room> for RoomView {
    fn from(Room { id, code, title, instructor_id, created_at }: Room) -> Self {
        RoomView { id, code, title, instructor_id, created_at }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct NewRoomRequest {
    title: String,
}

#[debug_handler(state = AppState)]
pub(crate) async fn create_room(
    State(rooms): State<RoomDirectory>,
    principal: Principal,
    Json(NewRoomRequest { title }): Json<NewRoomRequest>,
) -> AppResult<impl IntoResponse> {
    let room = rooms.create(&principal, &title).await?;
    Ok((StatusCode::CREATED, Json(RoomView::from(room))))
}

#[debug_handler(state = AppState)]
pub(crate) async fn room(
    State(rooms): State<RoomDirectory>,
    _principal: Principal,
    Path(code): Path<String>,
) -> AppResult<Json<RoomView>> {
    Ok(Json(rooms.find_by_code(&code).await?.into()))
}

#[debug_handler(state = AppState)]
pub(crate) async fn join(
    State(rooms): State<RoomDirectory>,
    principal: Principal,
    Path(code): Path<String>,
) -> AppResult<impl IntoResponse> {
    let room = rooms.join(&code, &principal).await?;
    Ok((StatusCode::CREATED, Json(RoomView::from(room))))
}

#[debug_handler(state = AppState)]
pub(crate) async fn leave(
    State(rooms): State<RoomDirectory>,
    principal: Principal,
    Path(code): Path<String>,
) -> AppResult<StatusCode> {
    rooms.leave(&code, &principal).await?;
    Ok(StatusCode::NO_CONTENT)
}
