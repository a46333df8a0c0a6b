pub mod appresult;
pub mod auth;
pub mod broadcast;
pub mod chat;
pub mod clock;
pub mod config;
pub mod db;
pub mod locks;
pub mod messages;
pub mod rooms;
pub mod sessions;
pub mod sweeper;
pub mod users;
pub mod ws;

use std::sync::Arc;

use axum::{Json, Router, debug_handler, extract::{FromRef, Request, State}, routing::get};
use serde_json::{Value, json};
use sqlx::SqlitePool;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::Span;

pub use appresult::{AppError, AppResult};

use auth::SharedTokenGate;
use broadcast::Broadcaster;
use chat::ChatService;
use clock::Clock;
use config::Config;
use messages::MessagePipeline;
use rooms::RoomDirectory;
use sessions::SessionLifecycleManager;

#[derive(Clone, FromRef)]
pub struct AppState {
    pub db_pool: SqlitePool,
    pub tokens: SharedTokenGate,
    pub rooms: RoomDirectory,
    pub sessions: Arc<SessionLifecycleManager>,
    pub chat: Arc<ChatService>,
}

impl AppState {
    pub fn new(db_pool: SqlitePool, config: &Config, tokens: SharedTokenGate, clock: Arc<dyn Clock>) -> Self {
        let rooms = RoomDirectory::new(db_pool.clone(), Arc::clone(&clock), config.room_code_length);
        let sessions = SessionLifecycleManager::new(db_pool.clone(), rooms.clone(), Arc::clone(&clock), config.close_cutoff_time);
        let chat = ChatService::new(MessagePipeline::new(db_pool.clone(), clock), Arc::new(Broadcaster::new()));

        AppState {
            db_pool,
            tokens,
            rooms,
            sessions: Arc::new(sessions),
            chat: Arc::new(chat),
        }
    }
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ws", get(ws::ws_upgrade))
        .nest("/rooms", rooms::router().merge(sessions::router()))
        .nest("/messages", messages::router())
        .layer(TraceLayer::new_for_http().make_span_with(request_span))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Request span without the query string, which may carry a `?token=`.
fn request_span(request: &Request) -> Span {
    tracing::debug_span!("request", method = %request.method(), path = %request.uri().path())
}

#[debug_handler]
async fn health(State(state): State<AppState>) -> AppResult<Json<Value>> {
    sqlx::query("SELECT 1").execute(&state.db_pool).await?;
    Ok(Json(json!({
        "status": "ok",
        "topics": state.chat.broadcaster().topic_count(),
    })))
}

#[cfg(test)]
mod tests {
    use std::{
        io,
        sync::{Arc, Mutex},
    };

    use axum::body::Body;
    use tracing::Level;

    use super::*;

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn request_span_leaves_out_the_token() {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(Level::DEBUG)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();

        let request = Request::builder().uri("/ws?token=abc.secret").body(Body::empty()).unwrap();
        tracing::subscriber::with_default(subscriber, || {
            let span = request_span(&request);
            let _entered = span.enter();
            tracing::debug!("upgrading");
        });

        let logged = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        assert!(logged.contains("path=/ws"), "{logged}");
        assert!(!logged.contains("abc.secret"), "{logged}");
    }
}
