use std::{collections::HashMap, sync::Arc};

use axum::{
    debug_handler,
    extract::{Query, State, WebSocketUpgrade, ws::{Message, WebSocket}},
    http::{HeaderMap, header::AUTHORIZATION},
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::{sync::{broadcast::{self, error::RecvError}, mpsc}, task::JoinHandle};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    AppError, AppResult, AppState,
    auth::{Principal, PrincipalView, TokenGate, bearer_token},
    broadcast::{MessageEvent, topic},
    messages::SendMessageRequest,
};

const OUTBOUND_CAPACITY: usize = 64;
/// Error code telling a subscriber it missed events and should re-read history.
pub const LAGGED: &str = "LAGGED";

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientFrame {
    Connect { authorization: Option<String> },
    Subscribe { session_id: i64 },
    Unsubscribe { session_id: i64 },
    Send { session_id: i64, message: SendMessageRequest },
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerFrame {
    Connected { principal: PrincipalView },
    Subscribed { topic: String },
    Unsubscribed { topic: String },
    Sent { message_id: i64 },
    Event(MessageEvent),
    Error { code: String, message: String },
}

impl From<&AppError> for ServerFrame {
    fn from(err: &AppError) -> Self {
        let body = err.body();
        ServerFrame::Error { code: body.code.to_owned(), message: body.message }
    }
}

fn verify(gate: &dyn TokenGate, token: &str) -> Option<Principal> {
    match gate.verify(token) {
        Ok(claims) => Some(claims.into()),
        Err(err) => {
            debug!(error = %err, "rejected connection token");
            None
        }
    }
}

/// Per-connection auth state. The handshake stashes whatever identity it
/// could verify; the first `connect` frame turns it into the principal.
#[derive(Debug)]
pub struct ConnectionContext {
    pub id: Uuid,
    handshake: Option<Principal>,
    principal: Option<Principal>,
    connected: bool,
}

impl ConnectionContext {
    /// Never fails: a missing or bad token just leaves nothing stashed.
    pub fn handshake(gate: &dyn TokenGate, headers: &HeaderMap, token_attribute: Option<&str>) -> Self {
        let token = headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(bearer_token)
            .or(token_attribute);

        ConnectionContext {
            id: Uuid::now_v7(),
            handshake: token.and_then(|token| verify(gate, token)),
            principal: None,
            connected: false,
        }
    }

    /// Resolves the principal on the first connect frame: the frame's own
    /// authorization header first, then the handshake identity. Later connect
    /// frames keep whatever the first one resolved.
    pub fn connect(&mut self, gate: &dyn TokenGate, authorization: Option<&str>) -> Option<&Principal> {
        if !self.connected {
            self.connected = true;
            self.principal = authorization
                .and_then(bearer_token)
                .and_then(|token| verify(gate, token))
                .or_else(|| self.handshake.clone());
        }
        self.principal.as_ref()
    }

    pub fn principal(&self) -> AppResult<&Principal> {
        self.principal.as_ref().ok_or(AppError::Unauthorized)
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct HandshakeQuery {
    token: Option<String>,
}

#[debug_handler]
pub(crate) async fn ws_upgrade(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(HandshakeQuery { token }): Query<HandshakeQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let context = ConnectionContext::handshake(state.tokens.as_ref(), &headers, token.as_deref());
    ws.on_upgrade(async move |socket| run_connection(socket, state, context).await)
}

struct Subscriptions {
    tasks: HashMap<i64, JoinHandle<()>>,
}

impl Subscriptions {
    async fn cancel(&mut self, state: &AppState, session_id: i64) -> bool {
        let Some(task) = self.tasks.remove(&session_id) else {
            return false;
        };
        task.abort();
        let _ = task.await;
        state.chat.broadcaster().release(session_id);
        true
    }

    async fn cancel_all(&mut self, state: &AppState) {
        let session_ids: Vec<i64> = self.tasks.keys().copied().collect();
        for session_id in session_ids {
            self.cancel(state, session_id).await;
        }
    }
}

async fn run_connection(socket: WebSocket, state: AppState, mut context: ConnectionContext) {
    info!(conn_id = %context.id, handshake_identity = context.handshake.is_some(), "connection opened");

    let (mut sender, mut receiver) = socket.split();
    let (out_tx, mut out_rx) = mpsc::channel::<ServerFrame>(OUTBOUND_CAPACITY);

    let mut writer = tokio::spawn(async move {
        while let Some(frame) = out_rx.recv().await {
            let text = match serde_json::to_string(&frame) {
                Ok(text) => text,
                Err(err) => {
                    warn!(error = %err, "failed to serialize frame");
                    continue;
                }
            };
            if sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    let mut subscriptions = Subscriptions { tasks: HashMap::new() };

    loop {
        tokio::select! {
            incoming = receiver.next() => {
                let Some(Ok(msg)) = incoming else {
                    break;
                };
                let text = match msg {
                    Message::Text(text) => text,
                    Message::Close(_) => break,
                    _ => continue,
                };

                let reply = match serde_json::from_str::<ClientFrame>(text.as_str()) {
                    Ok(frame) => handle_frame(frame, &state, &mut context, &mut subscriptions, &out_tx)
                        .await
                        .unwrap_or_else(|err| Some(ServerFrame::from(&err))),
                    Err(err) => Some(ServerFrame::from(&AppError::validation(format!("malformed frame: {err}")))),
                };

                if let Some(reply) = reply {
                    if out_tx.send(reply).await.is_err() {
                        break;
                    }
                }
            }
            _ = &mut writer => break,
        }
    }

    subscriptions.cancel_all(&state).await;
    writer.abort();

    info!(conn_id = %context.id, "connection closed");
}

async fn handle_frame(
    frame: ClientFrame,
    state: &AppState,
    context: &mut ConnectionContext,
    subscriptions: &mut Subscriptions,
    out_tx: &mpsc::Sender<ServerFrame>,
) -> AppResult<Option<ServerFrame>> {
    match frame {
        ClientFrame::Connect { authorization } => {
            let conn_id = context.id;
            let Some(principal) = context.connect(state.tokens.as_ref(), authorization.as_deref()) else {
                warn!(%conn_id, "connect without a valid token");
                return Err(AppError::Unauthorized);
            };
            info!(%conn_id, user_id = principal.user_id, authority = %principal.authority(), "connection authenticated");
            Ok(Some(ServerFrame::Connected { principal: principal.into() }))
        }
        ClientFrame::Subscribe { session_id } => {
            let principal = context.principal()?;
            state.sessions.ensure_session_member(session_id, principal).await?;

            if !subscriptions.tasks.contains_key(&session_id) {
                let rx = state.chat.broadcaster().subscribe(session_id);
                let task = forward_events(context.id, session_id, rx, out_tx.clone());
                subscriptions.tasks.insert(session_id, task);
            }
            Ok(Some(ServerFrame::Subscribed { topic: topic(session_id) }))
        }
        ClientFrame::Unsubscribe { session_id } => {
            context.principal()?;
            subscriptions.cancel(state, session_id).await;
            Ok(Some(ServerFrame::Unsubscribed { topic: topic(session_id) }))
        }
        ClientFrame::Send { session_id, message } => {
            let principal = context.principal()?;
            state.sessions.ensure_session_member(session_id, principal).await?;
            let message = state.chat.send(session_id, principal.user_id, message).await?;
            Ok(Some(ServerFrame::Sent { message_id: message.id }))
        }
    }
}

fn forward_events(
    conn_id: Uuid,
    session_id: i64,
    mut rx: broadcast::Receiver<Arc<MessageEvent>>,
    out_tx: mpsc::Sender<ServerFrame>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if out_tx.send(ServerFrame::Event(event.as_ref().clone())).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(%conn_id, session_id, skipped, "subscriber lagged, events dropped");
                    let frame = ServerFrame::Error {
                        code: LAGGED.to_owned(),
                        message: format!("{skipped} events dropped on {}, reload history", topic(session_id)),
                    };
                    if out_tx.send(frame).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}
