//! HTTP + WebSocket surface of the stub backend.
//!
//! REST routes mirror the production messaging API (same paths, same
//! `{ "data": … }` envelopes); `/ws` implements the push protocol:
//! auth-first handshake, cumulative joins, new-message fan-out.

use std::sync::Arc;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;

use aerochat_proto::codec;
use aerochat_proto::model::{ChatUser, ConversationId, LocalId, MessageKind, UserId};
use aerochat_proto::push::{ClientFrame, ServerFrame};

use crate::state::{StubError, StubState};

impl IntoResponse for StubError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::ConversationNotFound(_) | Self::UserNotFound(_) => StatusCode::NOT_FOUND,
            Self::NotParticipant(_) => StatusCode::FORBIDDEN,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// Extracts and authenticates the bearer token.
fn authed(state: &StubState, headers: &HeaderMap) -> Result<ChatUser, StubError> {
    let token = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(StubError::Unauthorized)?;
    state.authenticate(token)
}

#[derive(Debug, Deserialize)]
struct PageQuery {
    #[serde(default = "default_page")]
    page: u32,
}

const fn default_page() -> u32 {
    1
}

#[derive(Debug, Deserialize)]
struct CreateConversationBody {
    participant_ids: Vec<UserId>,
    #[serde(default)]
    title: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SendMessageBody {
    content: String,
    kind: MessageKind,
    #[serde(default)]
    client_ref: Option<LocalId>,
}

async fn list_conversations(
    State(state): State<Arc<StubState>>,
    headers: HeaderMap,
    Query(query): Query<PageQuery>,
) -> Result<Json<serde_json::Value>, StubError> {
    let viewer = authed(&state, &headers)?;
    let page = state.list_conversations(&viewer.id, query.page)?;
    Ok(Json(json!({ "data": page })))
}

async fn create_conversation(
    State(state): State<Arc<StubState>>,
    headers: HeaderMap,
    Json(body): Json<CreateConversationBody>,
) -> Result<Json<serde_json::Value>, StubError> {
    let viewer = authed(&state, &headers)?;
    let conversation = state.create_conversation(&viewer.id, &body.participant_ids, body.title)?;
    Ok(Json(json!({ "data": { "conversation": conversation } })))
}

async fn list_messages(
    State(state): State<Arc<StubState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Query(query): Query<PageQuery>,
) -> Result<Json<serde_json::Value>, StubError> {
    let _viewer = authed(&state, &headers)?;
    let page = state.list_messages(&ConversationId::new(id), query.page)?;
    Ok(Json(json!({ "data": page })))
}

async fn send_message(
    State(state): State<Arc<StubState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<SendMessageBody>,
) -> Result<Json<serde_json::Value>, StubError> {
    let sender = authed(&state, &headers)?;
    let message = state.append_message(
        &ConversationId::new(id),
        &sender,
        body.content,
        body.kind,
        body.client_ref,
    )?;
    Ok(Json(json!({ "data": { "message": message } })))
}

async fn mark_read(
    State(state): State<Arc<StubState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, StubError> {
    let viewer = authed(&state, &headers)?;
    state.mark_read(&ConversationId::new(id), &viewer.id)?;
    Ok(Json(json!({ "data": { "ok": true } })))
}

async fn notification_stats(
    State(state): State<Arc<StubState>>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, StubError> {
    let viewer = authed(&state, &headers)?;
    Ok(Json(json!({ "data": state.stats(&viewer.id) })))
}

/// axum handler that upgrades `/ws` requests.
async fn ws_handler(
    ws: axum::extract::ws::WebSocketUpgrade,
    State(state): State<Arc<StubState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handles one push connection.
///
/// Lifecycle: wait for the auth frame, acknowledge, register the
/// connection, then run a reader task (join frames) and a writer task
/// (fan-out) until either side closes.
async fn handle_socket(socket: WebSocket, state: Arc<StubState>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let Some(user) = wait_for_auth(&mut ws_receiver, &state).await else {
        let frame = ServerFrame::Error {
            reason: "authentication required".to_string(),
        };
        if let Ok(text) = codec::encode_server(&frame) {
            let _ = ws_sender.send(WsMessage::Text(text.into())).await;
        }
        let _ = ws_sender.close().await;
        return;
    };

    if let Ok(text) = codec::encode_server(&ServerFrame::AuthOk) {
        if ws_sender.send(WsMessage::Text(text.into())).await.is_err() {
            return;
        }
    }

    let (connection, mut rx) = state.register_connection(user.id.clone());
    tracing::info!(user = %user.id, connection, "push client connected");

    let mut write_task = tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            if ws_sender.send(WsMessage::Text(text.into())).await.is_err() {
                break;
            }
        }
        // Channel dropped server-side; tell the client.
        let _ = ws_sender.send(WsMessage::Close(None)).await;
    });

    let reader_state = Arc::clone(&state);
    let reader_user = user.id.clone();
    let mut read_task = tokio::spawn(async move {
        while let Some(Ok(frame)) = ws_receiver.next().await {
            match frame {
                WsMessage::Text(text) => match codec::decode_client(&text) {
                    Ok(ClientFrame::Join { conversation_ids }) => {
                        reader_state.join(connection, conversation_ids);
                    }
                    Ok(ClientFrame::Auth { .. }) => {
                        tracing::debug!(user = %reader_user, "redundant auth frame");
                    }
                    Err(e) => {
                        tracing::warn!(user = %reader_user, error = %e, "malformed client frame");
                    }
                },
                WsMessage::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut read_task => write_task.abort(),
        _ = &mut write_task => read_task.abort(),
    }

    state.unregister_connection(connection);
    tracing::info!(user = %user.id, connection, "push client disconnected");
}

/// Waits for the first frame, expecting [`ClientFrame::Auth`] with a
/// valid token.
async fn wait_for_auth(
    receiver: &mut (impl StreamExt<Item = Result<WsMessage, axum::Error>> + Unpin),
    state: &StubState,
) -> Option<ChatUser> {
    while let Some(Ok(frame)) = receiver.next().await {
        match frame {
            WsMessage::Text(text) => match codec::decode_client(&text) {
                Ok(ClientFrame::Auth { token }) => return state.authenticate(&token).ok(),
                Ok(other) => {
                    tracing::warn!(frame = ?other, "expected auth frame first");
                    return None;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "malformed auth frame");
                    return None;
                }
            },
            WsMessage::Close(_) => return None,
            _ => {}
        }
    }
    None
}

/// Starts the stub backend on the given address and returns the bound
/// address and a join handle.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind.
pub async fn start_server(
    addr: &str,
    state: Arc<StubState>,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    let app = axum::Router::new()
        .route(
            "/api/chat/conversations",
            axum::routing::get(list_conversations).post(create_conversation),
        )
        .route(
            "/api/chat/conversations/{id}/messages",
            axum::routing::get(list_messages).post(send_message),
        )
        .route(
            "/api/chat/conversations/{id}/read",
            axum::routing::patch(mark_read),
        )
        .route(
            "/api/notifications/stats",
            axum::routing::get(notification_stats),
        )
        .route("/ws", axum::routing::get(ws_handler))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "stub server error");
        }
    });

    Ok((bound_addr, handle))
}
