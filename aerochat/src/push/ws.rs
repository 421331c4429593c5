//! WebSocket push channel.
//!
//! Connects to the backend's `/ws` endpoint, authenticates with the
//! session's bearer token, then receives `new-message` broadcasts as JSON
//! text frames. One background task owns the read half; the channel owns
//! the write half for `join` frames.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use aerochat_proto::codec;
use aerochat_proto::model::{ConversationId, Message};
use aerochat_proto::push::{ClientFrame, ServerFrame};

use crate::session::Session;

use super::{PushChannel, PushConnector, PushError};

type WsSink = futures_util::stream::SplitSink<
    WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>,
    WsMessage,
>;
type WsSource =
    futures_util::stream::SplitStream<WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>>;

/// Connector for the production WebSocket push endpoint.
pub struct WsConnector {
    url: String,
    session: Arc<Session>,
    connect_timeout: Duration,
    auth_timeout: Duration,
}

impl WsConnector {
    /// Creates a connector for the push endpoint at `url` (ws:// or wss://).
    pub fn new(
        url: impl Into<String>,
        session: Arc<Session>,
        connect_timeout: Duration,
        auth_timeout: Duration,
    ) -> Self {
        Self {
            url: url.into(),
            session,
            connect_timeout,
            auth_timeout,
        }
    }
}

impl PushConnector for WsConnector {
    type Channel = WsChannel;

    /// Connects, authenticates, and spawns the reader task.
    ///
    /// Steps: open the WebSocket (connect timeout), send
    /// [`ClientFrame::Auth`], wait for [`ServerFrame::AuthOk`] (auth
    /// timeout), then hand the read half to a background task.
    ///
    /// # Errors
    ///
    /// - [`PushError::Timeout`] if connect or auth acknowledgment times out.
    /// - [`PushError::Unauthorized`] if the server rejects the token.
    /// - [`PushError::Io`] for other connection or protocol failures.
    async fn connect(&self) -> Result<WsChannel, PushError> {
        let (ws_stream, _response) =
            tokio::time::timeout(self.connect_timeout, connect_async(&self.url))
                .await
                .map_err(|_| {
                    tracing::warn!(url = %self.url, "push WebSocket connect timed out");
                    PushError::Timeout
                })?
                .map_err(|e| {
                    tracing::warn!(url = %self.url, error = %e, "push WebSocket connect failed");
                    PushError::Io(std::io::Error::other(e.to_string()))
                })?;

        let (mut sink, mut source) = ws_stream.split();

        let auth = ClientFrame::Auth {
            token: self.session.token(),
        };
        let text =
            codec::encode_client(&auth).map_err(|e| PushError::Io(std::io::Error::other(e)))?;
        sink.send(WsMessage::Text(text.into()))
            .await
            .map_err(|e| {
                tracing::warn!(error = %e, "failed to send auth frame");
                PushError::Io(std::io::Error::other(e.to_string()))
            })?;

        wait_for_auth_ok(&mut source, self.auth_timeout).await?;

        let (tx, rx) = mpsc::channel(256);
        let reader_handle = tokio::spawn(reader_loop(source, tx));

        Ok(WsChannel {
            sink,
            incoming: rx,
            _reader_handle: reader_handle,
        })
    }
}

/// Waits for the server's auth acknowledgment.
async fn wait_for_auth_ok(source: &mut WsSource, timeout: Duration) -> Result<(), PushError> {
    let frame = tokio::time::timeout(timeout, source.next())
        .await
        .map_err(|_| {
            tracing::warn!("push auth acknowledgment timed out");
            PushError::Timeout
        })?;

    match frame {
        Some(Ok(WsMessage::Text(text))) => match codec::decode_server(&text) {
            Ok(ServerFrame::AuthOk) => Ok(()),
            Ok(ServerFrame::Error { reason }) => {
                tracing::warn!(reason = %reason, "push auth rejected");
                Err(PushError::Unauthorized)
            }
            Ok(other) => {
                tracing::warn!(?other, "unexpected frame during push auth");
                Err(PushError::Io(std::io::Error::other(
                    "unexpected frame during auth",
                )))
            }
            Err(e) => {
                tracing::warn!(error = %e, "malformed push auth response");
                Err(PushError::Io(std::io::Error::other(e.to_string())))
            }
        },
        Some(Ok(WsMessage::Close(_))) | None => {
            tracing::warn!("push connection closed during auth");
            Err(PushError::ConnectionClosed)
        }
        Some(Ok(_)) => Err(PushError::Io(std::io::Error::other(
            "unexpected non-text frame during auth",
        ))),
        Some(Err(e)) => {
            tracing::warn!(error = %e, "WebSocket error during auth");
            Err(PushError::Io(std::io::Error::other(e.to_string())))
        }
    }
}

/// One live, authenticated WebSocket push connection.
pub struct WsChannel {
    sink: WsSink,
    incoming: mpsc::Receiver<Message>,
    _reader_handle: tokio::task::JoinHandle<()>,
}

impl PushChannel for WsChannel {
    async fn join(&mut self, conversations: &[ConversationId]) -> Result<(), PushError> {
        let frame = ClientFrame::Join {
            conversation_ids: conversations.to_vec(),
        };
        let text =
            codec::encode_client(&frame).map_err(|e| PushError::Io(std::io::Error::other(e)))?;
        self.sink
            .send(WsMessage::Text(text.into()))
            .await
            .map_err(|e| {
                tracing::warn!(error = %e, "push join send failed");
                PushError::ConnectionClosed
            })
    }

    async fn recv(&mut self) -> Result<Message, PushError> {
        self.incoming
            .recv()
            .await
            .ok_or(PushError::ConnectionClosed)
    }
}

/// Background task that reads server frames and forwards broadcasts.
///
/// Malformed frames are logged and skipped; the task only exits on close
/// or a read error, which surfaces as `ConnectionClosed` on `recv`.
async fn reader_loop(mut source: WsSource, tx: mpsc::Sender<Message>) {
    while let Some(frame) = source.next().await {
        match frame {
            Ok(WsMessage::Text(text)) => match codec::decode_server(&text) {
                Ok(ServerFrame::NewMessage { message }) => {
                    if tx.send(message).await.is_err() {
                        // Channel dropped, nothing left to deliver to.
                        break;
                    }
                }
                Ok(ServerFrame::Error { reason }) => {
                    tracing::warn!(reason = %reason, "push server error");
                }
                Ok(ServerFrame::AuthOk) => {
                    tracing::debug!("redundant auth-ok frame");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "malformed push frame, skipping");
                }
            },
            Ok(WsMessage::Close(_)) => {
                tracing::info!("push WebSocket closed by server");
                break;
            }
            Ok(_) => {
                // Ping/pong/binary frames are not part of the protocol.
            }
            Err(e) => {
                tracing::warn!(error = %e, "push WebSocket read error");
                break;
            }
        }
    }
    tracing::debug!("push reader task exiting");
}
