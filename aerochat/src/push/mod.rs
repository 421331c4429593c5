//! Push channel abstraction and connection supervision.
//!
//! Defines the [`PushConnector`]/[`PushChannel`] traits that concrete
//! channels implement ([`ws::WsConnector`] in production,
//! [`loopback::LoopbackConnector`] in tests) and the [`ConnectionManager`]
//! that keeps a channel alive: connect, replay subscriptions, pump
//! messages, reconnect with exponential backoff on failure.

pub mod loopback;
pub mod ws;

use std::collections::HashSet;
use std::time::Duration;

use tokio::sync::mpsc;

use aerochat_proto::model::{ConversationId, Message};

/// Errors that can occur on the push channel.
#[derive(Debug, thiserror::Error)]
pub enum PushError {
    /// The connection has been closed.
    #[error("push connection closed")]
    ConnectionClosed,

    /// Connect or handshake timed out.
    #[error("push operation timed out")]
    Timeout,

    /// The server rejected the bearer token.
    #[error("push authentication rejected")]
    Unauthorized,

    /// An underlying I/O error occurred.
    #[error("push I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Events emitted by the connection supervisor.
#[derive(Debug)]
pub enum PushEvent {
    /// A connection is established and authenticated; subscriptions have
    /// been replayed.
    Connected,
    /// The connection was lost; the supervisor is backing off and will
    /// reconnect.
    Disconnected,
    /// A message arrived in a subscribed conversation.
    Message(Box<Message>),
}

/// One live, authenticated push connection.
pub trait PushChannel: Send {
    /// Declares interest in the given conversations on this connection.
    fn join(
        &mut self,
        conversations: &[ConversationId],
    ) -> impl std::future::Future<Output = Result<(), PushError>> + Send;

    /// Receives the next broadcast message.
    ///
    /// Blocks asynchronously; an error means the connection is dead and
    /// the channel must be discarded.
    fn recv(&mut self)
    -> impl std::future::Future<Output = Result<Message, PushError>> + Send;
}

/// Factory for push connections.
///
/// The supervisor calls [`PushConnector::connect`] anew for every
/// (re)connection attempt; each successful call yields an authenticated
/// channel with an empty subscription set.
pub trait PushConnector: Send + Sync + 'static {
    /// The channel type produced by this connector.
    type Channel: PushChannel;

    /// Establishes and authenticates a new connection.
    fn connect(
        &self,
    ) -> impl std::future::Future<Output = Result<Self::Channel, PushError>> + Send;
}

/// Exponential reconnect backoff: starts at `initial`, doubles per
/// consecutive failure, capped at `max`.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    next: Duration,
}

impl Backoff {
    /// Creates a backoff schedule.
    #[must_use]
    pub const fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            next: initial,
        }
    }

    /// Returns the delay to wait before the next attempt and advances the
    /// schedule.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = (self.next * 2).min(self.max);
        delay
    }

    /// Resets the schedule after a successful connection.
    pub fn reset(&mut self) {
        self.next = self.initial;
    }
}

/// Commands accepted by the supervisor task.
#[derive(Debug)]
enum PushCommand {
    /// Add conversations to the subscription set.
    Subscribe(Vec<ConversationId>),
    /// Stop the supervisor and drop the connection.
    Shutdown,
}

/// Handle to a running connection supervisor.
pub struct PushHandle {
    cmd_tx: mpsc::UnboundedSender<PushCommand>,
}

impl PushHandle {
    /// Adds conversations to the subscription set.
    ///
    /// Idempotent across reconnects: the set survives connection loss and
    /// is replayed after every successful connect. Subscribing while
    /// disconnected just records the interest.
    pub fn subscribe(&self, conversations: Vec<ConversationId>) {
        let _ = self.cmd_tx.send(PushCommand::Subscribe(conversations));
    }

    /// Stops the supervisor and closes the connection.
    pub fn shutdown(&self) {
        let _ = self.cmd_tx.send(PushCommand::Shutdown);
    }
}

/// Supervises one push connection for the lifetime of the engine.
pub struct ConnectionManager<C> {
    connector: C,
    backoff: Backoff,
}

impl<C: PushConnector> ConnectionManager<C> {
    /// Creates a supervisor over the given connector.
    #[must_use]
    pub const fn new(connector: C, backoff: Backoff) -> Self {
        Self { connector, backoff }
    }

    /// Spawns the supervisor task.
    ///
    /// Emitted [`PushEvent`]s go to `events`; the supervisor exits when
    /// the handle is shut down or the event receiver is dropped.
    #[must_use]
    pub fn spawn(self, events: mpsc::Sender<PushEvent>) -> PushHandle {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        tokio::spawn(supervise(self.connector, self.backoff, cmd_rx, events));
        PushHandle { cmd_tx }
    }
}

/// Supervisor loop: connect, replay subscriptions, pump messages, back off
/// on failure, repeat.
async fn supervise<C: PushConnector>(
    connector: C,
    mut backoff: Backoff,
    mut cmd_rx: mpsc::UnboundedReceiver<PushCommand>,
    events: mpsc::Sender<PushEvent>,
) {
    let mut joined: HashSet<ConversationId> = HashSet::new();

    loop {
        let mut channel = match connector.connect().await {
            Ok(channel) => channel,
            Err(e) => {
                let delay = backoff.next_delay();
                tracing::warn!(error = %e, ?delay, "push connect failed, backing off");
                // Keep absorbing commands while waiting so the join set
                // stays current and shutdown is prompt.
                let deadline = tokio::time::sleep(delay);
                tokio::pin!(deadline);
                loop {
                    tokio::select! {
                        () = &mut deadline => break,
                        cmd = cmd_rx.recv() => match cmd {
                            Some(PushCommand::Subscribe(ids)) => {
                                joined.extend(ids);
                            }
                            Some(PushCommand::Shutdown) | None => return,
                        },
                    }
                }
                continue;
            }
        };

        backoff.reset();

        // Replay the subscription set on the fresh connection.
        let replay: Vec<ConversationId> = joined.iter().cloned().collect();
        if !replay.is_empty() {
            if let Err(e) = channel.join(&replay).await {
                tracing::warn!(error = %e, "subscription replay failed, reconnecting");
                continue;
            }
        }

        tracing::info!(subscriptions = joined.len(), "push channel connected");
        if events.send(PushEvent::Connected).await.is_err() {
            return;
        }

        // Pump until the connection dies or we are told to stop.
        let reconnect = loop {
            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    Some(PushCommand::Subscribe(ids)) => {
                        let fresh: Vec<ConversationId> =
                            ids.into_iter().filter(|id| joined.insert(id.clone())).collect();
                        if !fresh.is_empty() {
                            if let Err(e) = channel.join(&fresh).await {
                                tracing::warn!(error = %e, "join failed, reconnecting");
                                break true;
                            }
                        }
                    }
                    Some(PushCommand::Shutdown) | None => break false,
                },
                msg = channel.recv() => match msg {
                    Ok(message) => {
                        if events.send(PushEvent::Message(Box::new(message))).await.is_err() {
                            break false;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "push channel lost");
                        break true;
                    }
                },
            }
        };

        if !reconnect {
            return;
        }
        if events.send(PushEvent::Disconnected).await.is_err() {
            return;
        }
    }
}
