//! In-process push channel for deterministic tests.
//!
//! [`LoopbackConnector`] implements [`PushConnector`] without any network;
//! the paired [`LoopbackServer`] handle lets a test broadcast messages,
//! sever live connections, and script connect failures to exercise the
//! supervisor's reconnect path.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::mpsc;

use aerochat_proto::model::{ConversationId, Message};

use super::{PushChannel, PushConnector, PushError};

/// One registered loopback connection as seen from the server side.
struct Registration {
    joined: Arc<Mutex<HashSet<ConversationId>>>,
    tx: mpsc::UnboundedSender<Message>,
}

#[derive(Default)]
struct Shared {
    connections: Mutex<Vec<Registration>>,
    fail_next: AtomicU32,
    connect_count: AtomicU64,
}

/// Connector half of the loopback pair.
pub struct LoopbackConnector {
    shared: Arc<Shared>,
}

impl LoopbackConnector {
    /// Creates a connected connector/server pair.
    #[must_use]
    pub fn new() -> (Self, LoopbackServer) {
        let shared = Arc::new(Shared::default());
        (
            Self {
                shared: Arc::clone(&shared),
            },
            LoopbackServer { shared },
        )
    }
}

impl PushConnector for LoopbackConnector {
    type Channel = LoopbackChannel;

    async fn connect(&self) -> Result<LoopbackChannel, PushError> {
        self.shared.connect_count.fetch_add(1, Ordering::SeqCst);

        let scripted = self.shared.fail_next.load(Ordering::SeqCst);
        if scripted > 0 {
            self.shared.fail_next.fetch_sub(1, Ordering::SeqCst);
            return Err(PushError::Io(std::io::Error::other(
                "scripted connect failure",
            )));
        }

        let joined = Arc::new(Mutex::new(HashSet::new()));
        let (tx, rx) = mpsc::unbounded_channel();
        self.shared.connections.lock().push(Registration {
            joined: Arc::clone(&joined),
            tx,
        });
        Ok(LoopbackChannel { joined, rx })
    }
}

/// Channel half handed to the supervisor.
pub struct LoopbackChannel {
    joined: Arc<Mutex<HashSet<ConversationId>>>,
    rx: mpsc::UnboundedReceiver<Message>,
}

impl PushChannel for LoopbackChannel {
    async fn join(&mut self, conversations: &[ConversationId]) -> Result<(), PushError> {
        self.joined.lock().extend(conversations.iter().cloned());
        Ok(())
    }

    async fn recv(&mut self) -> Result<Message, PushError> {
        self.rx.recv().await.ok_or(PushError::ConnectionClosed)
    }
}

/// Test-side handle controlling the loopback "backend".
pub struct LoopbackServer {
    shared: Arc<Shared>,
}

impl LoopbackServer {
    /// Broadcasts a message to every live connection joined to its
    /// conversation.
    pub fn broadcast(&self, message: &Message) {
        let connections = self.shared.connections.lock();
        for conn in connections.iter() {
            if conn.joined.lock().contains(&message.conversation_id) {
                let _ = conn.tx.send(message.clone());
            }
        }
    }

    /// Severs every live connection; their `recv` calls return
    /// `ConnectionClosed`.
    pub fn drop_connections(&self) {
        self.shared.connections.lock().clear();
    }

    /// Makes the next `n` connect attempts fail.
    pub fn fail_next_connects(&self, n: u32) {
        self.shared.fail_next.store(n, Ordering::SeqCst);
    }

    /// Total number of connect attempts observed, including failed ones.
    #[must_use]
    pub fn connect_count(&self) -> u64 {
        self.shared.connect_count.load(Ordering::SeqCst)
    }

    /// The subscription set of the most recent live connection.
    #[must_use]
    pub fn joined_on_latest(&self) -> HashSet<ConversationId> {
        self.shared
            .connections
            .lock()
            .last()
            .map(|conn| conn.joined.lock().clone())
            .unwrap_or_default()
    }
}
