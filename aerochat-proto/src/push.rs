//! Push-channel wire protocol for the AeroChat real-time endpoint.
//!
//! Defines the frames exchanged over the WebSocket push channel between
//! the client engine and the messaging backend. Frames are JSON text
//! frames; encoding lives in [`crate::codec`].

use serde::{Deserialize, Serialize};

use crate::model::{ConversationId, Message};

/// Frames sent from the client to the push endpoint.
///
/// The handshake is auth-first: the client must send [`ClientFrame::Auth`]
/// as its first frame and wait for [`ServerFrame::AuthOk`] before anything
/// else. After that, [`ClientFrame::Join`] declares interest in a set of
/// conversations; the server only fans out messages for joined ones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientFrame {
    /// Authenticate with a bearer token. Must be the first frame.
    Auth {
        /// Bearer token issued by the platform's auth service.
        token: String,
    },
    /// Declare interest in a set of conversations.
    ///
    /// Cumulative: joining a second set adds to the first. Safe to replay
    /// after reconnects.
    Join {
        /// The conversations to receive broadcasts for.
        conversation_ids: Vec<ConversationId>,
    },
}

/// Frames sent from the push endpoint to the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerFrame {
    /// Authentication succeeded; the connection is live.
    AuthOk,
    /// A message was created in a joined conversation.
    ///
    /// Broadcast to every joined participant, including the sender.
    NewMessage {
        /// The newly created message.
        message: Message,
    },
    /// The server reports an error condition.
    Error {
        /// Human-readable error description.
        reason: String,
    },
}
