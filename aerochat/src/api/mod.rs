//! REST collaborator for the messaging backend.
//!
//! Defines the [`ChatApi`] trait that the engine works against. The
//! production implementation is [`http::HttpChatApi`]; tests substitute
//! in-memory fakes.

pub mod http;

use aerochat_proto::model::{
    Conversation, ConversationId, ConversationPage, LocalId, Message, MessageKind, MessagePage,
    NotificationStats, UserId,
};

/// Errors that can occur when calling the messaging backend.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The bearer token was rejected (HTTP 401).
    #[error("session expired")]
    Unauthorized,

    /// The backend returned a non-success status other than 401.
    #[error("backend returned status {status}: {message}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Backend-provided error message, if any.
        message: String,
    },

    /// The request never reached the backend or the connection broke.
    #[error("network error: {0}")]
    Network(String),

    /// The response body could not be decoded.
    #[error("malformed response: {0}")]
    Decode(String),
}

impl ApiError {
    /// Whether the failure is transient and the same call may succeed later.
    ///
    /// Auth rejections and decode failures are not; network errors and
    /// server-side 5xx statuses are.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::Network(_) => true,
            Self::Status { status, .. } => *status >= 500,
            Self::Unauthorized | Self::Decode(_) => false,
        }
    }
}

/// Async client trait for the messaging backend's REST surface.
///
/// Every call is authenticated with the session's current bearer token.
/// Implementations must be usable from multiple tasks concurrently.
pub trait ChatApi: Send + Sync {
    /// Fetches one page of the viewer's conversations, most recent first.
    fn list_conversations(
        &self,
        page: u32,
    ) -> impl std::future::Future<Output = Result<ConversationPage, ApiError>> + Send;

    /// Creates (or returns the existing) conversation with the given
    /// participants.
    ///
    /// For a direct conversation the backend is idempotent: calling this
    /// twice with the same peer returns the same conversation.
    fn create_conversation(
        &self,
        participants: &[UserId],
        title: Option<&str>,
    ) -> impl std::future::Future<Output = Result<Conversation, ApiError>> + Send;

    /// Fetches one page of a conversation's messages, oldest-first within
    /// the page. Page 1 is the most recent page.
    fn list_messages(
        &self,
        conversation: &ConversationId,
        page: u32,
    ) -> impl std::future::Future<Output = Result<MessagePage, ApiError>> + Send;

    /// Creates a message in a conversation.
    ///
    /// `client_ref` is the sender's provisional id; backends that support
    /// it echo the value back on the created message and in the push
    /// broadcast so the sender can reconcile exactly.
    fn send_message(
        &self,
        conversation: &ConversationId,
        content: &str,
        kind: MessageKind,
        client_ref: LocalId,
    ) -> impl std::future::Future<Output = Result<Message, ApiError>> + Send;

    /// Moves the viewer's last-read marker in a conversation to now.
    fn mark_read(
        &self,
        conversation: &ConversationId,
    ) -> impl std::future::Future<Output = Result<(), ApiError>> + Send;

    /// Fetches aggregate notification counters for the header badge.
    fn notification_stats(
        &self,
    ) -> impl std::future::Future<Output = Result<NotificationStats, ApiError>> + Send;
}
