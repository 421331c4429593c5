//! reqwest-based [`ChatApi`] implementation.
//!
//! Talks to the platform's REST surface. All responses arrive wrapped in
//! a `{ "data": … }` envelope; paginated collections additionally carry a
//! `pagination` block.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde::de::DeserializeOwned;

use aerochat_proto::model::{
    Conversation, ConversationId, ConversationPage, LocalId, Message, MessageKind, MessagePage,
    NotificationStats, UserId,
};

use crate::session::Session;

use super::{ApiError, ChatApi};

/// Default per-request timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Response envelope used by every backend endpoint.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct ConversationData {
    conversation: Conversation,
}

#[derive(Debug, Deserialize)]
struct MessageData {
    message: Message,
}

/// HTTP client for the messaging backend.
///
/// Holds a shared [`Session`] and reads the bearer token on every request,
/// so out-of-band token refreshes take effect immediately.
pub struct HttpChatApi {
    client: reqwest::Client,
    base_url: String,
    session: Arc<Session>,
}

impl HttpChatApi {
    /// Creates a client for the backend at `base_url` (no trailing slash).
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Network`] if the underlying HTTP client cannot
    /// be constructed.
    pub fn new(base_url: impl Into<String>, session: Arc<Session>) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ApiError::Network(e.to_string()))?;
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Ok(Self {
            client,
            base_url,
            session,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, ApiError> {
        let response = request
            .bearer_auth(self.session.token())
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(ApiError::Unauthorized);
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ApiError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let envelope: Envelope<T> = response
            .json()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))?;
        Ok(envelope.data)
    }

    /// Like [`Self::execute`] but for endpoints whose body is irrelevant.
    async fn execute_unit(&self, request: reqwest::RequestBuilder) -> Result<(), ApiError> {
        let response = request
            .bearer_auth(self.session.token())
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(ApiError::Unauthorized);
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ApiError::Status {
                status: status.as_u16(),
                message,
            });
        }
        Ok(())
    }
}

impl ChatApi for HttpChatApi {
    async fn list_conversations(&self, page: u32) -> Result<ConversationPage, ApiError> {
        let request = self
            .client
            .get(self.url("/api/chat/conversations"))
            .query(&[("page", page)]);
        self.execute(request).await
    }

    async fn create_conversation(
        &self,
        participants: &[UserId],
        title: Option<&str>,
    ) -> Result<Conversation, ApiError> {
        let body = serde_json::json!({
            "participant_ids": participants,
            "title": title,
        });
        let request = self
            .client
            .post(self.url("/api/chat/conversations"))
            .json(&body);
        let data: ConversationData = self.execute(request).await?;
        Ok(data.conversation)
    }

    async fn list_messages(
        &self,
        conversation: &ConversationId,
        page: u32,
    ) -> Result<MessagePage, ApiError> {
        let request = self
            .client
            .get(self.url(&format!("/api/chat/conversations/{conversation}/messages")))
            .query(&[("page", page)]);
        self.execute(request).await
    }

    async fn send_message(
        &self,
        conversation: &ConversationId,
        content: &str,
        kind: MessageKind,
        client_ref: LocalId,
    ) -> Result<Message, ApiError> {
        let body = serde_json::json!({
            "content": content,
            "kind": kind,
            "client_ref": client_ref,
        });
        let request = self
            .client
            .post(self.url(&format!("/api/chat/conversations/{conversation}/messages")))
            .json(&body);
        let data: MessageData = self.execute(request).await?;
        Ok(data.message)
    }

    async fn mark_read(&self, conversation: &ConversationId) -> Result<(), ApiError> {
        let request = self
            .client
            .patch(self.url(&format!("/api/chat/conversations/{conversation}/read")));
        self.execute_unit(request).await
    }

    async fn notification_stats(&self) -> Result<NotificationStats, ApiError> {
        let request = self.client.get(self.url("/api/notifications/stats"));
        self.execute(request).await
    }
}
