//! Optimistic send pipeline.
//!
//! `send` validates, inserts the message locally in `PendingLocal` state,
//! POSTs it, and reconciles the outcome: the ack replaces the local entry,
//! a failure marks it `Failed` and surfaces a toast. Failed sends are
//! retried only on explicit user action, never automatically.
//!
//! Auth expiry goes through the reconciler's once-only gate, shared with
//! the engine's polling paths, so the user sees a single sign-in-again
//! notice no matter how many calls fail with 401.

use std::sync::Arc;

use tokio::sync::Mutex;

use aerochat_proto::model::{
    ConversationId, LocalId, MessageKind, ValidationError, validate_content,
};

use crate::api::{ApiError, ChatApi};
use crate::notify::{NoticeKind, Notifier};
use crate::reconcile::Reconciler;

/// Errors returned to the caller of the send pipeline.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    /// The content failed validation; nothing was inserted.
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// No failed send with this id exists to retry.
    #[error("no failed send to retry")]
    NothingToRetry,
}

/// Drives optimistic sends against the backend.
pub struct SendPipeline<A> {
    api: Arc<A>,
    reconciler: Arc<Mutex<Reconciler>>,
    notifier: Arc<dyn Notifier>,
}

impl<A: ChatApi> SendPipeline<A> {
    /// Creates a pipeline over the given backend client and reconciler.
    pub fn new(
        api: Arc<A>,
        reconciler: Arc<Mutex<Reconciler>>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            api,
            reconciler,
            notifier,
        }
    }

    /// Sends a message: validate, optimistically insert, POST, reconcile.
    ///
    /// Returns the provisional id of the inserted entry. The returned id
    /// is resolved (or marked failed) by the time the future completes.
    ///
    /// # Errors
    ///
    /// Returns [`SendError::Validation`] for empty or oversized content;
    /// in that case no local entry was created.
    pub async fn send(
        &self,
        conversation: &ConversationId,
        raw_content: &str,
        kind: MessageKind,
    ) -> Result<LocalId, SendError> {
        let content = validate_content(raw_content)?;
        let local = LocalId::new();

        self.reconciler
            .lock()
            .await
            .append_local(conversation, local, content.clone(), kind);

        self.post(conversation, local, &content, kind).await;
        Ok(local)
    }

    /// Retries a failed send, reusing its provisional id and content.
    ///
    /// # Errors
    ///
    /// Returns [`SendError::NothingToRetry`] if the entry is not in the
    /// failed state (it may have been reconciled meanwhile).
    pub async fn retry(
        &self,
        conversation: &ConversationId,
        local: LocalId,
    ) -> Result<(), SendError> {
        let (content, kind) = self
            .reconciler
            .lock()
            .await
            .retry_local(conversation, local)
            .map_err(|_| SendError::NothingToRetry)?;

        self.post(conversation, local, &content, kind).await;
        Ok(())
    }

    /// POSTs the message and reconciles the outcome. The reconciler lock
    /// is never held across the network call.
    async fn post(
        &self,
        conversation: &ConversationId,
        local: LocalId,
        content: &str,
        kind: MessageKind,
    ) {
        match self.api.send_message(conversation, content, kind, local).await {
            Ok(message) => {
                let mut reconciler = self.reconciler.lock().await;
                if let Err(e) = reconciler.resolve_local(conversation, local, &message) {
                    tracing::warn!(error = %e, "send ack could not be reconciled");
                }
            }
            Err(e) => {
                tracing::warn!(
                    conversation = %conversation,
                    error = %e,
                    "message send failed"
                );
                let first_auth_failure = {
                    let mut reconciler = self.reconciler.lock().await;
                    reconciler.fail_local(conversation, local);
                    matches!(e, ApiError::Unauthorized) && reconciler.session_expired()
                };
                if first_auth_failure {
                    self.notifier
                        .notify(NoticeKind::Error, "Session expired. Please sign in again.");
                } else if !matches!(e, ApiError::Unauthorized) {
                    self.notifier
                        .notify(NoticeKind::Warning, "Message failed to send. Tap to retry.");
                }
            }
        }
    }
}
