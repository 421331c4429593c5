// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::missing_panics_doc,
    clippy::missing_docs_in_private_items
)]

//! Integration tests for the optimistic send pipeline.
//!
//! Runs the full send path against a scripted backend:
//! - a successful send resolves the provisional entry and updates the roster
//! - a failed send marks the entry, emits `SendFailed`, and is retried only
//!   on explicit user action
//! - a push echo arriving before the REST acknowledgment leaves one entry
//! - session expiry is surfaced to the user exactly once

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex as SyncMutex;
use tokio::sync::{Mutex, mpsc};

use aerochat::api::{ApiError, ChatApi};
use aerochat::notify::{NoticeKind, Notifier};
use aerochat::reconcile::{ChatEvent, Reconciler};
use aerochat::send::{SendError, SendPipeline};
use aerochat::session::Session;
use aerochat::store::DeliveryState;
use aerochat_proto::model::{
    ChatUser, Conversation, ConversationId, ConversationKind, ConversationPage, LocalId, Message,
    MessageId, MessageKind, MessagePage, NotificationStats, Pagination, Participant, Timestamp,
    UserId,
};

// =============================================================================
// Scripted backend and recording notifier
// =============================================================================

/// Fake backend whose per-call send outcome is scripted up front.
struct ScriptedApi {
    outcomes: SyncMutex<Vec<Result<(), ApiError>>>,
    sends: SyncMutex<u32>,
}

impl ScriptedApi {
    fn new(outcomes: Vec<Result<(), ApiError>>) -> Self {
        Self {
            outcomes: SyncMutex::new(outcomes),
            sends: SyncMutex::new(0),
        }
    }

    fn send_count(&self) -> u32 {
        *self.sends.lock()
    }
}

impl ChatApi for ScriptedApi {
    async fn list_conversations(&self, _page: u32) -> Result<ConversationPage, ApiError> {
        Ok(ConversationPage {
            conversations: vec![],
            pagination: Pagination {
                page: 1,
                pages: 1,
                total: 0,
            },
        })
    }

    async fn create_conversation(
        &self,
        _participants: &[UserId],
        _title: Option<&str>,
    ) -> Result<Conversation, ApiError> {
        Err(ApiError::Status {
            status: 500,
            message: "not scripted".into(),
        })
    }

    async fn list_messages(
        &self,
        _conversation: &ConversationId,
        _page: u32,
    ) -> Result<MessagePage, ApiError> {
        Ok(MessagePage {
            messages: vec![],
            pagination: Pagination {
                page: 1,
                pages: 1,
                total: 0,
            },
        })
    }

    async fn send_message(
        &self,
        conversation: &ConversationId,
        content: &str,
        kind: MessageKind,
        client_ref: LocalId,
    ) -> Result<Message, ApiError> {
        *self.sends.lock() += 1;
        let mut outcomes = self.outcomes.lock();
        let outcome = if outcomes.is_empty() {
            Ok(())
        } else {
            outcomes.remove(0)
        };
        outcome.map(|()| Message {
            id: MessageId::new(format!("m-{}", self.sends.lock())),
            conversation_id: conversation.clone(),
            sender: viewer(),
            content: content.to_string(),
            kind,
            created_at: Timestamp::now(),
            client_ref: Some(client_ref),
        })
    }

    async fn mark_read(&self, _conversation: &ConversationId) -> Result<(), ApiError> {
        Ok(())
    }

    async fn notification_stats(&self) -> Result<NotificationStats, ApiError> {
        Ok(NotificationStats::default())
    }
}

/// Notifier that records every notice for assertions.
#[derive(Default, Clone)]
struct RecordingNotifier {
    notices: Arc<SyncMutex<Vec<(NoticeKind, String)>>>,
}

impl RecordingNotifier {
    fn notices(&self) -> Vec<(NoticeKind, String)> {
        self.notices.lock().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, kind: NoticeKind, text: &str) {
        self.notices.lock().push((kind, text.to_string()));
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn viewer() -> ChatUser {
    ChatUser {
        id: UserId::new("me"),
        name: "Me".to_string(),
        avatar: None,
        role: None,
    }
}

fn conversation(id: &str) -> Conversation {
    Conversation {
        id: ConversationId::new(id),
        kind: ConversationKind::Direct,
        title: None,
        participants: vec![Participant {
            user_id: UserId::new("me"),
            last_read: None,
            user: None,
        }],
        last_message: None,
        unread_count: 0,
        created_at: Timestamp::from_millis(0),
        updated_at: None,
    }
}

struct Setup {
    pipeline: SendPipeline<ScriptedApi>,
    api: Arc<ScriptedApi>,
    reconciler: Arc<Mutex<Reconciler>>,
    events: mpsc::Receiver<ChatEvent>,
    notifier: RecordingNotifier,
    id: ConversationId,
}

async fn setup(outcomes: Vec<Result<(), ApiError>>) -> Setup {
    let session = Arc::new(Session::new(viewer(), "tok"));
    let (events_tx, events_rx) = mpsc::channel(64);
    let (mut reconciler, _unread, _roster) =
        Reconciler::new(session, events_tx, Duration::from_secs(5));

    let id = ConversationId::new("c-1");
    reconciler.apply_refresh(vec![conversation("c-1")], Instant::now());
    let ticket = reconciler.open_conversation(&id);
    reconciler
        .install_history(
            &ticket,
            &MessagePage {
                messages: vec![],
                pagination: Pagination {
                    page: 1,
                    pages: 1,
                    total: 0,
                },
            },
        )
        .unwrap();

    let reconciler = Arc::new(Mutex::new(reconciler));
    let api = Arc::new(ScriptedApi::new(outcomes));
    let notifier = RecordingNotifier::default();
    let pipeline = SendPipeline::new(
        Arc::clone(&api),
        Arc::clone(&reconciler),
        Arc::new(notifier.clone()),
    );

    Setup {
        pipeline,
        api,
        reconciler,
        events: events_rx,
        notifier,
        id,
    }
}

fn drain(events: &mut mpsc::Receiver<ChatEvent>) -> Vec<ChatEvent> {
    let mut drained = Vec::new();
    while let Ok(event) = events.try_recv() {
        drained.push(event);
    }
    drained
}

// =============================================================================
// Success path
// =============================================================================

#[tokio::test]
async fn successful_send_resolves_and_updates_roster() {
    let mut s = setup(vec![Ok(())]).await;
    let _ = drain(&mut s.events);

    s.pipeline.send(&s.id, "hello", MessageKind::Text).await.unwrap();

    let timeline = s.reconciler.lock().await.timeline(&s.id).unwrap();
    assert_eq!(timeline.len(), 1);
    assert_eq!(timeline[0].delivery, DeliveryState::Sent);
    assert_eq!(timeline[0].content, "hello");

    // The ack also refreshed the roster preview.
    let roster = s.reconciler.lock().await.roster();
    assert!(roster[0].last_message.is_some());

    // No unread from the viewer's own message, no user notices.
    assert_eq!(s.reconciler.lock().await.total_unread(), 0);
    assert!(s.notifier.notices().is_empty());
}

#[tokio::test]
async fn content_is_trimmed_before_sending() {
    let mut s = setup(vec![Ok(())]).await;
    let _ = drain(&mut s.events);

    s.pipeline
        .send(&s.id, "  hello  ", MessageKind::Text)
        .await
        .unwrap();

    let timeline = s.reconciler.lock().await.timeline(&s.id).unwrap();
    assert_eq!(timeline[0].content, "hello");
}

// =============================================================================
// Failure and retry
// =============================================================================

#[tokio::test]
async fn failure_emits_send_failed_and_waits_for_explicit_retry() {
    let mut s = setup(vec![Err(ApiError::Network("reset".into())), Ok(())]).await;
    let _ = drain(&mut s.events);

    let local = s.pipeline.send(&s.id, "hello", MessageKind::Text).await.unwrap();

    // One POST, no automatic retry.
    assert_eq!(s.api.send_count(), 1);
    let events = drain(&mut s.events);
    assert!(events.iter().any(|e| matches!(
        e,
        ChatEvent::SendFailed { local: failed, .. } if *failed == local
    )));
    {
        let timeline = s.reconciler.lock().await.timeline(&s.id).unwrap();
        assert_eq!(timeline[0].delivery, DeliveryState::Failed);
    }
    let notices = s.notifier.notices();
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].0, NoticeKind::Warning);

    // The user taps retry: same provisional id, second POST, resolved.
    s.pipeline.retry(&s.id, local).await.unwrap();
    assert_eq!(s.api.send_count(), 2);
    let timeline = s.reconciler.lock().await.timeline(&s.id).unwrap();
    assert_eq!(timeline.len(), 1);
    assert_eq!(timeline[0].delivery, DeliveryState::Sent);
}

#[tokio::test]
async fn retry_of_resolved_send_is_rejected() {
    let s = setup(vec![Ok(())]).await;
    let local = s.pipeline.send(&s.id, "hello", MessageKind::Text).await.unwrap();
    assert!(matches!(
        s.pipeline.retry(&s.id, local).await,
        Err(SendError::NothingToRetry)
    ));
    assert_eq!(s.api.send_count(), 1);
}

#[tokio::test]
async fn validation_failure_creates_no_entry_and_no_post() {
    let s = setup(vec![]).await;
    let result = s.pipeline.send(&s.id, "   ", MessageKind::Text).await;
    assert!(matches!(result, Err(SendError::Validation(_))));
    assert!(s.reconciler.lock().await.timeline(&s.id).unwrap().is_empty());
    assert_eq!(s.api.send_count(), 0);
}

// =============================================================================
// Push echo racing the REST acknowledgment
// =============================================================================

#[tokio::test]
async fn push_echo_before_ack_leaves_single_entry() {
    let s = setup(vec![]).await;
    let local = LocalId::new();

    let mut reconciler = s.reconciler.lock().await;
    reconciler.append_local(&s.id, local, "hello".into(), MessageKind::Text);

    // The broadcast echo lands before the POST response.
    let echo = Message {
        id: MessageId::new("m-1"),
        conversation_id: s.id.clone(),
        sender: viewer(),
        content: "hello".to_string(),
        kind: MessageKind::Text,
        created_at: Timestamp::now(),
        client_ref: Some(local),
    };
    reconciler.apply_incoming(&echo);

    // Then the POST response arrives for the same message.
    reconciler.resolve_local(&s.id, local, &echo).unwrap();

    let timeline = reconciler.timeline(&s.id).unwrap();
    assert_eq!(timeline.len(), 1);
    assert_eq!(timeline[0].delivery, DeliveryState::Sent);
}

// =============================================================================
// Session expiry
// =============================================================================

#[tokio::test]
async fn session_expiry_notice_appears_once() {
    let s = setup(vec![
        Err(ApiError::Unauthorized),
        Err(ApiError::Unauthorized),
        Err(ApiError::Unauthorized),
    ])
    .await;

    let first = s.pipeline.send(&s.id, "one", MessageKind::Text).await.unwrap();
    s.pipeline.send(&s.id, "two", MessageKind::Text).await.unwrap();
    let _ = s.pipeline.retry(&s.id, first).await;

    let errors: Vec<_> = s
        .notifier
        .notices()
        .into_iter()
        .filter(|(kind, _)| *kind == NoticeKind::Error)
        .collect();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].1, "Session expired. Please sign in again.");
}
