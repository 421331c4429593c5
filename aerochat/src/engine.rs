//! Engine coordinator wiring the push channel, REST client, reconciler,
//! and send pipeline together.
//!
//! The embedding application talks to the engine through an
//! [`EngineHandle`]: commands in via an mpsc sender, [`ChatEvent`]s out
//! via a bounded receiver, and `watch` channels for the unread badge,
//! roster snapshot, and notification stats.
//!
//! Background tasks:
//! 1. the push connection supervisor (connect, replay joins, backoff),
//! 2. a push event pump that feeds broadcasts into the reconciler,
//! 3. a conversation-list poll (safety net under the push channel),
//! 4. a notification-stats poll,
//! 5. the command handler.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{Mutex, mpsc, watch};

use aerochat_proto::model::{
    Conversation, ConversationId, LocalId, MessageKind, NotificationStats, UserId,
};

use crate::api::{ApiError, ChatApi};
use crate::config::EngineConfig;
use crate::notify::{NoticeKind, Notifier};
use crate::push::{Backoff, ConnectionManager, PushConnector, PushEvent, PushHandle};
use crate::reconcile::{ChatEvent, FetchKind, Reconciler};
use crate::send::{SendError, SendPipeline};
use crate::session::Session;
use crate::store::TimelineEntry;

/// Commands accepted by the engine.
#[derive(Debug)]
pub enum EngineCommand {
    /// Open a conversation: mark it read and (re)load its history.
    OpenConversation(ConversationId),
    /// Close the currently open conversation.
    CloseConversation,
    /// Load the next older history page of a conversation.
    LoadOlder(ConversationId),
    /// Send a message to a conversation.
    SendMessage {
        /// Target conversation.
        conversation: ConversationId,
        /// Raw content; validated by the send pipeline.
        content: String,
        /// Payload kind.
        kind: MessageKind,
    },
    /// Retry a failed send.
    RetrySend {
        /// Conversation of the failed send.
        conversation: ConversationId,
        /// Provisional id of the failed send.
        local: LocalId,
    },
    /// Create (or look up) a conversation with the given participants.
    StartConversation {
        /// The other participants.
        participants: Vec<UserId>,
        /// Optional title for group conversations.
        title: Option<String>,
    },
    /// Mark a conversation read without opening it.
    MarkRead(ConversationId),
    /// Refresh the conversation list now, outside the poll schedule.
    Refresh,
    /// Stop all engine tasks.
    Shutdown,
}

/// Error returned when the engine has shut down.
#[derive(Debug, thiserror::Error)]
#[error("engine is not running")]
pub struct EngineClosed;

/// Handle to a running engine.
pub struct EngineHandle {
    cmd_tx: mpsc::Sender<EngineCommand>,
    reconciler: Arc<Mutex<Reconciler>>,
    /// Stream of state-change events.
    pub events: mpsc::Receiver<ChatEvent>,
    /// Latest total unread count, for the header badge.
    pub unread: watch::Receiver<u32>,
    /// Latest roster snapshot, most recent activity first.
    pub roster: watch::Receiver<Vec<Conversation>>,
    /// Latest notification stats.
    pub stats: watch::Receiver<NotificationStats>,
}

impl EngineHandle {
    /// Sends a command to the engine.
    ///
    /// # Errors
    ///
    /// Returns [`EngineClosed`] if the engine has shut down.
    pub async fn command(&self, command: EngineCommand) -> Result<(), EngineClosed> {
        self.cmd_tx.send(command).await.map_err(|_| EngineClosed)
    }

    /// Stops all engine tasks.
    pub async fn shutdown(&self) {
        let _ = self.cmd_tx.send(EngineCommand::Shutdown).await;
    }

    /// A snapshot of one conversation's timeline, oldest first.
    ///
    /// `None` unless the conversation is loaded; closing it drops the
    /// timeline until the next open.
    pub async fn timeline(&self, id: &ConversationId) -> Option<Vec<TimelineEntry>> {
        self.reconciler.lock().await.timeline(id)
    }
}

/// Spawns the engine's background tasks and returns its handle.
///
/// The push connection is established in the background; the first
/// roster refresh happens immediately.
pub fn spawn_engine<A, C>(
    api: Arc<A>,
    connector: C,
    session: Arc<Session>,
    notifier: Arc<dyn Notifier>,
    config: EngineConfig,
) -> EngineHandle
where
    A: ChatApi + 'static,
    C: PushConnector,
{
    let (event_tx, event_rx) = mpsc::channel(config.event_buffer);
    let (reconciler, unread_rx, roster_rx) = Reconciler::new(
        Arc::clone(&session),
        event_tx,
        config.send_match_tolerance,
    );
    let reconciler = Arc::new(Mutex::new(reconciler));
    let (stats_tx, stats_rx) = watch::channel(NotificationStats::default());

    let pipeline = Arc::new(SendPipeline::new(
        Arc::clone(&api),
        Arc::clone(&reconciler),
        Arc::clone(&notifier),
    ));

    let (push_event_tx, push_event_rx) = mpsc::channel(256);
    let backoff = Backoff::new(config.backoff_initial, config.backoff_max);
    let push_handle = Arc::new(ConnectionManager::new(connector, backoff).spawn(push_event_tx));

    let pump = tokio::spawn(push_event_pump(
        push_event_rx,
        Arc::clone(&reconciler),
        Arc::clone(&api),
        Arc::clone(&push_handle),
        Arc::clone(&notifier),
    ));

    let conversation_poll = tokio::spawn(conversation_poll_loop(
        Arc::clone(&api),
        Arc::clone(&reconciler),
        Arc::clone(&push_handle),
        Arc::clone(&notifier),
        config.conversation_poll,
    ));

    let stats_poll = tokio::spawn(stats_poll_loop(
        Arc::clone(&api),
        Arc::clone(&reconciler),
        stats_tx,
        Arc::clone(&notifier),
        config.notification_poll,
    ));

    let (cmd_tx, cmd_rx) = mpsc::channel(64);
    tokio::spawn(command_handler(
        cmd_rx,
        api,
        Arc::clone(&reconciler),
        pipeline,
        push_handle,
        notifier,
        vec![pump, conversation_poll, stats_poll],
    ));

    EngineHandle {
        cmd_tx,
        reconciler,
        events: event_rx,
        unread: unread_rx,
        roster: roster_rx,
        stats: stats_rx,
    }
}

/// Routes a backend failure through the shared session-expiry gate.
///
/// Returns `true` for an auth rejection, which surfaces as
/// [`ChatEvent::SessionExpired`] plus a single notice instead of a
/// per-fetch failure.
async fn note_auth_failure(
    error: &ApiError,
    reconciler: &Mutex<Reconciler>,
    notifier: &Arc<dyn Notifier>,
) -> bool {
    if !matches!(error, ApiError::Unauthorized) {
        return false;
    }
    if reconciler.lock().await.session_expired() {
        notifier.notify(NoticeKind::Error, "Session expired. Please sign in again.");
    }
    true
}

/// Fetches page 1 of the conversation list and merges it, subscribing the
/// push channel to every known conversation.
async fn refresh_roster<A: ChatApi>(
    api: &A,
    reconciler: &Mutex<Reconciler>,
    push_handle: &PushHandle,
    notifier: &Arc<dyn Notifier>,
) {
    let fetch_started = Instant::now();
    match api.list_conversations(1).await {
        Ok(page) => {
            let ids = {
                let mut reconciler = reconciler.lock().await;
                reconciler.apply_refresh(page.conversations, fetch_started);
                reconciler.conversation_ids()
            };
            push_handle.subscribe(ids);
        }
        Err(e) => {
            tracing::warn!(error = %e, "conversation refresh failed");
            if !note_auth_failure(&e, reconciler, notifier).await {
                reconciler
                    .lock()
                    .await
                    .fetch_failed(FetchKind::Roster, None);
            }
        }
    }
}

/// Feeds push events into the reconciler.
async fn push_event_pump<A: ChatApi>(
    mut push_events: mpsc::Receiver<PushEvent>,
    reconciler: Arc<Mutex<Reconciler>>,
    api: Arc<A>,
    push_handle: Arc<PushHandle>,
    notifier: Arc<dyn Notifier>,
) {
    while let Some(event) = push_events.recv().await {
        match event {
            PushEvent::Connected => {
                reconciler.lock().await.set_connected(true);
                // Anything pushed while disconnected was missed; resync.
                refresh_roster(api.as_ref(), &reconciler, &push_handle, &notifier).await;
            }
            PushEvent::Disconnected => {
                reconciler.lock().await.set_connected(false);
            }
            PushEvent::Message(message) => {
                let unknown = reconciler.lock().await.apply_incoming(&message);
                if unknown {
                    // The refresh response postdates the broadcast, so its
                    // counters already include this message; the store keeps
                    // the id remembered and no replay is needed.
                    refresh_roster(api.as_ref(), &reconciler, &push_handle, &notifier).await;
                }
            }
        }
    }
}

/// Periodic conversation-list refresh.
async fn conversation_poll_loop<A: ChatApi>(
    api: Arc<A>,
    reconciler: Arc<Mutex<Reconciler>>,
    push_handle: Arc<PushHandle>,
    notifier: Arc<dyn Notifier>,
    interval: std::time::Duration,
) {
    refresh_roster(api.as_ref(), &reconciler, &push_handle, &notifier).await;
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        refresh_roster(api.as_ref(), &reconciler, &push_handle, &notifier).await;
    }
}

/// Periodic notification-stats refresh.
async fn stats_poll_loop<A: ChatApi>(
    api: Arc<A>,
    reconciler: Arc<Mutex<Reconciler>>,
    stats_tx: watch::Sender<NotificationStats>,
    notifier: Arc<dyn Notifier>,
    interval: std::time::Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        match api.notification_stats().await {
            Ok(stats) => {
                let _ = stats_tx.send_replace(stats);
            }
            Err(e) => {
                tracing::debug!(error = %e, "notification stats poll failed");
                note_auth_failure(&e, &reconciler, &notifier).await;
            }
        }
        if stats_tx.is_closed() {
            break;
        }
    }
}

/// Processes [`EngineCommand`]s until shutdown.
async fn command_handler<A: ChatApi + 'static>(
    mut cmd_rx: mpsc::Receiver<EngineCommand>,
    api: Arc<A>,
    reconciler: Arc<Mutex<Reconciler>>,
    pipeline: Arc<SendPipeline<A>>,
    push_handle: Arc<PushHandle>,
    notifier: Arc<dyn Notifier>,
    background: Vec<tokio::task::JoinHandle<()>>,
) {
    while let Some(command) = cmd_rx.recv().await {
        match command {
            EngineCommand::OpenConversation(id) => {
                let ticket = reconciler.lock().await.open_conversation(&id);
                push_handle.subscribe(vec![id.clone()]);

                // History fetch and read-marker PATCH run off the handler
                // so a slow backend never blocks other commands.
                let api = Arc::clone(&api);
                let reconciler = Arc::clone(&reconciler);
                let notifier = Arc::clone(&notifier);
                tokio::spawn(async move {
                    match api.list_messages(&id, 1).await {
                        Ok(page) => {
                            let result = reconciler.lock().await.install_history(&ticket, &page);
                            if let Err(e) = result {
                                tracing::debug!(error = %e, "history response discarded");
                            }
                        }
                        Err(e) => {
                            tracing::warn!(conversation = %id, error = %e, "history fetch failed");
                            if !note_auth_failure(&e, &reconciler, &notifier).await {
                                reconciler
                                    .lock()
                                    .await
                                    .fetch_failed(FetchKind::History, Some(id.clone()));
                            }
                        }
                    }
                    // Read marker is best-effort; local state already moved.
                    if let Err(e) = api.mark_read(&id).await {
                        tracing::debug!(conversation = %id, error = %e, "mark-read failed");
                        note_auth_failure(&e, &reconciler, &notifier).await;
                    }
                });
            }
            EngineCommand::CloseConversation => {
                reconciler.lock().await.close_conversation();
            }
            EngineCommand::LoadOlder(id) => {
                let ticket = reconciler.lock().await.older_page_ticket(&id);
                let Some((ticket, page_no)) = ticket else {
                    tracing::debug!(conversation = %id, "no older history to load");
                    continue;
                };
                let api = Arc::clone(&api);
                let reconciler = Arc::clone(&reconciler);
                let notifier = Arc::clone(&notifier);
                tokio::spawn(async move {
                    match api.list_messages(&id, page_no).await {
                        Ok(page) => {
                            let result = reconciler.lock().await.install_history(&ticket, &page);
                            if let Err(e) = result {
                                tracing::debug!(error = %e, "older page discarded");
                            }
                        }
                        Err(e) => {
                            tracing::warn!(conversation = %id, error = %e, "older page fetch failed");
                            if !note_auth_failure(&e, &reconciler, &notifier).await {
                                reconciler
                                    .lock()
                                    .await
                                    .fetch_failed(FetchKind::OlderPage, Some(id.clone()));
                            }
                        }
                    }
                });
            }
            EngineCommand::SendMessage {
                conversation,
                content,
                kind,
            } => {
                let pipeline = Arc::clone(&pipeline);
                tokio::spawn(async move {
                    match pipeline.send(&conversation, &content, kind).await {
                        Ok(_) | Err(SendError::NothingToRetry) => {}
                        Err(SendError::Validation(e)) => {
                            tracing::debug!(error = %e, "send rejected by validation");
                        }
                    }
                });
            }
            EngineCommand::RetrySend {
                conversation,
                local,
            } => {
                let pipeline = Arc::clone(&pipeline);
                tokio::spawn(async move {
                    if let Err(e) = pipeline.retry(&conversation, local).await {
                        tracing::debug!(error = %e, "retry rejected");
                    }
                });
            }
            EngineCommand::StartConversation {
                participants,
                title,
            } => {
                match api
                    .create_conversation(&participants, title.as_deref())
                    .await
                {
                    Ok(conversation) => {
                        let id = conversation.id.clone();
                        reconciler.lock().await.add_conversation(conversation);
                        push_handle.subscribe(vec![id]);
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "conversation create failed");
                        note_auth_failure(&e, &reconciler, &notifier).await;
                    }
                }
            }
            EngineCommand::MarkRead(id) => {
                reconciler.lock().await.mark_read(&id);
                let api = Arc::clone(&api);
                let reconciler = Arc::clone(&reconciler);
                let notifier = Arc::clone(&notifier);
                tokio::spawn(async move {
                    if let Err(e) = api.mark_read(&id).await {
                        tracing::debug!(conversation = %id, error = %e, "mark-read failed");
                        note_auth_failure(&e, &reconciler, &notifier).await;
                    }
                });
            }
            EngineCommand::Refresh => {
                refresh_roster(api.as_ref(), &reconciler, &push_handle, &notifier).await;
            }
            EngineCommand::Shutdown => {
                tracing::info!("engine shutting down");
                break;
            }
        }
    }

    push_handle.shutdown();
    for task in background {
        task.abort();
    }
}
