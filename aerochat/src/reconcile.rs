//! Reconciliation layer.
//!
//! The [`Reconciler`] is the only writer of client state: every input —
//! push broadcasts, refresh responses, history pages, send acks, user
//! actions — funnels through it, which makes the interleaving of REST and
//! push updates a non-problem. The engine holds it behind one async mutex.
//!
//! Consumers observe state two ways: a bounded [`ChatEvent`] stream for
//! things that happened, and `watch` channels carrying the latest unread
//! total and roster snapshot for render-the-latest-value UIs.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, watch};

use aerochat_proto::model::{
    Conversation, ConversationId, LocalId, Message, MessageKind, MessagePage,
};

use crate::session::Session;
use crate::store::{
    ConversationStore, HistoryTicket, IncomingMessage, IncomingOutcome, MessageStore,
    TimelineEntry, TimelineError,
};

/// Events emitted as state changes.
#[derive(Debug)]
pub enum ChatEvent {
    /// The conversation roster changed (order, counters, membership).
    RosterUpdated,
    /// A conversation's timeline changed.
    TimelineUpdated(ConversationId),
    /// A message from another user arrived in a subscribed conversation.
    MessageReceived {
        /// The conversation it arrived in.
        conversation: ConversationId,
        /// The message.
        message: Box<Message>,
    },
    /// An optimistic send failed; the entry is marked and retryable.
    SendFailed {
        /// The conversation of the failed send.
        conversation: ConversationId,
        /// Provisional id of the failed send.
        local: LocalId,
    },
    /// Push connectivity changed.
    ConnectionChanged {
        /// Whether the push channel is currently up.
        connected: bool,
    },
    /// The backend rejected the bearer token; the user must sign in again.
    ///
    /// Emitted at most once per engine lifetime, no matter which call hit
    /// the rejection first.
    SessionExpired,
    /// A background fetch failed; the affected store kept its last-known
    /// state and the host can offer a retry.
    FetchFailed {
        /// Which fetch failed.
        what: FetchKind,
        /// The conversation involved, for history fetches.
        conversation: Option<ConversationId>,
    },
}

/// The background fetch that a [`ChatEvent::FetchFailed`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchKind {
    /// Conversation-list refresh.
    Roster,
    /// First history page of a conversation.
    History,
    /// An older history page.
    OlderPage,
}

/// Owns all client state and serializes every mutation.
pub struct Reconciler {
    session: Arc<Session>,
    conversations: ConversationStore,
    messages: MessageStore,
    open: Option<ConversationId>,
    events: mpsc::Sender<ChatEvent>,
    unread_tx: watch::Sender<u32>,
    roster_tx: watch::Sender<Vec<Conversation>>,
    send_match_tolerance: Duration,
    auth_expired: bool,
}

impl Reconciler {
    /// Creates a reconciler plus the watch receivers for the unread badge
    /// and roster snapshot.
    #[must_use]
    pub fn new(
        session: Arc<Session>,
        events: mpsc::Sender<ChatEvent>,
        send_match_tolerance: Duration,
    ) -> (Self, watch::Receiver<u32>, watch::Receiver<Vec<Conversation>>) {
        let (unread_tx, unread_rx) = watch::channel(0);
        let (roster_tx, roster_rx) = watch::channel(Vec::new());
        let viewer = session.user_id().clone();
        (
            Self {
                session,
                conversations: ConversationStore::new(viewer),
                messages: MessageStore::new(),
                open: None,
                events,
                unread_tx,
                roster_tx,
                send_match_tolerance,
                auth_expired: false,
            },
            unread_rx,
            roster_rx,
        )
    }

    /// Merges a conversation-list refresh fetched at `fetch_started`.
    pub fn apply_refresh(&mut self, fetched: Vec<Conversation>, fetch_started: Instant) {
        self.conversations.apply_refresh(fetched, fetch_started);
        self.publish_roster();
    }

    /// Adds a freshly created conversation to the roster.
    pub fn add_conversation(&mut self, conversation: Conversation) {
        self.conversations.upsert(conversation);
        self.publish_roster();
    }

    /// Applies a push broadcast.
    ///
    /// Returns `true` if the conversation was unknown and the caller
    /// should trigger a roster refresh.
    pub fn apply_incoming(&mut self, message: &Message) -> bool {
        let timeline_outcome = self.messages.apply_incoming(
            message,
            self.session.user_id(),
            self.send_match_tolerance,
        );

        let roster_outcome =
            self.conversations
                .apply_incoming(message, self.open.as_ref(), Instant::now());

        match &timeline_outcome {
            IncomingMessage::Appended | IncomingMessage::ResolvedLocal(_) => {
                self.emit(ChatEvent::TimelineUpdated(message.conversation_id.clone()));
            }
            IncomingMessage::Duplicate | IncomingMessage::NotLoaded => {}
        }

        match roster_outcome {
            IncomingOutcome::Applied => {
                if message.sender.id != *self.session.user_id() {
                    self.emit(ChatEvent::MessageReceived {
                        conversation: message.conversation_id.clone(),
                        message: Box::new(message.clone()),
                    });
                }
                self.publish_roster();
                false
            }
            IncomingOutcome::Duplicate => false,
            IncomingOutcome::Unknown => {
                tracing::debug!(
                    conversation = %message.conversation_id,
                    "broadcast for unknown conversation, refresh needed"
                );
                true
            }
        }
    }

    /// Opens a conversation: marks it read, sets it as the open one, and
    /// issues a history ticket for the (re)load.
    pub fn open_conversation(&mut self, id: &ConversationId) -> HistoryTicket {
        self.open = Some(id.clone());
        let cleared = self.conversations.mark_read(id);
        if cleared > 0 {
            self.publish_roster();
        }
        self.messages.begin_history(id)
    }

    /// Clears the open conversation and drops its loaded timeline.
    ///
    /// Reopening issues a fresh history ticket and refetches, so nothing
    /// stale survives a close.
    pub fn close_conversation(&mut self) {
        if let Some(id) = self.open.take() {
            self.messages.unload(&id);
        }
    }

    /// The currently open conversation, if any.
    #[must_use]
    pub fn open(&self) -> Option<&ConversationId> {
        self.open.as_ref()
    }

    /// Issues a ticket for the next older history page, if one exists.
    #[must_use]
    pub fn older_page_ticket(&self, id: &ConversationId) -> Option<(HistoryTicket, u32)> {
        self.messages.older_page_ticket(id)
    }

    /// Installs a fetched history page; stale tickets are rejected.
    ///
    /// # Errors
    ///
    /// Propagates [`TimelineError::StaleHistory`] / [`TimelineError::NotLoaded`].
    pub fn install_history(
        &mut self,
        ticket: &HistoryTicket,
        page: &MessagePage,
    ) -> Result<(), TimelineError> {
        self.messages.install_history(ticket, page)?;
        self.emit(ChatEvent::TimelineUpdated(ticket.conversation().clone()));
        Ok(())
    }

    /// Optimistically appends a pending send to the open timeline.
    pub fn append_local(
        &mut self,
        conversation: &ConversationId,
        local: LocalId,
        content: String,
        kind: MessageKind,
    ) {
        self.messages.append_local(
            conversation,
            local,
            self.session.user().clone(),
            content,
            kind,
        );
        self.emit(ChatEvent::TimelineUpdated(conversation.clone()));
    }

    /// Replaces an optimistic send with its acknowledgment.
    ///
    /// # Errors
    ///
    /// Propagates [`TimelineError::NotLoaded`].
    pub fn resolve_local(
        &mut self,
        conversation: &ConversationId,
        local: LocalId,
        message: &Message,
    ) -> Result<(), TimelineError> {
        self.messages.resolve_local(conversation, local, message)?;
        // The ack also carries the newest activity for the roster.
        let _ = self
            .conversations
            .apply_incoming(message, self.open.as_ref(), Instant::now());
        self.emit(ChatEvent::TimelineUpdated(conversation.clone()));
        self.publish_roster();
        Ok(())
    }

    /// Marks an optimistic send as failed and emits [`ChatEvent::SendFailed`].
    pub fn fail_local(&mut self, conversation: &ConversationId, local: LocalId) {
        match self.messages.fail_local(conversation, local) {
            Ok(()) => {
                self.emit(ChatEvent::SendFailed {
                    conversation: conversation.clone(),
                    local,
                });
                self.emit(ChatEvent::TimelineUpdated(conversation.clone()));
            }
            Err(e) => {
                tracing::debug!(error = %e, "failed send already reconciled");
            }
        }
    }

    /// Flips a failed send back to pending for a retry.
    ///
    /// # Errors
    ///
    /// Propagates [`TimelineError::UnknownLocal`] for non-failed entries.
    pub fn retry_local(
        &mut self,
        conversation: &ConversationId,
        local: LocalId,
    ) -> Result<(String, MessageKind), TimelineError> {
        let resend = self.messages.retry_local(conversation, local)?;
        self.emit(ChatEvent::TimelineUpdated(conversation.clone()));
        Ok(resend)
    }

    /// Clears a conversation's unread count locally.
    pub fn mark_read(&mut self, id: &ConversationId) {
        if self.conversations.mark_read(id) > 0 {
            self.publish_roster();
        }
    }

    /// Records push connectivity and emits [`ChatEvent::ConnectionChanged`].
    pub fn set_connected(&mut self, connected: bool) {
        self.emit(ChatEvent::ConnectionChanged { connected });
    }

    /// Records a rejected bearer token.
    ///
    /// Emits [`ChatEvent::SessionExpired`] on the first call only and
    /// returns whether this call was the first, so the caller can show
    /// the sign-in-again notice exactly once no matter which path — send,
    /// poll, history fetch — hit the rejection.
    pub fn session_expired(&mut self) -> bool {
        if self.auth_expired {
            return false;
        }
        self.auth_expired = true;
        self.emit(ChatEvent::SessionExpired);
        true
    }

    /// Reports a failed background fetch; stores are unchanged.
    pub fn fetch_failed(&mut self, what: FetchKind, conversation: Option<ConversationId>) {
        self.emit(ChatEvent::FetchFailed { what, conversation });
    }

    /// Ids of every conversation in the roster, for push subscription.
    #[must_use]
    pub fn conversation_ids(&self) -> Vec<ConversationId> {
        self.conversations.ids()
    }

    /// A snapshot of one conversation's timeline, oldest first.
    #[must_use]
    pub fn timeline(&self, id: &ConversationId) -> Option<Vec<TimelineEntry>> {
        self.messages.timeline(id)
    }

    /// A most-recent-first snapshot of the roster.
    #[must_use]
    pub fn roster(&self) -> Vec<Conversation> {
        self.conversations.snapshot()
    }

    /// Current total unread count.
    #[must_use]
    pub fn total_unread(&self) -> u32 {
        self.conversations.total_unread()
    }

    fn publish_roster(&self) {
        let _ = self.unread_tx.send_replace(self.conversations.total_unread());
        let _ = self.roster_tx.send_replace(self.conversations.snapshot());
        self.emit(ChatEvent::RosterUpdated);
    }

    fn emit(&self, event: ChatEvent) {
        // Bounded channel: a slow consumer drops events rather than
        // stalling reconciliation. Watch channels still carry the latest
        // state, so nothing is permanently lost.
        if let Err(e) = self.events.try_send(event) {
            tracing::warn!(error = %e, "chat event dropped");
        }
    }
}
