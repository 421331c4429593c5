//! Per-conversation message timelines.
//!
//! Each opened conversation gets a timeline of acknowledged messages plus
//! the viewer's in-flight optimistic sends. The store enforces the
//! ordering invariant (oldest first, ties by server id, unacknowledged
//! sends last), deduplicates push redeliveries, reconciles optimistic
//! sends against their server echoes, and guards history installs against
//! stale responses from fast conversation switching.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use aerochat_proto::model::{
    ChatUser, ConversationId, LocalId, Message, MessageId, MessageKind, MessagePage, Timestamp,
};

/// Delivery state of a timeline entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryState {
    /// Optimistically inserted; the POST has not resolved yet.
    PendingLocal,
    /// Acknowledged by the server.
    Sent,
    /// The POST failed; the user may retry or the entry stays marked.
    Failed,
}

/// Identity of a timeline entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MessageKey {
    /// Server-assigned id of an acknowledged message.
    Server(MessageId),
    /// Provisional id of an optimistic send.
    Local(LocalId),
}

/// One row of a conversation timeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimelineEntry {
    /// Server or provisional identity.
    pub key: MessageKey,
    /// Who sent it.
    pub sender: ChatUser,
    /// Message content.
    pub content: String,
    /// Payload kind.
    pub kind: MessageKind,
    /// Server creation time, or local insertion time for pending sends.
    pub created_at: Timestamp,
    /// Delivery state.
    pub delivery: DeliveryState,
}

impl TimelineEntry {
    fn from_message(message: &Message) -> Self {
        Self {
            key: MessageKey::Server(message.id.clone()),
            sender: message.sender.clone(),
            content: message.content.clone(),
            kind: message.kind,
            created_at: message.created_at,
            delivery: DeliveryState::Sent,
        }
    }

    const fn is_local(&self) -> bool {
        matches!(self.key, MessageKey::Local(_))
    }
}

/// Proof that a history fetch was issued for a particular view of a
/// conversation. [`MessageStore::install_history`] rejects tickets whose
/// view has since been superseded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryTicket {
    conversation: ConversationId,
    epoch: u64,
}

impl HistoryTicket {
    /// The conversation this ticket was issued for.
    #[must_use]
    pub fn conversation(&self) -> &ConversationId {
        &self.conversation
    }
}

/// Errors from timeline operations.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TimelineError {
    /// The history response belongs to a superseded view and was discarded.
    #[error("stale history response for conversation {0}")]
    StaleHistory(ConversationId),
    /// The conversation has no loaded timeline.
    #[error("no timeline loaded for conversation {0}")]
    NotLoaded(ConversationId),
    /// The referenced optimistic send does not exist.
    #[error("unknown local message {0}")]
    UnknownLocal(LocalId),
}

/// Outcome of applying a push broadcast to a timeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IncomingMessage {
    /// Appended as a new entry.
    Appended,
    /// Matched and resolved one of the viewer's optimistic sends.
    ResolvedLocal(LocalId),
    /// The server id was already present; nothing changed.
    Duplicate,
    /// The conversation's timeline is not loaded; only roster state applies.
    NotLoaded,
}

#[derive(Debug, Default)]
struct Timeline {
    entries: Vec<TimelineEntry>,
    server_ids: HashSet<MessageId>,
    epoch: u64,
    pages_loaded: u32,
    pages_total: u32,
}

impl Timeline {
    fn sort(&mut self) {
        // Oldest first; equal timestamps order by server id; the viewer's
        // unacknowledged sends sort after acknowledged messages.
        self.entries.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.is_local().cmp(&b.is_local()))
                .then_with(|| match (&a.key, &b.key) {
                    (MessageKey::Server(x), MessageKey::Server(y)) => x.cmp(y),
                    _ => std::cmp::Ordering::Equal,
                })
        });
    }

    fn insert_message(&mut self, message: &Message) -> bool {
        if !self.server_ids.insert(message.id.clone()) {
            return false;
        }
        self.entries.push(TimelineEntry::from_message(message));
        self.sort();
        true
    }

    fn local_position(&self, local: LocalId) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| e.key == MessageKey::Local(local))
    }
}

/// Message timelines for every opened conversation.
#[derive(Debug, Default)]
pub struct MessageStore {
    timelines: HashMap<ConversationId, Timeline>,
}

impl MessageStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts (or restarts) a history load for a conversation.
    ///
    /// Bumps the conversation's view epoch so that any still-in-flight
    /// response from an earlier load is rejected on install. The timeline
    /// keeps its pending local sends across reloads.
    pub fn begin_history(&mut self, conversation: &ConversationId) -> HistoryTicket {
        let timeline = self.timelines.entry(conversation.clone()).or_default();
        timeline.epoch += 1;
        HistoryTicket {
            conversation: conversation.clone(),
            epoch: timeline.epoch,
        }
    }

    /// Issues a ticket for loading an older page without bumping the epoch,
    /// so a concurrent reopen still invalidates it.
    #[must_use]
    pub fn older_page_ticket(&self, conversation: &ConversationId) -> Option<(HistoryTicket, u32)> {
        let timeline = self.timelines.get(conversation)?;
        if timeline.pages_loaded >= timeline.pages_total {
            return None;
        }
        Some((
            HistoryTicket {
                conversation: conversation.clone(),
                epoch: timeline.epoch,
            },
            timeline.pages_loaded + 1,
        ))
    }

    /// Installs a fetched history page.
    ///
    /// Acknowledged entries from the page are merged (duplicates by server
    /// id are dropped); pending local sends survive. Rejected if the
    /// ticket's view epoch has been superseded.
    ///
    /// # Errors
    ///
    /// Returns [`TimelineError::StaleHistory`] for superseded tickets and
    /// [`TimelineError::NotLoaded`] if the timeline vanished.
    pub fn install_history(
        &mut self,
        ticket: &HistoryTicket,
        page: &MessagePage,
    ) -> Result<(), TimelineError> {
        let timeline = self
            .timelines
            .get_mut(&ticket.conversation)
            .ok_or_else(|| TimelineError::NotLoaded(ticket.conversation.clone()))?;
        if timeline.epoch != ticket.epoch {
            return Err(TimelineError::StaleHistory(ticket.conversation.clone()));
        }

        for message in &page.messages {
            let _ = timeline.insert_message(message);
        }
        timeline.pages_loaded = timeline.pages_loaded.max(page.pagination.page);
        timeline.pages_total = page.pagination.pages;
        Ok(())
    }

    /// Drops a conversation's timeline, e.g. when it is closed.
    pub fn unload(&mut self, conversation: &ConversationId) {
        self.timelines.remove(conversation);
    }

    /// Optimistically appends a pending send.
    pub fn append_local(
        &mut self,
        conversation: &ConversationId,
        local: LocalId,
        sender: ChatUser,
        content: String,
        kind: MessageKind,
    ) {
        let timeline = self.timelines.entry(conversation.clone()).or_default();
        timeline.entries.push(TimelineEntry {
            key: MessageKey::Local(local),
            sender,
            content,
            kind,
            created_at: Timestamp::now(),
            delivery: DeliveryState::PendingLocal,
        });
    }

    /// Replaces an optimistic send with its server acknowledgment.
    ///
    /// If the acknowledged message already arrived via push, the local
    /// entry is simply removed.
    ///
    /// # Errors
    ///
    /// Returns [`TimelineError::NotLoaded`] if the timeline is gone; a
    /// missing local entry is not an error (push reconciled it first).
    pub fn resolve_local(
        &mut self,
        conversation: &ConversationId,
        local: LocalId,
        message: &Message,
    ) -> Result<(), TimelineError> {
        let timeline = self
            .timelines
            .get_mut(conversation)
            .ok_or_else(|| TimelineError::NotLoaded(conversation.clone()))?;

        let Some(position) = timeline.local_position(local) else {
            // Push got there first; make sure the server entry exists.
            let _ = timeline.insert_message(message);
            return Ok(());
        };

        if timeline.server_ids.contains(&message.id) {
            timeline.entries.remove(position);
        } else {
            timeline.server_ids.insert(message.id.clone());
            timeline.entries[position] = TimelineEntry::from_message(message);
            timeline.sort();
        }
        Ok(())
    }

    /// Marks an optimistic send as failed.
    ///
    /// # Errors
    ///
    /// Returns [`TimelineError::UnknownLocal`] if no such pending send
    /// exists.
    pub fn fail_local(
        &mut self,
        conversation: &ConversationId,
        local: LocalId,
    ) -> Result<(), TimelineError> {
        let timeline = self
            .timelines
            .get_mut(conversation)
            .ok_or_else(|| TimelineError::NotLoaded(conversation.clone()))?;
        let position = timeline
            .local_position(local)
            .ok_or(TimelineError::UnknownLocal(local))?;
        timeline.entries[position].delivery = DeliveryState::Failed;
        Ok(())
    }

    /// Flips a failed send back to pending for a retry and returns its
    /// content and kind for the resend.
    ///
    /// # Errors
    ///
    /// Returns [`TimelineError::UnknownLocal`] if no failed send with this
    /// id exists.
    pub fn retry_local(
        &mut self,
        conversation: &ConversationId,
        local: LocalId,
    ) -> Result<(String, MessageKind), TimelineError> {
        let timeline = self
            .timelines
            .get_mut(conversation)
            .ok_or_else(|| TimelineError::NotLoaded(conversation.clone()))?;
        let position = timeline
            .local_position(local)
            .ok_or(TimelineError::UnknownLocal(local))?;
        let entry = &mut timeline.entries[position];
        if entry.delivery != DeliveryState::Failed {
            return Err(TimelineError::UnknownLocal(local));
        }
        entry.delivery = DeliveryState::PendingLocal;
        Ok((entry.content.clone(), entry.kind))
    }

    /// Applies a push broadcast to the conversation's timeline.
    ///
    /// Resolution order: duplicate server id → drop; `client_ref` matches a
    /// local entry → resolve it; otherwise, if the viewer sent it, a
    /// pending local with identical content within `tolerance` of the
    /// server timestamp → resolve that; else append.
    pub fn apply_incoming(
        &mut self,
        message: &Message,
        viewer: &aerochat_proto::model::UserId,
        tolerance: Duration,
    ) -> IncomingMessage {
        let Some(timeline) = self.timelines.get_mut(&message.conversation_id) else {
            return IncomingMessage::NotLoaded;
        };
        if timeline.server_ids.contains(&message.id) {
            return IncomingMessage::Duplicate;
        }

        let matched = find_matching_local(timeline, message, viewer, tolerance);
        if let Some((position, local)) = matched {
            timeline.server_ids.insert(message.id.clone());
            timeline.entries[position] = TimelineEntry::from_message(message);
            timeline.sort();
            return IncomingMessage::ResolvedLocal(local);
        }

        let _ = timeline.insert_message(message);
        IncomingMessage::Appended
    }

    /// A snapshot of the conversation's timeline, oldest first.
    #[must_use]
    pub fn timeline(&self, conversation: &ConversationId) -> Option<Vec<TimelineEntry>> {
        self.timelines.get(conversation).map(|t| t.entries.clone())
    }
}

/// Finds the optimistic send a broadcast corresponds to, if any.
fn find_matching_local(
    timeline: &Timeline,
    message: &Message,
    viewer: &aerochat_proto::model::UserId,
    tolerance: Duration,
) -> Option<(usize, LocalId)> {
    // Exact match on the echoed idempotency reference.
    if let Some(client_ref) = message.client_ref {
        if let Some(position) = timeline.local_position(client_ref) {
            return Some((position, client_ref));
        }
    }
    if message.sender.id != *viewer {
        return None;
    }
    // Fallback for backends that drop client_ref: same content, pending,
    // created within the tolerance window.
    let tolerance_ms = u64::try_from(tolerance.as_millis()).unwrap_or(u64::MAX);
    timeline.entries.iter().enumerate().find_map(|(i, entry)| {
        if let MessageKey::Local(local) = entry.key {
            let close = entry.created_at.abs_diff(message.created_at) <= tolerance_ms;
            if entry.delivery == DeliveryState::PendingLocal
                && entry.content == message.content
                && close
            {
                return Some((i, local));
            }
        }
        None
    })
}
