//! Conversation roster cache.
//!
//! Holds the viewer's conversation list and keeps it consistent under two
//! competing writers: periodic REST refreshes and live push broadcasts.
//! Push wins races: a refresh never rolls back counters for a conversation
//! a push event touched after the fetch was issued.

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Instant;

use aerochat_proto::model::{
    Conversation, ConversationId, LastMessage, Message, Timestamp, UserId,
};

/// Cap on the duplicate-detection window.
const MAX_SEEN_TRACKING: usize = 10_000;

/// Outcome of applying a push broadcast to the roster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IncomingOutcome {
    /// The roster was updated.
    Applied,
    /// The message was already counted; nothing changed.
    Duplicate,
    /// The conversation is not in the roster; the caller should refresh.
    Unknown,
}

/// In-memory conversation roster for one viewer.
pub struct ConversationStore {
    viewer: UserId,
    conversations: HashMap<ConversationId, Conversation>,
    /// Instant of the last push-driven update per conversation, used to
    /// decide whether a refresh response is stale for that conversation.
    push_touched: HashMap<ConversationId, Instant>,
    seen: HashSet<aerochat_proto::model::MessageId>,
    seen_order: VecDeque<aerochat_proto::model::MessageId>,
}

impl ConversationStore {
    /// Creates an empty roster for the given viewer.
    #[must_use]
    pub fn new(viewer: UserId) -> Self {
        Self {
            viewer,
            conversations: HashMap::new(),
            push_touched: HashMap::new(),
            seen: HashSet::new(),
            seen_order: VecDeque::new(),
        }
    }

    /// Merges a refresh response fetched at `fetch_started`.
    ///
    /// Server values win except for conversations a push broadcast touched
    /// after the fetch was issued: those keep their locally derived unread
    /// count and last-message summary, since the response predates the
    /// broadcast.
    pub fn apply_refresh(&mut self, fetched: Vec<Conversation>, fetch_started: Instant) {
        for mut incoming in fetched {
            let id = incoming.id.clone();
            let push_wins = self
                .push_touched
                .get(&id)
                .is_some_and(|touched| *touched > fetch_started);

            if push_wins {
                if let Some(local) = self.conversations.get(&id) {
                    incoming.unread_count = local.unread_count;
                    incoming.last_message = local.last_message.clone();
                    incoming.updated_at = local.updated_at;
                }
            } else {
                self.push_touched.remove(&id);
            }
            self.conversations.insert(id, incoming);
        }
    }

    /// Inserts or replaces a single conversation, e.g. one just created.
    pub fn upsert(&mut self, conversation: Conversation) {
        self.conversations
            .insert(conversation.id.clone(), conversation);
    }

    /// Applies a push broadcast to the roster.
    ///
    /// Updates the last-message summary, bumps `updated_at`, and increments
    /// the unread count unless the viewer authored the message or currently
    /// has the conversation open. Each message id is counted at most once
    /// regardless of redelivery.
    ///
    /// An unknown conversation returns [`IncomingOutcome::Unknown`] with the
    /// id already remembered: the caller's next refresh postdates the
    /// broadcast, so the server's counters include this message and a replay
    /// must stay a duplicate.
    pub fn apply_incoming(
        &mut self,
        message: &Message,
        open: Option<&ConversationId>,
        now: Instant,
    ) -> IncomingOutcome {
        if self.seen.contains(&message.id) {
            return IncomingOutcome::Duplicate;
        }
        self.remember(message.id.clone());
        let Some(conversation) = self.conversations.get_mut(&message.conversation_id) else {
            return IncomingOutcome::Unknown;
        };

        self.push_touched
            .insert(message.conversation_id.clone(), now);

        conversation.last_message = Some(LastMessage {
            content: message.content.clone(),
            sender: message.sender.clone(),
            timestamp: message.created_at,
            kind: message.kind,
        });
        conversation.updated_at = Some(message.created_at);

        let own = message.sender.id == self.viewer;
        let viewing = open == Some(&message.conversation_id);
        if !own && !viewing {
            conversation.unread_count = conversation.unread_count.saturating_add(1);
        }
        IncomingOutcome::Applied
    }

    /// Clears the unread count for a conversation and moves the viewer's
    /// last-read marker to now. Returns the number of messages cleared.
    pub fn mark_read(&mut self, id: &ConversationId) -> u32 {
        let Some(conversation) = self.conversations.get_mut(id) else {
            return 0;
        };
        let cleared = conversation.unread_count;
        conversation.unread_count = 0;
        // The marker moves optimistically; the server catches up via PATCH.
        self.push_touched.insert(id.clone(), Instant::now());
        if let Some(me) = conversation
            .participants
            .iter_mut()
            .find(|p| p.user_id == self.viewer)
        {
            me.last_read = Some(Timestamp::now());
        }
        cleared
    }

    /// Sum of unread counts across the roster, saturating.
    #[must_use]
    pub fn total_unread(&self) -> u32 {
        self.conversations
            .values()
            .fold(0u32, |acc, c| acc.saturating_add(c.unread_count))
    }

    /// Looks up a conversation by id.
    #[must_use]
    pub fn get(&self, id: &ConversationId) -> Option<&Conversation> {
        self.conversations.get(id)
    }

    /// Ids of every conversation in the roster.
    #[must_use]
    pub fn ids(&self) -> Vec<ConversationId> {
        self.conversations.keys().cloned().collect()
    }

    /// A most-recent-activity-first snapshot of the roster.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Conversation> {
        let mut list: Vec<Conversation> = self.conversations.values().cloned().collect();
        list.sort_by(|a, b| {
            let activity = |c: &Conversation| {
                c.last_message
                    .as_ref()
                    .map(|m| m.timestamp)
                    .or(c.updated_at)
                    .unwrap_or(c.created_at)
            };
            activity(b)
                .cmp(&activity(a))
                .then_with(|| a.id.as_str().cmp(b.id.as_str()))
        });
        list
    }

    fn remember(&mut self, id: aerochat_proto::model::MessageId) {
        if self.seen.insert(id.clone()) {
            self.seen_order.push_back(id);
            if self.seen_order.len() > MAX_SEEN_TRACKING {
                if let Some(oldest) = self.seen_order.pop_front() {
                    self.seen.remove(&oldest);
                }
            }
        }
    }
}
