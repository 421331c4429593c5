//! In-memory backend state: users, conversations, messages, read markers,
//! and live push connections.
//!
//! Everything lives behind one `parking_lot::Mutex`; the stub trades
//! concurrency for simplicity since it only ever backs development and
//! integration tests.

use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;
use tokio::sync::mpsc;

use aerochat_proto::codec;
use aerochat_proto::model::{
    ChatUser, Conversation, ConversationId, ConversationKind, ConversationPage, LastMessage,
    LocalId, Message, MessageId, MessageKind, MessagePage, NotificationStats, Pagination,
    Participant, Timestamp, UserId,
};
use aerochat_proto::push::ServerFrame;

/// Conversations per list page.
const CONVERSATION_PAGE_SIZE: usize = 20;
/// Messages per history page.
const MESSAGE_PAGE_SIZE: usize = 50;

/// Errors from state operations, mapped to HTTP statuses by the router.
#[derive(Debug, thiserror::Error)]
pub enum StubError {
    /// Bearer token unknown.
    #[error("unknown token")]
    Unauthorized,
    /// Conversation does not exist.
    #[error("conversation {0} not found")]
    ConversationNotFound(ConversationId),
    /// Referenced user does not exist.
    #[error("user {0} not found")]
    UserNotFound(UserId),
    /// The caller is not a participant of the conversation.
    #[error("not a participant of conversation {0}")]
    NotParticipant(ConversationId),
}

struct ConversationRecord {
    id: ConversationId,
    kind: ConversationKind,
    title: Option<String>,
    participants: Vec<UserId>,
    messages: Vec<Message>,
    last_read: HashMap<UserId, Timestamp>,
    created_at: Timestamp,
    updated_at: Option<Timestamp>,
}

struct PushConnection {
    user: UserId,
    joined: HashSet<ConversationId>,
    tx: mpsc::UnboundedSender<String>,
}

#[derive(Default)]
struct Inner {
    /// Bearer token to user.
    tokens: HashMap<String, ChatUser>,
    users: HashMap<UserId, ChatUser>,
    conversations: HashMap<ConversationId, ConversationRecord>,
    connections: HashMap<u64, PushConnection>,
    next_conversation: u64,
    next_message: u64,
    next_connection: u64,
}

/// Shared stub backend state.
#[derive(Default)]
pub struct StubState {
    inner: Mutex<Inner>,
}

impl StubState {
    /// Creates an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a user reachable with the given bearer token.
    pub fn register_user(&self, token: impl Into<String>, user: ChatUser) {
        let mut inner = self.inner.lock();
        inner.users.insert(user.id.clone(), user.clone());
        inner.tokens.insert(token.into(), user);
    }

    /// Resolves a bearer token to its user.
    ///
    /// # Errors
    ///
    /// Returns [`StubError::Unauthorized`] for unknown tokens.
    pub fn authenticate(&self, token: &str) -> Result<ChatUser, StubError> {
        self.inner
            .lock()
            .tokens
            .get(token)
            .cloned()
            .ok_or(StubError::Unauthorized)
    }

    /// Creates a conversation, or returns the existing one for a direct
    /// pair (idempotent creation).
    ///
    /// # Errors
    ///
    /// Returns [`StubError::UserNotFound`] if a participant is unknown.
    pub fn create_conversation(
        &self,
        creator: &UserId,
        others: &[UserId],
        title: Option<String>,
    ) -> Result<Conversation, StubError> {
        let mut inner = self.inner.lock();

        let mut participants: Vec<UserId> = vec![creator.clone()];
        for user in others {
            if !inner.users.contains_key(user) {
                return Err(StubError::UserNotFound(user.clone()));
            }
            if !participants.contains(user) {
                participants.push(user.clone());
            }
        }

        let kind = if participants.len() == 2 {
            ConversationKind::Direct
        } else {
            ConversationKind::Group
        };

        // Direct conversations are unique per participant pair.
        if kind == ConversationKind::Direct {
            let mut pair: Vec<&UserId> = participants.iter().collect();
            pair.sort_by(|a, b| a.as_str().cmp(b.as_str()));
            let existing = inner.conversations.values().find(|record| {
                if record.kind != ConversationKind::Direct {
                    return false;
                }
                let mut existing_pair: Vec<&UserId> = record.participants.iter().collect();
                existing_pair.sort_by(|a, b| a.as_str().cmp(b.as_str()));
                existing_pair == pair
            });
            if let Some(record) = existing {
                return Ok(render_conversation(&inner, record, creator));
            }
        }

        inner.next_conversation += 1;
        let id = ConversationId::new(format!("conv-{}", inner.next_conversation));
        let record = ConversationRecord {
            id: id.clone(),
            kind,
            title,
            participants,
            messages: Vec::new(),
            last_read: HashMap::new(),
            created_at: Timestamp::now(),
            updated_at: None,
        };
        let rendered = render_conversation(&inner, &record, creator);
        inner.conversations.insert(id, record);
        Ok(rendered)
    }

    /// Lists the viewer's conversations, most recent activity first.
    ///
    /// # Errors
    ///
    /// Infallible today; kept fallible for symmetry with the router.
    pub fn list_conversations(
        &self,
        viewer: &UserId,
        page: u32,
    ) -> Result<ConversationPage, StubError> {
        let inner = self.inner.lock();
        let mut records: Vec<&ConversationRecord> = inner
            .conversations
            .values()
            .filter(|r| r.participants.contains(viewer))
            .collect();
        records.sort_by(|a, b| {
            let activity = |r: &ConversationRecord| {
                r.messages
                    .last()
                    .map(|m| m.created_at)
                    .or(r.updated_at)
                    .unwrap_or(r.created_at)
            };
            activity(b).cmp(&activity(a))
        });

        let total = records.len();
        let pages = total.div_ceil(CONVERSATION_PAGE_SIZE).max(1);
        let page = page.max(1);
        let start = (page as usize - 1) * CONVERSATION_PAGE_SIZE;
        let slice = records
            .into_iter()
            .skip(start)
            .take(CONVERSATION_PAGE_SIZE)
            .map(|r| render_conversation(&inner, r, viewer))
            .collect();

        Ok(ConversationPage {
            conversations: slice,
            pagination: Pagination {
                page,
                pages: u32::try_from(pages).unwrap_or(u32::MAX),
                total: total as u64,
            },
        })
    }

    /// Lists one page of a conversation's messages.
    ///
    /// Page 1 is the most recent page; messages are oldest-first within
    /// each page.
    ///
    /// # Errors
    ///
    /// Returns [`StubError::ConversationNotFound`] for unknown ids.
    pub fn list_messages(
        &self,
        conversation: &ConversationId,
        page: u32,
    ) -> Result<MessagePage, StubError> {
        let inner = self.inner.lock();
        let record = inner
            .conversations
            .get(conversation)
            .ok_or_else(|| StubError::ConversationNotFound(conversation.clone()))?;

        let total = record.messages.len();
        let pages = total.div_ceil(MESSAGE_PAGE_SIZE).max(1);
        let page = page.max(1);

        // Page 1 holds the newest MESSAGE_PAGE_SIZE messages.
        let end = total.saturating_sub((page as usize - 1) * MESSAGE_PAGE_SIZE);
        let start = end.saturating_sub(MESSAGE_PAGE_SIZE);
        let messages = record.messages[start..end].to_vec();

        Ok(MessagePage {
            messages,
            pagination: Pagination {
                page,
                pages: u32::try_from(pages).unwrap_or(u32::MAX),
                total: total as u64,
            },
        })
    }

    /// Appends a message and broadcasts it to every joined connection.
    ///
    /// # Errors
    ///
    /// Returns [`StubError::ConversationNotFound`] or
    /// [`StubError::NotParticipant`].
    pub fn append_message(
        &self,
        conversation: &ConversationId,
        sender: &ChatUser,
        content: String,
        kind: MessageKind,
        client_ref: Option<LocalId>,
    ) -> Result<Message, StubError> {
        let mut inner = self.inner.lock();
        inner.next_message += 1;
        let id = MessageId::new(format!("msg-{}", inner.next_message));

        let record = inner
            .conversations
            .get_mut(conversation)
            .ok_or_else(|| StubError::ConversationNotFound(conversation.clone()))?;
        if !record.participants.contains(&sender.id) {
            return Err(StubError::NotParticipant(conversation.clone()));
        }

        let message = Message {
            id,
            conversation_id: conversation.clone(),
            sender: sender.clone(),
            content,
            kind,
            created_at: Timestamp::now(),
            client_ref,
        };
        record.messages.push(message.clone());
        record.updated_at = Some(message.created_at);
        // The sender has obviously seen their own message.
        record
            .last_read
            .insert(sender.id.clone(), message.created_at);

        broadcast(&inner, &message);
        Ok(message)
    }

    /// Moves the viewer's read marker in a conversation to now.
    ///
    /// # Errors
    ///
    /// Returns [`StubError::ConversationNotFound`] for unknown ids.
    pub fn mark_read(
        &self,
        conversation: &ConversationId,
        viewer: &UserId,
    ) -> Result<(), StubError> {
        let mut inner = self.inner.lock();
        let record = inner
            .conversations
            .get_mut(conversation)
            .ok_or_else(|| StubError::ConversationNotFound(conversation.clone()))?;
        record.last_read.insert(viewer.clone(), Timestamp::now());
        Ok(())
    }

    /// Aggregate notification stats for the viewer.
    #[must_use]
    pub fn stats(&self, viewer: &UserId) -> NotificationStats {
        let inner = self.inner.lock();
        let unread: u64 = inner
            .conversations
            .values()
            .filter(|r| r.participants.contains(viewer))
            .map(|r| u64::from(unread_count(r, viewer)))
            .sum();
        let total: u64 = inner
            .conversations
            .values()
            .filter(|r| r.participants.contains(viewer))
            .map(|r| r.messages.len() as u64)
            .sum();
        NotificationStats { total, unread }
    }

    /// Registers a live push connection for a user, returning its id and
    /// the frame stream for the writer task.
    pub fn register_connection(&self, user: UserId) -> (u64, mpsc::UnboundedReceiver<String>) {
        let mut inner = self.inner.lock();
        inner.next_connection += 1;
        let id = inner.next_connection;
        let (tx, rx) = mpsc::unbounded_channel();
        inner.connections.insert(
            id,
            PushConnection {
                user,
                joined: HashSet::new(),
                tx,
            },
        );
        (id, rx)
    }

    /// Adds conversations to a connection's join set. Joins to
    /// conversations the user does not participate in are ignored.
    pub fn join(&self, connection: u64, conversations: Vec<ConversationId>) {
        let mut inner = self.inner.lock();
        let allowed: Vec<ConversationId> = {
            let Some(conn) = inner.connections.get(&connection) else {
                return;
            };
            conversations
                .into_iter()
                .filter(|id| {
                    inner
                        .conversations
                        .get(id)
                        .is_some_and(|r| r.participants.contains(&conn.user))
                })
                .collect()
        };
        if let Some(conn) = inner.connections.get_mut(&connection) {
            conn.joined.extend(allowed);
        }
    }

    /// Drops a push connection.
    pub fn unregister_connection(&self, connection: u64) {
        self.inner.lock().connections.remove(&connection);
    }

    /// Sends a close-marker to every live connection by dropping their
    /// writer channels. Used by tests to force client reconnects.
    pub fn drop_all_connections(&self) {
        self.inner.lock().connections.clear();
    }
}

/// Unread count for a viewer: messages after their read marker not sent
/// by them.
fn unread_count(record: &ConversationRecord, viewer: &UserId) -> u32 {
    let marker = record.last_read.get(viewer).copied();
    let count = record
        .messages
        .iter()
        .filter(|m| m.sender.id != *viewer)
        .filter(|m| marker.is_none_or(|t| m.created_at > t))
        .count();
    u32::try_from(count).unwrap_or(u32::MAX)
}

/// Renders a conversation record into the wire shape for a viewer.
fn render_conversation(inner: &Inner, record: &ConversationRecord, viewer: &UserId) -> Conversation {
    let participants = record
        .participants
        .iter()
        .map(|user_id| Participant {
            user_id: user_id.clone(),
            last_read: record.last_read.get(user_id).copied(),
            user: inner.users.get(user_id).cloned(),
        })
        .collect();
    let last_message = record.messages.last().map(|m| LastMessage {
        content: m.content.clone(),
        sender: m.sender.clone(),
        timestamp: m.created_at,
        kind: m.kind,
    });
    Conversation {
        id: record.id.clone(),
        kind: record.kind,
        title: record.title.clone(),
        participants,
        last_message,
        unread_count: unread_count(record, viewer),
        created_at: record.created_at,
        updated_at: record.updated_at,
    }
}

/// Fans a new message out to every joined connection, the sender's
/// included.
fn broadcast(inner: &Inner, message: &Message) {
    let frame = ServerFrame::NewMessage {
        message: message.clone(),
    };
    let Ok(text) = codec::encode_server(&frame) else {
        tracing::error!("failed to encode broadcast frame");
        return;
    };
    for conn in inner.connections.values() {
        if conn.joined.contains(&message.conversation_id) {
            let _ = conn.tx.send(text.clone());
        }
    }
}
