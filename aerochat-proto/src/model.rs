//! Core data model for the AeroChat messaging platform.
//!
//! These types mirror the shapes exchanged with the messaging backend:
//! conversations with participants and last-read markers, messages with
//! server-assigned identifiers, and pagination envelopes. Delivery state
//! for optimistic sends is a client-side concern and intentionally does
//! not appear here.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum allowed message content size in bytes (64 KB).
pub const MAX_CONTENT_SIZE: usize = 64 * 1024;

/// Opaque server-assigned identifier for a user.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Creates a user identifier from its string representation.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the string representation of this identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque server-assigned identifier for a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(String);

impl ConversationId {
    /// Creates a conversation identifier from its string representation.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the string representation of this identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque server-assigned identifier for a message.
///
/// A message only has a `MessageId` once the server has acknowledged it;
/// before that the client tracks it by a provisional [`LocalId`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    /// Creates a message identifier from its string representation.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the string representation of this identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Provisional client-generated identifier for a not-yet-acknowledged message.
///
/// UUID v7 so provisional ids are time-ordered. Also transmitted with the
/// send request as an idempotency reference (`client_ref`), letting the
/// backend echo it back in the push broadcast for exact reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocalId(Uuid);

impl LocalId {
    /// Creates a new time-ordered provisional identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Creates a `LocalId` from an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the inner UUID value.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for LocalId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for LocalId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Error returned when an RFC 3339 timestamp string cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid RFC 3339 timestamp: {0}")]
pub struct TimestampParseError(String);

/// Millisecond-precision UTC timestamp.
///
/// Stored as milliseconds since the UNIX epoch in memory; serialized as an
/// RFC 3339 string because that is what the backend speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Creates a timestamp for the current instant.
    #[must_use]
    pub fn now() -> Self {
        let millis = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        Self(u64::try_from(millis).unwrap_or(u64::MAX))
    }

    /// Creates a timestamp from milliseconds since the UNIX epoch.
    #[must_use]
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    /// Returns the timestamp as milliseconds since the UNIX epoch.
    #[must_use]
    pub const fn as_millis(&self) -> u64 {
        self.0
    }

    /// Absolute difference between two timestamps in milliseconds.
    #[must_use]
    pub const fn abs_diff(&self, other: Self) -> u64 {
        self.0.abs_diff(other.0)
    }

    /// Parses an RFC 3339 timestamp string.
    ///
    /// # Errors
    ///
    /// Returns [`TimestampParseError`] if the string is not valid RFC 3339
    /// or denotes an instant before the UNIX epoch.
    pub fn from_rfc3339(s: &str) -> Result<Self, TimestampParseError> {
        let dt = chrono::DateTime::parse_from_rfc3339(s)
            .map_err(|e| TimestampParseError(format!("{s}: {e}")))?;
        let millis = u64::try_from(dt.timestamp_millis())
            .map_err(|_| TimestampParseError(format!("{s}: before epoch")))?;
        Ok(Self(millis))
    }

    /// Formats this timestamp as an RFC 3339 string with millisecond precision.
    #[must_use]
    pub fn to_rfc3339(&self) -> String {
        chrono::DateTime::<chrono::Utc>::from_timestamp_millis(
            i64::try_from(self.0).unwrap_or(i64::MAX),
        )
        .unwrap_or_default()
        .to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
    }
}

impl Serialize for Timestamp {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_rfc3339())
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_rfc3339(&s).map_err(serde::de::Error::custom)
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_rfc3339())
    }
}

/// Platform role of a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// A job-seeking aviation professional.
    Candidate,
    /// An airline or agency recruiter.
    Recruiter,
    /// A platform administrator.
    Admin,
}

/// A user as embedded in conversations and messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatUser {
    /// The user's server-assigned identifier.
    pub id: UserId,
    /// Display name.
    pub name: String,
    /// Optional avatar URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    /// Optional platform role.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
}

/// Kind of a message payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// Plain text.
    Text,
    /// An image attachment reference.
    Image,
    /// A file attachment reference.
    File,
    /// A server-generated system notice.
    System,
}

/// A server-acknowledged chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Server-assigned message identifier.
    pub id: MessageId,
    /// The conversation this message belongs to. Immutable.
    pub conversation_id: ConversationId,
    /// Who sent the message.
    pub sender: ChatUser,
    /// Message content (text or attachment reference).
    pub content: String,
    /// Payload kind.
    pub kind: MessageKind,
    /// When the server created the message.
    pub created_at: Timestamp,
    /// Client-supplied idempotency reference, echoed back by the backend
    /// when the sender included one with the write.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_ref: Option<LocalId>,
}

/// A participant entry in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    /// The participant's user identifier.
    pub user_id: UserId,
    /// Timestamp of the participant's last-read marker, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_read: Option<Timestamp>,
    /// Embedded user details when the backend expands them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<ChatUser>,
}

/// Kind of a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationKind {
    /// Exactly two participants.
    Direct,
    /// Three or more participants with an optional title.
    Group,
}

/// Summary of the most recent message in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastMessage {
    /// Content snippet of the most recent message.
    pub content: String,
    /// Who sent it.
    pub sender: ChatUser,
    /// When it was created.
    pub timestamp: Timestamp,
    /// Payload kind.
    pub kind: MessageKind,
}

/// A conversation summary as returned by the conversation list endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    /// Server-assigned conversation identifier.
    pub id: ConversationId,
    /// Direct or group.
    pub kind: ConversationKind,
    /// Optional title (group conversations).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Participants with their last-read markers.
    pub participants: Vec<Participant>,
    /// Summary of the most recent message, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message: Option<LastMessage>,
    /// Number of messages after the viewer's last-read marker not authored
    /// by the viewer. Never negative.
    #[serde(default)]
    pub unread_count: u32,
    /// When the conversation was created.
    pub created_at: Timestamp,
    /// When the conversation was last updated, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<Timestamp>,
}

impl Conversation {
    /// Returns the participant entry for the given user, if present.
    #[must_use]
    pub fn participant(&self, user: &UserId) -> Option<&Participant> {
        self.participants.iter().find(|p| p.user_id == *user)
    }

    /// Returns the first participant other than the given user.
    ///
    /// For direct conversations this is the peer the viewer is talking to.
    #[must_use]
    pub fn peer_of(&self, viewer: &UserId) -> Option<&Participant> {
        self.participants.iter().find(|p| p.user_id != *viewer)
    }
}

/// Pagination block accompanying paginated responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    /// 1-based page number.
    pub page: u32,
    /// Total number of pages.
    pub pages: u32,
    /// Total number of items across all pages.
    pub total: u64,
}

/// One page of conversation summaries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationPage {
    /// The conversations on this page.
    pub conversations: Vec<Conversation>,
    /// Pagination metadata.
    pub pagination: Pagination,
}

/// One page of messages, oldest-first within the page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagePage {
    /// The messages on this page.
    pub messages: Vec<Message>,
    /// Pagination metadata.
    pub pagination: Pagination,
}

/// Aggregate notification counters for the header badge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationStats {
    /// Total notifications.
    pub total: u64,
    /// Unread notifications.
    pub unread: u64,
}

/// Error returned when message content fails validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// Content is empty after trimming whitespace.
    #[error("message content is empty")]
    Empty,
    /// Content exceeds the maximum allowed size.
    #[error("message too large ({size} bytes, max {max} bytes)")]
    TooLarge {
        /// Actual size of the content in bytes.
        size: usize,
        /// Maximum allowed size in bytes.
        max: usize,
    },
}

/// Validates raw message content for sending.
///
/// Leading and trailing whitespace is trimmed; the result must be non-empty
/// and within [`MAX_CONTENT_SIZE`]. Returns the trimmed content.
///
/// # Errors
///
/// Returns [`ValidationError::Empty`] if the trimmed content is empty, or
/// [`ValidationError::TooLarge`] if it exceeds the size limit.
pub fn validate_content(raw: &str) -> Result<String, ValidationError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::Empty);
    }
    let size = trimmed.len();
    if size > MAX_CONTENT_SIZE {
        return Err(ValidationError::TooLarge {
            size,
            max: MAX_CONTENT_SIZE,
        });
    }
    Ok(trimmed.to_string())
}
