//! Client-side state: the conversation roster and per-conversation
//! message timelines.

pub mod conversations;
pub mod messages;

pub use conversations::{ConversationStore, IncomingOutcome};
pub use messages::{
    DeliveryState, HistoryTicket, IncomingMessage, MessageKey, MessageStore, TimelineEntry,
    TimelineError,
};
