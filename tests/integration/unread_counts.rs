// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::missing_panics_doc,
    clippy::missing_docs_in_private_items
)]

//! Integration tests for unread counters.
//!
//! Drives the reconciler with interleaved push broadcasts, conversation
//! refreshes, and read actions, and verifies:
//! - unread counts increment for peer messages and never for the viewer's own
//! - the open conversation accrues no unread
//! - marking read clears the counter and the total badge
//! - a refresh started before a push-driven increment does not roll it back
//! - the roster snapshot reorders on new activity

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;

use aerochat::reconcile::Reconciler;
use aerochat::session::Session;
use aerochat_proto::model::{
    ChatUser, Conversation, ConversationId, ConversationKind, Message, MessageId, MessageKind,
    Participant, Timestamp, UserId,
};

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

fn conversation(id: &str, unread: u32) -> Conversation {
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
        unread_count: unread,
        created_at: Timestamp::from_millis(0),
        updated_at: None,
    }
}

fn peer_message(conversation: &str, id: &str) -> Message {
    Message {
        id: MessageId::new(id),
        conversation_id: ConversationId::new(conversation),
        sender: ChatUser {
            id: UserId::new("peer"),
            name: "Peer".to_string(),
            avatar: None,
            role: None,
        },
        content: "ping".to_string(),
        kind: MessageKind::Text,
        created_at: Timestamp::now(),
        client_ref: None,
    }
}

fn own_message(conversation: &str, id: &str) -> Message {
    let mut message = peer_message(conversation, id);
    message.sender = viewer();
    message
}

fn make_reconciler() -> Reconciler {
    let session = Arc::new(Session::new(viewer(), "tok"));
    let (events_tx, _events_rx) = mpsc::channel(64);
    let (reconciler, _unread, _roster) =
        Reconciler::new(session, events_tx, Duration::from_secs(5));
    reconciler
}

// =============================================================================
// Increment behavior
// =============================================================================

#[test]
fn peer_messages_increment_unread_and_badge() {
    let mut reconciler = make_reconciler();
    reconciler.apply_refresh(
        vec![conversation("c-1", 0), conversation("c-2", 0)],
        Instant::now(),
    );

    reconciler.apply_incoming(&peer_message("c-1", "m-1"));
    reconciler.apply_incoming(&peer_message("c-1", "m-2"));
    reconciler.apply_incoming(&peer_message("c-2", "m-3"));

    assert_eq!(reconciler.total_unread(), 3);
    let roster = reconciler.roster();
    let c1 = roster.iter().find(|c| c.id.as_str() == "c-1").unwrap();
    assert_eq!(c1.unread_count, 2);
}

#[test]
fn own_messages_do_not_increment_unread() {
    let mut reconciler = make_reconciler();
    reconciler.apply_refresh(vec![conversation("c-1", 0)], Instant::now());

    reconciler.apply_incoming(&own_message("c-1", "m-1"));

    assert_eq!(reconciler.total_unread(), 0);
    // The echo still updates the roster preview.
    assert!(reconciler.roster()[0].last_message.is_some());
}

#[test]
fn open_conversation_accrues_no_unread() {
    let mut reconciler = make_reconciler();
    reconciler.apply_refresh(vec![conversation("c-1", 0)], Instant::now());
    let _ticket = reconciler.open_conversation(&ConversationId::new("c-1"));

    reconciler.apply_incoming(&peer_message("c-1", "m-1"));
    assert_eq!(reconciler.total_unread(), 0);

    // Closing it makes the conversation accrue unread again.
    reconciler.close_conversation();
    reconciler.apply_incoming(&peer_message("c-1", "m-2"));
    assert_eq!(reconciler.total_unread(), 1);
}

#[test]
fn duplicate_broadcast_increments_once() {
    let mut reconciler = make_reconciler();
    reconciler.apply_refresh(vec![conversation("c-1", 0)], Instant::now());

    let message = peer_message("c-1", "m-1");
    reconciler.apply_incoming(&message);
    reconciler.apply_incoming(&message);

    assert_eq!(reconciler.total_unread(), 1);
}

// =============================================================================
// Read actions
// =============================================================================

#[test]
fn mark_read_clears_counter_and_badge() {
    let mut reconciler = make_reconciler();
    reconciler.apply_refresh(
        vec![conversation("c-1", 4), conversation("c-2", 2)],
        Instant::now(),
    );
    assert_eq!(reconciler.total_unread(), 6);

    reconciler.mark_read(&ConversationId::new("c-1"));
    assert_eq!(reconciler.total_unread(), 2);

    let roster = reconciler.roster();
    let c1 = roster.iter().find(|c| c.id.as_str() == "c-1").unwrap();
    assert_eq!(c1.unread_count, 0);
}

#[test]
fn open_conversation_clears_unread() {
    let mut reconciler = make_reconciler();
    reconciler.apply_refresh(vec![conversation("c-1", 7)], Instant::now());

    let _ticket = reconciler.open_conversation(&ConversationId::new("c-1"));
    assert_eq!(reconciler.total_unread(), 0);
}

// =============================================================================
// Refresh vs. push interleaving
// =============================================================================

#[test]
fn stale_refresh_does_not_roll_back_push_increment() {
    let mut reconciler = make_reconciler();
    let fetch_started = Instant::now();
    reconciler.apply_refresh(vec![conversation("c-1", 0)], fetch_started);

    // A push lands after the (slow) refresh was issued.
    reconciler.apply_incoming(&peer_message("c-1", "m-1"));
    assert_eq!(reconciler.total_unread(), 1);

    // The refresh response, fetched before the push, must not undo it.
    reconciler.apply_refresh(vec![conversation("c-1", 0)], fetch_started);
    assert_eq!(reconciler.total_unread(), 1);
}

#[test]
fn fresh_refresh_is_authoritative() {
    let mut reconciler = make_reconciler();
    reconciler.apply_refresh(vec![conversation("c-1", 0)], Instant::now());
    reconciler.apply_incoming(&peer_message("c-1", "m-1"));

    // A refresh issued after the push carries the server's own count.
    std::thread::sleep(Duration::from_millis(5));
    reconciler.apply_refresh(vec![conversation("c-1", 5)], Instant::now());
    assert_eq!(reconciler.total_unread(), 5);
}

// =============================================================================
// Roster ordering
// =============================================================================

#[test]
fn new_activity_moves_conversation_to_top() {
    let mut reconciler = make_reconciler();
    let mut older = conversation("c-old", 0);
    older.created_at = Timestamp::from_millis(1_000);
    let mut newer = conversation("c-new", 0);
    newer.created_at = Timestamp::from_millis(2_000);
    reconciler.apply_refresh(vec![older, newer], Instant::now());
    assert_eq!(reconciler.roster()[0].id.as_str(), "c-new");

    reconciler.apply_incoming(&peer_message("c-old", "m-1"));
    assert_eq!(reconciler.roster()[0].id.as_str(), "c-old");
}
