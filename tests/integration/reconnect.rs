// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::missing_panics_doc,
    clippy::missing_docs_in_private_items
)]

//! Integration tests for the push connection supervisor.
//!
//! Uses the in-process loopback channel to verify:
//! - connect, subscribe, and broadcast delivery
//! - automatic reconnect with subscription replay after a severed connection
//! - exponential backoff across consecutive connect failures
//! - subscriptions recorded while disconnected are honored on connect
//! - shutdown stops the supervisor and closes the event stream

use std::time::{Duration, Instant};

use tokio::sync::mpsc;

use aerochat::push::loopback::{LoopbackConnector, LoopbackServer};
use aerochat::push::{Backoff, ConnectionManager, PushEvent, PushHandle};
use aerochat_proto::model::{
    ChatUser, ConversationId, Message, MessageId, MessageKind, Timestamp, UserId,
};

// =============================================================================
// Helpers
// =============================================================================

fn make_message(conversation: &str, id: &str) -> Message {
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

/// Spawns a supervisor with fast backoff settings for testing.
fn spawn_supervisor() -> (PushHandle, mpsc::Receiver<PushEvent>, LoopbackServer) {
    let (connector, server) = LoopbackConnector::new();
    let backoff = Backoff::new(Duration::from_millis(20), Duration::from_millis(200));
    let (events_tx, events_rx) = mpsc::channel(64);
    let handle = ConnectionManager::new(connector, backoff).spawn(events_tx);
    (handle, events_rx, server)
}

/// Waits for a push event matching a predicate, skipping others.
async fn wait_for_push_event<F>(
    rx: &mut mpsc::Receiver<PushEvent>,
    description: &str,
    pred: F,
) -> PushEvent
where
    F: Fn(&PushEvent) -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        let remaining = deadline - tokio::time::Instant::now();
        match tokio::time::timeout(remaining, rx.recv()).await {
            Ok(Some(evt)) if pred(&evt) => return evt,
            Ok(Some(_other)) => continue,
            Ok(None) => panic!("channel closed while waiting for {description}"),
            Err(_) => break,
        }
    }
    panic!("timeout waiting for {description}");
}

async fn wait_for_connected(rx: &mut mpsc::Receiver<PushEvent>) {
    let _ = wait_for_push_event(rx, "Connected", |evt| matches!(evt, PushEvent::Connected)).await;
}

async fn wait_for_disconnected(rx: &mut mpsc::Receiver<PushEvent>) {
    let _ = wait_for_push_event(rx, "Disconnected", |evt| {
        matches!(evt, PushEvent::Disconnected)
    })
    .await;
}

/// Waits until the latest live connection has joined the given conversation.
async fn wait_for_join(server: &LoopbackServer, conversation: &ConversationId) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if server.joined_on_latest().contains(conversation) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timeout waiting for join of {conversation}");
}

// =============================================================================
// Test 1: Connect, subscribe, deliver
// =============================================================================

#[tokio::test]
async fn connect_subscribe_and_deliver() {
    let (handle, mut events, server) = spawn_supervisor();
    wait_for_connected(&mut events).await;

    let conversation = ConversationId::new("c-1");
    handle.subscribe(vec![conversation.clone()]);
    wait_for_join(&server, &conversation).await;

    server.broadcast(&make_message("c-1", "m-1"));
    let evt = wait_for_push_event(&mut events, "Message", |evt| {
        matches!(evt, PushEvent::Message(_))
    })
    .await;
    match evt {
        PushEvent::Message(message) => assert_eq!(message.id, MessageId::new("m-1")),
        other => panic!("expected Message, got: {other:?}"),
    }
}

#[tokio::test]
async fn unsubscribed_conversations_are_not_delivered() {
    let (handle, mut events, server) = spawn_supervisor();
    wait_for_connected(&mut events).await;

    let conversation = ConversationId::new("c-1");
    handle.subscribe(vec![conversation.clone()]);
    wait_for_join(&server, &conversation).await;

    // Only the joined conversation's broadcast comes through.
    server.broadcast(&make_message("c-other", "m-1"));
    server.broadcast(&make_message("c-1", "m-2"));

    let evt = wait_for_push_event(&mut events, "Message", |evt| {
        matches!(evt, PushEvent::Message(_))
    })
    .await;
    match evt {
        PushEvent::Message(message) => assert_eq!(message.id, MessageId::new("m-2")),
        other => panic!("expected Message, got: {other:?}"),
    }
}

// =============================================================================
// Test 2: Reconnect with subscription replay
// =============================================================================

#[tokio::test]
async fn reconnects_and_replays_subscriptions() {
    let (handle, mut events, server) = spawn_supervisor();
    wait_for_connected(&mut events).await;

    let conversation = ConversationId::new("c-1");
    handle.subscribe(vec![conversation.clone()]);
    wait_for_join(&server, &conversation).await;
    let connects_before = server.connect_count();

    // Sever the connection.
    server.drop_connections();
    wait_for_disconnected(&mut events).await;
    wait_for_connected(&mut events).await;
    assert!(server.connect_count() > connects_before);

    // The fresh connection carries the old subscription set without any
    // new subscribe call.
    wait_for_join(&server, &conversation).await;
    server.broadcast(&make_message("c-1", "m-after"));
    let evt = wait_for_push_event(&mut events, "Message", |evt| {
        matches!(evt, PushEvent::Message(_))
    })
    .await;
    match evt {
        PushEvent::Message(message) => assert_eq!(message.id, MessageId::new("m-after")),
        other => panic!("expected Message, got: {other:?}"),
    }
}

// =============================================================================
// Test 3: Exponential backoff
// =============================================================================

#[tokio::test]
async fn backoff_spaces_out_failed_attempts() {
    let (connector, server) = LoopbackConnector::new();
    server.fail_next_connects(3);
    let backoff = Backoff::new(Duration::from_millis(20), Duration::from_millis(500));
    let (events_tx, mut events) = mpsc::channel(64);
    let started = Instant::now();
    let _handle = ConnectionManager::new(connector, backoff).spawn(events_tx);

    wait_for_connected(&mut events).await;
    let elapsed = started.elapsed();

    // Three failures: delays of 20ms, 40ms, and 80ms before the fourth
    // attempt succeeds.
    assert_eq!(server.connect_count(), 4);
    assert!(
        elapsed >= Duration::from_millis(120),
        "connected too fast for the backoff schedule: {elapsed:?}"
    );
}

#[tokio::test]
async fn backoff_resets_after_successful_connection() {
    let (connector, server) = LoopbackConnector::new();
    let backoff = Backoff::new(Duration::from_millis(20), Duration::from_millis(500));
    let (events_tx, mut events) = mpsc::channel(64);
    let _handle = ConnectionManager::new(connector, backoff).spawn(events_tx);
    wait_for_connected(&mut events).await;

    // Drop and let it reconnect a few times; each single failure-free
    // reconnect should take roughly one initial delay, not an accumulated
    // one.
    for _ in 0..3 {
        server.drop_connections();
        wait_for_disconnected(&mut events).await;
        let reconnect_started = Instant::now();
        wait_for_connected(&mut events).await;
        assert!(
            reconnect_started.elapsed() < Duration::from_millis(500),
            "reconnect took too long; backoff did not reset"
        );
    }
}

// =============================================================================
// Test 4: Subscribe while disconnected
// =============================================================================

#[tokio::test]
async fn subscription_recorded_during_backoff_is_applied_on_connect() {
    let (connector, server) = LoopbackConnector::new();
    server.fail_next_connects(3);
    let backoff = Backoff::new(Duration::from_millis(20), Duration::from_millis(500));
    let (events_tx, mut events) = mpsc::channel(64);
    let handle = ConnectionManager::new(connector, backoff).spawn(events_tx);

    // No connection exists yet; the subscription is just recorded.
    let conversation = ConversationId::new("c-1");
    handle.subscribe(vec![conversation.clone()]);

    wait_for_connected(&mut events).await;
    wait_for_join(&server, &conversation).await;

    server.broadcast(&make_message("c-1", "m-1"));
    let evt = wait_for_push_event(&mut events, "Message", |evt| {
        matches!(evt, PushEvent::Message(_))
    })
    .await;
    assert!(matches!(evt, PushEvent::Message(_)));
}

// =============================================================================
// Test 5: Shutdown
// =============================================================================

#[tokio::test]
async fn shutdown_closes_event_stream() {
    let (handle, mut events, _server) = spawn_supervisor();
    wait_for_connected(&mut events).await;

    handle.shutdown();

    // The supervisor exits and drops its event sender.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        assert!(
            tokio::time::Instant::now() < deadline,
            "event stream did not close after shutdown"
        );
        match tokio::time::timeout(Duration::from_millis(200), events.recv()).await {
            Ok(None) => break,
            Ok(Some(_)) => continue,
            Err(_) => continue,
        }
    }
}
