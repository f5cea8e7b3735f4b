//! Integration tests for the reconnecting chat client against a live server.

mod common;

use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

use common::{eventually, start_test_server, start_test_server_with};
use dealroom_server::chat::registry;
use dealroom_server::config::ChatSettings;
use dealroom_server::client::{
    ChatClient, ClientConfig, ConnectionStatus, SessionError, SessionEvent,
};
use dealroom_server::db::models::UserRole;

fn client_config(addr: std::net::SocketAddr, user_id: &str) -> ClientConfig {
    ClientConfig::new(
        format!("ws://{}/ws", addr),
        "deal-7",
        user_id,
        format!("{} name", user_id),
        UserRole::Broker,
    )
    .with_reconnect_delay(Duration::from_millis(100))
}

/// Wait for the first event matching `pred`, skipping others.
async fn wait_for(
    events: &mut UnboundedReceiver<SessionEvent>,
    pred: impl Fn(&SessionEvent) -> bool,
) -> SessionEvent {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        match tokio::time::timeout_at(deadline, events.recv()).await {
            Ok(Some(event)) if pred(&event) => return event,
            Ok(Some(_)) => continue,
            Ok(None) => panic!("Event stream ended"),
            Err(_) => panic!("Timed out waiting for session event"),
        }
    }
}

#[tokio::test]
async fn test_client_sends_and_receives_own_echo() {
    let (addr, _state) = start_test_server().await;
    let (mut client, mut events) = ChatClient::start(client_config(addr, "u1")).unwrap();

    wait_for(&mut events, |e| matches!(e, SessionEvent::HistoryLoaded(0))).await;
    assert_eq!(client.status(), ConnectionStatus::Connected);

    client.send_message("keys handed over").unwrap();

    match wait_for(&mut events, |e| matches!(e, SessionEvent::MessageReceived(_))).await {
        SessionEvent::MessageReceived(message) => {
            assert_eq!(message.content, "keys handed over");
            assert_eq!(message.sender_id, "u1");
            assert_eq!(message.sender_role, UserRole::Broker);
            assert!(!message.is_pending);
        }
        other => panic!("Unexpected event {:?}", other),
    }
    assert_eq!(client.messages().len(), 1);

    assert_eq!(client.send_message(" "), Err(SessionError::EmptyMessage));

    client.close().await;
}

#[tokio::test]
async fn test_two_clients_share_the_conversation() {
    let (addr, _state) = start_test_server().await;
    let (mut alice, mut alice_events) = ChatClient::start(client_config(addr, "alice")).unwrap();
    let (mut bob, mut bob_events) = ChatClient::start(client_config(addr, "bob")).unwrap();

    wait_for(&mut alice_events, |e| matches!(e, SessionEvent::HistoryLoaded(_))).await;
    wait_for(&mut bob_events, |e| matches!(e, SessionEvent::HistoryLoaded(_))).await;

    alice.send_message("offer accepted").unwrap();

    for events in [&mut alice_events, &mut bob_events] {
        match wait_for(events, |e| matches!(e, SessionEvent::MessageReceived(_))).await {
            SessionEvent::MessageReceived(message) => {
                assert_eq!(message.content, "offer accepted");
                assert_eq!(message.sender_id, "alice");
            }
            other => panic!("Unexpected event {:?}", other),
        }
    }
    assert_eq!(alice.messages(), bob.messages());

    alice.close().await;
    bob.close().await;
}

#[tokio::test]
async fn test_client_reconnects_and_refetches_history() {
    let (addr, state) = start_test_server().await;
    let (mut client, mut events) = ChatClient::start(client_config(addr, "u1")).unwrap();

    wait_for(&mut events, |e| matches!(e, SessionEvent::HistoryLoaded(0))).await;
    client.send_message("before the drop").unwrap();
    wait_for(&mut events, |e| matches!(e, SessionEvent::MessageReceived(_))).await;

    // Drop the socket from the server side.
    let live = registry::list_by_transaction(&state.db, "deal-7").unwrap();
    assert_eq!(live.len(), 1);
    state.push.close(&live[0].connection_id, 1001, "restart");

    wait_for(&mut events, |e| {
        matches!(e, SessionEvent::Status(ConnectionStatus::Disconnected))
    })
    .await;
    assert_eq!(client.send_message("into the void"), Err(SessionError::NotConnected));

    wait_for(&mut events, |e| {
        matches!(e, SessionEvent::Status(ConnectionStatus::Connected))
    })
    .await;
    wait_for(&mut events, |e| matches!(e, SessionEvent::HistoryLoaded(1))).await;
    assert_eq!(client.messages()[0].content, "before the drop");

    // The old row is gone and the new socket is registered.
    assert!(
        eventually(|| {
            let rows = registry::list_by_transaction(&state.db, "deal-7").unwrap();
            rows.len() == 1 && rows[0].connection_id != live[0].connection_id
        })
        .await
    );

    client.close().await;
    assert_eq!(client.status(), ConnectionStatus::Disconnected);
    assert!(eventually(|| registry::list_by_transaction(&state.db, "deal-7")
        .unwrap()
        .is_empty())
    .await);
}

#[tokio::test]
async fn test_close_cancels_pending_reconnect() {
    // Nothing listens here; the driver sits in its reconnect delay.
    let config = ClientConfig::new("ws://127.0.0.1:1/ws", "deal-7", "u1", "U", UserRole::Client)
        .with_reconnect_delay(Duration::from_secs(60));
    let (mut client, mut events) = ChatClient::start(config).unwrap();

    wait_for(&mut events, |e| {
        matches!(e, SessionEvent::Status(ConnectionStatus::Disconnected))
    })
    .await;

    tokio::time::timeout(Duration::from_secs(2), client.close())
        .await
        .expect("close() should not wait for the reconnect delay");
    assert_eq!(client.send_message("late"), Err(SessionError::Closed));
}

#[tokio::test]
async fn test_status_watch_follows_the_socket() {
    let (addr, _state) = start_test_server().await;
    let (mut client, _events) = ChatClient::start(client_config(addr, "u1")).unwrap();
    let mut status = client.status_changes();

    tokio::time::timeout(
        Duration::from_secs(5),
        status.wait_for(|s| *s == ConnectionStatus::Connected),
    )
    .await
    .expect("Timed out waiting for Connected")
    .unwrap();

    client.close().await;
    assert_eq!(*status.borrow(), ConnectionStatus::Disconnected);
}

#[tokio::test]
async fn test_refused_handshake_is_reported_as_server_error() {
    let settings = ChatSettings {
        deny_system_role: true,
        ..ChatSettings::default()
    };
    let (addr, state) = start_test_server_with(settings).await;
    let config = ClientConfig::new(
        format!("ws://{}/ws", addr),
        "deal-7",
        "escrow-bot",
        "Escrow",
        UserRole::System,
    )
    .with_reconnect_delay(Duration::from_millis(100));
    let (mut client, mut events) = ChatClient::start(config).unwrap();

    match wait_for(&mut events, |e| matches!(e, SessionEvent::ServerError { .. })).await {
        SessionEvent::ServerError { code, .. } => assert_eq!(code, 403),
        other => panic!("Unexpected event {:?}", other),
    }
    assert_ne!(client.status(), ConnectionStatus::Connected);
    assert!(registry::list_by_transaction(&state.db, "deal-7")
        .unwrap()
        .is_empty());

    client.close().await;
}
