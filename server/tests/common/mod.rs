//! Shared helpers for the socket integration tests.

#![allow(dead_code)]

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use dealroom_server::config::ChatSettings;
use dealroom_server::state::AppState;
use dealroom_server::ws::protocol::{InboundFrame, OutboundFrame};

pub type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;
pub type WsWrite = SplitSink<WsStream, Message>;
pub type WsRead = SplitStream<WsStream>;

/// Start the server on a random port and return (addr, state).
pub async fn start_test_server() -> (SocketAddr, AppState) {
    start_test_server_with(ChatSettings::default()).await
}

pub async fn start_test_server_with(settings: ChatSettings) -> (SocketAddr, AppState) {
    let tmp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let data_dir = tmp_dir.path().to_str().unwrap().to_string();

    let db = dealroom_server::db::init_db(&data_dir).expect("Failed to init DB");
    let authorizer = dealroom_server::authorizer_for(&settings);
    let state = AppState::new(db, authorizer, settings);

    let app = dealroom_server::routes::build_router(state.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
        let _keep = tmp_dir;
    });

    (addr, state)
}

pub fn ws_url(addr: SocketAddr, transaction_id: &str, user_id: &str, role: &str) -> String {
    format!(
        "ws://{}/ws?transactionId={}&userId={}&userName={}-name&userRole={}",
        addr, transaction_id, user_id, user_id, role
    )
}

/// Open a socket and wait until the server has registered it.
///
/// The server reads frames only after registration, so a history reply
/// proves the row exists.
pub async fn connect(addr: SocketAddr, transaction_id: &str, user_id: &str) -> (WsWrite, WsRead) {
    let (ws, _) = tokio_tungstenite::connect_async(ws_url(addr, transaction_id, user_id, "client"))
        .await
        .expect("WebSocket connect failed");
    let (mut write, mut read) = ws.split();

    send(
        &mut write,
        &InboundFrame::GetMessages {
            transaction_id: Some(transaction_id.to_string()),
            limit: None,
        },
    )
    .await;
    match recv(&mut read).await {
        OutboundFrame::MessageHistory { .. } => {}
        other => panic!("Expected messageHistory, got {:?}", other),
    }

    (write, read)
}

pub async fn send(write: &mut WsWrite, frame: &InboundFrame) {
    write
        .send(Message::Text(frame.encode().unwrap().into()))
        .await
        .expect("Failed to send frame");
}

pub async fn send_text(write: &mut WsWrite, transaction_id: &str, content: &str) {
    send(
        write,
        &InboundFrame::SendMessage {
            transaction_id: Some(transaction_id.to_string()),
            content: Some(content.to_string()),
            client_token: None,
        },
    )
    .await;
}

/// Next application frame, skipping pings. Panics after 5 seconds.
pub async fn recv(read: &mut WsRead) -> OutboundFrame {
    try_recv(read, Duration::from_secs(5))
        .await
        .expect("Timed out waiting for a frame")
}

/// Next application frame within `wait`, or None.
pub async fn try_recv(read: &mut WsRead, wait: Duration) -> Option<OutboundFrame> {
    let deadline = tokio::time::Instant::now() + wait;
    loop {
        match tokio::time::timeout_at(deadline, read.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => {
                return Some(OutboundFrame::decode(text.as_str()).expect("Undecodable frame"));
            }
            Ok(Some(Ok(_))) => continue,
            _ => return None,
        }
    }
}

/// Poll until `check` holds or two seconds pass.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..40 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    check()
}
