use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, timeout};

use crate::chat::authorize::ConnectParams;
use crate::state::AppState;
use crate::ws::ConnectionSender;

/// Server pings every 30 seconds so abrupt disconnects are noticed.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// Close the socket if no pong arrives within 10 seconds of a ping.
const PONG_TIMEOUT: Duration = Duration::from_secs(10);

/// Close code sent when the connection could not be registered.
const CLOSE_INTERNAL_ERROR: u16 = 1011;

/// Close code sent when the peer stops answering pings.
const CLOSE_GOING_AWAY: u16 = 1001;

/// Drive one accepted chat socket from registration to cleanup.
///
/// The socket is split: a writer task owns the sink and drains an mpsc
/// channel that the push gateway posts into, while this task reads frames
/// and hands text frames to the dispatcher.
pub async fn run_connection(
    socket: WebSocket,
    state: AppState,
    connection_id: String,
    params: ConnectParams,
) {
    let (ws_sender, mut ws_receiver) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel::<Message>();
    let writer_handle = tokio::spawn(writer_task(ws_sender, rx));

    // Attach before registering so a concurrent fan-out that sees the
    // registry row can always reach this socket.
    state.push.attach(&connection_id, tx.clone());

    if let Err(e) = state.dispatcher.on_connect(&connection_id, &params).await {
        tracing::error!(
            connection_id = %connection_id,
            transaction_id = %params.transaction_id,
            error = %e,
            "Failed to register connection"
        );
        state
            .push
            .close(&connection_id, CLOSE_INTERNAL_ERROR, "registration failed");
        state.push.detach(&connection_id);
        drop(tx);
        let _ = writer_handle.await;
        return;
    }

    let (pong_tx, mut pong_rx) = mpsc::unbounded_channel::<()>();

    let ping_tx = tx.clone();
    let ping_connection_id = connection_id.clone();
    let ping_handle = tokio::spawn(async move {
        let mut ping_timer = interval(PING_INTERVAL);
        // First tick fires immediately.
        ping_timer.tick().await;

        loop {
            ping_timer.tick().await;

            match ping_and_wait(&ping_tx, &mut pong_rx, PONG_TIMEOUT).await {
                Liveness::Alive => {}
                Liveness::WriterGone => break,
                Liveness::TimedOut => {
                    tracing::warn!(
                        connection_id = %ping_connection_id,
                        "Pong timeout, closing connection"
                    );
                    let _ = ping_tx.send(Message::Close(Some(CloseFrame {
                        code: CLOSE_GOING_AWAY,
                        reason: "Pong timeout".into(),
                    })));
                    break;
                }
            }
        }
    });

    loop {
        match ws_receiver.next().await {
            Some(Ok(msg)) => match msg {
                Message::Text(text) => {
                    state
                        .dispatcher
                        .handle_frame(&connection_id, text.as_str())
                        .await;
                }
                Message::Binary(data) => {
                    tracing::debug!(
                        connection_id = %connection_id,
                        bytes = data.len(),
                        "Ignoring binary frame"
                    );
                }
                Message::Pong(_) => {
                    let _ = pong_tx.send(());
                }
                Message::Ping(data) => {
                    let _ = tx.send(Message::Pong(data));
                }
                Message::Close(frame) => {
                    tracing::debug!(
                        connection_id = %connection_id,
                        reason = ?frame,
                        "Client initiated close"
                    );
                    break;
                }
            },
            Some(Err(e)) => {
                tracing::warn!(
                    connection_id = %connection_id,
                    error = %e,
                    "WebSocket receive error"
                );
                break;
            }
            None => {
                tracing::debug!(connection_id = %connection_id, "WebSocket stream ended");
                break;
            }
        }
    }

    writer_handle.abort();
    ping_handle.abort();

    state.push.detach(&connection_id);
    state.dispatcher.on_disconnect(&connection_id).await;
}

#[derive(Debug, PartialEq, Eq)]
enum Liveness {
    Alive,
    TimedOut,
    WriterGone,
}

/// Send one ping and wait for a pong that arrives after it. Pongs already
/// queued (unsolicited, or late answers to an earlier ping) do not count.
async fn ping_and_wait(
    ping_tx: &ConnectionSender,
    pong_rx: &mut mpsc::UnboundedReceiver<()>,
    wait: Duration,
) -> Liveness {
    while pong_rx.try_recv().is_ok() {}

    if ping_tx.send(Message::Ping(vec![1, 2, 3, 4].into())).is_err() {
        return Liveness::WriterGone;
    }

    match timeout(wait, pong_rx.recv()).await {
        Ok(Some(())) => Liveness::Alive,
        _ => Liveness::TimedOut,
    }
}

/// Forward queued frames to the socket until either side closes.
async fn writer_task(
    mut ws_sender: futures_util::stream::SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<Message>,
) {
    while let Some(msg) = rx.recv().await {
        let closing = matches!(msg, Message::Close(_));
        if ws_sender.send(msg).await.is_err() || closing {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WAIT: Duration = Duration::from_millis(100);

    #[tokio::test]
    async fn test_queued_pongs_do_not_answer_a_new_ping() {
        let (ping_tx, mut outbound) = mpsc::unbounded_channel::<Message>();
        let (pong_tx, mut pong_rx) = mpsc::unbounded_channel::<()>();
        for _ in 0..3 {
            pong_tx.send(()).unwrap();
        }

        let liveness = ping_and_wait(&ping_tx, &mut pong_rx, WAIT).await;

        assert_eq!(liveness, Liveness::TimedOut);
        assert!(matches!(outbound.try_recv(), Ok(Message::Ping(_))));
    }

    #[tokio::test]
    async fn test_pong_after_ping_keeps_connection_alive() {
        let (ping_tx, mut outbound) = mpsc::unbounded_channel::<Message>();
        let (pong_tx, mut pong_rx) = mpsc::unbounded_channel::<()>();
        pong_tx.send(()).unwrap();

        // Answer the ping the way the reader loop does.
        tokio::spawn(async move {
            if let Some(Message::Ping(_)) = outbound.recv().await {
                let _ = pong_tx.send(());
            }
        });

        assert_eq!(ping_and_wait(&ping_tx, &mut pong_rx, WAIT).await, Liveness::Alive);
    }

    #[tokio::test]
    async fn test_closed_writer_is_reported() {
        let (ping_tx, outbound) = mpsc::unbounded_channel::<Message>();
        let (_pong_tx, mut pong_rx) = mpsc::unbounded_channel::<()>();
        drop(outbound);

        assert_eq!(ping_and_wait(&ping_tx, &mut pong_rx, WAIT).await, Liveness::WriterGone);
    }
}
