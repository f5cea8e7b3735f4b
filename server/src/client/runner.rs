//! Async driver that keeps one chat socket open for a transaction view.
//!
//! The driver connects, asks for history on every open, applies incoming
//! frames to the shared [`ChatSession`] and reconnects after a fixed delay
//! whenever the socket drops. It runs until [`ChatClient::close`] is called.

use futures_util::{SinkExt, StreamExt};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use url::Url;

use super::session::{ChatSession, ConnectionStatus, SessionEvent, ViewMessage};
use super::SessionError;
use crate::db::models::UserRole;
use crate::ws::protocol::{InboundFrame, OutboundFrame};

/// Delay between a dropped socket and the next connection attempt.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(3);

/// Where to connect and who to connect as.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Socket endpoint, e.g. `ws://127.0.0.1:1990/ws`
    pub endpoint: String,
    pub transaction_id: String,
    pub user_id: String,
    pub user_name: String,
    pub user_role: UserRole,
    pub reconnect_delay: Duration,
}

impl ClientConfig {
    pub fn new(
        endpoint: impl Into<String>,
        transaction_id: impl Into<String>,
        user_id: impl Into<String>,
        user_name: impl Into<String>,
        user_role: UserRole,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            transaction_id: transaction_id.into(),
            user_id: user_id.into(),
            user_name: user_name.into(),
            user_role,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
        }
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Endpoint with the handshake query parameters attached.
    pub fn connect_url(&self) -> Result<Url, SessionError> {
        let mut url =
            Url::parse(&self.endpoint).map_err(|e| SessionError::InvalidEndpoint(e.to_string()))?;
        if url.scheme() != "ws" && url.scheme() != "wss" {
            return Err(SessionError::InvalidEndpoint(format!(
                "unsupported scheme '{}'",
                url.scheme()
            )));
        }
        url.query_pairs_mut()
            .append_pair("transactionId", &self.transaction_id)
            .append_pair("userId", &self.user_id)
            .append_pair("userName", &self.user_name)
            .append_pair("userRole", self.user_role.as_str());
        Ok(url)
    }
}

/// Handle to a running chat driver.
pub struct ChatClient {
    session: Arc<Mutex<ChatSession>>,
    command_tx: mpsc::UnboundedSender<InboundFrame>,
    status_rx: watch::Receiver<ConnectionStatus>,
    shutdown_tx: Option<mpsc::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl ChatClient {
    /// Spawn the driver. Session events arrive on the returned receiver.
    pub fn start(
        config: ClientConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<SessionEvent>), SessionError> {
        let url = config.connect_url()?;
        let session = Arc::new(Mutex::new(ChatSession::new(config.transaction_id.clone())));
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::Disconnected);
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);

        let driver = Driver {
            url,
            reconnect_delay: config.reconnect_delay,
            session: session.clone(),
            status_tx,
            event_tx,
        };
        let handle = tokio::spawn(driver.connection_loop(command_rx, shutdown_rx));

        let client = Self {
            session,
            command_tx,
            status_rx,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        };
        Ok((client, event_rx))
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.status_rx.borrow()
    }

    /// Watch receiver for the connection-status indicator.
    pub fn status_changes(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_rx.clone()
    }

    /// Snapshot of the local message list, oldest first.
    pub fn messages(&self) -> Vec<ViewMessage> {
        lock(&self.session).messages().to_vec()
    }

    /// Queue a message for the open socket. Fails fast when offline; nothing
    /// is buffered for a later connection.
    pub fn send_message(&self, content: &str) -> Result<(), SessionError> {
        if self.command_tx.is_closed() {
            return Err(SessionError::Closed);
        }
        let frame = lock(&self.session).prepare_send(content)?;
        self.command_tx
            .send(frame)
            .map_err(|_| SessionError::Closed)
    }

    /// Close the socket, cancel any pending reconnect and wait for the
    /// driver to finish.
    pub async fn close(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Chat driver task failed");
            }
        }
    }
}

impl Drop for ChatClient {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

/// How a single connection ended.
enum Exit {
    Dropped,
    Shutdown,
}

#[derive(Debug, Error)]
enum LinkError {
    #[error(transparent)]
    Socket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("failed to encode frame: {0}")]
    Encode(#[from] serde_json::Error),
}

impl LinkError {
    /// A handshake refused by the server (HTTP 400/403) as a session event,
    /// so the view can show why it keeps failing to connect.
    fn handshake_rejection(&self) -> Option<SessionEvent> {
        match self {
            LinkError::Socket(tokio_tungstenite::tungstenite::Error::Http(resp)) => {
                let message = resp
                    .body()
                    .as_deref()
                    .map(|body| String::from_utf8_lossy(body).into_owned())
                    .filter(|body| !body.is_empty())
                    .unwrap_or_else(|| "handshake rejected".to_string());
                Some(SessionEvent::ServerError {
                    code: resp.status().as_u16(),
                    message,
                })
            }
            _ => None,
        }
    }
}

struct Driver {
    url: Url,
    reconnect_delay: Duration,
    session: Arc<Mutex<ChatSession>>,
    status_tx: watch::Sender<ConnectionStatus>,
    event_tx: mpsc::UnboundedSender<SessionEvent>,
}

impl Driver {
    async fn connection_loop(
        self,
        mut commands: mpsc::UnboundedReceiver<InboundFrame>,
        mut shutdown: mpsc::Receiver<()>,
    ) {
        let transaction_id = lock(&self.session).transaction_id().to_string();

        loop {
            self.set_status(ConnectionStatus::Connecting);

            match self.run_connection(&mut commands, &mut shutdown).await {
                Ok(Exit::Shutdown) => break,
                Ok(Exit::Dropped) => {
                    tracing::info!(
                        transaction_id = %transaction_id,
                        "Chat socket closed, reconnecting"
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        transaction_id = %transaction_id,
                        url = %self.url,
                        error = %e,
                        "Chat socket failed, reconnecting"
                    );
                    self.emit(e.handshake_rejection());
                }
            }

            self.set_status(ConnectionStatus::Disconnected);

            tokio::select! {
                _ = tokio::time::sleep(self.reconnect_delay) => {}
                _ = shutdown.recv() => break,
            }
        }

        self.set_status(ConnectionStatus::Disconnected);
        tracing::debug!(transaction_id = %transaction_id, "Chat driver stopped");
    }

    async fn run_connection(
        &self,
        commands: &mut mpsc::UnboundedReceiver<InboundFrame>,
        shutdown: &mut mpsc::Receiver<()>,
    ) -> Result<Exit, LinkError> {
        let (ws_stream, _) = tokio::select! {
            connected = connect_async(self.url.as_str()) => connected?,
            _ = shutdown.recv() => return Ok(Exit::Shutdown),
        };

        // Sends queued against the previous socket are stale.
        while commands.try_recv().is_ok() {}

        let (mut write, mut read) = ws_stream.split();

        let (event, history_request) = lock(&self.session).on_open();
        self.status_tx.send_replace(ConnectionStatus::Connected);
        self.emit(event);
        write
            .send(Message::Text(history_request.encode()?.into()))
            .await?;

        loop {
            tokio::select! {
                incoming = read.next() => match incoming {
                    Some(Ok(Message::Text(text))) => self.handle_text(text.as_str()),
                    Some(Ok(Message::Ping(data))) => write.send(Message::Pong(data)).await?,
                    Some(Ok(Message::Close(frame))) => {
                        tracing::debug!(reason = ?frame, "Server closed chat socket");
                        return Ok(Exit::Dropped);
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e.into()),
                    None => return Ok(Exit::Dropped),
                },
                command = commands.recv() => match command {
                    Some(frame) => write.send(Message::Text(frame.encode()?.into())).await?,
                    None => {
                        let _ = write.send(Message::Close(None)).await;
                        return Ok(Exit::Shutdown);
                    }
                },
                _ = shutdown.recv() => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(Exit::Shutdown);
                }
            }
        }
    }

    fn handle_text(&self, text: &str) {
        match OutboundFrame::decode(text) {
            Ok(frame) => {
                let event = lock(&self.session).apply_frame(frame);
                self.emit(event);
            }
            Err(e) => {
                tracing::warn!(error = %e, "Ignoring undecodable chat frame");
            }
        }
    }

    fn set_status(&self, status: ConnectionStatus) {
        let event = lock(&self.session).set_status(status);
        self.status_tx.send_replace(status);
        self.emit(event);
    }

    fn emit(&self, event: Option<SessionEvent>) {
        if let Some(event) = event {
            let _ = self.event_tx.send(event);
        }
    }
}

/// The session holds no invariants a panicking holder could break halfway,
/// so a poisoned lock is recovered.
fn lock(session: &Mutex<ChatSession>) -> MutexGuard<'_, ChatSession> {
    session.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
