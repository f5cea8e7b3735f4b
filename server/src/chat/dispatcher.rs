//! Gateway dispatcher: binds socket lifecycle and application frames to
//! registry and message log operations, and pushes the resulting frames.
//!
//! The dispatcher keeps no per-connection state of its own. Everything it
//! needs is re-read from the database on each event, so any number of
//! events may be handled concurrently.

use std::sync::Arc;

use crate::chat::authorize::{ConnectAuthorizer, ConnectParams};
use crate::chat::broadcast::{fan_out, new_message_frame};
use crate::chat::{messages, registry};
use crate::config::ChatSettings;
use crate::db::models::{ConnectionRecord, NewConnection, NewMessage, UserRole};
use crate::db::DbPool;
use crate::error::{ChatError, DeliveryError};
use crate::ws::protocol::{ChatMessage, ConnectQuery, InboundFrame, OutboundFrame};
use crate::ws::PushSink;

const DEFAULT_USER_NAME: &str = "Unknown";

/// Result of an accepted `sendMessage`.
#[derive(Debug, Clone)]
pub struct SendOutcome {
    pub message: ChatMessage,
    /// The send was a retry of an already persisted client token.
    pub duplicate: bool,
    /// Connections the `newMessage` frame was handed to.
    pub delivered: usize,
    /// Stale connections removed from the registry during fan-out.
    pub pruned: Vec<String>,
}

#[derive(Clone)]
pub struct Dispatcher {
    db: DbPool,
    push: Arc<dyn PushSink>,
    authorizer: Arc<dyn ConnectAuthorizer>,
    settings: ChatSettings,
}

impl Dispatcher {
    pub fn new(
        db: DbPool,
        push: Arc<dyn PushSink>,
        authorizer: Arc<dyn ConnectAuthorizer>,
        settings: ChatSettings,
    ) -> Self {
        Self {
            db,
            push,
            authorizer,
            settings,
        }
    }

    /// Validate handshake parameters and run the authorization hook.
    /// Runs before the socket is upgraded; a rejection creates no row.
    pub fn admit(&self, query: &ConnectQuery) -> Result<ConnectParams, ChatError> {
        let transaction_id = required(query.transaction_id.as_deref(), "transactionId")?;
        let user_id = required(query.user_id.as_deref(), "userId")?;

        let user_name = query
            .user_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or(DEFAULT_USER_NAME)
            .to_string();

        let user_role = match query.user_role.as_deref().map(str::trim) {
            None | Some("") => UserRole::default(),
            Some(role) => role.parse::<UserRole>().map_err(ChatError::Validation)?,
        };

        let params = ConnectParams {
            transaction_id,
            user_id,
            user_name,
            user_role,
        };

        self.authorizer
            .authorize(&params)
            .map_err(ChatError::Forbidden)?;

        Ok(params)
    }

    /// Register an admitted socket.
    pub async fn on_connect(
        &self,
        connection_id: &str,
        params: &ConnectParams,
    ) -> Result<ConnectionRecord, ChatError> {
        let connection = NewConnection {
            connection_id: connection_id.to_string(),
            transaction_id: params.transaction_id.clone(),
            user_id: params.user_id.clone(),
            user_name: params.user_name.clone(),
            user_role: params.user_role,
        };
        let ttl_secs = self.settings.connection_ttl_secs;

        let record = self
            .blocking(move |db| registry::register(db, &connection, ttl_secs))
            .await?;

        tracing::info!(
            connection_id = %record.connection_id,
            transaction_id = %record.transaction_id,
            user_id = %record.user_id,
            role = %record.user_role,
            "Chat connection opened"
        );

        Ok(record)
    }

    /// Remove a socket from the registry. Best effort: failures are logged.
    pub async fn on_disconnect(&self, connection_id: &str) {
        let id = connection_id.to_string();
        match self.blocking(move |db| registry::unregister(db, &id)).await {
            Ok(_) => {
                tracing::info!(connection_id = %connection_id, "Chat connection closed");
            }
            Err(e) => {
                tracing::warn!(
                    connection_id = %connection_id,
                    error = %e,
                    "Failed to unregister connection, leaving it to TTL cleanup"
                );
            }
        }
    }

    /// Decode and route one text frame. Errors are reported back to the
    /// requesting connection as an `error` frame.
    pub async fn handle_frame(&self, connection_id: &str, text: &str) {
        let frame = match InboundFrame::decode(text) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::debug!(
                    connection_id = %connection_id,
                    error = %e,
                    "Failed to decode inbound frame"
                );
                self.deliver(
                    connection_id,
                    &OutboundFrame::Error {
                        code: 400,
                        message: format!("invalid frame: {}", e),
                    },
                )
                .await;
                return;
            }
        };

        let result = match frame {
            InboundFrame::SendMessage {
                transaction_id,
                content,
                client_token,
            } => self
                .on_send(connection_id, transaction_id, content, client_token)
                .await
                .map(|_| ()),
            InboundFrame::GetMessages {
                transaction_id,
                limit,
            } => self
                .on_get_history(connection_id, transaction_id, limit)
                .await
                .map(|_| ()),
        };

        if let Err(e) = result {
            tracing::warn!(
                connection_id = %connection_id,
                error = %e,
                "Rejected chat frame"
            );
            self.deliver(
                connection_id,
                &OutboundFrame::Error {
                    code: e.code(),
                    message: e.to_string(),
                },
            )
            .await;
        }
    }

    /// Persist a message and fan it out to every live connection of the
    /// transaction, the sender's own connection included.
    pub async fn on_send(
        &self,
        connection_id: &str,
        transaction_id: Option<String>,
        content: Option<String>,
        client_token: Option<String>,
    ) -> Result<SendOutcome, ChatError> {
        let id = connection_id.to_string();
        let sender = self
            .blocking(move |db| registry::lookup_by_socket(db, &id))
            .await?
            .ok_or_else(|| ChatError::ConnectionNotFound(connection_id.to_string()))?;

        let transaction_id = required(transaction_id.as_deref(), "transactionId")?;
        let content = content
            .filter(|c| !c.is_empty())
            .ok_or_else(|| ChatError::validation("content is required"))?;
        if transaction_id != sender.transaction_id {
            return Err(ChatError::validation(
                "transactionId does not match this connection",
            ));
        }

        let new_message = NewMessage {
            transaction_id: transaction_id.clone(),
            sender_id: sender.user_id.clone(),
            sender_name: sender.user_name.clone(),
            sender_role: sender.user_role,
            content,
            client_token,
        };
        let max_len = self.settings.max_content_length;
        let appended = self
            .blocking(move |db| messages::append(db, &new_message, max_len))
            .await?;

        let message = ChatMessage::from(&appended.message);
        let frame = new_message_frame(message.clone());

        if appended.duplicate {
            // Retried send: everyone already saw it, echo to the retrying socket only.
            let delivered = usize::from(self.deliver(connection_id, &frame).await);
            return Ok(SendOutcome {
                message,
                duplicate: true,
                delivered,
                pruned: Vec::new(),
            });
        }

        let tx_id = transaction_id.clone();
        let recipients = self
            .blocking(move |db| registry::list_by_transaction(db, &tx_id))
            .await?;

        let report = fan_out(self.push.as_ref(), &recipients, &frame);
        for stale in &report.gone {
            self.prune(stale).await;
        }

        tracing::info!(
            transaction_id = %transaction_id,
            message_id = %message.message_id,
            sender_id = %message.sender_id,
            recipients = recipients.len(),
            delivered = report.delivered,
            pruned = report.gone.len(),
            "Message broadcast"
        );

        Ok(SendOutcome {
            message,
            duplicate: false,
            delivered: report.delivered,
            pruned: report.gone,
        })
    }

    /// Push the most recent page of history, oldest first, to the requester.
    /// Returns the number of messages sent.
    pub async fn on_get_history(
        &self,
        connection_id: &str,
        transaction_id: Option<String>,
        limit: Option<u32>,
    ) -> Result<usize, ChatError> {
        let transaction_id = required(transaction_id.as_deref(), "transactionId")?;
        let limit = limit
            .unwrap_or(self.settings.history_default_limit)
            .clamp(1, self.settings.history_max_limit.max(1));

        let mut page = self
            .blocking(move |db| messages::list_recent(db, &transaction_id, limit))
            .await?;
        page.reverse();

        let data: Vec<ChatMessage> = page.iter().map(ChatMessage::from).collect();
        let count = data.len();
        self.deliver(connection_id, &OutboundFrame::MessageHistory { data })
            .await;

        tracing::debug!(
            connection_id = %connection_id,
            messages = count,
            "History delivered"
        );

        Ok(count)
    }

    /// Push a frame to a single connection, pruning it if the socket is gone.
    async fn deliver(&self, connection_id: &str, frame: &OutboundFrame) -> bool {
        match self.push.push(connection_id, frame) {
            Ok(()) => true,
            Err(DeliveryError::Gone(_)) => {
                self.prune(connection_id).await;
                false
            }
            Err(e) => {
                tracing::warn!(
                    connection_id = %connection_id,
                    error = %e,
                    "Failed to push {} frame",
                    frame.action()
                );
                false
            }
        }
    }

    async fn prune(&self, connection_id: &str) {
        let id = connection_id.to_string();
        match self.blocking(move |db| registry::unregister(db, &id)).await {
            Ok(true) => {
                tracing::info!(connection_id = %connection_id, "Pruned stale connection");
            }
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(
                    connection_id = %connection_id,
                    error = %e,
                    "Failed to prune stale connection"
                );
            }
        }
    }

    /// Run a synchronous store operation on the blocking pool.
    async fn blocking<T, F>(&self, op: F) -> Result<T, ChatError>
    where
        F: FnOnce(&DbPool) -> Result<T, ChatError> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || op(&db)).await?
    }
}

fn required(value: Option<&str>, field: &str) -> Result<String, ChatError> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ChatError::validation(format!("{} is required", field)))
}
