//! Push delivery to individual connections.
//!
//! This is the transport's "post to connection" capability. It maps a
//! connection id to the writer channel of the socket that owns it and knows
//! nothing about transactions; fan-out targets come from the durable
//! registry. A missing or closed channel is reported as `DeliveryError::Gone`.

use axum::extract::ws::{CloseFrame, Message};
use dashmap::DashMap;
use std::sync::Arc;

use super::protocol::OutboundFrame;
use super::ConnectionSender;
use crate::error::DeliveryError;

/// Deliver one frame to one connection.
pub trait PushSink: Send + Sync {
    fn push(&self, connection_id: &str, frame: &OutboundFrame) -> Result<(), DeliveryError>;
}

/// In-process push gateway backed by per-socket mpsc channels.
#[derive(Clone, Default)]
pub struct PushGateway {
    senders: Arc<DashMap<String, ConnectionSender>>,
}

impl PushGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach the writer channel of a freshly upgraded socket.
    pub fn attach(&self, connection_id: &str, sender: ConnectionSender) {
        self.senders.insert(connection_id.to_string(), sender);
    }

    /// Detach a socket's writer channel. Later pushes report `Gone`.
    pub fn detach(&self, connection_id: &str) {
        self.senders.remove(connection_id);
    }

    pub fn is_attached(&self, connection_id: &str) -> bool {
        self.senders.contains_key(connection_id)
    }

    /// Number of sockets currently attached to this process.
    pub fn attached_count(&self) -> usize {
        self.senders.len()
    }

    /// Ask a socket to close with the given code and reason.
    pub fn close(&self, connection_id: &str, close_code: u16, reason: &str) {
        if let Some(sender) = self.senders.get(connection_id) {
            let frame = CloseFrame {
                code: close_code,
                reason: reason.into(),
            };
            let _ = sender.send(Message::Close(Some(frame)));
        }
    }
}

impl PushSink for PushGateway {
    fn push(&self, connection_id: &str, frame: &OutboundFrame) -> Result<(), DeliveryError> {
        let text = frame
            .encode()
            .map_err(|e| DeliveryError::Encode(e.to_string()))?;

        let sent = match self.senders.get(connection_id) {
            Some(sender) => sender.send(Message::Text(text.into())).is_ok(),
            None => false,
        };

        if !sent {
            // Writer task is gone; drop the stale channel if one is left.
            self.senders
                .remove_if(connection_id, |_, sender| sender.is_closed());
            return Err(DeliveryError::Gone(connection_id.to_string()));
        }

        Ok(())
    }
}
