//! Client-side chat state machine.
//!
//! Owns the local message list and connection status for one transaction.
//! It performs no I/O: the runner feeds it socket events and sends whatever
//! frames it returns.

use serde::{Deserialize, Serialize};

use super::SessionError;
use crate::db::models::UserRole;
use crate::ws::protocol::{ChatMessage, InboundFrame, OutboundFrame};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// A message as the view renders it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewMessage {
    pub id: String,
    pub sender_id: String,
    pub sender_name: String,
    pub sender_role: UserRole,
    pub content: String,
    pub timestamp: String,
    /// Always false: sends are never rendered before the server echo.
    #[serde(default)]
    pub is_pending: bool,
}

impl From<ChatMessage> for ViewMessage {
    fn from(message: ChatMessage) -> Self {
        Self {
            id: message.message_id,
            sender_id: message.sender_id,
            sender_name: message.sender_name,
            sender_role: message.sender_role,
            content: message.content,
            timestamp: message.created_at,
            is_pending: false,
        }
    }
}

/// Something the view may want to react to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Status(ConnectionStatus),
    /// The message list was replaced by a history page of this many messages.
    HistoryLoaded(usize),
    MessageReceived(ViewMessage),
    ServerError { code: u16, message: String },
}

#[derive(Debug, Clone)]
pub struct ChatSession {
    transaction_id: String,
    status: ConnectionStatus,
    messages: Vec<ViewMessage>,
}

impl ChatSession {
    pub fn new(transaction_id: impl Into<String>) -> Self {
        Self {
            transaction_id: transaction_id.into(),
            status: ConnectionStatus::Disconnected,
            messages: Vec::new(),
        }
    }

    pub fn transaction_id(&self) -> &str {
        &self.transaction_id
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn messages(&self) -> &[ViewMessage] {
        &self.messages
    }

    /// Record a status change. Returns an event only when the status moved.
    pub fn set_status(&mut self, status: ConnectionStatus) -> Option<SessionEvent> {
        if self.status == status {
            return None;
        }
        self.status = status;
        Some(SessionEvent::Status(status))
    }

    /// Mark the socket open and return the history request to send on it.
    pub fn on_open(&mut self) -> (Option<SessionEvent>, InboundFrame) {
        let event = self.set_status(ConnectionStatus::Connected);
        let request = InboundFrame::GetMessages {
            transaction_id: Some(self.transaction_id.clone()),
            limit: None,
        };
        (event, request)
    }

    /// Apply one server frame to the local state.
    pub fn apply_frame(&mut self, frame: OutboundFrame) -> Option<SessionEvent> {
        match frame {
            OutboundFrame::MessageHistory { data } => {
                let mut page: Vec<ViewMessage> = Vec::with_capacity(data.len());
                for message in data {
                    if !page.iter().any(|m| m.id == message.message_id) {
                        page.push(ViewMessage::from(message));
                    }
                }
                // Stable: equal timestamps keep server order.
                page.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
                self.messages = page;
                Some(SessionEvent::HistoryLoaded(self.messages.len()))
            }
            OutboundFrame::NewMessage { data } => {
                if self.messages.iter().any(|m| m.id == data.message_id) {
                    return None;
                }
                let message = ViewMessage::from(data);
                self.messages.push(message.clone());
                Some(SessionEvent::MessageReceived(message))
            }
            OutboundFrame::Error { code, message } => {
                Some(SessionEvent::ServerError { code, message })
            }
        }
    }

    /// Build the frame for a user send. Nothing is added to the local list;
    /// the message appears once the server echoes it back.
    pub fn prepare_send(&self, content: &str) -> Result<InboundFrame, SessionError> {
        if self.status != ConnectionStatus::Connected {
            return Err(SessionError::NotConnected);
        }
        if content.trim().is_empty() {
            return Err(SessionError::EmptyMessage);
        }
        Ok(InboundFrame::SendMessage {
            transaction_id: Some(self.transaction_id.clone()),
            content: Some(content.to_string()),
            client_token: Some(uuid::Uuid::new_v4().to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(id: &str, created_at: &str, content: &str) -> ChatMessage {
        ChatMessage {
            message_id: id.to_string(),
            sender_id: "u1".to_string(),
            sender_name: "Ana".to_string(),
            sender_role: UserRole::Broker,
            content: content.to_string(),
            created_at: created_at.to_string(),
        }
    }

    fn connected() -> ChatSession {
        let mut session = ChatSession::new("t1");
        session.on_open();
        session
    }

    #[test]
    fn test_open_requests_history_for_transaction() {
        let mut session = ChatSession::new("t1");
        let (event, frame) = session.on_open();

        assert_eq!(event, Some(SessionEvent::Status(ConnectionStatus::Connected)));
        assert_eq!(
            frame,
            InboundFrame::GetMessages {
                transaction_id: Some("t1".to_string()),
                limit: None,
            }
        );
    }

    #[test]
    fn test_echo_of_known_message_is_ignored() {
        let mut session = connected();
        let m1 = message("m1", "2026-05-01T09:00:00.000000Z", "hi");

        assert!(session
            .apply_frame(OutboundFrame::NewMessage { data: m1.clone() })
            .is_some());
        assert!(session
            .apply_frame(OutboundFrame::NewMessage { data: m1 })
            .is_none());
        assert_eq!(session.messages().len(), 1);
    }

    #[test]
    fn test_history_replaces_list_sorted_and_deduplicated() {
        let mut session = connected();
        session.apply_frame(OutboundFrame::NewMessage {
            data: message("old", "2026-05-01T08:00:00.000000Z", "stale"),
        });

        let event = session.apply_frame(OutboundFrame::MessageHistory {
            data: vec![
                message("m2", "2026-05-01T09:00:01.000000Z", "second"),
                message("m1", "2026-05-01T09:00:00.000000Z", "first"),
                message("m2", "2026-05-01T09:00:01.000000Z", "second"),
                message("m3", "2026-05-01T09:00:01.000000Z", "third"),
            ],
        });

        assert_eq!(event, Some(SessionEvent::HistoryLoaded(3)));
        let ids: Vec<&str> = session.messages().iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["m1", "m2", "m3"]);
        assert!(session.messages().iter().all(|m| !m.is_pending));
    }

    #[test]
    fn test_live_message_after_history_is_appended_once() {
        let mut session = connected();
        session.apply_frame(OutboundFrame::MessageHistory {
            data: vec![message("m1", "2026-05-01T09:00:00.000000Z", "first")],
        });
        session.apply_frame(OutboundFrame::NewMessage {
            data: message("m1", "2026-05-01T09:00:00.000000Z", "first"),
        });
        session.apply_frame(OutboundFrame::NewMessage {
            data: message("m2", "2026-05-01T09:00:02.000000Z", "second"),
        });

        let ids: Vec<&str> = session.messages().iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["m1", "m2"]);
    }

    #[test]
    fn test_error_frame_is_surfaced() {
        let mut session = connected();
        let event = session.apply_frame(OutboundFrame::Error {
            code: 404,
            message: "connection not found".to_string(),
        });
        assert_eq!(
            event,
            Some(SessionEvent::ServerError {
                code: 404,
                message: "connection not found".to_string(),
            })
        );
        assert!(session.messages().is_empty());
    }

    #[test]
    fn test_send_requires_connection() {
        let mut session = ChatSession::new("t1");
        assert_eq!(session.prepare_send("hello"), Err(SessionError::NotConnected));

        session.set_status(ConnectionStatus::Connecting);
        assert_eq!(session.prepare_send("hello"), Err(SessionError::NotConnected));
    }

    #[test]
    fn test_send_rejects_blank_content() {
        let session = connected();
        assert_eq!(session.prepare_send("  \n"), Err(SessionError::EmptyMessage));
    }

    #[test]
    fn test_send_adds_no_optimistic_row() {
        let session = connected();
        let frame = session.prepare_send("counter offer attached").unwrap();

        match frame {
            InboundFrame::SendMessage {
                transaction_id,
                content,
                client_token,
            } => {
                assert_eq!(transaction_id.as_deref(), Some("t1"));
                assert_eq!(content.as_deref(), Some("counter offer attached"));
                assert!(client_token.is_some());
            }
            other => panic!("Expected sendMessage, got {:?}", other),
        }
        assert!(session.messages().is_empty());
    }

    #[test]
    fn test_set_status_reports_changes_only() {
        let mut session = ChatSession::new("t1");
        assert_eq!(session.set_status(ConnectionStatus::Disconnected), None);
        assert_eq!(
            session.set_status(ConnectionStatus::Connecting),
            Some(SessionEvent::Status(ConnectionStatus::Connecting))
        );
    }
}
