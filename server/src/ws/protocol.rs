//! JSON wire protocol spoken over the chat socket.
//!
//! Inbound and outbound frames are tagged by an `action` field. Frame fields
//! are camelCase; the message payload keeps its snake_case keys.

use serde::{Deserialize, Serialize};

use crate::db::models::{MessageRecord, UserRole};

/// Handshake query parameters for `GET /ws`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectQuery {
    pub transaction_id: Option<String>,
    pub user_id: Option<String>,
    pub user_name: Option<String>,
    pub user_role: Option<String>,
}

/// Frames a client may send.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum InboundFrame {
    #[serde(rename_all = "camelCase")]
    SendMessage {
        #[serde(default)]
        transaction_id: Option<String>,
        #[serde(default)]
        content: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_token: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    GetMessages {
        #[serde(default)]
        transaction_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        limit: Option<u32>,
    },
}

/// Frames the server pushes down a connection.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum OutboundFrame {
    /// Chronological history page, sent only to the requester.
    MessageHistory { data: Vec<ChatMessage> },
    /// A newly appended message, sent to every live connection of the transaction.
    NewMessage { data: ChatMessage },
    Error { code: u16, message: String },
}

/// A chat message as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ChatMessage {
    pub message_id: String,
    pub sender_id: String,
    pub sender_name: String,
    pub sender_role: UserRole,
    pub content: String,
    pub created_at: String,
}

impl From<&MessageRecord> for ChatMessage {
    fn from(record: &MessageRecord) -> Self {
        Self {
            message_id: record.message_id.clone(),
            sender_id: record.sender_id.clone(),
            sender_name: record.sender_name.clone(),
            sender_role: record.sender_role,
            content: record.content.clone(),
            created_at: record.created_at.clone(),
        }
    }
}

impl InboundFrame {
    pub fn decode(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl OutboundFrame {
    pub fn decode(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Short name used in log fields.
    pub fn action(&self) -> &'static str {
        match self {
            OutboundFrame::MessageHistory { .. } => "messageHistory",
            OutboundFrame::NewMessage { .. } => "newMessage",
            OutboundFrame::Error { .. } => "error",
        }
    }
}
