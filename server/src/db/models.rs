/// Database row types.
/// These correspond 1:1 to the SQLite schema defined in migrations.rs.
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ValueRef};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Role of a chat participant within a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    #[default]
    Client,
    Agent,
    Broker,
    System,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Client => "client",
            Self::Agent => "agent",
            Self::Broker => "broker",
            Self::System => "system",
        }
    }
}

impl FromStr for UserRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "client" => Ok(Self::Client),
            "agent" => Ok(Self::Agent),
            "broker" => Ok(Self::Broker),
            "system" => Ok(Self::System),
            other => Err(format!("unknown user role '{}'", other)),
        }
    }
}

/// Stored roles must parse; a corrupt value is a storage error, not a client.
impl FromSql for UserRole {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: String| FromSqlError::Other(e.into()))
    }
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Live socket row in the connections table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionRecord {
    pub connection_id: String,
    pub transaction_id: String,
    pub user_id: String,
    pub user_name: String,
    pub user_role: UserRole,
    pub connected_at: String,
    pub expires_at: String,
}

/// Input for registering a freshly opened socket
#[derive(Debug, Clone)]
pub struct NewConnection {
    pub connection_id: String,
    pub transaction_id: String,
    pub user_id: String,
    pub user_name: String,
    pub user_role: UserRole,
}

/// Persisted chat line in the messages table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRecord {
    pub transaction_id: String,
    pub sort_key: String,
    pub message_id: String,
    pub sequence: i64,
    pub sender_id: String,
    pub sender_name: String,
    pub sender_role: UserRole,
    pub content: String,
    pub created_at: String,
    pub client_token: Option<String>,
}

/// Input for appending to the message log
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub transaction_id: String,
    pub sender_id: String,
    pub sender_name: String,
    pub sender_role: UserRole,
    pub content: String,
    pub client_token: Option<String>,
}
