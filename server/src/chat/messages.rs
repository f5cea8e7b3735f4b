//! Message log: append-only, per-transaction ordered chat history.
//!
//! Each row carries a `sort_key` of the form
//! `<created_at>#<sequence:012>#<message_id>`. `created_at` never moves
//! backwards within a transaction and `sequence` is assigned under the same
//! SQLite transaction as the insert, so key order is append order.

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, Row};

use crate::db::models::{MessageRecord, NewMessage};
use crate::db::{acquire, timestamp, DbPool};
use crate::error::ChatError;

/// Result of an append. `duplicate` is set when a retried send carried a
/// client token that was already persisted; `message` is then the original.
#[derive(Debug, Clone)]
pub struct Appended {
    pub message: MessageRecord,
    pub duplicate: bool,
}

const SELECT_COLUMNS: &str = "transaction_id, sort_key, message_id, sequence, sender_id, sender_name,
                              sender_role, content, created_at, client_token";

/// Validate and persist a new message.
pub fn append(
    db: &DbPool,
    message: &NewMessage,
    max_content_length: usize,
) -> Result<Appended, ChatError> {
    append_at(db, message, max_content_length, Utc::now())
}

pub(crate) fn append_at(
    db: &DbPool,
    message: &NewMessage,
    max_content_length: usize,
    now: DateTime<Utc>,
) -> Result<Appended, ChatError> {
    if message.transaction_id.trim().is_empty() {
        return Err(ChatError::validation("transactionId is required"));
    }
    if message.sender_id.trim().is_empty() {
        return Err(ChatError::validation("senderId is required"));
    }
    let content = message.content.trim();
    if content.is_empty() {
        return Err(ChatError::validation("content must not be empty"));
    }
    if content.chars().count() > max_content_length {
        return Err(ChatError::validation(format!(
            "content exceeds {} characters",
            max_content_length
        )));
    }
    let client_token = message
        .client_token
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty());

    let mut conn = acquire(db)?;
    let tx = conn.transaction()?;

    if let Some(token) = client_token {
        let existing = tx
            .query_row(
                &format!(
                    "SELECT {} FROM messages
                     WHERE transaction_id = ?1 AND sender_id = ?2 AND client_token = ?3",
                    SELECT_COLUMNS
                ),
                rusqlite::params![message.transaction_id, message.sender_id, token],
                message_from_row,
            )
            .optional()?;
        if let Some(existing) = existing {
            tracing::debug!(
                transaction_id = %message.transaction_id,
                message_id = %existing.message_id,
                "Duplicate send ignored"
            );
            return Ok(Appended {
                message: existing,
                duplicate: true,
            });
        }
    }

    let previous: Option<(i64, String)> = tx
        .query_row(
            "SELECT sequence, created_at FROM messages
             WHERE transaction_id = ?1
             ORDER BY sequence DESC
             LIMIT 1",
            rusqlite::params![message.transaction_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    let mut created_at = timestamp(now);
    let mut sequence = 1;
    if let Some((last_sequence, last_created_at)) = previous {
        sequence = last_sequence + 1;
        // Clock went backwards or collided: keep history monotonic.
        if last_created_at > created_at {
            created_at = last_created_at;
        }
    }

    let message_id = uuid::Uuid::new_v4().to_string();
    let record = MessageRecord {
        transaction_id: message.transaction_id.clone(),
        sort_key: format!("{}#{:012}#{}", created_at, sequence, message_id),
        message_id,
        sequence,
        sender_id: message.sender_id.clone(),
        sender_name: message.sender_name.clone(),
        sender_role: message.sender_role,
        content: content.to_string(),
        created_at,
        client_token: client_token.map(str::to_string),
    };

    tx.execute(
        "INSERT INTO messages (transaction_id, sort_key, message_id, sequence, sender_id, sender_name,
                               sender_role, content, created_at, client_token)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        rusqlite::params![
            record.transaction_id,
            record.sort_key,
            record.message_id,
            record.sequence,
            record.sender_id,
            record.sender_name,
            record.sender_role.as_str(),
            record.content,
            record.created_at,
            record.client_token,
        ],
    )?;
    tx.commit()?;

    Ok(Appended {
        message: record,
        duplicate: false,
    })
}

/// Up to `limit` messages for a transaction, newest first.
pub fn list_recent(
    db: &DbPool,
    transaction_id: &str,
    limit: u32,
) -> Result<Vec<MessageRecord>, ChatError> {
    let conn = acquire(db)?;
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM messages
         WHERE transaction_id = ?1
         ORDER BY sort_key DESC
         LIMIT ?2",
        SELECT_COLUMNS
    ))?;
    let rows = stmt
        .query_map(
            rusqlite::params![transaction_id, i64::from(limit)],
            message_from_row,
        )?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<MessageRecord> {
    Ok(MessageRecord {
        transaction_id: row.get(0)?,
        sort_key: row.get(1)?,
        message_id: row.get(2)?,
        sequence: row.get(3)?,
        sender_id: row.get(4)?,
        sender_name: row.get(5)?,
        sender_role: row.get(6)?,
        content: row.get(7)?,
        created_at: row.get(8)?,
        client_token: row.get(9)?,
    })
}
