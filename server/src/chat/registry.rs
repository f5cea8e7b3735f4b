//! Connection registry: durable record of which live sockets belong to
//! which transaction.
//!
//! Every fan-out re-reads this table, nothing caches membership in memory.
//! Rows leave the table on graceful disconnect, when a push reports the
//! socket gone, or when the reaper finds them past `expires_at`.

use chrono::{DateTime, TimeDelta, Utc};
use rusqlite::{OptionalExtension, Row};

use crate::db::models::{ConnectionRecord, NewConnection};
use crate::db::{acquire, timestamp, DbPool};
use crate::error::ChatError;

/// Insert (or replace) the row for a connection.
pub fn register(
    db: &DbPool,
    connection: &NewConnection,
    ttl_secs: u64,
) -> Result<ConnectionRecord, ChatError> {
    register_at(db, connection, ttl_secs, Utc::now())
}

pub(crate) fn register_at(
    db: &DbPool,
    connection: &NewConnection,
    ttl_secs: u64,
    now: DateTime<Utc>,
) -> Result<ConnectionRecord, ChatError> {
    if connection.transaction_id.trim().is_empty() {
        return Err(ChatError::validation("transactionId is required"));
    }
    if connection.user_id.trim().is_empty() {
        return Err(ChatError::validation("userId is required"));
    }

    let expires_at = i64::try_from(ttl_secs)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .and_then(|ttl| now.checked_add_signed(ttl))
        .ok_or_else(|| {
            ChatError::validation(format!("connection ttl of {}s is out of range", ttl_secs))
        })?;
    let record = ConnectionRecord {
        connection_id: connection.connection_id.clone(),
        transaction_id: connection.transaction_id.clone(),
        user_id: connection.user_id.clone(),
        user_name: connection.user_name.clone(),
        user_role: connection.user_role,
        connected_at: timestamp(now),
        expires_at: timestamp(expires_at),
    };

    let conn = acquire(db)?;
    conn.execute(
        "INSERT OR REPLACE INTO connections
            (connection_id, transaction_id, user_id, user_name, user_role, connected_at, expires_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        rusqlite::params![
            record.connection_id,
            record.transaction_id,
            record.user_id,
            record.user_name,
            record.user_role.as_str(),
            record.connected_at,
            record.expires_at,
        ],
    )?;

    tracing::debug!(
        connection_id = %record.connection_id,
        transaction_id = %record.transaction_id,
        user_id = %record.user_id,
        "Connection registered"
    );

    Ok(record)
}

/// Delete the row for a connection. Returns whether a row was removed;
/// an absent row is not an error.
pub fn unregister(db: &DbPool, connection_id: &str) -> Result<bool, ChatError> {
    let conn = acquire(db)?;
    let removed = conn.execute(
        "DELETE FROM connections WHERE connection_id = ?1",
        rusqlite::params![connection_id],
    )?;

    tracing::debug!(
        connection_id = %connection_id,
        removed = removed > 0,
        "Connection unregistered"
    );

    Ok(removed > 0)
}

/// Resolve a single socket. Expired rows count as absent.
pub fn lookup_by_socket(
    db: &DbPool,
    connection_id: &str,
) -> Result<Option<ConnectionRecord>, ChatError> {
    lookup_by_socket_at(db, connection_id, Utc::now())
}

pub(crate) fn lookup_by_socket_at(
    db: &DbPool,
    connection_id: &str,
    now: DateTime<Utc>,
) -> Result<Option<ConnectionRecord>, ChatError> {
    let conn = acquire(db)?;
    let record = conn
        .query_row(
            "SELECT connection_id, transaction_id, user_id, user_name, user_role, connected_at, expires_at
             FROM connections
             WHERE connection_id = ?1 AND expires_at > ?2",
            rusqlite::params![connection_id, timestamp(now)],
            connection_from_row,
        )
        .optional()?;
    Ok(record)
}

/// All live connections for a transaction, in no particular order.
pub fn list_by_transaction(
    db: &DbPool,
    transaction_id: &str,
) -> Result<Vec<ConnectionRecord>, ChatError> {
    list_by_transaction_at(db, transaction_id, Utc::now())
}

pub(crate) fn list_by_transaction_at(
    db: &DbPool,
    transaction_id: &str,
    now: DateTime<Utc>,
) -> Result<Vec<ConnectionRecord>, ChatError> {
    let conn = acquire(db)?;
    let mut stmt = conn.prepare(
        "SELECT connection_id, transaction_id, user_id, user_name, user_role, connected_at, expires_at
         FROM connections
         WHERE transaction_id = ?1 AND expires_at > ?2",
    )?;
    let rows = stmt
        .query_map(
            rusqlite::params![transaction_id, timestamp(now)],
            connection_from_row,
        )?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Delete rows whose TTL has passed. Returns the number removed.
pub fn purge_expired(db: &DbPool) -> Result<usize, ChatError> {
    purge_expired_at(db, Utc::now())
}

pub(crate) fn purge_expired_at(db: &DbPool, now: DateTime<Utc>) -> Result<usize, ChatError> {
    let conn = acquire(db)?;
    let removed = conn.execute(
        "DELETE FROM connections WHERE expires_at <= ?1",
        rusqlite::params![timestamp(now)],
    )?;
    Ok(removed)
}

fn connection_from_row(row: &Row<'_>) -> rusqlite::Result<ConnectionRecord> {
    Ok(ConnectionRecord {
        connection_id: row.get(0)?,
        transaction_id: row.get(1)?,
        user_id: row.get(2)?,
        user_name: row.get(3)?,
        user_role: row.get(4)?,
        connected_at: row.get(5)?,
        expires_at: row.get(6)?,
    })
}
