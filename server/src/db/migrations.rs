use rusqlite_migration::{Migrations, M};

/// Define all schema migrations.
/// Uses SQLite user_version pragma for tracking, no migration table needed.
pub fn migrations() -> Migrations<'static> {
    Migrations::new(vec![
        M::up(
            "-- Migration 1: transaction chat core

CREATE TABLE connections (
    connection_id TEXT PRIMARY KEY,
    transaction_id TEXT NOT NULL,
    user_id TEXT NOT NULL,
    user_name TEXT NOT NULL,
    user_role TEXT NOT NULL,
    connected_at TEXT NOT NULL,
    expires_at TEXT NOT NULL
);

CREATE INDEX idx_connections_transaction ON connections(transaction_id);
CREATE INDEX idx_connections_expires ON connections(expires_at);

CREATE TABLE messages (
    transaction_id TEXT NOT NULL,
    sort_key TEXT NOT NULL,
    message_id TEXT NOT NULL UNIQUE,
    sequence INTEGER NOT NULL,
    sender_id TEXT NOT NULL,
    sender_name TEXT NOT NULL,
    sender_role TEXT NOT NULL,
    content TEXT NOT NULL,
    created_at TEXT NOT NULL,
    client_token TEXT,
    PRIMARY KEY (transaction_id, sort_key)
);

CREATE UNIQUE INDEX idx_messages_sequence ON messages(transaction_id, sequence);
CREATE UNIQUE INDEX idx_messages_client_token
    ON messages(transaction_id, sender_id, client_token)
    WHERE client_token IS NOT NULL;
",
        ),
    ])
}
