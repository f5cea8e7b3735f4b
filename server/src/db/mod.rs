pub mod migrations;
pub mod models;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::ChatError;

/// Type alias for the shared database connection.
/// rusqlite is synchronous, so callers hop onto `spawn_blocking`
/// before taking the lock.
pub type DbPool = Arc<Mutex<Connection>>;

/// Initialize the SQLite database: create the data directory if needed,
/// open (or create) the database file, enable WAL mode, and run migrations.
pub fn init_db(data_dir: &str) -> Result<DbPool, Box<dyn std::error::Error>> {
    std::fs::create_dir_all(data_dir)?;

    let db_path = Path::new(data_dir).join("dealroom.db");
    let mut conn = Connection::open(&db_path)?;

    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    migrations::migrations().to_latest(&mut conn)?;

    tracing::info!("Database initialized at {}", db_path.display());

    Ok(Arc::new(Mutex::new(conn)))
}

/// Take the connection lock, mapping poisoning into a chat error.
pub fn acquire(db: &DbPool) -> Result<MutexGuard<'_, Connection>, ChatError> {
    db.lock()
        .map_err(|e| ChatError::Internal(format!("DB lock error: {}", e)))
}

/// Fixed-width RFC 3339 timestamp (microseconds, `Z` suffix).
/// Lexicographic order of these strings equals chronological order.
pub fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Open a migrated in-memory database. Used by unit tests and tooling
/// that needs a throwaway store.
pub fn init_memory_db() -> Result<DbPool, Box<dyn std::error::Error>> {
    let mut conn = Connection::open_in_memory()?;
    migrations::migrations().to_latest(&mut conn)?;
    Ok(Arc::new(Mutex::new(conn)))
}
