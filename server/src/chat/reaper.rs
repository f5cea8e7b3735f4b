//! Background sweep of expired registry rows.
//!
//! Sockets that vanish without a disconnect event leave rows behind. Fan-out
//! prunes them lazily when a push fails; this task catches the ones in quiet
//! transactions that never see another message.

use crate::chat::registry;
use crate::db::DbPool;

/// Spawn a task that removes expired connections every `interval_secs` seconds.
pub fn spawn_expired_connection_sweep(db: DbPool, interval_secs: u64) {
    let interval = std::time::Duration::from_secs(interval_secs.max(1));

    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;

            let db_clone = db.clone();
            match tokio::task::spawn_blocking(move || registry::purge_expired(&db_clone)).await {
                Ok(Ok(count)) => {
                    if count > 0 {
                        tracing::info!("Connection sweep: removed {} expired connections", count);
                    } else {
                        tracing::debug!("Connection sweep: no expired connections");
                    }
                }
                Ok(Err(e)) => {
                    tracing::error!("Connection sweep error: {}", e);
                }
                Err(e) => {
                    tracing::error!("Connection sweep task join error: {}", e);
                }
            }
        }
    });
}
