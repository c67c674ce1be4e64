use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};

use foliometry_core::ping::PING_TTL_SECONDS;

use crate::backend::to_db_timestamp;
use crate::DuckDbBackend;

impl DuckDbBackend {
    /// Delete pings whose `created_at` is older than [`PING_TTL_SECONDS`]
    /// before `now`.
    ///
    /// DuckDB has no expiring index, so this is the store's retention
    /// mechanism. It is called from the server's background sweep only.
    pub async fn purge_expired_pings(&self, now: DateTime<Utc>) -> Result<usize> {
        let cutoff = to_db_timestamp(&(now - Duration::seconds(PING_TTL_SECONDS)));
        let conn = self.conn.lock().await;
        let deleted = conn.execute(
            "DELETE FROM location_pings WHERE created_at < CAST(?1 AS TIMESTAMP)",
            duckdb::params![cutoff],
        )?;
        if deleted > 0 {
            tracing::info!(deleted, "Expired location pings purged");
        }
        Ok(deleted)
    }

    /// Retention window as recorded in the `settings` table.
    pub async fn ping_ttl_seconds(&self) -> Result<i64> {
        let conn = self.conn.lock().await;
        let raw: String = conn
            .prepare("SELECT value FROM settings WHERE key = 'ping_ttl_seconds'")?
            .query_row([], |row| row.get(0))?;
        raw.parse()
            .with_context(|| format!("invalid ping_ttl_seconds setting: {raw}"))
    }
}
