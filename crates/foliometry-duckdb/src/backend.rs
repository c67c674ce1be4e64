use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use duckdb::Connection;
use tokio::sync::Mutex;
use tracing::info;

use foliometry_core::ping::PING_TTL_SECONDS;

use crate::schema::init_sql;

/// Schema version recorded in the `settings` table.
const SCHEMA_VERSION: &str = "1";

/// A DuckDB backend for location pings.
///
/// DuckDB is single-writer: concurrent reads are fine, but concurrent writes
/// cause contention. The connection lives behind `Arc<Mutex<_>>` so every
/// statement is serialised while the struct stays cheap to share across
/// Axum handlers. Each insert is a single-row statement, so a failed write
/// leaves nothing behind.
pub struct DuckDbBackend {
    pub(crate) conn: Arc<Mutex<Connection>>,
}

impl DuckDbBackend {
    /// Open (or create) a DuckDB database file at `path`.
    ///
    /// `memory_limit` is a DuckDB size string such as `"1GB"` or `"512MB"`.
    /// Runs the schema init SQL so all tables and indexes exist, then seeds
    /// the `settings` table.
    pub fn open(path: &str, memory_limit: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(&init_sql(memory_limit))?;
        Self::seed_settings_sync(&conn)?;
        info!(
            "DuckDB opened at {} with memory_limit={}, threads=2",
            path, memory_limit
        );
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an **in-memory** DuckDB database.
    ///
    /// Intended for tests only; data is discarded when the struct is dropped.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(&init_sql("1GB"))?;
        Self::seed_settings_sync(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Seed the `settings` table.
    ///
    /// `version` is only written once. `ping_ttl_seconds` is rewritten on
    /// every open so the stored value always matches [`PING_TTL_SECONDS`].
    fn seed_settings_sync(conn: &Connection) -> Result<()> {
        conn.execute(
            "INSERT OR IGNORE INTO settings (key, value) VALUES ('version', ?1)",
            duckdb::params![SCHEMA_VERSION],
        )?;
        conn.execute(
            "INSERT INTO settings (key, value) VALUES ('ping_ttl_seconds', ?1) \
             ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value",
            duckdb::params![PING_TTL_SECONDS.to_string()],
        )?;
        Ok(())
    }

    /// Execute `SELECT 1` as a lightweight liveness check.
    ///
    /// Called by the `/health` endpoint.
    pub async fn ping(&self) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute_batch("SELECT 1")?;
        Ok(())
    }

    /// Acquire the DuckDB connection lock for direct queries.
    ///
    /// Intended for integration tests that need to verify stored data.
    /// Production code should use the typed methods.
    pub async fn conn_for_test(&self) -> tokio::sync::MutexGuard<'_, Connection> {
        self.conn.lock().await
    }
}

/// Format a timestamp the way it is bound into `TIMESTAMP` columns.
pub(crate) fn to_db_timestamp(ts: &DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M:%S%.6f").to_string()
}

/// Parse the output of `CAST(<timestamp> AS VARCHAR)`.
///
/// DuckDB omits the fractional part when it is zero.
pub(crate) fn from_db_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f")
        .with_context(|| format!("invalid timestamp from DuckDB: {raw}"))?;
    Ok(naive.and_utc())
}
