/// DuckDB initialization SQL.
///
/// Executed once at database open time via `Connection::execute_batch`.
/// All statements use `IF NOT EXISTS` so they are safe to re-run on every
/// startup.
///
/// `memory_limit` comes from `Config.duckdb_memory_limit`
/// (env `FOLIOMETRY_DUCKDB_MEMORY`, default `"1GB"`). Always set it
/// explicitly: the DuckDB default is 80% of system RAM.
///
/// Timestamps are `TIMESTAMP` (UTC, microsecond resolution). There is no
/// TTL index in DuckDB; `idx_location_pings_created_at` backs the retention
/// sweep in `retention.rs`.
pub fn init_sql(memory_limit: &str) -> String {
    format!(
        r#"SET memory_limit = '{memory_limit}';
SET threads = 2;

-- ===========================================
-- SETTINGS
-- ===========================================
-- Keys stored in this table:
--   'version'          – Database schema version
--   'ping_ttl_seconds' – Retention window for location_pings (rewritten at every open)
CREATE TABLE IF NOT EXISTS settings (
    key             VARCHAR PRIMARY KEY,
    value           VARCHAR NOT NULL
);

-- ===========================================
-- LOCATION PINGS (one row per tracked page visit)
-- ===========================================
-- No client address column: addresses are resolved to city level and dropped.
CREATE TABLE IF NOT EXISTS location_pings (
    id              VARCHAR PRIMARY KEY,           -- UUID v4
    user_id         VARCHAR,                       -- NULL for anonymous visits
    city            VARCHAR NOT NULL,              -- resolved value or 'Unknown'
    region          VARCHAR NOT NULL,
    country         VARCHAR NOT NULL,
    page            VARCHAR NOT NULL,
    ts              TIMESTAMP NOT NULL,            -- business timestamp
    created_at      TIMESTAMP NOT NULL             -- storage time, drives retention
);
CREATE INDEX IF NOT EXISTS idx_location_pings_user       ON location_pings(user_id);
CREATE INDEX IF NOT EXISTS idx_location_pings_ts         ON location_pings(ts);
CREATE INDEX IF NOT EXISTS idx_location_pings_created_at ON location_pings(created_at);
"#
    )
}
