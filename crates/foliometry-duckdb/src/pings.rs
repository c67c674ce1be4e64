use anyhow::Result;
use chrono::{Duration, SubsecRound, Utc};

use foliometry_core::ping::{LocationPing, NewPing, PingFilter};

use crate::backend::{from_db_timestamp, to_db_timestamp};
use crate::DuckDbBackend;

/// Column list shared by every ping read. Timestamps are cast to VARCHAR and
/// parsed in Rust.
pub(crate) const PING_COLUMNS: &str = "id, user_id, city, region, country, page, \
     CAST(ts AS VARCHAR), CAST(created_at AS VARCHAR)";

/// A raw `location_pings` row before timestamp parsing.
pub(crate) struct PingRow {
    id: String,
    user_id: Option<String>,
    city: String,
    region: String,
    country: String,
    page: String,
    ts: String,
    created_at: String,
}

impl PingRow {
    pub(crate) fn read(row: &duckdb::Row<'_>) -> duckdb::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            user_id: row.get(1)?,
            city: row.get(2)?,
            region: row.get(3)?,
            country: row.get(4)?,
            page: row.get(5)?,
            ts: row.get(6)?,
            created_at: row.get(7)?,
        })
    }

    pub(crate) fn into_ping(self) -> Result<LocationPing> {
        Ok(LocationPing {
            id: self.id,
            user_id: self.user_id,
            city: self.city,
            region: self.region,
            country: self.country,
            page: self.page,
            ts: from_db_timestamp(&self.ts)?,
            created_at: from_db_timestamp(&self.created_at)?,
        })
    }
}

impl DuckDbBackend {
    /// Insert one ping.
    ///
    /// `created_at` and `ts` each default to the insert time, so an insert
    /// that supplies neither stores identical values. Both are truncated to
    /// microseconds (the `TIMESTAMP` resolution) so the returned record
    /// equals what a later read yields.
    pub async fn insert_ping(&self, ping: NewPing) -> Result<LocationPing> {
        let now = Utc::now().trunc_subsecs(6);
        let created_at = ping.created_at.map(|t| t.trunc_subsecs(6)).unwrap_or(now);
        let ts = ping.ts.map(|t| t.trunc_subsecs(6)).unwrap_or(now);

        let stored = LocationPing {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: ping.user_id,
            city: ping.city,
            region: ping.region,
            country: ping.country,
            page: ping.page,
            ts,
            created_at,
        };

        let conn = self.conn.lock().await;
        conn.execute(
            r#"INSERT INTO location_pings (
                id, user_id, city, region, country, page, ts, created_at
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5, ?6, CAST(?7 AS TIMESTAMP), CAST(?8 AS TIMESTAMP)
            )"#,
            duckdb::params![
                stored.id,
                stored.user_id,
                stored.city,
                stored.region,
                stored.country,
                stored.page,
                to_db_timestamp(&stored.ts),
                to_db_timestamp(&stored.created_at),
            ],
        )?;

        tracing::debug!(ping_id = %stored.id, "Inserted location ping");
        Ok(stored)
    }

    pub async fn get_ping(&self, id: &str) -> Result<Option<LocationPing>> {
        let conn = self.conn.lock().await;
        let sql = format!("SELECT {PING_COLUMNS} FROM location_pings WHERE id = ?1");
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query_map(duckdb::params![id], PingRow::read)?;
        let first = rows.next().transpose()?;
        first.map(PingRow::into_ping).transpose()
    }

    /// Pings matching every set field of `filter`, newest `ts` first.
    pub async fn find_pings(&self, filter: &PingFilter) -> Result<Vec<LocationPing>> {
        let conn = self.conn.lock().await;

        let mut filter_sql = String::new();
        let mut params: Vec<Box<dyn duckdb::types::ToSql>> = Vec::new();
        let mut idx = 1;

        if let Some(ref city) = filter.city {
            filter_sql.push_str(&format!(" AND city = ?{}", idx));
            params.push(Box::new(city.clone()));
            idx += 1;
        }
        if let Some(ref country) = filter.country {
            filter_sql.push_str(&format!(" AND country = ?{}", idx));
            params.push(Box::new(country.clone()));
            idx += 1;
        }
        if let Some(ref page) = filter.page {
            filter_sql.push_str(&format!(" AND page = ?{}", idx));
            params.push(Box::new(page.clone()));
            idx += 1;
        }
        if let Some(ref user_id) = filter.user_id {
            filter_sql.push_str(&format!(" AND user_id = ?{}", idx));
            params.push(Box::new(user_id.clone()));
        }

        let sql = format!(
            "SELECT {PING_COLUMNS} FROM location_pings \
             WHERE 1 = 1{filter_sql} \
             ORDER BY ts DESC, id"
        );
        let param_refs: Vec<&dyn duckdb::types::ToSql> =
            params.iter().map(|p| p.as_ref()).collect();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(param_refs.as_slice(), PingRow::read)?;

        let mut pings = Vec::new();
        for row in rows {
            pings.push(row?.into_ping()?);
        }
        Ok(pings)
    }

    /// Count pings with `ts` inside the trailing `window`.
    pub async fn count_since(&self, city: Option<&str>, window: Duration) -> Result<i64> {
        let since = to_db_timestamp(&(Utc::now() - window));
        let conn = self.conn.lock().await;
        let count: i64 = match city {
            Some(city) => conn
                .prepare(
                    "SELECT COUNT(*) FROM location_pings \
                     WHERE ts >= CAST(?1 AS TIMESTAMP) AND city = ?2",
                )?
                .query_row(duckdb::params![since, city], |row| row.get(0))?,
            None => conn
                .prepare(
                    "SELECT COUNT(*) FROM location_pings \
                     WHERE ts >= CAST(?1 AS TIMESTAMP)",
                )?
                .query_row(duckdb::params![since], |row| row.get(0))?,
        };
        Ok(count)
    }
}
