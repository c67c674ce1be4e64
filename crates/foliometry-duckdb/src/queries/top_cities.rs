use anyhow::Result;
use chrono::{Duration, Utc};

use foliometry_core::ping::CityCount;

use crate::backend::to_db_timestamp;
use crate::DuckDbBackend;

pub(crate) async fn get_top_cities_inner(
    db: &DuckDbBackend,
    window: Duration,
    limit: usize,
) -> Result<Vec<CityCount>> {
    let since = to_db_timestamp(&(Utc::now() - window));
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);

    let conn = db.conn.lock().await;
    // Group on the (city, country) pair: the same city name exists in
    // several countries. Ties on count come back in whatever order DuckDB
    // produces.
    let mut stmt = conn.prepare(
        "SELECT city, country, COUNT(*) AS count \
         FROM location_pings \
         WHERE ts >= CAST(?1 AS TIMESTAMP) \
         GROUP BY city, country \
         ORDER BY count DESC \
         LIMIT ?2",
    )?;

    let rows = stmt.query_map(duckdb::params![since, limit], |row| {
        Ok(CityCount {
            city: row.get(0)?,
            country: row.get(1)?,
            count: row.get(2)?,
        })
    })?;

    let mut cities = Vec::new();
    for row in rows {
        cities.push(row?);
    }
    Ok(cities)
}

impl DuckDbBackend {
    /// Most visited `(city, country)` pairs with `ts` inside the trailing
    /// `window`, highest count first.
    pub async fn get_top_cities(&self, window: Duration, limit: usize) -> Result<Vec<CityCount>> {
        get_top_cities_inner(self, window, limit).await
    }
}
