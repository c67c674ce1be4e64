//! Ping store abstraction.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::ping::{CityCount, LocationPing, NewPing, PingFilter};

/// Append-only storage for [`LocationPing`] records with automatic expiry.
///
/// Application code only inserts and reads. Expired rows are removed by
/// [`PingStore::purge_expired`], which is driven by a background sweep and
/// never by request handling.
#[async_trait]
pub trait PingStore: Send + Sync + 'static {
    /// Store a new ping and return it with its generated id and timestamps.
    async fn insert_ping(&self, ping: NewPing) -> anyhow::Result<LocationPing>;

    async fn get_ping(&self, id: &str) -> anyhow::Result<Option<LocationPing>>;

    /// Pings matching every set field of `filter`, newest `ts` first.
    async fn find_pings(&self, filter: &PingFilter) -> anyhow::Result<Vec<LocationPing>>;

    /// Number of pings whose `ts` falls in the trailing `window`, optionally
    /// restricted to one city.
    async fn count_since(&self, city: Option<&str>, window: Duration) -> anyhow::Result<i64>;

    /// Most visited `(city, country)` pairs in the trailing `window`, by
    /// count descending. Tie order is unspecified.
    async fn top_cities(&self, window: Duration, limit: usize) -> anyhow::Result<Vec<CityCount>>;

    /// Delete pings whose `created_at` is older than the retention window
    /// relative to `now`. Returns the number of rows removed.
    async fn purge_expired(&self, now: DateTime<Utc>) -> anyhow::Result<usize>;

    /// Configured retention window in seconds.
    async fn ttl_seconds(&self) -> anyhow::Result<i64>;
}
