use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use foliometry_core::ping::{CityCount, LocationPing, NewPing, PingFilter};
use foliometry_core::store::PingStore;

use crate::DuckDbBackend;

#[async_trait]
impl PingStore for DuckDbBackend {
    async fn insert_ping(&self, ping: NewPing) -> anyhow::Result<LocationPing> {
        DuckDbBackend::insert_ping(self, ping).await
    }

    async fn get_ping(&self, id: &str) -> anyhow::Result<Option<LocationPing>> {
        DuckDbBackend::get_ping(self, id).await
    }

    async fn find_pings(&self, filter: &PingFilter) -> anyhow::Result<Vec<LocationPing>> {
        DuckDbBackend::find_pings(self, filter).await
    }

    async fn count_since(&self, city: Option<&str>, window: Duration) -> anyhow::Result<i64> {
        DuckDbBackend::count_since(self, city, window).await
    }

    async fn top_cities(&self, window: Duration, limit: usize) -> anyhow::Result<Vec<CityCount>> {
        DuckDbBackend::get_top_cities(self, window, limit).await
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> anyhow::Result<usize> {
        self.purge_expired_pings(now).await
    }

    async fn ttl_seconds(&self) -> anyhow::Result<i64> {
        self.ping_ttl_seconds().await
    }
}
