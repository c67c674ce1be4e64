use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Retention window for location pings: 15 days.
pub const PING_TTL_SECONDS: i64 = 60 * 60 * 24 * 15;

/// Page recorded when a visit does not name one.
pub const DEFAULT_VISIT_PAGE: &str = "/visit";

/// One tracked page visit with city-level geolocation.
///
/// The client address is never part of this record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationPing {
    pub id: String,
    /// Authenticated principal, `None` for anonymous visits. Informational only.
    pub user_id: Option<String>,
    pub city: String,
    pub region: String,
    pub country: String,
    pub page: String,
    /// Business timestamp of the visit.
    pub ts: DateTime<Utc>,
    /// Storage time. Drives retention and is never rewritten.
    pub created_at: DateTime<Utc>,
}

/// Insert request for the ping store.
///
/// `created_at` defaults to the insert time and `ts` defaults to `created_at`.
#[derive(Debug, Clone, Default)]
pub struct NewPing {
    pub user_id: Option<String>,
    pub city: String,
    pub region: String,
    pub country: String,
    pub page: String,
    pub ts: Option<DateTime<Utc>>,
    pub created_at: Option<DateTime<Utc>>,
}

/// Equality filters for [`crate::store::PingStore::find_pings`].
#[derive(Debug, Clone, Default)]
pub struct PingFilter {
    pub city: Option<String>,
    pub country: Option<String>,
    pub page: Option<String>,
    pub user_id: Option<String>,
}

impl PingFilter {
    pub fn city(city: impl Into<String>) -> Self {
        Self {
            city: Some(city.into()),
            ..Self::default()
        }
    }
}

/// One row of the top-cities aggregation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CityCount {
    pub city: String,
    pub country: String,
    pub count: i64,
}
