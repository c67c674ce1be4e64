use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use foliometry_core::{
    ping::{LocationPing, NewPing, DEFAULT_VISIT_PAGE},
    store::PingStore,
};

use crate::geo::GeoResolver;

pub const VISIT_STORED_MESSAGE: &str = "Telemetry stored";

/// Body of `POST /api/telemetry/visit`. Unknown keys are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct VisitPayload {
    pub page: Option<String>,
}

/// Acknowledgement returned for a stored visit.
///
/// Has no address field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VisitReceipt {
    pub message: String,
    pub city: String,
    pub region: String,
    pub country: String,
    pub page: String,
    pub ts: DateTime<Utc>,
}

impl From<LocationPing> for VisitReceipt {
    fn from(ping: LocationPing) -> Self {
        Self {
            message: VISIT_STORED_MESSAGE.to_string(),
            city: ping.city,
            region: ping.region,
            country: ping.country,
            page: ping.page,
            ts: ping.ts,
        }
    }
}

/// Resolve, store and acknowledge one visit.
///
/// Geolocation finishes before the single insert, so any failure leaves the
/// store untouched. `client_ip` is dropped once resolved.
pub async fn record_visit(
    resolver: &GeoResolver,
    store: &dyn PingStore,
    client_ip: &str,
    principal_id: Option<String>,
    page: Option<String>,
) -> anyhow::Result<VisitReceipt> {
    let geo = resolver.resolve(client_ip).await?;

    let page = page
        .filter(|p| !p.is_empty())
        .unwrap_or_else(|| DEFAULT_VISIT_PAGE.to_string());

    let ping = store
        .insert_ping(NewPing {
            user_id: principal_id,
            city: geo.city,
            region: geo.region,
            country: geo.country,
            page,
            ts: None,
            created_at: None,
        })
        .await?;

    Ok(VisitReceipt::from(ping))
}
