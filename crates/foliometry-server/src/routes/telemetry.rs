use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{rejection::QueryRejection, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::Duration;
use serde::Deserialize;

use foliometry_core::ping::{CityCount, PING_TTL_SECONDS};

use crate::{
    auth::OptionalPrincipal,
    client_ip::{extract_client_ip, MaybeConnectInfo},
    error::AppError,
    ingest::{record_visit, VisitPayload},
    state::AppState,
};

/// Default trailing window for city stats.
pub const DEFAULT_WINDOW_DAYS: i64 = 7;
/// Default number of cities returned.
pub const DEFAULT_CITY_LIMIT: usize = 10;
const MAX_CITY_LIMIT: usize = 100;
/// Nothing older than the retention window survives, so larger windows add nothing.
const MAX_WINDOW_DAYS: i64 = PING_TTL_SECONDS / 86_400;

/// `POST /api/telemetry/visit`: record one page visit.
///
/// Called by the frontend once cookie consent is given. The body is optional;
/// `{ "page": "/dashboard" }` names the page, otherwise `/visit` is stored.
///
/// ## Response
/// `201 Created` with `{ message, city, region, country, page, ts }`. The
/// client address is never echoed, on success or failure.
#[tracing::instrument(skip_all)]
pub async fn visit(
    State(state): State<Arc<AppState>>,
    MaybeConnectInfo(peer): MaybeConnectInfo,
    principal: OptionalPrincipal,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    let payload = parse_visit_payload(&body)?;
    let client_ip = extract_client_ip(&headers, peer, state.config.trust_proxy);

    let receipt = record_visit(
        &state.resolver,
        state.pings.as_ref(),
        &client_ip,
        principal.0,
        payload.page,
    )
    .await
    .map_err(AppError::Internal)?;

    Ok((StatusCode::CREATED, Json(receipt)))
}

/// `GET /api/telemetry/stats/city-7d`: top 10 cities over the last 7 days.
#[tracing::instrument(skip(state))]
pub async fn city_stats_7d(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<CityCount>>, AppError> {
    let rows = state
        .pings
        .top_cities(Duration::days(DEFAULT_WINDOW_DAYS), DEFAULT_CITY_LIMIT)
        .await
        .map_err(AppError::Internal)?;
    Ok(Json(rows))
}

#[derive(Debug, Deserialize)]
pub struct CityStatsQuery {
    pub days: Option<i64>,
    pub limit: Option<usize>,
}

/// `GET /api/telemetry/stats/cities?days=&limit=`: top cities over a
/// caller-chosen trailing window.
///
/// `days` is clamped to 1..=15 and `limit` to 1..=100. Non-numeric or
/// negative values are a 400.
#[tracing::instrument(skip_all)]
pub async fn city_stats(
    State(state): State<Arc<AppState>>,
    query: Result<Query<CityStatsQuery>, QueryRejection>,
) -> Result<Json<Vec<CityCount>>, AppError> {
    let Query(query) =
        query.map_err(|e| AppError::BadRequest(format!("invalid query: {}", e.body_text())))?;
    let days = query
        .days
        .unwrap_or(DEFAULT_WINDOW_DAYS)
        .clamp(1, MAX_WINDOW_DAYS);
    let limit = query
        .limit
        .unwrap_or(DEFAULT_CITY_LIMIT)
        .clamp(1, MAX_CITY_LIMIT);

    let rows = state
        .pings
        .top_cities(Duration::days(days), limit)
        .await
        .map_err(AppError::Internal)?;
    Ok(Json(rows))
}

/// An empty body means "no fields"; anything else must be a JSON object.
fn parse_visit_payload(body: &[u8]) -> Result<VisitPayload, AppError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(VisitPayload::default());
    }
    serde_json::from_slice(body)
        .map_err(|e| AppError::BadRequest(format!("invalid visit body: {e}")))
}
