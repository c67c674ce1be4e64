use std::sync::Arc;

use axum::{extract::State, http::StatusCode, Json};
use serde_json::{json, Value};

use crate::state::AppState;

/// `GET /health`: reports whether the ping store can answer queries.
///
/// Runs `SELECT 1` against the DuckDB connection that backs the
/// `location_pings` table. `200` with `status: "ok"` when it succeeds,
/// `503` with `status: "degraded"` when it does not. The body always carries
/// the build version.
#[tracing::instrument(skip_all)]
pub async fn health(State(state): State<Arc<AppState>>) -> (StatusCode, Json<Value>) {
    let (code, status) = match state.db.ping().await {
        Ok(()) => (StatusCode::OK, "ok"),
        Err(e) => {
            tracing::error!(error = %e, "Ping store unreachable");
            (StatusCode::SERVICE_UNAVAILABLE, "degraded")
        }
    };
    (
        code,
        Json(json!({ "status": status, "version": env!("CARGO_PKG_VERSION") })),
    )
}
