use std::sync::Arc;

use axum::{
    http::HeaderValue,
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};

use crate::{routes, state::AppState};

/// Construct the Axum [`Router`] with all routes and middleware attached.
///
/// Middleware is applied in outer-to-inner order (outermost runs first on
/// request, last on response):
///
/// 1. `TraceLayer`: structured request/response logging via `tracing`.
/// 2. `CorsLayer`: the portfolio frontend calls the telemetry endpoints
///    cross-origin. `FOLIOMETRY_CORS_ORIGINS` narrows the allowed origins;
///    empty means any.
///
/// Peer addresses are only available when the router is served with
/// `into_make_service_with_connect_info::<SocketAddr>()`.
pub fn build_app(state: Arc<AppState>) -> Router {
    let cors = cors_layer(&state.config.cors_origins);

    Router::new()
        .route("/health", get(routes::health::health))
        .route("/api/telemetry/visit", post(routes::telemetry::visit))
        .route(
            "/api/telemetry/stats/city-7d",
            get(routes::telemetry::city_stats_7d),
        )
        .route(
            "/api/telemetry/stats/cities",
            get(routes::telemetry::city_stats),
        )
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    if allowed.is_empty() {
        layer.allow_origin(Any)
    } else {
        layer.allow_origin(AllowOrigin::list(allowed))
    }
}
