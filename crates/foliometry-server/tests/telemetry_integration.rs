use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration as StdDuration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{Request, StatusCode};
use chrono::{DateTime, Duration, Utc};
use http_body_util::BodyExt;
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::{json, Value};
use tower::ServiceExt;

use foliometry_core::config::{Config, Environment};
use foliometry_core::geo::GeoHint;
use foliometry_core::ping::{CityCount, LocationPing, NewPing, PingFilter};
use foliometry_core::store::PingStore;
use foliometry_duckdb::DuckDbBackend;
use foliometry_server::app::build_app;
use foliometry_server::auth::jwt::Claims;
use foliometry_server::geo::{
    FallbackPolicy, FallbackRecord, GeoFallback, GeoResolver, LocalGeoLookup, NullLookup,
};
use foliometry_server::state::AppState;

const JWT_SECRET: &str = "integration-test-secret";

fn test_config() -> Config {
    Config {
        port: 0,
        data_dir: "/tmp/foliometry-test".to_string(),
        duckdb_memory_limit: "1GB".to_string(),
        geoip_path: "/nonexistent/GeoLite2-City.mmdb".to_string(),
        environment: Environment::Test,
        geo_fallback: None,
        geo_fallback_url: "http://127.0.0.1:9/json".to_string(),
        geo_fallback_timeout_ms: 100,
        trust_proxy: true,
        jwt_secret: Some(JWT_SECRET.to_string()),
        cors_origins: vec![],
        retention_sweep_interval_secs: 60,
    }
}

/// Offline lookup that answers every address with the same hint and records
/// which addresses it was asked about.
struct StaticLookup {
    hint: Option<GeoHint>,
    seen: StdMutex<Vec<String>>,
}

impl StaticLookup {
    fn new(hint: Option<GeoHint>) -> Self {
        Self {
            hint,
            seen: StdMutex::new(Vec::new()),
        }
    }

    fn seen(&self) -> Vec<String> {
        self.seen.lock().expect("lock seen").clone()
    }
}

impl LocalGeoLookup for StaticLookup {
    fn lookup(&self, ip: &str) -> Result<Option<GeoHint>> {
        self.seen.lock().expect("lock seen").push(ip.to_string());
        Ok(self.hint.clone())
    }
}

struct BrokenLookup;

impl LocalGeoLookup for BrokenLookup {
    fn lookup(&self, _ip: &str) -> Result<Option<GeoHint>> {
        Err(anyhow!("corrupt database"))
    }
}

/// Online fallback that counts calls and answers with a fixed outcome.
struct CountingFallback {
    record: Option<FallbackRecord>,
    calls: AtomicUsize,
}

impl CountingFallback {
    fn answering(record: FallbackRecord) -> Self {
        Self {
            record: Some(record),
            calls: AtomicUsize::new(0),
        }
    }

    fn failing() -> Self {
        Self {
            record: None,
            calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GeoFallback for CountingFallback {
    async fn lookup(&self, _ip: &str) -> Result<FallbackRecord> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.record
            .clone()
            .ok_or_else(|| anyhow!("connection refused"))
    }
}

/// Store whose every operation fails, standing in for a broken database.
struct FailingStore;

#[async_trait]
impl PingStore for FailingStore {
    async fn insert_ping(&self, _ping: NewPing) -> Result<LocationPing> {
        Err(anyhow!("disk full"))
    }

    async fn get_ping(&self, _id: &str) -> Result<Option<LocationPing>> {
        Err(anyhow!("disk full"))
    }

    async fn find_pings(&self, _filter: &PingFilter) -> Result<Vec<LocationPing>> {
        Err(anyhow!("disk full"))
    }

    async fn count_since(&self, _city: Option<&str>, _window: Duration) -> Result<i64> {
        Err(anyhow!("disk full"))
    }

    async fn top_cities(&self, _window: Duration, _limit: usize) -> Result<Vec<CityCount>> {
        Err(anyhow!("disk full"))
    }

    async fn purge_expired(&self, _now: DateTime<Utc>) -> Result<usize> {
        Err(anyhow!("disk full"))
    }

    async fn ttl_seconds(&self) -> Result<i64> {
        Err(anyhow!("disk full"))
    }
}

fn seattle() -> GeoHint {
    GeoHint {
        city: Some("Seattle".to_string()),
        region: Some("WA".to_string()),
        country: Some("US".to_string()),
    }
}

fn enabled_policy() -> FallbackPolicy {
    FallbackPolicy {
        enabled: true,
        timeout: StdDuration::from_millis(500),
    }
}

fn setup_with(
    config: Config,
    local: Arc<dyn LocalGeoLookup>,
    fallback: Arc<dyn GeoFallback>,
    policy: FallbackPolicy,
) -> (Arc<AppState>, axum::Router) {
    let db = DuckDbBackend::open_in_memory().expect("in-memory DuckDB");
    let resolver = GeoResolver::new(local, fallback, policy);
    let state = Arc::new(AppState::with_resolver(db, config, resolver));
    let app = build_app(Arc::clone(&state));
    (state, app)
}

fn setup(local: Arc<dyn LocalGeoLookup>) -> (Arc<AppState>, axum::Router) {
    setup_with(
        test_config(),
        local,
        Arc::new(CountingFallback::failing()),
        FallbackPolicy::disabled(),
    )
}

/// State whose ping store always fails; the DuckDB handle stays healthy.
fn setup_failing_store() -> (Arc<AppState>, axum::Router) {
    let db = DuckDbBackend::open_in_memory().expect("in-memory DuckDB");
    let resolver = GeoResolver::new(
        Arc::new(StaticLookup::new(Some(seattle()))),
        Arc::new(CountingFallback::failing()),
        FallbackPolicy::disabled(),
    );
    let mut state = AppState::with_resolver(db, test_config(), resolver);
    state.pings = Arc::new(FailingStore);
    let state = Arc::new(state);
    let app = build_app(Arc::clone(&state));
    (state, app)
}

fn assert_opaque_internal_error(json: &Value) {
    assert_eq!(json["error"]["code"], "internal_error");
    assert_eq!(json["error"]["message"], "Internal server error");
    let raw = json.to_string();
    assert!(!raw.contains("203.0.113.7"), "address leaked: {raw}");
    assert!(!raw.contains("disk full"), "detail leaked: {raw}");
    assert!(!raw.contains("Seattle"), "data leaked: {raw}");
}

fn visit_request(body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/telemetry/visit")
        .header("content-type", "application/json")
        .header("x-forwarded-for", "203.0.113.7, 10.0.0.1")
        .body(Body::from(body.to_string()))
        .expect("build request")
}

fn get_request(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .expect("build request")
}

async fn json_body(response: axum::http::Response<Body>) -> Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("read body")
        .to_bytes();
    serde_json::from_slice(&bytes).expect("parse JSON")
}

async fn stored_rows(state: &AppState) -> i64 {
    let conn = state.db.conn_for_test().await;
    conn.query_row("SELECT COUNT(*) FROM location_pings", [], |row| row.get(0))
        .expect("count rows")
}

async fn seed_ping(state: &AppState, city: &str, country: &str, age: Duration) {
    let ts = Utc::now() - age;
    state
        .pings
        .insert_ping(NewPing {
            user_id: None,
            city: city.to_string(),
            region: "Unknown".to_string(),
            country: country.to_string(),
            page: "/visit".to_string(),
            ts: Some(ts),
            created_at: Some(ts),
        })
        .await
        .expect("seed ping");
}

fn bearer(sub: &str, secret: &str) -> String {
    let now = Utc::now();
    let claims = Claims {
        sub: sub.to_string(),
        exp: (now + Duration::hours(1)).timestamp(),
        iat: now.timestamp(),
    };
    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .expect("encode token");
    format!("Bearer {token}")
}

// ============================================================
// BDD: A visit is stored and acknowledged without the address
// ============================================================
#[tokio::test]
async fn test_visit_returns_201_and_stores_ping() {
    let lookup = Arc::new(StaticLookup::new(Some(seattle())));
    let (state, app) = setup(lookup.clone());

    let response = app
        .oneshot(visit_request(r#"{"page":"/dashboard"}"#))
        .await
        .expect("request");
    assert_eq!(response.status(), StatusCode::CREATED);

    let json = json_body(response).await;
    assert_eq!(json["message"], "Telemetry stored");
    assert_eq!(json["city"], "Seattle");
    assert_eq!(json["region"], "WA");
    assert_eq!(json["country"], "US");
    assert_eq!(json["page"], "/dashboard");
    assert!(json["ts"].is_string());
    assert!(json.get("ip").is_none(), "address must never be echoed");

    assert_eq!(lookup.seen(), vec!["203.0.113.7".to_string()]);

    let pings = state
        .pings
        .find_pings(&PingFilter::city("Seattle"))
        .await
        .expect("find pings");
    assert_eq!(pings.len(), 1);
    assert_eq!(pings[0].page, "/dashboard");
    assert_eq!(pings[0].ts, pings[0].created_at);
    assert!(pings[0].user_id.is_none());
}

// ============================================================
// BDD: Missing or empty page falls back to /visit
// ============================================================
#[tokio::test]
async fn test_visit_without_page_defaults_to_visit() {
    let (state, app) = setup(Arc::new(StaticLookup::new(Some(seattle()))));

    for body in ["", "{}", r#"{"page":""}"#] {
        let response = app
            .clone()
            .oneshot(visit_request(body))
            .await
            .expect("request");
        assert_eq!(response.status(), StatusCode::CREATED, "body {body:?}");
        let json = json_body(response).await;
        assert_eq!(json["page"], "/visit");
    }

    assert_eq!(stored_rows(&state).await, 3);
}

// ============================================================
// BDD: Unresolvable address is stored as Unknown
// ============================================================
#[tokio::test]
async fn test_visit_with_no_geo_data_stores_unknown() {
    let (state, app) = setup(Arc::new(NullLookup));

    let response = app.oneshot(visit_request("{}")).await.expect("request");
    assert_eq!(response.status(), StatusCode::CREATED);

    let json = json_body(response).await;
    assert_eq!(json["city"], "Unknown");
    assert_eq!(json["region"], "Unknown");
    assert_eq!(json["country"], "Unknown");
    assert_eq!(stored_rows(&state).await, 1);
}

// ============================================================
// BDD: A local city match never consults the fallback
// ============================================================
#[tokio::test]
async fn test_local_city_skips_fallback() {
    let fallback = Arc::new(CountingFallback::answering(FallbackRecord {
        status: "success".to_string(),
        country: Some("France".to_string()),
        region_name: Some("Ile-de-France".to_string()),
        city: Some("Paris".to_string()),
    }));
    let (_state, app) = setup_with(
        test_config(),
        Arc::new(StaticLookup::new(Some(seattle()))),
        fallback.clone(),
        enabled_policy(),
    );

    let response = app.oneshot(visit_request("{}")).await.expect("request");
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(json_body(response).await["city"], "Seattle");
    assert_eq!(fallback.calls(), 0);
}

// ============================================================
// BDD: Missing city consults the fallback exactly once
// ============================================================
#[tokio::test]
async fn test_missing_city_uses_fallback_once() {
    let fallback = Arc::new(CountingFallback::answering(FallbackRecord {
        status: "success".to_string(),
        country: Some("France".to_string()),
        region_name: Some("Ile-de-France".to_string()),
        city: Some("Paris".to_string()),
    }));
    let local = StaticLookup::new(Some(GeoHint {
        city: None,
        region: None,
        country: Some("FR".to_string()),
    }));
    let (state, app) = setup_with(
        test_config(),
        Arc::new(local),
        fallback.clone(),
        enabled_policy(),
    );

    let response = app.oneshot(visit_request("{}")).await.expect("request");
    assert_eq!(response.status(), StatusCode::CREATED);

    let json = json_body(response).await;
    assert_eq!(json["city"], "Paris");
    assert_eq!(json["region"], "Ile-de-France");
    assert_eq!(json["country"], "France");
    assert_eq!(fallback.calls(), 1);
    assert_eq!(stored_rows(&state).await, 1);
}

// ============================================================
// BDD: Fallback failure keeps the local result and still stores
// ============================================================
#[tokio::test]
async fn test_failing_fallback_keeps_local_result() {
    let fallback = Arc::new(CountingFallback::failing());
    let local = StaticLookup::new(Some(GeoHint {
        city: None,
        region: None,
        country: Some("FR".to_string()),
    }));
    let (state, app) = setup_with(
        test_config(),
        Arc::new(local),
        fallback.clone(),
        enabled_policy(),
    );

    let response = app.oneshot(visit_request("{}")).await.expect("request");
    assert_eq!(response.status(), StatusCode::CREATED);

    let json = json_body(response).await;
    assert_eq!(json["city"], "Unknown");
    assert_eq!(json["country"], "FR");
    assert_eq!(fallback.calls(), 1);
    assert_eq!(stored_rows(&state).await, 1);
}

// ============================================================
// BDD: Disabled fallback is never called
// ============================================================
#[tokio::test]
async fn test_disabled_fallback_is_never_called() {
    let fallback = Arc::new(CountingFallback::failing());
    let (_state, app) = setup_with(
        test_config(),
        Arc::new(NullLookup),
        fallback.clone(),
        FallbackPolicy::disabled(),
    );

    let response = app.oneshot(visit_request("{}")).await.expect("request");
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(fallback.calls(), 0);
}

// ============================================================
// BDD: Offline lookup failure is a 500 and nothing is stored
// ============================================================
#[tokio::test]
async fn test_local_lookup_error_returns_500_without_storing() {
    let (state, app) = setup(Arc::new(BrokenLookup));

    let response = app.oneshot(visit_request("{}")).await.expect("request");
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let json = json_body(response).await;
    assert_eq!(json["error"]["code"], "internal_error");
    assert_eq!(json["error"]["message"], "Internal server error");
    let raw = json.to_string();
    assert!(!raw.contains("203.0.113.7"));
    assert!(!raw.contains("corrupt database"));

    assert_eq!(stored_rows(&state).await, 0);
}

// ============================================================
// BDD: Malformed JSON is a 400 validation error
// ============================================================
#[tokio::test]
async fn test_malformed_body_returns_400() {
    let (state, app) = setup(Arc::new(NullLookup));

    let response = app
        .oneshot(visit_request("{not json"))
        .await
        .expect("request");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let json = json_body(response).await;
    assert_eq!(json["error"]["code"], "validation_error");
    assert_eq!(stored_rows(&state).await, 0);
}

// ============================================================
// BDD: A valid bearer token tags the ping with its subject
// ============================================================
#[tokio::test]
async fn test_valid_token_tags_user_id() {
    let (state, app) = setup(Arc::new(StaticLookup::new(Some(seattle()))));

    let mut request = visit_request("{}");
    request.headers_mut().insert(
        "authorization",
        bearer("user-42", JWT_SECRET).parse().expect("header value"),
    );
    let response = app.oneshot(request).await.expect("request");
    assert_eq!(response.status(), StatusCode::CREATED);

    let pings = state
        .pings
        .find_pings(&PingFilter {
            user_id: Some("user-42".to_string()),
            ..PingFilter::default()
        })
        .await
        .expect("find pings");
    assert_eq!(pings.len(), 1);
}

// ============================================================
// BDD: A token signed with another secret is treated as anonymous
// ============================================================
#[tokio::test]
async fn test_invalid_token_is_anonymous() {
    let (state, app) = setup(Arc::new(StaticLookup::new(Some(seattle()))));

    let mut request = visit_request("{}");
    request.headers_mut().insert(
        "authorization",
        bearer("user-42", "some-other-secret")
            .parse()
            .expect("header value"),
    );
    let response = app.oneshot(request).await.expect("request");
    assert_eq!(response.status(), StatusCode::CREATED);

    let pings = state
        .pings
        .find_pings(&PingFilter::default())
        .await
        .expect("find pings");
    assert_eq!(pings.len(), 1);
    assert!(pings[0].user_id.is_none());
}

// ============================================================
// BDD: Without proxy trust the socket peer is used
// ============================================================
#[tokio::test]
async fn test_untrusted_proxy_uses_peer_address() {
    let lookup = Arc::new(StaticLookup::new(Some(seattle())));
    let mut config = test_config();
    config.trust_proxy = false;
    let (_state, app) = setup_with(
        config,
        lookup.clone(),
        Arc::new(CountingFallback::failing()),
        FallbackPolicy::disabled(),
    );

    let mut request = visit_request("{}");
    let peer: SocketAddr = "[::ffff:198.51.100.4]:40000".parse().expect("socket addr");
    request.extensions_mut().insert(ConnectInfo(peer));

    let response = app.oneshot(request).await.expect("request");
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(lookup.seen(), vec!["198.51.100.4".to_string()]);
}

// ============================================================
// BDD: No forwarded header and no peer resolves to Unknown
// ============================================================
#[tokio::test]
async fn test_no_address_resolves_unknown_without_lookups() {
    let lookup = Arc::new(StaticLookup::new(Some(seattle())));
    let fallback = Arc::new(CountingFallback::failing());
    let (_state, app) = setup_with(
        test_config(),
        lookup.clone(),
        fallback.clone(),
        enabled_policy(),
    );

    let request = Request::builder()
        .method("POST")
        .uri("/api/telemetry/visit")
        .body(Body::empty())
        .expect("build request");
    let response = app.oneshot(request).await.expect("request");
    assert_eq!(response.status(), StatusCode::CREATED);

    let json = json_body(response).await;
    assert_eq!(json["city"], "Unknown");
    assert!(lookup.seen().is_empty());
    assert_eq!(fallback.calls(), 0);
}

// ============================================================
// BDD: city-7d ranks cities by visit count
// ============================================================
#[tokio::test]
async fn test_city_7d_ranks_by_count() {
    let (state, app) = setup(Arc::new(NullLookup));
    seed_ping(&state, "Seattle", "US", Duration::hours(1)).await;
    seed_ping(&state, "Seattle", "US", Duration::days(2)).await;
    seed_ping(&state, "Paris", "FR", Duration::days(3)).await;
    seed_ping(&state, "Berlin", "DE", Duration::days(9)).await;

    let response = app
        .oneshot(get_request("/api/telemetry/stats/city-7d"))
        .await
        .expect("request");
    assert_eq!(response.status(), StatusCode::OK);

    let json = json_body(response).await;
    assert_eq!(
        json,
        json!([
            { "city": "Seattle", "country": "US", "count": 2 },
            { "city": "Paris", "country": "FR", "count": 1 }
        ])
    );

    // Aggregation is read-only.
    assert_eq!(stored_rows(&state).await, 4);
}

// ============================================================
// BDD: city-7d on an empty store is an empty list
// ============================================================
#[tokio::test]
async fn test_city_7d_empty_store() {
    let (_state, app) = setup(Arc::new(NullLookup));

    let response = app
        .oneshot(get_request("/api/telemetry/stats/city-7d"))
        .await
        .expect("request");
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await, json!([]));
}

// ============================================================
// BDD: city-7d returns at most 10 cities
// ============================================================
#[tokio::test]
async fn test_city_7d_caps_at_ten() {
    let (state, app) = setup(Arc::new(NullLookup));
    for i in 0..12 {
        seed_ping(&state, &format!("City{i}"), "US", Duration::hours(1)).await;
    }

    let response = app
        .oneshot(get_request("/api/telemetry/stats/city-7d"))
        .await
        .expect("request");
    let json = json_body(response).await;
    assert_eq!(json.as_array().expect("array").len(), 10);
}

// ============================================================
// BDD: /stats/cities honours and clamps days and limit
// ============================================================
#[tokio::test]
async fn test_city_stats_window_and_limit() {
    let (state, app) = setup(Arc::new(NullLookup));
    seed_ping(&state, "Seattle", "US", Duration::hours(1)).await;
    seed_ping(&state, "Seattle", "US", Duration::hours(2)).await;
    seed_ping(&state, "Paris", "FR", Duration::days(3)).await;
    seed_ping(&state, "Berlin", "DE", Duration::days(12)).await;

    let response = app
        .clone()
        .oneshot(get_request("/api/telemetry/stats/cities?days=1"))
        .await
        .expect("request");
    assert_eq!(
        json_body(response).await,
        json!([{ "city": "Seattle", "country": "US", "count": 2 }])
    );

    // Windows beyond retention clamp to 15 days and still include Berlin.
    let response = app
        .clone()
        .oneshot(get_request("/api/telemetry/stats/cities?days=365"))
        .await
        .expect("request");
    assert_eq!(json_body(response).await.as_array().expect("array").len(), 3);

    // limit=0 clamps to 1.
    let response = app
        .oneshot(get_request("/api/telemetry/stats/cities?days=30&limit=0"))
        .await
        .expect("request");
    assert_eq!(
        json_body(response).await,
        json!([{ "city": "Seattle", "country": "US", "count": 2 }])
    );
}

// ============================================================
// BDD: A failed insert is a 500 and nothing is stored
// ============================================================
#[tokio::test]
async fn test_store_failure_on_visit_returns_500() {
    let (state, app) = setup_failing_store();

    let response = app
        .oneshot(visit_request(r#"{"page":"/dashboard"}"#))
        .await
        .expect("request");
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_opaque_internal_error(&json_body(response).await);

    assert_eq!(stored_rows(&state).await, 0);
}

// ============================================================
// BDD: A failed aggregation is a 500, never a partial list
// ============================================================
#[tokio::test]
async fn test_store_failure_on_city_stats_returns_500() {
    let (_state, app) = setup_failing_store();

    for uri in [
        "/api/telemetry/stats/city-7d",
        "/api/telemetry/stats/cities?days=3&limit=5",
    ] {
        let response = app
            .clone()
            .oneshot(get_request(uri))
            .await
            .expect("request");
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR, "{uri}");
        let json = json_body(response).await;
        assert!(!json.is_array(), "{uri} returned rows");
        assert_opaque_internal_error(&json);
    }
}

// ============================================================
// BDD: A DuckDB error during aggregation surfaces as a 500
// ============================================================
#[tokio::test]
async fn test_missing_table_on_city_7d_returns_500() {
    let (state, app) = setup(Arc::new(NullLookup));
    seed_ping(&state, "Seattle", "US", Duration::hours(1)).await;
    {
        let conn = state.db.conn_for_test().await;
        conn.execute_batch("DROP TABLE location_pings")
            .expect("drop table");
    }

    let response = app
        .oneshot(get_request("/api/telemetry/stats/city-7d"))
        .await
        .expect("request");
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_opaque_internal_error(&json_body(response).await);
}

// ============================================================
// BDD: Malformed stats parameters are a 400 in the error envelope
// ============================================================
#[tokio::test]
async fn test_city_stats_rejects_malformed_params() {
    let (_state, app) = setup(Arc::new(NullLookup));

    for uri in [
        "/api/telemetry/stats/cities?days=abc",
        "/api/telemetry/stats/cities?limit=-1",
        "/api/telemetry/stats/cities?days=7&limit=lots",
    ] {
        let response = app
            .clone()
            .oneshot(get_request(uri))
            .await
            .expect("request");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{uri}");
        let json = json_body(response).await;
        assert_eq!(json["error"]["code"], "validation_error", "{uri}");
        assert!(json["error"]["message"].is_string());
    }
}
