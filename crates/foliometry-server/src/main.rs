use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use foliometry_server::state::AppState;

/// `foliometry health`: liveness probe for Docker HEALTHCHECK.
///
/// Calls `GET http://localhost:$FOLIOMETRY_PORT/health`.
/// Exits 0 if the server responds with HTTP 200, exits 1 otherwise.
fn run_health_check() -> ! {
    let port = std::env::var("FOLIOMETRY_PORT").unwrap_or_else(|_| "5100".to_string());
    let url = format!("http://localhost:{}/health", port);
    match ureq::get(&url).call() {
        Ok(resp) if resp.status() == 200 => std::process::exit(0),
        _ => std::process::exit(1),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    if args.get(1).map(|s| s.as_str()) == Some("health") {
        run_health_check();
    }
    // Structured JSON logging. Level controlled via RUST_LOG env var.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("foliometry=info".parse()?),
        )
        .json()
        .init();

    let cfg = foliometry_server::config::Config::from_env()?;

    std::fs::create_dir_all(&cfg.data_dir)?;
    let db_path = format!("{}/foliometry.db", cfg.data_dir);
    let db = foliometry_duckdb::DuckDbBackend::open(&db_path, &cfg.duckdb_memory_limit)?;

    // A missing GeoIP database is not fatal: pings are stored as "Unknown"
    // unless the fallback resolves them.
    if !std::path::Path::new(&cfg.geoip_path).exists() {
        tracing::warn!(
            geoip_path = %cfg.geoip_path,
            "GeoIP database not found. Offline lookups will resolve to Unknown. \
             Provision a GeoLite2/DB-IP City .mmdb and set FOLIOMETRY_GEOIP_PATH."
        );
    }

    let state = Arc::new(AppState::new(db, cfg.clone())?);
    info!(
        environment = ?cfg.environment,
        geo_fallback = state.resolver.policy().enabled,
        trust_proxy = cfg.trust_proxy,
        principal_tagging = cfg.jwt_secret.is_some(),
        "Telemetry pipeline configured"
    );

    // Spawn the background retention sweep.
    {
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            state.run_retention_loop().await;
        });
    }

    let addr = format!("0.0.0.0:{}", cfg.port);
    let app = foliometry_server::app::build_app(Arc::clone(&state));

    info!(port = cfg.port, "Foliometry listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        tokio::signal::ctrl_c().await.ok();
    })
    .await?;

    Ok(())
}
