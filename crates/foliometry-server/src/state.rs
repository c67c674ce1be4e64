use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info};

use foliometry_core::store::PingStore;
use foliometry_duckdb::DuckDbBackend;

use crate::{config::Config, geo::GeoResolver};

/// Shared application state injected into every Axum handler via
/// [`axum::extract::State`].
///
/// Nothing in here is mutated after startup; the ping store is the only
/// shared resource and it serialises its own writes.
pub struct AppState {
    /// The DuckDB backend. Internally uses `Arc<tokio::sync::Mutex<Connection>>`.
    pub db: Arc<DuckDbBackend>,

    /// The same backend behind the [`PingStore`] trait; handlers go through this.
    pub pings: Arc<dyn PingStore>,

    /// Offline lookup plus optional online fallback.
    pub resolver: GeoResolver,

    /// Parsed configuration, loaded once at startup from environment variables.
    pub config: Arc<Config>,
}

impl AppState {
    /// Construct the production state: the resolver is built from `config`
    /// (GeoIP database path, fallback URL and policy).
    pub fn new(db: DuckDbBackend, config: Config) -> anyhow::Result<Self> {
        let resolver = GeoResolver::from_config(&config)?;
        Ok(Self::with_resolver(db, config, resolver))
    }

    /// Construct state around an explicit resolver (tests inject fakes here).
    pub fn with_resolver(db: DuckDbBackend, config: Config, resolver: GeoResolver) -> Self {
        let db = Arc::new(db);
        let pings: Arc<dyn PingStore> = db.clone();
        Self {
            db,
            pings,
            resolver,
            config: Arc::new(config),
        }
    }

    /// Delete pings past their retention window. Returns the number removed;
    /// a failed sweep is logged and counts as zero.
    pub async fn sweep_expired_pings(&self) -> usize {
        match self.pings.purge_expired(Utc::now()).await {
            Ok(deleted) => deleted,
            Err(e) => {
                error!(error = %e, "Retention sweep failed; will retry next tick");
                0
            }
        }
    }

    /// Background loop: expire old pings on a fixed interval.
    ///
    /// Spawned as a `tokio::spawn` task in `main.rs`. Runs until the process
    /// exits. Interval is `config.retention_sweep_interval_secs`.
    pub async fn run_retention_loop(self: Arc<Self>) {
        let interval = self.config.retention_sweep_interval();
        info!(
            interval_secs = interval.as_secs(),
            "Ping retention sweep started"
        );
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            self.sweep_expired_pings().await;
        }
    }
}
