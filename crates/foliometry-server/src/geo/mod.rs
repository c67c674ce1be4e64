//! Address to city-level geolocation.
//!
//! [`GeoResolver`] combines an offline lookup with an optional online
//! fallback. The fallback is only consulted when the offline database has no
//! city and the [`FallbackPolicy`] allows it; its failures never reach the
//! caller.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::warn;

use foliometry_core::geo::GeoInfo;

use crate::config::Config;

pub mod fallback;
pub mod local;

pub use fallback::{FallbackRecord, GeoFallback, IpApiFallback};
pub use local::{LocalGeoLookup, MaxMindLookup, NullLookup};

/// Whether, and for how long, the online fallback may be consulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FallbackPolicy {
    pub enabled: bool,
    pub timeout: Duration,
}

impl FallbackPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            enabled: config.geo_fallback_enabled(),
            timeout: config.geo_fallback_timeout(),
        }
    }

    pub fn disabled() -> Self {
        Self {
            enabled: false,
            timeout: Duration::ZERO,
        }
    }
}

#[derive(Clone)]
pub struct GeoResolver {
    local: Arc<dyn LocalGeoLookup>,
    fallback: Arc<dyn GeoFallback>,
    policy: FallbackPolicy,
}

impl GeoResolver {
    pub fn new(
        local: Arc<dyn LocalGeoLookup>,
        fallback: Arc<dyn GeoFallback>,
        policy: FallbackPolicy,
    ) -> Self {
        Self {
            local,
            fallback,
            policy,
        }
    }

    /// Build the production resolver: MaxMind database when the file exists,
    /// ip-api.com as fallback.
    ///
    /// A missing database is not fatal; every address then resolves to
    /// `Unknown` unless the fallback fills it in.
    pub fn from_config(config: &Config) -> Result<Self> {
        let local: Arc<dyn LocalGeoLookup> = if std::path::Path::new(&config.geoip_path).exists()
        {
            Arc::new(MaxMindLookup::open(&config.geoip_path)?)
        } else {
            Arc::new(NullLookup)
        };
        let fallback = Arc::new(IpApiFallback::new(
            &config.geo_fallback_url,
            config.geo_fallback_timeout(),
        )?);
        Ok(Self::new(local, fallback, FallbackPolicy::from_config(config)))
    }

    pub fn policy(&self) -> FallbackPolicy {
        self.policy
    }

    /// Resolve `ip` to city, region and country.
    ///
    /// Only an error from the offline lookup is returned; fallback problems
    /// are logged and the offline result is used instead.
    pub async fn resolve(&self, ip: &str) -> Result<GeoInfo> {
        if ip.is_empty() {
            return Ok(GeoInfo::unknown());
        }

        let local = GeoInfo::from_hint(self.local.lookup(ip)?);
        if !self.policy.enabled || local.has_city() {
            return Ok(local);
        }

        Ok(self.consult_fallback(ip, local).await)
    }

    /// One bounded attempt, no retry.
    async fn consult_fallback(&self, ip: &str, local: GeoInfo) -> GeoInfo {
        match tokio::time::timeout(self.policy.timeout, self.fallback.lookup(ip)).await {
            Ok(Ok(record)) if record.is_success() => local.overlay(record.into_hint()),
            Ok(Ok(record)) => {
                warn!(status = %record.status, "Geo fallback returned non-success status");
                local
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Geo fallback failed");
                local
            }
            Err(_) => {
                warn!(
                    timeout_ms = self.policy.timeout.as_millis() as u64,
                    "Geo fallback timed out"
                );
                local
            }
        }
    }
}
