use std::time::Duration;

use crate::error::CoreError;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub data_dir: String,
    pub duckdb_memory_limit: String,
    pub geoip_path: String,
    pub environment: Environment,
    /// Explicit override of the environment-derived fallback default.
    pub geo_fallback: Option<bool>,
    pub geo_fallback_url: String,
    pub geo_fallback_timeout_ms: u64,
    pub trust_proxy: bool,
    pub jwt_secret: Option<String>,
    pub cors_origins: Vec<String>,
    pub retention_sweep_interval_secs: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Environment {
    Development,
    Test,
    Production,
}

impl Environment {
    fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "production" | "prod" => Environment::Production,
            "test" => Environment::Test,
            _ => Environment::Development,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, CoreError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from any key/value source. `from_env` passes the
    /// process environment.
    pub fn from_lookup<F>(var: F) -> Result<Self, CoreError>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            port: parse_var(&var, "FOLIOMETRY_PORT", 5100)?,
            data_dir: var("FOLIOMETRY_DATA_DIR").unwrap_or_else(|| "./data".to_string()),
            duckdb_memory_limit: var("FOLIOMETRY_DUCKDB_MEMORY")
                .unwrap_or_else(|| "1GB".to_string()),
            geoip_path: var("FOLIOMETRY_GEOIP_PATH")
                .unwrap_or_else(|| "./GeoLite2-City.mmdb".to_string()),
            environment: var("FOLIOMETRY_ENV")
                .map(|v| Environment::parse(&v))
                .unwrap_or(Environment::Development),
            geo_fallback: var("FOLIOMETRY_GEO_FALLBACK")
                .map(|v| switch_var("FOLIOMETRY_GEO_FALLBACK", &v))
                .transpose()?,
            geo_fallback_url: var("FOLIOMETRY_GEO_FALLBACK_URL")
                .unwrap_or_else(|| "http://ip-api.com/json".to_string()),
            geo_fallback_timeout_ms: parse_var(&var, "FOLIOMETRY_GEO_FALLBACK_TIMEOUT_MS", 3000)?,
            trust_proxy: var("FOLIOMETRY_TRUST_PROXY")
                .map(|v| switch_var("FOLIOMETRY_TRUST_PROXY", &v))
                .transpose()?
                .unwrap_or(true),
            jwt_secret: var("FOLIOMETRY_JWT_SECRET").filter(|s| !s.is_empty()),
            cors_origins: var("FOLIOMETRY_CORS_ORIGINS")
                .map(|v| {
                    v.split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            retention_sweep_interval_secs: parse_var(&var, "FOLIOMETRY_RETENTION_SWEEP_SECS", 60)?,
        })
    }

    /// Whether the online geolocation fallback may be consulted.
    ///
    /// Defaults to on outside production; `geo_fallback` overrides either way.
    pub fn geo_fallback_enabled(&self) -> bool {
        self.geo_fallback
            .unwrap_or(self.environment != Environment::Production)
    }

    pub fn geo_fallback_timeout(&self) -> Duration {
        Duration::from_millis(self.geo_fallback_timeout_ms)
    }

    pub fn retention_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.retention_sweep_interval_secs.max(1))
    }
}

/// Unset means `default`; a set but unparseable value is an error.
fn parse_var<F, T>(var: &F, key: &str, default: T) -> Result<T, CoreError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match var(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| CoreError::Config(format!("invalid {key} {raw:?}: {e}"))),
        None => Ok(default),
    }
}

fn switch_var(key: &str, raw: &str) -> Result<bool, CoreError> {
    parse_switch(raw)
        .ok_or_else(|| CoreError::Config(format!("{key} must be on or off, got {raw:?}")))
}

fn parse_switch(raw: &str) -> Option<bool> {
    let trimmed = raw.trim();
    if ["1", "true", "yes", "on"]
        .iter()
        .any(|v| trimmed.eq_ignore_ascii_case(v))
    {
        Some(true)
    } else if ["0", "false", "no", "off"]
        .iter()
        .any(|v| trimmed.eq_ignore_ascii_case(v))
    {
        Some(false)
    } else {
        None
    }
}
