use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::Deserialize;
use url::Url;

use foliometry_core::geo::GeoHint;

/// Fields requested from ip-api.com.
const IP_API_FIELDS: &str = "fields=status,country,regionName,city";

/// Response of the online geolocation service.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FallbackRecord {
    pub status: String,
    pub country: Option<String>,
    #[serde(rename = "regionName")]
    pub region_name: Option<String>,
    pub city: Option<String>,
}

impl FallbackRecord {
    pub fn is_success(&self) -> bool {
        self.status == "success"
    }

    pub fn into_hint(self) -> GeoHint {
        GeoHint {
            city: self.city,
            region: self.region_name,
            country: self.country,
        }
    }
}

/// Network geolocation consulted when the offline database has no city.
///
/// Injected into [`super::GeoResolver`] so tests can substitute a fake.
#[async_trait]
pub trait GeoFallback: Send + Sync {
    async fn lookup(&self, ip: &str) -> Result<FallbackRecord>;
}

/// ip-api.com JSON endpoint (`{base_url}/{ip}?fields=...`).
pub struct IpApiFallback {
    client: reqwest::Client,
    base_url: Url,
}

impl IpApiFallback {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let base_url =
            Url::parse(base_url).map_err(|e| anyhow!("invalid geo fallback url: {e}"))?;
        if base_url.scheme() != "http" && base_url.scheme() != "https" {
            return Err(anyhow!("geo fallback url must use http or https"));
        }
        if base_url.cannot_be_a_base() {
            return Err(anyhow!("geo fallback url cannot take a path"));
        }
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()
            .map_err(|e| anyhow!("geo fallback client build failed: {e}"))?;
        Ok(Self { client, base_url })
    }

    pub(crate) fn lookup_url(&self, ip: &str) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow!("geo fallback url cannot take a path"))?
            .pop_if_empty()
            .push(ip);
        url.set_query(Some(IP_API_FIELDS));
        Ok(url)
    }
}

#[async_trait]
impl GeoFallback for IpApiFallback {
    async fn lookup(&self, ip: &str) -> Result<FallbackRecord> {
        let url = self.lookup_url(ip)?;
        // reqwest errors embed the request URL, which contains the address.
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| anyhow!("geo fallback request failed: {}", e.without_url()))?
            .error_for_status()
            .map_err(|e| anyhow!("geo fallback responded with error: {}", e.without_url()))?;
        response
            .json::<FallbackRecord>()
            .await
            .map_err(|e| anyhow!("geo fallback body invalid: {}", e.without_url()))
    }
}
