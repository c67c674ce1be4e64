use std::net::IpAddr;

use anyhow::{Context, Result};
use maxminddb::{geoip2, MaxMindDBError};

use foliometry_core::geo::GeoHint;

/// Offline address-to-location lookup.
///
/// Implementations must be synchronous and must not touch the network.
/// `Ok(None)` means "no data for this address"; an `Err` is unexpected and
/// fails the request.
pub trait LocalGeoLookup: Send + Sync {
    fn lookup(&self, ip: &str) -> Result<Option<GeoHint>>;
}

/// Used when no GeoIP database is installed. Every address is unknown.
pub struct NullLookup;

impl LocalGeoLookup for NullLookup {
    fn lookup(&self, _ip: &str) -> Result<Option<GeoHint>> {
        Ok(None)
    }
}

/// MaxMind / DB-IP `City` database, read into memory once at startup.
pub struct MaxMindLookup {
    reader: maxminddb::Reader<Vec<u8>>,
}

impl MaxMindLookup {
    pub fn open(path: &str) -> Result<Self> {
        let reader = maxminddb::Reader::open_readfile(path)
            .with_context(|| format!("failed to open GeoIP database at {path}"))?;
        Ok(Self { reader })
    }
}

impl LocalGeoLookup for MaxMindLookup {
    /// Country is the ISO code, region the first subdivision's ISO code
    /// (English name when the code is absent), city the English name.
    /// Unparseable and unlisted addresses are `None`.
    fn lookup(&self, ip: &str) -> Result<Option<GeoHint>> {
        let Ok(ip_addr) = ip.parse::<IpAddr>() else {
            return Ok(None);
        };

        let record: geoip2::City = match self.reader.lookup(ip_addr) {
            Ok(record) => record,
            Err(MaxMindDBError::AddressNotFoundError(_)) => return Ok(None),
            Err(e) => return Err(anyhow::Error::new(e).context("GeoIP lookup failed")),
        };

        let country = record
            .country
            .as_ref()
            .and_then(|c| c.iso_code)
            .map(|s| s.to_string());

        let region = record
            .subdivisions
            .as_ref()
            .and_then(|subs| subs.first())
            .and_then(|sub| {
                sub.iso_code.or_else(|| {
                    sub.names
                        .as_ref()
                        .and_then(|names| names.get("en").copied())
                })
            })
            .map(|s| s.to_string());

        let city = record
            .city
            .as_ref()
            .and_then(|c| c.names.as_ref())
            .and_then(|names| names.get("en"))
            .map(|s| s.to_string());

        Ok(Some(GeoHint {
            city,
            region,
            country,
        }))
    }
}
