use serde::{Deserialize, Serialize};

/// Sentinel stored for any geo field that could not be resolved.
pub const UNKNOWN: &str = "Unknown";

/// A partial lookup result. Any field may be missing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GeoHint {
    pub city: Option<String>,
    pub region: Option<String>,
    pub country: Option<String>,
}

/// City-level location. Every field is either a resolved value or [`UNKNOWN`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeoInfo {
    pub city: String,
    pub region: String,
    pub country: String,
}

impl Default for GeoInfo {
    fn default() -> Self {
        Self::unknown()
    }
}

impl GeoInfo {
    pub fn unknown() -> Self {
        Self {
            city: UNKNOWN.to_string(),
            region: UNKNOWN.to_string(),
            country: UNKNOWN.to_string(),
        }
    }

    /// Fill each field from `hint`, defaulting missing or empty ones to [`UNKNOWN`].
    pub fn from_hint(hint: Option<GeoHint>) -> Self {
        Self::unknown().overlay(hint.unwrap_or_default())
    }

    /// Replace fields with the non-empty values of `hint`, keeping the
    /// current value wherever `hint` has nothing.
    pub fn overlay(self, hint: GeoHint) -> Self {
        Self {
            city: pick(hint.city, self.city),
            region: pick(hint.region, self.region),
            country: pick(hint.country, self.country),
        }
    }

    pub fn has_city(&self) -> bool {
        self.city != UNKNOWN
    }
}

fn pick(candidate: Option<String>, current: String) -> String {
    match candidate {
        Some(value) if !value.trim().is_empty() => value,
        _ => current,
    }
}
