use std::time::Duration;

use serde::Deserialize;

use crate::geo::{Coordinates, is_postal_code, normalize_zip5};

const DEFAULT_ENDPOINT: &str = "https://us1.locationiq.com/v1/search";
const DEFAULT_TIMEOUT_SECS: u64 = 5;

/// Centroids for ZIP codes we can resolve even when the upstream provider is
/// down or unconfigured. Keyed by 5-digit prefix.
const FALLBACK_ZIP_CENTROIDS: &[(&str, f64, f64)] = &[
    ("02108", 42.3576, -71.0636),  // Boston, MA
    ("10001", 40.7506, -73.9972),  // New York, NY
    ("19103", 39.9526, -75.1733),  // Philadelphia, PA
    ("20001", 38.9109, -77.0163),  // Washington, DC
    ("30303", 33.7525, -84.3888),  // Atlanta, GA
    ("33101", 25.7743, -80.1937),  // Miami, FL
    ("37203", 36.1511, -86.7916),  // Nashville, TN
    ("55401", 44.9833, -93.2719),  // Minneapolis, MN
    ("60601", 41.8858, -87.6229),  // Chicago, IL
    ("75201", 32.7876, -96.7994),  // Dallas, TX
    ("77002", 29.7563, -95.3637),  // Houston, TX
    ("80202", 39.7487, -104.9997), // Denver, CO
    ("85004", 33.4512, -112.0685), // Phoenix, AZ
    ("90210", 34.0901, -118.4065), // Beverly Hills, CA
    ("94102", 37.7793, -122.4193), // San Francisco, CA
    ("98101", 47.6101, -122.3344), // Seattle, WA
];

#[derive(Debug, Clone)]
pub struct GeocoderConfig {
    pub endpoint: String,
    /// Upstream credential. None disables the upstream entirely and the
    /// geocoder answers from the fallback table alone.
    pub api_key: Option<String>,
    pub timeout: Duration,
}

impl Default for GeocoderConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            api_key: None,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

#[derive(Debug, Deserialize)]
struct UpstreamHit {
    lat: String,
    lon: String,
}

pub struct Geocoder {
    client: reqwest::Client,
    config: GeocoderConfig,
}

impl Geocoder {
    pub fn new(config: GeocoderConfig) -> anyhow::Result<Self> {
        if config.api_key.is_none() {
            tracing::warn!("No geocoder API key configured; ZIP fallback table only");
        }
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;
        Ok(Self { client, config })
    }

    /// Resolves free-form location text to coordinates. Upstream failures,
    /// timeouts, and empty results are all non-fatal: a bare postal code falls
    /// back to the static centroid table, anything else resolves to None.
    pub async fn resolve(&self, text: &str) -> Option<Coordinates> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }

        // A bare ZIP is ambiguous internationally; hint the country.
        let bare_zip = is_postal_code(text);
        let query = if bare_zip {
            format!("{text}, USA")
        } else {
            text.to_string()
        };

        if let Some(coords) = self.resolve_upstream(&query).await {
            return Some(coords);
        }

        if bare_zip {
            if let Some(zip5) = normalize_zip5(text) {
                if let Some(coords) = fallback_centroid(&zip5) {
                    tracing::info!(zip = %zip5, "Resolved ZIP from fallback centroid table");
                    return Some(coords);
                }
            }
        }

        tracing::warn!(location = %text, "Could not geocode location");
        None
    }

    async fn resolve_upstream(&self, query: &str) -> Option<Coordinates> {
        let key = self.config.api_key.as_deref()?;

        let resp = self
            .client
            .get(&self.config.endpoint)
            .query(&[("key", key), ("q", query), ("format", "json"), ("limit", "1")])
            .send()
            .await;

        let resp = match resp {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, "Geocoding request failed");
                return None;
            }
        };
        if !resp.status().is_success() {
            tracing::warn!(status = %resp.status(), "Geocoding provider returned non-success");
            return None;
        }

        let hits: Vec<UpstreamHit> = match resp.json().await {
            Ok(h) => h,
            Err(e) => {
                tracing::warn!(error = %e, "Could not parse geocoding response");
                return None;
            }
        };

        let first = hits.first()?;
        let latitude: f64 = first.lat.parse().ok()?;
        let longitude: f64 = first.lon.parse().ok()?;
        Some(Coordinates {
            latitude,
            longitude,
        })
    }
}

fn fallback_centroid(zip5: &str) -> Option<Coordinates> {
    FALLBACK_ZIP_CENTROIDS
        .iter()
        .find(|(z, _, _)| *z == zip5)
        .map(|&(_, lat, lon)| Coordinates::new(lat, lon))
}
