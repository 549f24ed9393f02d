//! Address to coordinate lookups against a Nominatim-compatible service.

use std::time::Duration;

use async_trait::async_trait;
use listing_core::{AddressQuery, BoundingBox, Coordinates, Error, Result};
use serde::{Deserialize, Serialize};
use telemetry::health;
use tracing::{debug, warn};
use url::Url;

/// Resolves an address to coordinates.
///
/// `Ok(None)` means the service answered but had no usable result; `Err` is a
/// transport, status or payload failure.
#[async_trait]
pub trait GeocodeClient: Send + Sync {
    async fn geocode(&self, address: &AddressQuery) -> Result<Option<Coordinates>>;
}

/// Geocoder configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeocoderConfig {
    /// Search endpoint
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Sent as `User-Agent`; Nominatim rejects anonymous clients
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Appended to every free-form query
    #[serde(default = "default_country")]
    pub country: String,
    /// ISO 3166-1 alpha-2 filter passed as `countrycodes`
    #[serde(default = "default_country_code")]
    pub country_code: String,
    /// Request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Treat results outside `bounding_box` as not found
    #[serde(default = "default_restrict_to_bounding_box")]
    pub restrict_to_bounding_box: bool,
    #[serde(default = "default_bounding_box")]
    pub bounding_box: BoundingBox,
}

fn default_base_url() -> String {
    "https://nominatim.openstreetmap.org/search".to_string()
}

fn default_user_agent() -> String {
    format!("listing-ingest/{}", env!("CARGO_PKG_VERSION"))
}

fn default_country() -> String {
    "Netherlands".to_string()
}

fn default_country_code() -> String {
    "nl".to_string()
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_restrict_to_bounding_box() -> bool {
    true
}

fn default_bounding_box() -> BoundingBox {
    BoundingBox::NETHERLANDS
}

impl Default for GeocoderConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            user_agent: default_user_agent(),
            country: default_country(),
            country_code: default_country_code(),
            timeout_secs: default_timeout_secs(),
            restrict_to_bounding_box: default_restrict_to_bounding_box(),
            bounding_box: default_bounding_box(),
        }
    }
}

impl GeocoderConfig {
    /// The box results must fall in, if restricted.
    pub fn result_bounds(&self) -> Option<BoundingBox> {
        self.restrict_to_bounding_box.then_some(self.bounding_box)
    }
}

#[derive(Debug, Deserialize)]
struct Place {
    lat: String,
    lon: String,
}

/// HTTP client for the Nominatim `/search` endpoint.
pub struct NominatimClient {
    client: reqwest::Client,
    endpoint: Url,
    config: GeocoderConfig,
}

impl NominatimClient {
    pub fn new(config: GeocoderConfig) -> Result<Self> {
        let endpoint = Url::parse(&config.base_url)
            .map_err(|e| Error::geocoding(format!("invalid base_url {}: {}", config.base_url, e)))?;

        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::geocoding(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint,
            config,
        })
    }

    fn request_url(&self, address: &AddressQuery) -> Url {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .append_pair("q", &address.to_query(&self.config.country))
            .append_pair("format", "json")
            .append_pair("limit", "1")
            .append_pair("countrycodes", &self.config.country_code)
            .append_pair("addressdetails", "1");
        url
    }

    /// Picks the first place and applies the bounding box.
    fn resolve(&self, places: &[Place]) -> Result<Option<Coordinates>> {
        let Some(place) = places.first() else {
            return Ok(None);
        };

        let lat = place
            .lat
            .parse::<f64>()
            .map_err(|e| Error::geocoding(format!("bad latitude {:?}: {}", place.lat, e)))?;
        let lon = place
            .lon
            .parse::<f64>()
            .map_err(|e| Error::geocoding(format!("bad longitude {:?}: {}", place.lon, e)))?;
        let coordinates = Coordinates { lat, lon };

        match self.config.result_bounds() {
            Some(bbox) if !bbox.contains(coordinates) => {
                warn!(lat, lon, "Geocoder result outside bounding box, ignoring");
                Ok(None)
            }
            _ => Ok(Some(coordinates)),
        }
    }
}

#[async_trait]
impl GeocodeClient for NominatimClient {
    async fn geocode(&self, address: &AddressQuery) -> Result<Option<Coordinates>> {
        let url = self.request_url(address);

        let response = match self.client.get(url).send().await {
            Ok(r) => r,
            Err(e) => {
                health().geocoder.set_unhealthy(e.to_string());
                return Err(Error::geocoding(format!("request failed: {}", e)));
            }
        };

        let status = response.status();
        if !status.is_success() {
            health()
                .geocoder
                .set_unhealthy(format!("HTTP {}", status.as_u16()));
            return Err(Error::geocoding(format!("HTTP {}", status)));
        }
        health().geocoder.set_healthy();

        let places: Vec<Place> = response
            .json()
            .await
            .map_err(|e| Error::geocoding(format!("invalid response body: {}", e)))?;

        let result = self.resolve(&places)?;
        debug!(
            query = %address.cache_key(),
            found = result.is_some(),
            "Geocoded address"
        );
        Ok(result)
    }
}
