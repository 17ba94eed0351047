//! Address geocoding with a Google-compatible HTTP client and a TTL cache.

use super::{send_json, HttpFailure, GEOCODE_TIMEOUT};
use crate::domain::Coordinate;
use crate::error::CoreError;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::debug;

/// How long a geocode result stays cached.
pub const GEOCODE_CACHE_TTL: Duration = Duration::from_secs(24 * 3600);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GeocodeError {
    #[error("no results")]
    NoResults,
    #[error("geocoder rate limited")]
    RateLimited,
    #[error("geocoder denied the request: {0}")]
    Denied(String),
    #[error("invalid geocode request: {0}")]
    Invalid(String),
    #[error("geocoder failure: {0}")]
    Unknown(String),
}

impl From<HttpFailure> for GeocodeError {
    fn from(failure: HttpFailure) -> Self {
        match failure {
            HttpFailure::RateLimited => GeocodeError::RateLimited,
            HttpFailure::Status { status, body } if status == 401 || status == 403 => {
                GeocodeError::Denied(body)
            }
            HttpFailure::Status { status, body } if status == 400 => GeocodeError::Invalid(body),
            HttpFailure::Status { status, .. } => GeocodeError::Unknown(format!("HTTP {}", status)),
            HttpFailure::Network(msg) | HttpFailure::Parse(msg) => GeocodeError::Unknown(msg),
        }
    }
}

impl From<GeocodeError> for CoreError {
    fn from(err: GeocodeError) -> Self {
        CoreError::ExternalUnavailable(err.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddressComponent {
    pub long_name: String,
    pub short_name: String,
    #[serde(default)]
    pub types: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeocodeResult {
    pub latitude: f64,
    pub longitude: f64,
    pub formatted: String,
    #[serde(default)]
    pub components: Vec<AddressComponent>,
}

impl GeocodeResult {
    pub fn coordinate(&self) -> Option<Coordinate> {
        Coordinate::new(self.latitude, self.longitude).ok()
    }
}

#[async_trait]
pub trait Geocoder: Send + Sync + fmt::Debug {
    /// Forward-geocode a free-text address. Best match first.
    async fn geocode(&self, address: &str) -> Result<Vec<GeocodeResult>, GeocodeError>;

    /// Reverse-geocode a position. Best match first.
    async fn reverse(&self, position: Coordinate) -> Result<Vec<GeocodeResult>, GeocodeError>;
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    status: String,
    #[serde(default)]
    error_message: Option<String>,
    #[serde(default)]
    results: Vec<ApiResult>,
}

#[derive(Debug, Deserialize)]
struct ApiResult {
    formatted_address: String,
    geometry: ApiGeometry,
    #[serde(default)]
    address_components: Vec<AddressComponent>,
}

#[derive(Debug, Deserialize)]
struct ApiGeometry {
    location: ApiLocation,
}

#[derive(Debug, Deserialize)]
struct ApiLocation {
    lat: f64,
    lng: f64,
}

/// Map the provider's status envelope onto the error set.
fn interpret(body: serde_json::Value) -> Result<Vec<GeocodeResult>, GeocodeError> {
    let response: ApiResponse =
        serde_json::from_value(body).map_err(|e| GeocodeError::Unknown(e.to_string()))?;
    let detail = response.error_message.unwrap_or_default();

    match response.status.as_str() {
        "OK" => {}
        "ZERO_RESULTS" => return Err(GeocodeError::NoResults),
        "OVER_QUERY_LIMIT" | "OVER_DAILY_LIMIT" => return Err(GeocodeError::RateLimited),
        "REQUEST_DENIED" => return Err(GeocodeError::Denied(detail)),
        "INVALID_REQUEST" => return Err(GeocodeError::Invalid(detail)),
        other => return Err(GeocodeError::Unknown(format!("{} {}", other, detail))),
    }

    let results: Vec<GeocodeResult> = response
        .results
        .into_iter()
        .map(|r| GeocodeResult {
            latitude: r.geometry.location.lat,
            longitude: r.geometry.location.lng,
            formatted: r.formatted_address,
            components: r.address_components,
        })
        .collect();
    if results.is_empty() {
        return Err(GeocodeError::NoResults);
    }
    Ok(results)
}

/// Geocoding API client (`/geocode/json` style endpoint).
#[derive(Debug, Clone)]
pub struct GoogleGeocoder {
    client: Client,
    api_url: String,
    api_key: String,
}

impl GoogleGeocoder {
    pub fn new(api_url: String, api_key: String) -> Result<Self, GeocodeError> {
        let client = Client::builder()
            .timeout(GEOCODE_TIMEOUT)
            .build()
            .map_err(|e| GeocodeError::Unknown(e.to_string()))?;
        Ok(Self {
            client,
            api_url,
            api_key,
        })
    }

    async fn query(&self, params: &[(&str, String)]) -> Result<Vec<GeocodeResult>, GeocodeError> {
        let body = send_json(GEOCODE_TIMEOUT, || {
            self.client
                .get(&self.api_url)
                .query(params)
                .query(&[("key", self.api_key.as_str())])
        })
        .await?;
        interpret(body)
    }
}

#[async_trait]
impl Geocoder for GoogleGeocoder {
    async fn geocode(&self, address: &str) -> Result<Vec<GeocodeResult>, GeocodeError> {
        if address.trim().is_empty() {
            return Err(GeocodeError::Invalid("empty address".into()));
        }
        self.query(&[("address", address.to_string())]).await
    }

    async fn reverse(&self, position: Coordinate) -> Result<Vec<GeocodeResult>, GeocodeError> {
        self.query(&[(
            "latlng",
            format!("{},{}", position.latitude, position.longitude),
        )])
        .await
    }
}

struct CacheEntry {
    results: Vec<GeocodeResult>,
    stored_at: Instant,
}

/// Read-through cache in front of any [`Geocoder`]. Only successful lookups
/// are cached. The lock is never held across the upstream call.
pub struct CachingGeocoder {
    inner: Arc<dyn Geocoder>,
    ttl: Duration,
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl fmt::Debug for CachingGeocoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachingGeocoder")
            .field("inner", &self.inner)
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl CachingGeocoder {
    pub fn new(inner: Arc<dyn Geocoder>) -> Self {
        Self::with_ttl(inner, GEOCODE_CACHE_TTL)
    }

    pub fn with_ttl(inner: Arc<dyn Geocoder>, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    fn lookup(&self, key: &str) -> Option<Vec<GeocodeResult>> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries
            .get(key)
            .filter(|entry| entry.stored_at.elapsed() <= self.ttl)
            .map(|entry| entry.results.clone())
    }

    fn store(&self, key: String, results: &[GeocodeResult]) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let ttl = self.ttl;
        entries.retain(|_, entry| entry.stored_at.elapsed() <= ttl);
        entries.insert(
            key,
            CacheEntry {
                results: results.to_vec(),
                stored_at: Instant::now(),
            },
        );
    }
}

#[async_trait]
impl Geocoder for CachingGeocoder {
    async fn geocode(&self, address: &str) -> Result<Vec<GeocodeResult>, GeocodeError> {
        let key = format!("fwd:{}", address.trim().to_lowercase());
        if let Some(hit) = self.lookup(&key) {
            debug!(%address, "Geocode cache hit");
            return Ok(hit);
        }
        let results = self.inner.geocode(address).await?;
        self.store(key, &results);
        Ok(results)
    }

    async fn reverse(&self, position: Coordinate) -> Result<Vec<GeocodeResult>, GeocodeError> {
        let key = format!("rev:{:.6},{:.6}", position.latitude, position.longitude);
        if let Some(hit) = self.lookup(&key) {
            return Ok(hit);
        }
        let results = self.inner.reverse(position).await?;
        self.store(key, &results);
        Ok(results)
    }
}
