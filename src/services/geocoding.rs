use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::GeocodingConfig;

/// Addis Ababa city centre, used whenever a location cannot be resolved.
pub const FALLBACK: Coordinates = Coordinates { lat: 9.03, lon: 38.75 };

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, thiserror::Error)]
pub enum GeocodeError {
    #[error("geocoding request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("geocoding provider returned {0}")]
    Status(u16),
    #[error("no coordinates in geocoding response")]
    NoResult,
}

#[async_trait]
pub trait Geocoder: Send + Sync {
    async fn geocode(&self, query: &str) -> Result<Coordinates, GeocodeError>;
}

#[derive(Debug, Deserialize)]
struct GeocodeReply {
    lat: Option<f64>,
    lon: Option<f64>,
}

pub struct HttpGeocoder {
    client: Client,
    url: String,
}

impl HttpGeocoder {
    pub fn new(config: &GeocodingConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            client,
            url: config.url.clone(),
        })
    }
}

#[async_trait]
impl Geocoder for HttpGeocoder {
    async fn geocode(&self, query: &str) -> Result<Coordinates, GeocodeError> {
        let response = self.client.get(&self.url).query(&[("query", query)]).send().await?;
        if !response.status().is_success() {
            return Err(GeocodeError::Status(response.status().as_u16()));
        }
        let reply: GeocodeReply = response.json().await?;
        match (reply.lat, reply.lon) {
            (Some(lat), Some(lon)) => Ok(Coordinates { lat, lon }),
            _ => Err(GeocodeError::NoResult),
        }
    }
}

/// Cached front for a [`Geocoder`] that never fails: any provider error
/// degrades to [`FALLBACK`].
pub struct GeocodingResolver {
    provider: Arc<dyn Geocoder>,
    cache: DashMap<String, (Coordinates, Instant)>,
    ttl: Duration,
}

impl GeocodingResolver {
    pub fn new(provider: Arc<dyn Geocoder>, ttl: Duration) -> Self {
        Self {
            provider,
            cache: DashMap::new(),
            ttl,
        }
    }

    fn cache_key(location: &str) -> String {
        location.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
    }

    pub async fn resolve(&self, location: &str) -> Coordinates {
        let key = Self::cache_key(location);

        if let Some(entry) = self.cache.get(&key) {
            let (coordinates, stored_at) = *entry;
            if stored_at.elapsed() < self.ttl {
                tracing::debug!(location, "geocoding cache hit");
                return coordinates;
            }
        }

        match self.provider.geocode(location).await {
            Ok(coordinates) => {
                tracing::info!(location, lat = coordinates.lat, lon = coordinates.lon, "geocoding success");
                let ttl = self.ttl;
                self.cache.retain(|_, (_, stored_at)| stored_at.elapsed() < ttl);
                self.cache.insert(key, (coordinates, Instant::now()));
                coordinates
            }
            Err(err) => {
                tracing::warn!(
                    location,
                    fallback_lat = FALLBACK.lat,
                    fallback_lon = FALLBACK.lon,
                    "geocoding fallback: {err}"
                );
                FALLBACK
            }
        }
    }
}
