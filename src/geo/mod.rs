//! Geolocation
//!
//! One-shot position lookup at submit time, optionally turned into a place
//! name. Reverse geocoding is best effort: when it fails the raw
//! coordinates are used as the location.

pub mod ip;
pub mod nominatim;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub use ip::IpPositionProvider;
pub use nominatim::NominatimGeocoder;

/// Geolocation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GeoError {
    #[error("Location permission denied: {0}")]
    PermissionDenied(String),

    #[error("Position unavailable: {0}")]
    PositionUnavailable(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("No place found for these coordinates")]
    NoResult,
}

/// WGS84 coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

impl fmt::Display for Coordinates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, {}", self.latitude, self.longitude)
    }
}

/// Location attached to a post
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Location {
    /// Raw coordinates, used when no place name could be resolved
    Coordinates { coordinates: Coordinates },
    /// Reverse-geocoded administrative region
    Place { name: String, coordinates: Coordinates },
}

impl Location {
    pub fn coordinates(&self) -> Coordinates {
        match self {
            Location::Coordinates { coordinates } | Location::Place { coordinates, .. } => *coordinates,
        }
    }

    pub fn place_name(&self) -> Option<&str> {
        match self {
            Location::Place { name, .. } => Some(name),
            Location::Coordinates { .. } => None,
        }
    }
}

/// Text sent in the `location` upload field
impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Coordinates { coordinates } => write!(f, "{}", coordinates),
            Location::Place { name, .. } => write!(f, "{}", name),
        }
    }
}

/// One-shot device position query
#[async_trait]
pub trait PositionProvider: Send + Sync {
    async fn current_position(&self) -> Result<Coordinates, GeoError>;
}

/// Coordinates to place name
#[async_trait]
pub trait ReverseGeocoder: Send + Sync {
    async fn reverse(&self, coordinates: Coordinates) -> Result<String, GeoError>;
}

/// Always reports the same position
#[derive(Debug, Clone, Copy)]
pub struct FixedPosition {
    coordinates: Coordinates,
}

impl FixedPosition {
    pub fn new(coordinates: Coordinates) -> Self {
        Self { coordinates }
    }
}

#[async_trait]
impl PositionProvider for FixedPosition {
    async fn current_position(&self) -> Result<Coordinates, GeoError> {
        Ok(self.coordinates)
    }
}

/// Resolves the location for one submission
pub struct LocationResolver {
    provider: Arc<dyn PositionProvider>,
    geocoder: Option<Arc<dyn ReverseGeocoder>>,
    timeout: Duration,
}

impl LocationResolver {
    pub fn new(provider: Arc<dyn PositionProvider>, timeout: Duration) -> Self {
        Self {
            provider,
            geocoder: None,
            timeout,
        }
    }

    pub fn with_geocoder(mut self, geocoder: Arc<dyn ReverseGeocoder>) -> Self {
        self.geocoder = Some(geocoder);
        self
    }

    /// Query the position, then try to name it.
    ///
    /// Fails only when no coordinates can be obtained.
    pub async fn resolve(&self) -> Result<Location, GeoError> {
        let coordinates = tokio::time::timeout(self.timeout, self.provider.current_position())
            .await
            .map_err(|_| {
                GeoError::PositionUnavailable(format!("no position within {:?}", self.timeout))
            })??;

        let Some(geocoder) = &self.geocoder else {
            return Ok(Location::Coordinates { coordinates });
        };

        match tokio::time::timeout(self.timeout, geocoder.reverse(coordinates)).await {
            Ok(Ok(name)) => {
                tracing::debug!("Resolved {} to {}", coordinates, name);
                Ok(Location::Place { name, coordinates })
            }
            Ok(Err(e)) => {
                tracing::warn!("Reverse geocoding failed, using coordinates: {}", e);
                Ok(Location::Coordinates { coordinates })
            }
            Err(_) => {
                tracing::warn!("Reverse geocoding timed out, using coordinates");
                Ok(Location::Coordinates { coordinates })
            }
        }
    }
}
