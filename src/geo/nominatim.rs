//! Reverse geocoding against a Nominatim server

use super::{Coordinates, GeoError, ReverseGeocoder};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct ReverseResponse {
    address: Option<Address>,
    display_name: Option<String>,
    error: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Address {
    city: Option<String>,
    town: Option<String>,
    village: Option<String>,
    county: Option<String>,
    state_district: Option<String>,
    state: Option<String>,
}

impl ReverseResponse {
    /// Most specific administrative name available
    fn place_name(self) -> Option<String> {
        let address = self.address.unwrap_or_default();
        [
            address.city,
            address.town,
            address.village,
            address.county,
            address.state_district,
            address.state,
            self.display_name,
        ]
        .into_iter()
        .flatten()
        .find(|name| !name.trim().is_empty())
    }
}

pub struct NominatimGeocoder {
    client: Client,
    base_url: String,
}

impl NominatimGeocoder {
    pub fn new(base_url: &str, user_agent: &str, timeout: Duration) -> Result<Self, GeoError> {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()
            .map_err(|e| GeoError::Network(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl ReverseGeocoder for NominatimGeocoder {
    async fn reverse(&self, coordinates: Coordinates) -> Result<String, GeoError> {
        let url = format!("{}/reverse", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[
                ("format", "jsonv2".to_string()),
                ("lat", coordinates.latitude.to_string()),
                ("lon", coordinates.longitude.to_string()),
                ("zoom", "10".to_string()),
            ])
            .send()
            .await
            .map_err(|e| GeoError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(GeoError::Network(format!(
                "reverse geocoder returned {}",
                response.status()
            )));
        }

        let body: ReverseResponse = response
            .json()
            .await
            .map_err(|e| GeoError::Network(e.to_string()))?;

        if let Some(error) = &body.error {
            tracing::debug!("Nominatim: {}", error);
            return Err(GeoError::NoResult);
        }

        body.place_name().ok_or(GeoError::NoResult)
    }
}
