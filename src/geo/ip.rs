//! Approximate position from the public IP address

use super::{Coordinates, GeoError, PositionProvider};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct LookupResponse {
    status: String,
    lat: Option<f64>,
    lon: Option<f64>,
    message: Option<String>,
}

/// Position lookup against an ip-api compatible service (`GET /json`)
pub struct IpPositionProvider {
    client: Client,
    base_url: String,
}

impl IpPositionProvider {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, GeoError> {
        let client = Client::builder()
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
impl PositionProvider for IpPositionProvider {
    async fn current_position(&self) -> Result<Coordinates, GeoError> {
        let url = format!("{}/json", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| GeoError::PositionUnavailable(e.to_string()))?;

        let body: LookupResponse = response
            .json()
            .await
            .map_err(|e| GeoError::PositionUnavailable(e.to_string()))?;

        match (body.status.as_str(), body.lat, body.lon) {
            ("success", Some(lat), Some(lon)) => Ok(Coordinates::new(lat, lon)),
            _ => Err(GeoError::PositionUnavailable(
                body.message.unwrap_or_else(|| "lookup failed".to_string()),
            )),
        }
    }
}
