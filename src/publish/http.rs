//! Multipart upload to the backend API

use super::{PublishError, PublishReceipt, PublishRequest, Publisher};
use crate::config::ApiConfig;
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{header, Client};
use std::time::Duration;

/// Uploads live posts as `multipart/form-data`
pub struct HttpPublisher {
    client: Client,
    endpoint: String,
    file_name: String,
    session_cookie: Option<String>,
}

impl HttpPublisher {
    pub fn new(api: &ApiConfig, file_name: &str) -> Result<Self, PublishError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(api.timeout_secs))
            .build()
            .map_err(|e| PublishError::Network(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: api.upload_url(),
            file_name: file_name.to_string(),
            session_cookie: api.session_cookie.clone(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn form(&self, request: &PublishRequest) -> Result<Form, PublishError> {
        let media = request.media();
        let file = Part::bytes(media.bytes().to_vec())
            .file_name(self.file_name.clone())
            .mime_str(media.mime_type())
            .map_err(|e| PublishError::Network(format!("Invalid media type: {}", e)))?;

        let coordinates = request.location().coordinates();
        Ok(Form::new()
            .text("caption", request.caption().to_string())
            .part("media", file)
            .text("category", request.category().as_str())
            .text("location", request.location().to_string())
            .text("latitude", coordinates.latitude.to_string())
            .text("longitude", coordinates.longitude.to_string()))
    }
}

#[async_trait]
impl Publisher for HttpPublisher {
    async fn publish(&self, request: &PublishRequest) -> Result<PublishReceipt, PublishError> {
        tracing::info!(
            "Uploading live post to {} ({} bytes, category {})",
            self.endpoint,
            request.media().len(),
            request.category()
        );

        let mut builder = self.client.post(&self.endpoint).multipart(self.form(request)?);
        if let Some(cookie) = &self.session_cookie {
            builder = builder.header(header::COOKIE, cookie);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| PublishError::Network(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| PublishError::Network(e.to_string()))?;
        let data: Option<serde_json::Value> = serde_json::from_str(&body).ok();

        let message = data
            .as_ref()
            .and_then(|d| d.get("message"))
            .and_then(|m| m.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| {
                if status.is_success() {
                    "Request successful".to_string()
                } else {
                    "Request failed".to_string()
                }
            });

        if !status.is_success() {
            tracing::warn!("Upload rejected with {}: {}", status, message);
            return Err(PublishError::Server {
                status: status.as_u16(),
                message,
            });
        }

        tracing::info!("Upload accepted: {}", message);
        Ok(PublishReceipt {
            message,
            status: status.as_u16(),
            data,
            published_at: chrono::Utc::now(),
        })
    }
}
