//! Publishing
//!
//! Validates and uploads a finished live post. Validation happens before
//! any network traffic and uploads are never retried automatically.

pub mod http;

use crate::geo::Location;
use crate::preview::PreviewArtifact;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

pub use http::HttpPublisher;

/// Feed category a live post is filed under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Category {
    #[default]
    General,
    Crime,
    Protest,
    Accident,
    Riot,
    Traffic,
    Fight,
    Politics,
    Trending,
}

impl Category {
    pub const ALL: [Category; 9] = [
        Category::General,
        Category::Crime,
        Category::Protest,
        Category::Accident,
        Category::Riot,
        Category::Traffic,
        Category::Fight,
        Category::Politics,
        Category::Trending,
    ];

    /// Value sent in the `category` upload field. The feed filters on the
    /// exact string, so the casing matters.
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::General => "General",
            Category::Crime => "Crime",
            Category::Protest => "Protest",
            Category::Accident => "Accident",
            Category::Riot => "Riot",
            Category::Traffic => "Traffic",
            Category::Fight => "Fight",
            Category::Politics => "Politics",
            Category::Trending => "Trending",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown category: {0}")]
pub struct ParseCategoryError(pub String);

impl FromStr for Category {
    type Err = ParseCategoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Category::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| ParseCategoryError(s.to_string()))
    }
}

/// Missing input that blocks a submission
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Caption is required")]
    MissingCaption,

    #[error("No recorded video to upload")]
    MissingMedia,
}

/// Publishing errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PublishError {
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Server rejected upload ({status}): {message}")]
    Server { status: u16, message: String },
}

/// Server acknowledgement of an upload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishReceipt {
    pub message: String,
    pub status: u16,
    pub data: Option<serde_json::Value>,
    pub published_at: DateTime<Utc>,
}

/// Check the inputs of a submission
pub fn validate(caption: &str, media: Option<&PreviewArtifact>) -> Result<(), ValidationError> {
    if caption.trim().is_empty() {
        return Err(ValidationError::MissingCaption);
    }
    match media {
        Some(media) if !media.is_empty() => Ok(()),
        _ => Err(ValidationError::MissingMedia),
    }
}

/// A validated upload
#[derive(Debug, Clone)]
pub struct PublishRequest {
    caption: String,
    media: Arc<PreviewArtifact>,
    category: Category,
    location: Location,
}

impl PublishRequest {
    pub fn new(
        caption: &str,
        media: Option<Arc<PreviewArtifact>>,
        category: Category,
        location: Location,
    ) -> Result<Self, ValidationError> {
        validate(caption, media.as_deref())?;
        let media = media.ok_or(ValidationError::MissingMedia)?;
        Ok(Self {
            caption: caption.trim().to_string(),
            media,
            category,
            location,
        })
    }

    pub fn caption(&self) -> &str {
        &self.caption
    }

    pub fn media(&self) -> &PreviewArtifact {
        &self.media
    }

    pub fn category(&self) -> Category {
        self.category
    }

    pub fn location(&self) -> &Location {
        &self.location
    }
}

/// Backend that accepts live posts
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, request: &PublishRequest) -> Result<PublishReceipt, PublishError>;
}

/// Validate, then upload once.
pub async fn submit(
    publisher: &dyn Publisher,
    caption: &str,
    media: Option<Arc<PreviewArtifact>>,
    category: Category,
    location: Location,
) -> Result<PublishReceipt, PublishError> {
    let request = PublishRequest::new(caption, media, category, location)?;
    publisher.publish(&request).await
}
