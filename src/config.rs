//! Configuration
//!
//! Settings for the backend endpoint, capture devices and location lookup.
//! Stored as JSON; every field has a default so partial files are fine.

use crate::capture::{FfmpegConfig, MediaConstraints};
use crate::geo::Coordinates;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Backend API settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ApiConfig {
    /// Base address of the API, e.g. `http://localhost:5000/api/v1`
    pub base_url: String,

    /// Route that accepts live video uploads
    pub upload_route: String,

    /// Upload timeout in seconds
    pub timeout_secs: u64,

    /// Cookie header sent with uploads (the backend authenticates by cookie)
    pub session_cookie: Option<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5000/api/v1".to_string(),
            upload_route: "/users/upload-post".to_string(),
            timeout_secs: 120,
            session_cookie: None,
        }
    }
}

impl ApiConfig {
    /// Full upload URL
    pub fn upload_url(&self) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            self.upload_route.trim_start_matches('/')
        )
    }
}

/// Camera and recorder settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CaptureConfig {
    pub constraints: MediaConstraints,

    /// File name of the `media` upload part
    pub file_name: String,

    /// How long `stop` waits for the encoder to flush
    pub flush_timeout_ms: u64,

    /// Where preview files are written (system temp dir when unset)
    pub preview_dir: Option<String>,

    pub ffmpeg: FfmpegConfig,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            constraints: MediaConstraints::default(),
            file_name: "live-video.webm".to_string(),
            flush_timeout_ms: 5_000,
            preview_dir: None,
            ffmpeg: FfmpegConfig::default(),
        }
    }
}

impl CaptureConfig {
    pub fn flush_timeout(&self) -> Duration {
        Duration::from_millis(self.flush_timeout_ms)
    }
}

/// Location lookup settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LocationConfig {
    /// Try to turn coordinates into a place name
    pub reverse_geocode: bool,

    /// Nominatim server
    pub geocoder_url: String,

    /// ip-api compatible server used when no fixed position is set
    pub ip_lookup_url: String,

    /// Use these coordinates instead of a lookup
    pub fixed_position: Option<Coordinates>,

    /// Bound on each lookup step
    pub timeout_secs: u64,

    /// User-Agent sent to the geocoder
    pub user_agent: String,
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            reverse_geocode: true,
            geocoder_url: "https://nominatim.openstreetmap.org".to_string(),
            ip_lookup_url: "http://ip-api.com".to_string(),
            fixed_position: None,
            timeout_secs: 10,
            user_agent: format!("golive-capture/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl LocationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GoLiveConfig {
    pub api: ApiConfig,
    pub capture: CaptureConfig,
    pub location: LocationConfig,
}

pub const ENV_API_BASE_URL: &str = "GOLIVE_API_BASE_URL";
pub const ENV_SESSION_COOKIE: &str = "GOLIVE_SESSION_COOKIE";
pub const ENV_VIDEO_DEVICE: &str = "GOLIVE_VIDEO_DEVICE";

impl GoLiveConfig {
    /// Apply overrides from the process environment
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary key lookup
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_API_BASE_URL).filter(|v| !v.is_empty()) {
            tracing::debug!("API base URL overridden to {}", url);
            self.api.base_url = url;
        }
        if let Some(cookie) = lookup(ENV_SESSION_COOKIE).filter(|v| !v.is_empty()) {
            self.api.session_cookie = Some(cookie);
        }
        if let Some(device) = lookup(ENV_VIDEO_DEVICE).filter(|v| !v.is_empty()) {
            self.capture.ffmpeg.video_device = device;
        }
    }
}

/// Load configuration from `path`, falling back to defaults when the file
/// does not exist.
pub fn load_config(path: &Path) -> anyhow::Result<GoLiveConfig> {
    if !path.exists() {
        tracing::info!("No config found at {:?}, using defaults", path);
        return Ok(GoLiveConfig::default());
    }

    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config {:?}", path))?;
    let config: GoLiveConfig = serde_json::from_str(&contents)
        .with_context(|| format!("Failed to parse config {:?}", path))?;

    tracing::info!("Loaded config from {:?}", path);
    Ok(config)
}

/// Save configuration to `path`, creating parent directories
pub fn save_config(path: &Path, config: &GoLiveConfig) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create config dir {:?}", parent))?;
    }

    let contents = serde_json::to_string_pretty(config).context("Failed to serialize config")?;
    std::fs::write(path, contents).with_context(|| format!("Failed to write config {:?}", path))?;

    tracing::info!("Saved config to {:?}", path);
    Ok(())
}
