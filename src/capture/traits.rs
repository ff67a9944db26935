//! Capture trait definitions
//!
//! Platform-agnostic types for camera/microphone acquisition. A
//! `MediaDevices` implementation grants a `MediaStreamHandle`; the handle
//! owns the hardware tracks until it is released.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Which camera to prefer on devices with more than one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FacingMode {
    User,
    Environment,
}

/// Requested capture settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MediaConstraints {
    /// Width in pixels
    pub width: u32,

    /// Height in pixels
    pub height: u32,

    /// Frames per second
    pub frame_rate: u32,

    /// Preferred camera
    pub facing_mode: FacingMode,

    /// Whether to capture the microphone alongside video
    pub audio: bool,
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            frame_rate: 30,
            facing_mode: FacingMode::User,
            audio: true,
        }
    }
}

/// Kind of a hardware track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Video,
    Audio,
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackKind::Video => write!(f, "video"),
            TrackKind::Audio => write!(f, "audio"),
        }
    }
}

/// A single hardware track (camera or microphone) inside a stream.
///
/// `stop` must be idempotent and must leave `is_live` false.
pub trait MediaTrack: Send + Sync + fmt::Debug {
    fn kind(&self) -> TrackKind;

    /// Device identifier, e.g. `/dev/video0`
    fn label(&self) -> &str;

    fn stop(&self);

    fn is_live(&self) -> bool;
}

/// Acquisition failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Device unavailable: {0}")]
    DeviceUnavailable(String),
}

/// Grants access to camera and microphone.
///
/// Acquisition may block on an OS permission prompt with no guaranteed
/// response time; callers must be ready to drop the result if the session
/// was closed in the meantime.
#[async_trait]
pub trait MediaDevices: Send + Sync {
    async fn acquire(&self, constraints: &MediaConstraints) -> Result<MediaStreamHandle, CaptureError>;
}

#[derive(Debug)]
struct StreamInner {
    id: Uuid,
    constraints: MediaConstraints,
    tracks: Vec<Box<dyn MediaTrack>>,
    released: AtomicBool,
}

impl StreamInner {
    fn stop_tracks(&self) -> bool {
        if self.released.swap(true, Ordering::AcqRel) {
            return false;
        }
        for track in &self.tracks {
            track.stop();
        }
        true
    }
}

impl Drop for StreamInner {
    fn drop(&mut self) {
        if self.stop_tracks() {
            tracing::debug!("Media stream {} dropped, tracks stopped", self.id);
        }
    }
}

/// Live media stream granted by `MediaDevices::acquire`.
///
/// Clones share the same tracks. Releasing any clone stops every track, and
/// dropping the last clone releases the stream if nobody did.
#[derive(Debug, Clone)]
pub struct MediaStreamHandle {
    inner: Arc<StreamInner>,
}

impl MediaStreamHandle {
    pub fn new(constraints: MediaConstraints, tracks: Vec<Box<dyn MediaTrack>>) -> Self {
        Self {
            inner: Arc::new(StreamInner {
                id: Uuid::new_v4(),
                constraints,
                tracks,
                released: AtomicBool::new(false),
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    /// Constraints the stream was acquired with
    pub fn constraints(&self) -> &MediaConstraints {
        &self.inner.constraints
    }

    pub fn tracks(&self) -> impl Iterator<Item = &(dyn MediaTrack + 'static)> + '_ {
        self.inner.tracks.iter().map(|track| &**track)
    }

    /// First track of the given kind
    pub fn track(&self, kind: TrackKind) -> Option<&(dyn MediaTrack + 'static)> {
        self.tracks().find(|track| track.kind() == kind)
    }

    /// Number of tracks still holding hardware
    pub fn active_tracks(&self) -> usize {
        self.tracks().filter(|track| track.is_live()).count()
    }

    /// Stop every track. Repeated calls have no effect.
    pub fn release(&self) {
        if self.inner.stop_tracks() {
            tracing::info!(
                "Released media stream {} ({} tracks)",
                self.inner.id,
                self.inner.tracks.len()
            );
        }
    }

    pub fn is_released(&self) -> bool {
        self.inner.released.load(Ordering::Acquire)
    }
}
