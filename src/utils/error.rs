//! Error types and handling
//!
//! Error taxonomy shown to users, the response shape handed to a frontend,
//! and transient notices.

use crate::capture::CaptureError;
use crate::geo::GeoError;
use crate::publish::{PublishError, ValidationError};
use crate::session::SessionError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Broad failure classes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    PermissionDenied,
    DeviceUnavailable,
    ValidationError,
    NetworkError,
    ServerError,
    RecordingError,
    InvalidState,
    Cancelled,
}

impl ErrorKind {
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::PermissionDenied => "PERMISSION_DENIED",
            ErrorKind::DeviceUnavailable => "DEVICE_UNAVAILABLE",
            ErrorKind::ValidationError => "VALIDATION_ERROR",
            ErrorKind::NetworkError => "NETWORK_ERROR",
            ErrorKind::ServerError => "SERVER_ERROR",
            ErrorKind::RecordingError => "RECORDING_ERROR",
            ErrorKind::InvalidState => "INVALID_STATE",
            ErrorKind::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl SessionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SessionError::Capture(CaptureError::PermissionDenied(_))
            | SessionError::Location(GeoError::PermissionDenied(_)) => ErrorKind::PermissionDenied,
            SessionError::Capture(CaptureError::DeviceUnavailable(_))
            | SessionError::Location(GeoError::PositionUnavailable(_)) => ErrorKind::DeviceUnavailable,
            SessionError::Location(GeoError::Network(_) | GeoError::NoResult) => ErrorKind::NetworkError,
            SessionError::Validation(_) | SessionError::Publish(PublishError::Validation(_)) => {
                ErrorKind::ValidationError
            }
            SessionError::Publish(PublishError::Network(_)) => ErrorKind::NetworkError,
            SessionError::Publish(PublishError::Server { .. }) => ErrorKind::ServerError,
            SessionError::Recorder(_) | SessionError::Preview(_) => ErrorKind::RecordingError,
            SessionError::InvalidTransition { .. } => ErrorKind::InvalidState,
            SessionError::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Short message suitable for a toast
    pub fn user_message(&self) -> String {
        match self {
            SessionError::Capture(CaptureError::PermissionDenied(_)) => {
                "Camera or microphone access was denied.".to_string()
            }
            SessionError::Capture(CaptureError::DeviceUnavailable(_)) => {
                "No camera is available right now.".to_string()
            }
            SessionError::Location(_) => "Unable to access location.".to_string(),
            SessionError::Validation(v) | SessionError::Publish(PublishError::Validation(v)) => {
                match v {
                    ValidationError::MissingCaption => "Please enter a caption.".to_string(),
                    ValidationError::MissingMedia => {
                        "Please open camera, record a video, and enter a caption.".to_string()
                    }
                }
            }
            SessionError::Publish(PublishError::Network(_)) => "Error uploading video.".to_string(),
            SessionError::Publish(PublishError::Server { message, .. }) => message.clone(),
            SessionError::Preview(_) => "No video was recorded. Please record again.".to_string(),
            SessionError::Recorder(e) => format!("Recording failed: {}", e),
            SessionError::InvalidTransition { .. } => self.to_string(),
            SessionError::Cancelled => "The live session was closed.".to_string(),
        }
    }
}

/// Error response for frontend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

impl From<&SessionError> for ErrorResponse {
    fn from(error: &SessionError) -> Self {
        ErrorResponse {
            code: error.kind().code().to_string(),
            message: error.user_message(),
        }
    }
}

impl From<SessionError> for ErrorResponse {
    fn from(error: SessionError) -> Self {
        ErrorResponse::from(&error)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Info,
    Success,
    Error,
}

/// Transient message for the user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserNotice {
    pub level: NoticeLevel,
    pub message: String,
    pub at: DateTime<Utc>,
}

impl UserNotice {
    fn new(level: NoticeLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            at: Utc::now(),
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(NoticeLevel::Info, message)
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self::new(NoticeLevel::Success, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(NoticeLevel::Error, message)
    }
}

impl From<&SessionError> for UserNotice {
    fn from(error: &SessionError) -> Self {
        UserNotice::error(error.user_message())
    }
}
