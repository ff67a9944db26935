use super::state::CaptureState;
use crate::capture::CaptureError;
use crate::geo::GeoError;
use crate::preview::PreviewError;
use crate::publish::{PublishError, ValidationError};
use crate::recorder::RecorderError;
use thiserror::Error;

/// Session errors
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Cannot {action} while {state}")]
    InvalidTransition {
        action: &'static str,
        state: CaptureState,
    },

    #[error("Session was closed before the operation finished")]
    Cancelled,

    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error(transparent)]
    Recorder(#[from] RecorderError),

    #[error(transparent)]
    Preview(#[from] PreviewError),

    #[error(transparent)]
    Location(#[from] GeoError),

    #[error(transparent)]
    Publish(#[from] PublishError),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

pub type SessionResult<T> = Result<T, SessionError>;
