//! Session state
//!
//! The lifecycle enum, the events a session broadcasts and the read model
//! handed to a UI.

use crate::publish::{Category, PublishReceipt};
use crate::utils::error::{ErrorResponse, UserNotice};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of one live capture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum CaptureState {
    /// Modal closed, nothing held
    #[default]
    Idle,
    /// Waiting for camera and microphone access
    CameraInitializing,
    /// Live preview running, not recording
    CameraReady,
    Recording,
    /// Recording stopped, artifact ready for review
    Previewing,
    /// Upload in flight
    Submitting,
    /// Upload accepted; the session closes right after
    Completed,
    /// Recording produced nothing usable; retake or cancel
    Failed,
}

impl CaptureState {
    /// States in which the session owns a live camera
    pub fn holds_camera(&self) -> bool {
        matches!(
            self,
            CaptureState::CameraInitializing | CaptureState::CameraReady | CaptureState::Recording
        )
    }

    pub fn can_edit_caption(&self) -> bool {
        matches!(
            self,
            CaptureState::CameraInitializing
                | CaptureState::CameraReady
                | CaptureState::Recording
                | CaptureState::Previewing
                | CaptureState::Failed
        )
    }

    /// Whether `next` is a legal successor. Cancellation (to `Idle`) is
    /// always legal.
    pub fn can_transition_to(&self, next: CaptureState) -> bool {
        use CaptureState::*;

        if next == Idle {
            return true;
        }
        matches!(
            (self, next),
            (Idle, CameraInitializing)
                | (CameraInitializing, CameraReady)
                | (CameraReady, Recording)
                | (CameraReady, Failed)
                | (Recording, Previewing)
                | (Recording, Failed)
                | (Previewing, Submitting)
                | (Previewing, CameraInitializing)
                | (Failed, CameraInitializing)
                | (Submitting, Completed)
                | (Submitting, Previewing)
        )
    }
}

impl fmt::Display for CaptureState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CaptureState::Idle => "idle",
            CaptureState::CameraInitializing => "camera initializing",
            CaptureState::CameraReady => "camera ready",
            CaptureState::Recording => "recording",
            CaptureState::Previewing => "previewing",
            CaptureState::Submitting => "submitting",
            CaptureState::Completed => "completed",
            CaptureState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Events emitted by a session
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StateChanged { from: CaptureState, to: CaptureState },
    /// Chunks moved into the recording buffer
    ChunksReceived(usize),
    Notice(UserNotice),
    /// Modal closed and all resources released
    Closed,
}

/// Outcome of the most recent upload attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionResult {
    pub success: bool,
    pub message: String,
    pub status: Option<u16>,
    pub at: DateTime<Utc>,
}

impl SubmissionResult {
    pub fn accepted(receipt: &PublishReceipt) -> Self {
        Self {
            success: true,
            message: receipt.message.clone(),
            status: Some(receipt.status),
            at: receipt.published_at,
        }
    }

    pub fn rejected(error: &ErrorResponse, status: Option<u16>) -> Self {
        Self {
            success: false,
            message: error.message.clone(),
            status,
            at: Utc::now(),
        }
    }
}

/// Everything a UI needs to render the modal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub state: CaptureState,
    pub category: Option<Category>,
    pub caption: String,
    pub chunk_count: usize,
    pub preview_bytes: Option<usize>,
    pub can_submit: bool,
    pub notice: Option<UserNotice>,
    pub stream_live: bool,
}
