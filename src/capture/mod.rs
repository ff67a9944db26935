//! Camera and microphone acquisition
//!
//! Platform-agnostic traits plus an ffmpeg-backed implementation.

pub mod ffmpeg;
pub mod traits;

pub use ffmpeg::{FfmpegConfig, FfmpegDevices, FfmpegEncoder, FfmpegEncoderFactory};
pub use traits::{
    CaptureError, FacingMode, MediaConstraints, MediaDevices, MediaStreamHandle, MediaTrack,
    TrackKind,
};
