//! Go Live - record a short clip from the camera and publish it as a live post.
//!
//! This is the library crate behind the `golive` binary. It provides camera
//! acquisition, chunked recording, preview assembly, location lookup, the
//! multipart upload and the session state machine tying them together.

pub mod capture;
pub mod config;
pub mod geo;
pub mod preview;
pub mod publish;
pub mod recorder;
pub mod session;
pub mod utils;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{load_config, save_config, GoLiveConfig};
pub use publish::Category;
pub use session::{CaptureSession, CaptureState, SessionError, SessionEvent, SessionServices};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Install the tracing subscriber. `RUST_LOG` overrides the default filter.
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "golive_capture=debug,golive=debug,reqwest=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Go Live v{}", env!("CARGO_PKG_VERSION"));
}
