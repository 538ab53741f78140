// Retrocap - video frame pipeline with retroactive event capture
// Main library entry point

pub mod config;
pub mod encoding;
pub mod error;
pub mod pixel;
pub mod recording;
pub mod session;
pub mod video;

#[cfg(any(test, feature = "test-harness"))]
pub mod test_harness;

#[cfg(feature = "gstreamer")]
pub mod gst;

pub use config::Config;
pub use error::{CaptureError, Result};
pub use session::{FrameReader, FrameStatus, Session, SessionStatus, SourceSummary};

/// Install the env_logger backend. `RUST_LOG` overrides `default_level`;
/// repeated calls are ignored.
pub fn init_logging(default_level: &str) {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level)).try_init();
}
