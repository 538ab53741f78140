//! GStreamer initialization

use std::sync::Once;

use gstreamer as gst;

static GSTREAMER_INIT: Once = Once::new();

/// Initialize GStreamer once per process.
///
/// Returns false if the library could not be initialized; every later call
/// retries `gst::init` so the failure is reported where it matters.
pub fn init_gstreamer_env() -> bool {
    GSTREAMER_INIT.call_once(|| match gst::init() {
        Ok(_) => {
            log::info!("GStreamer initialized successfully");
            log::info!("GStreamer version: {}", gstreamer_version());
        }
        Err(e) => {
            log::error!("Failed to initialize GStreamer: {}", e);
            log::error!("Sources, decoding and fragment writing will not be available");
        }
    });
    gst::init().is_ok()
}

/// Version string of the loaded GStreamer library
pub fn gstreamer_version() -> String {
    let (major, minor, micro, nano) = gst::version();
    let suffix = match nano {
        0 => String::new(),
        1 => " (CVS)".to_string(),
        2 => " (prerelease)".to_string(),
        _ => format!(" (nano: {})", nano),
    };
    format!("{}.{}.{}{}", major, minor, micro, suffix)
}
