// Recording modules

pub mod fragment;
pub mod preroll;
pub mod rotation;
pub mod upload;

pub use fragment::{Fragment, FragmentNamer};
pub use preroll::{PacketPrerollRing, DEFAULT_RING_CAPACITY};
pub use rotation::{EventRequest, Recorder, RecorderContext, RecorderSnapshot, RecordingMode};
pub use upload::{SpoolDirUploader, UploadError, UploadHandle, UploadQueue, Uploader};

use serde::{Deserialize, Serialize};

/// What the acquisition side of a session is currently doing
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CaptureMode {
    /// No acquisition loop running
    Idle,
    /// Decoding for live frames only
    LiveOnly,
    /// Writing continuous rotating fragments
    Fragmenting,
    /// Writing one unbounded fragment
    Streaming,
    /// Buffering packets until an event is saved
    BufferingForEvent,
}

impl CaptureMode {
    pub fn for_recording(mode: RecordingMode) -> Self {
        match mode {
            RecordingMode::Fragmented { .. } => CaptureMode::Fragmenting,
            RecordingMode::Streaming => CaptureMode::Streaming,
            RecordingMode::EventBuffer => CaptureMode::BufferingForEvent,
        }
    }

    pub fn is_recording(&self) -> bool {
        !matches!(self, CaptureMode::Idle | CaptureMode::LiveOnly)
    }

    pub fn is_running(&self) -> bool {
        *self != CaptureMode::Idle
    }
}

impl Default for CaptureMode {
    fn default() -> Self {
        CaptureMode::Idle
    }
}
