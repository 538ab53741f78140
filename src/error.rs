// Error taxonomy for the capture pipeline
//
// Each collaborator boundary has its own error type; `CaptureError` is the
// umbrella returned from the session control surface.

use std::path::PathBuf;

/// Failure to open or read the input
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("Failed to open source: {0}")]
    Open(String),

    #[error("Failed to read from source: {0}")]
    Read(String),

    #[error("Capture device error: {0}")]
    Device(String),
}

/// Failure inside the codec engine
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("Codec not supported: {0}")]
    Unsupported(String),

    #[error("Failed to open codec: {0}")]
    Open(String),

    #[error("Decode failed: {0}")]
    Decode(String),

    #[error("Encode failed: {0}")]
    Encode(String),
}

/// Failure to open, write or finalize a fragment
#[derive(Debug, thiserror::Error)]
pub enum DestinationError {
    #[error("Unknown container format: {0}")]
    UnknownFormat(String),

    #[error("Failed to open {path}: {reason}")]
    Open { path: PathBuf, reason: String },

    #[error("Failed to write packet: {0}")]
    Write(String),

    #[error("Failed to finalize fragment: {0}")]
    Finish(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Structurally invalid destination buffer for a live frame read
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConvertError {
    #[error("Frame buffer too small: need {needed} samples, got {actual}")]
    BufferTooSmall { needed: usize, actual: usize },

    #[error("Row stride {row_stride} is smaller than the frame width {width}")]
    RowStrideTooSmall { row_stride: usize, width: usize },

    #[error("Plane stride {plane_stride} overlaps the previous plane (needs {needed})")]
    PlaneOverlap { plane_stride: usize, needed: usize },

    #[error("Frame dimensions {width}x{height} must be even for chroma subsampled input")]
    OddDimensions { width: u32, height: u32 },

    #[error("Picture plane {0} is missing or truncated")]
    MissingPlane(usize),
}

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Destination error: {0}")]
    Destination(#[from] DestinationError),

    #[error("Invalid state: {0}")]
    State(String),

    #[error("Frame buffer error: {0}")]
    Buffer(#[from] ConvertError),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CaptureError {
    pub(crate) fn state(msg: impl Into<String>) -> Self {
        Self::State(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, CaptureError>;
