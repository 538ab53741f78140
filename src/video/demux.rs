// Frame source trait
//
// A source is anything that yields packets in decode order: a demuxed file,
// a network stream, or a capture device paired with a hardware encoder.

use super::{DecodedPicture, Packet, StreamInfo};
use crate::error::SourceError;

/// Information about an opened source
#[derive(Debug, Clone)]
pub struct SourceInfo {
    pub streams: Vec<StreamInfo>,
    /// Index into `streams` of the video stream used for live frames
    pub video_stream: usize,
    /// Total number of frames, when the container knows it
    pub frame_count: Option<u64>,
    /// Average frame rate, when the container knows it
    pub frame_rate: Option<f64>,
    /// True when the source delivers its own decoded pictures, so the
    /// acquisition loop must not run packets through a decoder
    pub provides_pictures: bool,
}

impl SourceInfo {
    pub fn video(&self) -> Option<&StreamInfo> {
        self.streams.get(self.video_stream)
    }

    pub fn is_video(&self, packet: &Packet) -> bool {
        packet.stream_index == self.video_stream
    }
}

/// Output of one source read.
///
/// Demuxing sources only fill `packet`. Capture sources may also return the
/// raw picture that was encoded into that packet, or a picture with no packet
/// when the encoder produced nothing for the frame.
#[derive(Debug, Clone, Default)]
pub struct SourceFrame {
    pub packet: Option<Packet>,
    pub picture: Option<DecodedPicture>,
}

impl SourceFrame {
    pub fn packet(packet: Packet) -> Self {
        Self { packet: Some(packet), picture: None }
    }
}

/// Trait for packet sources
pub trait FrameSource: Send {
    fn info(&self) -> &SourceInfo;

    /// Read the next unit. `Ok(None)` means end of stream.
    fn read(&mut self) -> Result<Option<SourceFrame>, SourceError>;
}
