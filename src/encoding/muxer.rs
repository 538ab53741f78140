// Container muxer interface

use std::path::{Path, PathBuf};

use super::ContainerFormat;
use crate::error::DestinationError;
use crate::video::{MediaKind, Packet, Rational, StreamInfo, OUTPUT_TIME_BASE};

/// One output stream as the muxer sees it
#[derive(Debug, Clone, PartialEq)]
pub struct StreamDescriptor {
    pub index: usize,
    pub kind: MediaKind,
    /// Codec of the written packets, which differs from the source codec
    /// when audio is re-encoded
    pub codec: String,
    pub time_base: Rational,
    pub width: u32,
    pub height: u32,
    pub sample_rate: u32,
    pub channels: u16,
    pub extradata: Option<Vec<u8>>,
}

impl StreamDescriptor {
    /// Stream-copy descriptor for a source stream
    pub fn copy_of(stream: &StreamInfo) -> Self {
        Self {
            index: stream.index,
            kind: stream.kind,
            codec: stream.codec.clone(),
            time_base: OUTPUT_TIME_BASE,
            width: stream.width,
            height: stream.height,
            sample_rate: stream.sample_rate,
            channels: stream.channels,
            extradata: stream.extradata.clone(),
        }
    }
}

/// Opens destinations for a container format
pub trait Muxer: Send + Sync {
    fn open(
        &self,
        format: ContainerFormat,
        path: &Path,
        streams: &[StreamDescriptor],
    ) -> Result<Box<dyn Destination>, DestinationError>;
}

/// An open fragment file
pub trait Destination: Send {
    /// Write one packet whose timestamps are already in the output timebase
    fn write_packet(&mut self, packet: &Packet) -> Result<(), DestinationError>;

    /// Write the trailer and close the file
    fn finish(self: Box<Self>) -> Result<PathBuf, DestinationError>;
}
