// Media data model shared by sources, decoders, the recorder and the muxer
//
// Packets are compressed units read from a source. Decoded pictures are the
// raw YUV frames published to live readers. Timestamps are integer ticks in
// the owning stream's timebase.

pub mod demux;
pub mod device;
pub mod timebase;

pub use demux::{FrameSource, SourceFrame, SourceInfo};
pub use device::{CaptureDevice, CaptureFormat, DeviceSource, HardwareEncoder, DEFAULT_GOP_SIZE};
pub use timebase::{rescale, Rational, OUTPUT_TIME_BASE};

use serde::{Deserialize, Serialize};

/// Kind of elementary stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Video,
    Audio,
    Other,
}

/// Description of one elementary stream of a source
#[derive(Debug, Clone)]
pub struct StreamInfo {
    pub index: usize,
    pub kind: MediaKind,
    /// Lowercase codec name, e.g. "h264", "aac", "pcm_mulaw"
    pub codec: String,
    pub time_base: Rational,
    pub width: u32,
    pub height: u32,
    pub sample_rate: u32,
    pub channels: u16,
    /// Codec parameter sets (SPS/PPS etc.) if the source exposes them
    pub extradata: Option<Vec<u8>>,
    /// Whether extradata has to be repeated in-band before keyframes
    pub repeat_headers: bool,
}

impl StreamInfo {
    pub fn video(index: usize, codec: &str, time_base: Rational, width: u32, height: u32) -> Self {
        Self {
            index,
            kind: MediaKind::Video,
            codec: codec.to_string(),
            time_base,
            width,
            height,
            sample_rate: 0,
            channels: 0,
            extradata: None,
            repeat_headers: false,
        }
    }

    pub fn audio(index: usize, codec: &str, time_base: Rational, sample_rate: u32, channels: u16) -> Self {
        Self {
            index,
            kind: MediaKind::Audio,
            codec: codec.to_string(),
            time_base,
            width: 0,
            height: 0,
            sample_rate,
            channels,
            extradata: None,
            repeat_headers: false,
        }
    }
}

/// One compressed unit of a stream
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    pub stream_index: usize,
    /// Decode timestamp in the stream's timebase. Missing timestamps are stored as 0.
    pub dts: i64,
    pub pts: i64,
    pub duration: i64,
    pub keyframe: bool,
    pub data: Vec<u8>,
}

impl Packet {
    pub fn new(stream_index: usize, dts: i64, pts: i64, keyframe: bool, data: Vec<u8>) -> Self {
        Self {
            stream_index,
            dts,
            pts,
            duration: 0,
            keyframe,
            data,
        }
    }

    pub fn with_duration(mut self, duration: i64) -> Self {
        self.duration = duration;
        self
    }
}

/// Trace a packet the way the recorder reports them at trace level
pub fn log_packet(tag: &str, packet: &Packet) {
    if log::log_enabled!(log::Level::Trace) {
        log::trace!(
            "[Packet] {} stream={} dur={} dts={} pts={} len={}{}",
            tag,
            packet.stream_index,
            packet.duration,
            packet.dts,
            packet.pts,
            packet.data.len(),
            if packet.keyframe { " KEY" } else { "" }
        );
    }
}

/// Memory layout of a decoded picture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelLayout {
    /// Planar Y, U, V with chroma halved in both directions
    Yuv420p,
    /// Planar Y, U, V with chroma halved horizontally
    Yuv422p,
    /// Packed 4:2:2, bytes ordered Y0 U Y1 V
    Yuyv422,
}

/// One plane of picture data with its row stride in bytes
#[derive(Debug, Clone, PartialEq)]
pub struct Plane {
    pub data: Vec<u8>,
    pub stride: usize,
}

/// A raw YUV frame produced by a decoder or a capture device
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedPicture {
    pub width: u32,
    pub height: u32,
    pub layout: PixelLayout,
    pub planes: Vec<Plane>,
    pub pts: i64,
}

impl DecodedPicture {
    /// Wrap a packed YUYV frame as delivered by capture devices
    pub fn from_yuyv(width: u32, height: u32, data: Vec<u8>, pts: i64) -> Self {
        Self {
            width,
            height,
            layout: PixelLayout::Yuyv422,
            planes: vec![Plane { data, stride: width as usize * 2 }],
            pts,
        }
    }

    /// A picture filled with a single YUV colour
    pub fn solid(width: u32, height: u32, layout: PixelLayout, y: u8, u: u8, v: u8) -> Self {
        let (w, h) = (width as usize, height as usize);
        let planes = match layout {
            PixelLayout::Yuv420p | PixelLayout::Yuv422p => {
                let chroma_rows = if layout == PixelLayout::Yuv420p { h.div_ceil(2) } else { h };
                let chroma_w = w.div_ceil(2);
                vec![
                    Plane { data: vec![y; w * h], stride: w },
                    Plane { data: vec![u; chroma_w * chroma_rows], stride: chroma_w },
                    Plane { data: vec![v; chroma_w * chroma_rows], stride: chroma_w },
                ]
            }
            PixelLayout::Yuyv422 => {
                let row: Vec<u8> = [y, u, y, v].repeat(w.div_ceil(2));
                vec![Plane { data: row.repeat(h), stride: w.div_ceil(2) * 4 }]
            }
        };
        Self { width, height, layout, planes, pts: 0 }
    }
}
