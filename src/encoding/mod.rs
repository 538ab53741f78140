// Container formats and the codec / muxer collaborator interfaces
//
// To add a new container:
// 1. Add variant to ContainerFormat
// 2. Add its names in from_name() and its extension()
// 3. Add the GStreamer muxer element in gst_muxer()
// 4. Decide whether it needs an audio codec forced and in-band headers

pub mod audio;
pub mod codec;
pub mod muxer;

pub use audio::{AudioFrameAccumulator, AudioTranscoder};
pub use codec::{AudioDecoder, AudioEncoder, CodecEngine, VideoDecoder};
pub use muxer::{Destination, Muxer, StreamDescriptor};

use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::DestinationError;

/// Supported container formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerFormat {
    /// MP4 (.mp4) - audio must be AAC
    Mp4,
    /// QuickTime (.mov)
    Mov,
    /// Matroska (.mkv) - flexible, supports any codec
    Mkv,
    /// WebM (.webm)
    WebM,
    /// MPEG transport stream (.ts) - suited to streaming
    MpegTs,
    /// Flash video (.flv) - suited to RTMP style streaming
    Flv,
    /// AVI (.avi)
    Avi,
}

impl ContainerFormat {
    pub const ALL: &'static [ContainerFormat] = &[
        ContainerFormat::Mp4,
        ContainerFormat::Mov,
        ContainerFormat::Mkv,
        ContainerFormat::WebM,
        ContainerFormat::MpegTs,
        ContainerFormat::Flv,
        ContainerFormat::Avi,
    ];

    /// Look a format up by short name or extension
    pub fn from_name(name: &str) -> Option<ContainerFormat> {
        match name.trim().to_ascii_lowercase().as_str() {
            "mp4" | "m4v" => Some(ContainerFormat::Mp4),
            "mov" | "quicktime" => Some(ContainerFormat::Mov),
            "mkv" | "matroska" => Some(ContainerFormat::Mkv),
            "webm" => Some(ContainerFormat::WebM),
            "ts" | "mpegts" => Some(ContainerFormat::MpegTs),
            "flv" => Some(ContainerFormat::Flv),
            "avi" => Some(ContainerFormat::Avi),
            _ => None,
        }
    }

    /// Guess the format from a destination path's extension
    pub fn from_path(path: &Path) -> Option<ContainerFormat> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_name)
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ContainerFormat::Mp4 => "mp4",
            ContainerFormat::Mov => "mov",
            ContainerFormat::Mkv => "mkv",
            ContainerFormat::WebM => "webm",
            ContainerFormat::MpegTs => "ts",
            ContainerFormat::Flv => "flv",
            ContainerFormat::Avi => "avi",
        }
    }

    pub fn gst_muxer(&self) -> &'static str {
        match self {
            ContainerFormat::Mp4 => "mp4mux",
            ContainerFormat::Mov => "qtmux",
            ContainerFormat::Mkv => "matroskamux",
            ContainerFormat::WebM => "webmmux",
            ContainerFormat::MpegTs => "mpegtsmux",
            ContainerFormat::Flv => "flvmux",
            ContainerFormat::Avi => "avimux",
        }
    }

    /// Audio codec the container insists on, if any
    pub fn required_audio_codec(&self) -> Option<&'static str> {
        match self {
            ContainerFormat::Mp4 => Some("aac"),
            _ => None,
        }
    }

    /// Whether codec headers can be carried in-band before keyframes.
    /// MP4 style containers keep them in the header only.
    pub fn carries_inband_headers(&self) -> bool {
        !matches!(self, ContainerFormat::Mp4 | ContainerFormat::Mov)
    }
}

impl FromStr for ContainerFormat {
    type Err = DestinationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s).ok_or_else(|| DestinationError::UnknownFormat(s.to_string()))
    }
}

impl std::fmt::Display for ContainerFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.extension())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_resolve() {
        assert_eq!("matroska".parse::<ContainerFormat>().unwrap(), ContainerFormat::Mkv);
        assert_eq!("MP4".parse::<ContainerFormat>().unwrap(), ContainerFormat::Mp4);
        assert!(matches!(
            "divx".parse::<ContainerFormat>(),
            Err(DestinationError::UnknownFormat(_))
        ));
        assert_eq!(
            ContainerFormat::from_path(Path::new("/tmp/cam/front.ts")),
            Some(ContainerFormat::MpegTs)
        );
    }

    #[test]
    fn every_extension_round_trips() {
        for format in ContainerFormat::ALL {
            assert_eq!(ContainerFormat::from_name(format.extension()), Some(*format));
        }
    }

    #[test]
    fn only_mp4_forces_aac() {
        assert_eq!(ContainerFormat::Mp4.required_audio_codec(), Some("aac"));
        assert_eq!(ContainerFormat::Mkv.required_audio_codec(), None);
        assert!(!ContainerFormat::Mp4.carries_inband_headers());
        assert!(ContainerFormat::MpegTs.carries_inband_headers());
    }
}
