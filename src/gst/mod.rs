// GStreamer media backend
//
// Real implementations of the source, codec engine and muxer interfaces.
// Compiled only with the `gstreamer` feature.
//
// Timestamps cross the boundary in nanoseconds; packets coming out of
// `GstSource` use a 1/1_000_000_000 timebase.

mod codecs;
mod init;
mod muxer;
mod source;

pub use codecs::GstCodecs;
pub use init::{gstreamer_version, init_gstreamer_env};
pub use muxer::GstMuxer;
pub use source::GstSource;

use gstreamer as gst;

use crate::video::{Rational, StreamInfo};

/// Timebase of GStreamer clock times
pub const NANOSECONDS: Rational = Rational::new(1, 1_000_000_000);

/// Codec name for a caps structure name, e.g. `video/x-h264` -> `h264`
pub(crate) fn codec_for_caps(structure: &gst::StructureRef) -> String {
    let name = structure.name().as_str();
    let codec = match name {
        "video/x-h264" => "h264",
        "video/x-h265" => "h265",
        "video/x-vp8" => "vp8",
        "video/x-vp9" => "vp9",
        "video/x-av1" => "av1",
        "image/jpeg" => "mjpeg",
        "audio/x-opus" => "opus",
        "audio/x-vorbis" => "vorbis",
        "audio/x-mulaw" => "pcm_mulaw",
        "audio/mpeg" => match structure.get::<i32>("mpegversion") {
            Ok(1) => "mp3",
            _ => "aac",
        },
        other => other.rsplit('/').next().unwrap_or(other),
    };
    codec.to_string()
}

/// Caps name and parser element for writing `codec`
pub(crate) fn caps_for_codec(codec: &str) -> Option<(&'static str, Option<&'static str>)> {
    match codec {
        "h264" => Some(("video/x-h264", Some("h264parse"))),
        "h265" => Some(("video/x-h265", Some("h265parse"))),
        "vp8" => Some(("video/x-vp8", None)),
        "vp9" => Some(("video/x-vp9", Some("vp9parse"))),
        "av1" => Some(("video/x-av1", Some("av1parse"))),
        "mjpeg" => Some(("image/jpeg", None)),
        "aac" => Some(("audio/mpeg", Some("aacparse"))),
        "mp3" => Some(("audio/mpeg", Some("mpegaudioparse"))),
        "opus" => Some(("audio/x-opus", Some("opusparse"))),
        "vorbis" => Some(("audio/x-vorbis", None)),
        "pcm_mulaw" => Some(("audio/x-mulaw", None)),
        _ => None,
    }
}

/// Caps describing compressed packets of `codec`
pub(crate) fn encoded_caps(
    codec: &str,
    width: u32,
    height: u32,
    sample_rate: u32,
    channels: u16,
    extradata: Option<&[u8]>,
) -> Option<gst::Caps> {
    let (name, _) = caps_for_codec(codec)?;
    let mut builder = gst::Caps::builder(name);
    if width > 0 && height > 0 {
        builder = builder.field("width", width as i32).field("height", height as i32);
    }
    if sample_rate > 0 {
        builder = builder.field("rate", sample_rate as i32).field("channels", channels.max(1) as i32);
    }
    match codec {
        "h264" | "h265" => {
            let format = match (codec, extradata.is_some()) {
                ("h264", true) => "avc",
                ("h265", true) => "hvc1",
                _ => "byte-stream",
            };
            builder = builder.field("stream-format", format).field("alignment", "au");
        }
        "aac" => {
            builder = builder
                .field("mpegversion", 4i32)
                .field("stream-format", if extradata.is_some() { "raw" } else { "adts" });
        }
        "mp3" => {
            builder = builder.field("mpegversion", 1i32).field("layer", 3i32);
        }
        _ => {}
    }
    if let Some(data) = extradata {
        builder = builder.field("codec_data", gst::Buffer::from_slice(data.to_vec()));
    }
    Some(builder.build())
}

pub(crate) fn stream_caps(stream: &StreamInfo) -> Option<gst::Caps> {
    encoded_caps(
        &stream.codec,
        stream.width,
        stream.height,
        stream.sample_rate,
        stream.channels,
        stream.extradata.as_deref(),
    )
}

pub(crate) fn make_element(factory: &str) -> Result<gst::Element, String> {
    gst::ElementFactory::make(factory)
        .build()
        .map_err(|e| format!("Failed to create {}: {}", factory, e))
}
