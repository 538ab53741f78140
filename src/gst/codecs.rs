// Codec engine backed by decodebin and the installed AAC encoder
//
// Video decode pipeline:
//   appsrc → decodebin → videoconvert → video/x-raw,format=I420 → appsink
// Audio decode pipeline:
//   appsrc → decodebin → audioconvert → audioresample → S16LE → appsink
// AAC encode pipeline:
//   appsrc (S16LE) → audioconvert → aac encoder → aacparse → ADTS → appsink
//
// Packets are pushed one at a time and whatever the element has ready is
// pulled back without blocking for long, so codec latency shows up as empty
// output for the first few packets. Encoded AAC is framed as ADTS so it
// needs no out-of-band headers; the muxer's aacparse converts it as needed.

use std::collections::VecDeque;

use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;

use super::{init_gstreamer_env, make_element, stream_caps, NANOSECONDS};
use crate::encoding::{AudioDecoder, AudioEncoder, CodecEngine, VideoDecoder};
use crate::error::CodecError;
use crate::video::{rescale, DecodedPicture, Packet, PixelLayout, Plane, Rational, StreamInfo};

const DECODE_WAIT_MS: u64 = 20;

/// Samples per channel in one AAC frame
const AAC_FRAME_SIZE: usize = 1024;

/// AAC encoder elements, in order of preference
const AAC_ENCODERS: &[&str] = &["avenc_aac", "fdkaacenc", "voaacenc"];

#[derive(Debug, Default, Clone, Copy)]
pub struct GstCodecs;

impl GstCodecs {
    pub fn new() -> Self {
        Self
    }
}

impl CodecEngine for GstCodecs {
    fn open_video_decoder(&self, stream: &StreamInfo) -> Result<Box<dyn VideoDecoder>, CodecError> {
        ensure_gstreamer()?;
        Ok(Box::new(GstVideoDecoder::new(stream)?))
    }

    fn open_audio_decoder(&self, stream: &StreamInfo) -> Result<Box<dyn AudioDecoder>, CodecError> {
        ensure_gstreamer()?;
        Ok(Box::new(GstAudioDecoder::new(stream)?))
    }

    fn open_audio_encoder(
        &self,
        codec: &str,
        sample_rate: u32,
        channels: u16,
    ) -> Result<Box<dyn AudioEncoder>, CodecError> {
        ensure_gstreamer()?;
        if codec != "aac" {
            return Err(CodecError::Unsupported(format!("audio encoding to {}", codec)));
        }
        Ok(Box::new(GstAacEncoder::new(sample_rate, channels)?))
    }
}

fn ensure_gstreamer() -> Result<(), CodecError> {
    if init_gstreamer_env() {
        Ok(())
    } else {
        Err(CodecError::Open("GStreamer is not available".into()))
    }
}

fn s16_caps(sample_rate: u32, channels: u16) -> gst::Caps {
    gst::Caps::builder("audio/x-raw")
        .field("format", "S16LE")
        .field("layout", "interleaved")
        .field("rate", sample_rate as i32)
        .field("channels", channels.max(1) as i32)
        .build()
}

// ============================================================================
// Decoders
// ============================================================================

/// appsrc → decodebin → `converters` → appsink(`raw_caps`), playing
struct DecodePipeline {
    pipeline: gst::Pipeline,
    appsrc: gst_app::AppSrc,
    appsink: gst_app::AppSink,
    time_base: Rational,
}

impl DecodePipeline {
    fn new(stream: &StreamInfo, converters: &[&str], raw_caps: &gst::Caps) -> Result<Self, CodecError> {
        let caps = stream_caps(stream).ok_or_else(|| CodecError::Unsupported(stream.codec.clone()))?;

        let pipeline = gst::Pipeline::new();
        let appsrc = gst_app::AppSrc::builder()
            .name("src")
            .caps(&caps)
            .format(gst::Format::Time)
            .is_live(true)
            .build();
        let decodebin = make_element("decodebin").map_err(CodecError::Open)?;
        let converters = converters
            .iter()
            .map(|factory| make_element(factory))
            .collect::<Result<Vec<_>, _>>()
            .map_err(CodecError::Open)?;
        let appsink = gst_app::AppSink::builder()
            .name("sink")
            .caps(raw_caps)
            .sync(false)
            .build();

        pipeline
            .add_many([appsrc.upcast_ref(), &decodebin])
            .and_then(|()| pipeline.add_many(&converters))
            .and_then(|()| pipeline.add(&appsink))
            .map_err(|e| CodecError::Open(format!("Failed to add elements: {}", e)))?;
        appsrc
            .link(&decodebin)
            .map_err(|e| CodecError::Open(format!("Failed to link appsrc to decodebin: {}", e)))?;
        let mut chain: Vec<&gst::Element> = converters.iter().collect();
        chain.push(appsink.upcast_ref());
        gst::Element::link_many(&chain)
            .map_err(|e| CodecError::Open(format!("Failed to link decoder output: {}", e)))?;

        let first = converters
            .first()
            .ok_or_else(|| CodecError::Open("decoder needs a converter".into()))?;
        let first_weak = first.downgrade();
        decodebin.connect_pad_added(move |_decodebin, src_pad| {
            let Some(first) = first_weak.upgrade() else {
                return;
            };
            let Some(sink_pad) = first.static_pad("sink") else {
                return;
            };
            if !sink_pad.is_linked() {
                if let Err(e) = src_pad.link(&sink_pad) {
                    log::warn!("[Decoder] Failed to link decoded pad: {:?}", e);
                }
            }
        });

        pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| CodecError::Open(format!("Failed to start decoder: {:?}", e)))?;
        log::debug!("[Decoder] Opened {} decoder", stream.codec);

        Ok(Self {
            pipeline,
            appsrc,
            appsink,
            time_base: stream.time_base,
        })
    }

    fn clock_time(&self, ts: i64) -> gst::ClockTime {
        gst::ClockTime::from_nseconds(rescale(ts, self.time_base, NANOSECONDS).max(0) as u64)
    }

    fn push(&self, packet: &Packet) -> Result<(), CodecError> {
        let mut buffer = gst::Buffer::from_slice(packet.data.clone());
        {
            let buffer_ref = buffer
                .get_mut()
                .ok_or_else(|| CodecError::Decode("buffer is shared".into()))?;
            buffer_ref.set_pts(self.clock_time(packet.pts));
            buffer_ref.set_dts(self.clock_time(packet.dts));
            if !packet.keyframe {
                buffer_ref.set_flags(gst::BufferFlags::DELTA_UNIT);
            }
        }
        self.appsrc
            .push_buffer(buffer)
            .map(|_| ())
            .map_err(|e| CodecError::Decode(format!("Failed to push buffer: {:?}", e)))
    }
}

impl Drop for DecodePipeline {
    fn drop(&mut self) {
        let _ = self.pipeline.set_state(gst::State::Null);
    }
}

struct GstVideoDecoder {
    inner: DecodePipeline,
}

impl GstVideoDecoder {
    fn new(stream: &StreamInfo) -> Result<Self, CodecError> {
        let raw_caps = gst::Caps::builder("video/x-raw").field("format", "I420").build();
        Ok(Self {
            inner: DecodePipeline::new(stream, &["videoconvert"], &raw_caps)?,
        })
    }
}

impl VideoDecoder for GstVideoDecoder {
    fn decode(&mut self, packet: &Packet) -> Result<Option<DecodedPicture>, CodecError> {
        self.inner.push(packet)?;
        let Some(sample) = self
            .inner
            .appsink
            .try_pull_sample(gst::ClockTime::from_mseconds(DECODE_WAIT_MS))
        else {
            return Ok(None);
        };
        picture_from_sample(&sample, self.inner.time_base).map(Some)
    }
}

struct GstAudioDecoder {
    inner: DecodePipeline,
}

impl GstAudioDecoder {
    fn new(stream: &StreamInfo) -> Result<Self, CodecError> {
        let raw_caps = s16_caps(stream.sample_rate, stream.channels);
        Ok(Self {
            inner: DecodePipeline::new(stream, &["audioconvert", "audioresample"], &raw_caps)?,
        })
    }
}

impl AudioDecoder for GstAudioDecoder {
    fn decode(&mut self, packet: &Packet) -> Result<Vec<i16>, CodecError> {
        self.inner.push(packet)?;
        let mut samples = Vec::new();
        for data in drain(&self.inner.appsink)? {
            samples.extend(data.chunks_exact(2).map(|b| i16::from_le_bytes([b[0], b[1]])));
        }
        Ok(samples)
    }
}

/// Everything the sink has ready, waiting briefly for the first sample
fn drain(appsink: &gst_app::AppSink) -> Result<Vec<Vec<u8>>, CodecError> {
    let mut out = Vec::new();
    let mut wait = gst::ClockTime::from_mseconds(DECODE_WAIT_MS);
    while let Some(sample) = appsink.try_pull_sample(wait) {
        let buffer = sample
            .buffer()
            .ok_or_else(|| CodecError::Decode("No buffer in sample".into()))?;
        let map = buffer
            .map_readable()
            .map_err(|e| CodecError::Decode(format!("Failed to map buffer: {}", e)))?;
        out.push(map.as_slice().to_vec());
        wait = gst::ClockTime::ZERO;
    }
    Ok(out)
}

// ============================================================================
// AAC encoder
// ============================================================================

struct GstAacEncoder {
    pipeline: gst::Pipeline,
    appsrc: gst_app::AppSrc,
    appsink: gst_app::AppSink,
    sample_rate: u32,
    channels: u16,
    samples_pushed: u64,
    ready: VecDeque<Vec<u8>>,
}

impl GstAacEncoder {
    fn new(sample_rate: u32, channels: u16) -> Result<Self, CodecError> {
        let (factory, encoder) = AAC_ENCODERS
            .iter()
            .find_map(|factory| make_element(factory).ok().map(|e| (*factory, e)))
            .ok_or_else(|| CodecError::Unsupported("no AAC encoder element installed".into()))?;

        let pipeline = gst::Pipeline::new();
        let appsrc = gst_app::AppSrc::builder()
            .name("pcm")
            .caps(&s16_caps(sample_rate, channels))
            .format(gst::Format::Time)
            .is_live(true)
            .build();
        let audioconvert = make_element("audioconvert").map_err(CodecError::Open)?;
        let aacparse = make_element("aacparse").map_err(CodecError::Open)?;
        let adts_caps = gst::Caps::builder("audio/mpeg")
            .field("mpegversion", 4i32)
            .field("stream-format", "adts")
            .build();
        let appsink = gst_app::AppSink::builder()
            .name("aac")
            .caps(&adts_caps)
            .sync(false)
            .build();

        pipeline
            .add_many([appsrc.upcast_ref(), &audioconvert, &encoder, &aacparse, appsink.upcast_ref()])
            .map_err(|e| CodecError::Open(format!("Failed to add elements: {}", e)))?;
        gst::Element::link_many([appsrc.upcast_ref(), &audioconvert, &encoder, &aacparse, appsink.upcast_ref()])
            .map_err(|e| CodecError::Open(format!("Failed to link {} pipeline: {}", factory, e)))?;

        pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| CodecError::Open(format!("Failed to start {}: {:?}", factory, e)))?;
        log::info!("[Encoder] Using {} for AAC at {} Hz x{}", factory, sample_rate, channels);

        Ok(Self {
            pipeline,
            appsrc,
            appsink,
            sample_rate: sample_rate.max(1),
            channels: channels.max(1),
            samples_pushed: 0,
            ready: VecDeque::new(),
        })
    }

    fn clock_time(&self, samples: u64) -> gst::ClockTime {
        gst::ClockTime::from_nseconds(samples * 1_000_000_000 / self.sample_rate as u64)
    }
}

impl AudioEncoder for GstAacEncoder {
    fn frame_size(&self) -> usize {
        AAC_FRAME_SIZE
    }

    fn encode(&mut self, samples: &[i16]) -> Result<Option<Vec<u8>>, CodecError> {
        let frames = (samples.len() / self.channels as usize) as u64;
        let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        let mut buffer = gst::Buffer::from_slice(bytes);
        {
            let buffer_ref = buffer
                .get_mut()
                .ok_or_else(|| CodecError::Encode("buffer is shared".into()))?;
            buffer_ref.set_pts(self.clock_time(self.samples_pushed));
            buffer_ref.set_duration(self.clock_time(frames));
        }
        self.samples_pushed += frames;
        self.appsrc
            .push_buffer(buffer)
            .map_err(|e| CodecError::Encode(format!("Failed to push samples: {:?}", e)))?;

        let encoded = drain(&self.appsink).map_err(|e| CodecError::Encode(e.to_string()))?;
        self.ready.extend(encoded);
        Ok(self.ready.pop_front())
    }
}

impl Drop for GstAacEncoder {
    fn drop(&mut self) {
        let _ = self.pipeline.set_state(gst::State::Null);
    }
}

/// Copy an I420 sample into a picture timestamped in `time_base`
fn picture_from_sample(sample: &gst::Sample, time_base: Rational) -> Result<DecodedPicture, CodecError> {
    let caps = sample
        .caps()
        .ok_or_else(|| CodecError::Decode("Decoded sample has no caps".into()))?;
    let info = gst_video::VideoInfo::from_caps(caps)
        .map_err(|e| CodecError::Decode(format!("Unexpected decoded caps: {}", e)))?;
    let buffer = sample
        .buffer()
        .ok_or_else(|| CodecError::Decode("No buffer in sample".into()))?;
    let frame = gst_video::VideoFrameRef::from_buffer_ref_readable(buffer, &info)
        .map_err(|_| CodecError::Decode("Failed to map decoded frame".into()))?;

    let height = info.height() as usize;
    let mut planes = Vec::with_capacity(3);
    for plane in 0..3u32 {
        let rows = if plane == 0 { height } else { height.div_ceil(2) };
        let stride = frame.plane_stride()[plane as usize] as usize;
        let data = frame
            .plane_data(plane)
            .map_err(|e| CodecError::Decode(format!("Missing plane {}: {}", plane, e)))?;
        let len = (stride * rows).min(data.len());
        planes.push(Plane {
            data: data[..len].to_vec(),
            stride,
        });
    }

    Ok(DecodedPicture {
        width: info.width(),
        height: info.height(),
        layout: PixelLayout::Yuv420p,
        planes,
        pts: buffer
            .pts()
            .map_or(0, |t| rescale(t.nseconds() as i64, NANOSECONDS, time_base)),
    })
}
