// Demuxing source
//
// Pipeline: urisourcebin → parsebin → appsink (video)
//                                   → appsink (audio, when present)
//
// parsebin exposes parsed elementary streams. The first video pad is linked
// to the video appsink; the first audio pad the muxer can carry gets its own
// appsink, added while the pipeline prerolls. Frame rate and duration come
// from the Discoverer.

use std::path::Path;
use std::sync::Arc;

use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use gstreamer_pbutils as gst_pbutils;
use gst_pbutils::prelude::*;
use parking_lot::Mutex;

use super::{caps_for_codec, codec_for_caps, init_gstreamer_env, make_element, NANOSECONDS};
use crate::error::SourceError;
use crate::video::{FrameSource, Packet, SourceFrame, SourceInfo, StreamInfo};

const PULL_TIMEOUT_MS: u64 = 100;

const VIDEO_INDEX: usize = 0;
const AUDIO_INDEX: usize = 1;

pub struct GstSource {
    info: SourceInfo,
    pipeline: gst::Pipeline,
    video_sink: gst_app::AppSink,
    audio_sink: Option<gst_app::AppSink>,
    /// Next packet of each stream, held back so the streams leave in dts order
    pending: [Option<Packet>; 2],
}

impl GstSource {
    /// Open a URI, or a local path which is turned into a `file://` URI
    pub fn open(location: &str) -> Result<Self, SourceError> {
        if !init_gstreamer_env() {
            return Err(SourceError::Open("GStreamer is not available".into()));
        }
        let uri = to_uri(location)?;

        let pipeline = gst::Pipeline::new();
        let urisourcebin = gst::ElementFactory::make("urisourcebin")
            .property("uri", uri.as_str())
            .build()
            .map_err(|e| SourceError::Open(format!("Failed to create urisourcebin: {}", e)))?;
        let parsebin = make_element("parsebin").map_err(SourceError::Open)?;
        let video_sink = gst_app::AppSink::builder()
            .name("video")
            .sync(false)
            .build();

        pipeline
            .add_many([&urisourcebin, &parsebin, video_sink.upcast_ref()])
            .map_err(|e| SourceError::Open(format!("Failed to add elements: {}", e)))?;

        let parsebin_weak = parsebin.downgrade();
        urisourcebin.connect_pad_added(move |_src, pad| {
            let Some(parsebin) = parsebin_weak.upgrade() else {
                return;
            };
            link_once(pad, &parsebin, "source");
        });

        let audio_slot: Arc<Mutex<Option<gst_app::AppSink>>> = Arc::default();
        let video_weak = video_sink.downgrade();
        let pipeline_weak = pipeline.downgrade();
        let audio_slot_cb = audio_slot.clone();
        parsebin.connect_pad_added(move |_parsebin, pad| {
            let caps = pad.current_caps().unwrap_or_else(|| pad.query_caps(None));
            let Some(structure) = caps.structure(0) else {
                return;
            };
            let name = structure.name().as_str();

            if name.starts_with("video/") || name == "image/jpeg" {
                if let Some(video_sink) = video_weak.upgrade() {
                    link_once(pad, video_sink.upcast_ref(), "video");
                }
                return;
            }

            let codec = codec_for_caps(structure);
            if !name.starts_with("audio/") || caps_for_codec(&codec).is_none() {
                log::debug!("[Source] Ignoring stream with caps '{}'", name);
                return;
            }
            let Some(pipeline) = pipeline_weak.upgrade() else {
                return;
            };
            let mut slot = audio_slot_cb.lock();
            if slot.is_some() {
                log::debug!("[Source] Ignoring extra {} audio stream", codec);
                return;
            }
            let audio_sink = gst_app::AppSink::builder().name("audio").sync(false).build();
            if let Err(e) = pipeline.add(&audio_sink) {
                log::warn!("[Source] Failed to add audio sink: {}", e);
                return;
            }
            link_once(pad, audio_sink.upcast_ref(), "audio");
            if let Err(e) = audio_sink.sync_state_with_parent() {
                log::warn!("[Source] Audio sink did not follow the pipeline state: {}", e);
            }
            *slot = Some(audio_sink);
        });

        pipeline
            .set_state(gst::State::Paused)
            .map_err(|e| SourceError::Open(format!("Failed to set pipeline to PAUSED: {:?}", e)))?;

        let prerolled = wait_for_preroll(&pipeline).and_then(|()| describe_video(&video_sink));
        let video = match prerolled {
            Ok(video) => video,
            Err(e) => {
                let _ = pipeline.set_state(gst::State::Null);
                return Err(e);
            }
        };

        let mut streams = vec![video];
        let mut audio_sink = audio_slot.lock().take();
        if let Some(sink) = audio_sink.as_ref() {
            match describe_audio(sink) {
                Some(audio) => streams.push(audio),
                None => {
                    log::warn!("[Source] Audio stream did not preroll, recording video only");
                    sink.set_max_buffers(1);
                    sink.set_drop(true);
                }
            }
        }
        if streams.len() == 1 {
            audio_sink = None;
        }

        let (frame_rate, duration) = discover(&uri);
        let frame_count = match (frame_rate, duration) {
            (Some(fps), Some(duration)) => Some((duration.seconds_f64() * fps).round() as u64),
            _ => None,
        };
        log::info!(
            "[Source] Opened {} ({} {}x{}, {:?} fps{})",
            uri,
            streams[0].codec,
            streams[0].width,
            streams[0].height,
            frame_rate,
            streams
                .get(AUDIO_INDEX)
                .map(|a| format!(", {} {} Hz x{}", a.codec, a.sample_rate, a.channels))
                .unwrap_or_default()
        );

        pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| SourceError::Open(format!("Failed to set pipeline to PLAYING: {:?}", e)))?;

        Ok(Self {
            info: SourceInfo {
                streams,
                video_stream: VIDEO_INDEX,
                frame_count,
                frame_rate,
                provides_pictures: false,
            },
            pipeline,
            video_sink,
            audio_sink,
            pending: [None, None],
        })
    }

    fn check_bus(&self) -> Result<(), SourceError> {
        let Some(bus) = self.pipeline.bus() else {
            return Ok(());
        };
        while let Some(msg) = bus.pop_filtered(&[gst::MessageType::Error]) {
            if let gst::MessageView::Error(err) = msg.view() {
                return Err(SourceError::Read(format!("{} ({:?})", err.error(), err.debug())));
            }
        }
        Ok(())
    }
}

impl FrameSource for GstSource {
    fn info(&self) -> &SourceInfo {
        &self.info
    }

    fn read(&mut self) -> Result<Option<SourceFrame>, SourceError> {
        let video_done = self.video_sink.is_eos();
        if self.pending[VIDEO_INDEX].is_none() && !video_done {
            self.pending[VIDEO_INDEX] = pull_packet(&self.video_sink, VIDEO_INDEX, PULL_TIMEOUT_MS)?;
        }
        if let Some(audio_sink) = &self.audio_sink {
            if self.pending[AUDIO_INDEX].is_none() && !audio_sink.is_eos() {
                // Only block on audio once video has ended
                let wait = if video_done { PULL_TIMEOUT_MS } else { 0 };
                self.pending[AUDIO_INDEX] = pull_packet(audio_sink, AUDIO_INDEX, wait)?;
            }
        }

        let next = match (&self.pending[VIDEO_INDEX], &self.pending[AUDIO_INDEX]) {
            (Some(video), Some(audio)) if audio.dts < video.dts => AUDIO_INDEX,
            (Some(_), _) => VIDEO_INDEX,
            (None, Some(_)) => AUDIO_INDEX,
            (None, None) => {
                self.check_bus()?;
                let audio_done = self.audio_sink.as_ref().map_or(true, |sink| sink.is_eos());
                if self.video_sink.is_eos() && audio_done {
                    return Ok(None);
                }
                return Ok(Some(SourceFrame::default()));
            }
        };
        Ok(self.pending[next].take().map(SourceFrame::packet))
    }
}

impl Drop for GstSource {
    fn drop(&mut self) {
        let _ = self.pipeline.set_state(gst::State::Null);
    }
}

fn to_uri(location: &str) -> Result<String, SourceError> {
    if location.contains("://") {
        return Ok(location.to_string());
    }
    let path = std::fs::canonicalize(Path::new(location))
        .map_err(|e| SourceError::Open(format!("{}: {}", location, e)))?;
    gst::glib::filename_to_uri(&path, None)
        .map(|uri| uri.to_string())
        .map_err(|e| SourceError::Open(format!("{}: {}", location, e)))
}

fn link_once(pad: &gst::Pad, sink: &gst::Element, what: &str) {
    let Some(sink_pad) = sink.static_pad("sink") else {
        return;
    };
    if sink_pad.is_linked() {
        return;
    }
    if let Err(e) = pad.link(&sink_pad) {
        log::warn!("[Source] Failed to link {} pad: {:?}", what, e);
    }
}

/// Pull one sample and turn it into a packet in nanoseconds
fn pull_packet(sink: &gst_app::AppSink, stream_index: usize, wait_ms: u64) -> Result<Option<Packet>, SourceError> {
    let Some(sample) = sink.try_pull_sample(gst::ClockTime::from_mseconds(wait_ms)) else {
        return Ok(None);
    };
    let buffer = sample
        .buffer()
        .ok_or_else(|| SourceError::Read("No buffer in sample".into()))?;
    let pts = buffer.pts().map(|t| t.nseconds() as i64);
    let dts = buffer.dts().map(|t| t.nseconds() as i64).or(pts).unwrap_or(0);
    let duration = buffer.duration().map_or(0, |t| t.nseconds() as i64);
    let keyframe = !buffer.flags().contains(gst::BufferFlags::DELTA_UNIT);

    let map = buffer
        .map_readable()
        .map_err(|e| SourceError::Read(format!("Failed to map buffer: {}", e)))?;
    let packet = Packet::new(stream_index, dts, pts.unwrap_or(dts), keyframe, map.as_slice().to_vec())
        .with_duration(duration);
    Ok(Some(packet))
}

fn wait_for_preroll(pipeline: &gst::Pipeline) -> Result<(), SourceError> {
    let bus = pipeline
        .bus()
        .ok_or_else(|| SourceError::Open("Failed to get pipeline bus".into()))?;

    for msg in bus.iter_timed(gst::ClockTime::from_seconds(10)) {
        match msg.view() {
            gst::MessageView::AsyncDone(_) => break,
            gst::MessageView::Error(err) => {
                return Err(SourceError::Open(format!(
                    "Pipeline error: {} ({:?})",
                    err.error(),
                    err.debug()
                )));
            }
            _ => {}
        }
    }
    Ok(())
}

fn preroll_caps(sink: &gst_app::AppSink, wait: gst::ClockTime) -> Option<gst::Caps> {
    let sample = sink.try_pull_preroll(wait)?;
    sample.caps().map(|caps| caps.to_owned())
}

fn codec_data(structure: &gst::StructureRef) -> Option<Vec<u8>> {
    let buffer = structure.get::<gst::Buffer>("codec_data").ok()?;
    let map = buffer.map_readable().ok()?;
    Some(map.as_slice().to_vec())
}

/// Describe the video stream from its preroll sample
fn describe_video(sink: &gst_app::AppSink) -> Result<StreamInfo, SourceError> {
    let caps = preroll_caps(sink, gst::ClockTime::from_seconds(5))
        .ok_or_else(|| SourceError::Open("No video stream found".into()))?;
    let structure = caps
        .structure(0)
        .ok_or_else(|| SourceError::Open("Video stream has empty caps".into()))?;

    let width = structure.get::<i32>("width").unwrap_or(0).max(0) as u32;
    let height = structure.get::<i32>("height").unwrap_or(0).max(0) as u32;
    let mut stream = StreamInfo::video(VIDEO_INDEX, &codec_for_caps(structure), NANOSECONDS, width, height);
    stream.extradata = codec_data(structure);
    Ok(stream)
}

fn describe_audio(sink: &gst_app::AppSink) -> Option<StreamInfo> {
    let caps = preroll_caps(sink, gst::ClockTime::from_seconds(1))?;
    let structure = caps.structure(0)?;
    let rate = structure.get::<i32>("rate").ok()?.max(0) as u32;
    let channels = structure.get::<i32>("channels").unwrap_or(1).clamp(1, u16::MAX as i32) as u16;
    let mut stream = StreamInfo::audio(AUDIO_INDEX, &codec_for_caps(structure), NANOSECONDS, rate, channels);
    stream.extradata = codec_data(structure);
    Some(stream)
}

/// Frame rate and duration from the Discoverer
fn discover(uri: &str) -> (Option<f64>, Option<gst::ClockTime>) {
    let Ok(discoverer) = gst_pbutils::Discoverer::new(gst::ClockTime::from_seconds(10)) else {
        return (None, None);
    };
    let Ok(info) = discoverer.discover_uri(uri) else {
        log::debug!("[Source] Discoverer could not inspect {}", uri);
        return (None, None);
    };

    let frame_rate = info.video_streams().first().and_then(|stream| {
        let caps = stream.caps()?;
        let fps = caps.structure(0)?.get::<gst::Fraction>("framerate").ok()?;
        let value = fps.numer() as f64 / fps.denom() as f64;
        (value > 0.0).then_some(value)
    });
    (frame_rate, info.duration())
}
