// Fragment writer
//
// Pipeline per output stream: appsrc → [parser] → <container mux> → filesink
//
// Packets arrive in the 1/90000 output timebase and are pushed with their
// pts/dts converted to clock time. Finishing sends EOS on every appsrc and
// waits for the muxer to write its trailer.

use std::path::{Path, PathBuf};

use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;

use super::{caps_for_codec, encoded_caps, init_gstreamer_env, make_element, NANOSECONDS};
use crate::encoding::{ContainerFormat, Destination, Muxer, StreamDescriptor};
use crate::error::DestinationError;
use crate::video::{rescale, Packet, Rational};

#[derive(Debug, Default, Clone, Copy)]
pub struct GstMuxer;

impl GstMuxer {
    pub fn new() -> Self {
        Self
    }
}

impl Muxer for GstMuxer {
    fn open(
        &self,
        format: ContainerFormat,
        path: &Path,
        streams: &[StreamDescriptor],
    ) -> Result<Box<dyn Destination>, DestinationError> {
        if !init_gstreamer_env() {
            return Err(open_error(path, "GStreamer is not available"));
        }
        Ok(Box::new(GstDestination::new(format, path, streams)?))
    }
}

struct StreamInput {
    index: usize,
    appsrc: gst_app::AppSrc,
    time_base: Rational,
}

struct GstDestination {
    pipeline: gst::Pipeline,
    inputs: Vec<StreamInput>,
    path: PathBuf,
}

impl GstDestination {
    fn new(format: ContainerFormat, path: &Path, streams: &[StreamDescriptor]) -> Result<Self, DestinationError> {
        let pipeline = gst::Pipeline::new();

        let muxer = make_element(format.gst_muxer()).map_err(|e| open_error(path, e))?;
        if format == ContainerFormat::Mkv {
            muxer.set_property("writing-app", "Retrocap");
        }
        let filesink = gst::ElementFactory::make("filesink")
            .property("location", path.to_string_lossy().to_string())
            .property("async", false)
            .build()
            .map_err(|e| open_error(path, format!("Failed to create filesink: {}", e)))?;
        pipeline
            .add_many([&muxer, &filesink])
            .map_err(|e| open_error(path, format!("Failed to add elements: {}", e)))?;
        muxer
            .link(&filesink)
            .map_err(|e| open_error(path, format!("Failed to link muxer: {}", e)))?;

        let mut inputs = Vec::with_capacity(streams.len());
        for stream in streams {
            inputs.push(add_stream(&pipeline, &muxer, stream).map_err(|e| open_error(path, e))?);
        }

        pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| open_error(path, format!("Failed to start writer: {:?}", e)))?;
        log::debug!("[Writer] {} pipeline started for {}", format.gst_muxer(), path.display());

        Ok(Self {
            pipeline,
            inputs,
            path: path.to_path_buf(),
        })
    }

    fn clock_time(ts: i64, time_base: Rational) -> gst::ClockTime {
        gst::ClockTime::from_nseconds(rescale(ts, time_base, NANOSECONDS).max(0) as u64)
    }
}

fn add_stream(pipeline: &gst::Pipeline, muxer: &gst::Element, stream: &StreamDescriptor) -> Result<StreamInput, String> {
    let caps = encoded_caps(
        &stream.codec,
        stream.width,
        stream.height,
        stream.sample_rate,
        stream.channels,
        stream.extradata.as_deref(),
    )
    .ok_or_else(|| format!("No caps for codec {}", stream.codec))?;

    let appsrc = gst_app::AppSrc::builder()
        .name(format!("src{}", stream.index))
        .caps(&caps)
        .format(gst::Format::Time)
        .is_live(true)
        .build();
    pipeline
        .add(&appsrc)
        .map_err(|e| format!("Failed to add appsrc: {}", e))?;

    let parser = caps_for_codec(&stream.codec).and_then(|(_, parser)| parser);
    match parser {
        Some(parser) => {
            let parser = make_element(parser)?;
            pipeline
                .add(&parser)
                .map_err(|e| format!("Failed to add parser: {}", e))?;
            gst::Element::link_many([appsrc.upcast_ref(), &parser, muxer])
                .map_err(|e| format!("Failed to link stream {}: {}", stream.index, e))?;
        }
        None => {
            appsrc
                .link(muxer)
                .map_err(|e| format!("Failed to link stream {}: {}", stream.index, e))?;
        }
    }

    Ok(StreamInput {
        index: stream.index,
        appsrc,
        time_base: stream.time_base,
    })
}

impl Destination for GstDestination {
    fn write_packet(&mut self, packet: &Packet) -> Result<(), DestinationError> {
        let input = self
            .inputs
            .iter()
            .find(|input| input.index == packet.stream_index)
            .ok_or_else(|| DestinationError::Write(format!("no output stream {}", packet.stream_index)))?;

        let mut buffer = gst::Buffer::from_slice(packet.data.clone());
        {
            let buffer_ref = buffer
                .get_mut()
                .ok_or_else(|| DestinationError::Write("buffer is shared".into()))?;
            buffer_ref.set_pts(Self::clock_time(packet.pts, input.time_base));
            buffer_ref.set_dts(Self::clock_time(packet.dts, input.time_base));
            if packet.duration > 0 {
                buffer_ref.set_duration(Self::clock_time(packet.duration, input.time_base));
            }
            if !packet.keyframe {
                buffer_ref.set_flags(gst::BufferFlags::DELTA_UNIT);
            }
        }

        input
            .appsrc
            .push_buffer(buffer)
            .map_err(|e| DestinationError::Write(format!("Failed to push buffer: {:?}", e)))?;
        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<PathBuf, DestinationError> {
        for input in &self.inputs {
            if let Err(e) = input.appsrc.end_of_stream() {
                log::warn!("[Writer] Failed to send EOS on stream {}: {:?}", input.index, e);
            }
        }

        let mut pipeline_error: Option<String> = None;
        if let Some(bus) = self.pipeline.bus() {
            for msg in bus.iter_timed(gst::ClockTime::from_seconds(5)) {
                match msg.view() {
                    gst::MessageView::Eos(..) => break,
                    gst::MessageView::Error(err) => {
                        pipeline_error = Some(format!("Pipeline error: {} ({:?})", err.error(), err.debug()));
                        break;
                    }
                    _ => {}
                }
            }
        }

        // Always set pipeline to NULL before dropping to avoid GStreamer warnings
        let _ = self.pipeline.set_state(gst::State::Null);

        match pipeline_error {
            Some(err) => Err(DestinationError::Finish(err)),
            None => Ok(self.path.clone()),
        }
    }
}

impl Drop for GstDestination {
    fn drop(&mut self) {
        let _ = self.pipeline.set_state(gst::State::Null);
    }
}

fn open_error(path: &Path, reason: impl Into<String>) -> DestinationError {
    DestinationError::Open {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
}
