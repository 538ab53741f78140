// Audio re-encode path
//
// Containers that force an audio codec (MP4 -> AAC) get their source audio
// decoded to S16, regrouped into encoder-sized frames and re-encoded.

use super::codec::{AudioDecoder, AudioEncoder, CodecEngine};
use super::muxer::StreamDescriptor;
use crate::error::CodecError;
use crate::video::{rescale, Packet, Rational, StreamInfo, OUTPUT_TIME_BASE};

/// Regroups arbitrarily sized sample chunks into fixed encoder frames
#[derive(Debug)]
pub struct AudioFrameAccumulator {
    pending: Vec<i16>,
    frame_len: usize,
}

impl AudioFrameAccumulator {
    /// `frame_size` samples per channel, interleaved over `channels`
    pub fn new(frame_size: usize, channels: u16) -> Self {
        let frame_len = frame_size.max(1) * channels.max(1) as usize;
        Self {
            pending: Vec::with_capacity(frame_len * 2),
            frame_len,
        }
    }

    pub fn push(&mut self, samples: &[i16]) {
        self.pending.extend_from_slice(samples);
    }

    /// Take one complete frame, shifting the remainder down
    pub fn pop_frame(&mut self) -> Option<Vec<i16>> {
        if self.pending.len() < self.frame_len {
            return None;
        }
        Some(self.pending.drain(..self.frame_len).collect())
    }

    /// Samples waiting for the next frame
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn frame_len(&self) -> usize {
        self.frame_len
    }
}

pub struct AudioTranscoder {
    stream_index: usize,
    target_codec: String,
    decoder: Box<dyn AudioDecoder>,
    encoder: Box<dyn AudioEncoder>,
    accumulator: AudioFrameAccumulator,
    /// Output timestamp of the next emitted frame
    next_ts: Option<i64>,
    frame_duration: i64,
}

impl AudioTranscoder {
    pub fn open(engine: &dyn CodecEngine, stream: &StreamInfo, target_codec: &str) -> Result<Self, CodecError> {
        if stream.sample_rate == 0 {
            return Err(CodecError::Open(format!(
                "stream {} has no sample rate",
                stream.index
            )));
        }
        let decoder = engine.open_audio_decoder(stream)?;
        let encoder = engine.open_audio_encoder(target_codec, stream.sample_rate, stream.channels)?;
        let frame_size = encoder.frame_size();
        let frame_duration = rescale(
            frame_size as i64,
            Rational::new(1, stream.sample_rate as i32),
            OUTPUT_TIME_BASE,
        );

        log::info!(
            "[Audio] Re-encoding stream {} from {} to {} ({} samples per frame)",
            stream.index,
            stream.codec,
            target_codec,
            frame_size
        );

        Ok(Self {
            stream_index: stream.index,
            target_codec: target_codec.to_string(),
            decoder,
            encoder,
            accumulator: AudioFrameAccumulator::new(frame_size, stream.channels),
            next_ts: None,
            frame_duration,
        })
    }

    pub fn stream_index(&self) -> usize {
        self.stream_index
    }

    /// Descriptor for the re-encoded output stream
    pub fn descriptor(&self, source: &StreamInfo) -> StreamDescriptor {
        let mut desc = StreamDescriptor::copy_of(source);
        desc.codec = self.target_codec.clone();
        desc.extradata = self.encoder.extradata();
        desc
    }

    /// Decode `packet` and return every complete re-encoded frame.
    ///
    /// `out_dts` is the packet's dts already rebased into the output
    /// timebase; it anchors the first frame of the fragment.
    pub fn transcode(&mut self, packet: &Packet, out_dts: i64) -> Result<Vec<Packet>, CodecError> {
        let samples = self.decoder.decode(packet)?;
        self.accumulator.push(&samples);

        let mut ts = *self.next_ts.get_or_insert(out_dts);
        let mut out = Vec::new();
        while let Some(frame) = self.accumulator.pop_frame() {
            let Some(data) = self.encoder.encode(&frame)? else {
                continue;
            };
            let frame_ts = ts;
            ts += self.frame_duration;
            self.next_ts = Some(ts);
            out.push(Packet::new(self.stream_index, frame_ts, frame_ts, true, data).with_duration(self.frame_duration));
        }
        Ok(out)
    }
}
