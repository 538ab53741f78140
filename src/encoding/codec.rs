// Codec engine interface
//
// Decoding and encoding are delegated to an external engine. The pipeline
// only needs a video decoder for live frames and, for containers that force
// an audio codec, an audio decoder/encoder pair.

use crate::error::CodecError;
use crate::video::{DecodedPicture, Packet, StreamInfo};

pub trait VideoDecoder: Send {
    /// Feed one packet. Returns a picture when one is complete.
    fn decode(&mut self, packet: &Packet) -> Result<Option<DecodedPicture>, CodecError>;
}

pub trait AudioDecoder: Send {
    /// Feed one packet. Returns interleaved signed 16-bit samples.
    fn decode(&mut self, packet: &Packet) -> Result<Vec<i16>, CodecError>;
}

pub trait AudioEncoder: Send {
    /// Samples per channel the encoder consumes per frame (1024 for AAC)
    fn frame_size(&self) -> usize;

    /// Encode exactly one frame of interleaved samples
    fn encode(&mut self, samples: &[i16]) -> Result<Option<Vec<u8>>, CodecError>;

    fn extradata(&self) -> Option<Vec<u8>> {
        None
    }
}

pub trait CodecEngine: Send + Sync {
    fn open_video_decoder(&self, stream: &StreamInfo) -> Result<Box<dyn VideoDecoder>, CodecError>;

    fn open_audio_decoder(&self, stream: &StreamInfo) -> Result<Box<dyn AudioDecoder>, CodecError>;

    fn open_audio_encoder(
        &self,
        codec: &str,
        sample_rate: u32,
        channels: u16,
    ) -> Result<Box<dyn AudioEncoder>, CodecError>;
}
