use crate::encoding::{AudioDecoder, AudioEncoder, CodecEngine, VideoDecoder};
use crate::error::CodecError;
use crate::video::{DecodedPicture, MediaKind, Packet, PixelLayout, StreamInfo};

// ── Codec engine ─────────────────────────────────────────────────────

/// Codec engine whose "bitstreams" are trivial:
/// video payloads are `[y, u, v]` solid colours, audio payloads are
/// little-endian i16 PCM, and the AAC encoder emits the frame length.
#[derive(Debug, Clone)]
pub struct FakeCodecs {
    pub width: u32,
    pub height: u32,
    pub aac_available: bool,
}

impl FakeCodecs {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            aac_available: true,
        }
    }

    pub fn without_aac(mut self) -> Self {
        self.aac_available = false;
        self
    }
}

impl Default for FakeCodecs {
    fn default() -> Self {
        Self::new(super::TEST_WIDTH, super::TEST_HEIGHT)
    }
}

impl CodecEngine for FakeCodecs {
    fn open_video_decoder(&self, stream: &StreamInfo) -> Result<Box<dyn VideoDecoder>, CodecError> {
        if stream.kind != MediaKind::Video {
            return Err(CodecError::Open(format!("stream {} is not video", stream.index)));
        }
        Ok(Box::new(SolidColorDecoder {
            width: self.width,
            height: self.height,
        }))
    }

    fn open_audio_decoder(&self, _stream: &StreamInfo) -> Result<Box<dyn AudioDecoder>, CodecError> {
        Ok(Box::new(PcmDecoder))
    }

    fn open_audio_encoder(
        &self,
        codec: &str,
        _sample_rate: u32,
        channels: u16,
    ) -> Result<Box<dyn AudioEncoder>, CodecError> {
        if codec != "aac" || !self.aac_available {
            return Err(CodecError::Unsupported(codec.to_string()));
        }
        Ok(Box::new(FrameLengthEncoder { channels }))
    }
}

struct SolidColorDecoder {
    width: u32,
    height: u32,
}

impl VideoDecoder for SolidColorDecoder {
    fn decode(&mut self, packet: &Packet) -> Result<Option<DecodedPicture>, CodecError> {
        let &[y, u, v] = packet.data.as_slice() else {
            return Err(CodecError::Decode(format!("{} byte payload", packet.data.len())));
        };
        let mut picture = DecodedPicture::solid(self.width, self.height, PixelLayout::Yuv420p, y, u, v);
        picture.pts = packet.pts;
        Ok(Some(picture))
    }
}

struct PcmDecoder;

impl AudioDecoder for PcmDecoder {
    fn decode(&mut self, packet: &Packet) -> Result<Vec<i16>, CodecError> {
        if packet.data.len() % 2 != 0 {
            return Err(CodecError::Decode("odd PCM payload".into()));
        }
        Ok(packet
            .data
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect())
    }
}

struct FrameLengthEncoder {
    channels: u16,
}

impl AudioEncoder for FrameLengthEncoder {
    fn frame_size(&self) -> usize {
        1024
    }

    fn encode(&mut self, samples: &[i16]) -> Result<Option<Vec<u8>>, CodecError> {
        if samples.len() != 1024 * self.channels as usize {
            return Err(CodecError::Encode(format!("partial frame of {}", samples.len())));
        }
        Ok(Some((samples.len() as u32).to_le_bytes().to_vec()))
    }
}
