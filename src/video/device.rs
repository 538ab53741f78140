// Capture device adapter
//
// Pairs a raw YUYV capture device with a hardware H.264 encoder and exposes
// the pair as a FrameSource. Every grabbed frame is published as a live
// picture; encoded output becomes packets in a 1/fps timebase.

use super::{DecodedPicture, FrameSource, Packet, Rational, SourceFrame, SourceInfo, StreamInfo};
use crate::error::{CodecError, SourceError};

/// Hardware encoders do not flag keyframes reliably, so one is forced
/// every this many encoded packets
pub const DEFAULT_GOP_SIZE: u32 = 12;

/// Negotiated capture format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureFormat {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

/// A device delivering packed 4:2:2 (YUYV) frames
pub trait CaptureDevice: Send {
    fn format(&self) -> CaptureFormat;

    /// Block until the next frame is available and return its bytes
    fn grab(&mut self) -> Result<Vec<u8>, SourceError>;
}

/// An encoder turning YUYV frames into compressed packets
pub trait HardwareEncoder: Send {
    /// Codec name of the produced stream, e.g. "h264"
    fn codec(&self) -> &str;

    /// Codec parameter sets, available once the encoder is configured
    fn extradata(&self) -> Option<Vec<u8>>;

    /// Encode one frame. Encoders with internal latency may return nothing.
    fn encode(&mut self, frame: &[u8], force_keyframe: bool) -> Result<Option<Vec<u8>>, CodecError>;
}

pub struct DeviceSource<D, E> {
    device: D,
    encoder: E,
    info: SourceInfo,
    format: CaptureFormat,
    gop_size: u32,
    frames_grabbed: u64,
    packets_encoded: u64,
}

impl<D: CaptureDevice, E: HardwareEncoder> DeviceSource<D, E> {
    pub fn new(device: D, encoder: E, gop_size: u32) -> Self {
        let format = device.format();
        let mut stream = StreamInfo::video(
            0,
            encoder.codec(),
            Rational::new(1, format.fps.max(1) as i32),
            format.width,
            format.height,
        );
        stream.extradata = encoder.extradata();
        stream.repeat_headers = true;

        log::info!(
            "[Device] Capture source {}x{} @ {} fps, keyframe every {} packets",
            format.width,
            format.height,
            format.fps,
            gop_size
        );

        Self {
            device,
            encoder,
            info: SourceInfo {
                streams: vec![stream],
                video_stream: 0,
                frame_count: None,
                frame_rate: Some(format.fps as f64),
                provides_pictures: true,
            },
            format,
            gop_size: gop_size.max(1),
            frames_grabbed: 0,
            packets_encoded: 0,
        }
    }
}

impl<D: CaptureDevice, E: HardwareEncoder> FrameSource for DeviceSource<D, E> {
    fn info(&self) -> &SourceInfo {
        &self.info
    }

    fn read(&mut self) -> Result<Option<SourceFrame>, SourceError> {
        let raw = self.device.grab()?;
        let expected = self.format.width as usize * self.format.height as usize * 2;
        if raw.len() < expected {
            return Err(SourceError::Device(format!(
                "short frame: {} bytes, expected {}",
                raw.len(),
                expected
            )));
        }

        let force_keyframe = self.packets_encoded % self.gop_size as u64 == 0;
        let packet = match self.encoder.encode(&raw, force_keyframe) {
            Ok(Some(data)) => {
                let ts = self.packets_encoded as i64;
                self.packets_encoded += 1;
                Some(Packet::new(0, ts, ts, force_keyframe, data).with_duration(1))
            }
            Ok(None) => None,
            Err(e) => {
                log::warn!("[Device] Skipping frame {}: {}", self.frames_grabbed, e);
                None
            }
        };

        // Late extradata from encoders that only know their parameter sets
        // after the first frame
        if self.info.streams[0].extradata.is_none() {
            self.info.streams[0].extradata = self.encoder.extradata();
        }

        let picture = DecodedPicture::from_yuyv(
            self.format.width,
            self.format.height,
            raw,
            self.frames_grabbed as i64,
        );
        self.frames_grabbed += 1;

        Ok(Some(SourceFrame {
            packet,
            picture: Some(picture),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct PatternDevice {
        format: CaptureFormat,
    }

    impl CaptureDevice for PatternDevice {
        fn format(&self) -> CaptureFormat {
            self.format
        }

        fn grab(&mut self) -> Result<Vec<u8>, SourceError> {
            Ok(vec![0x80; (self.format.width * self.format.height * 2) as usize])
        }
    }

    /// Produces no output for the first `latency` frames
    struct LaggyEncoder {
        latency: u32,
        seen: u32,
    }

    impl HardwareEncoder for LaggyEncoder {
        fn codec(&self) -> &str {
            "h264"
        }

        fn extradata(&self) -> Option<Vec<u8>> {
            Some(vec![0, 0, 0, 1, 0x67])
        }

        fn encode(&mut self, _frame: &[u8], force_keyframe: bool) -> Result<Option<Vec<u8>>, CodecError> {
            self.seen += 1;
            if self.seen <= self.latency {
                return Ok(None);
            }
            Ok(Some(vec![if force_keyframe { 0x65 } else { 0x41 }]))
        }
    }

    fn source(latency: u32) -> DeviceSource<PatternDevice, LaggyEncoder> {
        DeviceSource::new(
            PatternDevice { format: CaptureFormat { width: 4, height: 2, fps: 30 } },
            LaggyEncoder { latency, seen: 0 },
            DEFAULT_GOP_SIZE,
        )
    }

    #[test]
    fn forces_one_keyframe_per_gop() {
        let mut src = source(0);
        let packets: Vec<Packet> = (0..36)
            .filter_map(|_| src.read().unwrap().and_then(|f| f.packet))
            .collect();

        assert_eq!(packets.len(), 36);
        let keys: Vec<i64> = packets.iter().filter(|p| p.keyframe).map(|p| p.dts).collect();
        assert_eq!(keys, vec![0, 12, 24]);
        assert!(packets.windows(2).all(|w| w[1].dts > w[0].dts));
    }

    #[test]
    fn frames_without_output_still_publish_pictures() {
        let mut src = source(2);
        let first = src.read().unwrap().unwrap();
        assert!(first.packet.is_none());
        assert_eq!(first.picture.unwrap().layout, crate::video::PixelLayout::Yuyv422);

        src.read().unwrap();
        let third = src.read().unwrap().unwrap();
        let packet = third.packet.unwrap();
        assert_eq!(packet.dts, 0);
        assert!(packet.keyframe);
    }

    #[test]
    fn stream_is_flagged_for_inband_headers() {
        let src = source(0);
        let info = src.info();
        assert!(info.provides_pictures);
        assert!(info.streams[0].repeat_headers);
        assert_eq!(info.streams[0].time_base, Rational::new(1, 30));
        assert!(info.streams[0].extradata.is_some());
    }
}
