// Test doubles for the external collaborators
//
// Sources, a codec engine and a muxer that keep everything in memory so the
// recorder and session can be driven packet by packet from tests. Outside
// the crate's own tests this needs the `test-harness` feature.

pub mod codecs;
pub mod muxer;
pub mod sources;

pub use codecs::FakeCodecs;
pub use muxer::{MemoryMuxer, RecordedFragment};
pub use sources::{ChannelSource, ScriptedSource, SourceFeed};

use std::time::{Duration, Instant};

use crate::video::{Packet, Rational, SourceInfo, StreamInfo};

pub const VIDEO_STREAM: usize = 0;
pub const AUDIO_STREAM: usize = 1;

/// Video at 1000 ticks per second, 16x8 pixels
pub const VIDEO_TIME_BASE: Rational = Rational::new(1, 1000);
/// 8 kHz mono audio in a sample timebase
pub const AUDIO_TIME_BASE: Rational = Rational::new(1, 8000);

pub const TEST_WIDTH: u32 = 16;
pub const TEST_HEIGHT: u32 = 8;

/// Source description with one h264 video stream and optionally one
/// mu-law audio stream
pub fn source_info(with_audio: bool) -> SourceInfo {
    let mut streams = vec![StreamInfo::video(VIDEO_STREAM, "h264", VIDEO_TIME_BASE, TEST_WIDTH, TEST_HEIGHT)];
    if with_audio {
        streams.push(StreamInfo::audio(AUDIO_STREAM, "pcm_mulaw", AUDIO_TIME_BASE, 8000, 1));
    }
    SourceInfo {
        streams,
        video_stream: VIDEO_STREAM,
        frame_count: None,
        frame_rate: Some(100.0),
        provides_pictures: false,
    }
}

/// Video packet whose payload decodes (with [`FakeCodecs`]) to a solid
/// picture of luma `dts % 256`
pub fn video_packet(dts: i64, keyframe: bool) -> Packet {
    let luma = (dts.rem_euclid(256)) as u8;
    Packet::new(VIDEO_STREAM, dts, dts, keyframe, vec![luma, 128, 128]).with_duration(10)
}

/// Audio packet of `samples` PCM samples in the audio timebase
pub fn audio_packet(dts: i64, samples: usize) -> Packet {
    let data = (0..samples).flat_map(|i| (i as i16).to_le_bytes()).collect();
    Packet::new(AUDIO_STREAM, dts, dts, true, data).with_duration(samples as i64)
}

/// Video packets every `step` ticks in `[from, to]`, keyframe every `gop` ticks
pub fn video_run(from: i64, to: i64, step: i64, gop: i64) -> Vec<Packet> {
    (from..=to)
        .step_by(step as usize)
        .map(|dts| video_packet(dts, dts % gop == 0))
        .collect()
}

pub fn is_video(packet: &Packet) -> bool {
    packet.stream_index == VIDEO_STREAM
}

/// Poll `cond` until it holds or `timeout` passes
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    cond()
}
