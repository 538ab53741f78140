// Fragment rotation and event capture state machine
//
// Driven by the acquisition loop, one packet at a time. In event mode the
// recorder buffers into the pre-roll ring until a save is requested; in the
// continuous modes it always has a fragment open and rotates on keyframes.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;

use super::fragment::{Fragment, FragmentNamer};
use super::preroll::PacketPrerollRing;
use super::upload::UploadHandle;
use crate::encoding::{CodecEngine, ContainerFormat, Muxer};
use crate::error::{CaptureError, Result};
use crate::video::{Packet, Rational, SourceInfo};

/// How a recording session writes its output
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum RecordingMode {
    /// Continuous fragments of `fragment_secs`, named from the template
    Fragmented { fragment_secs: u32 },
    /// One unbounded fragment at exactly the template path
    Streaming,
    /// Buffer packets and only write when an event is saved
    EventBuffer,
}

/// A retroactive save: `before_secs` of history plus `after_secs` of what
/// follows, written to `path`
#[derive(Debug, Clone, PartialEq)]
pub struct EventRequest {
    pub before_secs: f64,
    pub after_secs: f64,
    pub path: PathBuf,
}

/// Collaborators and stream layout a recorder writes with
#[derive(Clone)]
pub struct RecorderContext {
    pub muxer: Arc<dyn Muxer>,
    pub codecs: Arc<dyn CodecEngine>,
    pub source: SourceInfo,
    pub format: ContainerFormat,
    pub uploads: Option<UploadHandle>,
}

/// Point-in-time view of a recorder for status reporting
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RecorderSnapshot {
    pub buffered_packets: usize,
    pub fragment_path: Option<PathBuf>,
    pub fragments_completed: u64,
    pub packets_written: u64,
}

pub struct Recorder {
    ctx: RecorderContext,
    mode: RecordingMode,
    namer: FragmentNamer,
    ring: PacketPrerollRing,
    fragment: Option<Fragment>,
    /// Video dts that maps to zero in the open fragment
    baseline: Option<i64>,
    /// Ticks after `baseline` past which the next keyframe closes the
    /// fragment. `None` never closes.
    limit: Option<i64>,
    fragment_ticks: Option<i64>,
    video_tb: Rational,
    fragments_completed: u64,
    packets_written: u64,
    /// Packets dropped while waiting for the first keyframe
    skipped: u64,
    lost: bool,
}

impl Recorder {
    /// Set up a recorder. Continuous modes open their first fragment here so
    /// destination problems reach the caller.
    pub fn start(ctx: RecorderContext, mode: RecordingMode, template: &Path, ring_capacity: usize) -> Result<Self> {
        let video_tb = ctx
            .source
            .video()
            .map(|v| v.time_base)
            .ok_or_else(|| CaptureError::state("source has no video stream"))?;
        let fragment_ticks = match mode {
            RecordingMode::Fragmented { fragment_secs: 0 } => {
                return Err(CaptureError::Config("fragment length must be positive".into()));
            }
            RecordingMode::Fragmented { fragment_secs } => Some(video_tb.ticks_for_secs(fragment_secs as f64)),
            RecordingMode::Streaming | RecordingMode::EventBuffer => None,
        };

        let mut recorder = Self {
            namer: FragmentNamer::new(template, ctx.format),
            ctx,
            mode,
            ring: PacketPrerollRing::new(ring_capacity),
            fragment: None,
            baseline: None,
            limit: fragment_ticks,
            fragment_ticks,
            video_tb,
            fragments_completed: 0,
            packets_written: 0,
            skipped: 0,
            lost: false,
        };

        if mode != RecordingMode::EventBuffer {
            let path = recorder.next_fragment_path();
            recorder.fragment = Some(recorder.open_fragment(&path)?);
        }
        log::info!("[Recorder] Started in {:?} mode", mode);
        Ok(recorder)
    }

    pub fn mode(&self) -> RecordingMode {
        self.mode
    }

    /// True once a continuous recording could not open its next fragment
    pub fn is_recording_lost(&self) -> bool {
        self.lost
    }

    pub fn snapshot(&self) -> RecorderSnapshot {
        RecorderSnapshot {
            buffered_packets: self.ring.len(),
            fragment_path: self.fragment.as_ref().map(|f| f.path().to_path_buf()),
            fragments_completed: self.fragments_completed,
            packets_written: self.packets_written + self.fragment.as_ref().map_or(0, |f| f.packets_written()),
        }
    }

    /// Route one packet. `request` is a pending save taken by the caller on a
    /// video packet.
    pub fn handle_packet(&mut self, packet: Packet, request: Option<EventRequest>) -> Result<()> {
        if self.lost {
            return Ok(());
        }

        if self.fragment.is_none() {
            // Only event mode runs without an open fragment
            let trigger = packet.dts;
            self.ring.push(packet);
            return match request {
                Some(req) => self.begin_event(trigger, &req),
                None => Ok(()),
            };
        }

        if let Some(req) = request {
            self.extend_window(packet.dts, &req);
        }
        self.write(packet)
    }

    /// Close any open fragment and drop buffered packets
    pub fn finish(mut self) {
        self.close_fragment();
        self.ring.clear();
        log::info!(
            "[Recorder] Finished: {} fragments, {} packets written",
            self.fragments_completed,
            self.packets_written
        );
    }

    fn write(&mut self, packet: Packet) -> Result<()> {
        let baseline = match self.baseline {
            Some(baseline) => baseline,
            None if self.ctx.source.is_video(&packet) && packet.keyframe => {
                if self.skipped > 0 {
                    log::info!("[Recorder] Skipped {} packets before the first keyframe", self.skipped);
                }
                self.baseline = Some(packet.dts);
                packet.dts
            }
            None => {
                // A fragment has to start on a video keyframe
                self.skipped += 1;
                return Ok(());
            }
        };
        let closes = self.ctx.source.is_video(&packet)
            && packet.keyframe
            && self.limit.is_some_and(|limit| packet.dts > baseline + limit);

        if closes {
            return self.rotate(packet);
        }
        if let Some(fragment) = self.fragment.as_mut() {
            fragment.write(packet, baseline);
        }
        Ok(())
    }

    fn rotate(&mut self, keyframe: Packet) -> Result<()> {
        self.close_fragment();

        if self.mode == RecordingMode::EventBuffer {
            log::info!("[Recorder] Event window complete, back to buffering");
            self.baseline = None;
            self.limit = None;
            // The closing keyframe is the best start point for the next save
            self.ring.push(keyframe);
            return Ok(());
        }

        let path = self.next_fragment_path();
        match self.open_fragment(&path) {
            Ok(mut fragment) => {
                log::info!("[Recorder] Rotated to {}", path.display());
                let baseline = keyframe.dts;
                fragment.write(keyframe, baseline);
                self.baseline = Some(baseline);
                self.limit = self.fragment_ticks;
                self.fragment = Some(fragment);
                Ok(())
            }
            Err(e) => {
                log::error!("[Recorder] Recording lost, cannot open {}: {}", path.display(), e);
                self.lost = true;
                Err(e)
            }
        }
    }

    fn begin_event(&mut self, trigger: i64, req: &EventRequest) -> Result<()> {
        let before = self.video_tb.ticks_for_secs(req.before_secs.max(0.0));
        let after = self.video_tb.ticks_for_secs(req.after_secs.max(0.0));
        let target = (trigger - before).max(0);
        log::debug!(
            "[Recorder] Save requested at {}: {}s before, {}s after, to {}",
            trigger,
            req.before_secs,
            req.after_secs,
            req.path.display()
        );

        // Open before draining so a failed open keeps the history
        let mut fragment = self.open_fragment(&req.path)?;
        let video_stream = self.ctx.source.video_stream;
        let packets = self.ring.drain_event_window(video_stream, target);

        let baseline = packets.first().map_or(trigger, |p| p.dts);
        let last_video = packets
            .iter()
            .rev()
            .find(|p| p.stream_index == video_stream)
            .map_or(baseline, |p| p.dts);
        log::info!(
            "[Recorder] Went back {:.2} seconds, saving {} packets",
            self.video_tb.as_secs(trigger - baseline),
            packets.len()
        );

        for packet in packets {
            fragment.write(packet, baseline);
        }
        self.fragment = Some(fragment);
        self.baseline = Some(baseline);
        self.limit = Some(after + (last_video - baseline));
        Ok(())
    }

    /// A save arriving while a fragment is already open
    fn extend_window(&mut self, dts: i64, req: &EventRequest) {
        let baseline = self.baseline.unwrap_or(dts);
        let wanted = self.video_tb.ticks_for_secs(req.after_secs.max(0.0)) + (dts - baseline);
        match self.mode {
            RecordingMode::EventBuffer => {
                log::debug!("[Recorder] Updating save window to {} ticks", wanted);
                self.limit = Some(wanted);
            }
            RecordingMode::Fragmented { .. } => {
                // Never cut a continuous fragment short
                self.limit = self.limit.map(|l| l.max(wanted));
            }
            RecordingMode::Streaming => {
                log::debug!("[Recorder] Save ignored, streaming already records everything");
            }
        }
    }

    fn next_fragment_path(&mut self) -> PathBuf {
        match self.mode {
            RecordingMode::Fragmented { .. } => self.namer.next_path(),
            RecordingMode::Streaming | RecordingMode::EventBuffer => self.namer.template().to_path_buf(),
        }
    }

    fn open_fragment(&self, path: &Path) -> Result<Fragment> {
        Fragment::open(
            self.ctx.muxer.as_ref(),
            self.ctx.codecs.as_ref(),
            self.ctx.format,
            path,
            &self.ctx.source,
        )
    }

    fn close_fragment(&mut self) {
        let Some(fragment) = self.fragment.take() else {
            return;
        };
        self.packets_written += fragment.packets_written();
        match fragment.close() {
            Ok(path) => {
                self.fragments_completed += 1;
                if let Some(uploads) = &self.ctx.uploads {
                    uploads.submit(path);
                }
            }
            Err(e) => log::error!("[Recorder] Failed to close fragment: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_harness::{self, audio_packet, video_packet, video_run, FakeCodecs, MemoryMuxer};
    use crate::video::OUTPUT_TIME_BASE;

    fn context(muxer: &MemoryMuxer, format: ContainerFormat, with_audio: bool) -> RecorderContext {
        RecorderContext {
            muxer: Arc::new(muxer.clone()),
            codecs: Arc::new(FakeCodecs::default()),
            source: test_harness::source_info(with_audio),
            format,
            uploads: None,
        }
    }

    fn save(before: f64, after: f64, path: &str) -> EventRequest {
        EventRequest {
            before_secs: before,
            after_secs: after,
            path: PathBuf::from(path),
        }
    }

    fn feed(recorder: &mut Recorder, packets: Vec<Packet>) {
        for p in packets {
            recorder.handle_packet(p, None).unwrap();
        }
    }

    fn event_recorder(muxer: &MemoryMuxer) -> Recorder {
        Recorder::start(
            context(muxer, ContainerFormat::Mkv, false),
            RecordingMode::EventBuffer,
            Path::new("unused.mkv"),
            1000,
        )
        .unwrap()
    }

    #[test]
    fn event_capture_goes_back_to_keyframe_and_stops_after_window() {
        let muxer = MemoryMuxer::new();
        let mut rec = event_recorder(&muxer);

        feed(&mut rec, video_run(0, 890, 10, 250));
        rec.handle_packet(video_packet(900, false), Some(save(0.4, 0.2, "event.mkv")))
            .unwrap();
        assert!(rec.snapshot().fragment_path.is_some());
        assert_eq!(rec.snapshot().buffered_packets, 0);

        feed(&mut rec, video_run(910, 1500, 10, 250));

        let done = muxer.finished();
        assert_eq!(done.len(), 1);
        let packets = &done[0].packets;
        assert_eq!(done[0].path, PathBuf::from("event.mkv"));
        assert!(packets[0].keyframe);
        assert_eq!(packets[0].dts, 0);
        // 500..=1240 inclusive, the keyframe at 1250 closes the window
        assert_eq!(packets.len(), 75);
        assert_eq!(packets.last().unwrap().dts, (1240 - 500) * 90);
        assert!(packets.iter().all(|p| p.dts >= 0 && p.pts >= 0));

        // closing keyframe and everything after is buffered again
        let snap = rec.snapshot();
        assert_eq!(snap.fragment_path, None);
        assert_eq!(snap.buffered_packets, 26);
    }

    #[test]
    fn later_save_extends_open_window() {
        let muxer = MemoryMuxer::new();
        let mut rec = event_recorder(&muxer);

        feed(&mut rec, video_run(0, 890, 10, 250));
        rec.handle_packet(video_packet(900, false), Some(save(0.4, 0.2, "event.mkv")))
            .unwrap();
        feed(&mut rec, video_run(910, 990, 10, 250));
        rec.handle_packet(video_packet(1000, true), Some(save(1.0, 0.5, "ignored.mkv")))
            .unwrap();
        feed(&mut rec, video_run(1010, 2000, 10, 250));

        let done = muxer.finished();
        assert_eq!(done.len(), 1);
        // window now ends at 1500, so the keyframe at 1750 closes it
        let last = done[0].packets.last().unwrap();
        assert_eq!(last.dts, (1740 - 500) * 90);
    }

    #[test]
    fn fragments_rotate_only_on_keyframes_past_the_limit() {
        let muxer = MemoryMuxer::new();
        let tmp = tempfile::tempdir().unwrap();
        let mut rec = Recorder::start(
            context(&muxer, ContainerFormat::MpegTs, false),
            RecordingMode::Fragmented { fragment_secs: 1 },
            &tmp.path().join("cam.ts"),
            1000,
        )
        .unwrap();

        feed(&mut rec, video_run(0, 3500, 10, 250));
        rec.finish();

        let fragments = muxer.finished();
        assert_eq!(fragments.len(), 3);
        let lengths: Vec<usize> = fragments.iter().map(|f| f.packets.len()).collect();
        assert_eq!(lengths, vec![125, 125, 101]);
        for f in &fragments {
            assert!(f.packets[0].keyframe);
            assert_eq!(f.packets[0].dts, 0);
            assert!(f.path.to_string_lossy().contains("cam_"));
        }
        // never early: each closed fragment spans more than one second
        for f in &fragments[..2] {
            let span = f.packets.last().unwrap().dts - f.packets[0].dts;
            assert!(span >= OUTPUT_TIME_BASE.ticks_for_secs(1.0));
        }
    }

    #[test]
    fn continuous_recording_waits_for_a_keyframe() {
        let muxer = MemoryMuxer::new();
        let tmp = tempfile::tempdir().unwrap();
        let mut rec = Recorder::start(
            context(&muxer, ContainerFormat::Mkv, false),
            RecordingMode::Fragmented { fragment_secs: 10 },
            &tmp.path().join("cam.mkv"),
            1000,
        )
        .unwrap();

        // joins mid-GOP, the first keyframe is at 250
        feed(&mut rec, video_run(10, 600, 10, 250));
        rec.finish();

        let packets = &muxer.finished()[0].packets;
        assert_eq!(packets.len(), 36);
        assert!(packets[0].keyframe);
        assert_eq!(packets[0].dts, 0);
        assert_eq!(packets.last().unwrap().dts, (600 - 250) * 90);
    }

    #[test]
    fn audio_before_the_first_keyframe_does_not_shift_video() {
        let muxer = MemoryMuxer::new();
        let mut rec = Recorder::start(
            context(&muxer, ContainerFormat::Mkv, true),
            RecordingMode::Streaming,
            Path::new("live.mkv"),
            1000,
        )
        .unwrap();

        // ten seconds into the source, audio arrives first
        rec.handle_packet(audio_packet(80_000, 400), None).unwrap();
        feed(&mut rec, video_run(10_000, 10_500, 100, 250));
        rec.handle_packet(audio_packet(84_000, 400), None).unwrap();
        rec.finish();

        let done = &muxer.finished()[0];
        let video: Vec<i64> = done.stream_packets(0).map(|p| p.dts).collect();
        assert_eq!(video, vec![0, 9000, 18_000, 27_000, 36_000, 45_000]);
        let audio: Vec<i64> = done.stream_packets(1).map(|p| p.dts).collect();
        assert_eq!(audio, vec![45_000]);
    }

    #[test]
    fn streaming_never_rotates() {
        let muxer = MemoryMuxer::new();
        let mut rec = Recorder::start(
            context(&muxer, ContainerFormat::Flv, false),
            RecordingMode::Streaming,
            Path::new("live.flv"),
            1000,
        )
        .unwrap();
        feed(&mut rec, video_run(0, 10_000, 10, 250));
        rec.handle_packet(video_packet(10_010, false), Some(save(1.0, 1.0, "x.flv")))
            .unwrap();
        assert_eq!(muxer.finished().len(), 0);
        rec.finish();

        let fragments = muxer.finished();
        assert_eq!(fragments.len(), 1);
        assert_eq!(fragments[0].path, PathBuf::from("live.flv"));
        assert_eq!(fragments[0].packets.len(), 1002);
    }

    #[test]
    fn failed_rotation_loses_recording() {
        let muxer = MemoryMuxer::new().failing_after(1);
        let tmp = tempfile::tempdir().unwrap();
        let mut rec = Recorder::start(
            context(&muxer, ContainerFormat::Mkv, false),
            RecordingMode::Fragmented { fragment_secs: 1 },
            &tmp.path().join("cam.mkv"),
            1000,
        )
        .unwrap();

        feed(&mut rec, video_run(0, 1240, 10, 250));
        let err = rec.handle_packet(video_packet(1250, true), None).unwrap_err();
        assert!(matches!(err, CaptureError::Destination(_)));
        assert!(rec.is_recording_lost());
        assert_eq!(muxer.finished().len(), 1);
    }

    #[test]
    fn failed_event_open_keeps_history() {
        let muxer = MemoryMuxer::new().failing_after(0);
        let mut rec = event_recorder(&muxer);
        feed(&mut rec, video_run(0, 890, 10, 250));

        let err = rec
            .handle_packet(video_packet(900, false), Some(save(0.4, 0.2, "event.mkv")))
            .unwrap_err();
        assert!(matches!(err, CaptureError::Destination(_)));
        assert!(!rec.is_recording_lost());
        assert_eq!(rec.snapshot().buffered_packets, 91);
        assert_eq!(rec.snapshot().fragment_path, None);
    }

    #[test]
    fn zero_length_fragments_are_rejected() {
        let muxer = MemoryMuxer::new();
        let result = Recorder::start(
            context(&muxer, ContainerFormat::Mkv, false),
            RecordingMode::Fragmented { fragment_secs: 0 },
            Path::new("cam.mkv"),
            1000,
        );
        assert!(matches!(result, Err(CaptureError::Config(_))));
        assert!(muxer.fragments().is_empty());
    }

    #[test]
    fn mp4_event_reencodes_audio_into_whole_frames() {
        let muxer = MemoryMuxer::new();
        let mut rec = Recorder::start(
            context(&muxer, ContainerFormat::Mp4, true),
            RecordingMode::EventBuffer,
            Path::new("unused.mp4"),
            1000,
        )
        .unwrap();

        // 400 samples of 8 kHz audio (50 ms) after every 50 ms of video
        let mut packets = Vec::new();
        for ms in (0..=1000).step_by(50) {
            packets.push(video_packet(ms, ms % 250 == 0));
            packets.push(audio_packet(ms * 8, 400));
        }
        feed(&mut rec, packets);
        rec.handle_packet(video_packet(1050, false), Some(save(0.5, 0.0, "clip.mp4")))
            .unwrap();
        rec.handle_packet(video_packet(1250, true), None).unwrap();

        let done = muxer.finished();
        assert_eq!(done.len(), 1);
        let audio_desc = done[0].streams.iter().find(|s| s.index == 1).unwrap();
        assert_eq!(audio_desc.codec, "aac");

        let audio: Vec<&Packet> = done[0].stream_packets(1).collect();
        // 11 packets of 400 samples from dts 500 -> 4 whole frames of 1024
        assert_eq!(audio.len(), 4);
        assert!(audio.iter().all(|p| p.duration == 11_520));
        assert_eq!(audio[0].dts, 0);
        assert_eq!(audio[1].dts - audio[0].dts, 11_520);
    }

    #[test]
    fn mp4_drops_audio_without_an_aac_encoder() {
        let muxer = MemoryMuxer::new();
        let mut ctx = context(&muxer, ContainerFormat::Mp4, true);
        ctx.codecs = Arc::new(FakeCodecs::default().without_aac());
        let mut rec = Recorder::start(ctx, RecordingMode::Streaming, Path::new("live.mp4"), 16).unwrap();

        for ms in (0..=500).step_by(50) {
            rec.handle_packet(video_packet(ms, ms % 250 == 0), None).unwrap();
            rec.handle_packet(audio_packet(ms * 8, 400), None).unwrap();
        }
        rec.finish();

        let done = &muxer.finished()[0];
        assert_eq!(done.streams.len(), 1);
        assert_eq!(done.packets.len(), 11);
        assert!(done.packets.iter().all(test_harness::is_video));
    }

    #[test]
    fn inband_headers_precede_keyframes() {
        let muxer = MemoryMuxer::new();
        let mut ctx = context(&muxer, ContainerFormat::MpegTs, false);
        ctx.source.streams[0].extradata = Some(vec![0, 0, 0, 1, 0x67]);
        ctx.source.streams[0].repeat_headers = true;
        let mut rec = Recorder::start(ctx, RecordingMode::Streaming, Path::new("live.ts"), 16).unwrap();

        feed(&mut rec, video_run(0, 260, 10, 250));
        rec.finish();

        let packets = &muxer.finished()[0].packets;
        assert_eq!(packets[0].data, vec![0, 0, 0, 1, 0x67]);
        assert_eq!(packets[1].dts, 1);
        assert!(packets[1].keyframe);
        let headers = packets.iter().filter(|p| p.data.len() == 5).count();
        assert_eq!(headers, 2);
    }
}
