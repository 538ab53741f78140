// Capture session: the control surface
//
// A `Session` owns the source between runs, starts and stops the
// acquisition loop and hands out `FrameReader`s for live frames. Control
// calls take `&mut self`; readers are cloneable and may live on any thread.

mod acquisition;
pub mod frame_slot;

pub use frame_slot::SharedFrameSlot;

use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;

use acquisition::{AcquisitionLoop, MediaParts, SessionShared};
use crate::config::Config;
use crate::encoding::{CodecEngine, ContainerFormat, Muxer};
use crate::error::{CaptureError, Result, SourceError};
use crate::pixel::{convert, FrameBuffer, YuvTables};
use crate::recording::{
    CaptureMode, EventRequest, Recorder, RecorderContext, RecorderSnapshot, RecordingMode, SpoolDirUploader,
    UploadQueue, Uploader,
};
use crate::video::{CaptureDevice, DeviceSource, FrameSource, HardwareEncoder, SourceFrame, SourceInfo};

/// What `initialize` learned about the source
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceSummary {
    pub width: u32,
    pub height: u32,
    pub frame_count: Option<u64>,
    pub frame_rate: Option<f64>,
}

/// Outcome of a live frame read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    /// A frame was written. `pts` is its presentation timestamp in the
    /// video stream's timebase.
    Ready { pts: i64 },
    NotReady,
}

/// Serializable view of the whole session
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub mode: CaptureMode,
    pub initialized: bool,
    pub recorder: RecorderSnapshot,
    pub packets_received: u64,
    pub frames_published: u64,
    pub last_error: Option<String>,
}

pub struct Session {
    config: Config,
    tables: Arc<YuvTables>,
    codecs: Arc<dyn CodecEngine>,
    muxer: Arc<dyn Muxer>,
    shared: Arc<SessionShared>,
    /// Source and decoder while no loop is running
    idle: Arc<Mutex<Option<MediaParts>>>,
    source_info: Option<SourceInfo>,
    worker: Option<JoinHandle<MediaParts>>,
    uploads: Option<UploadQueue>,
}

impl Session {
    pub fn new(config: Config, codecs: Arc<dyn CodecEngine>, muxer: Arc<dyn Muxer>) -> Result<Self> {
        config.validate()?;

        let uploads = config.upload.as_ref().map(|upload| {
            log::info!("[Session] Handing finished fragments to {}", upload.spool_dir.display());
            UploadQueue::start(
                Arc::new(SpoolDirUploader::new(&upload.spool_dir)),
                upload.queue_depth,
                upload.remove_after_upload,
            )
        });

        Ok(Self {
            config,
            tables: Arc::new(YuvTables::new()),
            codecs,
            muxer,
            shared: Arc::new(SessionShared::default()),
            idle: Arc::new(Mutex::new(None)),
            source_info: None,
            worker: None,
            uploads,
        })
    }

    /// Replace the upload destination. Queue settings come from the
    /// `upload` config section when present.
    pub fn with_uploader(mut self, uploader: Arc<dyn Uploader>) -> Self {
        let (depth, remove_after) = self
            .config
            .upload
            .as_ref()
            .map_or((16, true), |u| (u.queue_depth, u.remove_after_upload));
        self.uploads = Some(UploadQueue::start(uploader, depth, remove_after));
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn source_info(&self) -> Option<&SourceInfo> {
        self.source_info.as_ref()
    }

    /// Take ownership of a new source, stopping any running acquisition
    pub fn initialize(&mut self, source: Box<dyn FrameSource>) -> Result<SourceSummary> {
        if self.join_worker() {
            log::info!("[Session] Stopped running acquisition to switch sources");
        }
        self.idle.lock().take();
        self.source_info = None;

        let info = source.info().clone();
        let video = info
            .video()
            .ok_or_else(|| SourceError::Open("source has no video stream".into()))?;
        let decoder = if info.provides_pictures {
            None
        } else {
            Some(self.codecs.open_video_decoder(video)?)
        };
        if video.width % 2 != 0 || video.height % 2 != 0 {
            log::warn!(
                "[Session] Source is {}x{}; live frames need even dimensions",
                video.width,
                video.height
            );
        }

        let summary = SourceSummary {
            width: video.width,
            height: video.height,
            frame_count: info.frame_count,
            frame_rate: info.frame_rate,
        };
        log::info!(
            "[Session] Initialized {}x{} {} source",
            summary.width,
            summary.height,
            video.codec
        );

        self.shared.slot.clear();
        *self.shared.control.lock() = Default::default();
        *self.idle.lock() = Some(MediaParts { source, decoder });
        self.source_info = Some(info);
        Ok(summary)
    }

    /// Initialize from a capture device and its hardware encoder, forcing a
    /// keyframe every `capture_gop_size` packets
    pub fn initialize_device<D, E>(&mut self, device: D, encoder: E) -> Result<SourceSummary>
    where
        D: CaptureDevice + 'static,
        E: HardwareEncoder + 'static,
    {
        let source = DeviceSource::new(device, encoder, self.config.capture_gop_size);
        self.initialize(Box::new(source))
    }

    /// Handle for reading live frames from any thread
    pub fn reader(&self) -> FrameReader {
        FrameReader {
            shared: self.shared.clone(),
            idle: self.idle.clone(),
            tables: self.tables.clone(),
            timeout: Duration::from_millis(self.config.first_frame_timeout_ms),
        }
    }

    pub fn read_live_frame(&self, out: &mut FrameBuffer) -> Result<FrameStatus> {
        self.reader().read(out)
    }

    /// Run acquisition for live frames only
    pub fn start_live(&mut self) -> Result<()> {
        self.ensure_stopped()?;
        let parts = self.take_parts()?;
        self.spawn_loop(parts, None, CaptureMode::LiveOnly);
        Ok(())
    }

    /// Run acquisition with a recorder. Relative templates resolve against
    /// the configured output directory.
    pub fn start_recording(&mut self, template: &Path, format: ContainerFormat, mode: RecordingMode) -> Result<()> {
        self.ensure_stopped()?;
        let parts = self.take_parts()?;

        let ctx = RecorderContext {
            muxer: self.muxer.clone(),
            codecs: self.codecs.clone(),
            source: parts.source.info().clone(),
            format,
            uploads: self.uploads.as_ref().and_then(|u| u.handle()),
        };
        let template = self.config.resolve_output(template);
        let recorder = match Recorder::start(ctx, mode, &template, self.config.ring_capacity) {
            Ok(recorder) => recorder,
            Err(e) => {
                *self.idle.lock() = Some(parts);
                return Err(e);
            }
        };

        self.shared.control.lock().recorder = recorder.snapshot();
        self.spawn_loop(parts, Some(recorder), CaptureMode::for_recording(mode));
        Ok(())
    }

    /// Ask the loop to save `before_secs` of history plus `after_secs` of
    /// what follows. Serviced on the next video packet.
    pub fn request_event_capture(&mut self, before_secs: f64, after_secs: f64, path: &Path) -> Result<()> {
        if !(before_secs >= 0.0 && after_secs >= 0.0) {
            return Err(CaptureError::Config(format!(
                "event window must be non-negative, got {}s before and {}s after",
                before_secs, after_secs
            )));
        }
        self.reap_finished();

        let mut control = self.shared.control.lock();
        if !control.mode.is_recording() {
            return Err(CaptureError::state(format!(
                "cannot save an event while {:?}",
                control.mode
            )));
        }
        log::info!(
            "[Session] Save requested: {}s before, {}s after, to {}",
            before_secs,
            after_secs,
            path.display()
        );
        control.pending_event = Some(EventRequest {
            before_secs,
            after_secs,
            path: self.config.resolve_output(path),
        });
        Ok(())
    }

    /// Stop the loop and take the source back for reuse
    pub fn stop_recording(&mut self) -> Result<()> {
        if !self.join_worker() {
            return Err(CaptureError::state("acquisition is not running"));
        }
        Ok(())
    }

    /// Stop everything, drop the source and drain pending uploads
    pub fn shutdown(&mut self) {
        self.join_worker();
        self.idle.lock().take();
        self.source_info = None;
        self.shared.slot.clear();
        if let Some(mut uploads) = self.uploads.take() {
            uploads.shutdown();
        }
    }

    pub fn state(&self) -> CaptureMode {
        self.shared.control.lock().mode
    }

    pub fn recorder_snapshot(&self) -> RecorderSnapshot {
        self.shared.control.lock().recorder.clone()
    }

    pub fn last_error(&self) -> Option<String> {
        self.shared.control.lock().last_error.clone()
    }

    pub fn status(&self) -> SessionStatus {
        let control = self.shared.control.lock();
        SessionStatus {
            mode: control.mode,
            initialized: self.source_info.is_some(),
            recorder: control.recorder.clone(),
            packets_received: control.packets_received,
            frames_published: self.shared.slot.frames_published(),
            last_error: control.last_error.clone(),
        }
    }

    fn ensure_stopped(&mut self) -> Result<()> {
        self.reap_finished();
        if self.worker.is_some() {
            return Err(CaptureError::state("acquisition is already running"));
        }
        Ok(())
    }

    fn take_parts(&self) -> Result<MediaParts> {
        self.idle
            .lock()
            .take()
            .ok_or_else(|| CaptureError::state("session is not initialized"))
    }

    fn spawn_loop(&mut self, parts: MediaParts, recorder: Option<Recorder>, mode: CaptureMode) {
        {
            let mut control = self.shared.control.lock();
            control.mode = mode;
            control.pending_event = None;
            control.packets_received = 0;
            control.last_error = None;
            if recorder.is_none() {
                control.recorder = RecorderSnapshot::default();
            }
        }
        self.shared.slot.activate();
        self.shared.running.store(true, Ordering::SeqCst);
        log::info!("[Session] Starting acquisition in {:?} mode", mode);
        self.worker = Some(AcquisitionLoop::new(parts, recorder, self.shared.clone()).spawn());
    }

    /// Join a loop that ended on its own (end of stream or source error)
    fn reap_finished(&mut self) {
        if self.worker.is_some() && !self.shared.running.load(Ordering::SeqCst) {
            self.join_worker();
        }
    }

    /// Signal and join the loop. Returns false if none was running.
    fn join_worker(&mut self) -> bool {
        let Some(worker) = self.worker.take() else {
            return false;
        };
        self.shared.running.store(false, Ordering::SeqCst);
        match worker.join() {
            Ok(parts) => {
                *self.idle.lock() = Some(parts);
            }
            Err(_) => {
                log::error!("[Session] Acquisition thread panicked, source lost");
                self.shared.record_error("acquisition thread panicked".into());
                self.source_info = None;
                self.shared.control.lock().mode = CaptureMode::Idle;
                self.shared.slot.deactivate();
            }
        }
        true
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Cloneable live-frame reader.
///
/// While acquisition runs, reads convert the latest published picture. While
/// the session is initialized but idle, reads pull from the source directly.
#[derive(Clone)]
pub struct FrameReader {
    shared: Arc<SessionShared>,
    idle: Arc<Mutex<Option<MediaParts>>>,
    tables: Arc<YuvTables>,
    timeout: Duration,
}

impl FrameReader {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn read(&self, out: &mut FrameBuffer) -> Result<FrameStatus> {
        {
            let mut idle = self.idle.lock();
            if let Some(parts) = idle.as_mut() {
                return self.pull(parts, out);
            }
        }

        match self
            .shared
            .slot
            .read_latest(self.timeout, |picture| {
                convert(&self.tables, picture, out).map(|()| picture.pts)
            }) {
            Some(converted) => Ok(FrameStatus::Ready { pts: converted? }),
            None => Ok(FrameStatus::NotReady),
        }
    }

    /// Read from the idle source until a picture decodes
    fn pull(&self, parts: &mut MediaParts, out: &mut FrameBuffer) -> Result<FrameStatus> {
        let deadline = Instant::now() + self.timeout;
        while Instant::now() < deadline {
            let SourceFrame { packet, mut picture } = match parts.source.read() {
                Ok(Some(frame)) => frame,
                Ok(None) => return Ok(FrameStatus::NotReady),
                Err(e) => {
                    log::warn!("[Session] Pull read failed: {}", e);
                    self.shared.record_error(e.to_string());
                    return Ok(FrameStatus::NotReady);
                }
            };

            if let (Some(packet), Some(decoder)) = (packet.as_ref(), parts.decoder.as_mut()) {
                if parts.source.info().is_video(packet) {
                    match decoder.decode(packet) {
                        Ok(Some(decoded)) => picture = Some(decoded),
                        Ok(None) => {}
                        Err(e) => log::warn!("[Session] Skipping undecodable packet at dts {}: {}", packet.dts, e),
                    }
                }
            }

            if let Some(picture) = picture {
                convert(&self.tables, &picture, out)?;
                let pts = picture.pts;
                self.shared.slot.publish(picture);
                return Ok(FrameStatus::Ready { pts });
            }
        }
        Ok(FrameStatus::NotReady)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pixel::{FrameData, OutputColor};
    use crate::test_harness::{self, video_run, ChannelSource, FakeCodecs, MemoryMuxer, ScriptedSource};
    use crate::test_harness::{TEST_HEIGHT, TEST_WIDTH};

    fn session(muxer: &MemoryMuxer) -> (Session, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            output_dir: dir.path().to_path_buf(),
            first_frame_timeout_ms: 500,
            ..Config::default()
        };
        let session = Session::new(config, Arc::new(FakeCodecs::default()), Arc::new(muxer.clone())).unwrap();
        (session, dir)
    }

    fn rgb_buffer() -> Vec<u8> {
        vec![0; 3 * (TEST_WIDTH * TEST_HEIGHT) as usize]
    }

    fn read(reader: &FrameReader, data: &mut [u8]) -> FrameStatus {
        let mut out = FrameBuffer::packed(
            FrameData::Byte(data),
            OutputColor::Yuv,
            TEST_WIDTH as usize,
            TEST_HEIGHT as usize,
        );
        reader.read(&mut out).unwrap()
    }

    #[test]
    fn initialize_reports_source_shape() {
        let muxer = MemoryMuxer::new();
        let (mut session, _dir) = session(&muxer);
        let source = ScriptedSource::new(test_harness::source_info(true), vec![]);
        let summary = session.initialize(Box::new(source)).unwrap();
        assert_eq!(summary.width, TEST_WIDTH);
        assert_eq!(summary.height, TEST_HEIGHT);
        assert_eq!(summary.frame_rate, Some(100.0));
        assert_eq!(session.state(), CaptureMode::Idle);
    }

    #[test]
    fn start_requires_initialize() {
        let muxer = MemoryMuxer::new();
        let (mut session, _dir) = session(&muxer);
        assert!(matches!(session.start_live(), Err(CaptureError::State(_))));
        assert!(matches!(
            session.start_recording(Path::new("a.mkv"), ContainerFormat::Mkv, RecordingMode::Streaming),
            Err(CaptureError::State(_))
        ));
        assert!(matches!(session.stop_recording(), Err(CaptureError::State(_))));
    }

    #[test]
    fn pull_mode_decodes_until_end_of_stream() {
        let muxer = MemoryMuxer::new();
        let (mut session, _dir) = session(&muxer);
        let source = ScriptedSource::new(test_harness::source_info(false), video_run(0, 20, 10, 100));
        session.initialize(Box::new(source)).unwrap();

        let reader = session.reader();
        let mut data = rgb_buffer();
        for expected in [0u8, 10, 20] {
            assert_eq!(read(&reader, &mut data), FrameStatus::Ready { pts: expected as i64 });
            assert_eq!(data[0], expected);
        }
        assert_eq!(read(&reader, &mut data), FrameStatus::NotReady);
    }

    #[test]
    fn second_start_is_rejected_and_stop_returns_source() {
        let muxer = MemoryMuxer::new();
        let (mut session, _dir) = session(&muxer);
        let (source, feed) = ChannelSource::new(test_harness::source_info(false));
        session.initialize(Box::new(source)).unwrap();

        session.start_live().unwrap();
        assert_eq!(session.state(), CaptureMode::LiveOnly);
        assert!(matches!(session.start_live(), Err(CaptureError::State(_))));
        assert!(matches!(
            session.request_event_capture(1.0, 1.0, Path::new("e.mkv")),
            Err(CaptureError::State(_))
        ));

        feed.send_all(video_run(0, 30, 10, 100));
        let reader = session.reader();
        assert!(test_harness::wait_until(Duration::from_secs(5), || {
            session.status().frames_published >= 4
        }));
        let mut data = rgb_buffer();
        assert_eq!(read(&reader, &mut data), FrameStatus::Ready { pts: 30 });
        assert_eq!(data[0], 30);

        session.stop_recording().unwrap();
        assert_eq!(session.state(), CaptureMode::Idle);

        // the source is back in pull mode
        feed.send(test_harness::video_packet(40, true));
        assert_eq!(read(&reader, &mut data), FrameStatus::Ready { pts: 40 });
        assert_eq!(data[0], 40);
    }

    #[test]
    fn pull_read_failure_is_reported_not_returned() {
        let muxer = MemoryMuxer::new();
        let (mut session, _dir) = session(&muxer);
        let source = ScriptedSource::new(test_harness::source_info(false), video_run(0, 0, 10, 100)).failing_at_end();
        session.initialize(Box::new(source)).unwrap();

        let reader = session.reader();
        let mut data = rgb_buffer();
        assert_eq!(read(&reader, &mut data), FrameStatus::Ready { pts: 0 });
        assert_eq!(read(&reader, &mut data), FrameStatus::NotReady);
        assert!(session.last_error().unwrap().contains("scripted failure"));
    }

    #[test]
    fn negative_event_window_is_a_config_error() {
        let muxer = MemoryMuxer::new();
        let (mut session, _dir) = session(&muxer);
        assert!(matches!(
            session.request_event_capture(-1.0, 1.0, Path::new("e.mkv")),
            Err(CaptureError::Config(_))
        ));
    }

    #[test]
    fn failed_first_fragment_keeps_source() {
        let muxer = MemoryMuxer::new().failing_after(0);
        let (mut session, _dir) = session(&muxer);
        let source = ScriptedSource::new(test_harness::source_info(false), video_run(0, 20, 10, 100));
        session.initialize(Box::new(source)).unwrap();

        let err = session
            .start_recording(Path::new("s.mkv"), ContainerFormat::Mkv, RecordingMode::Streaming)
            .unwrap_err();
        assert!(matches!(err, CaptureError::Destination(_)));
        assert_eq!(session.state(), CaptureMode::Idle);
        assert_eq!(read(&session.reader(), &mut rgb_buffer()), FrameStatus::Ready { pts: 0 });
    }
}
