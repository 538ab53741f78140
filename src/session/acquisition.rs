// Acquisition loop
//
// One background thread per session: reads the source, feeds the frame slot
// and routes packets through the recorder until stopped, end of stream or a
// fatal source error.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;

use super::frame_slot::SharedFrameSlot;
use crate::encoding::VideoDecoder;
use crate::recording::{CaptureMode, EventRequest, Recorder, RecorderSnapshot};
use crate::video::{log_packet, FrameSource, SourceFrame};

/// The source and its decoder, owned by the loop while it runs and by the
/// session otherwise
pub(crate) struct MediaParts {
    pub source: Box<dyn FrameSource>,
    pub decoder: Option<Box<dyn VideoDecoder>>,
}

/// Control state shared between the session and the loop
#[derive(Default)]
pub(crate) struct ControlState {
    pub mode: CaptureMode,
    pub pending_event: Option<EventRequest>,
    pub recorder: RecorderSnapshot,
    pub packets_received: u64,
    pub last_error: Option<String>,
}

#[derive(Default)]
pub(crate) struct SessionShared {
    pub slot: SharedFrameSlot,
    pub control: Mutex<ControlState>,
    pub running: AtomicBool,
}

impl SessionShared {
    pub fn record_error(&self, message: String) {
        self.control.lock().last_error = Some(message);
    }
}

pub(crate) struct AcquisitionLoop {
    parts: MediaParts,
    recorder: Option<Recorder>,
    shared: Arc<SessionShared>,
}

impl AcquisitionLoop {
    pub fn new(parts: MediaParts, recorder: Option<Recorder>, shared: Arc<SessionShared>) -> Self {
        Self { parts, recorder, shared }
    }

    pub fn spawn(self) -> JoinHandle<MediaParts> {
        std::thread::Builder::new()
            .name("retrocap-acquisition".into())
            .spawn(move || self.run())
            .expect("Failed to spawn acquisition thread")
    }

    fn run(mut self) -> MediaParts {
        log::info!("[Acquisition] Loop started");
        while self.shared.running.load(Ordering::SeqCst) {
            match self.parts.source.read() {
                Ok(Some(frame)) => self.process(frame),
                Ok(None) => {
                    log::info!("[Acquisition] End of stream");
                    break;
                }
                Err(e) => {
                    log::error!("[Acquisition] Source failed, stopping: {}", e);
                    self.shared.record_error(e.to_string());
                    break;
                }
            }
        }
        self.teardown();
        self.parts
    }

    fn process(&mut self, frame: SourceFrame) {
        let SourceFrame { packet, picture } = frame;
        if let Some(picture) = picture {
            self.shared.slot.publish(picture);
        }
        let Some(packet) = packet else {
            return;
        };
        log_packet("in", &packet);

        let is_video = self.parts.source.info().is_video(&packet);
        if is_video {
            if let Some(decoder) = self.parts.decoder.as_mut() {
                match decoder.decode(&packet) {
                    Ok(Some(picture)) => {
                        self.shared.slot.publish(picture);
                    }
                    Ok(None) => {}
                    Err(e) => log::warn!("[Acquisition] Skipping undecodable packet at dts {}: {}", packet.dts, e),
                }
            }
        }

        let Some(recorder) = self.recorder.as_mut() else {
            self.shared.control.lock().packets_received += 1;
            return;
        };

        // Saves are only serviced on video packets
        let request = if is_video {
            self.shared.control.lock().pending_event.take()
        } else {
            None
        };

        let result = recorder.handle_packet(packet, request);
        let lost = recorder.is_recording_lost();
        let snapshot = recorder.snapshot();

        let mut control = self.shared.control.lock();
        control.packets_received += 1;
        control.recorder = snapshot;
        if let Err(e) = result {
            log::error!("[Acquisition] Recording error: {}", e);
            control.last_error = Some(e.to_string());
        }
        if lost {
            log::warn!("[Acquisition] Recording ended, continuing with live frames only");
            control.mode = CaptureMode::LiveOnly;
            control.pending_event = None;
            drop(control);
            if let Some(recorder) = self.recorder.take() {
                recorder.finish();
            }
        }
    }

    fn teardown(&mut self) {
        if let Some(recorder) = self.recorder.take() {
            recorder.finish();
        }
        self.shared.slot.deactivate();
        self.shared.running.store(false, Ordering::SeqCst);

        let mut control = self.shared.control.lock();
        control.mode = CaptureMode::Idle;
        control.pending_event = None;
        control.recorder.buffered_packets = 0;
        control.recorder.fragment_path = None;
        log::info!(
            "[Acquisition] Loop stopped after {} packets",
            control.packets_received
        );
    }
}
