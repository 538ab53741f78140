use std::collections::VecDeque;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};

use crate::error::SourceError;
use crate::video::{FrameSource, Packet, SourceFrame, SourceInfo};

// ── Scripted source ──────────────────────────────────────────────────

/// Replays a fixed list of frames, then ends (or fails) the stream
pub struct ScriptedSource {
    info: SourceInfo,
    frames: VecDeque<SourceFrame>,
    fail_at_end: bool,
}

impl ScriptedSource {
    pub fn new(info: SourceInfo, packets: Vec<Packet>) -> Self {
        Self {
            info,
            frames: packets.into_iter().map(SourceFrame::packet).collect(),
            fail_at_end: false,
        }
    }

    /// Report a read error instead of end of stream once the script runs out
    pub fn failing_at_end(mut self) -> Self {
        self.fail_at_end = true;
        self
    }
}

impl FrameSource for ScriptedSource {
    fn info(&self) -> &SourceInfo {
        &self.info
    }

    fn read(&mut self) -> Result<Option<SourceFrame>, SourceError> {
        match self.frames.pop_front() {
            Some(frame) => Ok(Some(frame)),
            None if self.fail_at_end => Err(SourceError::Read("scripted failure".into())),
            None => Ok(None),
        }
    }
}

// ── Channel source ───────────────────────────────────────────────────

/// Feeding side of a [`ChannelSource`]. Dropping it ends the stream.
#[derive(Clone)]
pub struct SourceFeed {
    tx: Sender<Result<SourceFrame, SourceError>>,
}

impl SourceFeed {
    pub fn send(&self, packet: Packet) {
        let _ = self.tx.send(Ok(SourceFrame::packet(packet)));
    }

    pub fn send_all(&self, packets: impl IntoIterator<Item = Packet>) {
        for packet in packets {
            self.send(packet);
        }
    }

    pub fn fail(&self, reason: &str) {
        let _ = self.tx.send(Err(SourceError::Read(reason.to_string())));
    }
}

/// Live source fed packet by packet from a test. Reads wait briefly and
/// return an empty frame when nothing arrived so the loop can notice stops.
pub struct ChannelSource {
    info: SourceInfo,
    rx: Receiver<Result<SourceFrame, SourceError>>,
    poll: Duration,
}

impl ChannelSource {
    pub fn new(info: SourceInfo) -> (Self, SourceFeed) {
        let (tx, rx) = unbounded();
        (
            Self {
                info,
                rx,
                poll: Duration::from_millis(20),
            },
            SourceFeed { tx },
        )
    }
}

impl FrameSource for ChannelSource {
    fn info(&self) -> &SourceInfo {
        &self.info
    }

    fn read(&mut self) -> Result<Option<SourceFrame>, SourceError> {
        match self.rx.recv_timeout(self.poll) {
            Ok(Ok(frame)) => Ok(Some(frame)),
            Ok(Err(e)) => Err(e),
            Err(RecvTimeoutError::Timeout) => Ok(Some(SourceFrame::default())),
            Err(RecvTimeoutError::Disconnected) => Ok(None),
        }
    }
}
