use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::encoding::{ContainerFormat, Destination, Muxer, StreamDescriptor};
use crate::error::DestinationError;
use crate::video::Packet;

// ── In-memory muxer ──────────────────────────────────────────────────

/// Everything written to one fragment
#[derive(Debug, Clone)]
pub struct RecordedFragment {
    pub path: PathBuf,
    pub format: ContainerFormat,
    pub streams: Vec<StreamDescriptor>,
    pub packets: Vec<Packet>,
    pub finished: bool,
}

impl RecordedFragment {
    pub fn stream_packets(&self, stream_index: usize) -> impl Iterator<Item = &Packet> {
        self.packets.iter().filter(move |p| p.stream_index == stream_index)
    }
}

/// Muxer that records fragments in memory. With `write_files` the payloads
/// are also written to the fragment path on finish so upload tests have a
/// real file to move.
#[derive(Clone, Default)]
pub struct MemoryMuxer {
    fragments: Arc<Mutex<Vec<RecordedFragment>>>,
    write_files: bool,
    /// Remaining successful opens before every open fails
    opens_left: Arc<Mutex<Option<usize>>>,
}

impl MemoryMuxer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn writing_files(mut self) -> Self {
        self.write_files = true;
        self
    }

    /// Fail every open after the first `n`
    pub fn failing_after(self, n: usize) -> Self {
        *self.opens_left.lock() = Some(n);
        self
    }

    pub fn fragments(&self) -> Vec<RecordedFragment> {
        self.fragments.lock().clone()
    }

    pub fn finished(&self) -> Vec<RecordedFragment> {
        self.fragments.lock().iter().filter(|f| f.finished).cloned().collect()
    }
}

impl Muxer for MemoryMuxer {
    fn open(
        &self,
        format: ContainerFormat,
        path: &Path,
        streams: &[StreamDescriptor],
    ) -> Result<Box<dyn Destination>, DestinationError> {
        if let Some(left) = self.opens_left.lock().as_mut() {
            if *left == 0 {
                return Err(DestinationError::Open {
                    path: path.to_path_buf(),
                    reason: "disk full".into(),
                });
            }
            *left -= 1;
        }

        let mut fragments = self.fragments.lock();
        fragments.push(RecordedFragment {
            path: path.to_path_buf(),
            format,
            streams: streams.to_vec(),
            packets: Vec::new(),
            finished: false,
        });
        Ok(Box::new(MemoryDestination {
            fragments: self.fragments.clone(),
            slot: fragments.len() - 1,
            write_files: self.write_files,
        }))
    }
}

struct MemoryDestination {
    fragments: Arc<Mutex<Vec<RecordedFragment>>>,
    slot: usize,
    write_files: bool,
}

impl Destination for MemoryDestination {
    fn write_packet(&mut self, packet: &Packet) -> Result<(), DestinationError> {
        let mut fragments = self.fragments.lock();
        let fragment = &mut fragments[self.slot];
        if fragment.finished {
            return Err(DestinationError::Write("fragment already finished".into()));
        }
        fragment.packets.push(packet.clone());
        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<PathBuf, DestinationError> {
        let mut fragments = self.fragments.lock();
        let fragment = &mut fragments[self.slot];
        fragment.finished = true;
        if self.write_files {
            let bytes: Vec<u8> = fragment.packets.iter().flat_map(|p| p.data.iter().copied()).collect();
            std::fs::write(&fragment.path, bytes)?;
        }
        Ok(fragment.path.clone())
    }
}
