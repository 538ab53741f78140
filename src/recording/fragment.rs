// Fragment files
//
// A fragment is one output file. Packets written to it are re-based so the
// fragment starts near zero and rescaled into the output timebase.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};

use crate::encoding::{AudioTranscoder, CodecEngine, ContainerFormat, Destination, Muxer, StreamDescriptor};
use crate::error::{CaptureError, DestinationError};
use crate::video::{log_packet, rescale, MediaKind, Packet, Rational, SourceInfo, StreamInfo, OUTPUT_TIME_BASE};

// ============================================================================
// Fragment Naming
// ============================================================================

/// Derives timestamped fragment paths from a `<dir>/<stem>.<ext>` template
#[derive(Debug, Clone)]
pub struct FragmentNamer {
    template: PathBuf,
    format: ContainerFormat,
    last: Option<PathBuf>,
    repeats: u32,
}

impl FragmentNamer {
    pub fn new(template: impl Into<PathBuf>, format: ContainerFormat) -> Self {
        Self {
            template: template.into(),
            format,
            last: None,
            repeats: 0,
        }
    }

    pub fn template(&self) -> &Path {
        &self.template
    }

    /// `<dir>/<stem>_<YYYYMMDD-HHMMSS>.<ext>` for the given moment. Two
    /// fragments opened within the same second get a `-N` suffix.
    pub fn path_at(&mut self, now: DateTime<Local>) -> PathBuf {
        let stem = self
            .template
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "fragment".to_string());
        let ext = self
            .template
            .extension()
            .map(|e| e.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.format.extension().to_string());
        let stamp = now.format("%Y%m%d-%H%M%S");

        let base = self.template.with_file_name(format!("{stem}_{stamp}.{ext}"));
        if self.last.as_ref() == Some(&base) {
            self.repeats += 1;
            return self
                .template
                .with_file_name(format!("{stem}_{stamp}-{}.{ext}", self.repeats));
        }
        self.last = Some(base.clone());
        self.repeats = 0;
        base
    }

    pub fn next_path(&mut self) -> PathBuf {
        self.path_at(Local::now())
    }
}

// ============================================================================
// Fragment
// ============================================================================

pub struct Fragment {
    path: PathBuf,
    destination: Box<dyn Destination>,
    streams: Vec<StreamInfo>,
    /// Streams the destination was opened with, indexed by source stream
    included: Vec<bool>,
    video_time_base: Rational,
    transcoder: Option<AudioTranscoder>,
    inband_headers: bool,
    packets_written: u64,
    write_errors: u64,
}

impl Fragment {
    /// Open a destination for every stream of `source`, re-encoding audio
    /// when the container forces a codec the source does not use
    pub fn open(
        muxer: &dyn Muxer,
        codecs: &dyn CodecEngine,
        format: ContainerFormat,
        path: &Path,
        source: &SourceInfo,
    ) -> Result<Self, CaptureError> {
        let video = source
            .video()
            .ok_or_else(|| CaptureError::state("source has no video stream"))?;

        let mut transcoder = None;
        let mut included = vec![true; source.streams.len()];
        let mut descriptors = Vec::with_capacity(source.streams.len());

        for (i, stream) in source.streams.iter().enumerate() {
            match format.required_audio_codec() {
                Some(codec) if stream.kind == MediaKind::Audio && stream.codec != codec => {
                    // Only the first mismatching audio stream is re-encoded
                    if transcoder.is_some() {
                        included[i] = false;
                        continue;
                    }
                    match AudioTranscoder::open(codecs, stream, codec) {
                        Ok(t) => {
                            descriptors.push(t.descriptor(stream));
                            transcoder = Some(t);
                        }
                        Err(e) => {
                            log::warn!(
                                "[Fragment] Dropping audio stream {} from {}: {}",
                                stream.index,
                                path.display(),
                                e
                            );
                            included[i] = false;
                        }
                    }
                }
                _ => descriptors.push(StreamDescriptor::copy_of(stream)),
            }
        }

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(DestinationError::from)?;
        }
        let destination = muxer.open(format, path, &descriptors)?;
        log::info!("[Fragment] Opened {} ({})", path.display(), format);

        Ok(Self {
            path: path.to_path_buf(),
            destination,
            streams: source.streams.clone(),
            included,
            video_time_base: video.time_base,
            transcoder,
            inband_headers: format.carries_inband_headers(),
            packets_written: 0,
            write_errors: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn packets_written(&self) -> u64 {
        self.packets_written
    }

    /// Write `packet` re-based against `baseline`, a dts in the video
    /// stream's timebase. Mux failures are logged and counted, not returned.
    pub fn write(&mut self, packet: Packet, baseline: i64) {
        let Some(stream) = self.streams.get(packet.stream_index) else {
            log::warn!("[Fragment] Packet for unknown stream {}", packet.stream_index);
            return;
        };
        if !self.included[packet.stream_index] {
            return;
        }
        let tb = stream.time_base;
        let baseline = rescale(baseline, self.video_time_base, tb);
        let dts = rescale(packet.dts - baseline, tb, OUTPUT_TIME_BASE).max(0);
        let pts = rescale(packet.pts - baseline, tb, OUTPUT_TIME_BASE).max(0);

        if let Some(transcoder) = self.transcoder.as_mut().filter(|t| t.stream_index() == packet.stream_index) {
            match transcoder.transcode(&packet, dts) {
                Ok(frames) => {
                    for frame in frames {
                        self.write_out(frame);
                    }
                }
                Err(e) => log::warn!("[Fragment] Skipping audio packet at {}: {}", packet.dts, e),
            }
            return;
        }

        let extradata = match (&stream.extradata, stream.repeat_headers && packet.keyframe && self.inband_headers) {
            (Some(extra), true) => Some(extra.clone()),
            _ => None,
        };
        let mut out = Packet {
            stream_index: packet.stream_index,
            dts,
            pts,
            duration: rescale(packet.duration, tb, OUTPUT_TIME_BASE),
            keyframe: packet.keyframe,
            data: packet.data,
        };

        if let Some(extra) = extradata {
            let headers = Packet::new(out.stream_index, out.dts, out.pts, false, extra);
            log_packet("extra", &headers);
            self.write_out(headers);
            out.dts += 1;
            out.pts += 1;
        }
        self.write_out(out);
    }

    fn write_out(&mut self, packet: Packet) {
        log_packet("out", &packet);
        match self.destination.write_packet(&packet) {
            Ok(()) => self.packets_written += 1,
            Err(e) => {
                self.write_errors += 1;
                log::warn!("[Fragment] Error muxing packet into {}: {}", self.path.display(), e);
            }
        }
    }

    /// Write the trailer and close the file
    pub fn close(self) -> Result<PathBuf, DestinationError> {
        let written = self.packets_written;
        let errors = self.write_errors;
        let path = self.destination.finish()?;
        log::info!(
            "[Fragment] Closed {} ({} packets, {} write errors)",
            path.display(),
            written,
            errors
        );
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn timestamped_names() {
        let mut namer = FragmentNamer::new("/data/cam/front.mp4", ContainerFormat::Mp4);
        let at = Local.with_ymd_and_hms(2026, 3, 7, 9, 5, 30).unwrap();
        assert_eq!(namer.path_at(at), PathBuf::from("/data/cam/front_20260307-090530.mp4"));
        assert_eq!(namer.path_at(at), PathBuf::from("/data/cam/front_20260307-090530-1.mp4"));
        assert_eq!(namer.path_at(at), PathBuf::from("/data/cam/front_20260307-090530-2.mp4"));

        let later = Local.with_ymd_and_hms(2026, 3, 7, 9, 6, 30).unwrap();
        assert_eq!(namer.path_at(later), PathBuf::from("/data/cam/front_20260307-090630.mp4"));
    }

    #[test]
    fn missing_extension_uses_format() {
        let mut namer = FragmentNamer::new("clips/door", ContainerFormat::MpegTs);
        let at = Local.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(namer.path_at(at), PathBuf::from("clips/door_20260101-000000.ts"));
    }
}
