//! Frame-rescan decoder for MP3, MP2, FLAC and Ogg Vorbis.
//!
//! Position is the number of frames handed out (or discarded) divided by the sample rate.
//! A backward seek reopens the stream; every seek then walks forward from where the stream
//! is to the target and lands exactly on the requested frame.

use std::path::Path;

use anyhow::{Context, Result};

use super::stream::{self, PacketRead, SymphoniaStream};
use super::{Common, Decoder, DecoderState, SkipFlag};
use crate::diagnostics::Diagnostics;
use crate::meta::{VbrFlag, vbr};
use crate::types::{CodecKind, FormatDescriptor, SampleBuffer};

/// Packets decoded (rather than skipped blind) ahead of a seek target.
const PREROLL_PACKETS: u64 = 2;

/// Consecutive undecodable packets tolerated before the stream is treated as ended.
const MAX_SKIPPED_PACKETS: u32 = 64;

pub struct FrameDecoder {
    common: Common,
    stream: Option<SymphoniaStream>,
    /// Frames delivered or discarded since the start of the file.
    position: u64,
    /// Tail of a packet split by a seek, returned before the next packet.
    pending: Vec<u8>,
    skipped_in_row: u32,
    vbr: VbrFlag,
    bit_rate: Option<u32>,
}

impl FrameDecoder {
    pub fn new(kind: CodecKind, path: &Path, diag: Diagnostics) -> Self {
        Self {
            common: Common::new(kind, path, diag),
            stream: None,
            position: 0,
            pending: Vec::new(),
            skipped_in_row: 0,
            vbr: VbrFlag::for_kind(kind).unwrap_or(VbrFlag::Unknown),
            bit_rate: None,
        }
    }

    fn rate(&self) -> u64 {
        self.common
            .format
            .map(|f| u64::from(f.sample_rate_hz))
            .unwrap_or(0)
    }

    fn note_skip(&mut self, reason: &str) {
        self.skipped_in_row += 1;
        self.common.diag.warn(
            self.common.component(),
            format!("{}: {reason}", self.common.path.display()),
        );
        if self.skipped_in_row >= MAX_SKIPPED_PACKETS {
            self.common.end_stream();
        }
    }

    /// Move to `target` frames: reopen only when the target is behind us, then walk
    /// forward on the open stream.
    fn rescan_to(&mut self, target: u64) -> Result<()> {
        if target < self.position || self.stream.is_none() {
            let fresh = SymphoniaStream::open(&self.common.path, self.common.kind)
                .context("reopen for seek")?;
            self.stream = Some(fresh);
            self.position = 0;
            self.pending.clear();
        }
        let Some(stream) = self.stream.as_mut() else {
            return Ok(());
        };
        let frame_bytes = stream.output().bytes_per_frame().max(1);

        // `pending` starts at `position` and has not been counted yet
        if !self.pending.is_empty() {
            let pending_frames = (self.pending.len() / frame_bytes) as u64;
            if target < self.position + pending_frames {
                self.pending = self.pending.split_off((target - self.position) as usize * frame_bytes);
                self.position = target;
                return Ok(());
            }
            self.position += pending_frames;
            self.pending.clear();
        }
        walk_forward(stream, &mut self.position, &mut self.pending, target, frame_bytes);
        Ok(())
    }
}

/// Decode or skip packets until `position` reaches `target`; the part of the packet
/// crossing the target is left in `pending`.
fn walk_forward(
    stream: &mut SymphoniaStream,
    position: &mut u64,
    pending: &mut Vec<u8>,
    target: u64,
    frame_bytes: usize,
) {
    let mut last_dur = 0u64;
    while *position < target {
        // skip blind while comfortably before the target
        if last_dur > 0 && *position + last_dur * (PREROLL_PACKETS + 1) <= target {
            match stream.skip_packet() {
                Some(dur) => {
                    *position += dur;
                    last_dur = dur.max(1);
                    continue;
                }
                None => break,
            }
        }
        match stream.next_packet() {
            PacketRead::Audio { bytes, frames, .. } => {
                last_dur = frames.max(1);
                if *position + frames <= target {
                    *position += frames;
                    continue;
                }
                let keep_from = ((target - *position) as usize * frame_bytes).min(bytes.len());
                *pending = bytes[keep_from..].to_vec();
                *position = target;
            }
            PacketRead::Skipped { frames, .. } => {
                *position += frames;
                last_dur = frames.max(last_dur);
                if frames == 0 {
                    break;
                }
            }
            PacketRead::End => break,
        }
    }
}

impl Decoder for FrameDecoder {
    fn kind(&self) -> CodecKind {
        self.common.kind
    }

    fn path(&self) -> &Path {
        &self.common.path
    }

    fn state(&self) -> DecoderState {
        self.common.state
    }

    fn prepare(&mut self) -> Result<()> {
        self.common.ensure_unprepared()?;
        let stream = SymphoniaStream::open(&self.common.path, self.common.kind)?;
        let duration = match stream.declared_duration() {
            Some(d) => d,
            None => stream::scan_duration(&self.common.path, self.common.kind)
                .context("scan for duration")?,
        };
        let format = stream.output();

        if matches!(self.common.kind, CodecKind::Mp3 | CodecKind::Mp2) {
            self.vbr = vbr::detect_mpeg_vbr(&self.common.path);
        }
        if duration > 0.0 {
            let file_len = std::fs::metadata(&self.common.path).map(|m| m.len()).unwrap_or(0);
            self.bit_rate = Some((file_len as f64 * 8.0 / duration / 1000.0).round() as u32);
        }

        self.common.duration = duration;
        self.common.format = Some(format);
        self.common.more = true;
        self.common.state = DecoderState::Ready;
        self.stream = Some(stream);
        self.position = 0;
        tracing::info!(
            path = %self.common.path.display(),
            kind = %self.common.kind,
            format = %format,
            duration_secs = duration,
            vbr = self.vbr.label(),
            "frame decoder ready"
        );
        Ok(())
    }

    fn more_samples(&self) -> bool {
        self.common.more
    }

    fn next_sample(&mut self) -> SampleBuffer {
        if self.common.state != DecoderState::Ready || !self.common.more || self.common.skip.is_set() {
            return SampleBuffer::empty();
        }
        let frame_bytes = self.common.format.map(|f| f.bytes_per_frame()).unwrap_or(1).max(1);
        if !self.pending.is_empty() {
            let bytes = std::mem::take(&mut self.pending);
            self.position += (bytes.len() / frame_bytes) as u64;
            return SampleBuffer::from_vec(bytes);
        }
        let Some(stream) = self.stream.as_mut() else {
            return SampleBuffer::empty();
        };
        match stream.next_packet() {
            PacketRead::Audio { bytes, frames, .. } => {
                self.skipped_in_row = 0;
                self.position += frames;
                SampleBuffer::from_vec(bytes)
            }
            PacketRead::Skipped { frames, reason } => {
                self.position += frames;
                self.note_skip(&reason);
                SampleBuffer::empty()
            }
            PacketRead::End => {
                self.common.end_stream();
                SampleBuffer::empty()
            }
        }
    }

    fn current_time(&self) -> f64 {
        let rate = self.rate();
        if rate == 0 {
            return 0.0;
        }
        self.position as f64 / rate as f64
    }

    fn duration(&self) -> f64 {
        self.common.duration
    }

    fn seek(&mut self, target_secs: f64) -> Result<()> {
        self.common.ensure_ready("seek")?;
        let target = self.common.clamp_target(target_secs);
        let target_frames = (target * self.rate() as f64) as u64;
        let _guard = self.common.skip.raise();
        self.rescan_to(target_frames)?;
        tracing::debug!(
            path = %self.common.path.display(),
            target_secs = target,
            landed_secs = self.current_time(),
            "frame seek"
        );
        Ok(())
    }

    fn skip_flag(&self) -> SkipFlag {
        self.common.skip.clone()
    }

    fn format(&self) -> Option<FormatDescriptor> {
        self.common.format
    }

    fn close(&mut self) {
        self.stream = None;
        self.pending.clear();
        self.common.close();
    }

    fn diagnostics(&self) -> &Diagnostics {
        &self.common.diag
    }

    /// Packets are returned whole, so the chunk size is fixed by the codec.
    fn set_chunk_frames(&mut self, frames: usize) {
        self.common.chunk_frames = frames.max(1);
    }

    fn bit_rate_kbps(&self) -> Option<u32> {
        self.bit_rate
    }

    fn vbr(&self) -> VbrFlag {
        self.vbr
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::tests::temp_path;
    use flacenc::component::BitRepr;
    use flacenc::error::Verify;

    fn write_flac(path: &Path, rate: usize, frames: usize) -> Vec<i32> {
        let samples: Vec<i32> = (0..frames).map(|i| ((i * 13) % 4000) as i32 - 2000).collect();
        let config = flacenc::config::Encoder::default().into_verified().unwrap();
        let source = flacenc::source::MemSource::from_samples(&samples, 1, 16, rate);
        let stream = flacenc::encode_with_fixed_block_size(&config, source, config.block_size)
            .unwrap();
        let mut sink = flacenc::bitsink::ByteSink::new();
        let _ = stream.write(&mut sink);
        std::fs::write(path, sink.as_slice()).unwrap();
        samples
    }

    fn drain(dec: &mut dyn Decoder) -> Vec<i16> {
        let mut out = Vec::new();
        while dec.more_samples() {
            let chunk = dec.next_sample();
            out.extend(
                chunk
                    .as_bytes()
                    .chunks_exact(2)
                    .map(|c| i16::from_le_bytes([c[0], c[1]])),
            );
        }
        out
    }

    #[test]
    fn decodes_flac_losslessly() {
        let path = temp_path("lossless.flac");
        let samples = write_flac(&path, 8_000, 20_000);
        let mut dec = FrameDecoder::new(CodecKind::Flac, &path, Diagnostics::new());
        dec.prepare().unwrap();
        assert_eq!(dec.format(), Some(FormatDescriptor::signed_le(8_000, 16, 1)));
        assert!((dec.duration() - 2.5).abs() < 1e-6);
        assert_eq!(dec.vbr(), VbrFlag::Yes);

        let decoded = drain(&mut dec);
        let expected: Vec<i16> = samples.iter().map(|&s| s as i16).collect();
        assert_eq!(decoded, expected);
        assert!((dec.current_time() - 2.5).abs() < 1e-6);
    }

    #[test]
    fn seek_lands_on_requested_frame() {
        let path = temp_path("seek.flac");
        let samples = write_flac(&path, 8_000, 8_000 * 6);
        let mut dec = FrameDecoder::new(CodecKind::Flac, &path, Diagnostics::new());
        dec.prepare().unwrap();

        dec.seek(4.0).unwrap();
        assert!((dec.current_time() - 4.0).abs() < 1e-6);
        let chunk = dec.next_sample();
        let first = i16::from_le_bytes([chunk.as_bytes()[0], chunk.as_bytes()[1]]);
        assert_eq!(first, samples[32_000] as i16);

        dec.seek(1.5).unwrap();
        assert!((dec.current_time() - 1.5).abs() < 1e-6);
        let chunk = dec.next_sample();
        let first = i16::from_le_bytes([chunk.as_bytes()[0], chunk.as_bytes()[1]]);
        assert_eq!(first, samples[12_000] as i16);
        assert!(!dec.skip_in_progress());
    }

    #[test]
    fn forward_seeks_continue_on_the_open_stream() {
        let path = temp_path("forward.flac");
        let samples = write_flac(&path, 8_000, 8_000 * 6);
        let mut dec = FrameDecoder::new(CodecKind::Flac, &path, Diagnostics::new());
        dec.prepare().unwrap();
        let first = |chunk: &SampleBuffer| i16::from_le_bytes([chunk.as_bytes()[0], chunk.as_bytes()[1]]);

        dec.seek(1.0).unwrap();
        assert!((dec.current_time() - 1.0).abs() < 1e-6);
        // target inside the split packet's leftover
        dec.seek(1.01).unwrap();
        assert!((dec.current_time() - 1.01).abs() < 1e-6);
        assert_eq!(first(&dec.next_sample()), samples[8_080] as i16);

        dec.next_sample();
        let read_to = dec.position;
        dec.seek(3.5).unwrap();
        assert!(read_to < 28_000);
        assert!((dec.current_time() - 3.5).abs() < 1e-6);
        assert_eq!(first(&dec.next_sample()), samples[28_000] as i16);

        dec.seek(3.5).unwrap();
        assert_eq!(first(&dec.next_sample()), samples[28_000] as i16);
        let rest = drain(&mut dec);
        assert!(!rest.is_empty());
        assert!((dec.current_time() - 6.0).abs() < 1e-6);
    }

    #[test]
    fn seek_past_end_clamps_then_ends() {
        let path = temp_path("clamp.flac");
        write_flac(&path, 8_000, 8_000 * 3);
        let mut dec = FrameDecoder::new(CodecKind::Flac, &path, Diagnostics::new());
        dec.prepare().unwrap();
        dec.seek(100.0).unwrap();
        assert!((dec.current_time() - 3.0).abs() < 1e-6);
        dec.seek(2.0).unwrap();
        assert!((dec.current_time() - 2.0).abs() < 1e-6);
        let rest = drain(&mut dec);
        assert_eq!(rest.len(), 8_000);
        assert!(!dec.more_samples());
    }

    #[test]
    fn mislabeled_file_fails_prepare() {
        let path = temp_path("actually-flac.mp3");
        write_flac(&path, 8_000, 1_000);
        let mut dec = FrameDecoder::new(CodecKind::Mp3, &path, Diagnostics::new());
        assert!(dec.prepare().is_err());
        assert_eq!(dec.state(), DecoderState::Unprepared);
    }

    #[test]
    fn close_keeps_format() {
        let path = temp_path("close.flac");
        write_flac(&path, 8_000, 4_000);
        let mut dec = FrameDecoder::new(CodecKind::Flac, &path, Diagnostics::new());
        dec.prepare().unwrap();
        dec.close();
        assert!(dec.next_sample().is_empty());
        assert!(dec.seek(0.0).is_err());
        assert_eq!(dec.format().unwrap().sample_rate_hz, 8_000);
        assert!((dec.duration() - 0.5).abs() < 1e-6);
    }
}
