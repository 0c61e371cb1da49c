//! Byte-rate decoder for uncompressed PCM containers (WAV, AIFF).
//!
//! Samples are handed out exactly as stored in the file. Time is bytes consumed divided
//! by the byte rate. Backward seeks reopen the file because the data chunk is read
//! through a forward-only buffered reader; forward seeks skip the delta.

use std::fs::File;
use std::io::{self, BufReader, ErrorKind, Read, Seek, SeekFrom};
use std::path::Path;

use anyhow::{Context, Result};

use super::{Common, Decoder, DecoderState, SkipFlag};
use crate::diagnostics::Diagnostics;
use crate::iff::{self, PcmLayout};
use crate::types::{CodecKind, FormatDescriptor, SampleBuffer};

/// Consecutive read failures tolerated before the stream is treated as ended.
const MAX_READ_ERRORS: u32 = 8;

pub struct PcmDecoder {
    common: Common,
    reader: Option<BufReader<File>>,
    layout: Option<PcmLayout>,
    bytes_played: u64,
    read_errors: u32,
}

impl PcmDecoder {
    pub fn new(kind: CodecKind, path: &Path, diag: Diagnostics) -> Self {
        Self {
            common: Common::new(kind, path, diag),
            reader: None,
            layout: None,
            bytes_played: 0,
            read_errors: 0,
        }
    }

    /// Open the file and position the reader at the first sample byte.
    fn open(&self) -> Result<(BufReader<File>, PcmLayout)> {
        let path = &self.common.path;
        let file = File::open(path).with_context(|| format!("open {:?}", path))?;
        let mut reader = BufReader::new(file);
        let layout = match self.common.kind {
            CodecKind::Aiff => iff::parse_aiff(&mut reader),
            _ => iff::parse_wav(&mut reader),
        }
        .with_context(|| format!("parse {} header of {:?}", self.common.kind, path))?;
        reader.seek(SeekFrom::Start(layout.data_offset))?;
        Ok((reader, layout))
    }

    fn remaining(&self) -> u64 {
        self.layout
            .map(|l| l.data_len.saturating_sub(self.bytes_played))
            .unwrap_or(0)
    }

    /// Discard `count` bytes, looping since a single copy may stop short.
    fn skip_bytes(&mut self, count: u64) -> io::Result<u64> {
        let Some(reader) = self.reader.as_mut() else {
            return Ok(0);
        };
        let mut skipped = 0;
        while skipped < count {
            let n = io::copy(&mut reader.by_ref().take(count - skipped), &mut io::sink())?;
            if n == 0 {
                break;
            }
            skipped += n;
        }
        self.bytes_played += skipped;
        Ok(skipped)
    }

    /// Fill `buf` as far as the file allows.
    fn read_chunk(reader: &mut BufReader<File>, buf: &mut [u8]) -> io::Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            match reader.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) if filled > 0 => {
                    tracing::debug!(error = %e, "short read");
                    break;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(filled)
    }
}

impl Decoder for PcmDecoder {
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
        let (reader, layout) = self.open()?;
        let format = layout.format;
        self.common.duration = format.seconds_for_bytes(layout.data_len);
        self.common.format = Some(format);
        self.common.more = true;
        self.common.state = DecoderState::Ready;
        self.reader = Some(reader);
        self.layout = Some(layout);
        self.bytes_played = 0;
        tracing::info!(
            path = %self.common.path.display(),
            format = %format,
            duration_secs = self.common.duration,
            "pcm decoder ready"
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
        let Some(format) = self.common.format else {
            return SampleBuffer::empty();
        };
        let frame = format.bytes_per_frame().max(1);
        let want = (self.common.chunk_frames * frame).min(self.remaining() as usize);
        if want == 0 {
            self.common.end_stream();
            return SampleBuffer::empty();
        }

        let Some(reader) = self.reader.as_mut() else {
            return SampleBuffer::empty();
        };
        let mut buf = vec![0u8; want];
        match Self::read_chunk(reader, &mut buf) {
            Ok(0) => {
                self.common.end_stream();
                SampleBuffer::empty()
            }
            Ok(n) => {
                self.read_errors = 0;
                // keep whole frames; a torn tail means the file ended early
                let whole = n - n % frame;
                self.bytes_played += n as u64;
                if whole < n || self.remaining() == 0 {
                    self.common.end_stream();
                }
                SampleBuffer::with_length(buf, whole)
            }
            Err(err) => {
                self.read_errors += 1;
                self.common.diag.warn(
                    self.common.component(),
                    format!("{}: read error ({err}), skipping one chunk", self.common.path.display()),
                );
                if self.read_errors >= MAX_READ_ERRORS {
                    self.common.end_stream();
                } else if let Err(err) = self.skip_bytes(want as u64) {
                    tracing::debug!(error = %err, "skip after read error failed");
                    self.common.end_stream();
                }
                SampleBuffer::empty()
            }
        }
    }

    fn current_time(&self) -> f64 {
        match self.common.format {
            Some(format) => format.seconds_for_bytes(self.bytes_played),
            None => 0.0,
        }
    }

    fn duration(&self) -> f64 {
        self.common.duration
    }

    fn seek(&mut self, target_secs: f64) -> Result<()> {
        self.common.ensure_ready("seek")?;
        let (Some(format), Some(layout)) = (self.common.format, self.layout) else {
            return Ok(());
        };
        let target = self.common.clamp_target(target_secs);
        let target_bytes = format.frame_aligned_bytes(target).min(layout.data_len);
        let _guard = self.common.skip.raise();

        if target_bytes < self.bytes_played {
            let (reader, layout) = self.open().context("reopen for backward seek")?;
            self.reader = Some(reader);
            self.layout = Some(layout);
            self.bytes_played = 0;
        }
        let delta = target_bytes - self.bytes_played;
        let skipped = self.skip_bytes(delta).context("skip to seek target")?;
        tracing::debug!(
            path = %self.common.path.display(),
            target_secs = target,
            skipped,
            "pcm seek"
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
        self.reader = None;
        self.common.close();
    }

    fn diagnostics(&self) -> &Diagnostics {
        &self.common.diag
    }

    fn set_chunk_frames(&mut self, frames: usize) {
        self.common.chunk_frames = frames.max(1);
    }

    fn bit_rate_kbps(&self) -> Option<u32> {
        self.common
            .format
            .map(|f| (f.bytes_per_second() * 8 / 1000) as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::tests::temp_path;

    fn write_wav(path: &Path, rate: u32, channels: u16, frames: u32) -> Vec<i16> {
        let spec = hound::WavSpec {
            channels,
            sample_rate: rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        let mut samples = Vec::new();
        for i in 0..frames * u32::from(channels) {
            let s = ((i * 37) % 2000) as i16 - 1000;
            writer.write_sample(s).unwrap();
            samples.push(s);
        }
        writer.finalize().unwrap();
        samples
    }

    fn drain(dec: &mut dyn Decoder) -> Vec<u8> {
        let mut out = Vec::new();
        while dec.more_samples() {
            out.extend_from_slice(dec.next_sample().as_bytes());
        }
        out
    }

    #[test]
    fn decodes_wav_bytes_exactly() {
        let path = temp_path("exact.wav");
        let samples = write_wav(&path, 8_000, 2, 10_000);
        let mut dec = PcmDecoder::new(CodecKind::Wav, &path, Diagnostics::new());
        assert_eq!(dec.current_time(), 0.0);
        dec.prepare().unwrap();
        assert_eq!(dec.current_time(), 0.0);
        assert_eq!(dec.format(), Some(FormatDescriptor::signed_le(8_000, 16, 2)));
        assert!((dec.duration() - 1.25).abs() < 1e-9);

        let bytes = drain(&mut dec);
        let expected: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        assert_eq!(bytes, expected);
        assert!((dec.current_time() - 1.25).abs() < 1e-9);
    }

    #[test]
    fn more_samples_is_sticky() {
        let path = temp_path("sticky.wav");
        write_wav(&path, 8_000, 1, 100);
        let mut dec = PcmDecoder::new(CodecKind::Wav, &path, Diagnostics::new());
        dec.prepare().unwrap();
        let mut transitions = 0;
        let mut last = dec.more_samples();
        for _ in 0..10 {
            dec.next_sample();
            if last && !dec.more_samples() {
                transitions += 1;
            }
            assert!(!(dec.more_samples() && !last), "flipped back to true");
            last = dec.more_samples();
        }
        assert_eq!(transitions, 1);
        assert!(dec.next_sample().is_empty());
    }

    #[test]
    fn seeks_forward_and_backward() {
        let path = temp_path("seek.wav");
        write_wav(&path, 8_000, 1, 8_000 * 5);
        let mut dec = PcmDecoder::new(CodecKind::Wav, &path, Diagnostics::new());
        dec.prepare().unwrap();

        dec.seek(3.5).unwrap();
        assert!((dec.current_time() - 3.5).abs() < 0.1);
        let chunk = dec.next_sample();
        assert!(!chunk.is_empty());

        dec.seek(1.0).unwrap();
        assert!((dec.current_time() - 1.0).abs() < 0.1);
        assert!(!dec.skip_in_progress());

        // samples after a backward seek match a fresh decode at the same offset
        let after_seek = dec.next_sample().into_bytes();
        let mut fresh = PcmDecoder::new(CodecKind::Wav, &path, Diagnostics::new());
        fresh.prepare().unwrap();
        let all = drain(&mut fresh);
        assert_eq!(&all[16_000..16_000 + after_seek.len()], after_seek.as_slice());
    }

    #[test]
    fn seek_clamps_to_duration() {
        let path = temp_path("clamp.wav");
        write_wav(&path, 8_000, 1, 8_000);
        let mut dec = PcmDecoder::new(CodecKind::Wav, &path, Diagnostics::new());
        dec.prepare().unwrap();
        dec.seek(100.0).unwrap();
        assert!((dec.current_time() - 1.0).abs() < 1e-9);
        assert!(dec.next_sample().is_empty());
        assert!(!dec.more_samples());
    }

    #[test]
    fn prepare_twice_and_seek_before_prepare_fail() {
        let path = temp_path("twice.wav");
        write_wav(&path, 8_000, 1, 10);
        let mut dec = PcmDecoder::new(CodecKind::Wav, &path, Diagnostics::new());
        assert!(dec.seek(0.0).is_err());
        assert!(dec.next_sample().is_empty());
        dec.prepare().unwrap();
        assert!(dec.prepare().is_err());
    }

    #[test]
    fn close_keeps_format_and_duration() {
        let path = temp_path("close.wav");
        write_wav(&path, 8_000, 2, 4_000);
        let mut dec = PcmDecoder::new(CodecKind::Wav, &path, Diagnostics::new());
        dec.prepare().unwrap();
        dec.close();
        assert_eq!(dec.state(), DecoderState::Closed);
        assert!(!dec.is_ready());
        assert!(!dec.more_samples());
        assert!(dec.next_sample().is_empty());
        assert!(dec.seek(0.1).is_err());
        assert_eq!(dec.format().unwrap().channels, 2);
        assert!((dec.duration() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn wrong_codec_fails_prepare() {
        let path = temp_path("mislabeled.aiff");
        write_wav(&path, 8_000, 1, 10);
        let mut dec = PcmDecoder::new(CodecKind::Aiff, &path, Diagnostics::new());
        assert!(dec.prepare().is_err());
        assert_eq!(dec.state(), DecoderState::Unprepared);
    }
}
