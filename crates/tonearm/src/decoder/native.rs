//! Container-seek decoder for AAC and ALAC in MP4.
//!
//! Position comes from packet timestamps, so it is unknown ([`TIME_UNKNOWN`]) until the
//! first packet is decoded or a seek lands.

use std::path::Path;

use anyhow::{Context, Result};

use super::stream::{self, PacketRead, SymphoniaStream};
use super::{Common, Decoder, DecoderState, SkipFlag, TIME_UNKNOWN};
use crate::diagnostics::Diagnostics;
use crate::types::{CodecKind, FormatDescriptor, SampleBuffer};

const MAX_SKIPPED_PACKETS: u32 = 64;

pub struct NativeDecoder {
    common: Common,
    stream: Option<SymphoniaStream>,
    /// Seconds at the end of the last delivered packet, or [`TIME_UNKNOWN`].
    time: f64,
    /// Packets ending before this timestamp are dropped; the one straddling it is trimmed.
    trim_until_ts: Option<u64>,
    skipped_in_row: u32,
    bit_rate: Option<u32>,
}

impl NativeDecoder {
    pub fn new(kind: CodecKind, path: &Path, diag: Diagnostics) -> Self {
        Self {
            common: Common::new(kind, path, diag),
            stream: None,
            time: TIME_UNKNOWN,
            trim_until_ts: None,
            skipped_in_row: 0,
            bit_rate: None,
        }
    }

    /// Drop the part of a decoded packet that lies before the seek target.
    fn trim(&mut self, bytes: Vec<u8>, frames: u64, ts: u64) -> Option<Vec<u8>> {
        let Some(required) = self.trim_until_ts else {
            return Some(bytes);
        };
        if ts + frames <= required {
            return None;
        }
        self.trim_until_ts = None;
        if ts >= required || frames == 0 {
            return Some(bytes);
        }
        let frame_bytes = bytes.len() / frames as usize;
        let cut = ((required - ts) as usize * frame_bytes).min(bytes.len());
        Some(bytes[cut..].to_vec())
    }
}

impl Decoder for NativeDecoder {
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
        if duration > 0.0 {
            let file_len = std::fs::metadata(&self.common.path).map(|m| m.len()).unwrap_or(0);
            self.bit_rate = Some((file_len as f64 * 8.0 / duration / 1000.0).round() as u32);
        }

        self.common.duration = duration;
        self.common.format = Some(format);
        self.common.more = true;
        self.common.state = DecoderState::Ready;
        self.stream = Some(stream);
        self.time = TIME_UNKNOWN;
        tracing::info!(
            path = %self.common.path.display(),
            kind = %self.common.kind,
            format = %format,
            duration_secs = duration,
            "native decoder ready"
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
        let Some(stream) = self.stream.as_mut() else {
            return SampleBuffer::empty();
        };
        match stream.next_packet() {
            PacketRead::Audio { bytes, frames, ts } => {
                self.skipped_in_row = 0;
                self.time = stream.ts_to_secs(ts + frames);
                match self.trim(bytes, frames, ts) {
                    Some(bytes) => SampleBuffer::from_vec(bytes),
                    None => SampleBuffer::empty(),
                }
            }
            PacketRead::Skipped { reason, .. } => {
                self.skipped_in_row += 1;
                self.common.diag.warn(
                    self.common.component(),
                    format!("{}: {reason}", self.common.path.display()),
                );
                if self.skipped_in_row >= MAX_SKIPPED_PACKETS {
                    self.common.end_stream();
                }
                SampleBuffer::empty()
            }
            PacketRead::End => {
                self.common.end_stream();
                SampleBuffer::empty()
            }
        }
    }

    fn current_time(&self) -> f64 {
        self.time
    }

    fn duration(&self) -> f64 {
        self.common.duration
    }

    fn seek(&mut self, target_secs: f64) -> Result<()> {
        self.common.ensure_ready("seek")?;
        let target = self.common.clamp_target(target_secs);
        let _guard = self.common.skip.raise();
        let Some(stream) = self.stream.as_mut() else {
            return Ok(());
        };
        let (actual_ts, required_ts) = stream.seek(target)?;
        self.trim_until_ts = (required_ts > actual_ts).then_some(required_ts);
        self.time = stream.ts_to_secs(required_ts);
        tracing::debug!(
            path = %self.common.path.display(),
            target_secs = target,
            actual_ts,
            required_ts,
            "native seek"
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
        self.common.close();
    }

    fn diagnostics(&self) -> &Diagnostics {
        &self.common.diag
    }

    fn set_chunk_frames(&mut self, frames: usize) {
        self.common.chunk_frames = frames.max(1);
    }

    fn bit_rate_kbps(&self) -> Option<u32> {
        self.bit_rate
    }
}
