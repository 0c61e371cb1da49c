//! Symphonia packet stream shared by the compressed decoder variants.
//!
//! Uses Symphonia to:
//! - probe the input container and check the codec matches the classified kind
//! - pull packets and decode them into little-endian signed PCM bytes
//! - seek through the container index (native family only)

use std::fs::File;
use std::io::ErrorKind;
use std::path::Path;

use anyhow::{Context, Result, anyhow, bail};
use symphonia::core::audio::{AudioBufferRef, SampleBuffer as SymphoniaBuffer};
use symphonia::core::codecs::{
    CODEC_TYPE_AAC, CODEC_TYPE_ALAC, CODEC_TYPE_FLAC, CODEC_TYPE_MP2, CODEC_TYPE_MP3,
    CODEC_TYPE_NULL, CODEC_TYPE_VORBIS, CodecParameters, CodecType, DecoderOptions,
};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::units::{Time, TimeBase};

use crate::types::{CodecKind, FormatDescriptor};

/// Result of pulling one packet.
pub(crate) enum PacketRead {
    /// Decoded PCM for the packet starting at `ts` (in time-base units).
    Audio { bytes: Vec<u8>, frames: u64, ts: u64 },
    /// The packet could not be decoded; `frames` is its nominal length.
    Skipped { frames: u64, reason: String },
    End,
}

pub(crate) struct SymphoniaStream {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn symphonia::core::codecs::Decoder>,
    track_id: u32,
    time_base: Option<TimeBase>,
    params: CodecParameters,
    output: FormatDescriptor,
}

fn expected_codec(kind: CodecKind) -> Option<CodecType> {
    match kind {
        CodecKind::Mp3 => Some(CODEC_TYPE_MP3),
        CodecKind::Mp2 => Some(CODEC_TYPE_MP2),
        CodecKind::Flac => Some(CODEC_TYPE_FLAC),
        CodecKind::Vorbis => Some(CODEC_TYPE_VORBIS),
        CodecKind::Aac => Some(CODEC_TYPE_AAC),
        CodecKind::Alac => Some(CODEC_TYPE_ALAC),
        _ => None,
    }
}

fn probe(path: &Path, kind: CodecKind) -> Result<Box<dyn FormatReader>> {
    let file = File::open(path).with_context(|| format!("open {:?}", path))?;
    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    } else {
        hint.with_extension(kind.extension());
    }
    let mss = MediaSourceStream::new(Box::new(file), Default::default());
    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .with_context(|| format!("probe {:?}", path))?;
    Ok(probed.format)
}

impl SymphoniaStream {
    /// Probe `path` and set up a decoder for its first audio track.
    ///
    /// Fails when the container holds a different codec than `kind`.
    pub fn open(path: &Path, kind: CodecKind) -> Result<Self> {
        let expected = expected_codec(kind).ok_or_else(|| anyhow!("{kind} is not a packet codec"))?;
        let format = probe(path, kind)?;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| anyhow!("No audio track"))?;
        if track.codec_params.codec != expected {
            bail!(
                "{:?}: container holds {}, expected {kind}",
                path,
                codec_label(track.codec_params.codec)
            );
        }

        let params = track.codec_params.clone();
        let track_id = track.id;
        let channels = params
            .channels
            .ok_or_else(|| anyhow!("Unknown channels"))?
            .count();
        let rate = params
            .sample_rate
            .ok_or_else(|| anyhow!("Unknown sample rate"))?;
        let source_bits = params.bits_per_sample.or(params.bits_per_coded_sample).unwrap_or(16);
        let out_bits = if source_bits > 16 { 24 } else { 16 };
        let output = FormatDescriptor::signed_le(rate, out_bits, channels as u16);

        let decoder = symphonia::default::get_codecs()
            .make(&params, &DecoderOptions::default())
            .with_context(|| format!("create {kind} decoder"))?;

        Ok(Self {
            format,
            decoder,
            track_id,
            time_base: params.time_base,
            params,
            output,
        })
    }

    pub fn output(&self) -> FormatDescriptor {
        self.output
    }

    /// Duration announced by the container, if any.
    pub fn declared_duration(&self) -> Option<f64> {
        let frames = self.params.n_frames?;
        let rate = self.params.sample_rate?;
        if rate == 0 {
            return None;
        }
        Some(frames as f64 / rate as f64)
    }

    /// Seconds for a timestamp in this track's time base.
    pub fn ts_to_secs(&self, ts: u64) -> f64 {
        match self.time_base {
            Some(tb) => {
                let t = tb.calc_time(ts);
                t.seconds as f64 + t.frac
            }
            None => ts as f64 / self.output.sample_rate_hz.max(1) as f64,
        }
    }

    /// Pull and decode the next packet of the selected track.
    pub fn next_packet(&mut self) -> PacketRead {
        loop {
            let packet = match self.format.next_packet() {
                Ok(p) => p,
                Err(SymphoniaError::IoError(e)) if e.kind() == ErrorKind::UnexpectedEof => {
                    return PacketRead::End;
                }
                Err(SymphoniaError::ResetRequired) => return PacketRead::End,
                Err(e) => {
                    return PacketRead::Skipped {
                        frames: 0,
                        reason: format!("read packet: {e}"),
                    };
                }
            };
            if packet.track_id() != self.track_id {
                continue;
            }
            let ts = packet.ts();
            let nominal = packet.dur();
            return match self.decoder.decode(&packet) {
                Ok(decoded) => {
                    let frames = decoded.frames() as u64;
                    let bytes = interleave(decoded, self.output.bits_per_sample);
                    PacketRead::Audio { bytes, frames, ts }
                }
                Err(e) => PacketRead::Skipped {
                    frames: nominal,
                    reason: format!("decode packet: {e}"),
                },
            };
        }
    }

    /// Advance past the next packet without decoding it. Returns its length in frames.
    pub fn skip_packet(&mut self) -> Option<u64> {
        loop {
            match self.format.next_packet() {
                Ok(p) if p.track_id() == self.track_id => return Some(p.dur()),
                Ok(_) => continue,
                Err(_) => return None,
            }
        }
    }

    /// Container seek. Returns `(actual_ts, required_ts)`.
    pub fn seek(&mut self, secs: f64) -> Result<(u64, u64)> {
        let whole = secs.trunc();
        let time = Time::new(whole as u64, secs - whole);
        let seeked = self
            .format
            .seek(
                SeekMode::Accurate,
                SeekTo::Time {
                    time,
                    track_id: Some(self.track_id),
                },
            )
            .map_err(|e| anyhow!("seek to {secs:.3}s: {e}"))?;
        self.decoder.reset();
        Ok((seeked.actual_ts, seeked.required_ts))
    }
}

/// Total length in seconds from packet durations, without decoding.
pub(crate) fn scan_duration(path: &Path, kind: CodecKind) -> Result<f64> {
    let mut stream = SymphoniaStream::open(path, kind)?;
    let mut frames = 0u64;
    while let Some(dur) = stream.skip_packet() {
        frames += dur;
    }
    Ok(frames as f64 / stream.output.sample_rate_hz.max(1) as f64)
}

/// Interleave `decoded` into little-endian signed PCM of `bits` (16 or 24).
fn interleave(decoded: AudioBufferRef<'_>, bits: u16) -> Vec<u8> {
    let mut sample_buf = SymphoniaBuffer::<i32>::new(decoded.frames() as u64, *decoded.spec());
    sample_buf.copy_interleaved_ref(decoded);
    let samples = sample_buf.samples();
    let width = usize::from(bits / 8);
    let mut out = Vec::with_capacity(samples.len() * width);
    for &s in samples {
        if bits == 24 {
            out.extend_from_slice(&(s >> 8).to_le_bytes()[..3]);
        } else {
            out.extend_from_slice(&((s >> 16) as i16).to_le_bytes());
        }
    }
    out
}

fn codec_label(codec: CodecType) -> &'static str {
    match codec {
        CODEC_TYPE_FLAC => "FLAC",
        CODEC_TYPE_MP3 => "MP3",
        CODEC_TYPE_MP2 => "MP2",
        CODEC_TYPE_AAC => "AAC",
        CODEC_TYPE_ALAC => "ALAC",
        CODEC_TYPE_VORBIS => "VORBIS",
        _ => "another codec",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::tests::temp_path;
    use symphonia::core::audio::{AudioBuffer, Channels, Signal, SignalSpec};

    #[test]
    fn expected_codec_covers_packet_kinds() {
        assert_eq!(expected_codec(CodecKind::Flac), Some(CODEC_TYPE_FLAC));
        assert_eq!(expected_codec(CodecKind::Alac), Some(CODEC_TYPE_ALAC));
        assert!(expected_codec(CodecKind::Wav).is_none());
        assert!(expected_codec(CodecKind::Unknown).is_none());
    }

    #[test]
    fn interleave_scales_to_requested_width() {
        let spec = SignalSpec::new(8_000, Channels::FRONT_LEFT | Channels::FRONT_RIGHT);
        let mut buf = AudioBuffer::<i32>::new(2, spec);
        buf.render_reserved(Some(2));
        buf.chan_mut(0).copy_from_slice(&[i32::MAX, 0]);
        buf.chan_mut(1).copy_from_slice(&[i32::MIN, 1 << 16]);

        let bytes16 = interleave(AudioBufferRef::S32(std::borrow::Cow::Borrowed(&buf)), 16);
        let samples: Vec<i16> = bytes16
            .chunks_exact(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]))
            .collect();
        assert_eq!(samples, vec![i16::MAX, i16::MIN, 0, 1]);

        let bytes24 = interleave(AudioBufferRef::S32(std::borrow::Cow::Borrowed(&buf)), 24);
        assert_eq!(bytes24.len(), 12);
        assert_eq!(&bytes24[..3], &[0xFF, 0xFF, 0x7F]);
        assert_eq!(&bytes24[3..6], &[0x00, 0x00, 0x80]);
    }

    #[test]
    fn open_rejects_wrong_codec_and_garbage() {
        let path = temp_path("notflac.flac");
        std::fs::write(&path, b"definitely not a flac stream").unwrap();
        assert!(SymphoniaStream::open(&path, CodecKind::Flac).is_err());
        assert!(SymphoniaStream::open(&path, CodecKind::Wav).is_err());
        assert!(SymphoniaStream::open(Path::new("/nonexistent/a.mp3"), CodecKind::Mp3).is_err());
    }
}
