//! The encoder capability contract and its variants.
//!
//! An encoder pulls every chunk from a bound source [`Decoder`], writes the target codec
//! to a sibling `.part` file, renames it into place and finally copies the source's tags
//! (with `Encoder` replaced by [`ENCODER_ID`]) and artwork onto the result.
//!
//! The per-codec part is a [`TargetCodec`]: its option table, its configuration and a
//! [`PcmWriter`] that turns `i32` samples into bytes on disk.

mod aiff;
mod mp3;
mod wav;

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};

pub use aiff::AiffCodec;
pub use mp3::{BITRATE_OPTION, Mp3Codec, Mp3Settings, QUALITY_OPTION};
pub use wav::WavCodec;

use crate::decoder::{self, Decoder, DecoderState};
use crate::diagnostics::Diagnostics;
use crate::meta::{CanonicalKey, ENCODER_ID};
use crate::pcm;
use crate::types::{CodecKind, FormatDescriptor};

pub type WavEncoder = CodecEncoder<WavCodec>;
pub type AiffEncoder = CodecEncoder<AiffCodec>;
pub type Mp3Encoder = CodecEncoder<Mp3Codec>;

/// Option name -> selectable choice labels.
pub type OptionTable = BTreeMap<String, Vec<String>>;

/// Option name -> chosen label.
pub type OptionValues = BTreeMap<String, String>;

/// Capability contract shared by all encoder variants.
pub trait Encoder: Send {
    fn kind(&self) -> CodecKind;

    /// Bind the decoder to pull from, replacing any previous source.
    fn set_source(&mut self, source: Box<dyn Decoder>);

    /// Hand the source back (to close it or reuse it).
    fn take_source(&mut self) -> Option<Box<dyn Decoder>>;

    /// `None` when the codec has nothing to configure.
    fn configurable_options(&self) -> Option<OptionTable>;

    /// Apply `values` picked from [`Encoder::configurable_options`]. Unknown names are
    /// ignored, unknown labels keep the current setting.
    fn configure(&mut self, format: &FormatDescriptor, values: &OptionValues);

    /// Encode the whole source into `target`. `false` on any failure, in which case no
    /// file is left at `target`.
    fn encode_audio(&mut self, target: &Path) -> bool;

    /// `0.0` before encoding, `1.0` once finished or failed.
    fn encoded_percent(&self) -> f64 {
        self.progress().fraction()
    }

    /// Handle for polling progress from another thread.
    fn progress(&self) -> EncodeProgress;

    /// Sticky: stays `true` after a failed `encode_audio`.
    fn has_failed(&self) -> bool;

    fn last_error(&self) -> Option<String>;
}

/// Progress shared between an encoding thread and pollers.
#[derive(Clone, Debug, Default)]
pub struct EncodeProgress {
    /// `f64` bits of the fraction done.
    fraction: Arc<AtomicU64>,
    failed: Arc<AtomicBool>,
}

impl EncodeProgress {
    pub fn fraction(&self) -> f64 {
        f64::from_bits(self.fraction.load(Ordering::Acquire))
    }

    pub fn has_failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }

    fn set(&self, fraction: f64) {
        let clamped = if fraction.is_finite() {
            fraction.clamp(0.0, 1.0)
        } else {
            0.0
        };
        self.fraction.store(clamped.to_bits(), Ordering::Release);
    }

    fn finish(&self, failed: bool) {
        if failed {
            self.failed.store(true, Ordering::Release);
        }
        self.set(1.0);
    }
}

/// Per-codec half of an encoder.
pub trait TargetCodec: Send {
    const KIND: CodecKind;

    fn options(&self) -> Option<OptionTable>;

    /// Apply one option. Returns `false` for an unknown label.
    fn apply_option(&mut self, name: &str, label: &str) -> bool;

    /// Check the codec can take `format` and adapt format-derived settings.
    fn accept(&mut self, format: &FormatDescriptor) -> Result<()>;

    /// Bit depth the writer expects its samples at.
    fn sample_bits(&self, format: &FormatDescriptor) -> u16;

    /// Start writing `format` audio to `file`.
    fn open_writer(&self, file: File, format: &FormatDescriptor) -> Result<Box<dyn PcmWriter>>;
}

/// Sink for interleaved samples of one output file. Lives on the encoding thread only.
pub trait PcmWriter {
    /// Interleaved samples, already at [`TargetCodec::sample_bits`].
    fn write(&mut self, samples: &[i32]) -> Result<()>;

    /// Frames accepted but not yet turned into output bytes.
    fn buffered_frames(&self) -> u64 {
        0
    }

    /// Flush the codec and finalize headers.
    fn finish(self: Box<Self>) -> Result<()>;
}

/// Consecutive empty reads tolerated while the source still reports more samples.
const MAX_EMPTY_READS: u32 = 10_000;

/// Generic encoder: source handling, progress, `.part` file and tag write-back around a
/// [`TargetCodec`].
pub struct CodecEncoder<C: TargetCodec> {
    codec: C,
    source: Option<Box<dyn Decoder>>,
    progress: EncodeProgress,
    error: Arc<Mutex<Option<String>>>,
    diag: Diagnostics,
}

impl<C: TargetCodec> CodecEncoder<C> {
    pub fn new(codec: C, diag: Diagnostics) -> Self {
        Self {
            codec,
            source: None,
            progress: EncodeProgress::default(),
            error: Arc::new(Mutex::new(None)),
            diag,
        }
    }

    pub fn codec(&self) -> &C {
        &self.codec
    }

    fn component(&self) -> String {
        format!("{}-encoder", C::KIND.extension())
    }

    fn fail(&self, target: &Path, err: anyhow::Error) {
        let message = format!("{err:#}");
        self.diag.error(
            &self.component(),
            format!("encoding {} failed: {message}", target.display()),
        );
        *self.error.lock().unwrap() = Some(message);
        self.progress.finish(true);
    }

    fn run(&mut self, target: &Path) -> Result<()> {
        let mut source = self
            .source
            .take()
            .ok_or_else(|| anyhow!("no source decoder bound"))?;
        let outcome = self.encode_from(source.as_mut(), target);
        self.source = Some(source);
        outcome
    }

    fn encode_from(&mut self, source: &mut dyn Decoder, target: &Path) -> Result<()> {
        if source.state() == DecoderState::Unprepared {
            source.prepare().context("prepare source")?;
        }
        if source.state() != DecoderState::Ready {
            bail!("source {} is closed", source.path().display());
        }
        let format = source
            .format()
            .ok_or_else(|| anyhow!("source has no format"))?;
        self.codec.accept(&format)?;

        let part = part_path(target);
        let outcome = self.write_part(source, &format, &part).and_then(|()| {
            fs::rename(&part, target)
                .with_context(|| format!("rename {:?} -> {:?}", part, target))
        });
        if let Err(err) = outcome {
            let _ = fs::remove_file(&part);
            return Err(err);
        }

        if let Err(err) = self.copy_tags(source, target) {
            let _ = fs::remove_file(target);
            return Err(err.context("write tags to target"));
        }
        Ok(())
    }

    fn write_part(&mut self, source: &mut dyn Decoder, format: &FormatDescriptor, part: &Path) -> Result<()> {
        let file = File::create(part).with_context(|| format!("create {:?}", part))?;
        let mut writer = self.codec.open_writer(file, format)?;
        let from_bits = (format.bytes_per_sample() * 8) as u16;
        let to_bits = self.codec.sample_bits(format);
        let duration = source.duration();
        let mut written_frames = 0u64;
        let mut empty_reads = 0u32;

        while source.more_samples() {
            let buf = source.next_sample();
            if buf.is_empty() {
                empty_reads += 1;
                if empty_reads > MAX_EMPTY_READS {
                    bail!("source stalled at {:.3}s", source.current_time());
                }
                if source.skip_in_progress() {
                    thread::sleep(Duration::from_millis(1));
                }
                continue;
            }
            empty_reads = 0;
            let mut samples = pcm::to_i32(buf.as_bytes(), format);
            pcm::rescale(&mut samples, from_bits, to_bits);
            writer.write(&samples)?;
            written_frames += buf.frames(format) as u64;

            if duration > 0.0 {
                let flushed = written_frames.saturating_sub(writer.buffered_frames());
                self.progress
                    .set(flushed as f64 / f64::from(format.sample_rate_hz) / duration);
            }
        }
        writer.finish()?;
        tracing::debug!(
            path = %part.display(),
            frames = written_frames,
            "encoded audio written"
        );
        Ok(())
    }

    fn copy_tags(&self, source: &dyn Decoder, target: &Path) -> Result<()> {
        let mut container = source.metadata();
        container.insert(CanonicalKey::Encoder, ENCODER_ID);
        let artwork = source.artwork();

        let mut reopened = decoder::decoder_for(C::KIND, target, self.diag.clone())
            .ok_or_else(|| anyhow!("no decoder for {}", C::KIND))?;
        reopened
            .prepare()
            .with_context(|| format!("reopen {:?}", target))?;
        let report = reopened.set_metadata(&container)?;
        if !report.unmapped.is_empty() {
            tracing::debug!(
                target = %target.display(),
                unmapped = ?report.unmapped,
                "tags without a mapping in the target schema"
            );
        }
        if let Some(art) = artwork {
            // artwork the target tag cannot hold is not worth failing the conversion
            if let Err(err) = reopened.set_artwork(&art) {
                self.diag
                    .warn(&self.component(), format!("artwork not copied: {err:#}"));
            }
        }
        reopened.close();
        Ok(())
    }
}

impl<C: TargetCodec> Encoder for CodecEncoder<C> {
    fn kind(&self) -> CodecKind {
        C::KIND
    }

    fn set_source(&mut self, source: Box<dyn Decoder>) {
        self.source = Some(source);
    }

    fn take_source(&mut self) -> Option<Box<dyn Decoder>> {
        self.source.take()
    }

    fn configurable_options(&self) -> Option<OptionTable> {
        self.codec.options()
    }

    fn configure(&mut self, format: &FormatDescriptor, values: &OptionValues) {
        let Some(table) = self.codec.options() else {
            return;
        };
        for (name, label) in values {
            if !table.contains_key(name) {
                tracing::debug!(option = %name, "ignoring unknown encoder option");
                continue;
            }
            if !self.codec.apply_option(name, label) {
                self.diag.warn(
                    &self.component(),
                    format!("{name}: '{label}' is not a valid choice, keeping current value"),
                );
            }
        }
        if let Err(err) = self.codec.accept(format) {
            self.diag.warn(&self.component(), format!("{err:#}"));
        }
    }

    fn encode_audio(&mut self, target: &Path) -> bool {
        self.progress.set(0.0);
        tracing::info!(target = %target.display(), codec = %C::KIND, "encoding");
        match self.run(target) {
            Ok(()) => {
                self.progress.finish(false);
                tracing::info!(target = %target.display(), "encoding finished");
                true
            }
            Err(err) => {
                self.fail(target, err);
                false
            }
        }
    }

    fn progress(&self) -> EncodeProgress {
        self.progress.clone()
    }

    fn has_failed(&self) -> bool {
        self.progress.has_failed()
    }

    fn last_error(&self) -> Option<String> {
        self.error.lock().unwrap().clone()
    }
}

/// `<target>.part` next to the target.
pub fn part_path(target: &Path) -> PathBuf {
    let mut name = target
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".part");
    target.with_file_name(name)
}

/// Construct the encoder for an output codec with default settings.
pub fn encoder_for(kind: CodecKind, diag: Diagnostics) -> Option<Box<dyn Encoder>> {
    let encoder: Box<dyn Encoder> = match kind {
        CodecKind::Wav => Box::new(WavEncoder::new(WavCodec::default(), diag)),
        CodecKind::Aiff => Box::new(AiffEncoder::new(AiffCodec::default(), diag)),
        CodecKind::Mp3 => Box::new(Mp3Encoder::new(Mp3Codec::default(), diag)),
        _ => return None,
    };
    Some(encoder)
}

/// 16-bit for sources up to 16 bits, 24-bit above.
pub(crate) fn integer_depth(format: &FormatDescriptor) -> u16 {
    if format.bits_per_sample <= 16 { 16 } else { 24 }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::detect::tests::temp_path;
    use crate::meta::MetadataContainer;

    /// 16-bit WAV with a sawtooth per channel.
    pub(crate) fn write_source_wav(path: &Path, rate: u32, channels: u16, frames: u32) -> Vec<i16> {
        let spec = hound::WavSpec {
            channels,
            sample_rate: rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        let mut samples = Vec::new();
        for i in 0..frames {
            for ch in 0..channels {
                let s = (((i * 97 + u32::from(ch) * 13) % 4000) as i32 - 2000) as i16 * 8;
                writer.write_sample(s).unwrap();
                samples.push(s);
            }
        }
        writer.finalize().unwrap();
        samples
    }

    pub(crate) fn tagged_source(path: &Path) -> Box<dyn Decoder> {
        let diag = Diagnostics::new();
        let mut source = decoder::decoder_for(CodecKind::Wav, path, diag).unwrap();
        source.prepare().unwrap();
        let mut tags = MetadataContainer::new();
        tags.insert(CanonicalKey::Title, "Test Tone");
        tags.insert(CanonicalKey::Artist, "Tonearm");
        tags.insert(CanonicalKey::Album, "Fixtures");
        tags.insert(CanonicalKey::Year, 1999i64);
        tags.insert(CanonicalKey::Encoder, "something else");
        assert!(source.set_metadata(&tags).unwrap().is_clean());
        source
    }

    #[test]
    fn part_path_appends_suffix() {
        assert_eq!(
            part_path(Path::new("/tmp/out/song.mp3")),
            PathBuf::from("/tmp/out/song.mp3.part")
        );
    }

    #[test]
    fn only_output_codecs_have_encoders() {
        for kind in CodecKind::ENCODABLE {
            assert_eq!(encoder_for(kind, Diagnostics::new()).unwrap().kind(), kind);
        }
        assert!(encoder_for(CodecKind::Flac, Diagnostics::new()).is_none());
        assert!(encoder_for(CodecKind::Unknown, Diagnostics::new()).is_none());
    }

    #[test]
    fn progress_is_clamped_and_finishes_at_one() {
        let progress = EncodeProgress::default();
        assert_eq!(progress.fraction(), 0.0);
        progress.set(1.7);
        assert_eq!(progress.fraction(), 1.0);
        progress.set(f64::NAN);
        assert_eq!(progress.fraction(), 0.0);
        progress.finish(true);
        assert_eq!(progress.fraction(), 1.0);
        assert!(progress.has_failed());
    }

    #[test]
    fn encoding_without_source_fails_and_leaves_nothing() {
        let target = temp_path("nosource.wav");
        let mut enc = encoder_for(CodecKind::Wav, Diagnostics::new()).unwrap();
        assert_eq!(enc.encoded_percent(), 0.0);
        assert!(!enc.encode_audio(&target));
        assert!(enc.has_failed());
        assert_eq!(enc.encoded_percent(), 1.0);
        assert!(enc.last_error().unwrap().contains("no source"));
        assert!(!target.exists());
        assert!(!part_path(&target).exists());
    }

    #[test]
    fn rejected_format_removes_nothing_and_reports() {
        let src = temp_path("surround.wav");
        write_source_wav(&src, 44_100, 6, 1_000);
        let target = temp_path("surround.mp3");
        let mut enc = encoder_for(CodecKind::Mp3, Diagnostics::new()).unwrap();
        enc.set_source(decoder::load_file(&src, &Diagnostics::new()).unwrap());
        assert!(!enc.encode_audio(&target));
        assert!(enc.has_failed());
        assert!(!target.exists());
        assert!(!part_path(&target).exists());
        // the source is handed back even after a failure
        assert!(enc.take_source().is_some());
    }

    #[test]
    fn unknown_options_are_ignored() {
        let diag = Diagnostics::new();
        let mut enc = encoder_for(CodecKind::Wav, diag.clone()).unwrap();
        assert!(enc.configurable_options().is_none());
        let mut values = OptionValues::new();
        values.insert("Nope".to_string(), "x".to_string());
        enc.configure(&FormatDescriptor::signed_le(44_100, 16, 2), &values);
        assert!(diag.is_empty());
    }
}
