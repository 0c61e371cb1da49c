//! The decoder capability contract and its variants.
//!
//! Every supported codec implements [`Decoder`]. Variants are grouped by how they find a
//! position in the stream:
//! - [`PcmDecoder`]: byte-rate reopen-seek (WAV, AIFF)
//! - [`FrameDecoder`]: frame-rescan seek (MP3, MP2, FLAC, Ogg Vorbis)
//! - [`NativeDecoder`]: container seek (AAC and ALAC in MP4)
//!
//! Lifecycle: `Unprepared -> Ready -> Closed`. `prepare()` is the one operation that
//! fails loudly on a malformed or mislabeled file. Streaming never returns errors; read
//! failures are skipped and eventually surface as end of stream.

mod frames;
mod native;
mod pcm;
mod stream;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Result, bail};

pub use frames::FrameDecoder;
pub use native::NativeDecoder;
pub use pcm::PcmDecoder;

use crate::detect;
use crate::diagnostics::Diagnostics;
use crate::meta::{self, Artwork, CanonicalKey, MetaValue, MetadataContainer, TagReport, VbrFlag};
use crate::types::{CodecKind, FormatDescriptor, SampleBuffer, SeekFamily};

/// Replay gain reported when a file carries no loudness tag.
pub const DEFAULT_REPLAY_GAIN_DB: f32 = -6.0;

/// `current_time()` of a native-seek decoder before its first packet or seek.
pub const TIME_UNKNOWN: f64 = -1.0;

/// Frames per `next_sample()` chunk unless configured otherwise.
pub const DEFAULT_CHUNK_FRAMES: usize = 4096;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecoderState {
    Unprepared,
    Ready,
    Closed,
}

/// Shared "seek in progress" flag.
///
/// Cloned handles observe the same flag, so a controller thread can check whether the
/// decoder it drives is mid-seek without touching the decoder itself.
#[derive(Clone, Debug, Default)]
pub struct SkipFlag(Arc<AtomicBool>);

impl SkipFlag {
    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Set the flag until the returned guard drops.
    pub fn raise(&self) -> SkipGuard {
        self.0.store(true, Ordering::Release);
        SkipGuard(self.0.clone())
    }
}

pub struct SkipGuard(Arc<AtomicBool>);

impl Drop for SkipGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Capability contract shared by all decoder variants.
///
/// A decoder is driven by a single thread; control from other threads goes through the
/// owner (see `PlaybackEngine`), not through shared access to the decoder.
pub trait Decoder: Send {
    fn kind(&self) -> CodecKind;

    fn path(&self) -> &Path;

    fn state(&self) -> DecoderState;

    /// Open the file, compute the format and duration. Only valid while `Unprepared`.
    fn prepare(&mut self) -> Result<()>;

    /// `true` until end of stream was observed; never flips back.
    fn more_samples(&self) -> bool;

    /// Next chunk of PCM. Empty when not ready, at end of stream, mid-seek, or after a
    /// read that produced nothing.
    fn next_sample(&mut self) -> SampleBuffer;

    /// Seconds played so far (see the family sentinels in the module docs).
    fn current_time(&self) -> f64;

    /// Total length in seconds; stays valid after `close()`.
    fn duration(&self) -> f64;

    /// Move to `target_secs`, clamped to `[0, duration()]`. Requires `Ready`.
    fn seek(&mut self, target_secs: f64) -> Result<()>;

    fn skip_flag(&self) -> SkipFlag;

    /// Output layout; stays valid after `close()`.
    fn format(&self) -> Option<FormatDescriptor>;

    /// Release file handles. Format and duration remain queryable.
    fn close(&mut self);

    fn diagnostics(&self) -> &Diagnostics;

    /// Target frames per `next_sample()` chunk (variants with fixed packets may differ).
    fn set_chunk_frames(&mut self, frames: usize);

    /// Average bit rate in kbit/s, if known.
    fn bit_rate_kbps(&self) -> Option<u32>;

    fn vbr(&self) -> VbrFlag {
        VbrFlag::for_kind(self.kind()).unwrap_or(VbrFlag::Unknown)
    }

    fn is_ready(&self) -> bool {
        self.state() == DecoderState::Ready
    }

    fn skip_in_progress(&self) -> bool {
        self.skip_flag().is_set()
    }

    /// Canonical metadata plus the synthesized `VBR`, `bitRate` and `sampleRate` fields.
    ///
    /// Requires a prepared decoder; an unprepared one yields an empty container.
    fn metadata(&self) -> MetadataContainer {
        if self.state() == DecoderState::Unprepared {
            return MetadataContainer::new();
        }
        let mut container = meta::tags::read_metadata(self.path(), self.kind(), self.diagnostics());
        if let Some(format) = self.format() {
            container.insert(CanonicalKey::SampleRate, i64::from(format.sample_rate_hz));
        }
        if let Some(kbps) = self.bit_rate_kbps() {
            container.insert(CanonicalKey::BitRate, i64::from(kbps));
        }
        container.insert(CanonicalKey::Vbr, MetaValue::Text(self.vbr().label().to_string()));
        container
    }

    /// Write `container` into the file's native tag.
    fn set_metadata(&mut self, container: &MetadataContainer) -> Result<TagReport> {
        if self.state() == DecoderState::Unprepared {
            bail!("{}: set_metadata before prepare", self.path().display());
        }
        meta::tags::write_metadata(self.path(), self.kind(), container, self.diagnostics())
    }

    fn artwork(&self) -> Option<Artwork> {
        if self.state() == DecoderState::Unprepared {
            return None;
        }
        meta::tags::read_artwork(self.path(), self.kind(), self.diagnostics())
    }

    fn set_artwork(&mut self, art: &Artwork) -> Result<()> {
        if self.state() == DecoderState::Unprepared {
            bail!("{}: set_artwork before prepare", self.path().display());
        }
        meta::tags::write_artwork(self.path(), self.kind(), art, self.diagnostics())
    }

    /// Track (or album) loudness normalization value, `None` without a tag.
    fn replay_gain(&self) -> Option<f32> {
        meta::tags::read_replay_gain(self.path(), self.diagnostics())
    }

    /// Like [`Decoder::replay_gain`] but falls back to [`DEFAULT_REPLAY_GAIN_DB`].
    fn replay_gain_db(&self) -> f32 {
        self.replay_gain().unwrap_or(DEFAULT_REPLAY_GAIN_DB)
    }
}

/// Book-keeping every variant carries.
#[derive(Debug)]
pub(crate) struct Common {
    pub kind: CodecKind,
    pub path: PathBuf,
    pub state: DecoderState,
    pub format: Option<FormatDescriptor>,
    pub duration: f64,
    pub more: bool,
    pub skip: SkipFlag,
    pub diag: Diagnostics,
    pub chunk_frames: usize,
}

impl Common {
    pub fn new(kind: CodecKind, path: &Path, diag: Diagnostics) -> Self {
        Self {
            kind,
            path: path.to_path_buf(),
            state: DecoderState::Unprepared,
            format: None,
            duration: 0.0,
            more: false,
            skip: SkipFlag::default(),
            diag,
            chunk_frames: DEFAULT_CHUNK_FRAMES,
        }
    }

    pub fn component(&self) -> &'static str {
        match self.kind.seek_family() {
            Some(SeekFamily::ByteRate) => "pcm-decoder",
            Some(SeekFamily::FrameRescan) => "frame-decoder",
            Some(SeekFamily::Native) => "native-decoder",
            None => "decoder",
        }
    }

    pub fn ensure_unprepared(&self) -> Result<()> {
        match self.state {
            DecoderState::Unprepared => Ok(()),
            other => bail!("{}: prepare called in state {other:?}", self.path.display()),
        }
    }

    pub fn ensure_ready(&self, op: &str) -> Result<()> {
        match self.state {
            DecoderState::Ready => Ok(()),
            other => bail!("{}: {op} requires a ready decoder (state {other:?})", self.path.display()),
        }
    }

    pub fn clamp_target(&self, target_secs: f64) -> f64 {
        if !target_secs.is_finite() || target_secs <= 0.0 {
            0.0
        } else {
            target_secs.min(self.duration)
        }
    }

    /// Mark end of stream (sticky).
    pub fn end_stream(&mut self) {
        if self.more {
            tracing::debug!(path = %self.path.display(), "end of stream");
        }
        self.more = false;
    }

    pub fn close(&mut self) {
        if self.state == DecoderState::Ready {
            tracing::debug!(path = %self.path.display(), "decoder closed");
        }
        self.state = DecoderState::Closed;
        self.more = false;
    }
}

/// Construct the (unprepared) decoder variant for `kind`.
///
/// Returns `None` for kinds without a decoder.
pub fn decoder_for(kind: CodecKind, path: &Path, diag: Diagnostics) -> Option<Box<dyn Decoder>> {
    let decoder: Box<dyn Decoder> = match kind.seek_family()? {
        SeekFamily::ByteRate => Box::new(PcmDecoder::new(kind, path, diag)),
        SeekFamily::FrameRescan => Box::new(FrameDecoder::new(kind, path, diag)),
        SeekFamily::Native => Box::new(NativeDecoder::new(kind, path, diag)),
    };
    Some(decoder)
}

/// Classify `path` and return a prepared decoder for it.
///
/// `None` when the file is unknown, unsupported, or fails to prepare. Never panics and
/// never hands out a half-initialized decoder.
pub fn load_file(path: &Path, diag: &Diagnostics) -> Option<Box<dyn Decoder>> {
    let kind = detect::classify(path);
    let mut decoder = decoder_for(kind, path, diag.clone())?;
    match decoder.prepare() {
        Ok(()) => Some(decoder),
        Err(err) => {
            diag.warn(
                "loader",
                format!("cannot open {} as {kind}: {err:#}", path.display()),
            );
            None
        }
    }
}
