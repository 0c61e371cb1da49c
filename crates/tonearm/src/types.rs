//! Value objects handed across the decode/encode/playback boundary.
//!
//! Everything the outer layers (catalog, UI, CLI) consume from the core is one of:
//! - [`CodecKind`]: what a file is
//! - [`FormatDescriptor`]: how its PCM is laid out
//! - [`SampleBuffer`]: one decoded chunk of that PCM

use std::fmt;

/// Concrete codec variant a file resolves to.
///
/// `Unknown` and `Unsupported` are the two "cannot decode" classifications:
/// `Unknown` means the input could not be identified at all (missing file, empty
/// extension, unparseable header), `Unsupported` means it was identified but carries a
/// codec this crate does not decode (for example Opus inside Ogg).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CodecKind {
    Wav,
    Aiff,
    Mp3,
    Mp2,
    Flac,
    Vorbis,
    Aac,
    Alac,
    Unsupported,
    Unknown,
}

/// How a decoder variant finds a position inside its stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SeekFamily {
    /// Time is bytes consumed divided by a constant byte rate.
    ByteRate,
    /// Time is frames decoded divided by the sample rate; seeking re-decodes.
    FrameRescan,
    /// The container maps time to a stream position itself.
    Native,
}

impl CodecKind {
    /// All variants that have a decoder.
    pub const DECODABLE: [CodecKind; 8] = [
        CodecKind::Wav,
        CodecKind::Aiff,
        CodecKind::Mp3,
        CodecKind::Mp2,
        CodecKind::Flac,
        CodecKind::Vorbis,
        CodecKind::Aac,
        CodecKind::Alac,
    ];

    /// All variants that have an encoder.
    pub const ENCODABLE: [CodecKind; 3] = [CodecKind::Wav, CodecKind::Aiff, CodecKind::Mp3];

    pub fn is_decodable(self) -> bool {
        Self::DECODABLE.contains(&self)
    }

    pub fn is_encodable(self) -> bool {
        Self::ENCODABLE.contains(&self)
    }

    /// Uncompressed PCM containers (no artwork facility, byte-rate timing).
    pub fn is_pcm(self) -> bool {
        matches!(self, CodecKind::Wav | CodecKind::Aiff)
    }

    /// Seek algorithm used by this variant, `None` for non-decodable kinds.
    pub fn seek_family(self) -> Option<SeekFamily> {
        match self {
            CodecKind::Wav | CodecKind::Aiff => Some(SeekFamily::ByteRate),
            CodecKind::Mp3 | CodecKind::Mp2 | CodecKind::Flac | CodecKind::Vorbis => {
                Some(SeekFamily::FrameRescan)
            }
            CodecKind::Aac | CodecKind::Alac => Some(SeekFamily::Native),
            CodecKind::Unsupported | CodecKind::Unknown => None,
        }
    }

    /// Preferred file extension when writing this codec.
    pub fn extension(self) -> &'static str {
        match self {
            CodecKind::Wav => "wav",
            CodecKind::Aiff => "aiff",
            CodecKind::Mp3 => "mp3",
            CodecKind::Mp2 => "mp2",
            CodecKind::Flac => "flac",
            CodecKind::Vorbis => "ogg",
            CodecKind::Aac | CodecKind::Alac => "m4a",
            CodecKind::Unsupported | CodecKind::Unknown => "bin",
        }
    }

    /// Short display label (also used in status payloads).
    pub fn label(self) -> &'static str {
        match self {
            CodecKind::Wav => "WAV",
            CodecKind::Aiff => "AIFF",
            CodecKind::Mp3 => "MP3",
            CodecKind::Mp2 => "MP2",
            CodecKind::Flac => "FLAC",
            CodecKind::Vorbis => "VORBIS",
            CodecKind::Aac => "AAC",
            CodecKind::Alac => "ALAC",
            CodecKind::Unsupported => "UNSUPPORTED",
            CodecKind::Unknown => "UNKNOWN",
        }
    }

    /// Parse a user-facing target name (`wav`, `aiff`, `mp3`, ...).
    pub fn from_name(name: &str) -> Option<Self> {
        let lower = name.trim().to_ascii_lowercase();
        let kind = match lower.as_str() {
            "wav" | "wave" => CodecKind::Wav,
            "aif" | "aiff" | "aifc" => CodecKind::Aiff,
            "mp3" => CodecKind::Mp3,
            "mp2" => CodecKind::Mp2,
            "flac" => CodecKind::Flac,
            "ogg" | "vorbis" => CodecKind::Vorbis,
            "aac" => CodecKind::Aac,
            "alac" => CodecKind::Alac,
            _ => return None,
        };
        Some(kind)
    }
}

impl fmt::Display for CodecKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// PCM layout of a decoder's output.
///
/// Produced once per successful `prepare()` and immutable afterwards.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FormatDescriptor {
    pub sample_rate_hz: u32,
    pub bits_per_sample: u16,
    pub channels: u16,
    pub signed: bool,
    pub big_endian: bool,
}

impl FormatDescriptor {
    /// Little-endian signed integer PCM, the normalized layout of compressed decoders.
    pub fn signed_le(sample_rate_hz: u32, bits_per_sample: u16, channels: u16) -> Self {
        Self {
            sample_rate_hz,
            bits_per_sample,
            channels,
            signed: true,
            big_endian: false,
        }
    }

    /// Bytes per single-channel sample (rounded up to whole bytes).
    pub fn bytes_per_sample(&self) -> usize {
        (self.bits_per_sample as usize).div_ceil(8)
    }

    /// Bytes per interleaved frame (one sample per channel).
    pub fn bytes_per_frame(&self) -> usize {
        self.bytes_per_sample() * self.channels as usize
    }

    pub fn bytes_per_second(&self) -> u64 {
        self.bytes_per_frame() as u64 * self.sample_rate_hz as u64
    }

    /// Duration in seconds of `bytes` worth of PCM in this layout.
    pub fn seconds_for_bytes(&self, bytes: u64) -> f64 {
        let rate = self.bytes_per_second();
        if rate == 0 {
            return 0.0;
        }
        bytes as f64 / rate as f64
    }

    /// Byte offset for `secs`, rounded down to a whole frame.
    pub fn frame_aligned_bytes(&self, secs: f64) -> u64 {
        let frame = self.bytes_per_frame() as u64;
        if frame == 0 || !secs.is_finite() || secs <= 0.0 {
            return 0;
        }
        let raw = (secs * self.bytes_per_second() as f64) as u64;
        raw - raw % frame
    }
}

impl fmt::Display for FormatDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} Hz, {}-bit {}, {} ch, {}",
            self.sample_rate_hz,
            self.bits_per_sample,
            if self.signed { "signed" } else { "unsigned" },
            self.channels,
            if self.big_endian { "BE" } else { "LE" }
        )
    }
}

/// One decoded chunk of PCM.
///
/// `length` may be shorter than the backing storage when a scratch buffer was reused;
/// only `data[..length]` is meaningful. An empty buffer is a legal result of
/// `next_sample()` (stall, seek in progress, end of stream).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SampleBuffer {
    data: Vec<u8>,
    length: usize,
}

impl SampleBuffer {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Wrap `data`, treating all of it as valid PCM.
    pub fn from_vec(data: Vec<u8>) -> Self {
        let length = data.len();
        Self { data, length }
    }

    /// Wrap `data` where only the first `length` bytes are valid.
    ///
    /// `length` is clamped to the storage size so `0 <= length <= capacity` always holds.
    pub fn with_length(data: Vec<u8>, length: usize) -> Self {
        let length = length.min(data.len());
        Self { data, length }
    }

    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Size of the backing storage.
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data[..self.length]
    }

    pub fn into_bytes(mut self) -> Vec<u8> {
        self.data.truncate(self.length);
        self.data
    }

    /// Number of whole frames held for `format`.
    pub fn frames(&self, format: &FormatDescriptor) -> usize {
        let frame = format.bytes_per_frame();
        if frame == 0 { 0 } else { self.length / frame }
    }
}
