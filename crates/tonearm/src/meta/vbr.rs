//! Variable-bit-rate detection and MPEG audio frame header inspection.

use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::types::CodecKind;

/// How far into a file we look for MPEG frames.
const SCAN_LIMIT: u64 = 256 * 1024;
/// Consecutive frames compared when no Xing/VBRI header is present.
const FRAME_SAMPLE: usize = 64;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VbrFlag {
    Yes,
    No,
    Unknown,
}

impl VbrFlag {
    pub fn label(self) -> &'static str {
        match self {
            VbrFlag::Yes => "yes",
            VbrFlag::No => "no",
            VbrFlag::Unknown => "unknown",
        }
    }

    /// VBR flag for codecs that need no header inspection.
    pub fn for_kind(kind: CodecKind) -> Option<Self> {
        match kind {
            CodecKind::Wav | CodecKind::Aiff => Some(VbrFlag::No),
            CodecKind::Flac | CodecKind::Alac | CodecKind::Vorbis | CodecKind::Aac => {
                Some(VbrFlag::Yes)
            }
            CodecKind::Mp3 | CodecKind::Mp2 => None,
            CodecKind::Unsupported | CodecKind::Unknown => Some(VbrFlag::Unknown),
        }
    }
}

impl fmt::Display for VbrFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MpegVersion {
    V1,
    V2,
    V25,
}

/// Decoded 4-byte MPEG audio frame header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameHeader {
    pub version: MpegVersion,
    /// 1, 2 or 3.
    pub layer: u8,
    pub bitrate_index: u8,
    pub bitrate_kbps: u32,
    pub sample_rate: u32,
    pub padding: bool,
    pub mono: bool,
}

const BITRATES_V1: [[u32; 15]; 3] = [
    [0, 32, 64, 96, 128, 160, 192, 224, 256, 288, 320, 352, 384, 416, 448],
    [0, 32, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320, 384],
    [0, 32, 40, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320],
];
const BITRATES_V2: [[u32; 15]; 2] = [
    [0, 32, 48, 56, 64, 80, 96, 112, 128, 144, 160, 176, 192, 224, 256],
    [0, 8, 16, 24, 32, 40, 48, 56, 64, 80, 96, 112, 128, 144, 160],
];

impl FrameHeader {
    /// Parse a frame header; `None` if `bytes` is not a valid, non-free-format header.
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < 4 || bytes[0] != 0xFF || bytes[1] & 0xE0 != 0xE0 {
            return None;
        }
        let version = match (bytes[1] >> 3) & 0x03 {
            0 => MpegVersion::V25,
            2 => MpegVersion::V2,
            3 => MpegVersion::V1,
            _ => return None,
        };
        let layer = match (bytes[1] >> 1) & 0x03 {
            1 => 3,
            2 => 2,
            3 => 1,
            _ => return None,
        };
        let bitrate_index = bytes[2] >> 4;
        if bitrate_index == 0 || bitrate_index == 0x0F {
            return None;
        }
        let rate_index = ((bytes[2] >> 2) & 0x03) as usize;
        if rate_index == 3 {
            return None;
        }
        let base_rates = [44_100, 48_000, 32_000];
        let sample_rate = match version {
            MpegVersion::V1 => base_rates[rate_index],
            MpegVersion::V2 => base_rates[rate_index] / 2,
            MpegVersion::V25 => base_rates[rate_index] / 4,
        };
        let bitrate_kbps = match version {
            MpegVersion::V1 => BITRATES_V1[(layer - 1) as usize][bitrate_index as usize],
            MpegVersion::V2 | MpegVersion::V25 => {
                let row = if layer == 1 { 0 } else { 1 };
                BITRATES_V2[row][bitrate_index as usize]
            }
        };
        Some(Self {
            version,
            layer,
            bitrate_index,
            bitrate_kbps,
            sample_rate,
            padding: (bytes[2] >> 1) & 0x01 == 1,
            mono: bytes[3] >> 6 == 3,
        })
    }

    /// Total frame size in bytes, header included.
    pub fn frame_len(&self) -> usize {
        let br = self.bitrate_kbps as usize * 1000;
        let sr = self.sample_rate as usize;
        let pad = usize::from(self.padding);
        match (self.layer, self.version) {
            (1, _) => (12 * br / sr + pad) * 4,
            (3, MpegVersion::V2 | MpegVersion::V25) => 72 * br / sr + pad,
            _ => 144 * br / sr + pad,
        }
    }

    /// Offset (from the frame start) of a Xing/Info header in a layer III frame.
    fn xing_offset(&self) -> usize {
        let side_info = match (self.version, self.mono) {
            (MpegVersion::V1, false) => 32,
            (MpegVersion::V1, true) => 17,
            (_, false) => 17,
            (_, true) => 9,
        };
        4 + side_info
    }
}

/// Length of a leading ID3v2 tag, zero if there is none.
pub fn id3v2_len(bytes: &[u8]) -> usize {
    if bytes.len() < 10 || &bytes[..3] != b"ID3" {
        return 0;
    }
    let size = bytes[6..10]
        .iter()
        .fold(0usize, |acc, b| (acc << 7) | usize::from(b & 0x7F));
    let footer = if bytes[5] & 0x10 != 0 { 10 } else { 0 };
    10 + size + footer
}

/// First offset at or after `start` holding a frame header whose successor is also valid.
pub fn find_first_frame(bytes: &[u8], start: usize) -> Option<(usize, FrameHeader)> {
    let mut pos = start;
    while pos + 4 <= bytes.len() {
        if let Some(header) = FrameHeader::parse(&bytes[pos..]) {
            let next = pos + header.frame_len();
            let confirmed = match bytes.get(next..next + 4) {
                Some(following) => FrameHeader::parse(following).is_some(),
                // last frame in the buffer
                None => true,
            };
            if confirmed {
                return Some((pos, header));
            }
        }
        pos += 1;
    }
    None
}

/// Inspect an in-memory MPEG audio stream.
pub fn detect_mpeg_vbr_bytes(bytes: &[u8]) -> VbrFlag {
    let start = id3v2_len(bytes);
    let Some((pos, first)) = find_first_frame(bytes, start) else {
        return VbrFlag::Unknown;
    };

    if first.layer == 3 {
        let xing = pos + first.xing_offset();
        match bytes.get(xing..xing + 4) {
            Some(b"Xing") => return VbrFlag::Yes,
            Some(b"Info") => return VbrFlag::No,
            _ => {}
        }
        let vbri = pos + 4 + 32;
        if bytes.get(vbri..vbri + 4) == Some(b"VBRI".as_slice()) {
            return VbrFlag::Yes;
        }
    }

    let mut seen = Vec::with_capacity(FRAME_SAMPLE);
    let mut cursor = pos;
    while seen.len() < FRAME_SAMPLE {
        let Some(header) = bytes.get(cursor..).and_then(FrameHeader::parse) else {
            break;
        };
        seen.push(header.bitrate_index);
        cursor += header.frame_len();
    }
    match seen.as_slice() {
        [] | [_] => VbrFlag::Unknown,
        [first, rest @ ..] if rest.iter().all(|b| b == first) => VbrFlag::No,
        _ => VbrFlag::Yes,
    }
}

/// Inspect the start of an MPEG audio file.
pub fn detect_mpeg_vbr(path: &Path) -> VbrFlag {
    let mut buf = Vec::new();
    match File::open(path) {
        Ok(file) => {
            if file.take(SCAN_LIMIT).read_to_end(&mut buf).is_err() {
                return VbrFlag::Unknown;
            }
        }
        Err(_) => return VbrFlag::Unknown,
    }
    detect_mpeg_vbr_bytes(&buf)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// MPEG-1 layer III, 44.1 kHz, joint stereo, given bitrate index.
    pub(crate) fn frame(bitrate_index: u8, xing: Option<&[u8; 4]>) -> Vec<u8> {
        let header = [0xFF, 0xFB, (bitrate_index << 4), 0x44];
        let parsed = FrameHeader::parse(&header).unwrap();
        let mut out = vec![0u8; parsed.frame_len()];
        out[..4].copy_from_slice(&header);
        if let Some(tag) = xing {
            out[36..40].copy_from_slice(tag);
        }
        out
    }

    #[test]
    fn parses_layer3_header() {
        let h = FrameHeader::parse(&[0xFF, 0xFB, 0x90, 0x44]).unwrap();
        assert_eq!(h.version, MpegVersion::V1);
        assert_eq!(h.layer, 3);
        assert_eq!(h.bitrate_kbps, 128);
        assert_eq!(h.sample_rate, 44_100);
        assert_eq!(h.frame_len(), 417);
    }

    #[test]
    fn rejects_free_format_and_reserved() {
        assert!(FrameHeader::parse(&[0xFF, 0xFB, 0x00, 0x44]).is_none());
        assert!(FrameHeader::parse(&[0xFF, 0xFB, 0xF0, 0x44]).is_none());
        assert!(FrameHeader::parse(&[0xFF, 0xFB, 0x9C, 0x44]).is_none());
        assert!(FrameHeader::parse(&[0xFF, 0xE9, 0x90, 0x44]).is_none());
    }

    #[test]
    fn layer2_frame_length() {
        // MPEG-1 layer II, 192 kbps, 48 kHz
        let h = FrameHeader::parse(&[0xFF, 0xFD, 0xA4, 0x04]).unwrap();
        assert_eq!(h.layer, 2);
        assert_eq!(h.bitrate_kbps, 192);
        assert_eq!(h.sample_rate, 48_000);
        assert_eq!(h.frame_len(), 576);
    }

    #[test]
    fn xing_and_info_headers() {
        let mut vbr = frame(9, Some(b"Xing"));
        vbr.extend(frame(9, None));
        assert_eq!(detect_mpeg_vbr_bytes(&vbr), VbrFlag::Yes);

        let mut cbr = frame(9, Some(b"Info"));
        cbr.extend(frame(9, None));
        assert_eq!(detect_mpeg_vbr_bytes(&cbr), VbrFlag::No);
    }

    #[test]
    fn bitrate_variance_without_header() {
        let mut constant = Vec::new();
        for _ in 0..5 {
            constant.extend(frame(9, None));
        }
        assert_eq!(detect_mpeg_vbr_bytes(&constant), VbrFlag::No);

        let mut varying = Vec::new();
        for idx in [9, 11, 9, 13] {
            varying.extend(frame(idx, None));
        }
        assert_eq!(detect_mpeg_vbr_bytes(&varying), VbrFlag::Yes);
    }

    #[test]
    fn skips_leading_id3_tag() {
        let mut bytes = b"ID3\x04\x00\x00\x00\x00\x00\x05".to_vec();
        bytes.extend([0u8; 5]);
        bytes.extend(frame(9, Some(b"Xing")));
        bytes.extend(frame(9, None));
        assert_eq!(id3v2_len(&bytes), 15);
        assert_eq!(detect_mpeg_vbr_bytes(&bytes), VbrFlag::Yes);
    }

    #[test]
    fn garbage_is_unknown() {
        assert_eq!(detect_mpeg_vbr_bytes(b"not an mpeg stream"), VbrFlag::Unknown);
        assert_eq!(
            detect_mpeg_vbr(Path::new("/nonexistent/tonearm.mp3")),
            VbrFlag::Unknown
        );
    }
}
