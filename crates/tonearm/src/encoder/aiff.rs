//! AIFF output: `FORM`/`AIFF` with `COMM` and `SSND`, big-endian signed PCM.
//!
//! Frame count and chunk sizes are unknown until the source is exhausted, so the header
//! is written with zero sizes and patched in `finish`.

use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};

use anyhow::{Context, Result, bail};

use super::{OptionTable, PcmWriter, TargetCodec, integer_depth};
use crate::iff::f64_to_extended;
use crate::pcm;
use crate::types::{CodecKind, FormatDescriptor};

/// `FORM` header + `COMM` chunk + `SSND` header (offset, block size).
const HEADER_LEN: u64 = 12 + 8 + 18 + 8 + 8;

#[derive(Clone, Debug, Default)]
pub struct AiffCodec;

impl TargetCodec for AiffCodec {
    const KIND: CodecKind = CodecKind::Aiff;

    fn options(&self) -> Option<OptionTable> {
        None
    }

    fn apply_option(&mut self, _name: &str, _label: &str) -> bool {
        false
    }

    fn accept(&mut self, format: &FormatDescriptor) -> Result<()> {
        if format.channels == 0 || format.sample_rate_hz == 0 {
            bail!("cannot write AIFF for {format}");
        }
        Ok(())
    }

    fn sample_bits(&self, format: &FormatDescriptor) -> u16 {
        integer_depth(format)
    }

    fn open_writer(&self, file: File, format: &FormatDescriptor) -> Result<Box<dyn PcmWriter>> {
        let out_format = FormatDescriptor {
            sample_rate_hz: format.sample_rate_hz,
            bits_per_sample: integer_depth(format),
            channels: format.channels,
            signed: true,
            big_endian: true,
        };
        let mut out = BufWriter::new(file);
        write_header(&mut out, &out_format, 0, 0).context("write AIFF header")?;
        Ok(Box::new(AiffWriter {
            out,
            format: out_format,
            data_len: 0,
        }))
    }
}

fn write_header<W: Write>(w: &mut W, format: &FormatDescriptor, frames: u32, data_len: u32) -> std::io::Result<()> {
    let pad = data_len & 1;
    // everything after the FORM size field
    let form_len = (HEADER_LEN as u32 - 8)
        .saturating_add(data_len)
        .saturating_add(pad);
    w.write_all(b"FORM")?;
    w.write_all(&form_len.to_be_bytes())?;
    w.write_all(b"AIFF")?;

    w.write_all(b"COMM")?;
    w.write_all(&18u32.to_be_bytes())?;
    w.write_all(&format.channels.to_be_bytes())?;
    w.write_all(&frames.to_be_bytes())?;
    w.write_all(&format.bits_per_sample.to_be_bytes())?;
    w.write_all(&f64_to_extended(f64::from(format.sample_rate_hz)))?;

    w.write_all(b"SSND")?;
    w.write_all(&data_len.saturating_add(8).to_be_bytes())?;
    w.write_all(&0u32.to_be_bytes())?;
    w.write_all(&0u32.to_be_bytes())?;
    Ok(())
}

struct AiffWriter {
    out: BufWriter<File>,
    format: FormatDescriptor,
    data_len: u64,
}

impl PcmWriter for AiffWriter {
    fn write(&mut self, samples: &[i32]) -> Result<()> {
        let bytes = pcm::from_i32(samples, &self.format);
        self.out.write_all(&bytes).context("write AIFF samples")?;
        self.data_len += bytes.len() as u64;
        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<()> {
        let AiffWriter {
            mut out,
            format,
            data_len,
        } = *self;
        let data_len = u32::try_from(data_len).context("AIFF data exceeds 4 GiB")?;
        if data_len & 1 == 1 {
            out.write_all(&[0])?;
        }
        let frame = format.bytes_per_frame() as u32;
        let frames = if frame == 0 { 0 } else { data_len / frame };
        out.seek(SeekFrom::Start(0))?;
        write_header(&mut out, &format, frames, data_len).context("patch AIFF header")?;
        let file = out.into_inner().map_err(|e| e.into_error())?;
        file.sync_all().context("sync AIFF")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::{self, Decoder};
    use crate::detect::{self, tests::temp_path};
    use crate::diagnostics::Diagnostics;
    use crate::encoder::tests::{tagged_source, write_source_wav};
    use crate::encoder::{AiffEncoder, Encoder};
    use crate::iff;
    use crate::meta::{CanonicalKey, ENCODER_ID};

    #[test]
    fn header_parses_back() {
        let path = temp_path("header.aiff");
        let codec = AiffCodec;
        let format = FormatDescriptor::signed_le(48_000, 16, 2);
        let mut writer = codec.open_writer(File::create(&path).unwrap(), &format).unwrap();
        writer.write(&[1, -1, 256, -256, 0x1234, -0x1234]).unwrap();
        writer.finish().unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(bytes.len() as u64, HEADER_LEN + 12);
        let layout = iff::parse_aiff(&mut std::io::Cursor::new(&bytes)).unwrap();
        assert_eq!(layout.format.sample_rate_hz, 48_000);
        assert_eq!(layout.format.channels, 2);
        assert!(layout.format.big_endian);
        assert_eq!(layout.data_offset, HEADER_LEN);
        assert_eq!(layout.data_len, 12);
        assert_eq!(&bytes[HEADER_LEN as usize..HEADER_LEN as usize + 4], &[0, 1, 0xFF, 0xFF]);
    }

    #[test]
    fn odd_data_is_padded() {
        let path = temp_path("odd.aiff");
        let format = FormatDescriptor::signed_le(8_000, 24, 1);
        let mut writer = AiffCodec.open_writer(File::create(&path).unwrap(), &format).unwrap();
        writer.write(&[1, 2, 3]).unwrap();
        writer.finish().unwrap();
        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(bytes.len() as u64, HEADER_LEN + 10);
        let form_len = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        assert_eq!(u64::from(form_len) + 8, bytes.len() as u64);
        let layout = iff::parse_aiff(&mut std::io::Cursor::new(&bytes)).unwrap();
        assert_eq!(layout.data_len, 9);
    }

    #[test]
    fn wav_to_aiff_round_trip() {
        let src = temp_path("src.wav");
        let samples = write_source_wav(&src, 44_100, 2, 4_410);
        let target = temp_path("out.aiff");

        let mut enc = AiffEncoder::new(AiffCodec, Diagnostics::new());
        enc.set_source(tagged_source(&src));
        assert!(enc.encode_audio(&target), "{:?}", enc.last_error());
        assert_eq!(detect::classify(&target), CodecKind::Aiff);

        let mut out = decoder::load_file(&target, &Diagnostics::new()).unwrap();
        assert!((out.duration() - 0.1).abs() < 1e-9);
        let mut bytes = Vec::new();
        while out.more_samples() {
            bytes.extend_from_slice(out.next_sample().as_bytes());
        }
        let expected: Vec<u8> = samples.iter().flat_map(|s| s.to_be_bytes()).collect();
        assert_eq!(bytes, expected);

        let tags = out.metadata();
        assert_eq!(tags.text(CanonicalKey::Album).as_deref(), Some("Fixtures"));
        assert_eq!(tags.int(CanonicalKey::Year), Some(1999));
        assert_eq!(tags.text(CanonicalKey::Encoder).as_deref(), Some(ENCODER_ID));
    }
}
