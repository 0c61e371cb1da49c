//! RIFF/WAVE and IFF/AIFF chunk parsing.
//!
//! Only what the PCM decoder needs: the sample layout and where the sample data lives.
//! Compressed or floating-point payloads are rejected here, which makes `prepare()` fail
//! loudly on a file that claims to be PCM but isn't.

use std::io::{Read, Seek, SeekFrom};

use anyhow::{Context, Result, anyhow, bail};

use crate::types::FormatDescriptor;

const WAVE_FORMAT_PCM: u16 = 0x0001;
const WAVE_FORMAT_IEEE_FLOAT: u16 = 0x0003;
const WAVE_FORMAT_EXTENSIBLE: u16 = 0xFFFE;

/// Sample layout and data location of an uncompressed PCM file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PcmLayout {
    pub format: FormatDescriptor,
    /// Absolute offset of the first sample byte.
    pub data_offset: u64,
    /// Length of the sample data in bytes, trimmed to whole frames.
    pub data_len: u64,
}

fn read_array<const N: usize, R: Read>(r: &mut R) -> Result<[u8; N]> {
    let mut buf = [0u8; N];
    r.read_exact(&mut buf).context("truncated header")?;
    Ok(buf)
}

fn trim_to_frames(len: u64, format: &FormatDescriptor) -> u64 {
    let frame = format.bytes_per_frame() as u64;
    if frame == 0 { 0 } else { len - len % frame }
}

/// Parse a RIFF/WAVE header, leaving the reader position unspecified.
pub fn parse_wav<R: Read + Seek>(r: &mut R) -> Result<PcmLayout> {
    let file_len = r.seek(SeekFrom::End(0))?;
    r.seek(SeekFrom::Start(0))?;

    let riff: [u8; 12] = read_array(r)?;
    if &riff[..4] != b"RIFF" || &riff[8..12] != b"WAVE" {
        bail!("not a RIFF/WAVE file");
    }

    let mut format = None;
    let mut pos = 12u64;
    while pos + 8 <= file_len {
        r.seek(SeekFrom::Start(pos))?;
        let head: [u8; 8] = read_array(r)?;
        let id = [head[0], head[1], head[2], head[3]];
        let size = u64::from(u32::from_le_bytes([head[4], head[5], head[6], head[7]]));
        let body = pos + 8;

        match &id {
            b"fmt " => {
                if size < 16 {
                    bail!("fmt chunk too short ({size} bytes)");
                }
                let fmt: [u8; 16] = read_array(r)?;
                let mut tag = u16::from_le_bytes([fmt[0], fmt[1]]);
                let channels = u16::from_le_bytes([fmt[2], fmt[3]]);
                let sample_rate = u32::from_le_bytes([fmt[4], fmt[5], fmt[6], fmt[7]]);
                let block_align = u16::from_le_bytes([fmt[12], fmt[13]]);
                let bits = u16::from_le_bytes([fmt[14], fmt[15]]);
                if tag == WAVE_FORMAT_EXTENSIBLE {
                    if size < 40 {
                        bail!("extensible fmt chunk too short ({size} bytes)");
                    }
                    // cbSize, valid bits, channel mask, then the subformat GUID
                    let _ext: [u8; 8] = read_array(r)?;
                    let guid: [u8; 2] = read_array(r)?;
                    tag = u16::from_le_bytes(guid);
                }
                match tag {
                    WAVE_FORMAT_PCM => {}
                    WAVE_FORMAT_IEEE_FLOAT => bail!("floating-point WAV is not supported"),
                    other => bail!("unsupported WAV format tag 0x{other:04x}"),
                }
                if channels == 0 || sample_rate == 0 || bits == 0 {
                    bail!("invalid WAV format: {channels} ch, {sample_rate} Hz, {bits} bits");
                }
                let container_bytes = if block_align >= channels && block_align % channels == 0 {
                    block_align / channels
                } else {
                    bits.div_ceil(8)
                };
                if container_bytes == 0 || container_bytes > 4 {
                    bail!("unsupported WAV sample width ({container_bytes} bytes)");
                }
                let container_bits = container_bytes * 8;
                format = Some(FormatDescriptor {
                    sample_rate_hz: sample_rate,
                    bits_per_sample: container_bits,
                    channels,
                    signed: container_bits > 8,
                    big_endian: false,
                });
            }
            b"data" => {
                let format = format.ok_or_else(|| anyhow!("data chunk before fmt chunk"))?;
                let available = file_len.saturating_sub(body);
                let len = if size == u64::from(u32::MAX) {
                    available
                } else {
                    size.min(available)
                };
                return Ok(PcmLayout {
                    format,
                    data_offset: body,
                    data_len: trim_to_frames(len, &format),
                });
            }
            _ => {}
        }
        pos = body + size + (size & 1);
    }
    bail!("no data chunk")
}

/// Decode an 80-bit IEEE 754 extended float (AIFF sample rate field).
pub fn extended_to_f64(bytes: &[u8; 10]) -> f64 {
    let negative = bytes[0] & 0x80 != 0;
    let exponent = (i32::from(bytes[0] & 0x7F) << 8) | i32::from(bytes[1]);
    let mut mantissa_bytes = [0u8; 8];
    mantissa_bytes.copy_from_slice(&bytes[2..10]);
    let mantissa = u64::from_be_bytes(mantissa_bytes);
    if exponent == 0 && mantissa == 0 {
        return 0.0;
    }
    let value = mantissa as f64 * 2f64.powi(exponent - 16383 - 63);
    if negative { -value } else { value }
}

/// Encode a non-negative value as an 80-bit IEEE 754 extended float.
pub fn f64_to_extended(value: f64) -> [u8; 10] {
    let mut out = [0u8; 10];
    if !(value.is_finite() && value > 0.0) {
        return out;
    }
    let mut exponent = 16383 + 63;
    let mut mantissa = value;
    while mantissa < (1u64 << 63) as f64 {
        mantissa *= 2.0;
        exponent -= 1;
    }
    while mantissa >= 18_446_744_073_709_551_616.0 {
        mantissa /= 2.0;
        exponent += 1;
    }
    let exp = (exponent as u16).to_be_bytes();
    out[0] = exp[0] & 0x7F;
    out[1] = exp[1];
    out[2..10].copy_from_slice(&(mantissa as u64).to_be_bytes());
    out
}

/// Parse an IFF/AIFF (or AIFC with `NONE`/`twos`/`sowt`) header.
pub fn parse_aiff<R: Read + Seek>(r: &mut R) -> Result<PcmLayout> {
    let file_len = r.seek(SeekFrom::End(0))?;
    r.seek(SeekFrom::Start(0))?;

    let form: [u8; 12] = read_array(r)?;
    if &form[..4] != b"FORM" {
        bail!("not an IFF file");
    }
    let aifc = match &form[8..12] {
        b"AIFF" => false,
        b"AIFC" => true,
        other => bail!("unsupported IFF form {:?}", String::from_utf8_lossy(other)),
    };

    let mut format = None;
    let mut pos = 12u64;
    while pos + 8 <= file_len {
        r.seek(SeekFrom::Start(pos))?;
        let head: [u8; 8] = read_array(r)?;
        let id = [head[0], head[1], head[2], head[3]];
        let size = u64::from(u32::from_be_bytes([head[4], head[5], head[6], head[7]]));
        let body = pos + 8;

        match &id {
            b"COMM" => {
                let comm: [u8; 18] = read_array(r)?;
                let channels = u16::from_be_bytes([comm[0], comm[1]]);
                let sample_size = u16::from_be_bytes([comm[6], comm[7]]);
                let mut rate = [0u8; 10];
                rate.copy_from_slice(&comm[8..18]);
                let sample_rate = extended_to_f64(&rate).round() as u32;
                let mut big_endian = true;
                if aifc {
                    let compression: [u8; 4] = read_array(r)?;
                    match &compression {
                        b"NONE" | b"twos" => {}
                        b"sowt" => big_endian = false,
                        other => bail!(
                            "unsupported AIFC compression {:?}",
                            String::from_utf8_lossy(other)
                        ),
                    }
                }
                if channels == 0 || sample_rate == 0 || sample_size == 0 || sample_size > 32 {
                    bail!("invalid AIFF format: {channels} ch, {sample_rate} Hz, {sample_size} bits");
                }
                format = Some(FormatDescriptor {
                    sample_rate_hz: sample_rate,
                    bits_per_sample: sample_size.div_ceil(8) * 8,
                    channels,
                    signed: true,
                    big_endian,
                });
            }
            b"SSND" => {
                let format = format.ok_or_else(|| anyhow!("SSND chunk before COMM chunk"))?;
                let ssnd: [u8; 8] = read_array(r)?;
                let offset = u64::from(u32::from_be_bytes([ssnd[0], ssnd[1], ssnd[2], ssnd[3]]));
                let data_offset = body + 8 + offset;
                let declared = size.saturating_sub(8 + offset);
                let available = file_len.saturating_sub(data_offset);
                return Ok(PcmLayout {
                    format,
                    data_offset,
                    data_len: trim_to_frames(declared.min(available), &format),
                });
            }
            _ => {}
        }
        pos = body + size + (size & 1);
    }
    bail!("no SSND chunk")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn wav_bytes(tag: u16, channels: u16, rate: u32, bits: u16, data: &[u8]) -> Vec<u8> {
        let block_align = channels * bits.div_ceil(8);
        let mut out = b"RIFF".to_vec();
        out.extend_from_slice(&(36 + data.len() as u32).to_le_bytes());
        out.extend_from_slice(b"WAVEfmt ");
        out.extend_from_slice(&16u32.to_le_bytes());
        out.extend_from_slice(&tag.to_le_bytes());
        out.extend_from_slice(&channels.to_le_bytes());
        out.extend_from_slice(&rate.to_le_bytes());
        out.extend_from_slice(&(rate * u32::from(block_align)).to_le_bytes());
        out.extend_from_slice(&block_align.to_le_bytes());
        out.extend_from_slice(&bits.to_le_bytes());
        out.extend_from_slice(b"data");
        out.extend_from_slice(&(data.len() as u32).to_le_bytes());
        out.extend_from_slice(data);
        out
    }

    #[test]
    fn parses_plain_wav() {
        let bytes = wav_bytes(1, 2, 44_100, 16, &[0u8; 16]);
        let layout = parse_wav(&mut Cursor::new(bytes)).unwrap();
        assert_eq!(layout.format, FormatDescriptor::signed_le(44_100, 16, 2));
        assert_eq!(layout.data_offset, 44);
        assert_eq!(layout.data_len, 16);
    }

    #[test]
    fn eight_bit_wav_is_unsigned() {
        let bytes = wav_bytes(1, 1, 8_000, 8, &[128u8; 5]);
        let layout = parse_wav(&mut Cursor::new(bytes)).unwrap();
        assert!(!layout.format.signed);
        assert_eq!(layout.data_len, 5);
    }

    #[test]
    fn truncated_data_is_trimmed_to_frames() {
        let mut bytes = wav_bytes(1, 2, 44_100, 16, &[0u8; 16]);
        bytes.truncate(bytes.len() - 3);
        let layout = parse_wav(&mut Cursor::new(bytes)).unwrap();
        assert_eq!(layout.data_len, 12);
    }

    #[test]
    fn rejects_float_and_garbage() {
        let float = wav_bytes(3, 2, 44_100, 32, &[0u8; 8]);
        assert!(parse_wav(&mut Cursor::new(float)).is_err());
        assert!(parse_wav(&mut Cursor::new(b"RIFX....WAVE".to_vec())).is_err());
        assert!(parse_wav(&mut Cursor::new(Vec::new())).is_err());
        assert!(parse_aiff(&mut Cursor::new(b"FORM\0\0\0\0WAVE".to_vec())).is_err());
    }

    #[test]
    fn extended_float_roundtrip() {
        for rate in [8_000.0, 22_050.0, 44_100.0, 48_000.0, 96_000.0, 192_000.0] {
            let ext = f64_to_extended(rate);
            assert_eq!(extended_to_f64(&ext), rate);
        }
        // 44100 Hz as written by common tools
        let known = [0x40, 0x0E, 0xAC, 0x44, 0, 0, 0, 0, 0, 0];
        assert_eq!(extended_to_f64(&known), 44_100.0);
        assert_eq!(f64_to_extended(44_100.0), known);
    }

    #[test]
    fn parses_aifc_sowt() {
        let mut comm = Vec::new();
        comm.extend_from_slice(&2u16.to_be_bytes());
        comm.extend_from_slice(&2u32.to_be_bytes());
        comm.extend_from_slice(&16u16.to_be_bytes());
        comm.extend_from_slice(&f64_to_extended(48_000.0));
        comm.extend_from_slice(b"sowt");
        comm.extend_from_slice(&[0, 0]);

        let mut out = b"FORM".to_vec();
        out.extend_from_slice(&0u32.to_be_bytes());
        out.extend_from_slice(b"AIFCCOMM");
        out.extend_from_slice(&(comm.len() as u32).to_be_bytes());
        out.extend_from_slice(&comm);
        out.extend_from_slice(b"SSND");
        out.extend_from_slice(&(8u32 + 8).to_be_bytes());
        out.extend_from_slice(&[0u8; 8]);
        out.extend_from_slice(&[1, 0, 2, 0, 3, 0, 4, 0]);

        let layout = parse_aiff(&mut Cursor::new(out)).unwrap();
        assert!(!layout.format.big_endian);
        assert_eq!(layout.format.sample_rate_hz, 48_000);
        assert_eq!(layout.data_len, 8);
    }
}
