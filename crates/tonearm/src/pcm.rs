//! Conversions between raw PCM bytes (as described by a [`FormatDescriptor`]) and samples.
//!
//! Decoders hand out bytes; the output sink wants `f32`, encoders want `i32`.

use crate::types::FormatDescriptor;

/// Read one integer sample of `width` bytes, returning it left-justified to the
/// declared bit depth as a signed value.
fn read_int(bytes: &[u8], format: &FormatDescriptor) -> i32 {
    let width = bytes.len();
    let mut raw: u32 = 0;
    if format.big_endian {
        for b in bytes {
            raw = (raw << 8) | u32::from(*b);
        }
    } else {
        for b in bytes.iter().rev() {
            raw = (raw << 8) | u32::from(*b);
        }
    }
    let bits = (width * 8) as u32;
    if !format.signed {
        let offset = 1i64 << (bits - 1);
        return (raw as i64 - offset) as i32;
    }
    // sign-extend
    let shift = 32 - bits;
    ((raw << shift) as i32) >> shift
}

/// Decode interleaved integer PCM into `i32` samples at the container bit depth.
///
/// Trailing bytes that do not form a whole sample are ignored.
pub fn to_i32(bytes: &[u8], format: &FormatDescriptor) -> Vec<i32> {
    let width = format.bytes_per_sample();
    if width == 0 || width > 4 {
        return Vec::new();
    }
    bytes
        .chunks_exact(width)
        .map(|chunk| read_int(chunk, format))
        .collect()
}

/// Decode interleaved integer PCM into `f32` samples in `[-1.0, 1.0)`.
pub fn to_f32(bytes: &[u8], format: &FormatDescriptor) -> Vec<f32> {
    let width = format.bytes_per_sample();
    if width == 0 || width > 4 {
        return Vec::new();
    }
    let scale = (1u64 << (width * 8 - 1)) as f32;
    bytes
        .chunks_exact(width)
        .map(|chunk| read_int(chunk, format) as f32 / scale)
        .collect()
}

/// Rescale `i32` samples from `from_bits` to `to_bits` (both container depths).
pub fn rescale(samples: &mut [i32], from_bits: u16, to_bits: u16) {
    if from_bits == to_bits {
        return;
    }
    if from_bits > to_bits {
        let shift = u32::from(from_bits - to_bits);
        for s in samples.iter_mut() {
            *s >>= shift;
        }
    } else {
        let shift = u32::from(to_bits - from_bits);
        for s in samples.iter_mut() {
            *s = s.wrapping_shl(shift);
        }
    }
}

/// Encode `i32` samples (already at the container depth) into bytes for `format`.
pub fn from_i32(samples: &[i32], format: &FormatDescriptor) -> Vec<u8> {
    let width = format.bytes_per_sample();
    let mut out = Vec::with_capacity(samples.len() * width);
    let offset: i64 = if format.signed || width == 0 {
        0
    } else {
        1i64 << (width * 8 - 1)
    };
    for s in samples {
        let raw = (i64::from(*s) + offset) as u32;
        let le = raw.to_le_bytes();
        if format.big_endian {
            out.extend(le[..width].iter().rev());
        } else {
            out.extend_from_slice(&le[..width]);
        }
    }
    out
}

/// Linear gain factor for a decibel offset.
pub fn db_to_gain(db: f32) -> f32 {
    10f32.powf(db / 20.0)
}

/// Apply `gain` to raw PCM bytes, saturating at the format's integer range.
pub fn scale_bytes(bytes: &[u8], format: &FormatDescriptor, gain: f32) -> Vec<u8> {
    let width = format.bytes_per_sample();
    if width == 0 || width > 4 || (gain - 1.0).abs() < f32::EPSILON {
        return bytes.to_vec();
    }
    let max = ((1i64 << (width * 8 - 1)) - 1) as f64;
    let min = -(max + 1.0);
    let mut samples = to_i32(bytes, format);
    for s in samples.iter_mut() {
        *s = (f64::from(*s) * f64::from(gain)).round().clamp(min, max) as i32;
    }
    from_i32(&samples, format)
}
