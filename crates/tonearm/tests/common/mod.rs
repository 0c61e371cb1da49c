#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use flacenc::component::BitRepr;
use flacenc::error::Verify;
use tonearm::Decoder;

static NEXT_DIR: AtomicUsize = AtomicUsize::new(0);

/// A fresh path in a directory unique to this call.
pub fn temp_path(name: &str) -> PathBuf {
    let seq = NEXT_DIR.fetch_add(1, Ordering::Relaxed);
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    let dir = std::env::temp_dir().join(format!("tonearm-it-{}-{nanos}-{seq}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    dir.join(name)
}

/// Interleaved test signal: a different sawtooth per channel.
pub fn signal(channels: u16, frames: usize) -> Vec<i16> {
    let mut out = Vec::with_capacity(frames * usize::from(channels));
    for i in 0..frames {
        for ch in 0..usize::from(channels) {
            out.push((((i * 31 + ch * 7) % 3000) as i32 - 1500) as i16 * 4);
        }
    }
    out
}

pub fn write_wav(path: &Path, rate: u32, channels: u16, frames: usize) -> Vec<i16> {
    let spec = hound::WavSpec {
        channels,
        sample_rate: rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let samples = signal(channels, frames);
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    for s in &samples {
        writer.write_sample(*s).unwrap();
    }
    writer.finalize().unwrap();
    samples
}

pub fn write_flac(path: &Path, rate: usize, channels: u16, frames: usize) -> Vec<i16> {
    let samples = signal(channels, frames);
    let wide: Vec<i32> = samples.iter().map(|s| i32::from(*s)).collect();
    let config = flacenc::config::Encoder::default().into_verified().unwrap();
    let source = flacenc::source::MemSource::from_samples(&wide, usize::from(channels), 16, rate);
    let stream =
        flacenc::encode_with_fixed_block_size(&config, source, config.block_size).unwrap();
    let mut sink = flacenc::bitsink::ByteSink::new();
    let _ = stream.write(&mut sink);
    std::fs::write(path, sink.as_slice()).unwrap();
    samples
}

pub fn drain(dec: &mut dyn Decoder) -> Vec<u8> {
    let mut out = Vec::new();
    while dec.more_samples() {
        out.extend_from_slice(dec.next_sample().as_bytes());
    }
    out
}

pub fn le_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

pub fn be_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_be_bytes()).collect()
}

/// Path of an optional fixture under `tests/fixtures`, `None` when it is not checked in.
pub fn fixture(name: &str) -> Option<PathBuf> {
    let path = Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name);
    path.exists().then_some(path)
}
