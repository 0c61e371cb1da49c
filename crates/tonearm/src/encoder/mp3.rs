//! MPEG-1/2 Layer III output through LAME (constant bit rate).

use std::fs::File;
use std::io::{BufWriter, Write};

use anyhow::{Context, Result, anyhow, bail};
use mp3lame_encoder::{Bitrate, Builder, FlushNoGap, InterleavedPcm, MonoPcm, Quality};

use super::{OptionTable, PcmWriter, TargetCodec};
use crate::types::{CodecKind, FormatDescriptor};

pub const BITRATE_OPTION: &str = "Bitrate";
pub const QUALITY_OPTION: &str = "Quality";

const BITRATES_KBPS: [u32; 6] = [96, 128, 160, 192, 256, 320];
const QUALITIES: [&str; 4] = ["Best", "High", "Standard", "Fast"];

/// Sample rates LAME accepts for MPEG-1, 2 and 2.5.
const SAMPLE_RATES: [u32; 9] = [8_000, 11_025, 12_000, 16_000, 22_050, 24_000, 32_000, 44_100, 48_000];

/// Encoder delay plus one granule of look-ahead held inside LAME.
const LAME_BUFFERED_FRAMES: u64 = 1_152 + 576;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Mp3Settings {
    pub bitrate_kbps: u32,
    /// Index into the quality labels, `0` is best.
    pub quality: usize,
}

impl Default for Mp3Settings {
    fn default() -> Self {
        Self {
            bitrate_kbps: 192,
            quality: 1,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct Mp3Codec {
    settings: Mp3Settings,
}

impl Mp3Codec {
    pub fn new(settings: Mp3Settings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> Mp3Settings {
        self.settings
    }
}

fn lame_bitrate(kbps: u32) -> Bitrate {
    match kbps {
        96 => Bitrate::Kbps96,
        128 => Bitrate::Kbps128,
        160 => Bitrate::Kbps160,
        256 => Bitrate::Kbps256,
        320 => Bitrate::Kbps320,
        _ => Bitrate::Kbps192,
    }
}

fn lame_quality(index: usize) -> Quality {
    match index {
        0 => Quality::Best,
        1 => Quality::NearBest,
        2 => Quality::Good,
        _ => Quality::Ok,
    }
}

impl TargetCodec for Mp3Codec {
    const KIND: CodecKind = CodecKind::Mp3;

    fn options(&self) -> Option<OptionTable> {
        let mut table = OptionTable::new();
        table.insert(
            BITRATE_OPTION.to_string(),
            BITRATES_KBPS.iter().map(|k| format!("{k} kbps")).collect(),
        );
        table.insert(
            QUALITY_OPTION.to_string(),
            QUALITIES.iter().map(|q| q.to_string()).collect(),
        );
        Some(table)
    }

    fn apply_option(&mut self, name: &str, label: &str) -> bool {
        match name {
            BITRATE_OPTION => {
                let digits = label.trim().trim_end_matches("kbps").trim();
                match digits.parse::<u32>() {
                    Ok(kbps) if BITRATES_KBPS.contains(&kbps) => {
                        self.settings.bitrate_kbps = kbps;
                        true
                    }
                    _ => false,
                }
            }
            QUALITY_OPTION => match QUALITIES.iter().position(|q| q.eq_ignore_ascii_case(label.trim())) {
                Some(index) => {
                    self.settings.quality = index;
                    true
                }
                None => false,
            },
            _ => false,
        }
    }

    fn accept(&mut self, format: &FormatDescriptor) -> Result<()> {
        if !(1..=2).contains(&format.channels) {
            bail!("MP3 holds mono or stereo, source has {} channels", format.channels);
        }
        if !SAMPLE_RATES.contains(&format.sample_rate_hz) {
            bail!("MP3 cannot carry {} Hz audio", format.sample_rate_hz);
        }
        Ok(())
    }

    fn sample_bits(&self, _format: &FormatDescriptor) -> u16 {
        16
    }

    fn open_writer(&self, file: File, format: &FormatDescriptor) -> Result<Box<dyn PcmWriter>> {
        let mut builder = Builder::new().ok_or_else(|| anyhow!("LAME initialization failed"))?;
        builder
            .set_num_channels(format.channels as u8)
            .map_err(|e| anyhow!("LAME channels: {e:?}"))?;
        builder
            .set_sample_rate(format.sample_rate_hz)
            .map_err(|e| anyhow!("LAME sample rate: {e:?}"))?;
        builder
            .set_brate(lame_bitrate(self.settings.bitrate_kbps))
            .map_err(|e| anyhow!("LAME bit rate: {e:?}"))?;
        builder
            .set_quality(lame_quality(self.settings.quality))
            .map_err(|e| anyhow!("LAME quality: {e:?}"))?;
        let lame = builder.build().map_err(|e| anyhow!("LAME setup: {e:?}"))?;
        tracing::debug!(
            bitrate_kbps = self.settings.bitrate_kbps,
            quality = QUALITIES[self.settings.quality.min(QUALITIES.len() - 1)],
            "LAME encoder ready"
        );
        Ok(Box::new(Mp3Writer {
            lame,
            out: BufWriter::new(file),
            channels: usize::from(format.channels),
            pcm: Vec::new(),
            scratch: Vec::new(),
            frames_in: 0,
        }))
    }
}

struct Mp3Writer {
    lame: mp3lame_encoder::Encoder,
    out: BufWriter<File>,
    channels: usize,
    pcm: Vec<i16>,
    scratch: Vec<u8>,
    frames_in: u64,
}

impl PcmWriter for Mp3Writer {
    fn write(&mut self, samples: &[i32]) -> Result<()> {
        self.pcm.clear();
        self.pcm
            .extend(samples.iter().map(|s| (*s).clamp(i16::MIN.into(), i16::MAX.into()) as i16));
        let frames = self.pcm.len() / self.channels;
        if frames == 0 {
            return Ok(());
        }

        self.scratch.clear();
        self.scratch
            .reserve(mp3lame_encoder::max_required_buffer_size(frames));
        if self.channels == 1 {
            self.lame.encode_to_vec(MonoPcm(&self.pcm), &mut self.scratch)
        } else {
            self.lame
                .encode_to_vec(InterleavedPcm(&self.pcm), &mut self.scratch)
        }
        .map_err(|e| anyhow!("LAME encode: {e:?}"))?;
        self.out.write_all(&self.scratch).context("write MP3 frames")?;
        self.frames_in += frames as u64;
        Ok(())
    }

    fn buffered_frames(&self) -> u64 {
        self.frames_in.min(LAME_BUFFERED_FRAMES)
    }

    fn finish(self: Box<Self>) -> Result<()> {
        let Mp3Writer {
            mut lame,
            mut out,
            mut scratch,
            ..
        } = *self;
        scratch.clear();
        scratch.reserve(mp3lame_encoder::max_required_buffer_size(LAME_BUFFERED_FRAMES as usize));
        lame.flush_to_vec::<FlushNoGap>(&mut scratch)
            .map_err(|e| anyhow!("LAME flush: {e:?}"))?;
        out.write_all(&scratch).context("write MP3 tail")?;
        out.flush().context("flush MP3")?;
        Ok(())
    }
}
