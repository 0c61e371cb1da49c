//! Output device lookup and stream config selection over CPAL.

use std::cmp::Ordering;

use anyhow::{Context, Result, anyhow};
use cpal::traits::{DeviceTrait, HostTrait};

/// Upper bound for a fixed device buffer, in frames.
const MAX_BUFFER_FRAMES: u32 = 16_384;

/// Output device as shown by `--list-devices`.
#[derive(Clone, Debug)]
pub struct DeviceInfo {
    pub index: usize,
    pub name: String,
    pub min_rate: u32,
    pub max_rate: u32,
    pub is_default: bool,
}

fn device_name(device: &cpal::Device) -> Option<String> {
    device.description().ok().map(|d| d.name().to_string())
}

/// Case-insensitive substring match; a blank needle matches nothing.
fn name_matches(name: &str, needle: &str) -> bool {
    let needle = needle.trim().to_lowercase();
    !needle.is_empty() && name.to_lowercase().contains(&needle)
}

/// The first output device whose name contains `needle`, or the host default.
pub fn pick_device(host: &cpal::Host, needle: Option<&str>) -> Result<cpal::Device> {
    let Some(needle) = needle else {
        return host
            .default_output_device()
            .ok_or_else(|| anyhow!("host has no default output device"));
    };
    host.output_devices()
        .context("enumerate output devices")?
        .find(|d| device_name(d).is_some_and(|n| name_matches(&n, needle)))
        .ok_or_else(|| anyhow!("no output device name contains {needle:?}"))
}

/// One usable rate/format pair of a device, ranked against a source rate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Candidate {
    rate: u32,
    /// Lower is richer.
    format_rank: u8,
}

impl Candidate {
    /// Rank for a `source_rate` track: rates at or below the source beat rates above
    /// it, nearer rates beat farther ones, then the richer format wins.
    fn cmp_for(&self, other: &Self, source_rate: u32) -> Ordering {
        let key = |c: &Self| {
            let above = c.rate > source_rate;
            (above, c.rate.abs_diff(source_rate), c.format_rank)
        };
        key(self).cmp(&key(other))
    }
}

fn format_rank(format: cpal::SampleFormat) -> u8 {
    match format {
        cpal::SampleFormat::F32 => 0,
        cpal::SampleFormat::I32 => 1,
        cpal::SampleFormat::I16 => 2,
        cpal::SampleFormat::U16 => 3,
        _ => 10,
    }
}

/// The supported config that plays a `source_rate` track with the least conversion.
pub fn pick_output_config(
    device: &cpal::Device,
    source_rate: u32,
) -> Result<cpal::SupportedStreamConfig> {
    let mut best: Option<(Candidate, cpal::SupportedStreamConfig)> = None;
    for range in device
        .supported_output_configs()
        .context("query output configs")?
    {
        let min = range.min_sample_rate();
        let candidate = Candidate {
            rate: source_rate.clamp(min, range.max_sample_rate().max(min)),
            format_rank: format_rank(range.sample_format()),
        };
        let better = best
            .as_ref()
            .is_none_or(|(b, _)| candidate.cmp_for(b, source_rate) == Ordering::Less);
        if better {
            best = Some((candidate, range.with_sample_rate(candidate.rate)));
        }
    }
    best.map(|(_, cfg)| cfg)
        .ok_or_else(|| anyhow!("device reports no output configs"))
}

/// A fixed buffer size when the device gives a range, capped at [`MAX_BUFFER_FRAMES`].
pub fn pick_buffer_size(config: &cpal::SupportedStreamConfig) -> Option<cpal::BufferSize> {
    match config.buffer_size() {
        cpal::SupportedBufferSize::Range { min, max } => {
            Some(cpal::BufferSize::Fixed((*max).min(MAX_BUFFER_FRAMES).max(*min)))
        }
        cpal::SupportedBufferSize::Unknown => None,
    }
}

/// Effective resolution of a device sample format in bits.
pub fn sample_format_bits(format: cpal::SampleFormat) -> u16 {
    match format {
        cpal::SampleFormat::I8 | cpal::SampleFormat::U8 => 8,
        cpal::SampleFormat::I16 | cpal::SampleFormat::U16 => 16,
        // f32 carries a 24-bit mantissa
        cpal::SampleFormat::F32 => 24,
        _ => 32,
    }
}

fn rate_span(device: &cpal::Device) -> Option<(u32, u32)> {
    let span = device
        .supported_output_configs()
        .ok()?
        .fold(None, |acc: Option<(u32, u32)>, r| {
            let (lo, hi) = (r.min_sample_rate(), r.max_sample_rate());
            Some(acc.map_or((lo, hi), |(a, b)| (a.min(lo), b.max(hi))))
        });
    span.or_else(|| {
        let rate = device.default_output_config().ok()?.sample_rate();
        Some((rate, rate))
    })
}

/// Every output device with a usable rate, in host order.
pub fn list_device_infos(host: &cpal::Host) -> Result<Vec<DeviceInfo>> {
    let default_name = host.default_output_device().as_ref().and_then(device_name);
    let mut out = Vec::new();
    for (index, device) in host
        .output_devices()
        .context("enumerate output devices")?
        .enumerate()
    {
        let Some(name) = device_name(&device) else {
            tracing::debug!(index, "skipping device without a name");
            continue;
        };
        let Some((min_rate, max_rate)) = rate_span(&device) else {
            tracing::warn!(device = %name, "skipping device with no usable sample rate");
            continue;
        };
        out.push(DeviceInfo {
            index,
            is_default: default_name.as_ref() == Some(&name),
            name,
            min_rate,
            max_rate,
        });
    }
    Ok(out)
}
