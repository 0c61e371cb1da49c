//! CPAL output stream and its real-time callback.
//!
//! The callback never blocks: it takes what the queue has, plays silence for the rest,
//! and plays only silence while paused (leaving the queue untouched).

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Result, anyhow};
use cpal::traits::DeviceTrait;

use crate::queue::SampleQueue;

/// Shared knobs and counters of one output stream.
#[derive(Clone, Debug, Default)]
pub struct OutputControl {
    /// Max frames pulled from the queue per refill.
    pub refill_max_frames: usize,
    pub paused: Arc<AtomicBool>,
    /// Frames handed to the device.
    pub played_frames: Arc<AtomicU64>,
    /// Callbacks that ran dry while the track was still open.
    pub underrun_events: Arc<AtomicU64>,
}

/// How source channels land on device channels.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ChannelMap {
    Direct,
    /// Every device channel gets the single source channel.
    Spread,
    /// Average of the first two source channels.
    Downmix,
    /// Device channel `n` takes source channel `min(n, last)`.
    Clamp,
}

impl ChannelMap {
    fn new(src: usize, dst: usize) -> Self {
        match (src, dst) {
            (s, d) if s == d => Self::Direct,
            (1, _) => Self::Spread,
            (2, 1) => Self::Downmix,
            _ => Self::Clamp,
        }
    }

    fn sample(self, frame: &[f32], dst_ch: usize) -> f32 {
        match self {
            Self::Direct => frame[dst_ch],
            Self::Spread => frame[0],
            Self::Downmix => 0.5 * (frame[0] + frame[1]),
            Self::Clamp => frame[dst_ch.min(frame.len() - 1)],
        }
    }
}

/// Frames already taken from the queue but not yet played.
struct Pending {
    samples: Vec<f32>,
    cursor: usize,
    src_channels: usize,
}

impl Pending {
    fn next_frame(&mut self) -> Option<&[f32]> {
        let end = self.cursor + self.src_channels;
        if end > self.samples.len() {
            return None;
        }
        let frame = &self.samples[self.cursor..end];
        self.cursor = end;
        Some(frame)
    }

    fn refill(&mut self, queue: &SampleQueue, max_frames: usize) -> bool {
        match queue.try_take(max_frames) {
            Some(samples) => {
                self.samples = samples;
                self.cursor = 0;
                true
            }
            None => false,
        }
    }
}

/// Fill `out` (device-interleaved) from `pending`, refilling from `queue` as needed.
///
/// Returns the number of frames filled with audio; the rest is left to the caller.
fn render<T: Copy>(
    out: &mut [T],
    dst_channels: usize,
    map: ChannelMap,
    pending: &mut Pending,
    queue: &SampleQueue,
    max_frames: usize,
    convert: impl Fn(f32) -> T,
) -> usize {
    let mut filled = 0;
    for dst in out.chunks_exact_mut(dst_channels) {
        if pending.cursor >= pending.samples.len() && !pending.refill(queue, max_frames) {
            break;
        }
        let Some(frame) = pending.next_frame() else {
            break;
        };
        for (ch, slot) in dst.iter_mut().enumerate() {
            *slot = convert(map.sample(frame, ch));
        }
        filled += 1;
    }
    filled
}

/// Build a CPAL output stream playing interleaved `f32` audio from `queue`.
///
/// `queue` must already be at the device sample rate.
pub fn build_output_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    queue: &Arc<SampleQueue>,
    control: OutputControl,
) -> Result<cpal::Stream> {
    match sample_format {
        cpal::SampleFormat::F32 => build_stream::<f32>(device, config, queue, control),
        cpal::SampleFormat::I16 => build_stream::<i16>(device, config, queue, control),
        cpal::SampleFormat::I32 => build_stream::<i32>(device, config, queue, control),
        cpal::SampleFormat::U16 => build_stream::<u16>(device, config, queue, control),
        other => Err(anyhow!("unsupported device sample format {other:?}")),
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    queue: &Arc<SampleQueue>,
    control: OutputControl,
) -> Result<cpal::Stream>
where
    T: cpal::Sample + cpal::SizedSample + cpal::FromSample<f32> + Send + 'static,
{
    let dst_channels = usize::from(config.channels.max(1));
    let map = ChannelMap::new(queue.channels(), dst_channels);
    let pending = Mutex::new(Pending {
        samples: Vec::new(),
        cursor: 0,
        src_channels: queue.channels(),
    });
    let max_frames = control.refill_max_frames.max(1);
    let queue = queue.clone();
    let silence = <T as cpal::Sample>::from_sample::<f32>(0.0);

    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _| {
            if control.paused.load(Ordering::Relaxed) {
                data.fill(silence);
                return;
            }
            let mut pending = pending.lock().unwrap();
            let filled = render(
                data,
                dst_channels,
                map,
                &mut pending,
                &queue,
                max_frames,
                <T as cpal::Sample>::from_sample::<f32>,
            );
            data[filled * dst_channels..].fill(silence);
            if filled * dst_channels < data.len() && !queue.is_closed() {
                control.underrun_events.fetch_add(1, Ordering::Relaxed);
            }
            control.played_frames.fetch_add(filled as u64, Ordering::Relaxed);
        },
        |err| tracing::warn!(error = %err, "output stream error"),
        None,
    )?;
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn play(src: &[f32], src_channels: usize, dst_channels: usize, out_frames: usize) -> (Vec<f32>, usize) {
        let queue = SampleQueue::new(src_channels, 1024);
        queue.push(src);
        let mut pending = Pending {
            samples: Vec::new(),
            cursor: 0,
            src_channels,
        };
        let mut out = vec![9.0f32; out_frames * dst_channels];
        let map = ChannelMap::new(src_channels, dst_channels);
        let filled = render(&mut out, dst_channels, map, &mut pending, &queue, 2, |s| s);
        (out, filled)
    }

    #[test]
    fn mono_is_spread_to_stereo() {
        let (out, filled) = play(&[0.1, 0.2], 1, 2, 2);
        assert_eq!(filled, 2);
        assert_eq!(out, vec![0.1, 0.1, 0.2, 0.2]);
    }

    #[test]
    fn stereo_is_downmixed_to_mono() {
        let (out, _) = play(&[0.25, 0.75, -1.0, 1.0], 2, 1, 2);
        assert_eq!(out, vec![0.5, 0.0]);
    }

    #[test]
    fn surround_is_clamped_to_stereo() {
        let (out, _) = play(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], 6, 2, 1);
        assert_eq!(out, vec![1.0, 2.0]);
    }

    #[test]
    fn stereo_to_quad_repeats_the_last_channel() {
        let (out, _) = play(&[1.0, 2.0], 2, 4, 1);
        assert_eq!(out, vec![1.0, 2.0, 2.0, 2.0]);
    }

    #[test]
    fn refills_across_small_batches_and_stops_when_dry() {
        let (out, filled) = play(&[1.0, 2.0, 3.0, 4.0, 5.0], 1, 1, 8);
        assert_eq!(filled, 5);
        assert_eq!(&out[..5], &[1.0, 2.0, 3.0, 4.0, 5.0]);
        assert_eq!(out[5], 9.0);
    }
}
