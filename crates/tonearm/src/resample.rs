//! Rate conversion between the track and the output device.
//!
//! A [`ResampleStage`] wraps a Rubato sinc resampler working on fixed-size input
//! chunks. [`spawn_resampler`] runs one on a thread between two [`SampleQueue`]s.

use std::sync::Arc;
use std::thread;

use anyhow::{Context, Result, anyhow};
use audioadapter_buffers::direct::InterleavedSlice;
use rubato::{
    Async, FixedAsync, Indexing, Resampler, SincInterpolationParameters, SincInterpolationType,
    WindowFunction, calculate_cutoff,
};

use crate::queue::SampleQueue;

const SINC_LEN: usize = 128;
const OVERSAMPLING: usize = 256;
/// Headroom for ratio changes; the ratio stays fixed here.
const MAX_RATIO_RELATIVE: f64 = 1.1;

#[derive(Clone, Copy, Debug)]
pub struct ResampleConfig {
    /// Input frames per resampler call.
    pub chunk_frames: usize,
    /// Output queue length in seconds.
    pub buffer_seconds: f32,
}

pub struct ResampleStage {
    resampler: Async<f32>,
    channels: usize,
    chunk_frames: usize,
    scratch: Vec<f32>,
}

impl ResampleStage {
    pub fn new(src_rate: u32, dst_rate: u32, channels: usize, chunk_frames: usize) -> Result<Self> {
        let ratio = dst_rate as f64 / src_rate.max(1) as f64;
        let chunk_frames = chunk_frames.max(1);
        let window = WindowFunction::BlackmanHarris2;
        let params = SincInterpolationParameters {
            sinc_len: SINC_LEN,
            f_cutoff: calculate_cutoff(SINC_LEN, window),
            interpolation: SincInterpolationType::Cubic,
            oversampling_factor: OVERSAMPLING,
            window,
        };
        let resampler = Async::<f32>::new_sinc(
            ratio,
            MAX_RATIO_RELATIVE,
            &params,
            chunk_frames,
            channels,
            FixedAsync::Input,
        )
        .map_err(|e| anyhow!("create resampler {src_rate} Hz -> {dst_rate} Hz: {e}"))?;
        let max_out = resampler.output_frames_max();
        Ok(Self {
            resampler,
            channels,
            chunk_frames,
            scratch: vec![0.0; max_out * channels],
        })
    }

    pub fn chunk_frames(&self) -> usize {
        self.chunk_frames
    }

    /// Resample exactly one chunk of interleaved input.
    pub fn process_chunk(&mut self, input: &[f32]) -> Result<&[f32]> {
        self.run(input, None)
    }

    /// Resample a final chunk holding fewer than `chunk_frames` frames.
    pub fn process_tail(&mut self, tail: &[f32]) -> Result<&[f32]> {
        let frames = tail.len() / self.channels;
        let mut padded = tail.to_vec();
        padded.resize(self.chunk_frames * self.channels, 0.0);
        self.run(&padded, Some(frames))
    }

    fn run(&mut self, input: &[f32], partial: Option<usize>) -> Result<&[f32]> {
        let channels = self.channels;
        let input = InterleavedSlice::new(input, channels, input.len() / channels)
            .map_err(|e| anyhow!("input layout: {e}"))?;
        let out_frames = self.scratch.len() / channels;
        let mut output = InterleavedSlice::new_mut(&mut self.scratch, channels, out_frames)
            .map_err(|e| anyhow!("output layout: {e}"))?;
        let indexing = Indexing {
            input_offset: 0,
            output_offset: 0,
            active_channels_mask: None,
            partial_len: partial,
        };
        let (_, produced) = self
            .resampler
            .process_into_buffer(&input, &mut output, Some(&indexing))
            .map_err(|e| anyhow!("resample: {e}"))?;
        Ok(&self.scratch[..produced * channels])
    }
}

/// Resample everything arriving on `input` into a new queue at `dst_rate`.
///
/// The returned queue is closed once `input` is closed and drained, or on error.
pub fn spawn_resampler(
    input: Arc<SampleQueue>,
    src_rate: u32,
    dst_rate: u32,
    cfg: ResampleConfig,
) -> Result<Arc<SampleQueue>> {
    let channels = input.channels();
    let mut stage = ResampleStage::new(src_rate, dst_rate, channels, cfg.chunk_frames)?;
    let output = Arc::new(SampleQueue::with_duration(channels, dst_rate, cfg.buffer_seconds));

    let out = output.clone();
    thread::Builder::new()
        .name("resample".to_string())
        .spawn(move || {
            if let Err(e) = pump(&mut stage, &input, &out) {
                tracing::error!(error = %format!("{e:#}"), src_rate, dst_rate, "resampler stopped");
            } else {
                tracing::debug!(src_rate, dst_rate, "resampler finished");
            }
            out.close();
        })
        .context("spawn resampler thread")?;
    Ok(output)
}

fn pump(stage: &mut ResampleStage, input: &SampleQueue, output: &SampleQueue) -> Result<()> {
    let chunk = stage.chunk_frames();
    while let Some(block) = input.take_exact(chunk) {
        if !output.push(stage.process_chunk(&block)?) {
            return Ok(());
        }
    }
    while let Some(tail) = input.take_up_to(chunk) {
        if !output.push(stage.process_tail(&tail)?) {
            return Ok(());
        }
    }
    Ok(())
}
