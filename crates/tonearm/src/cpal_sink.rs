//! [`OutputSink`] backed by a CPAL device.
//!
//! Per track: pick the device and the config nearest the source rate, convert PCM bytes
//! to `f32`, resample with rubato when the rates differ, and feed the callback through a
//! bounded [`SampleQueue`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result, bail};
use cpal::traits::{DeviceTrait, StreamTrait};

use crate::config::EngineConfig;
use crate::device::{pick_buffer_size, pick_device, pick_output_config, sample_format_bits};
use crate::output::{OutputControl, build_output_stream};
use crate::pcm;
use crate::queue::SampleQueue;
use crate::resample::{ResampleConfig, spawn_resampler};
use crate::sink::{OutputSink, SinkReport, SinkStream};
use crate::types::{FormatDescriptor, SampleBuffer};

pub struct CpalSink {
    /// Substring of the device name; `None` picks the host default.
    device: Option<String>,
    config: EngineConfig,
}

impl CpalSink {
    pub fn new(device: Option<String>, config: EngineConfig) -> Self {
        Self { device, config }
    }
}

impl OutputSink for CpalSink {
    fn open(&self, format: &FormatDescriptor) -> Result<Box<dyn SinkStream>> {
        let host = cpal::default_host();
        let device = pick_device(&host, self.device.as_deref())?;
        let device_name = device
            .description()
            .map(|d| d.name().to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        let supported = pick_output_config(&device, format.sample_rate_hz)
            .with_context(|| format!("no usable config on {device_name}"))?;
        let sample_format = supported.sample_format();
        let mut stream_config: cpal::StreamConfig = supported.config();
        if let Some(size) = pick_buffer_size(&supported) {
            stream_config.buffer_size = size;
        }

        let channels = usize::from(format.channels.max(1));
        let buffer_seconds = self.config.effective_buffer_seconds();
        let srcq = Arc::new(SampleQueue::with_duration(
            channels,
            format.sample_rate_hz,
            buffer_seconds,
        ));

        let device_rate = stream_config.sample_rate;
        let resampled = device_rate != format.sample_rate_hz;
        let playq = if resampled {
            spawn_resampler(
                srcq.clone(),
                format.sample_rate_hz,
                device_rate,
                ResampleConfig {
                    chunk_frames: self.config.chunk_frames,
                    buffer_seconds,
                },
            )?
        } else {
            srcq.clone()
        };

        let control = OutputControl {
            refill_max_frames: self.config.refill_max_frames,
            ..OutputControl::default()
        };
        let stream = build_output_stream(&device, &stream_config, sample_format, &playq, control.clone())?;
        stream.play().context("start output stream")?;

        let device_bits = sample_format_bits(sample_format);
        let report = SinkReport {
            device: device_name,
            source_rate: format.sample_rate_hz,
            device_rate,
            device_bits,
            resampled,
            quality_degraded: resampled || device_bits < format.bits_per_sample,
        };
        tracing::info!(
            device = %report.device,
            source_rate = report.source_rate,
            device_rate = report.device_rate,
            sample_format = ?sample_format,
            channels = stream_config.channels,
            resampled,
            "output stream opened"
        );

        Ok(Box::new(CpalStream {
            stream,
            srcq,
            playq,
            control,
            format: *format,
            report,
        }))
    }
}

/// Convert `buf` to `f32` and queue it; a queue closed under the writer is an error.
fn queue_samples(queue: &SampleQueue, buf: &SampleBuffer, format: &FormatDescriptor) -> Result<()> {
    if buf.is_empty() {
        return Ok(());
    }
    let samples = pcm::to_f32(buf.as_bytes(), format);
    if !queue.push(&samples) {
        bail!("output queue closed, {} frames dropped", samples.len() / queue.channels());
    }
    Ok(())
}

struct CpalStream {
    stream: cpal::Stream,
    srcq: Arc<SampleQueue>,
    playq: Arc<SampleQueue>,
    control: OutputControl,
    format: FormatDescriptor,
    report: SinkReport,
}

impl SinkStream for CpalStream {
    fn write(&mut self, buf: &SampleBuffer) -> Result<()> {
        queue_samples(&self.srcq, buf, &self.format)
    }

    fn pause(&mut self) {
        self.control.paused.store(true, Ordering::Relaxed);
    }

    fn resume(&mut self) {
        self.control.paused.store(false, Ordering::Relaxed);
    }

    fn flush(&mut self) {
        let dropped = self.srcq.clear() + if self.report.resampled { self.playq.clear() } else { 0 };
        tracing::debug!(dropped_frames = dropped, "output flushed");
    }

    fn drain(&mut self, cancel: &AtomicBool) {
        self.srcq.close();
        if self.playq.wait_drained(cancel) {
            tracing::debug!(
                played_frames = self.control.played_frames.load(Ordering::Relaxed),
                underruns = self.control.underrun_events.load(Ordering::Relaxed),
                "output drained"
            );
        }
    }

    fn stop(&mut self) {
        self.control.paused.store(true, Ordering::Relaxed);
        self.srcq.close();
        self.playq.close();
        if let Err(e) = self.stream.pause() {
            tracing::debug!(error = %e, "pause output stream");
        }
    }

    fn report(&self) -> SinkReport {
        self.report.clone()
    }
}
