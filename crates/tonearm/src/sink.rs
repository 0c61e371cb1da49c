//! Output sink contract and the headless [`NullSink`].
//!
//! An [`OutputSink`] is a factory shared with the engine; the stream it opens lives on
//! the engine's stream thread for one track, so implementations may hold
//! thread-bound handles (a CPAL stream is not `Send`).

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;

use crate::types::{FormatDescriptor, SampleBuffer};

/// What the sink negotiated for the current track.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SinkReport {
    pub device: String,
    pub source_rate: u32,
    pub device_rate: u32,
    pub device_bits: u16,
    pub resampled: bool,
    /// Output is audibly worse than the source (resampled or fewer bits).
    pub quality_degraded: bool,
}

pub trait OutputSink: Send + Sync {
    /// Open a stream for one track. Called on the thread that will drive it.
    fn open(&self, format: &FormatDescriptor) -> Result<Box<dyn SinkStream>>;
}

pub trait SinkStream {
    /// Queue PCM for playback, blocking while the device buffer is full.
    fn write(&mut self, buf: &SampleBuffer) -> Result<()>;

    fn pause(&mut self);

    fn resume(&mut self);

    /// Drop queued audio (after a seek).
    fn flush(&mut self);

    /// Play out whatever is queued. Returns early when `cancel` is raised.
    fn drain(&mut self, cancel: &AtomicBool);

    fn stop(&mut self);

    fn report(&self) -> SinkReport;
}

/// Counters shared between a [`NullSink`] and the streams it opens.
#[derive(Clone, Debug, Default)]
pub struct NullSinkStats {
    bytes: Arc<AtomicU64>,
    opened: Arc<AtomicU64>,
    flushes: Arc<AtomicU64>,
    paused: Arc<AtomicBool>,
}

impl NullSinkStats {
    pub fn bytes_written(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }

    pub fn streams_opened(&self) -> u64 {
        self.opened.load(Ordering::Relaxed)
    }

    pub fn flushes(&self) -> u64 {
        self.flushes.load(Ordering::Relaxed)
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Relaxed)
    }
}

/// Discards audio, either as fast as it is written or at real-time pace.
#[derive(Clone, Debug, Default)]
pub struct NullSink {
    realtime: bool,
    stats: NullSinkStats,
}

impl NullSink {
    /// A sink that accepts audio instantly.
    pub fn instant() -> Self {
        Self::default()
    }

    /// A sink that sleeps for the duration of each write.
    pub fn realtime() -> Self {
        Self {
            realtime: true,
            stats: NullSinkStats::default(),
        }
    }

    pub fn stats(&self) -> NullSinkStats {
        self.stats.clone()
    }
}

impl OutputSink for NullSink {
    fn open(&self, format: &FormatDescriptor) -> Result<Box<dyn SinkStream>> {
        self.stats.opened.fetch_add(1, Ordering::Relaxed);
        self.stats.paused.store(false, Ordering::Relaxed);
        Ok(Box::new(NullStream {
            format: *format,
            realtime: self.realtime,
            stats: self.stats.clone(),
            // audio "in the device" that a drain would wait for
            queued_until: Instant::now(),
        }))
    }
}

struct NullStream {
    format: FormatDescriptor,
    realtime: bool,
    stats: NullSinkStats,
    queued_until: Instant,
}

impl SinkStream for NullStream {
    fn write(&mut self, buf: &SampleBuffer) -> Result<()> {
        self.stats.bytes.fetch_add(buf.len() as u64, Ordering::Relaxed);
        if self.realtime && !buf.is_empty() {
            let secs = self.format.seconds_for_bytes(buf.len() as u64);
            let now = Instant::now();
            let start = self.queued_until.max(now);
            self.queued_until = start + Duration::from_secs_f64(secs);
            // keep at most one write's worth ahead of the clock
            if let Some(ahead) = start.checked_duration_since(now) {
                thread::sleep(ahead);
            }
        }
        Ok(())
    }

    fn pause(&mut self) {
        self.stats.paused.store(true, Ordering::Relaxed);
    }

    fn resume(&mut self) {
        self.stats.paused.store(false, Ordering::Relaxed);
        self.queued_until = Instant::now();
    }

    fn flush(&mut self) {
        self.stats.flushes.fetch_add(1, Ordering::Relaxed);
        self.queued_until = Instant::now();
    }

    fn drain(&mut self, cancel: &AtomicBool) {
        while Instant::now() < self.queued_until {
            if cancel.load(Ordering::Relaxed) {
                return;
            }
            thread::sleep(Duration::from_millis(5).min(self.queued_until.saturating_duration_since(Instant::now())));
        }
    }

    fn stop(&mut self) {
        self.queued_until = Instant::now();
    }

    fn report(&self) -> SinkReport {
        SinkReport {
            device: "null".to_string(),
            source_rate: self.format.sample_rate_hz,
            device_rate: self.format.sample_rate_hz,
            device_bits: self.format.bits_per_sample,
            resampled: false,
            quality_degraded: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instant_sink_counts_bytes() {
        let sink = NullSink::instant();
        let stats = sink.stats();
        let fmt = FormatDescriptor::signed_le(8_000, 16, 1);
        let mut stream = sink.open(&fmt).unwrap();
        stream.write(&SampleBuffer::from_vec(vec![0; 1600])).unwrap();
        stream.write(&SampleBuffer::empty()).unwrap();
        assert_eq!(stats.bytes_written(), 1600);
        assert_eq!(stats.streams_opened(), 1);
        assert!(!stream.report().quality_degraded);
    }

    #[test]
    fn realtime_sink_paces_writes() {
        let sink = NullSink::realtime();
        let fmt = FormatDescriptor::signed_le(8_000, 16, 1);
        let mut stream = sink.open(&fmt).unwrap();
        let started = Instant::now();
        // 3 x 50 ms; the first write returns immediately, the drain covers the last
        for _ in 0..3 {
            stream.write(&SampleBuffer::from_vec(vec![0; 800])).unwrap();
        }
        stream.drain(&AtomicBool::new(false));
        assert!(started.elapsed() >= Duration::from_millis(140));
    }

    #[test]
    fn drain_is_cancellable_and_pause_is_visible() {
        let sink = NullSink::realtime();
        let stats = sink.stats();
        let fmt = FormatDescriptor::signed_le(8_000, 16, 1);
        let mut stream = sink.open(&fmt).unwrap();
        stream.write(&SampleBuffer::from_vec(vec![0; 16_000])).unwrap();
        let started = Instant::now();
        stream.drain(&AtomicBool::new(true));
        assert!(started.elapsed() < Duration::from_millis(500));
        stream.pause();
        assert!(stats.is_paused());
        stream.resume();
        assert!(!stats.is_paused());
        stream.flush();
        assert_eq!(stats.flushes(), 1);
    }
}
