//! Bounded queue of interleaved `f32` frames feeding the CPAL sink.
//!
//! Producers: the engine's stream thread (through `SinkStream::write`) and, when the
//! device rate differs from the track, the resampler thread. Consumer: the device
//! callback, which never blocks.
//!
//! The queue only ever holds whole frames. `close()` marks the end of a track so the
//! consumer side can tell "drained" from "starved"; `clear()` drops everything after a
//! seek.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// Buffer length used when the configured one is unusable.
const FALLBACK_SECONDS: f32 = 2.0;

/// Poll interval of [`SampleQueue::wait_drained`] so a cancel is noticed promptly.
const DRAIN_POLL: Duration = Duration::from_millis(50);

/// Minimum spacing between "running low" log lines.
const LOW_LOG_INTERVAL: Duration = Duration::from_secs(1);

pub struct SampleQueue {
    channels: usize,
    capacity_frames: usize,
    state: Mutex<QueueState>,
    /// Signalled on every push, pop, clear and close.
    changed: Condvar,
}

struct QueueState {
    samples: VecDeque<f32>,
    closed: bool,
    last_low_log: Option<Instant>,
}

impl QueueState {
    fn frames(&self, channels: usize) -> usize {
        self.samples.len() / channels
    }
}

/// Frames needed to hold `seconds` of audio at `rate_hz`.
pub fn frames_for_seconds(rate_hz: u32, seconds: f32) -> usize {
    let secs = if seconds.is_finite() && seconds > 0.0 {
        seconds
    } else {
        FALLBACK_SECONDS
    };
    (rate_hz as f32 * secs).ceil() as usize
}

impl SampleQueue {
    pub fn new(channels: usize, capacity_frames: usize) -> Self {
        Self {
            channels: channels.max(1),
            capacity_frames: capacity_frames.max(1),
            state: Mutex::new(QueueState {
                samples: VecDeque::new(),
                closed: false,
                last_low_log: None,
            }),
            changed: Condvar::new(),
        }
    }

    /// Queue sized for `seconds` of `channels`-channel audio at `rate_hz`.
    pub fn with_duration(channels: usize, rate_hz: u32, seconds: f32) -> Self {
        Self::new(channels, frames_for_seconds(rate_hz, seconds))
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn capacity_frames(&self) -> usize {
        self.capacity_frames
    }

    /// Frames currently buffered (snapshot).
    pub fn buffered_frames(&self) -> usize {
        self.state.lock().unwrap().frames(self.channels)
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }

    /// Closed and nothing left to hand out.
    pub fn is_drained(&self) -> bool {
        let st = self.state.lock().unwrap();
        st.closed && st.samples.len() < self.channels
    }

    /// No more input for this track. Idempotent.
    pub fn close(&self) {
        self.state.lock().unwrap().closed = true;
        self.changed.notify_all();
    }

    /// Drop everything buffered and return the number of frames dropped.
    pub fn clear(&self) -> usize {
        let mut st = self.state.lock().unwrap();
        let dropped = st.frames(self.channels);
        st.samples.clear();
        drop(st);
        self.changed.notify_all();
        dropped
    }

    /// Append interleaved samples, blocking while the queue is full.
    ///
    /// A trailing partial frame is dropped. Returns `false` if the queue was closed
    /// before everything was accepted.
    pub fn push(&self, samples: &[f32]) -> bool {
        let whole = samples.len() - samples.len() % self.channels;
        let mut rest = &samples[..whole];
        let capacity = self.capacity_frames * self.channels;

        while !rest.is_empty() {
            let mut st = self.state.lock().unwrap();
            while st.samples.len() >= capacity && !st.closed {
                st = self.changed.wait(st).unwrap();
            }
            if st.closed {
                return false;
            }
            let room = (capacity - st.samples.len()) / self.channels * self.channels;
            let take = room.max(self.channels).min(rest.len());
            st.samples.extend(rest[..take].iter().copied());
            rest = &rest[take..];
            drop(st);
            self.changed.notify_all();
        }
        true
    }

    /// Block until `frames` whole frames are available and take them.
    ///
    /// `None` once the queue is closed with fewer than `frames` left; those stay queued
    /// for [`SampleQueue::take_up_to`].
    pub fn take_exact(&self, frames: usize) -> Option<Vec<f32>> {
        let mut st = self.state.lock().unwrap();
        while st.frames(self.channels) < frames && !st.closed {
            st = self.changed.wait(st).unwrap();
        }
        if st.frames(self.channels) < frames {
            return None;
        }
        Some(self.take_locked(st, frames))
    }

    /// Block until at least one frame is available, then take up to `max_frames`.
    ///
    /// `None` once the queue is closed and drained.
    pub fn take_up_to(&self, max_frames: usize) -> Option<Vec<f32>> {
        let mut st = self.state.lock().unwrap();
        while st.frames(self.channels) == 0 && !st.closed {
            st = self.changed.wait(st).unwrap();
        }
        let frames = st.frames(self.channels).min(max_frames);
        if frames == 0 {
            return None;
        }
        Some(self.take_locked(st, frames))
    }

    /// Take up to `max_frames` without waiting. `None` when nothing is buffered.
    pub fn try_take(&self, max_frames: usize) -> Option<Vec<f32>> {
        let st = self.state.lock().unwrap();
        let frames = st.frames(self.channels).min(max_frames);
        if frames == 0 {
            return None;
        }
        Some(self.take_locked(st, frames))
    }

    fn take_locked(&self, mut st: std::sync::MutexGuard<'_, QueueState>, frames: usize) -> Vec<f32> {
        let out: Vec<f32> = st.samples.drain(..frames * self.channels).collect();
        self.note_level(&mut st);
        drop(st);
        self.changed.notify_all();
        out
    }

    /// Log (at most once a second) when a still-open queue runs low.
    fn note_level(&self, st: &mut QueueState) {
        let buffered = st.frames(self.channels);
        let threshold = (self.capacity_frames / 8).max(16);
        if st.closed || buffered == 0 || buffered >= threshold {
            return;
        }
        let now = Instant::now();
        if st
            .last_low_log
            .is_some_and(|t| now.duration_since(t) < LOW_LOG_INTERVAL)
        {
            return;
        }
        st.last_low_log = Some(now);
        tracing::info!(
            buffered_frames = buffered,
            threshold_frames = threshold,
            "audio queue running low"
        );
    }

    /// Block until the queue is closed and drained, or `cancel` is raised.
    ///
    /// Returns `true` if it drained.
    pub fn wait_drained(&self, cancel: &AtomicBool) -> bool {
        let mut st = self.state.lock().unwrap();
        loop {
            if cancel.load(Ordering::Relaxed) {
                return false;
            }
            if st.closed && st.samples.len() < self.channels {
                return true;
            }
            st = self.changed.wait_timeout(st, DRAIN_POLL).unwrap().0;
        }
    }
}
