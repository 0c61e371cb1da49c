//! Playback engine: drives one decoder against an output sink on a dedicated thread.
//!
//! States: `Idle -> Loaded -> Playing <-> Paused -> Finished`.
//!
//! ## Threading
//! - `play()` from `Loaded` moves the decoder into a stream thread that owns it (and the
//!   sink stream) until the track ends or is stopped.
//! - Control (`pause`, `play`, `seek`, `stop`) goes through a mutex-guarded
//!   [`ControlState`] plus a condvar. The stream thread checks it before every write and
//!   sleeps on the condvar while paused; no sample is written while a seek is pending or
//!   the engine is paused.
//! - The track-finished callback runs on a notifier thread that joins the stream thread
//!   first (see [`crate::notify`]).

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow, bail};

use crate::config::EngineConfig;
use crate::decoder::{self, Decoder, DecoderState};
use crate::diagnostics::Diagnostics;
use crate::notify::{self, WorkerExit};
use crate::pcm;
use crate::sink::{OutputSink, SinkReport, SinkStream};
use crate::types::{CodecKind, FormatDescriptor, SampleBuffer};

const COMPONENT: &str = "playback";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    Loaded,
    Playing,
    Paused,
    Finished,
}

/// One-shot notifications from the engine. All methods default to no-ops.
pub trait PlaybackListener: Send + Sync {
    fn on_track_finished(&self, _path: &Path) {}

    /// Replay gain is enabled but the track carries no loudness tag.
    fn on_loudness_unavailable(&self, _path: &Path) {}

    /// The device cannot reproduce the source as-is (resampling or fewer bits).
    fn on_quality_degraded(&self, _report: &SinkReport) {}

    /// The file could not be decoded or the sink could not be opened.
    fn on_cannot_play(&self, _path: &Path, _reason: &str) {}
}

/// Listener that ignores every notification.
pub struct NoopListener;

impl PlaybackListener for NoopListener {}

/// Snapshot of the engine for status displays.
#[derive(Clone, Debug)]
pub struct PlaybackStatus {
    pub state: PlaybackState,
    pub path: Option<PathBuf>,
    pub kind: Option<CodecKind>,
    pub format: Option<FormatDescriptor>,
    pub position_secs: f64,
    pub duration_secs: f64,
    pub sink: Option<SinkReport>,
}

struct ControlState {
    state: PlaybackState,
    path: Option<PathBuf>,
    kind: Option<CodecKind>,
    format: Option<FormatDescriptor>,
    duration: f64,
    position: f64,
    paused: bool,
    run: bool,
    /// The stream thread still owns the decoder.
    attached: bool,
    seek_seq: u64,
    seek_request: Option<(u64, f64)>,
    seek_applied: u64,
    seek_error: Option<String>,
    sink: Option<SinkReport>,
}

impl ControlState {
    fn idle() -> Self {
        Self {
            state: PlaybackState::Idle,
            path: None,
            kind: None,
            format: None,
            duration: 0.0,
            position: 0.0,
            paused: false,
            run: false,
            attached: false,
            seek_seq: 0,
            seek_request: None,
            seek_applied: 0,
            seek_error: None,
            sink: None,
        }
    }
}

/// Control block shared with one stream thread. Replaced on every load, so a stream
/// thread that outlives a stop timeout never touches the next track's state.
struct Shared {
    control: Mutex<ControlState>,
    cv: Condvar,
    /// Raised by `stop()`; cancels a sink drain.
    cancel: AtomicBool,
}

impl Shared {
    fn new(control: ControlState) -> Arc<Self> {
        Arc::new(Self {
            control: Mutex::new(control),
            cv: Condvar::new(),
            cancel: AtomicBool::new(false),
        })
    }

    fn lock(&self) -> MutexGuard<'_, ControlState> {
        self.control.lock().unwrap()
    }
}

/// How a stream thread ended.
#[derive(Debug, PartialEq)]
enum StreamEnd {
    Finished,
    Stopped,
    Failed(String),
}

pub struct PlaybackEngine {
    sink: Arc<dyn OutputSink>,
    config: EngineConfig,
    listener: Arc<dyn PlaybackListener>,
    diag: Diagnostics,
    shared: Arc<Shared>,
    /// Decoder bound by `load_*` and not yet handed to a stream thread.
    pending: Option<Box<dyn Decoder>>,
}

impl PlaybackEngine {
    pub fn new(
        sink: Arc<dyn OutputSink>,
        config: EngineConfig,
        listener: Arc<dyn PlaybackListener>,
        diag: Diagnostics,
    ) -> Self {
        Self {
            sink,
            config,
            listener,
            diag,
            shared: Shared::new(ControlState::idle()),
            pending: None,
        }
    }

    /// Classify and open `path`, then bind it like [`PlaybackEngine::load_audio`].
    pub fn load_file(&mut self, path: &Path) -> Result<()> {
        match decoder::load_file(path, &self.diag) {
            Some(dec) => self.load_audio(dec),
            None => {
                let reason = "unsupported or unreadable file";
                self.listener.on_cannot_play(path, reason);
                bail!("{}: {reason}", path.display())
            }
        }
    }

    /// Bind `decoder`, tearing down whatever was bound before.
    ///
    /// An unprepared decoder is prepared here; a closed one is rejected. Loading over a
    /// playing or paused track stops it without a finish notification.
    pub fn load_audio(&mut self, mut decoder: Box<dyn Decoder>) -> Result<()> {
        self.teardown();

        match decoder.state() {
            DecoderState::Unprepared => decoder
                .prepare()
                .with_context(|| format!("prepare {}", decoder.path().display()))?,
            DecoderState::Ready => {}
            DecoderState::Closed => bail!("{}: decoder already closed", decoder.path().display()),
        }
        decoder.set_chunk_frames(self.config.decode_chunk_frames);

        let mut control = ControlState::idle();
        control.state = PlaybackState::Loaded;
        control.path = Some(decoder.path().to_path_buf());
        control.kind = Some(decoder.kind());
        control.format = decoder.format();
        control.duration = decoder.duration();
        control.position = decoder.current_time().max(0.0);
        self.shared = Shared::new(control);

        tracing::info!(
            path = %decoder.path().display(),
            kind = %decoder.kind(),
            duration_secs = decoder.duration(),
            "track loaded"
        );
        self.pending = Some(decoder);
        Ok(())
    }

    /// Start (from `Loaded`) or resume (from `Paused`) playback.
    pub fn play(&mut self) -> Result<()> {
        match self.state() {
            PlaybackState::Loaded => self.start_stream(),
            PlaybackState::Paused => {
                let mut c = self.shared.lock();
                c.paused = false;
                c.state = PlaybackState::Playing;
                drop(c);
                self.shared.cv.notify_all();
                Ok(())
            }
            PlaybackState::Playing => Ok(()),
            other => bail!("play requires a loaded track (state {other:?})"),
        }
    }

    pub fn pause(&mut self) -> Result<()> {
        let mut c = self.shared.lock();
        match c.state {
            PlaybackState::Playing => {
                c.paused = true;
                c.state = PlaybackState::Paused;
                drop(c);
                self.shared.cv.notify_all();
                Ok(())
            }
            PlaybackState::Paused => Ok(()),
            other => bail!("pause requires playback (state {other:?})"),
        }
    }

    /// Seek the bound decoder to `target_secs`.
    ///
    /// While streaming, waits until the stream thread applied the request, so
    /// `current_time()` afterwards reflects the new position.
    pub fn seek(&mut self, target_secs: f64) -> Result<()> {
        if let Some(dec) = self.pending.as_mut() {
            dec.seek(target_secs)?;
            let landed = dec.current_time().max(0.0);
            self.shared.lock().position = landed;
            return Ok(());
        }

        let shared = self.shared.clone();
        let mut c = shared.lock();
        if !matches!(c.state, PlaybackState::Playing | PlaybackState::Paused) {
            bail!("seek requires playback (state {:?})", c.state);
        }
        c.seek_seq += 1;
        let id = c.seek_seq;
        c.seek_request = Some((id, target_secs));
        c.seek_error = None;
        shared.cv.notify_all();

        let deadline = Instant::now() + self.config.control_timeout;
        while c.seek_applied < id && c.attached {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                bail!("seek to {target_secs:.3}s timed out");
            }
            c = shared.cv.wait_timeout(c, remaining).unwrap().0;
        }
        if c.seek_applied < id {
            bail!("track ended before the seek was applied");
        }
        match c.seek_error.take() {
            Some(err) => Err(anyhow!("seek to {target_secs:.3}s: {err}")),
            None => Ok(()),
        }
    }

    /// Stop playback and release the decoder and sink. The engine returns to `Idle`.
    pub fn stop(&mut self) {
        self.teardown();
    }

    pub fn state(&self) -> PlaybackState {
        self.shared.lock().state
    }

    /// Seconds into the current track (decode position).
    pub fn current_time(&self) -> f64 {
        self.shared.lock().position
    }

    pub fn duration(&self) -> f64 {
        self.shared.lock().duration
    }

    pub fn status(&self) -> PlaybackStatus {
        let c = self.shared.lock();
        PlaybackStatus {
            state: c.state,
            path: c.path.clone(),
            kind: c.kind,
            format: c.format,
            position_secs: c.position,
            duration_secs: c.duration,
            sink: c.sink.clone(),
        }
    }

    /// Block until the track finishes, playback stops, or `timeout` passes.
    ///
    /// Returns `true` if the engine is no longer playing.
    pub fn wait_until_finished(&self, timeout: Duration) -> bool {
        let shared = self.shared.clone();
        let deadline = Instant::now() + timeout;
        let mut c = shared.lock();
        while matches!(c.state, PlaybackState::Playing | PlaybackState::Paused) {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            c = shared.cv.wait_timeout(c, remaining).unwrap().0;
        }
        true
    }

    fn start_stream(&mut self) -> Result<()> {
        let decoder = self
            .pending
            .take()
            .ok_or_else(|| anyhow!("no decoder bound"))?;
        let path = decoder.path().to_path_buf();
        {
            let mut c = self.shared.lock();
            c.run = true;
            c.attached = true;
            c.paused = false;
            c.state = PlaybackState::Playing;
        }

        let worker = StreamWorker {
            shared: self.shared.clone(),
            sink: self.sink.clone(),
            listener: self.listener.clone(),
            diag: self.diag.clone(),
            replay_gain: self.config.replay_gain,
        };
        let handle = thread::Builder::new()
            .name("tonearm-stream".to_string())
            .spawn(move || worker.run(decoder))
            .context("spawn stream thread")?;

        let listener = self.listener.clone();
        let diag = self.diag.clone();
        // detached; a later load does not wait for the callback
        notify::watch("tonearm-stream", handle, move |exit| match exit {
            WorkerExit::Returned(StreamEnd::Finished) => listener.on_track_finished(&path),
            WorkerExit::Returned(StreamEnd::Stopped) => {}
            WorkerExit::Returned(StreamEnd::Failed(reason)) => listener.on_cannot_play(&path, &reason),
            WorkerExit::Panicked(msg) => {
                diag.error(COMPONENT, format!("stream thread panicked: {msg}"));
                listener.on_cannot_play(&path, &msg);
            }
        })
        .context("spawn finish notifier")?;
        Ok(())
    }

    /// Stop the stream thread (if any), close the bound decoder and return to `Idle`.
    fn teardown(&mut self) {
        if let Some(mut dec) = self.pending.take() {
            dec.close();
        }

        let shared = self.shared.clone();
        shared.cancel.store(true, Ordering::Relaxed);
        let mut c = shared.lock();
        c.run = false;
        shared.cv.notify_all();
        let deadline = Instant::now() + self.config.control_timeout;
        while c.attached {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                self.diag.warn(COMPONENT, "stream thread did not stop in time; detaching");
                break;
            }
            c = shared.cv.wait_timeout(c, remaining).unwrap().0;
        }
        if c.state != PlaybackState::Idle {
            tracing::debug!(state = ?c.state, "playback torn down");
        }
        drop(c);
        self.shared = Shared::new(ControlState::idle());
    }
}

impl Drop for PlaybackEngine {
    fn drop(&mut self) {
        self.teardown();
    }
}

enum Step {
    Stop,
    Seek(u64, f64),
    Decode,
}

struct StreamWorker {
    shared: Arc<Shared>,
    sink: Arc<dyn OutputSink>,
    listener: Arc<dyn PlaybackListener>,
    diag: Diagnostics,
    replay_gain: bool,
}

impl StreamWorker {
    fn run(self, mut decoder: Box<dyn Decoder>) -> StreamEnd {
        let end = match self.open_sink(decoder.as_ref()) {
            Ok(mut out) => {
                let end = self.stream(decoder.as_mut(), out.as_mut());
                out.stop();
                end
            }
            Err(err) => {
                let reason = format!("{err:#}");
                self.diag.error(COMPONENT, format!("cannot open output: {reason}"));
                StreamEnd::Failed(reason)
            }
        };
        decoder.close();

        let mut c = self.shared.lock();
        c.attached = false;
        c.paused = false;
        c.state = match end {
            StreamEnd::Stopped => PlaybackState::Idle,
            _ => PlaybackState::Finished,
        };
        if end == StreamEnd::Finished {
            c.position = c.duration.max(c.position);
        }
        drop(c);
        self.shared.cv.notify_all();
        tracing::info!(path = %decoder.path().display(), end = ?end, "stream thread done");
        end
    }

    fn open_sink(&self, decoder: &dyn Decoder) -> Result<Box<dyn SinkStream>> {
        let format = decoder
            .format()
            .ok_or_else(|| anyhow!("decoder has no format"))?;
        let out = self.sink.open(&format)?;
        let report = out.report();
        if report.quality_degraded {
            self.diag.info(
                COMPONENT,
                format!(
                    "{}: output degraded ({} Hz -> {} Hz, {} bits)",
                    decoder.path().display(),
                    report.source_rate,
                    report.device_rate,
                    report.device_bits
                ),
            );
            self.listener.on_quality_degraded(&report);
        }
        self.shared.lock().sink = Some(report);
        Ok(out)
    }

    /// Wait for the next thing to do, applying pause/resume to the sink on the way.
    fn next_step(&self, out: &mut dyn SinkStream, sink_paused: &mut bool) -> Step {
        let mut c = self.shared.lock();
        loop {
            if !c.run {
                return Step::Stop;
            }
            if let Some((id, target)) = c.seek_request.take() {
                return Step::Seek(id, target);
            }
            if c.paused {
                if !*sink_paused {
                    out.pause();
                    *sink_paused = true;
                }
                c = self.shared.cv.wait(c).unwrap();
                continue;
            }
            if *sink_paused {
                out.resume();
                *sink_paused = false;
            }
            return Step::Decode;
        }
    }

    fn stream(&self, decoder: &mut dyn Decoder, out: &mut dyn SinkStream) -> StreamEnd {
        let path = decoder.path().to_path_buf();
        let format = match decoder.format() {
            Some(f) => f,
            None => return StreamEnd::Failed("decoder has no format".to_string()),
        };
        let gain = if self.replay_gain {
            match decoder.replay_gain() {
                Some(db) => Some(pcm::db_to_gain(db)),
                None => {
                    self.diag.info(COMPONENT, format!("{}: no replay gain tag", path.display()));
                    self.listener.on_loudness_unavailable(&path);
                    None
                }
            }
        } else {
            None
        };

        let mut sink_paused = false;
        loop {
            match self.next_step(out, &mut sink_paused) {
                Step::Stop => return StreamEnd::Stopped,
                Step::Seek(id, target) => {
                    let result = decoder.seek(target);
                    out.flush();
                    let mut c = self.shared.lock();
                    c.seek_applied = id;
                    c.seek_error = result.err().map(|e| format!("{e:#}"));
                    c.position = decoder.current_time().max(0.0);
                    drop(c);
                    self.shared.cv.notify_all();
                }
                Step::Decode => {
                    if !decoder.more_samples() {
                        out.drain(&self.shared.cancel);
                        return if self.shared.cancel.load(Ordering::Relaxed) {
                            StreamEnd::Stopped
                        } else {
                            StreamEnd::Finished
                        };
                    }
                    self.shared.lock().position = decoder.current_time().max(0.0);
                    let buf = decoder.next_sample();
                    if buf.is_empty() {
                        continue;
                    }
                    let buf = match gain {
                        Some(g) => SampleBuffer::from_vec(pcm::scale_bytes(buf.as_bytes(), &format, g)),
                        None => buf,
                    };
                    if let Err(err) = out.write(&buf) {
                        let reason = format!("{err:#}");
                        self.diag.error(COMPONENT, format!("{}: output write failed: {reason}", path.display()));
                        return StreamEnd::Failed(reason);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::tests::temp_path;
    use crate::sink::NullSink;
    use std::sync::mpsc;

    struct ChannelListener(Mutex<mpsc::Sender<String>>);

    impl PlaybackListener for ChannelListener {
        fn on_track_finished(&self, path: &Path) {
            let _ = self.0.lock().unwrap().send(format!("finished:{}", path.display()));
        }

        fn on_loudness_unavailable(&self, _path: &Path) {
            let _ = self.0.lock().unwrap().send("no-gain".to_string());
        }

        fn on_cannot_play(&self, _path: &Path, _reason: &str) {
            let _ = self.0.lock().unwrap().send("cannot-play".to_string());
        }
    }

    fn write_wav(name: &str, secs: u32) -> PathBuf {
        let path = temp_path(name);
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 8_000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for i in 0..8_000 * secs {
            writer.write_sample(((i % 200) as i16 - 100) * 50).unwrap();
        }
        writer.finalize().unwrap();
        path
    }

    fn engine(sink: NullSink, listener: Arc<dyn PlaybackListener>) -> PlaybackEngine {
        let config = EngineConfig {
            decode_chunk_frames: 400,
            ..EngineConfig::default()
        };
        PlaybackEngine::new(Arc::new(sink), config, listener, Diagnostics::new())
    }

    #[test]
    fn plays_to_finish_and_notifies() {
        let path = write_wav("engine-finish.wav", 1);
        let (tx, rx) = mpsc::channel();
        let listener = Arc::new(ChannelListener(Mutex::new(tx)));
        let sink = NullSink::instant();
        let stats = sink.stats();
        let mut engine = engine(sink, listener);

        assert_eq!(engine.state(), PlaybackState::Idle);
        engine.load_file(&path).unwrap();
        assert_eq!(engine.state(), PlaybackState::Loaded);
        assert!((engine.duration() - 1.0).abs() < 1e-9);
        engine.play().unwrap();
        assert!(engine.wait_until_finished(Duration::from_secs(5)));
        assert_eq!(engine.state(), PlaybackState::Finished);
        assert!((engine.current_time() - 1.0).abs() < 1e-9);
        assert_eq!(stats.bytes_written(), 16_000);

        let msg = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(msg, format!("finished:{}", path.display()));
        // duration stays visible after the decoder closed
        assert!((engine.status().duration_secs - 1.0).abs() < 1e-9);
        assert!(engine.play().is_err());
    }

    #[test]
    fn pause_resume_and_seek_while_paused() {
        let path = write_wav("engine-pause.wav", 4);
        let sink = NullSink::realtime();
        let stats = sink.stats();
        let mut engine = engine(sink, Arc::new(NoopListener));
        engine.load_file(&path).unwrap();
        engine.play().unwrap();
        thread::sleep(Duration::from_millis(100));

        engine.pause().unwrap();
        assert_eq!(engine.state(), PlaybackState::Paused);
        // the stream thread finishes its current write (one 50 ms chunk) before pausing
        thread::sleep(Duration::from_millis(150));
        let written = stats.bytes_written();
        assert!(stats.is_paused());
        thread::sleep(Duration::from_millis(100));
        assert_eq!(stats.bytes_written(), written);

        engine.seek(3.0).unwrap();
        assert!((engine.current_time() - 3.0).abs() < 0.1);
        engine.seek(1.0).unwrap();
        assert!((engine.current_time() - 1.0).abs() < 0.1);
        assert_eq!(engine.state(), PlaybackState::Paused);

        engine.play().unwrap();
        assert_eq!(engine.state(), PlaybackState::Playing);
        thread::sleep(Duration::from_millis(100));
        assert!(stats.bytes_written() > written);
        assert!(!stats.is_paused());

        engine.stop();
        assert_eq!(engine.state(), PlaybackState::Idle);
    }

    #[test]
    fn seek_while_playing_lands_near_target() {
        let path = write_wav("engine-seek.wav", 6);
        let sink = NullSink::realtime();
        let mut engine = engine(sink, Arc::new(NoopListener));
        engine.load_file(&path).unwrap();
        engine.play().unwrap();
        engine.seek(5.0).unwrap();
        assert!((engine.current_time() - 5.0).abs() < 0.1);
        engine.seek(2.0).unwrap();
        assert!((engine.current_time() - 2.0).abs() < 0.1);
        engine.stop();
    }

    #[test]
    fn seek_before_play_moves_start_position() {
        let path = write_wav("engine-start.wav", 2);
        let sink = NullSink::instant();
        let stats = sink.stats();
        let mut engine = engine(sink, Arc::new(NoopListener));
        engine.load_file(&path).unwrap();
        engine.seek(1.5).unwrap();
        assert!((engine.current_time() - 1.5).abs() < 1e-9);
        engine.play().unwrap();
        assert!(engine.wait_until_finished(Duration::from_secs(5)));
        assert_eq!(stats.bytes_written(), 8_000);
    }

    #[test]
    fn load_replaces_previous_track() {
        let first = write_wav("engine-first.wav", 3);
        let second = write_wav("engine-second.wav", 1);
        let sink = NullSink::realtime();
        let stats = sink.stats();
        let mut engine = engine(sink, Arc::new(NoopListener));
        engine.load_file(&first).unwrap();
        engine.play().unwrap();
        thread::sleep(Duration::from_millis(50));
        engine.load_file(&second).unwrap();
        assert_eq!(engine.state(), PlaybackState::Loaded);
        assert_eq!(engine.status().path.as_deref(), Some(second.as_path()));
        assert_eq!(stats.streams_opened(), 1);
    }

    #[test]
    fn load_from_playing_or_paused_drops_the_old_track_silently() {
        let first = write_wav("engine-busy-a.wav", 3);
        let second = write_wav("engine-busy-b.wav", 3);
        let last = write_wav("engine-busy-c.wav", 1);
        let (tx, rx) = mpsc::channel();
        let sink = NullSink::realtime();
        let stats = sink.stats();
        let mut engine = engine(sink, Arc::new(ChannelListener(Mutex::new(tx))));

        engine.load_file(&first).unwrap();
        engine.play().unwrap();
        assert_eq!(engine.state(), PlaybackState::Playing);
        thread::sleep(Duration::from_millis(50));
        engine.load_file(&second).unwrap();
        assert_eq!(engine.state(), PlaybackState::Loaded);
        assert_eq!(engine.status().path.as_deref(), Some(second.as_path()));
        assert_eq!(engine.current_time(), 0.0);

        engine.play().unwrap();
        thread::sleep(Duration::from_millis(50));
        engine.pause().unwrap();
        assert_eq!(engine.state(), PlaybackState::Paused);
        engine.load_file(&last).unwrap();
        assert_eq!(engine.state(), PlaybackState::Loaded);
        assert_eq!(engine.status().path.as_deref(), Some(last.as_path()));

        engine.play().unwrap();
        assert!(engine.wait_until_finished(Duration::from_secs(5)));
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), format!("finished:{}", last.display()));
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
        assert!(stats.streams_opened() >= 1);
    }

    #[test]
    fn unplayable_file_signals_and_fails() {
        let path = temp_path("engine-garbage.mp3");
        std::fs::write(&path, b"nope").unwrap();
        let (tx, rx) = mpsc::channel();
        let mut engine = engine(NullSink::instant(), Arc::new(ChannelListener(Mutex::new(tx))));
        assert!(engine.load_file(&path).is_err());
        assert_eq!(engine.state(), PlaybackState::Idle);
        assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), "cannot-play");
        assert!(engine.pause().is_err());
        assert!(engine.seek(1.0).is_err());
    }

    #[test]
    fn replay_gain_without_tag_notifies_once() {
        let path = write_wav("engine-gain.wav", 1);
        let (tx, rx) = mpsc::channel();
        let config = EngineConfig {
            replay_gain: true,
            ..EngineConfig::default()
        };
        let mut engine = PlaybackEngine::new(
            Arc::new(NullSink::instant()),
            config,
            Arc::new(ChannelListener(Mutex::new(tx))),
            Diagnostics::new(),
        );
        engine.load_file(&path).unwrap();
        engine.play().unwrap();
        assert!(engine.wait_until_finished(Duration::from_secs(5)));
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), "no-gain");
        assert!(rx.recv_timeout(Duration::from_secs(2)).unwrap().starts_with("finished:"));
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    }
}
