//! Conversion pipeline: one decoder into one encoder on a dedicated thread.
//!
//! Each job owns its decoder/encoder pair; jobs share nothing and may run concurrently.
//! Completion is reported through [`ConversionListener`] from a notifier thread that
//! joins the job thread first.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use anyhow::{Context, Result};

use crate::decoder::Decoder;
use crate::diagnostics::Diagnostics;
use crate::encoder::{EncodeProgress, Encoder};
use crate::notify::{self, WorkerExit};

const COMPONENT: &str = "conversion";

pub trait ConversionListener: Send + Sync {
    /// Runs once per job after its thread has exited.
    fn on_conversion_finished(&self, _target: &Path, _success: bool) {}
}

pub struct NoopConversionListener;

impl ConversionListener for NoopConversionListener {}

/// Flags written by the job thread and read by pollers.
#[derive(Clone, Debug, Default)]
struct JobFlags {
    done: Arc<AtomicBool>,
    error: Arc<AtomicBool>,
}

impl JobFlags {
    fn complete(&self, success: bool) {
        if !success {
            self.error.store(true, Ordering::Release);
        }
        self.done.store(true, Ordering::Release);
    }
}

/// Handle on a running (or finished) conversion.
pub struct ConversionJob {
    target: PathBuf,
    flags: JobFlags,
    progress: EncodeProgress,
    notifier: Mutex<Option<JoinHandle<()>>>,
}

impl ConversionJob {
    pub fn target(&self) -> &Path {
        &self.target
    }

    pub fn is_done(&self) -> bool {
        self.flags.done.load(Ordering::Acquire)
    }

    pub fn has_error(&self) -> bool {
        self.flags.error.load(Ordering::Acquire)
    }

    /// Fraction encoded, `1.0` once the job is done (successful or not).
    pub fn progress(&self) -> f64 {
        if self.is_done() {
            1.0
        } else {
            self.progress.fraction()
        }
    }

    /// Block until the job finished and its listener ran. Returns `true` on success.
    pub fn wait(&self) -> bool {
        let handle = self.notifier.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
        self.is_done() && !self.has_error()
    }
}

pub struct ConversionPipeline;

impl ConversionPipeline {
    /// Start converting `source` into `target` with `encoder`.
    ///
    /// The source may be unprepared; it is prepared on the job thread and closed there
    /// once encoding ends.
    pub fn start(
        source: Box<dyn Decoder>,
        mut encoder: Box<dyn Encoder>,
        target: &Path,
        listener: Arc<dyn ConversionListener>,
        diag: Diagnostics,
    ) -> Result<ConversionJob> {
        let flags = JobFlags::default();
        let progress = encoder.progress();
        let target = target.to_path_buf();
        tracing::info!(
            source = %source.path().display(),
            target = %target.display(),
            codec = %encoder.kind(),
            "conversion started"
        );

        let worker_flags = flags.clone();
        let worker_target = target.clone();
        let worker = thread::Builder::new()
            .name("convert".to_string())
            .spawn(move || {
                encoder.set_source(source);
                let success = encoder.encode_audio(&worker_target);
                worker_flags.complete(success);
                if let Some(mut source) = encoder.take_source() {
                    source.close();
                }
                success
            })
            .context("spawn conversion thread")?;

        let notify_flags = flags.clone();
        let notify_target = target.clone();
        let notifier = notify::watch("convert", worker, move |exit| {
            let success = match exit {
                WorkerExit::Returned(success) => success,
                WorkerExit::Panicked(message) => {
                    diag.error(COMPONENT, format!("{}: {message}", notify_target.display()));
                    notify_flags.complete(false);
                    false
                }
            };
            tracing::info!(target = %notify_target.display(), success, "conversion finished");
            listener.on_conversion_finished(&notify_target, success);
        })
        .context("spawn conversion notifier")?;

        Ok(ConversionJob {
            target,
            flags,
            progress,
            notifier: Mutex::new(Some(notifier)),
        })
    }
}
