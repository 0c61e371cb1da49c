//! Completion hand-off for worker threads.
//!
//! A worker (playback stream or conversion job) never calls its own completion
//! callback. A small notifier thread joins it first, so the callback only runs once the
//! worker is gone and can safely start the next piece of work.

use std::io;
use std::thread::{self, JoinHandle};

/// How a watched worker ended.
#[derive(Debug)]
pub enum WorkerExit<T> {
    Returned(T),
    Panicked(String),
}

/// Spawn a thread that joins `worker` and then runs `on_finish` with its result.
pub fn watch<T, F>(name: &str, worker: JoinHandle<T>, on_finish: F) -> io::Result<JoinHandle<()>>
where
    T: Send + 'static,
    F: FnOnce(WorkerExit<T>) + Send + 'static,
{
    let label = name.to_string();
    thread::Builder::new()
        .name(format!("{name}-notify"))
        .spawn(move || {
            let exit = match worker.join() {
                Ok(value) => WorkerExit::Returned(value),
                Err(payload) => {
                    let message = payload
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| payload.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string());
                    tracing::error!(worker = %label, panic = %message, "worker thread panicked");
                    WorkerExit::Panicked(message)
                }
            };
            on_finish(exit);
        })
}
