//! Shared diagnostics handle.
//!
//! Every decoder, encoder, engine and conversion job receives a [`Diagnostics`] clone at
//! construction. Entries are kept in memory so a UI can show "what went wrong" for a
//! track, and are mirrored to `tracing` so headless runs still see them in the log.

use std::fmt;
use std::sync::{Arc, Mutex};

/// Severity of a recorded diagnostic.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
        };
        f.write_str(label)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Diagnostic {
    pub level: Level,
    pub component: String,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.level, self.component, self.message)
    }
}

/// Cloneable sink for diagnostics; clones share the same list.
#[derive(Clone, Debug, Default)]
pub struct Diagnostics {
    entries: Arc<Mutex<Vec<Diagnostic>>>,
    max_entries: Option<usize>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep at most `max_entries` (oldest entries are dropped first).
    pub fn bounded(max_entries: usize) -> Self {
        Self {
            entries: Arc::default(),
            max_entries: Some(max_entries.max(1)),
        }
    }

    pub fn record(&self, level: Level, component: &str, message: impl Into<String>) {
        let message = message.into();
        match level {
            Level::Debug => tracing::debug!(component, "{message}"),
            Level::Info => tracing::info!(component, "{message}"),
            Level::Warn => tracing::warn!(component, "{message}"),
            Level::Error => tracing::error!(component, "{message}"),
        }
        let mut entries = self.entries.lock().unwrap();
        entries.push(Diagnostic {
            level,
            component: component.to_string(),
            message,
        });
        if let Some(max) = self.max_entries {
            if entries.len() > max {
                let excess = entries.len() - max;
                entries.drain(..excess);
            }
        }
    }

    pub fn info(&self, component: &str, message: impl Into<String>) {
        self.record(Level::Info, component, message);
    }

    pub fn warn(&self, component: &str, message: impl Into<String>) {
        self.record(Level::Warn, component, message);
    }

    pub fn error(&self, component: &str, message: impl Into<String>) {
        self.record(Level::Error, component, message);
    }

    /// Snapshot of every entry recorded so far.
    pub fn entries(&self) -> Vec<Diagnostic> {
        self.entries.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_entries() {
        let diag = Diagnostics::new();
        let other = diag.clone();
        other.warn("decoder", "short read");
        assert_eq!(diag.len(), 1);
        assert_eq!(diag.entries()[0].component, "decoder");
        assert_eq!(diag.entries()[0].level, Level::Warn);
    }

    #[test]
    fn bounded_drops_oldest() {
        let diag = Diagnostics::bounded(2);
        diag.info("a", "one");
        diag.info("a", "two");
        diag.info("a", "three");
        let messages: Vec<String> = diag.entries().into_iter().map(|d| d.message).collect();
        assert_eq!(messages, vec!["two".to_string(), "three".to_string()]);
    }
}
