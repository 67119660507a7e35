//! Injected logging capability.
//!
//! Components never reach for a process-wide logger. Each constructor takes
//! an `Arc<dyn Logger>`; production code passes [`TracingLogger`], tests pass
//! [`NoopLogger`] or [`MemoryLogger`].

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

/// Severity of a log message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    /// A failure that was handled locally (e.g. a background purge error).
    Error,
    /// Something unexpected but recoverable (e.g. a table repair).
    Warn,
    /// Normal lifecycle events.
    Info,
    /// Verbose diagnostics.
    Debug,
}

/// Sink for diagnostic messages.
pub trait Logger: Send + Sync {
    /// Records one message.
    fn log(&self, level: LogLevel, args: fmt::Arguments<'_>);

    /// Records an error message.
    fn error(&self, args: fmt::Arguments<'_>) {
        self.log(LogLevel::Error, args);
    }

    /// Records a warning.
    fn warn(&self, args: fmt::Arguments<'_>) {
        self.log(LogLevel::Warn, args);
    }

    /// Records an informational message.
    fn info(&self, args: fmt::Arguments<'_>) {
        self.log(LogLevel::Info, args);
    }

    /// Records a debug message.
    fn debug(&self, args: fmt::Arguments<'_>) {
        self.log(LogLevel::Debug, args);
    }
}

/// Forwards messages to `tracing` under the `rpl` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogger;

impl TracingLogger {
    /// Returns a shareable handle.
    #[must_use]
    pub fn shared() -> Arc<dyn Logger> {
        Arc::new(Self)
    }
}

impl Logger for TracingLogger {
    fn log(&self, level: LogLevel, args: fmt::Arguments<'_>) {
        match level {
            LogLevel::Error => tracing::error!(target: "rpl", "{}", args),
            LogLevel::Warn => tracing::warn!(target: "rpl", "{}", args),
            LogLevel::Info => tracing::info!(target: "rpl", "{}", args),
            LogLevel::Debug => tracing::debug!(target: "rpl", "{}", args),
        }
    }
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopLogger;

impl NoopLogger {
    /// Returns a shareable handle.
    #[must_use]
    pub fn shared() -> Arc<dyn Logger> {
        Arc::new(Self)
    }
}

impl Logger for NoopLogger {
    fn log(&self, _level: LogLevel, _args: fmt::Arguments<'_>) {}
}

/// Keeps every message in memory so tests can assert on them.
#[derive(Debug, Default)]
pub struct MemoryLogger {
    entries: Mutex<Vec<(LogLevel, String)>>,
}

impl MemoryLogger {
    /// Creates an empty logger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of all recorded messages.
    #[must_use]
    pub fn entries(&self) -> Vec<(LogLevel, String)> {
        self.entries.lock().clone()
    }

    /// Returns true if a message at `level` contains `needle`.
    #[must_use]
    pub fn contains(&self, level: LogLevel, needle: &str) -> bool {
        self.entries
            .lock()
            .iter()
            .any(|(l, msg)| *l == level && msg.contains(needle))
    }
}

impl Logger for MemoryLogger {
    fn log(&self, level: LogLevel, args: fmt::Arguments<'_>) {
        self.entries.lock().push((level, args.to_string()));
    }
}
