//! Injected logging for boundary crossings.
//!
//! The proxy never reaches for a process-wide logger. Each proxy is handed a
//! [`BridgeLogger`] at construction and reports operation boundaries and absorbed
//! failures through it.
//!
//! | Logger | Purpose |
//! |--------|---------|
//! | [`NoopLogger`] | Discards everything |
//! | [`TracingLogger`] | Emits `tracing` events under the `tether` target |
//! | [`RecordingLogger`] | Captures [`LogEvent`]s for inspection in tests |
//!
//! All hooks have no-op defaults, so an implementation only overrides what it needs.

use std::{
    fmt,
    sync::{Arc, Mutex, PoisonError},
};

use crate::error::BridgeError;

/// Logging capability handed to a proxy at construction.
pub trait BridgeLogger: fmt::Debug + Send + Sync {
    /// Called when an operation begins.
    fn log_start(&self, _operation: &str) {}

    /// Called when an operation completes normally.
    fn log_stop(&self, _operation: &str) {}

    /// Informational message, e.g. an absorbed resolution miss.
    fn log(&self, _message: &str) {}

    /// A failure that was logged rather than raised.
    fn log_error(&self, _message: &str, _error: Option<&BridgeError>) {}
}

impl<L: BridgeLogger + ?Sized> BridgeLogger for &L {
    fn log_start(&self, operation: &str) {
        (**self).log_start(operation);
    }

    fn log_stop(&self, operation: &str) {
        (**self).log_stop(operation);
    }

    fn log(&self, message: &str) {
        (**self).log(message);
    }

    fn log_error(&self, message: &str, error: Option<&BridgeError>) {
        (**self).log_error(message, error);
    }
}

impl<L: BridgeLogger + ?Sized> BridgeLogger for Arc<L> {
    fn log_start(&self, operation: &str) {
        (**self).log_start(operation);
    }

    fn log_stop(&self, operation: &str) {
        (**self).log_stop(operation);
    }

    fn log(&self, message: &str) {
        (**self).log(message);
    }

    fn log_error(&self, message: &str, error: Option<&BridgeError>) {
        (**self).log_error(message, error);
    }
}

/// Logger that discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopLogger;

impl BridgeLogger for NoopLogger {}

/// Logger backed by the `tracing` facade.
///
/// Operation boundaries are `trace` events, messages are `debug`, errors are `error`.
/// Installing a subscriber is left to the host.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl BridgeLogger for TracingLogger {
    fn log_start(&self, operation: &str) {
        tracing::trace!(target: "tether", operation, "start");
    }

    fn log_stop(&self, operation: &str) {
        tracing::trace!(target: "tether", operation, "stop");
    }

    fn log(&self, message: &str) {
        tracing::debug!(target: "tether", "{message}");
    }

    fn log_error(&self, message: &str, error: Option<&BridgeError>) {
        match error {
            Some(error) => tracing::error!(target: "tether", %error, "{message}"),
            None => tracing::error!(target: "tether", "{message}"),
        }
    }
}

/// A single event captured by [`RecordingLogger`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogEvent {
    /// An operation began.
    Start(String),
    /// An operation completed normally.
    Stop(String),
    /// Informational message.
    Message(String),
    /// Logged failure, with the rendered error if one was attached.
    Error {
        /// Message passed by the caller.
        message: String,
        /// `Display` of the attached error.
        error: Option<String>,
    },
}

/// Logger that records every event in memory.
///
/// Clones share the same buffer, so a test keeps one clone and hands the other to the
/// proxy.
#[derive(Debug, Clone, Default)]
pub struct RecordingLogger {
    events: Arc<Mutex<Vec<LogEvent>>>,
}

impl RecordingLogger {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of all events recorded so far.
    #[must_use]
    pub fn events(&self) -> Vec<LogEvent> {
        self.lock().clone()
    }

    /// Returns only the `Error` events.
    #[must_use]
    pub fn errors(&self) -> Vec<LogEvent> {
        self.lock()
            .iter()
            .filter(|event| matches!(event, LogEvent::Error { .. }))
            .cloned()
            .collect()
    }

    /// Returns true if any informational message contains `needle`.
    #[must_use]
    pub fn has_message(&self, needle: &str) -> bool {
        self.lock()
            .iter()
            .any(|event| matches!(event, LogEvent::Message(message) if message.contains(needle)))
    }

    fn push(&self, event: LogEvent) {
        self.lock().push(event);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<LogEvent>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl BridgeLogger for RecordingLogger {
    fn log_start(&self, operation: &str) {
        self.push(LogEvent::Start(operation.to_owned()));
    }

    fn log_stop(&self, operation: &str) {
        self.push(LogEvent::Stop(operation.to_owned()));
    }

    fn log(&self, message: &str) {
        self.push(LogEvent::Message(message.to_owned()));
    }

    fn log_error(&self, message: &str, error: Option<&BridgeError>) {
        self.push(LogEvent::Error {
            message: message.to_owned(),
            error: error.map(ToString::to_string),
        });
    }
}
