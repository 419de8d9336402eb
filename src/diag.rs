//! Diagnostics
//!
//! The engine reports through a `DiagnosticsEngine`. It counts errors and
//! warnings (the orchestrator classifies fragments from those counts), keeps
//! a buffer of everything reported since the last drain, and forwards each
//! diagnostic to a replaceable consumer.

use std::fmt;

use crate::source::SourceLocation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Note,
    Warning,
    Error,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Level::Note => write!(f, "note"),
            Level::Warning => write!(f, "warning"),
            Level::Error => write!(f, "error"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub level: Level,
    pub location: SourceLocation,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.level, self.message)
    }
}

/// Receiver of diagnostics as they are reported.
pub trait DiagnosticConsumer {
    fn handle(&mut self, diag: &Diagnostic);

    /// Called when the engine soft-resets between fragments.
    fn reset(&mut self) {}
}

/// Consumer that only logs. Installed by default.
pub struct TracingConsumer;

impl DiagnosticConsumer for TracingConsumer {
    fn handle(&mut self, diag: &Diagnostic) {
        match diag.level {
            Level::Error => tracing::debug!(target: "kiln::diag", "error: {}", diag.message),
            Level::Warning => tracing::debug!(target: "kiln::diag", "warning: {}", diag.message),
            Level::Note => tracing::trace!(target: "kiln::diag", "note: {}", diag.message),
        }
    }
}

pub struct DiagnosticsEngine {
    consumer: Box<dyn DiagnosticConsumer>,
    pending: Vec<Diagnostic>,
    num_errors: usize,
    num_warnings: usize,
    suppress_warnings: bool,
}

impl DiagnosticsEngine {
    pub fn new() -> Self {
        DiagnosticsEngine {
            consumer: Box::new(TracingConsumer),
            pending: Vec::new(),
            num_errors: 0,
            num_warnings: 0,
            suppress_warnings: false,
        }
    }

    pub fn report(&mut self, diag: Diagnostic) {
        match diag.level {
            Level::Error => self.num_errors += 1,
            Level::Warning if self.suppress_warnings => return,
            Level::Warning => self.num_warnings += 1,
            Level::Note => {}
        }
        self.consumer.handle(&diag);
        self.pending.push(diag);
    }

    pub fn error(&mut self, location: SourceLocation, message: impl Into<String>) {
        self.report(Diagnostic {
            level: Level::Error,
            location,
            message: message.into(),
        });
    }

    pub fn warning(&mut self, location: SourceLocation, message: impl Into<String>) {
        self.report(Diagnostic {
            level: Level::Warning,
            location,
            message: message.into(),
        });
    }

    pub fn note(&mut self, location: SourceLocation, message: impl Into<String>) {
        self.report(Diagnostic {
            level: Level::Note,
            location,
            message: message.into(),
        });
    }

    pub fn has_error_occurred(&self) -> bool {
        self.num_errors > 0
    }

    pub fn num_errors(&self) -> usize {
        self.num_errors
    }

    pub fn num_warnings(&self) -> usize {
        self.num_warnings
    }

    /// Drop warnings on the floor while set. Used for prompt input where
    /// the synthesized wrapper triggers warnings the user never wrote.
    pub fn set_suppress_warnings(&mut self, suppress: bool) {
        self.suppress_warnings = suppress;
    }

    /// Soft reset: counters go back to zero, buffered diagnostics stay until
    /// drained.
    pub fn reset(&mut self) {
        self.num_errors = 0;
        self.num_warnings = 0;
        self.suppress_warnings = false;
        self.consumer.reset();
    }

    /// Take everything reported since the last drain.
    pub fn take_pending(&mut self) -> Vec<Diagnostic> {
        std::mem::take(&mut self.pending)
    }

    /// Install a new consumer, returning the old one.
    pub fn replace_consumer(
        &mut self,
        consumer: Box<dyn DiagnosticConsumer>,
    ) -> Box<dyn DiagnosticConsumer> {
        std::mem::replace(&mut self.consumer, consumer)
    }
}

impl Default for DiagnosticsEngine {
    fn default() -> Self {
        Self::new()
    }
}
