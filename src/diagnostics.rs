//! Structured warnings for recoverable decoding problems
//!
//! Malformed but recoverable input (a shared formula without a group, an overlong string, a
//! nameless directory entry ...) never fails the read. Instead a [`Diagnostic`] is handed to the
//! [`DiagnosticSink`] supplied when the workbook was opened, which lets hosts surface, collect or
//! silence them.

use std::fmt;
use std::sync::{Arc, Mutex};

/// Severity of a [`Diagnostic`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    /// Something unexpected was found, a best effort value was used instead
    Warning,
    /// Some data could not be recovered and was dropped
    Error,
}

/// Where a diagnostic was raised
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Location {
    /// Stream or sheet name
    pub stream: Option<String>,
    /// Byte offset within the stream
    pub offset: Option<usize>,
    /// BIFF record type
    pub record: Option<u16>,
    /// Cell position (row, column)
    pub cell: Option<(u32, u32)>,
}

impl Location {
    /// Location within a named stream
    pub fn stream<S: Into<String>>(name: S) -> Self {
        Location {
            stream: Some(name.into()),
            ..Default::default()
        }
    }

    /// Sets the byte offset
    pub fn at(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Sets the record type
    pub fn record(mut self, typ: u16) -> Self {
        self.record = Some(typ);
        self
    }

    /// Sets the cell position
    pub fn cell(mut self, row: u32, col: u32) -> Self {
        self.cell = Some((row, col));
        self
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut sep = "";
        if let Some(s) = &self.stream {
            write!(f, "'{s}'")?;
            sep = " ";
        }
        if let Some(o) = self.offset {
            write!(f, "{sep}@{o:#x}")?;
            sep = " ";
        }
        if let Some(r) = self.record {
            write!(f, "{sep}record {r:#06X}")?;
            sep = " ";
        }
        if let Some((row, col)) = self.cell {
            write!(f, "{sep}cell ({row}, {col})")?;
        }
        Ok(())
    }
}

/// A recoverable decoding problem
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    /// Severity
    pub severity: Severity,
    /// Human readable message
    pub message: String,
    /// Location, if known
    pub location: Option<Location>,
}

impl Diagnostic {
    /// Creates a new warning
    pub fn warning<S: Into<String>>(message: S) -> Self {
        Diagnostic {
            severity: Severity::Warning,
            message: message.into(),
            location: None,
        }
    }

    /// Creates a new error
    pub fn error<S: Into<String>>(message: S) -> Self {
        Diagnostic {
            severity: Severity::Error,
            message: message.into(),
            location: None,
        }
    }

    /// Attaches a location
    pub fn at(mut self, location: Location) -> Self {
        self.location = Some(location);
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.location {
            Some(l) => write!(f, "{} ({l})", self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// Receives diagnostics raised while decoding
///
/// Implementations must not panic: a sink is called from the middle of parsing loops.
pub trait DiagnosticSink {
    /// Reports a [`Severity::Warning`]
    fn warn(&self, diagnostic: Diagnostic);
    /// Reports a [`Severity::Error`]
    fn error(&self, diagnostic: Diagnostic);

    /// Dispatches on the diagnostic severity
    fn report(&self, diagnostic: Diagnostic) {
        match diagnostic.severity {
            Severity::Warning => self.warn(diagnostic),
            Severity::Error => self.error(diagnostic),
        }
    }
}

/// Shared handle on a sink, cloned into every component which may report
pub type Sink = Arc<dyn DiagnosticSink + Send + Sync>;

/// Forwards diagnostics to the `log` crate (the default sink)
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl DiagnosticSink for LogSink {
    fn warn(&self, diagnostic: Diagnostic) {
        log::warn!("{diagnostic}");
    }

    fn error(&self, diagnostic: Diagnostic) {
        log::error!("{diagnostic}");
    }
}

/// Drops every diagnostic
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl DiagnosticSink for NullSink {
    fn warn(&self, _: Diagnostic) {}
    fn error(&self, _: Diagnostic) {}
}

/// Keeps every diagnostic in memory
///
/// # Examples
/// ```
/// use std::sync::Arc;
/// use xlsbiff::{Collector, Diagnostic, DiagnosticSink};
///
/// let collector = Arc::new(Collector::default());
/// collector.warn(Diagnostic::warning("odd record"));
/// assert_eq!(collector.warnings().len(), 1);
/// ```
#[derive(Debug, Default)]
pub struct Collector {
    diagnostics: Mutex<Vec<Diagnostic>>,
}

impl Collector {
    /// Creates an empty collector
    pub fn new() -> Self {
        Collector::default()
    }

    /// All collected diagnostics, in report order
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        match self.diagnostics.lock() {
            Ok(d) => d.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Collected warnings only
    pub fn warnings(&self) -> Vec<Diagnostic> {
        self.diagnostics()
            .into_iter()
            .filter(|d| d.severity == Severity::Warning)
            .collect()
    }

    /// True if any collected message contains `needle`
    pub fn contains(&self, needle: &str) -> bool {
        self.diagnostics().iter().any(|d| d.message.contains(needle))
    }

    fn push(&self, diagnostic: Diagnostic) {
        match self.diagnostics.lock() {
            Ok(mut d) => d.push(diagnostic),
            Err(poisoned) => poisoned.into_inner().push(diagnostic),
        }
    }
}

impl DiagnosticSink for Collector {
    fn warn(&self, diagnostic: Diagnostic) {
        self.push(diagnostic);
    }

    fn error(&self, diagnostic: Diagnostic) {
        self.push(diagnostic);
    }
}
