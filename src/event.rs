//! Values handed to the consumer: captured lines and per-file diagnostics.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

/// One complete line captured from a source file.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct LogEvent {
    /// The path from where the line was read, as it was registered.
    source: PathBuf,
    /// The line, without its terminator.
    line: String,
    /// When the read that produced the line happened.
    timestamp: DateTime<Utc>,
}

impl LogEvent {
    pub(crate) fn new(source: PathBuf, line: String, timestamp: DateTime<Utc>) -> Self {
        LogEvent {
            source,
            line,
            timestamp,
        }
    }

    /// Returns a reference to the file from where the line was read.
    pub fn source(&self) -> &Path {
        self.source.as_path()
    }

    /// Returns a reference to the line.
    pub fn line(&self) -> &str {
        self.line.as_str()
    }

    /// Capture time of the read. The time the line was written is unknown.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Returns the internal components that make up a `LogEvent`.
    pub fn into_inner(self) -> (PathBuf, String) {
        let LogEvent { source, line, .. } = self;

        (source, line)
    }
}

/// Renders as `[<path>] <line>`.
impl fmt::Display for LogEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.source.display(), self.line)
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum DiagnosticKind {
    /// The file could not be opened and is not being tailed.
    Open,
    /// A read failed; the watcher keeps going.
    Read,
    /// The file is gone; its watcher stopped.
    Unrecoverable,
    /// The change-signal source reported an error; the watcher keeps going.
    Signal,
}

/// A per-file error report, delivered apart from the line stream.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Diagnostic {
    pub source: PathBuf,
    pub kind: DiagnosticKind,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl Diagnostic {
    pub(crate) fn new(
        source: impl Into<PathBuf>,
        kind: DiagnosticKind,
        err: &dyn fmt::Display,
    ) -> Self {
        Diagnostic {
            source: source.into(),
            kind,
            message: err.to_string(),
            timestamp: Utc::now(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {:?}: {}", self.source.display(), self.kind, self.message)
    }
}
