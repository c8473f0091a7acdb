//! Error taxonomy, split by how far an error is allowed to travel.
//!
//! Only [`Error`] is fatal to a run. Everything else is local to one file and
//! is reported, never propagated to other watchers.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Fatal errors returned when starting a tail.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("None of the {} given files could be opened", .0.len())]
    NoFilesOpened(Vec<OpenError>),
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    #[error("no files given to tail")]
    NoFiles,
    #[error("{0} capacity must be greater than zero")]
    ZeroCapacity(&'static str),
    #[error("poll interval must be greater than zero")]
    ZeroPollInterval,
}

/// A file that could not be opened for tailing. The file is skipped.
#[derive(Debug, Error)]
pub enum OpenError {
    #[error("{}: file not found", .path.display())]
    NotFound {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{}: permission denied", .path.display())]
    PermissionDenied {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{}: not a regular file", .path.display())]
    NotAFile { path: PathBuf },
    #[error("{}: failed to open: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{}: failed to attach change notifications", .path.display())]
    Subscribe {
        path: PathBuf,
        #[source]
        source: SignalError,
    },
}

impl OpenError {
    pub(crate) fn from_io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        let path = path.into();
        match source.kind() {
            io::ErrorKind::NotFound => OpenError::NotFound { path, source },
            io::ErrorKind::PermissionDenied => OpenError::PermissionDenied { path, source },
            _ => OpenError::Io { path, source },
        }
    }

    /// The path that failed to open.
    pub fn path(&self) -> &Path {
        match self {
            OpenError::NotFound { path, .. }
            | OpenError::PermissionDenied { path, .. }
            | OpenError::NotAFile { path }
            | OpenError::Io { path, .. }
            | OpenError::Subscribe { path, .. } => path,
        }
    }
}

/// Failure of a single incremental read.
#[derive(Debug, Error)]
pub enum ReadError {
    /// The path names no file right now, as between the two halves of a
    /// rename-and-create rotation.
    #[error("{}: file is missing", .path.display())]
    Missing {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{}: file was removed", .path.display())]
    Removed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{}: file handle is closed", .path.display())]
    Closed { path: PathBuf },
    #[error("{}: read failed: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl ReadError {
    pub(crate) fn from_io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        let path = path.into();
        match source.kind() {
            io::ErrorKind::NotFound => ReadError::Missing { path, source },
            _ => ReadError::Io { path, source },
        }
    }

    /// Whether the owning watcher should give up on the file.
    ///
    /// Transient errors leave the watcher running so the next signal can
    /// retry the read.
    pub fn is_unrecoverable(&self) -> bool {
        matches!(self, ReadError::Removed { .. } | ReadError::Closed { .. })
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, ReadError::Missing { .. })
    }
}

/// Notification-layer failure for one watched path.
#[derive(Debug, Error)]
pub enum SignalError {
    #[error("{}: change notification failed: {source}", .path.display())]
    Notify {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },
    #[error("{}: change source error: {message}", .path.display())]
    Source { path: PathBuf, message: String },
}

impl SignalError {
    pub fn path(&self) -> &Path {
        match self {
            SignalError::Notify { path, .. } | SignalError::Source { path, .. } => path,
        }
    }
}
