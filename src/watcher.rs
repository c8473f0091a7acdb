//! Binding of one tracked file to its change signals.

use std::path::{Path, PathBuf};

use chrono::Utc;
use futures_util::stream::StreamExt;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::event::{Diagnostic, DiagnosticKind, LogEvent};
use crate::error::SignalError;
use crate::signal::{ChangeSignal, Signals};
use crate::tracked::TrackedFile;

/// Why a watcher stopped.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum WatcherExit {
    /// The signal source closed; no more reads could be triggered.
    SignalsClosed,
    /// Cancellation was requested.
    Cancelled,
    /// The file was removed or its handle became unusable.
    FileRemoved,
    /// Nobody is receiving events anymore.
    OutputClosed,
}

enum Wake {
    Signal(Option<Result<ChangeSignal, SignalError>>),
    Recheck,
}

/// Outcome of one watcher task.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct WatcherReport {
    pub path: PathBuf,
    pub exit: WatcherExit,
}

/// Reads its file whenever a signal arrives and forwards the lines in order.
///
/// A watcher is idle while waiting on its signals, reading while draining the
/// file, and stopped once [`run`](Watcher::run) returns. Every read drains
/// everything complete, so any number of writes may sit behind one signal.
pub struct Watcher {
    file: TrackedFile,
    signals: Signals,
    events: mpsc::Sender<LogEvent>,
    diagnostics: mpsc::Sender<Diagnostic>,
    cancel: CancellationToken,
    /// When to read again while the path names no file.
    recheck: Option<Instant>,
}

impl Watcher {
    pub fn new(
        file: TrackedFile,
        signals: Signals,
        events: mpsc::Sender<LogEvent>,
        diagnostics: mpsc::Sender<Diagnostic>,
        cancel: CancellationToken,
    ) -> Self {
        Watcher {
            file,
            signals,
            events,
            diagnostics,
            cancel,
            recheck: None,
        }
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Runs until the file, the signals, the consumer, or the token says stop.
    /// The file handle is closed on every exit.
    pub async fn run(mut self) -> WatcherReport {
        let exit = self.watch().await;
        self.file.close();

        debug!(path = %self.file.path().display(), ?exit, "watcher stopped");

        WatcherReport {
            path: self.file.path().to_path_buf(),
            exit,
        }
    }

    async fn watch(&mut self) -> WatcherExit {
        // Startup counts as a change, so content present at open time is
        // picked up without waiting for the first signal.
        if let Some(exit) = self.read_and_forward().await {
            return exit;
        }

        loop {
            let recheck = self.recheck;
            let wake = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return WatcherExit::Cancelled,
                signal = self.signals.next() => Wake::Signal(signal),
                _ = sleep_until(recheck.unwrap_or_else(Instant::now)), if recheck.is_some() => {
                    Wake::Recheck
                }
            };

            match wake {
                Wake::Signal(None) => return WatcherExit::SignalsClosed,
                Wake::Signal(Some(Err(e))) => {
                    warn!(path = %self.file.path().display(), error = %e, "change signal error");
                    self.report(DiagnosticKind::Signal, &e);
                }
                Wake::Signal(Some(Ok(_))) | Wake::Recheck => {
                    if let Some(exit) = self.read_and_forward().await {
                        return exit;
                    }
                }
            }
        }
    }

    /// Reads until the file has no complete lines left, forwarding each batch.
    async fn read_and_forward(&mut self) -> Option<WatcherExit> {
        self.recheck = None;

        loop {
            let lines = match self.file.read_new_lines().await {
                Ok(lines) => lines,
                Err(e) if e.is_unrecoverable() => {
                    error!(path = %self.file.path().display(), error = %e, "giving up on file");
                    self.report(DiagnosticKind::Unrecoverable, &e);
                    return Some(WatcherExit::FileRemoved);
                }
                Err(e) if e.is_missing() => {
                    // Likely mid-rotation. Look again once the grace period
                    // runs out even if no signal shows up.
                    info!(
                        path = %self.file.path().display(),
                        "file missing, waiting for it to reappear"
                    );
                    self.recheck = Some(Instant::now() + self.file.rotation_grace());
                    return None;
                }
                Err(e) => {
                    warn!(path = %self.file.path().display(), error = %e, "read failed, will retry");
                    self.report(DiagnosticKind::Read, &e);
                    return None;
                }
            };

            if let Some(exit) = self.forward(lines).await {
                return Some(exit);
            }

            if !self.file.has_backlog() {
                return None;
            }
        }
    }

    async fn forward(&mut self, lines: Vec<String>) -> Option<WatcherExit> {
        let timestamp = Utc::now();
        for line in lines {
            let event = LogEvent::new(self.file.path().to_path_buf(), line, timestamp);

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Some(WatcherExit::Cancelled),
                sent = self.events.send(event) => {
                    if sent.is_err() {
                        return Some(WatcherExit::OutputClosed);
                    }
                }
            }
        }

        None
    }

    fn report(&self, kind: DiagnosticKind, err: &dyn std::fmt::Display) {
        let diagnostic = Diagnostic::new(self.file.path(), kind, err);
        if self.diagnostics.try_send(diagnostic).is_err() {
            debug!(path = %self.file.path().display(), "diagnostics queue full or closed");
        }
    }
}
