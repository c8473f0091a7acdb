//! Fan-in of many watchers into one ordered event stream.

use std::collections::HashSet;
use std::fmt::{self, Debug, Formatter};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::task;

use futures_util::stream::Stream as FuturesStream;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::{SignalMode, TailConfig};
use crate::error::{ConfigError, Error, OpenError};
use crate::event::{Diagnostic, DiagnosticKind, LogEvent};
use crate::signal::{absolutify, NotifySource, PollSource, Signals, Subscribe};
use crate::tracked::TrackedFile;
use crate::watcher::{Watcher, WatcherReport};

/// Starts one [`Watcher`] per file and merges their output.
///
/// Lines from one file arrive in file order. Lines from different files may
/// interleave in any order.
#[derive(Clone)]
pub struct Dispatcher {
    config: TailConfig,
    source: Arc<dyn Subscribe>,
}

impl Debug for Dispatcher {
    fn fmt(&self, f: &mut Formatter) -> Result<(), fmt::Error> {
        f.debug_struct("Dispatcher")
            .field("config", &self.config)
            .finish()
    }
}

impl Dispatcher {
    /// Uses the signal source named by `config.signal`.
    pub fn new(config: TailConfig) -> Self {
        let source: Arc<dyn Subscribe> = match config.signal {
            SignalMode::Notify => Arc::new(NotifySource::new()),
            SignalMode::Poll(period) => Arc::new(PollSource::new(period)),
        };

        Dispatcher { config, source }
    }

    /// Uses a caller-provided signal source; `config.signal` is ignored.
    pub fn with_source(config: TailConfig, source: impl Subscribe + 'static) -> Self {
        Dispatcher {
            config,
            source: Arc::new(source),
        }
    }

    pub fn config(&self) -> &TailConfig {
        &self.config
    }

    /// Opens every path and starts watching those that opened.
    ///
    /// Files that fail to open are reported and skipped. Only an empty path
    /// list, a bad configuration, or every file failing is an error.
    pub async fn start<I, P>(&self, paths: I) -> Result<Tail, Error>
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        let paths: Vec<PathBuf> = paths.into_iter().map(Into::into).collect();
        if paths.is_empty() {
            return Err(ConfigError::NoFiles.into());
        }
        self.config.validate()?;

        let (events_tx, events_rx) = mpsc::channel(self.config.event_capacity);
        let (diag_tx, diag_rx) = mpsc::channel(self.config.diagnostic_capacity);
        let cancel = CancellationToken::new();

        let mut watchers = JoinSet::new();
        let mut watched = Vec::new();
        let mut failures = Vec::new();
        let mut seen = HashSet::new();

        for path in paths {
            // Make sure we aren't already watching the file
            let key = absolutify(&path).unwrap_or_else(|_| path.clone());
            if !seen.insert(key) {
                continue;
            }

            match self.open(&path).await {
                Ok((file, signals)) => {
                    let watcher = Watcher::new(
                        file,
                        signals,
                        events_tx.clone(),
                        diag_tx.clone(),
                        cancel.child_token(),
                    );
                    info!(path = %path.display(), "tailing file");
                    watchers.spawn(watcher.run());
                    watched.push(path);
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping file");
                    let _ = diag_tx.try_send(Diagnostic::new(&path, DiagnosticKind::Open, &e));
                    failures.push(e);
                }
            }
        }

        if watched.is_empty() {
            return Err(Error::NoFilesOpened(failures));
        }

        Ok(Tail {
            events: events_rx,
            diagnostics: diag_rx,
            watchers,
            cancel,
            watched,
            failures,
        })
    }

    async fn open(&self, path: &Path) -> Result<(TrackedFile, Signals), OpenError> {
        let file = TrackedFile::open(path, self.config.start)
            .await?
            .with_rotation_grace(self.config.rotation_grace);
        let signals = self
            .source
            .subscribe(path)
            .map_err(|source| OpenError::Subscribe {
                path: path.to_path_buf(),
                source,
            })?;

        Ok((file, signals))
    }
}

/// A running set of watchers and the receiving end of their output.
///
/// The event stream ends once every watcher has stopped. Dropping the handle
/// without [`shutdown`](Tail::shutdown) aborts the watchers.
pub struct Tail {
    events: mpsc::Receiver<LogEvent>,
    diagnostics: mpsc::Receiver<Diagnostic>,
    watchers: JoinSet<WatcherReport>,
    cancel: CancellationToken,
    watched: Vec<PathBuf>,
    failures: Vec<OpenError>,
}

impl Debug for Tail {
    fn fmt(&self, f: &mut Formatter) -> Result<(), fmt::Error> {
        f.debug_struct("Tail")
            .field("watched", &self.watched)
            .field("failures", &self.failures)
            .field("running", &self.watchers.len())
            .finish()
    }
}

impl Tail {
    /// Next captured line, or `None` once every watcher has stopped.
    pub async fn next_event(&mut self) -> Option<LogEvent> {
        self.events.recv().await
    }

    /// Next per-file diagnostic. Waits while any watcher may still report.
    pub async fn next_diagnostic(&mut self) -> Option<Diagnostic> {
        self.diagnostics.recv().await
    }

    pub fn try_next_diagnostic(&mut self) -> Option<Diagnostic> {
        self.diagnostics.try_recv().ok()
    }

    /// Paths being tailed, as given.
    pub fn watched(&self) -> &[PathBuf] {
        &self.watched
    }

    /// Files skipped because they could not be opened.
    pub fn open_failures(&self) -> &[OpenError] {
        &self.failures
    }

    /// Token that stops every watcher when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stops every watcher and waits for them to release their files.
    pub async fn shutdown(mut self) -> Vec<WatcherReport> {
        self.cancel.cancel();
        self.events.close();
        self.join_watchers().await
    }

    /// Waits for every watcher to stop on its own.
    ///
    /// Events are not drained here, so a full queue keeps watchers waiting
    /// until the token is cancelled.
    pub async fn join(mut self) -> Vec<WatcherReport> {
        self.join_watchers().await
    }

    async fn join_watchers(&mut self) -> Vec<WatcherReport> {
        let mut reports = Vec::with_capacity(self.watchers.len());
        while let Some(res) = self.watchers.join_next().await {
            match res {
                Ok(report) => reports.push(report),
                Err(e) => error!(error = %e, "watcher task failed"),
            }
        }
        reports
    }
}

impl FuturesStream for Tail {
    type Item = LogEvent;

    fn poll_next(
        mut self: Pin<&mut Self>,
        cx: &mut task::Context<'_>,
    ) -> task::Poll<Option<Self::Item>> {
        self.events.poll_recv(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_no_files() {
        let dispatcher = Dispatcher::new(TailConfig::default());
        let err = dispatcher.start(Vec::<PathBuf>::new()).await.unwrap_err();
        assert!(matches!(err, Error::Config(ConfigError::NoFiles)));
    }

    #[tokio::test]
    async fn test_all_files_missing() {
        let tmp_dir = TempDir::new().unwrap();
        let dispatcher = Dispatcher::new(TailConfig::default());

        let err = dispatcher
            .start([tmp_dir.path().join("a.log"), tmp_dir.path().join("b.log")])
            .await
            .unwrap_err();
        match err {
            Error::NoFilesOpened(failures) => assert_eq!(failures.len(), 2),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_partial_open_and_dedup() {
        let tmp_dir = TempDir::new().unwrap();
        let present = tmp_dir.path().join("a.log");
        std::fs::write(&present, b"").unwrap();

        let config = TailConfig::default().with_signal(SignalMode::Poll(Duration::from_millis(20)));
        let mut tail = Dispatcher::new(config)
            .start([
                present.clone(),
                present.clone(),
                tmp_dir.path().join("missing.log"),
            ])
            .await
            .unwrap();

        assert_eq!(tail.watched(), &[present.clone()]);
        assert_eq!(tail.open_failures().len(), 1);
        assert!(matches!(
            tail.open_failures()[0],
            OpenError::NotFound { .. }
        ));

        let diag = tail.try_next_diagnostic().unwrap();
        assert_eq!(diag.kind, DiagnosticKind::Open);

        let reports = tail.shutdown().await;
        assert_eq!(reports.len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_config() {
        let tmp_dir = TempDir::new().unwrap();
        let path = tmp_dir.path().join("a.log");
        std::fs::write(&path, b"").unwrap();

        let config = TailConfig::default().with_event_capacity(0);
        let err = Dispatcher::new(config).start([path]).await.unwrap_err();
        assert!(matches!(err, Error::Config(ConfigError::ZeroCapacity(_))));
    }

    #[tokio::test]
    async fn test_notify_default_follows_rename() {
        let tmp_dir = TempDir::new().unwrap();
        let path = tmp_dir.path().join("a.log");
        std::fs::write(&path, b"").unwrap();

        let mut tail = Dispatcher::new(TailConfig::default())
            .start([path.clone()])
            .await
            .unwrap();

        std::fs::rename(&path, tmp_dir.path().join("a.log.1")).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        std::fs::write(&path, b"after\n").unwrap();

        let event = tokio::time::timeout(Duration::from_secs(2), tail.next_event())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.line(), "after");
        assert!(tail.try_next_diagnostic().is_none());

        tail.shutdown().await;
    }
}
