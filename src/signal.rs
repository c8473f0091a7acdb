//! Sources of "this path may have new content" signals.
//!
//! A watcher only ever sees a [`Signals`] stream, so polling and OS
//! notification are interchangeable behind [`Subscribe`].

use std::fmt::{self, Debug, Formatter};
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::task;
use std::time::Duration;

use futures_util::ready;
use futures_util::stream::Stream as FuturesStream;
use notify::event::{AccessKind, AccessMode};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher as _};
use pin_project_lite::pin_project;
use tokio::sync::mpsc;
use tokio::time::{sleep, Instant, Sleep};
use tracing::trace;

use crate::error::SignalError;

/// Notification that a watched path may have changed. Carries nothing else.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct ChangeSignal {
    path: PathBuf,
}

impl ChangeSignal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        ChangeSignal { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        self.path.as_path()
    }
}

/// Per-path stream of signals. An `Err` item is reported and skipped; the
/// stream ending means no more signals will ever arrive.
pub type Signals = Pin<Box<dyn FuturesStream<Item = Result<ChangeSignal, SignalError>> + Send>>;

/// Capability to attach a dedicated signal stream to one path.
pub trait Subscribe: Send + Sync {
    fn subscribe(&self, path: &Path) -> Result<Signals, SignalError>;
}

/// Signals every `period`, whether or not anything changed.
#[derive(Clone, Copy, Debug)]
pub struct PollSource {
    period: Duration,
}

impl PollSource {
    pub fn new(period: Duration) -> Self {
        PollSource { period }
    }
}

impl Subscribe for PollSource {
    fn subscribe(&self, path: &Path) -> Result<Signals, SignalError> {
        Ok(Box::pin(PollSignals::new(path, self.period)))
    }
}

pin_project! {
/// Fixed-interval signal stream.
///
/// The next tick is always scheduled a full period after the previous one
/// was taken, so ticks missed during a slow read are skipped rather than
/// delivered as a burst.
pub struct PollSignals {
    path: PathBuf,
    period: Duration,
    #[pin]
    sleep: Sleep,
}
}

impl PollSignals {
    pub fn new(path: impl Into<PathBuf>, period: Duration) -> Self {
        PollSignals {
            path: path.into(),
            period,
            sleep: sleep(period),
        }
    }
}

impl Debug for PollSignals {
    fn fmt(&self, f: &mut Formatter) -> Result<(), fmt::Error> {
        f.debug_struct("PollSignals")
            .field("path", &self.path)
            .field("period", &self.period)
            .finish()
    }
}

impl FuturesStream for PollSignals {
    type Item = Result<ChangeSignal, SignalError>;

    fn poll_next(
        self: Pin<&mut Self>,
        cx: &mut task::Context<'_>,
    ) -> task::Poll<Option<Self::Item>> {
        let mut this = self.project();

        ready!(this.sleep.as_mut().poll(cx));
        let next = Instant::now() + *this.period;
        this.sleep.reset(next);

        task::Poll::Ready(Some(Ok(ChangeSignal::new(this.path.clone()))))
    }
}

/// OS-level change notification, one [`notify`] watcher per path.
#[derive(Clone, Copy, Debug, Default)]
pub struct NotifySource;

impl NotifySource {
    pub fn new() -> Self {
        NotifySource
    }
}

impl Subscribe for NotifySource {
    fn subscribe(&self, path: &Path) -> Result<Signals, SignalError> {
        Ok(Box::pin(NotifySignals::new(path)?))
    }
}

/// Signal stream proxied from a [`notify::RecommendedWatcher`].
///
/// The watch sits on the parent directory and events are filtered down to the
/// file name, so a file replaced by rotation keeps signalling. Dropping the
/// stream drops the watcher, which stops the OS watch.
pub struct NotifySignals {
    path: PathBuf,
    target: PathBuf,
    _inner: RecommendedWatcher,
    event_stream: mpsc::UnboundedReceiver<Result<notify::Event, notify::Error>>,
}

impl Debug for NotifySignals {
    fn fmt(&self, f: &mut Formatter) -> Result<(), fmt::Error> {
        f.debug_struct("NotifySignals")
            .field("path", &self.path)
            .field("target", &self.target)
            .finish()
    }
}

impl NotifySignals {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, SignalError> {
        let path = path.into();
        let target = absolutify(&path).map_err(|e| SignalError::Notify {
            path: path.clone(),
            source: notify::Error::io(e),
        })?;
        let parent = match target.parent() {
            Some(parent) => parent.to_path_buf(),
            None => {
                return Err(SignalError::Source {
                    path,
                    message: "file needs a parent directory".to_string(),
                })
            }
        };

        let (tx, rx) = mpsc::unbounded_channel();

        let mut inner = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            // The only way `send` can fail is if the receiver is dropped,
            // which only happens while the watcher itself is being dropped.
            let _ = tx.send(res);
        })
        .map_err(|source| SignalError::Notify {
            path: path.clone(),
            source,
        })?;

        inner
            .watch(&parent, RecursiveMode::NonRecursive)
            .map_err(|source| SignalError::Notify {
                path: path.clone(),
                source,
            })?;

        Ok(NotifySignals {
            path,
            target,
            _inner: inner,
            event_stream: rx,
        })
    }

    fn concerns_target(&self, event: &notify::Event) -> bool {
        event.paths.iter().any(|path| path == &self.target)
    }
}

/// Whether an event kind can mean new, shrunk, or vanished content.
fn warrants_read(kind: &EventKind) -> bool {
    match kind {
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_) | EventKind::Any => {
            true
        }
        EventKind::Access(AccessKind::Close(AccessMode::Write)) => true,
        EventKind::Access(_) | EventKind::Other => false,
    }
}

impl FuturesStream for NotifySignals {
    type Item = Result<ChangeSignal, SignalError>;

    fn poll_next(
        mut self: Pin<&mut Self>,
        cx: &mut task::Context<'_>,
    ) -> task::Poll<Option<Self::Item>> {
        loop {
            let res = match ready!(self.event_stream.poll_recv(cx)) {
                Some(res) => res,
                None => return task::Poll::Ready(None),
            };

            match res {
                Ok(event) => {
                    if warrants_read(&event.kind) && self.concerns_target(&event) {
                        return task::Poll::Ready(Some(Ok(ChangeSignal::new(self.path.clone()))));
                    }
                    trace!(path = %self.path.display(), kind = ?event.kind, "ignored event");
                }
                Err(source) => {
                    return task::Poll::Ready(Some(Err(SignalError::Notify {
                        path: self.path.clone(),
                        source,
                    })));
                }
            }
        }
    }
}

/// Joins the file name onto its canonicalized parent directory.
///
/// The file itself is not resolved, so the result keeps naming whatever file
/// sits at that name after a rotation.
pub(crate) fn absolutify(path: &Path) -> io::Result<PathBuf> {
    let (parent, filename) = match (path.parent(), path.file_name()) {
        (Some(parent), Some(filename)) => (parent, filename),
        _ => {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                "Filename not found in path",
            ))
        }
    };

    let dir = if parent == Path::new("") {
        std::env::current_dir()?
    } else {
        parent.to_path_buf()
    };

    let dir = dir.canonicalize().unwrap_or(dir);

    Ok(dir.join(filename))
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream::StreamExt;
    use notify::event::{CreateKind, DataChange, ModifyKind};
    use std::io::Write;
    use tempfile::TempDir;
    use tokio::time::timeout;

    #[test]
    fn test_warrants_read() {
        assert!(warrants_read(&EventKind::Create(CreateKind::File)));
        assert!(warrants_read(&EventKind::Modify(ModifyKind::Data(
            DataChange::Content
        ))));
        assert!(warrants_read(&EventKind::Access(AccessKind::Close(
            AccessMode::Write
        ))));
        assert!(!warrants_read(&EventKind::Access(AccessKind::Read)));
        assert!(!warrants_read(&EventKind::Other));
    }

    #[tokio::test]
    async fn test_poll_signals_tick() {
        let mut signals = PollSource::new(Duration::from_millis(10))
            .subscribe(Path::new("a.log"))
            .unwrap();

        for _ in 0..3 {
            let signal = timeout(Duration::from_secs(1), signals.next())
                .await
                .unwrap()
                .unwrap()
                .unwrap();
            assert_eq!(signal.path(), Path::new("a.log"));
        }
    }

    #[test]
    fn test_absolutify() {
        let tmp_dir = TempDir::new().unwrap();
        let tmp_dir_path = tmp_dir.path().canonicalize().unwrap();

        let path = tmp_dir.path().join("sub").join("..").join("a.log");
        std::fs::create_dir(tmp_dir.path().join("sub")).unwrap();
        assert_eq!(absolutify(&path).unwrap(), tmp_dir_path.join("a.log"));

        // A path ending in `..` names a directory, not a file
        assert!(absolutify(&tmp_dir.path().join("..")).is_err());
    }

    #[tokio::test]
    async fn test_notify_missing_directory() {
        let tmp_dir = TempDir::new().unwrap();
        let path = tmp_dir.path().join("missing").join("a.log");

        assert!(NotifySource::new().subscribe(&path).is_err());
    }

    #[tokio::test]
    async fn test_notify_signals_on_write() {
        let tmp_dir = TempDir::new().unwrap();
        let path = tmp_dir.path().join("a.log");
        std::fs::write(&path, b"").unwrap();

        let mut signals = NotifySource::new().subscribe(&path).unwrap();

        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"foo\n").unwrap();
        file.sync_all().unwrap();

        let signal = timeout(Duration::from_secs(2), signals.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(signal.path(), path.as_path());
    }

    #[tokio::test]
    async fn test_notify_ignores_siblings_follows_replacement() {
        let tmp_dir = TempDir::new().unwrap();
        let path = tmp_dir.path().join("a.log");
        let sibling = tmp_dir.path().join("b.log");
        std::fs::write(&path, b"").unwrap();
        std::fs::write(&sibling, b"").unwrap();

        let mut signals = NotifySource::new().subscribe(&path).unwrap();

        std::fs::write(&sibling, b"noise\n").unwrap();
        assert!(timeout(Duration::from_millis(200), signals.next())
            .await
            .is_err());

        // Replace the file; writes to the new one must still signal.
        std::fs::rename(&path, tmp_dir.path().join("a.log.1")).unwrap();
        std::fs::write(&path, b"").unwrap();
        while timeout(Duration::from_millis(200), signals.next())
            .await
            .is_ok()
        {}

        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"bar\n").unwrap();
        file.sync_all().unwrap();

        let signal = timeout(Duration::from_secs(2), signals.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(signal.path(), path.as_path());
    }
}
