//! Incremental reading of a single growing file.

use std::fs::Metadata;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tokio::fs::{metadata, File};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncSeekExt, BufReader};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::config::{StartPosition, DEFAULT_ROTATION_GRACE};
use crate::error::{OpenError, ReadError};

/// Bytes of complete lines handed out by one read at most.
const READ_BUDGET: u64 = 1024 * 1024;

/// Identity of the file behind a path, used to notice replacement on rotation.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
struct FileId {
    dev: u64,
    ino: u64,
}

#[cfg(unix)]
fn file_id(meta: &Metadata) -> Option<FileId> {
    use std::os::unix::fs::MetadataExt;

    Some(FileId {
        dev: meta.dev(),
        ino: meta.ino(),
    })
}

#[cfg(not(unix))]
fn file_id(_meta: &Metadata) -> Option<FileId> {
    None
}

/// Size and mtime as of the last read, to skip reads when nothing changed.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
struct Snapshot {
    size: u64,
    modified: Option<SystemTime>,
}

impl Snapshot {
    fn of(meta: &Metadata) -> Self {
        Snapshot {
            size: meta.len(),
            modified: meta.modified().ok(),
        }
    }
}

async fn open_handle(path: &Path) -> io::Result<(File, Metadata)> {
    let handle = File::open(path).await?;
    let meta = handle.metadata().await?;

    Ok((handle, meta))
}

/// A file being tailed, with the byte offset up to which lines were delivered.
///
/// The offset always sits at the end of the last complete line handed out, so
/// a line still being written is re-read once its terminator lands.
#[derive(Debug)]
pub struct TrackedFile {
    path: PathBuf,
    handle: Option<File>,
    id: Option<FileId>,
    offset: u64,
    last_seen: Option<Snapshot>,
    backlog: bool,
    missing_since: Option<Instant>,
    rotation_grace: Duration,
    read_budget: u64,
}

impl TrackedFile {
    /// Opens `path` for reading, starting at either end of its current content.
    pub async fn open(path: impl Into<PathBuf>, start: StartPosition) -> Result<Self, OpenError> {
        let path = path.into();

        let (handle, meta) = match open_handle(&path).await {
            Ok(opened) => opened,
            Err(e) => return Err(OpenError::from_io(path, e)),
        };

        if !meta.is_file() {
            return Err(OpenError::NotAFile { path });
        }

        let offset = match start {
            StartPosition::Beginning => 0,
            StartPosition::End => meta.len(),
        };

        debug!(path = %path.display(), offset, "opened tracked file");

        Ok(TrackedFile {
            path,
            handle: Some(handle),
            id: file_id(&meta),
            offset,
            last_seen: None,
            backlog: false,
            missing_since: None,
            rotation_grace: DEFAULT_ROTATION_GRACE,
            read_budget: READ_BUDGET,
        })
    }

    /// Sets how long the path may name no file before reads report
    /// [`ReadError::Removed`].
    pub fn with_rotation_grace(mut self, grace: Duration) -> Self {
        self.rotation_grace = grace;
        self
    }

    #[cfg(test)]
    pub(crate) fn with_read_budget(mut self, budget: u64) -> Self {
        self.read_budget = budget;
        self
    }

    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    /// Byte position up to which content has been delivered.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn rotation_grace(&self) -> Duration {
        self.rotation_grace
    }

    /// Whether the last read stopped early with complete lines left over.
    pub fn has_backlog(&self) -> bool {
        self.backlog
    }

    pub fn is_open(&self) -> bool {
        self.handle.is_some()
    }

    /// Reads complete lines appended since the previous call.
    ///
    /// A shrunken or replaced file restarts from byte 0. Bytes after the last
    /// `\n` are left unread until they are terminated. Lines that happened to
    /// survive a truncation are delivered again. One call hands out about
    /// a megabyte of lines at most; [`has_backlog`](Self::has_backlog) tells
    /// whether to call again.
    ///
    /// A path that names no file yields [`ReadError::Missing`] until the
    /// rotation grace has passed since the first miss, then
    /// [`ReadError::Removed`].
    pub async fn read_new_lines(&mut self) -> Result<Vec<String>, ReadError> {
        match self.read_complete_lines().await {
            Ok(lines) => {
                self.missing_since = None;
                Ok(lines)
            }
            Err(ReadError::Missing { path, source }) => {
                let since = *self.missing_since.get_or_insert_with(Instant::now);
                if since.elapsed() >= self.rotation_grace {
                    Err(ReadError::Removed { path, source })
                } else {
                    Err(ReadError::Missing { path, source })
                }
            }
            Err(e) => Err(e),
        }
    }

    async fn read_complete_lines(&mut self) -> Result<Vec<String>, ReadError> {
        if self.handle.is_none() {
            return Err(ReadError::Closed {
                path: self.path.clone(),
            });
        }

        let current = metadata(&self.path)
            .await
            .map_err(|e| ReadError::from_io(&self.path, e))?;
        let size = current.len();
        let snapshot = Snapshot::of(&current);

        let replaced = match (self.id, file_id(&current)) {
            (Some(old), Some(new)) => old != new,
            _ => false,
        };

        if replaced || size < self.offset {
            info!(
                path = %self.path.display(),
                offset = self.offset,
                size,
                replaced,
                "file truncated or rotated, reading from start"
            );
            self.reopen().await?;
        } else if !self.backlog && self.last_seen == Some(snapshot) {
            return Ok(Vec::new());
        }

        self.last_seen = Some(snapshot);
        self.backlog = false;

        let offset = self.offset;
        if size <= offset {
            return Ok(Vec::new());
        }

        let handle = match self.handle.as_mut() {
            Some(handle) => handle,
            None => {
                return Err(ReadError::Closed {
                    path: self.path.clone(),
                })
            }
        };

        handle
            .seek(io::SeekFrom::Start(offset))
            .await
            .map_err(|e| ReadError::from_io(&self.path, e))?;

        let remaining = size - offset;
        let mut reader = BufReader::new(handle.take(remaining));
        let mut lines = Vec::new();
        let mut consumed = 0u64;
        let mut buf = Vec::new();

        while consumed < self.read_budget {
            buf.clear();
            let n = reader
                .read_until(b'\n', &mut buf)
                .await
                .map_err(|e| ReadError::from_io(&self.path, e))?;

            // Nothing left, or an unterminated tail that stays for next time.
            if n == 0 || buf.last() != Some(&b'\n') {
                break;
            }

            consumed += n as u64;
            lines.push(decode_line(&buf));
        }

        self.offset = offset + consumed;
        self.backlog = consumed >= self.read_budget && consumed < remaining;

        Ok(lines)
    }

    /// Swaps the handle for a fresh one on whatever `path` names now.
    async fn reopen(&mut self) -> Result<(), ReadError> {
        let (handle, meta) = open_handle(&self.path)
            .await
            .map_err(|e| ReadError::from_io(&self.path, e))?;

        self.handle = Some(handle);
        self.id = file_id(&meta);
        self.offset = 0;
        self.backlog = false;

        Ok(())
    }

    /// Releases the handle. Calling it again does nothing.
    pub fn close(&mut self) {
        if self.handle.take().is_some() {
            debug!(path = %self.path.display(), offset = self.offset, "closed tracked file");
        }
    }
}

/// Strips the terminator (and a `\r` before it) and decodes lossily.
fn decode_line(line: &[u8]) -> String {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    let line = line.strip_suffix(b"\r").unwrap_or(line);

    String::from_utf8_lossy(line).into_owned()
}
