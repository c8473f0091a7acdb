//! A library providing incremental, multiplexed tailing for (namely log) files.
//!
//! Every file gets its own watcher task that reads only complete, newly
//! appended lines. All watchers feed one bounded queue, so a slow consumer
//! throttles them instead of letting memory grow.
//!
//! ## Example
//!
//! ```no_run
//! use multitail::{Dispatcher, TailConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), multitail::Error> {
//!     let mut tail = Dispatcher::new(TailConfig::default())
//!         .start(["some/file.log", "/some/other/file.log"])
//!         .await?;
//!
//!     // Wait for each `LogEvent`, which contains the line captured for a
//!     // given source path.
//!     while let Some(event) = tail.next_event().await {
//!         println!("source: {}, line: {}", event.source().display(), event.line());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Caveats
//!
//! Files must exist when tailing starts. A file that shrinks is read again
//! from its first byte, so lines that survive a partial truncation are
//! delivered twice.

mod config;
mod dispatcher;
mod error;
mod event;
mod signal;
mod tracked;
mod watcher;

pub use config::{
    SignalMode, StartPosition, TailConfig, DEFAULT_DIAGNOSTIC_CAPACITY, DEFAULT_EVENT_CAPACITY,
    DEFAULT_POLL_INTERVAL, DEFAULT_ROTATION_GRACE,
};
pub use dispatcher::{Dispatcher, Tail};
pub use error::{ConfigError, Error, OpenError, ReadError, SignalError};
pub use event::{Diagnostic, DiagnosticKind, LogEvent};
pub use signal::{
    ChangeSignal, NotifySignals, NotifySource, PollSignals, PollSource, Signals, Subscribe,
};
pub use tracked::TrackedFile;
pub use watcher::{Watcher, WatcherExit, WatcherReport};

#[cfg(doctest)]
doc_comment::doctest!("../README.md");
