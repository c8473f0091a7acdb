//! Run-wide settings, fixed before any watcher starts.

use std::time::Duration;

use crate::error::ConfigError;

/// Interval used when polling is requested without an explicit period.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// How long a path may name no file before its watcher gives up on it.
pub const DEFAULT_ROTATION_GRACE: Duration = Duration::from_secs(1);

pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

pub const DEFAULT_DIAGNOSTIC_CAPACITY: usize = 64;

/// Where a freshly opened file starts delivering from.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum StartPosition {
    /// Deliver the existing content once, then follow appends.
    Beginning,
    /// Deliver only content appended after the file was opened.
    #[default]
    End,
}

/// How "this file may have changed" signals are produced.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum SignalMode {
    /// OS file-change notification, driven by [`notify`](https://crates.io/crates/notify).
    #[default]
    Notify,
    /// Signal unconditionally at a fixed interval.
    Poll(Duration),
}

/// Settings for a [`Dispatcher`](crate::Dispatcher).
///
/// ```
/// use multitail::{SignalMode, StartPosition, TailConfig};
/// use std::time::Duration;
///
/// let config = TailConfig::default()
///     .with_start(StartPosition::Beginning)
///     .with_signal(SignalMode::Poll(Duration::from_millis(250)))
///     .with_event_capacity(256);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TailConfig {
    pub start: StartPosition,
    pub signal: SignalMode,
    /// Bound of the shared event queue. A full queue stalls watchers.
    pub event_capacity: usize,
    /// Bound of the diagnostics queue. Diagnostics are dropped when full.
    pub diagnostic_capacity: usize,
    /// Time a rotated-away file has to reappear. Zero gives up on the first
    /// read that finds the path empty.
    pub rotation_grace: Duration,
}

impl Default for TailConfig {
    fn default() -> Self {
        TailConfig {
            start: StartPosition::default(),
            signal: SignalMode::default(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
            diagnostic_capacity: DEFAULT_DIAGNOSTIC_CAPACITY,
            rotation_grace: DEFAULT_ROTATION_GRACE,
        }
    }
}

impl TailConfig {
    pub fn with_start(mut self, start: StartPosition) -> Self {
        self.start = start;
        self
    }

    pub fn with_signal(mut self, signal: SignalMode) -> Self {
        self.signal = signal;
        self
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    pub fn with_diagnostic_capacity(mut self, capacity: usize) -> Self {
        self.diagnostic_capacity = capacity;
        self
    }

    pub fn with_rotation_grace(mut self, grace: Duration) -> Self {
        self.rotation_grace = grace;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.event_capacity == 0 {
            return Err(ConfigError::ZeroCapacity("event"));
        }
        if self.diagnostic_capacity == 0 {
            return Err(ConfigError::ZeroCapacity("diagnostic"));
        }
        if let SignalMode::Poll(period) = self.signal {
            if period.is_zero() {
                return Err(ConfigError::ZeroPollInterval);
            }
        }
        Ok(())
    }
}
