//! Time sources for system timestamps.
//!
//! The store stamps every inserted document with a creation time, and
//! applications stamp last-changed fields for conflict resolution. Both read
//! the same injected [`Clock`] so tests can drive time deterministically.

use crate::Timestamp;
use std::cell::Cell;
use std::fmt;

/// A source of wall-clock timestamps in milliseconds since the Unix epoch.
pub trait Clock: fmt::Debug {
    /// Current time.
    fn now(&self) -> Timestamp;
}

/// Reads the system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        // Pre-epoch clocks clamp to zero.
        chrono::Utc::now().timestamp_millis().max(0) as Timestamp
    }
}

/// A manually driven clock.
///
/// Every call to [`Clock::now`] returns the current value and then advances
/// it by `step`, so consecutive reads are strictly increasing unless the step
/// is zero.
#[derive(Debug)]
pub struct ManualClock {
    current: Cell<Timestamp>,
    step: Timestamp,
}

impl ManualClock {
    /// Create a clock starting at `start` that advances by one per read.
    pub fn new(start: Timestamp) -> Self {
        Self::with_step(start, 1)
    }

    /// Create a clock with an explicit step.
    pub fn with_step(start: Timestamp, step: Timestamp) -> Self {
        Self {
            current: Cell::new(start),
            step,
        }
    }

    /// Jump to a specific time.
    pub fn set(&self, at: Timestamp) {
        self.current.set(at);
    }

    /// Peek at the next value without advancing.
    pub fn peek(&self) -> Timestamp {
        self.current.get()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        let now = self.current.get();
        self.current.set(now.saturating_add(self.step));
        now
    }
}
