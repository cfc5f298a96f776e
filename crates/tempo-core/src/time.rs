//! Time sources for the three loops
//!
//! - `Timestamp` - Monotonic milliseconds stamped on inputs and snapshots
//! - `Clock` - Anything that can report elapsed time
//! - `MonotonicClock` - Wall clock backed by `Instant`
//! - `ManualClock` - Externally advanced clock for deterministic drivers and tests

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Monotonic time in milliseconds since the owning clock started
pub type Timestamp = u32;

/// A source of elapsed time
pub trait Clock: Send + Sync {
    /// Time elapsed since the clock was started
    fn elapsed(&self) -> Duration;

    /// Elapsed time truncated to whole milliseconds
    fn now_ms(&self) -> Timestamp {
        self.elapsed().as_millis().min(Timestamp::MAX as u128) as Timestamp
    }
}

/// Clock backed by `std::time::Instant`
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    start: Instant,
}

impl MonotonicClock {
    /// Start a new clock at zero
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

/// A clock that only moves when told to
///
/// Clones share the same underlying time, so a test can hold one handle and
/// advance it while a loop owns another.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    micros: Arc<AtomicU64>,
}

impl ManualClock {
    /// Create a clock at zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Move the clock forward
    pub fn advance(&self, by: Duration) {
        self.micros
            .fetch_add(by.as_micros() as u64, Ordering::Relaxed);
    }

    /// Move the clock forward by whole milliseconds
    pub fn advance_ms(&self, ms: u64) {
        self.advance(Duration::from_millis(ms));
    }

    /// Jump to an absolute time; going backwards is ignored
    pub fn set(&self, at: Duration) {
        self.micros
            .fetch_max(at.as_micros() as u64, Ordering::Relaxed);
    }
}

impl Clock for ManualClock {
    fn elapsed(&self) -> Duration {
        Duration::from_micros(self.micros.load(Ordering::Relaxed))
    }
}
