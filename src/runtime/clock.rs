//! Time sources for the scheduler.
//!
//! The group never reads the wall clock directly; it asks its [`Clock`].
//! Tests swap in a [`MockClock`] and advance it by hand.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Supplies "now" to a group.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Current instant.
    fn now(&self) -> Instant;
}

/// Real monotonic time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    #[inline]
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct MockClock {
    base: Instant,
    offset: Mutex<Duration>,
}

impl MockClock {
    /// Create a mock clock frozen at the current instant.
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    /// Create a shared mock clock.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Move the clock forward.
    pub fn add(
        &self,
        d: Duration,
    ) {
        *self.offset.lock() += d;
    }

    /// Set the distance from the starting instant. Moving backwards is allowed.
    pub fn set_offset(
        &self,
        d: Duration,
    ) {
        *self.offset.lock() = d;
    }

    /// Total time added so far.
    pub fn elapsed(&self) -> Duration {
        *self.offset.lock()
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MockClock {
    fn now(&self) -> Instant {
        self.base + *self.offset.lock()
    }
}
