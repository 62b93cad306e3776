//! Helpers shared by the runtime's unit tests.
//!
//! Bodies run on their own threads, so shared state goes through `Arc`ed
//! atomics. Every test that blocks on the engine holds a watchdog so a hang
//! aborts instead of stalling the test run.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::runtime::watchdog::Watchdog;

/// Aborts the test process if the test does not finish in time.
pub(crate) fn guard() -> Watchdog {
    Watchdog::new(Duration::from_secs(10)).unwrap()
}

/// A counter shared between a test and the bodies it spawns.
#[derive(Debug, Clone, Default)]
pub(crate) struct Counter(Arc<AtomicI64>);

impl Counter {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn get(&self) -> i64 {
        self.0.load(Ordering::SeqCst)
    }

    pub(crate) fn set(
        &self,
        value: i64,
    ) {
        self.0.store(value, Ordering::SeqCst);
    }

    pub(crate) fn incr(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

pub(crate) fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}
