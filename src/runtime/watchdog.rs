//! Liveness monitor for a tick loop.
//!
//! The driver calls [`Watchdog::reset`] once per tick. If no reset arrives
//! within the timeout the monitor treats the scheduler as stuck: by default
//! it logs a stall report and aborts the process, since a group blocked on a
//! body that never yields cannot be recovered.

use std::fmt;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, Sender};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::error::RuntimeResult;
use crate::runtime::scheduler::{Group, GroupStatsSnapshot, SlotSnapshot, WeakGroup};

/// Watchdog configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchdogConfig {
    /// Whether the driver should run a watchdog at all.
    pub enabled: bool,
    /// Time allowed between resets, in milliseconds.
    pub timeout_ms: u64,
}

impl WatchdogConfig {
    /// The timeout as a duration.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_ms: 1000,
        }
    }
}

/// What the monitor knew when it gave up.
///
/// Coroutine stacks live on their own threads and cannot be captured from
/// the monitor, so `slots` stands in for a stack dump: it names every live
/// coroutine and what it is waiting for.
#[derive(Debug)]
pub struct StallReport {
    /// The configured timeout.
    pub timeout: Duration,
    /// Time since the last reset (or since the watchdog started).
    pub since_reset: Duration,
    /// Resets seen before the stall.
    pub resets: u64,
    /// Slot view of the watched group, if one was attached and still alive.
    pub slots: Option<Vec<SlotSnapshot>>,
    /// Counters of the watched group.
    pub stats: Option<GroupStatsSnapshot>,
}

impl fmt::Display for StallReport {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        writeln!(
            f,
            "deadlock detected: no tick for {}ms (timeout {}ms, {} resets seen)",
            self.since_reset.as_millis(),
            self.timeout.as_millis(),
            self.resets
        )?;
        if let Some(stats) = &self.stats {
            writeln!(
                f,
                "group: {} ticks, {} spawned, {} finished, {} events posted",
                stats.ticks, stats.spawned, stats.finished, stats.events_posted
            )?;
        }
        if let Some(slots) = &self.slots {
            for slot in slots {
                writeln!(f, "  {}", slot)?;
            }
        }
        Ok(())
    }
}

type StallHandler = Box<dyn FnOnce(StallReport) + Send + 'static>;

/// Default fatal action: report and abort.
pub fn abort_on_stall(report: StallReport) {
    error!("{}", report);
    eprintln!("{}", report);
    std::process::abort();
}

/// A running liveness monitor.
#[derive(Debug)]
pub struct Watchdog {
    reset_tx: Sender<()>,
    done_tx: Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl Watchdog {
    /// Start a watchdog that aborts the process after `timeout` without a reset.
    pub fn new(timeout: Duration) -> RuntimeResult<Self> {
        Self::start(timeout, WeakGroup::default(), Box::new(abort_on_stall))
    }

    /// Like [`new`](Self::new), and includes `group`'s slots in the report.
    pub fn watching(
        timeout: Duration,
        group: &Group,
    ) -> RuntimeResult<Self> {
        Self::start(timeout, group.downgrade(), Box::new(abort_on_stall))
    }

    /// Start a watchdog that calls `handler` instead of aborting. The monitor
    /// exits after the handler returns.
    pub fn with_handler<H>(
        timeout: Duration,
        group: Option<&Group>,
        handler: H,
    ) -> RuntimeResult<Self>
    where
        H: FnOnce(StallReport) + Send + 'static,
    {
        let group = group.map(Group::downgrade).unwrap_or_default();
        Self::start(timeout, group, Box::new(handler))
    }

    fn start(
        timeout: Duration,
        group: WeakGroup,
        handler: StallHandler,
    ) -> RuntimeResult<Self> {
        let (reset_tx, reset_rx) = channel::bounded(1);
        let (done_tx, done_rx) = channel::bounded(1);
        let handle = thread::Builder::new()
            .name("watchdog".to_string())
            .spawn(move || monitor(timeout, reset_rx, done_rx, group, handler))?;
        debug!(timeout_ms = timeout.as_millis() as u64, "watchdog started");
        Ok(Self {
            reset_tx,
            done_tx,
            handle: Some(handle),
        })
    }

    /// Restart the timeout window. Never blocks; resets that arrive while one
    /// is already pending are merged.
    pub fn reset(&self) {
        let _ = self.reset_tx.try_send(());
    }

    /// Shut the monitor down without triggering it.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let _ = self.done_tx.try_send(());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
            debug!("watchdog stopped");
        }
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn monitor(
    timeout: Duration,
    reset_rx: Receiver<()>,
    done_rx: Receiver<()>,
    group: WeakGroup,
    handler: StallHandler,
) {
    let mut last_reset = Instant::now();
    let mut resets = 0u64;
    loop {
        crossbeam::select! {
            recv(reset_rx) -> msg => {
                if msg.is_err() {
                    return;
                }
                resets += 1;
                last_reset = Instant::now();
            }
            recv(done_rx) -> _ => return,
            recv(channel::after(timeout)) -> _ => {
                let group = group.upgrade();
                let report = StallReport {
                    timeout,
                    since_reset: last_reset.elapsed(),
                    resets,
                    slots: group.as_ref().map(Group::snapshot),
                    stats: group.as_ref().map(Group::stats),
                };
                handler(report);
                return;
            }
        }
    }
}
