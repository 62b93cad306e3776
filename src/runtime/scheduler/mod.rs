//! Tick-driven coroutine scheduler
//!
//! This module provides the [`Group`], which owns a set of coroutines and a
//! FIFO queue of posted events. Nothing moves unless [`Group::tick`] is
//! called: each tick delivers pending cancellations, then expired timers,
//! then drains the event queue, then reaps coroutines whose bodies returned.
//!
//! `spawn`, `post` and `tick` are meant to be driven from one thread. Bodies
//! may call back into the group (post, spawn children) during their own
//! turn, since no lock is held across a hand-off.

pub mod cancel;
pub mod coroutine;
pub mod queue;

#[cfg(test)]
mod tests;

pub use cancel::CancelHandle;
pub use coroutine::{BodyExit, Co, CoroutineId};
pub use queue::EventQueue;

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, trace_span, warn};

use self::cancel::CancelToken;
use self::coroutine::{run_body, CoroutineIdGenerator, Request, Response};
use crate::error::RuntimeResult;
use crate::runtime::clock::{Clock, MockClock, SystemClock};
use crate::runtime::event::{Event, EventKey};

/// Group configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupConfig {
    /// Slide occupied slots down at the end of every tick. When off, empty
    /// slots stay in place and are reused by the next spawn.
    pub compact: bool,
    /// Stack size for coroutine threads. `None` uses the platform default.
    pub stack_size: Option<usize>,
    /// Coroutine threads are named `<prefix>-<id>`.
    pub thread_name_prefix: String,
}

impl Default for GroupConfig {
    fn default() -> Self {
        Self {
            compact: true,
            stack_size: None,
            thread_name_prefix: "coroutine".to_string(),
        }
    }
}

/// Group statistics.
#[derive(Debug, Default)]
pub struct GroupStats {
    ticks: AtomicUsize,
    spawned: AtomicUsize,
    finished: AtomicUsize,
    events_posted: AtomicUsize,
    events_delivered: AtomicUsize,
    timeouts_delivered: AtomicUsize,
    cancels_delivered: AtomicUsize,
}

/// A point-in-time copy of [`GroupStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GroupStatsSnapshot {
    /// Completed calls to `tick` (re-entrant calls excluded).
    pub ticks: usize,
    /// Coroutines started.
    pub spawned: usize,
    /// Coroutines whose slot has been reaped.
    pub finished: usize,
    /// Events appended to the queue.
    pub events_posted: usize,
    /// Event resumptions (one event may resume several coroutines).
    pub events_delivered: usize,
    /// Timer resumptions.
    pub timeouts_delivered: usize,
    /// Cancellation resumptions.
    pub cancels_delivered: usize,
}

impl GroupStats {
    #[inline]
    fn record(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::SeqCst);
    }

    /// Copy the counters.
    pub fn snapshot(&self) -> GroupStatsSnapshot {
        GroupStatsSnapshot {
            ticks: self.ticks.load(Ordering::SeqCst),
            spawned: self.spawned.load(Ordering::SeqCst),
            finished: self.finished.load(Ordering::SeqCst),
            events_posted: self.events_posted.load(Ordering::SeqCst),
            events_delivered: self.events_delivered.load(Ordering::SeqCst),
            timeouts_delivered: self.timeouts_delivered.load(Ordering::SeqCst),
            cancels_delivered: self.cancels_delivered.load(Ordering::SeqCst),
        }
    }
}

/// Scheduler-side end of one coroutine.
struct Slot {
    id: CoroutineId,
    token: CancelToken,
    yield_rx: Receiver<Request>,
    resume_tx: Sender<Response>,
    request: Mutex<Request>,
}

impl Slot {
    /// Answer the outstanding request and wait for the next one.
    /// Returns whether the body is still running.
    fn resume(
        &self,
        response: Response,
    ) -> bool {
        let next = match self.resume_tx.send(response) {
            Ok(()) => self.yield_rx.recv().unwrap_or_default(),
            Err(_) => Request::default(),
        };
        let valid = next.valid;
        *self.request.lock() = next;
        valid
    }

    #[inline]
    fn is_valid(&self) -> bool {
        self.request.lock().valid
    }

    #[inline]
    fn is_due(
        &self,
        now: Instant,
    ) -> bool {
        self.request.lock().is_due(now)
    }

    #[inline]
    fn wants(
        &self,
        key: &EventKey,
    ) -> bool {
        self.request.lock().wants(key)
    }
}

/// Diagnostic view of one occupied slot.
#[derive(Debug, Clone)]
pub struct SlotSnapshot {
    /// Position in the slot list.
    pub index: usize,
    /// Coroutine occupying the slot.
    pub id: CoroutineId,
    /// Whether a request is outstanding (the body has not returned).
    pub waiting: bool,
    /// Time left before the request's timer fires, if it has one.
    pub expires_in: Option<Duration>,
    /// Keys the request will resume on.
    pub events: Vec<EventKey>,
    /// Cancellation requested but not yet delivered.
    pub cancel_pending: bool,
    /// Children spawned by this coroutine that are still alive.
    pub children: usize,
}

impl fmt::Display for SlotSnapshot {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "[{}] {}", self.index, self.id)?;
        if !self.waiting {
            return write!(f, " finished");
        }
        if let Some(d) = self.expires_in {
            write!(f, " expires in {}ms", d.as_millis())?;
        }
        if !self.events.is_empty() {
            let keys: Vec<String> = self.events.iter().map(|k| k.to_string()).collect();
            write!(f, " waiting for [{}]", keys.join(", "))?;
        }
        if self.children > 0 {
            write!(f, " children={}", self.children)?;
        }
        if self.cancel_pending {
            write!(f, " (cancel pending)")?;
        }
        Ok(())
    }
}

pub(crate) struct GroupInner {
    config: GroupConfig,
    pub(crate) clock: Arc<dyn Clock>,
    slots: Mutex<Vec<Option<Arc<Slot>>>>,
    queue: EventQueue,
    ids: CoroutineIdGenerator,
    ticking: AtomicBool,
    stats: GroupStats,
}

/// Clears the re-entrancy flag even if a pass panics.
struct TickGuard<'a>(&'a AtomicBool);

impl Drop for TickGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl GroupInner {
    fn new(
        config: GroupConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            clock,
            slots: Mutex::new(Vec::new()),
            queue: EventQueue::new(),
            ids: CoroutineIdGenerator::default(),
            ticking: AtomicBool::new(false),
            stats: GroupStats::default(),
        }
    }

    /// Start a body on its own thread and wait for its first request.
    pub(crate) fn start<F, R>(
        self: &Arc<Self>,
        body: F,
        parent: Option<&CancelToken>,
    ) -> RuntimeResult<CancelHandle>
    where
        F: FnOnce(&Co) -> R + Send + 'static,
        R: BodyExit,
    {
        let id = self.ids.next();
        let token = CancelToken::new(id);
        let (yield_tx, yield_rx) = channel::bounded(0);
        let (resume_tx, resume_rx) = channel::bounded(0);

        let slot = Arc::new(Slot {
            id,
            token: token.clone(),
            yield_rx,
            resume_tx,
            request: Mutex::new(Request::default()),
        });
        let index = self.add(slot.clone());
        if let Some(parent) = parent {
            parent.adopt(&token);
        }

        let co = Co {
            id,
            group: Arc::downgrade(self),
            token: token.clone(),
            yield_tx,
            resume_rx,
        };

        let mut builder =
            thread::Builder::new().name(format!("{}-{}", self.config.thread_name_prefix, id.inner()));
        if let Some(size) = self.config.stack_size {
            builder = builder.stack_size(size);
        }
        if let Err(e) = builder.spawn(move || run_body(co, body)) {
            self.tombstone(index, &slot);
            return Err(e.into());
        }

        // Let the new body reach its first suspension point.
        let first = slot.yield_rx.recv().unwrap_or_default();
        *slot.request.lock() = first;

        GroupStats::record(&self.stats.spawned);
        debug!(slot = index, "spawned {}", id);
        Ok(CancelHandle::new(token, Arc::downgrade(self)))
    }

    /// Place a slot in the first hole, or append.
    fn add(
        &self,
        slot: Arc<Slot>,
    ) -> usize {
        let mut slots = self.slots.lock();
        if let Some(i) = slots.iter().position(Option::is_none) {
            slots[i] = Some(slot);
            return i;
        }
        slots.push(Some(slot));
        slots.len() - 1
    }

    /// `None` past the end, `Some(None)` for a hole.
    /// Occupied slots with their positions, in slot order.
    fn indexed(&self) -> Vec<(usize, Arc<Slot>)> {
        self.slots
            .lock()
            .iter()
            .enumerate()
            .filter_map(|(index, entry)| entry.clone().map(|slot| (index, slot)))
            .collect()
    }

    fn tombstone(
        &self,
        index: usize,
        slot: &Arc<Slot>,
    ) {
        let mut slots = self.slots.lock();
        if let Some(entry) = slots.get_mut(index) {
            if entry.as_ref().is_some_and(|s| Arc::ptr_eq(s, slot)) {
                *entry = None;
                GroupStats::record(&self.stats.finished);
                debug!(slot = index, "reaped {}", slot.id);
            }
        }
    }

    pub(crate) fn post(
        &self,
        event: Event,
    ) {
        trace!("posted {}", event.key());
        self.queue.push(event);
        GroupStats::record(&self.stats.events_posted);
    }

    pub(crate) fn tick(&self) {
        if self
            .ticking
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!("tick called while a tick is in progress; ignored");
            return;
        }
        let _guard = TickGuard(&self.ticking);
        let n = self.stats.ticks.fetch_add(1, Ordering::SeqCst) + 1;
        let _span = trace_span!("tick", n).entered();

        let now = self.clock.now();
        self.deliver_cancels_and_timeouts(now);
        self.drain_events();
        self.reap();
    }

    fn deliver_cancels_and_timeouts(
        &self,
        now: Instant,
    ) {
        for (index, slot) in self.indexed() {
            if slot.is_valid() && slot.token.take_pending() {
                trace!("cancel -> {}", slot.id);
                GroupStats::record(&self.stats.cancels_delivered);
                if !slot.resume(Response::Cancel) {
                    self.tombstone(index, &slot);
                    continue;
                }
            }
            if slot.is_due(now) {
                trace!("timeout -> {}", slot.id);
                GroupStats::record(&self.stats.timeouts_delivered);
                slot.resume(Response::Timeout);
            }
        }
    }

    /// Events posted by bodies while this runs are serviced before it returns.
    ///
    /// Each event goes only to the slots occupied when its scan started, so a
    /// coroutine spawned during a delivery never sees that event.
    fn drain_events(&self) {
        while let Some(event) = self.queue.pop_front() {
            for (_, slot) in self.indexed() {
                if slot.wants(event.key()) {
                    trace!("{} -> {}", event.key(), slot.id);
                    GroupStats::record(&self.stats.events_delivered);
                    slot.resume(Response::Event(event.clone()));
                }
            }
        }
    }

    fn reap(&self) {
        let mut slots = self.slots.lock();
        for (index, entry) in slots.iter_mut().enumerate() {
            let finished = entry.as_ref().is_some_and(|slot| !slot.is_valid());
            if finished {
                if let Some(slot) = entry.take() {
                    GroupStats::record(&self.stats.finished);
                    debug!(slot = index, "reaped {}", slot.id);
                }
            }
        }
        if self.config.compact {
            slots.retain(Option::is_some);
        }
    }

    fn occupied(&self) -> Vec<Arc<Slot>> {
        self.slots.lock().iter().flatten().cloned().collect()
    }

    fn stop(&self) {
        let occupied = self.occupied();
        debug!(count = occupied.len(), "stopping group");
        for slot in occupied {
            slot.token.cancel();
        }
        self.tick();
    }

    fn running(&self) -> usize {
        self.slots
            .lock()
            .iter()
            .flatten()
            .filter(|slot| slot.is_valid())
            .count()
    }

    fn snapshot(&self) -> Vec<SlotSnapshot> {
        let now = self.clock.now();
        let slots = self.slots.lock();
        slots
            .iter()
            .enumerate()
            .filter_map(|(index, entry)| {
                let slot = entry.as_ref()?;
                let request = slot.request.lock();
                Some(SlotSnapshot {
                    index,
                    id: slot.id,
                    waiting: request.valid,
                    expires_in: request.expires.map(|t| t.saturating_duration_since(now)),
                    events: request.events.to_vec(),
                    cancel_pending: slot.token.is_pending(),
                    children: slot.token.live_children(),
                })
            })
            .collect()
    }
}

/// A set of coroutines advanced together by [`tick`](Group::tick).
///
/// Cloning a `Group` gives another handle to the same scheduler. Coroutine
/// bodies hold only weak references, so once every handle is dropped the
/// bodies see cancellation at their next suspension point.
#[derive(Clone)]
pub struct Group {
    pub(crate) inner: Arc<GroupInner>,
}

impl Group {
    /// A group on the system clock with default configuration.
    pub fn new() -> Self {
        Self::with_config(GroupConfig::default(), Arc::new(SystemClock))
    }

    /// A group reading time from `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self::with_config(GroupConfig::default(), clock)
    }

    /// A group with explicit configuration and clock.
    pub fn with_config(
        config: GroupConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            inner: Arc::new(GroupInner::new(config, clock)),
        }
    }

    /// A group on a fresh [`MockClock`], for deterministic tests.
    pub fn with_mock_clock() -> (Self, Arc<MockClock>) {
        let clock = MockClock::shared();
        (Self::with_clock(clock.clone()), clock)
    }

    /// Start a top-level coroutine.
    ///
    /// Blocks until the body reaches its first suspension point (or returns).
    /// The returned handle cancels it.
    pub fn spawn<F, R>(
        &self,
        body: F,
    ) -> RuntimeResult<CancelHandle>
    where
        F: FnOnce(&Co) -> R + Send + 'static,
        R: BodyExit,
    {
        self.inner.start(body, None)
    }

    /// Queue an event for delivery on the next tick.
    pub fn post(
        &self,
        event: impl Into<Event>,
    ) {
        self.inner.post(event.into());
    }

    /// Queue an event carrying `payload`.
    pub fn post_with<T>(
        &self,
        key: impl Into<EventKey>,
        payload: T,
    ) where
        T: Any + Send + Sync,
    {
        self.inner.post(Event::with_payload(key, payload));
    }

    /// Advance every coroutine that can make progress.
    ///
    /// In order: deliver pending cancellations, fire expired timers, drain
    /// the event queue (including events posted during the drain), reap
    /// finished coroutines, and compact the slot list if configured.
    pub fn tick(&self) {
        self.inner.tick();
    }

    /// Cancel every coroutine, then tick once.
    pub fn stop(&self) {
        self.inner.stop();
    }

    /// Number of coroutines with an outstanding request.
    pub fn running(&self) -> usize {
        self.inner.running()
    }

    /// Length of the slot list, holes included.
    pub fn slots(&self) -> usize {
        self.inner.slots.lock().len()
    }

    /// Events waiting for the next tick.
    pub fn pending_events(&self) -> usize {
        self.inner.queue.len()
    }

    /// The group's current time.
    pub fn now(&self) -> Instant {
        self.inner.clock.now()
    }

    /// Group configuration.
    pub fn config(&self) -> &GroupConfig {
        &self.inner.config
    }

    /// Copy of the statistics counters.
    pub fn stats(&self) -> GroupStatsSnapshot {
        self.inner.stats.snapshot()
    }

    /// Per-slot view of outstanding requests.
    pub fn snapshot(&self) -> Vec<SlotSnapshot> {
        self.inner.snapshot()
    }

    /// A handle that does not keep the group alive.
    pub fn downgrade(&self) -> WeakGroup {
        WeakGroup {
            inner: Arc::downgrade(&self.inner),
        }
    }
}

impl Default for Group {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Group {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Group")
            .field("config", &self.inner.config)
            .field("clock", &self.inner.clock)
            .field("slots", &self.slots())
            .field("running", &self.running())
            .field("pending_events", &self.pending_events())
            .finish()
    }
}

/// Non-owning reference to a [`Group`].
#[derive(Clone, Debug, Default)]
pub struct WeakGroup {
    inner: Weak<GroupInner>,
}

impl WeakGroup {
    /// The group, if it is still alive.
    pub fn upgrade(&self) -> Option<Group> {
        self.inner.upgrade().map(|inner| Group { inner })
    }
}
