//! Coroutine handles and the yield/resume handshake.
//!
//! A body runs on its own thread but only ever makes progress while the
//! group is waiting on it. At each suspension point the body hands its
//! [`Request`] to the group over the `yield` channel and then blocks on
//! `resume` until [`Group::tick`](super::Group::tick) answers. Both channels
//! have zero capacity, so every hand-off is a rendezvous.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Weak;
use std::time::{Duration, Instant};

use crossbeam::channel::{Receiver, Sender};
use tracing::{debug, error};

use super::cancel::{CancelHandle, CancelToken};
use super::{Group, GroupInner};
use crate::error::{Cancelled, RuntimeError, RuntimeResult};
use crate::runtime::event::{collect_keys, Event, EventKey, EventKeys};

/// Unique coroutine identifier within a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CoroutineId(pub usize);

impl CoroutineId {
    /// Get the inner value.
    #[inline]
    pub fn inner(&self) -> usize {
        self.0
    }
}

impl fmt::Display for CoroutineId {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "Coroutine({})", self.0)
    }
}

/// Hands out increasing coroutine ids.
#[derive(Debug, Default)]
pub(crate) struct CoroutineIdGenerator {
    next_id: AtomicUsize,
}

impl CoroutineIdGenerator {
    #[inline]
    pub(crate) fn next(&self) -> CoroutineId {
        CoroutineId(self.next_id.fetch_add(1, Ordering::SeqCst))
    }
}

/// What a suspended coroutine is waiting for.
///
/// The default value is the "body has returned" request: not valid, never
/// due, wants nothing.
#[derive(Debug, Clone, Default)]
pub(crate) struct Request {
    pub(crate) valid: bool,
    pub(crate) expires: Option<Instant>,
    pub(crate) events: EventKeys,
}

impl Request {
    fn until(expires: Option<Instant>) -> Self {
        Self {
            valid: true,
            expires,
            events: EventKeys::new(),
        }
    }

    fn events(events: EventKeys) -> Self {
        Self {
            valid: true,
            expires: None,
            events,
        }
    }

    fn events_until(
        expires: Option<Instant>,
        events: EventKeys,
    ) -> Self {
        Self {
            valid: true,
            expires,
            events,
        }
    }

    #[inline]
    pub(crate) fn is_due(
        &self,
        now: Instant,
    ) -> bool {
        self.valid && matches!(self.expires, Some(expires) if now >= expires)
    }

    #[inline]
    pub(crate) fn wants(
        &self,
        key: &EventKey,
    ) -> bool {
        self.valid && self.events.iter().any(|k| k == key)
    }
}

/// The group's answer to a request. Exactly one outcome per resume.
#[derive(Debug, Clone)]
pub(crate) enum Response {
    Cancel,
    Timeout,
    Event(Event),
}

/// What a coroutine body may return.
///
/// Bodies either return `()` or `Result<(), Cancelled>`, the latter so that
/// suspension points can be chained with `?`.
pub trait BodyExit {
    /// Whether the body ended because it observed cancellation.
    fn cancelled(self) -> bool;
}

impl BodyExit for () {
    fn cancelled(self) -> bool {
        false
    }
}

impl BodyExit for Result<(), Cancelled> {
    fn cancelled(self) -> bool {
        self.is_err()
    }
}

/// The handle a coroutine body uses to suspend itself.
///
/// Every method here must be called from inside the body that received the
/// handle.
pub struct Co {
    pub(crate) id: CoroutineId,
    pub(crate) group: Weak<GroupInner>,
    pub(crate) token: CancelToken,
    pub(crate) yield_tx: Sender<Request>,
    pub(crate) resume_rx: Receiver<Response>,
}

impl Co {
    /// This coroutine's id.
    #[inline]
    pub fn id(&self) -> CoroutineId {
        self.id
    }

    /// Whether cancellation has been requested for this coroutine, delivered
    /// or not.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_requested()
    }

    /// The owning group, if it is still alive.
    pub fn group(&self) -> Option<Group> {
        self.group.upgrade().map(|inner| Group { inner })
    }

    /// Post an event to the owning group. A no-op once the group is gone.
    pub fn post(
        &self,
        event: impl Into<Event>,
    ) {
        if let Some(group) = self.group.upgrade() {
            group.post(event.into());
        }
    }

    /// Suspend for `d`.
    ///
    /// Resumes on the first tick whose clock reading is at least `d` past the
    /// call. Returns `Err(Cancelled)` if cancellation arrived instead. A `d`
    /// past the clock's range parks the coroutine until it is cancelled.
    pub fn sleep(
        &self,
        d: Duration,
    ) -> Result<(), Cancelled> {
        let expires = self.deadline(d)?;
        match self.suspend(Request::until(expires)) {
            Response::Cancel => Err(Cancelled),
            Response::Timeout | Response::Event(_) => Ok(()),
        }
    }

    /// Suspend until one of `keys` is posted.
    pub fn wait_for<I>(
        &self,
        keys: I,
    ) -> Result<Event, Cancelled>
    where
        I: IntoIterator,
        I::Item: Into<EventKey>,
    {
        match self.suspend(Request::events(collect_keys(keys))) {
            Response::Event(event) => Ok(event),
            Response::Cancel => Err(Cancelled),
            Response::Timeout => unreachable!("timeout delivered to a request without expiry"),
        }
    }

    /// Suspend until one of `keys` is posted or `d` elapses.
    ///
    /// `Ok(Some(event))` if an event won, `Ok(None)` on timeout. A `d` past the
    /// clock's range never times out.
    pub fn wait_for_until<I>(
        &self,
        d: Duration,
        keys: I,
    ) -> Result<Option<Event>, Cancelled>
    where
        I: IntoIterator,
        I::Item: Into<EventKey>,
    {
        let expires = self.deadline(d)?;
        match self.suspend(Request::events_until(expires, collect_keys(keys))) {
            Response::Event(event) => Ok(Some(event)),
            Response::Timeout => Ok(None),
            Response::Cancel => Err(Cancelled),
        }
    }

    /// Spawn a child coroutine in the same group.
    ///
    /// Cancelling this coroutine cancels the child too, as does this body
    /// returning while the child is still alive. Returns once the child has
    /// reached its first suspension point.
    pub fn spawn<F, R>(
        &self,
        body: F,
    ) -> RuntimeResult<CancelHandle>
    where
        F: FnOnce(&Co) -> R + Send + 'static,
        R: BodyExit,
    {
        let group = self.group.upgrade().ok_or(RuntimeError::GroupDropped)?;
        group.start(body, Some(&self.token))
    }

    fn deadline(
        &self,
        d: Duration,
    ) -> Result<Option<Instant>, Cancelled> {
        let group = self.group.upgrade().ok_or(Cancelled)?;
        Ok(group.clock.now().checked_add(d))
    }

    fn suspend(
        &self,
        request: Request,
    ) -> Response {
        if self.yield_tx.send(request).is_err() {
            return Response::Cancel;
        }
        self.resume_rx.recv().unwrap_or(Response::Cancel)
    }
}

impl fmt::Debug for Co {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Co")
            .field("id", &self.id)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Thread entry point for a coroutine body.
///
/// Dropping `co` at the end closes the yield channel, which the group reads
/// as "body returned".
pub(crate) fn run_body<F, R>(
    co: Co,
    body: F,
) where
    F: FnOnce(&Co) -> R,
    R: BodyExit,
{
    let id = co.id;
    match panic::catch_unwind(AssertUnwindSafe(|| body(&co))) {
        Ok(exit) => {
            let cancelled = exit.cancelled();
            debug!(cancelled, "{} finished", id);
        }
        Err(payload) => {
            error!("{} panicked: {}", id, panic_message(payload.as_ref()));
        }
    }
    co.token.cancel_children();
    drop(co);
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
