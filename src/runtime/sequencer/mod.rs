//! Scripted coroutine bodies
//!
//! A [`Sequencer`] is built up front as a list of steps and then run against
//! a coroutine handle:
//!
//! ```no_run
//! use std::time::Duration;
//! use tickflow::{Group, Sequencer};
//!
//! let group = Group::new();
//! group.spawn(|co| {
//!     let mut s = Sequencer::new();
//!     s.wait_for(["ball lock"])
//!         .do_(|| println!("locked"))
//!         .sleep(Duration::from_secs(2))
//!         .do_(|| println!("released"))
//!         .looped();
//!     s.run(co)
//! }).unwrap();
//! ```
//!
//! The interpreter keeps a program counter into the step list. Loop steps
//! only ever jump back to step 0; every other step advances by one.


use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use tracing::trace;

use crate::error::{Cancelled, SequencerError};
use crate::runtime::event::{collect_keys, Event, EventKey, EventKeys};
use crate::runtime::scheduler::Co;

type Action<'a> = Box<dyn FnMut() + 'a>;
type Suspending<'a> = Box<dyn FnMut(&Co) -> Result<(), Cancelled> + 'a>;

enum Step<'a> {
    Do(Action<'a>),
    DoRun(Suspending<'a>),
    Sleep(Duration),
    WaitFor(EventKeys),
    WaitForUntil(Duration, EventKeys),
    /// Arms a hook for the next suspending step.
    Cancel(Action<'a>),
    /// `None` jumps to 0 forever; `Some(n)` replays `n` more times.
    Loop(Option<u32>),
}

impl fmt::Debug for Step<'_> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            Step::Do(_) => write!(f, "Do"),
            Step::DoRun(_) => write!(f, "DoRun"),
            Step::Sleep(d) => write!(f, "Sleep({:?})", d),
            Step::WaitFor(keys) => write!(f, "WaitFor({:?})", keys),
            Step::WaitForUntil(d, keys) => write!(f, "WaitForUntil({:?}, {:?})", d, keys),
            Step::Cancel(_) => write!(f, "Cancel"),
            Step::Loop(None) => write!(f, "Loop"),
            Step::Loop(Some(n)) => write!(f, "LoopN({})", n),
        }
    }
}

/// Read access to the event matched by the most recent suspending step.
///
/// Clone it into `do_` closures; it always reflects the sequencer's current
/// value.
#[derive(Debug, Clone, Default)]
pub struct LastEvent {
    inner: Rc<RefCell<Option<Event>>>,
}

impl LastEvent {
    /// The matched event, if the last suspending step produced one.
    pub fn get(&self) -> Option<Event> {
        self.inner.borrow().clone()
    }

    /// The payload of the matched event as `T`.
    pub fn payload<T>(&self) -> Option<T>
    where
        T: Clone + 'static,
    {
        self.inner.borrow().as_ref()?.payload::<T>().cloned()
    }

    fn set(
        &self,
        event: Option<Event>,
    ) {
        *self.inner.borrow_mut() = event;
    }
}

/// A build-then-run script for one coroutine.
#[derive(Default)]
pub struct Sequencer<'a> {
    steps: Vec<Step<'a>>,
    defers: Vec<Action<'a>>,
    last: LastEvent,
    closed: bool,
}

/// Runs the defers when `run` exits, however it exits.
struct DeferGuard<'s, 'a> {
    defers: &'s mut Vec<Action<'a>>,
}

impl Drop for DeferGuard<'_, '_> {
    fn drop(&mut self) {
        for defer in self.defers.iter_mut() {
            defer();
        }
    }
}

impl<'a> Sequencer<'a> {
    /// An empty script.
    pub fn new() -> Self {
        Self::default()
    }

    fn push(
        &mut self,
        step: Step<'a>,
    ) -> &mut Self {
        if self.closed {
            panic!("{}", SequencerError::Closed);
        }
        self.steps.push(step);
        self
    }

    /// Run `f` without suspending.
    ///
    /// # Panics
    ///
    /// Panics if the script has been closed by [`looped`](Self::looped). The
    /// same holds for every other step-appending method.
    pub fn do_(
        &mut self,
        f: impl FnMut() + 'a,
    ) -> &mut Self {
        self.push(Step::Do(Box::new(f)))
    }

    /// Run `f`, which may suspend on the handle itself.
    ///
    /// If `f` reports cancellation the script stops as if a built-in
    /// suspending step had been cancelled.
    pub fn do_run(
        &mut self,
        f: impl FnMut(&Co) -> Result<(), Cancelled> + 'a,
    ) -> &mut Self {
        self.push(Step::DoRun(Box::new(f)))
    }

    /// Suspend for `d`. Clears the last event.
    pub fn sleep(
        &mut self,
        d: Duration,
    ) -> &mut Self {
        self.push(Step::Sleep(d))
    }

    /// Suspend until one of `keys` is posted.
    pub fn wait_for<I>(
        &mut self,
        keys: I,
    ) -> &mut Self
    where
        I: IntoIterator,
        I::Item: Into<EventKey>,
    {
        self.push(Step::WaitFor(collect_keys(keys)))
    }

    /// Suspend until one of `keys` is posted or `d` elapses. On timeout the
    /// last event is cleared.
    pub fn wait_for_until<I>(
        &mut self,
        d: Duration,
        keys: I,
    ) -> &mut Self
    where
        I: IntoIterator,
        I::Item: Into<EventKey>,
    {
        self.push(Step::WaitForUntil(d, collect_keys(keys)))
    }

    /// Arm `f` to run if the next suspending step is cancelled.
    ///
    /// Hooks are disarmed once that step resumes normally, so a hook guards
    /// exactly one step.
    pub fn cancel(
        &mut self,
        f: impl FnMut() + 'a,
    ) -> &mut Self {
        self.push(Step::Cancel(Box::new(f)))
    }

    /// Register `f` to run once when `run` returns, whatever the outcome.
    /// Accepted even after the script is closed.
    pub fn defer(
        &mut self,
        f: impl FnMut() + 'a,
    ) -> &mut Self {
        self.defers.push(Box::new(f));
        self
    }

    /// Jump back to the first step forever and close the script.
    pub fn looped(&mut self) -> &mut Self {
        self.push(Step::Loop(None));
        self.closed = true;
        self
    }

    /// Replay the script from the first step `n` more times, then continue.
    pub fn loop_n(
        &mut self,
        n: u32,
    ) -> &mut Self {
        self.push(Step::Loop(Some(n)))
    }

    /// Whether [`looped`](Self::looped) has closed the script.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Number of steps appended so far.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Whether no steps have been appended.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// The event matched by the most recent suspending step.
    pub fn event(&self) -> Option<Event> {
        self.last.get()
    }

    /// A reader for the matched event, for use inside `do_` closures.
    pub fn last_event(&self) -> LastEvent {
        self.last.clone()
    }

    /// Interpret the script on `co`.
    ///
    /// Returns `Err(Cancelled)` if a suspending step was cancelled; armed
    /// cancel hooks have run by then. Defers run in both cases.
    pub fn run(
        &mut self,
        co: &Co,
    ) -> Result<(), Cancelled> {
        let Sequencer {
            steps, defers, last, ..
        } = self;
        let _defers = DeferGuard { defers };

        let mut remaining: Vec<Option<u32>> = vec![None; steps.len()];
        let mut armed: Vec<usize> = Vec::new();
        let mut pc = 0;

        while pc < steps.len() {
            let outcome = match &mut steps[pc] {
                Step::Loop(None) => {
                    pc = 0;
                    continue;
                }
                Step::Loop(Some(n)) => {
                    let left = remaining[pc].get_or_insert(*n);
                    if *left > 0 {
                        *left -= 1;
                        pc = 0;
                        continue;
                    }
                    None
                }
                Step::Do(f) => {
                    f();
                    None
                }
                Step::Cancel(_) => {
                    armed.push(pc);
                    None
                }
                Step::DoRun(f) => Some(f(co)),
                Step::Sleep(d) => {
                    last.set(None);
                    Some(co.sleep(*d))
                }
                Step::WaitFor(keys) => Some(co.wait_for(keys.iter().cloned()).map(|event| {
                    last.set(Some(event));
                })),
                Step::WaitForUntil(d, keys) => Some(
                    co.wait_for_until(*d, keys.iter().cloned())
                        .map(|event| last.set(event)),
                ),
            };

            match outcome {
                Some(Err(Cancelled)) => {
                    trace!(pc, hooks = armed.len(), "{} sequence cancelled", co.id());
                    for index in armed.drain(..) {
                        if let Step::Cancel(hook) = &mut steps[index] {
                            hook();
                        }
                    }
                    return Err(Cancelled);
                }
                Some(Ok(())) => armed.clear(),
                None => {}
            }
            pc += 1;
        }
        Ok(())
    }
}

impl fmt::Debug for Sequencer<'_> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Sequencer")
            .field("steps", &self.steps)
            .field("defers", &self.defers.len())
            .field("closed", &self.closed)
            .finish()
    }
}
