//! Pending-event queue for a group.
//!
//! Strict FIFO. Bodies may post while the group is draining it, so every
//! operation takes the lock for just the one push or pop.

use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::runtime::event::Event;

/// A thread-safe FIFO of posted events.
#[derive(Debug, Default)]
pub struct EventQueue {
    inner: Mutex<VecDeque<Event>>,
}

impl EventQueue {
    /// Create an empty queue.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event.
    #[inline]
    pub fn push(
        &self,
        event: Event,
    ) {
        self.inner.lock().push_back(event);
    }

    /// Take the oldest event.
    #[inline]
    pub fn pop_front(&self) -> Option<Event> {
        self.inner.lock().pop_front()
    }

    /// Number of events waiting.
    #[inline]
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Whether nothing is waiting.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}
