//! Events posted to a group and the keys waiters match them by.
//!
//! Only the key takes part in matching. The payload rides along untouched
//! and is handed to whichever coroutine the event resumes.

use std::any::Any;
use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use smallvec::SmallVec;

/// Shared, type-erased event payload.
pub type Payload = Arc<dyn Any + Send + Sync>;

/// The identity used to match a posted event against waiting requests.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventKey {
    /// A named event, e.g. a switch or a game state transition.
    Name(Cow<'static, str>),
    /// A numeric event id.
    Id(u64),
}

impl fmt::Display for EventKey {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            EventKey::Name(name) => write!(f, "{}", name),
            EventKey::Id(id) => write!(f, "#{}", id),
        }
    }
}

impl From<&'static str> for EventKey {
    fn from(name: &'static str) -> Self {
        EventKey::Name(Cow::Borrowed(name))
    }
}

impl From<String> for EventKey {
    fn from(name: String) -> Self {
        EventKey::Name(Cow::Owned(name))
    }
}

impl From<u64> for EventKey {
    fn from(id: u64) -> Self {
        EventKey::Id(id)
    }
}

/// Keys a single request is willing to resume on.
pub(crate) type EventKeys = SmallVec<[EventKey; 4]>;

pub(crate) fn collect_keys<I>(keys: I) -> EventKeys
where
    I: IntoIterator,
    I::Item: Into<EventKey>,
{
    keys.into_iter().map(Into::into).collect()
}

/// A posted occurrence.
#[derive(Clone)]
pub struct Event {
    key: EventKey,
    payload: Option<Payload>,
}

impl Event {
    /// An event with no payload.
    pub fn new(key: impl Into<EventKey>) -> Self {
        Self {
            key: key.into(),
            payload: None,
        }
    }

    /// An event carrying a value.
    pub fn with_payload<T>(
        key: impl Into<EventKey>,
        payload: T,
    ) -> Self
    where
        T: Any + Send + Sync,
    {
        Self {
            key: key.into(),
            payload: Some(Arc::new(payload)),
        }
    }

    /// The matching identity.
    #[inline]
    pub fn key(&self) -> &EventKey {
        &self.key
    }

    /// Whether this event has the given key.
    #[inline]
    pub fn is(
        &self,
        key: &EventKey,
    ) -> bool {
        &self.key == key
    }

    /// Borrow the payload as `T`, if there is one of that type.
    pub fn payload<T: Any>(&self) -> Option<&T> {
        self.payload.as_deref().and_then(|p| p.downcast_ref::<T>())
    }

    /// The raw shared payload.
    #[inline]
    pub fn raw_payload(&self) -> Option<&Payload> {
        self.payload.as_ref()
    }
}

impl fmt::Debug for Event {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Event")
            .field("key", &self.key)
            .field("has_payload", &self.payload.is_some())
            .finish()
    }
}

impl From<EventKey> for Event {
    fn from(key: EventKey) -> Self {
        Event::new(key)
    }
}

impl From<&'static str> for Event {
    fn from(name: &'static str) -> Self {
        Event::new(name)
    }
}

impl From<String> for Event {
    fn from(name: String) -> Self {
        Event::new(name)
    }
}

impl From<u64> for Event {
    fn from(id: u64) -> Self {
        Event::new(id)
    }
}
