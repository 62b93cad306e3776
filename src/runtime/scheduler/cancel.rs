//! Cancellation tokens.
//!
//! Every coroutine owns one token. A child's token is registered with its
//! parent's, so cancelling a parent walks the whole subtree. Parents only
//! hold weak references: a finished child drops out of the tree on its own.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::debug;

use super::coroutine::CoroutineId;
use super::GroupInner;

#[derive(Debug)]
struct TokenInner {
    id: CoroutineId,
    /// Set by `cancel`, cleared when the group delivers it.
    pending: AtomicBool,
    /// Set once by `cancel` and never cleared.
    requested: AtomicBool,
    children: Mutex<Vec<Weak<TokenInner>>>,
}

/// One node in the cancellation tree.
#[derive(Debug, Clone)]
pub(crate) struct CancelToken {
    inner: Arc<TokenInner>,
}

impl CancelToken {
    pub(crate) fn new(id: CoroutineId) -> Self {
        Self {
            inner: Arc::new(TokenInner {
                id,
                pending: AtomicBool::new(false),
                requested: AtomicBool::new(false),
                children: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Register `child` so that cancelling `self` also cancels it. A child
    /// adopted by an already cancelled token is cancelled straight away.
    pub(crate) fn adopt(
        &self,
        child: &CancelToken,
    ) {
        {
            let mut children = self.inner.children.lock();
            children.retain(|c| c.strong_count() > 0);
            children.push(Arc::downgrade(&child.inner));
        }
        if self.is_requested() {
            child.cancel();
        }
    }

    /// Flag this token and every live descendant, depth first. A token that
    /// was already cancelled is left alone, as is its subtree.
    pub(crate) fn cancel(&self) {
        Self::cancel_inner(&self.inner);
    }

    fn cancel_inner(inner: &TokenInner) {
        if inner.requested.swap(true, Ordering::SeqCst) {
            return;
        }
        inner.pending.store(true, Ordering::SeqCst);
        let children: Vec<Arc<TokenInner>> = inner
            .children
            .lock()
            .iter()
            .filter_map(Weak::upgrade)
            .collect();
        for child in children {
            Self::cancel_inner(&child);
        }
    }

    /// Flag every live descendant but not this token.
    pub(crate) fn cancel_children(&self) {
        let children: Vec<Arc<TokenInner>> = self
            .inner
            .children
            .lock()
            .iter()
            .filter_map(Weak::upgrade)
            .collect();
        for child in children {
            debug!("cancelling orphaned {}", child.id);
            Self::cancel_inner(&child);
        }
    }

    /// Consume a pending cancellation, if any.
    pub(crate) fn take_pending(&self) -> bool {
        self.inner.pending.swap(false, Ordering::SeqCst)
    }

    /// Whether a cancellation is waiting to be delivered.
    pub(crate) fn is_pending(&self) -> bool {
        self.inner.pending.load(Ordering::SeqCst)
    }

    /// Whether cancellation was ever requested.
    pub(crate) fn is_requested(&self) -> bool {
        self.inner.requested.load(Ordering::SeqCst)
    }

    pub(crate) fn live_children(&self) -> usize {
        self.inner
            .children
            .lock()
            .iter()
            .filter(|c| c.strong_count() > 0)
            .count()
    }
}

/// The capability returned when a coroutine is spawned.
///
/// Calling [`cancel`](CancelHandle::cancel) flags the coroutine and all of
/// its descendants and then drives one tick of the owning group, so cleanup
/// has run by the time it returns. Cancelling twice, or cancelling a
/// coroutine that already finished, does nothing further.
#[derive(Clone)]
pub struct CancelHandle {
    token: CancelToken,
    group: Weak<GroupInner>,
}

impl CancelHandle {
    pub(crate) fn new(
        token: CancelToken,
        group: Weak<GroupInner>,
    ) -> Self {
        Self { token, group }
    }

    /// Id of the coroutine this handle cancels.
    pub fn id(&self) -> CoroutineId {
        self.token.inner.id
    }

    /// Cancel the coroutine (and its children), then tick the group once.
    pub fn cancel(&self) {
        self.token.cancel();
        if let Some(group) = self.group.upgrade() {
            group.tick();
        }
    }

    /// Whether cancellation has been requested through any path.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_requested()
    }
}

impl fmt::Debug for CancelHandle {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("CancelHandle")
            .field("id", &self.token.inner.id)
            .field("cancelled", &self.token.is_requested())
            .finish()
    }
}
