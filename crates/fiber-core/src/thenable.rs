//! Awaitable placeholders that components suspend on.
//!
//! A [`Thenable`] is settled by whoever owns the pending data. Listeners are
//! plain [`Waker`]s, so the reconciler subscribes the same way a future
//! executor would and never has to be reachable from the settling side.

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::Waker;

use crate::error::CapturedError;

static NEXT_THENABLE_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ThenableId(u64);

#[derive(Clone)]
pub enum ThenableState {
    Pending,
    Resolved(Rc<dyn Any>),
    Rejected(CapturedError),
}

impl fmt::Debug for ThenableState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThenableState::Pending => f.write_str("Pending"),
            ThenableState::Resolved(_) => f.write_str("Resolved"),
            ThenableState::Rejected(error) => write!(f, "Rejected({})", error.message()),
        }
    }
}

struct ThenableInner {
    id: ThenableId,
    state: RefCell<ThenableState>,
    listeners: RefCell<Vec<Waker>>,
}

#[derive(Clone)]
pub struct Thenable {
    inner: Rc<ThenableInner>,
}

impl Thenable {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(ThenableInner {
                id: ThenableId(NEXT_THENABLE_ID.fetch_add(1, Ordering::Relaxed)),
                state: RefCell::new(ThenableState::Pending),
                listeners: RefCell::new(Vec::new()),
            }),
        }
    }

    pub fn resolved<T: Any>(value: T) -> Self {
        let thenable = Self::new();
        thenable.resolve(value);
        thenable
    }

    pub fn id(&self) -> ThenableId {
        self.inner.id
    }

    pub fn state(&self) -> ThenableState {
        self.inner.state.borrow().clone()
    }

    pub fn is_pending(&self) -> bool {
        matches!(*self.inner.state.borrow(), ThenableState::Pending)
    }

    /// The resolved value, if settled successfully with a `T`.
    pub fn value<T: Any + Clone>(&self) -> Option<T> {
        match &*self.inner.state.borrow() {
            ThenableState::Resolved(value) => value.downcast_ref::<T>().cloned(),
            _ => None,
        }
    }

    pub fn resolve<T: Any>(&self, value: T) {
        self.settle(ThenableState::Resolved(Rc::new(value)));
    }

    pub fn reject(&self, error: impl Into<CapturedError>) {
        self.settle(ThenableState::Rejected(error.into()));
    }

    fn settle(&self, state: ThenableState) {
        {
            let mut current = self.inner.state.borrow_mut();
            if !matches!(*current, ThenableState::Pending) {
                return;
            }
            *current = state;
        }
        let listeners = std::mem::take(&mut *self.inner.listeners.borrow_mut());
        for waker in listeners {
            waker.wake();
        }
    }

    /// Registers `waker` to be woken once. Wakes immediately if already settled.
    pub fn then(&self, waker: Waker) {
        if self.is_pending() {
            self.inner.listeners.borrow_mut().push(waker);
        } else {
            waker.wake();
        }
    }

    pub fn ptr_eq(&self, other: &Thenable) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Default for Thenable {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Thenable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Thenable")
            .field("id", &self.inner.id)
            .field("state", &*self.inner.state.borrow())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_task::ArcWake;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    struct CountingWake(AtomicUsize);

    impl ArcWake for CountingWake {
        fn wake_by_ref(arc_self: &Arc<Self>) {
            arc_self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn listeners_fire_once_on_settle() {
        let counter = Arc::new(CountingWake(AtomicUsize::new(0)));
        let thenable = Thenable::new();
        thenable.then(futures_task::waker(counter.clone()));
        thenable.then(futures_task::waker(counter.clone()));
        thenable.resolve(5u32);
        thenable.resolve(6u32);
        assert_eq!(counter.0.load(Ordering::SeqCst), 2);
        assert_eq!(thenable.value::<u32>(), Some(5));
    }

    #[test]
    fn late_listener_wakes_immediately() {
        let counter = Arc::new(CountingWake(AtomicUsize::new(0)));
        let thenable = Thenable::new();
        thenable.reject("boom");
        thenable.then(futures_task::waker(counter.clone()));
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
        assert!(!thenable.is_pending());
    }
}
