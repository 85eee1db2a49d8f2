//! Inboxes that connect user-facing handles to the reconciler.
//!
//! State setters and class updaters only hold a [`RuntimeHandle`]; they never
//! touch the fiber tree. Their requests are queued here and applied by the
//! reconciler at its next safe point. Thenable listeners run wherever the
//! thenable is settled, so their wakeups go through a thread-safe inbox.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::{Arc, Mutex, RwLock};
use std::task::Waker;

use futures_task::ArcWake;

use crate::expiration::{ExpirationTime, PriorityLevel};
use crate::fiber::FiberId;
use crate::hooks::HookQueue;
use crate::platform::{HostScheduler, ScheduledTask};
use crate::root::RootId;
use crate::thenable::ThenableId;
use crate::update_queue::{SharedPending, StatePayload, UpdateTag};

pub(crate) enum UpdateKind {
    Hook {
        queue: Rc<HookQueue>,
        action: Rc<dyn Any>,
    },
    Class {
        pending: SharedPending,
        tag: UpdateTag,
        payload: Option<StatePayload>,
        callback: Option<Rc<dyn Fn()>>,
    },
}

/// A state transition requested outside the reconciler.
pub(crate) struct PendingUpdate {
    pub(crate) fiber: FiberId,
    pub(crate) priority: PriorityLevel,
    pub(crate) kind: UpdateKind,
}

impl PendingUpdate {
    /// The priority is filled in by [`RuntimeHandle::enqueue_update`].
    pub(crate) fn new(fiber: FiberId, kind: UpdateKind) -> Self {
        Self {
            fiber,
            priority: PriorityLevel::Normal,
            kind,
        }
    }
}

impl fmt::Debug for PendingUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            UpdateKind::Hook { .. } => "hook",
            UpdateKind::Class { .. } => "class",
        };
        f.debug_struct("PendingUpdate")
            .field("fiber", &self.fiber)
            .field("priority", &self.priority)
            .field("kind", &kind)
            .finish()
    }
}

/// Something a settled thenable asks the reconciler to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Wakeup {
    /// A render suspended at `expiration` on this thenable may now succeed.
    Ping {
        root: RootId,
        thenable: ThenableId,
        expiration: ExpirationTime,
    },
    /// A committed boundary showing its fallback should try its content again.
    Retry { boundary: FiberId, thenable: ThenableId },
}

pub(crate) type WakeupNotifier = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
pub(crate) struct WakeupInbox {
    queue: Mutex<Vec<Wakeup>>,
    notifier: RwLock<Option<WakeupNotifier>>,
}

impl WakeupInbox {
    fn push(&self, wakeup: Wakeup) {
        match self.queue.lock() {
            Ok(mut queue) => queue.push(wakeup),
            Err(poisoned) => poisoned.into_inner().push(wakeup),
        }
        let notifier = match self.notifier.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        if let Some(notify) = notifier {
            notify();
        }
    }

    fn take(&self) -> Vec<Wakeup> {
        match self.queue.lock() {
            Ok(mut queue) => std::mem::take(&mut *queue),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }

    fn set_notifier(&self, notifier: Option<WakeupNotifier>) {
        match self.notifier.write() {
            Ok(mut guard) => *guard = notifier,
            Err(poisoned) => *poisoned.into_inner() = notifier,
        }
    }
}

struct WakeupListener {
    inbox: Arc<WakeupInbox>,
    wakeup: Wakeup,
}

impl ArcWake for WakeupListener {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        arc_self.inbox.push(arc_self.wakeup);
    }
}

struct RuntimeInner {
    scheduler: Rc<dyn HostScheduler>,
    updates: RefCell<Vec<PendingUpdate>>,
    drain_scheduled: Cell<bool>,
    current_priority: Cell<PriorityLevel>,
    wakeups: Arc<WakeupInbox>,
}

impl RuntimeInner {
    fn enqueue_update(&self, mut update: PendingUpdate) {
        update.priority = self.current_priority.get();
        let was_empty = {
            let mut updates = self.updates.borrow_mut();
            let was_empty = updates.is_empty();
            updates.push(update);
            was_empty
        };
        if was_empty && !self.drain_scheduled.replace(true) {
            self.scheduler
                .schedule_callback(
                    self.current_priority.get(),
                    ScheduledTask::ProcessUpdates,
                    None,
                );
        }
    }

    fn take_updates(&self) -> Vec<PendingUpdate> {
        self.drain_scheduled.set(false);
        std::mem::take(&mut *self.updates.borrow_mut())
    }
}

#[derive(Clone)]
pub(crate) struct Runtime {
    inner: Rc<RuntimeInner>,
}

impl Runtime {
    pub(crate) fn new(scheduler: Rc<dyn HostScheduler>) -> Self {
        let wakeups = Arc::new(WakeupInbox::default());
        wakeups.set_notifier(scheduler.wakeup_notifier());
        Self {
            inner: Rc::new(RuntimeInner {
                scheduler,
                updates: RefCell::new(Vec::new()),
                drain_scheduled: Cell::new(false),
                current_priority: Cell::new(PriorityLevel::Normal),
                wakeups,
            }),
        }
    }

    pub(crate) fn handle(&self) -> RuntimeHandle {
        RuntimeHandle(Rc::downgrade(&self.inner))
    }

    pub(crate) fn scheduler(&self) -> &Rc<dyn HostScheduler> {
        &self.inner.scheduler
    }

    pub(crate) fn current_priority(&self) -> PriorityLevel {
        self.inner.current_priority.get()
    }

    /// Sets the ambient priority and returns the previous one.
    pub(crate) fn set_current_priority(&self, priority: PriorityLevel) -> PriorityLevel {
        self.inner.current_priority.replace(priority)
    }

    pub(crate) fn take_updates(&self) -> Vec<PendingUpdate> {
        self.inner.take_updates()
    }

    pub(crate) fn has_updates(&self) -> bool {
        !self.inner.updates.borrow().is_empty()
    }

    pub(crate) fn take_wakeups(&self) -> Vec<Wakeup> {
        self.inner.wakeups.take()
    }

    #[cfg(test)]
    pub(crate) fn set_wakeup_notifier(&self, notifier: Option<WakeupNotifier>) {
        self.inner.wakeups.set_notifier(notifier);
    }

    /// A waker that files `wakeup` when the thenable it is attached to settles.
    pub(crate) fn waker(&self, wakeup: Wakeup) -> Waker {
        futures_task::waker(Arc::new(WakeupListener {
            inbox: self.inner.wakeups.clone(),
            wakeup,
        }))
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("pending_updates", &self.inner.updates.borrow().len())
            .field("current_priority", &self.inner.current_priority.get())
            .finish()
    }
}

#[derive(Clone)]
pub struct RuntimeHandle(Weak<RuntimeInner>);

impl RuntimeHandle {
    /// Queues an update. Dropped silently once the reconciler is gone.
    pub(crate) fn enqueue_update(&self, update: PendingUpdate) {
        if let Some(inner) = self.0.upgrade() {
            inner.enqueue_update(update);
        }
    }

    pub fn is_alive(&self) -> bool {
        self.0.strong_count() > 0
    }
}

impl fmt::Debug for RuntimeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeHandle")
            .field("alive", &self.is_alive())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::Element;
    use crate::fiber::{fiber_from_element, FiberArena, FiberMode};
    use crate::test_support::RecordingScheduler as CountingScheduler;
    use crate::thenable::Thenable;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn some_fiber() -> FiberId {
        let mut arena = FiberArena::new();
        arena.alloc(fiber_from_element(
            &Element::host("div"),
            FiberMode::empty(),
            ExpirationTime::NO_WORK,
        ))
    }

    #[test]
    fn first_update_schedules_one_drain_at_ambient_priority() {
        let scheduler = Rc::new(CountingScheduler::default());
        let runtime = Runtime::new(scheduler.clone());
        let handle = runtime.handle();
        let fiber = some_fiber();
        runtime.set_current_priority(PriorityLevel::UserBlocking);
        for _ in 0..3 {
            handle.enqueue_update(PendingUpdate::new(
                fiber,
                UpdateKind::Class {
                    pending: SharedPending::default(),
                    tag: UpdateTag::ForceUpdate,
                    payload: None,
                    callback: None,
                },
            ));
        }
        assert_eq!(
            *scheduler.scheduled.borrow(),
            vec![(PriorityLevel::UserBlocking, ScheduledTask::ProcessUpdates)]
        );
        let updates = runtime.take_updates();
        assert_eq!(updates.len(), 3);
        assert!(updates.iter().all(|u| u.priority == PriorityLevel::UserBlocking));
    }

    #[test]
    fn settled_thenable_files_wakeup_and_notifies() {
        let runtime = Runtime::new(Rc::new(CountingScheduler::default()));
        let notified = Arc::new(AtomicUsize::new(0));
        let counter = notified.clone();
        runtime.set_wakeup_notifier(Some(Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })));
        let thenable = Thenable::new();
        let wakeup = Wakeup::Retry {
            boundary: some_fiber(),
            thenable: thenable.id(),
        };
        thenable.then(runtime.waker(wakeup));
        assert!(runtime.take_wakeups().is_empty());
        thenable.resolve(1u8);
        assert_eq!(runtime.take_wakeups(), vec![wakeup]);
        assert_eq!(notified.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn handle_outliving_runtime_is_inert() {
        let runtime = Runtime::new(Rc::new(CountingScheduler::default()));
        let handle = runtime.handle();
        drop(runtime);
        assert!(!handle.is_alive());
    }
}
