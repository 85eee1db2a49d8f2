//! Standard runtime services backed by Rust's `std` library.
//!
//! This crate provides a concrete [`HostScheduler`] for `fiber-core`: a
//! priority task queue with per-priority timeouts, delayed timers, and a
//! time-sliced `should_yield` driven by [`std::time::Instant`]. A host
//! constructs a [`StdRuntime`] around its applier and pumps it from its
//! event loop.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use fiber_core::{
    Applier, CallbackHandle, Clock, HostScheduler, PriorityLevel, Reconciler, ReconcileError,
    ReconcilerConfig,
    ScheduledTask, TaskStatus, TimeoutHandle,
};
use tracing::{trace, warn};

/// How long a task of each priority may wait before it is run as expired.
pub fn priority_timeout_ms(priority: PriorityLevel) -> u64 {
    match priority {
        PriorityLevel::Immediate => 0,
        PriorityLevel::UserBlocking => 250,
        PriorityLevel::Normal => 5_000,
        PriorityLevel::Low => 10_000,
        PriorityLevel::Idle => u64::from(u32::MAX),
    }
}

/// Clock implementation backed by [`std::time`].
#[derive(Debug, Default, Clone)]
pub struct StdClock;

impl Clock for StdClock {
    type Instant = Instant;

    fn now(&self) -> Self::Instant {
        Instant::now()
    }

    fn elapsed_millis(&self, since: Self::Instant) -> u64 {
        since.elapsed().as_millis() as u64
    }
}

impl StdClock {
    /// Returns the elapsed time as a [`Duration`] for convenience.
    pub fn elapsed(&self, since: Instant) -> Duration {
        since.elapsed()
    }
}

type WakeCallback = Arc<dyn Fn() + Send + Sync + 'static>;

#[derive(Clone, Copy, Debug)]
struct QueuedTask {
    handle: CallbackHandle,
    task: ScheduledTask,
    priority: PriorityLevel,
    expiration_ms: u64,
}

/// Scheduler that orders reconciler tasks by expiration and slices work by
/// wall-clock time.
pub struct StdScheduler {
    clock: StdClock,
    origin: Instant,
    slice_ms: u64,
    slice_deadline: Cell<u64>,
    next_id: Cell<u64>,
    /// Keyed by (expiration, insertion order).
    queue: RefCell<BTreeMap<(u64, u64), QueuedTask>>,
    timers: RefCell<BTreeMap<(u64, u64), ScheduledTask>>,
    paint_requested: Cell<bool>,
    wakeup_pending: Arc<AtomicBool>,
    wake_callback: Arc<RwLock<Option<WakeCallback>>>,
}

impl StdScheduler {
    pub fn new() -> Self {
        Self::with_slice(Duration::from_millis(5))
    }

    /// A scheduler that yields after `slice` of uninterrupted work.
    pub fn with_slice(slice: Duration) -> Self {
        Self {
            clock: StdClock,
            origin: Instant::now(),
            slice_ms: slice.as_millis() as u64,
            slice_deadline: Cell::new(0),
            next_id: Cell::new(1),
            queue: RefCell::new(BTreeMap::new()),
            timers: RefCell::new(BTreeMap::new()),
            paint_requested: Cell::new(false),
            wakeup_pending: Arc::new(AtomicBool::new(false)),
            wake_callback: Arc::new(RwLock::new(None)),
        }
    }

    /// Registers a callback invoked, possibly from another thread, whenever
    /// a thenable settles and the scheduler has work to pick up.
    pub fn set_wake_callback(&self, callback: impl Fn() + Send + Sync + 'static) {
        match self.wake_callback.write() {
            Ok(mut guard) => *guard = Some(Arc::new(callback)),
            Err(poisoned) => *poisoned.into_inner() = Some(Arc::new(callback)),
        }
    }

    /// Clears any registered wake callback.
    pub fn clear_wake_callback(&self) {
        match self.wake_callback.write() {
            Ok(mut guard) => *guard = None,
            Err(poisoned) => *poisoned.into_inner() = None,
        }
    }

    /// Returns whether a paint was requested since the last call.
    pub fn take_paint_request(&self) -> bool {
        self.paint_requested.replace(false)
    }

    /// Whether any task is queued or any timer is armed.
    pub fn has_pending_work(&self) -> bool {
        !self.queue.borrow().is_empty()
            || !self.timers.borrow().is_empty()
            || self.wakeup_pending.load(Ordering::SeqCst)
    }

    /// Milliseconds until the earliest armed timer fires, if any.
    pub fn next_timer_delay(&self) -> Option<Duration> {
        let now = self.now_ms();
        self.timers
            .borrow()
            .keys()
            .next()
            .map(|&(due, _)| Duration::from_millis(due.saturating_sub(now)))
    }

    fn next_id(&self) -> u64 {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        id
    }

    fn push(
        &self,
        handle: CallbackHandle,
        task: ScheduledTask,
        priority: PriorityLevel,
        expiration_ms: u64,
    ) {
        self.queue.borrow_mut().insert(
            (expiration_ms, handle.0),
            QueuedTask {
                handle,
                task,
                priority,
                expiration_ms,
            },
        );
    }

    /// Moves due timers and pending wakeups into the task queue.
    fn advance_timers(&self) {
        let now = self.now_ms();
        if self.wakeup_pending.swap(false, Ordering::SeqCst) {
            self.schedule_callback(PriorityLevel::Normal, ScheduledTask::ProcessUpdates, None);
        }
        loop {
            let due = {
                let mut timers = self.timers.borrow_mut();
                match timers.keys().next().copied() {
                    Some(key) if key.0 <= now => timers.remove(&key),
                    _ => None,
                }
            };
            let Some(task) = due else {
                break;
            };
            self.schedule_callback(PriorityLevel::Normal, task, Some(0));
        }
    }

    fn pop(&self) -> Option<QueuedTask> {
        let mut queue = self.queue.borrow_mut();
        let key = *queue.keys().next()?;
        queue.remove(&key)
    }

    /// Runs queued tasks against `reconciler` until nothing is runnable.
    /// Armed timers that are not yet due stay armed.
    pub fn run_until_idle<A: Applier>(
        &self,
        reconciler: &mut Reconciler<A>,
    ) -> Result<(), ReconcileError> {
        loop {
            self.advance_timers();
            let Some(next) = self.pop() else {
                return Ok(());
            };
            let now = self.now_ms();
            let did_timeout = next.expiration_ms <= now;
            self.slice_deadline.set(now + self.slice_ms);
            trace!(task = ?next.task, priority = ?next.priority, did_timeout, "running task");
            match reconciler.run_task(next.task, did_timeout) {
                Ok(TaskStatus::Continue) => self.push(
                    next.handle,
                    next.task,
                    next.priority,
                    next.expiration_ms,
                ),
                Ok(TaskStatus::Done) => {}
                Err(error) => {
                    warn!(%error, task = ?next.task, "task failed");
                    return Err(error);
                }
            }
        }
    }
}

impl Default for StdScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for StdScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StdScheduler")
            .field("queued", &self.queue.borrow().len())
            .field("timers", &self.timers.borrow().len())
            .field("slice_ms", &self.slice_ms)
            .finish()
    }
}

impl HostScheduler for StdScheduler {
    fn now_ms(&self) -> u64 {
        self.clock.elapsed_millis(self.origin)
    }

    fn should_yield(&self) -> bool {
        self.now_ms() >= self.slice_deadline.get()
    }

    fn schedule_callback(
        &self,
        priority: PriorityLevel,
        task: ScheduledTask,
        timeout_ms: Option<u64>,
    ) -> CallbackHandle {
        let handle = CallbackHandle(self.next_id());
        let timeout = timeout_ms.unwrap_or_else(|| priority_timeout_ms(priority));
        self.push(handle, task, priority, self.now_ms().saturating_add(timeout));
        handle
    }

    fn cancel_callback(&self, handle: CallbackHandle) {
        self.queue.borrow_mut().retain(|_, queued| queued.handle != handle);
    }

    fn schedule_timeout(&self, task: ScheduledTask, delay_ms: u64) -> TimeoutHandle {
        let id = self.next_id();
        self.timers
            .borrow_mut()
            .insert((self.now_ms().saturating_add(delay_ms), id), task);
        TimeoutHandle(id)
    }

    fn cancel_timeout(&self, handle: TimeoutHandle) {
        self.timers.borrow_mut().retain(|&(_, id), _| id != handle.0);
    }

    fn request_paint(&self) {
        self.paint_requested.set(true);
    }

    fn wakeup_notifier(&self) -> Option<Arc<dyn Fn() + Send + Sync>> {
        let pending = Arc::clone(&self.wakeup_pending);
        let callback = Arc::clone(&self.wake_callback);
        Some(Arc::new(move || {
            pending.store(true, Ordering::SeqCst);
            let callback = match callback.read() {
                Ok(guard) => guard.clone(),
                Err(poisoned) => poisoned.into_inner().clone(),
            };
            if let Some(callback) = callback {
                callback();
            }
        }))
    }
}

/// Convenience container bundling a reconciler with the standard scheduler.
pub struct StdRuntime<A: Applier> {
    scheduler: Rc<StdScheduler>,
    reconciler: Reconciler<A>,
}

impl<A: Applier> StdRuntime<A> {
    /// Creates a runtime rendering into `applier` with the default
    /// configuration.
    pub fn new(applier: A) -> Self {
        Self::with_config(applier, ReconcilerConfig::default())
    }

    pub fn with_config(applier: A, config: ReconcilerConfig) -> Self {
        Self::with_scheduler(applier, Rc::new(StdScheduler::default()), config)
    }

    pub fn with_scheduler(
        applier: A,
        scheduler: Rc<StdScheduler>,
        config: ReconcilerConfig,
    ) -> Self {
        let reconciler = Reconciler::with_config(applier, scheduler.clone(), config);
        Self { scheduler, reconciler }
    }

    /// Returns the scheduler implementation.
    pub fn scheduler(&self) -> Rc<StdScheduler> {
        Rc::clone(&self.scheduler)
    }

    pub fn reconciler(&self) -> &Reconciler<A> {
        &self.reconciler
    }

    pub fn reconciler_mut(&mut self) -> &mut Reconciler<A> {
        &mut self.reconciler
    }

    /// Runs every runnable task. Call again once
    /// [`StdScheduler::next_timer_delay`] has elapsed or the wake callback
    /// fired.
    pub fn run_until_idle(&mut self) -> Result<(), ReconcileError> {
        self.scheduler.run_until_idle(&mut self.reconciler)
    }

    /// Registers a callback invoked when settled thenables need processing.
    pub fn set_wake_callback(&self, callback: impl Fn() + Send + Sync + 'static) {
        self.scheduler.set_wake_callback(callback);
    }
}

impl<A: Applier> fmt::Debug for StdRuntime<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StdRuntime")
            .field("scheduler", &self.scheduler)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use fiber_core::{
        Element, FunctionComponent, HostScheduler, MemoryApplier, Node, PriorityLevel, Props,
        RootMode,
        ScheduledTask, Thenable, Thrown,
    };

    use super::{StdRuntime, StdScheduler};

    #[test]
    fn urgent_tasks_run_before_lazy_ones() {
        let scheduler = StdScheduler::new();
        scheduler.schedule_callback(PriorityLevel::Low, ScheduledTask::FlushPassiveEffects, None);
        scheduler.schedule_callback(PriorityLevel::Immediate, ScheduledTask::FlushSyncQueue, None);
        let first = scheduler.pop().expect("queued task");
        assert_eq!(first.task, ScheduledTask::FlushSyncQueue);
    }

    #[test]
    fn cancelled_callbacks_and_timeouts_never_run() {
        let scheduler = StdScheduler::new();
        let handle = scheduler.schedule_callback(
            PriorityLevel::Normal,
            ScheduledTask::ProcessUpdates,
            None,
        );
        let timeout = scheduler.schedule_timeout(ScheduledTask::FlushPassiveEffects, 10_000);
        assert!(scheduler.has_pending_work());
        scheduler.cancel_callback(handle);
        scheduler.cancel_timeout(timeout);
        assert!(!scheduler.has_pending_work());
    }

    #[test]
    fn concurrent_root_renders_to_completion() {
        let mut applier = MemoryApplier::new();
        let container = applier.create_container();
        let mut runtime = StdRuntime::new(applier);
        let root = runtime.reconciler_mut().create_root(container, RootMode::Concurrent);

        let items: Vec<Node> = (0..50)
            .map(|i| Element::host("li").with_key(i as u64).child(i.to_string()).into())
            .collect();
        runtime
            .reconciler_mut()
            .update_container(root, Element::host("ul").children(items))
            .expect("schedule");
        assert_eq!(runtime.reconciler().applier().text_content(container), "");

        runtime.run_until_idle().expect("run");
        let text = runtime.reconciler().applier().text_content(container);
        assert!(text.starts_with("0123"));
        assert!(text.ends_with("4849"));
        assert!(runtime.scheduler().take_paint_request());
    }

    #[test]
    fn settled_thenable_wakes_the_host_and_retries() {
        let mut applier = MemoryApplier::new();
        let container = applier.create_container();
        let mut runtime = StdRuntime::new(applier);
        let woken = Arc::new(AtomicUsize::new(0));
        let counter = woken.clone();
        runtime.set_wake_callback(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let root = runtime.reconciler_mut().create_root(container, RootMode::Legacy);

        let data = Thenable::new();
        let reader = {
            let data = data.clone();
            FunctionComponent::new("Reader", move |_cx, _props| match data.value::<String>() {
                Some(text) => Ok(Node::text(text)),
                None => Err(Thrown::Suspend(data.clone())),
            })
        };
        runtime
            .reconciler_mut()
            .update_container(root, Element::suspense("wait", reader.element(Props::new())))
            .expect("mount");
        runtime.run_until_idle().expect("run");
        assert_eq!(runtime.reconciler().applier().text_content(container), "wait");

        data.resolve("ready".to_string());
        assert!(woken.load(Ordering::SeqCst) >= 1);
        runtime.run_until_idle().expect("retry");
        assert_eq!(runtime.reconciler().applier().text_content(container), "ready");
    }
}
