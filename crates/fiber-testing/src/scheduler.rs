//! Deterministic [`HostScheduler`] driven entirely by the test.
//!
//! Time only moves when the test calls [`VirtualScheduler::advance_time`],
//! and `should_yield` only returns `true` while a yield budget set by
//! [`VirtualScheduler::flush_until_yield`] is exhausted. Tasks are ordered by
//! expiration and then by insertion, like the standard scheduler.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use fiber_core::{
    Applier, CallbackHandle, HostScheduler, PriorityLevel, ReconcileError, Reconciler,
    ScheduledTask, TaskStatus,
    TimeoutHandle,
};
use tracing::trace;

/// Timeout applied to callbacks scheduled without an explicit one.
pub fn default_timeout_ms(priority: PriorityLevel) -> u64 {
    match priority {
        PriorityLevel::Immediate => 0,
        PriorityLevel::UserBlocking => 250,
        PriorityLevel::Normal => 5_000,
        PriorityLevel::Low => 10_000,
        PriorityLevel::Idle => u64::from(u32::MAX),
    }
}

#[derive(Clone, Copy, Debug)]
struct Queued {
    handle: CallbackHandle,
    priority: PriorityLevel,
    task: ScheduledTask,
    expiration_ms: u64,
}

pub struct VirtualScheduler {
    now: Cell<u64>,
    next_id: Cell<u64>,
    queue: RefCell<BTreeMap<(u64, u64), Queued>>,
    timers: RefCell<BTreeMap<(u64, u64), ScheduledTask>>,
    /// Units of work left before `should_yield` reports `true`.
    yield_budget: Cell<Option<usize>>,
    yielded: Cell<bool>,
    paints: Cell<usize>,
    wakeup_pending: Arc<AtomicBool>,
    wakeups: Arc<AtomicUsize>,
}

impl VirtualScheduler {
    pub fn new() -> Self {
        Self {
            now: Cell::new(0),
            next_id: Cell::new(1),
            queue: RefCell::new(BTreeMap::new()),
            timers: RefCell::new(BTreeMap::new()),
            yield_budget: Cell::new(None),
            yielded: Cell::new(false),
            paints: Cell::new(0),
            wakeup_pending: Arc::new(AtomicBool::new(false)),
            wakeups: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Current virtual time in milliseconds.
    pub fn now(&self) -> u64 {
        self.now.get()
    }

    /// Moves the clock forward and queues every timer that became due.
    pub fn advance_time(&self, ms: u64) {
        self.now.set(self.now.get().saturating_add(ms));
        let now = self.now.get();
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
            trace!(?task, now, "timer fired");
            self.schedule_callback(PriorityLevel::Normal, task, Some(0));
        }
    }

    /// Number of callbacks waiting to run.
    pub fn pending_task_count(&self) -> usize {
        self.queue.borrow().len()
    }

    /// Queued callbacks in the order they would run.
    pub fn pending_tasks(&self) -> Vec<(PriorityLevel, ScheduledTask)> {
        self.queue
            .borrow()
            .values()
            .map(|queued| (queued.priority, queued.task))
            .collect()
    }

    pub fn armed_timer_count(&self) -> usize {
        self.timers.borrow().len()
    }

    /// Delay until the earliest armed timer is due.
    pub fn next_timer_delay(&self) -> Option<u64> {
        let now = self.now.get();
        self.timers
            .borrow()
            .keys()
            .next()
            .map(|&(due, _)| due.saturating_sub(now))
    }

    /// Whether anything would run on the next flush.
    pub fn has_pending_tasks(&self) -> bool {
        !self.queue.borrow().is_empty() || self.wakeup_pending.load(Ordering::SeqCst)
    }

    /// Paint requests received since the last call.
    pub fn take_paint_count(&self) -> usize {
        self.paints.replace(0)
    }

    /// How often a settled thenable has poked this scheduler.
    pub fn wakeup_count(&self) -> usize {
        self.wakeups.load(Ordering::SeqCst)
    }

    /// Runs tasks until the queue is empty. Timers that are not yet due stay
    /// armed.
    pub fn flush_all<A: Applier>(
        &self,
        reconciler: &mut Reconciler<A>,
    ) -> Result<(), ReconcileError> {
        self.yield_budget.set(None);
        while let Some(next) = self.next_runnable(|_| true) {
            self.run(reconciler, next, false)?;
        }
        Ok(())
    }

    /// Runs the single most urgent task. Returns whether one ran.
    pub fn flush_next<A: Applier>(
        &self,
        reconciler: &mut Reconciler<A>,
    ) -> Result<bool, ReconcileError> {
        self.yield_budget.set(None);
        match self.next_runnable(|_| true) {
            Some(next) => {
                self.run(reconciler, next, false)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Runs tasks until a render yields after `units` units of work. Returns
    /// whether work remains queued.
    pub fn flush_until_yield<A: Applier>(
        &self,
        reconciler: &mut Reconciler<A>,
        units: usize,
    ) -> Result<bool, ReconcileError> {
        self.yield_budget.set(Some(units));
        self.yielded.set(false);
        let result = self.flush_until_yielded(reconciler);
        self.yield_budget.set(None);
        result?;
        Ok(self.has_pending_tasks())
    }

    fn flush_until_yielded<A: Applier>(
        &self,
        reconciler: &mut Reconciler<A>,
    ) -> Result<(), ReconcileError> {
        while let Some(next) = self.next_runnable(|_| true) {
            self.run(reconciler, next, false)?;
            if self.yielded.get() {
                break;
            }
        }
        Ok(())
    }

    /// Runs only the tasks whose timeout has passed, flagging them as timed
    /// out.
    pub fn flush_expired<A: Applier>(
        &self,
        reconciler: &mut Reconciler<A>,
    ) -> Result<(), ReconcileError> {
        self.yield_budget.set(None);
        let now = self.now.get();
        while let Some(next) = self.next_runnable(|queued| queued.expiration_ms <= now) {
            self.run(reconciler, next, true)?;
        }
        Ok(())
    }

    fn next_runnable(&self, accept: impl Fn(&Queued) -> bool) -> Option<Queued> {
        if self.wakeup_pending.swap(false, Ordering::SeqCst) {
            self.schedule_callback(PriorityLevel::Normal, ScheduledTask::ProcessUpdates, None);
        }
        let mut queue = self.queue.borrow_mut();
        let key = *queue.keys().next()?;
        if !accept(queue.get(&key)?) {
            return None;
        }
        queue.remove(&key)
    }

    fn run<A: Applier>(
        &self,
        reconciler: &mut Reconciler<A>,
        next: Queued,
        did_timeout: bool,
    ) -> Result<(), ReconcileError> {
        trace!(task = ?next.task, priority = ?next.priority, did_timeout, "virtual task");
        if reconciler.run_task(next.task, did_timeout)? == TaskStatus::Continue {
            self.queue
                .borrow_mut()
                .insert((next.expiration_ms, next.handle.0), next);
        }
        Ok(())
    }

    fn next_id(&self) -> u64 {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        id
    }
}

impl Default for VirtualScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for VirtualScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VirtualScheduler")
            .field("now", &self.now.get())
            .field("queued", &self.queue.borrow().len())
            .field("timers", &self.timers.borrow().len())
            .finish()
    }
}

impl HostScheduler for VirtualScheduler {
    fn now_ms(&self) -> u64 {
        self.now.get()
    }

    fn should_yield(&self) -> bool {
        match self.yield_budget.get() {
            None => false,
            Some(0) => {
                self.yielded.set(true);
                true
            }
            Some(left) => {
                self.yield_budget.set(Some(left - 1));
                false
            }
        }
    }

    fn schedule_callback(
        &self,
        priority: PriorityLevel,
        task: ScheduledTask,
        timeout_ms: Option<u64>,
    ) -> CallbackHandle {
        let handle = CallbackHandle(self.next_id());
        let timeout = timeout_ms.unwrap_or_else(|| default_timeout_ms(priority));
        let expiration_ms = self.now.get().saturating_add(timeout);
        self.queue.borrow_mut().insert(
            (expiration_ms, handle.0),
            Queued {
                handle,
                priority,
                task,
                expiration_ms,
            },
        );
        handle
    }

    fn cancel_callback(&self, handle: CallbackHandle) {
        self.queue.borrow_mut().retain(|_, queued| queued.handle != handle);
    }

    fn schedule_timeout(&self, task: ScheduledTask, delay_ms: u64) -> TimeoutHandle {
        let id = self.next_id();
        self.timers
            .borrow_mut()
            .insert((self.now.get().saturating_add(delay_ms), id), task);
        TimeoutHandle(id)
    }

    fn cancel_timeout(&self, handle: TimeoutHandle) {
        self.timers.borrow_mut().retain(|&(_, id), _| id != handle.0);
    }

    fn request_paint(&self) {
        self.paints.set(self.paints.get() + 1);
    }

    fn wakeup_notifier(&self) -> Option<Arc<dyn Fn() + Send + Sync>> {
        let pending = Arc::clone(&self.wakeup_pending);
        let count = Arc::clone(&self.wakeups);
        Some(Arc::new(move || {
            count.fetch_add(1, Ordering::SeqCst);
            pending.store(true, Ordering::SeqCst);
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tasks_run_in_expiration_order() {
        let scheduler = VirtualScheduler::new();
        scheduler.schedule_callback(PriorityLevel::Low, ScheduledTask::FlushPassiveEffects, None);
        scheduler.schedule_callback(
            PriorityLevel::UserBlocking,
            ScheduledTask::ProcessUpdates,
            None,
        );
        scheduler.schedule_callback(PriorityLevel::Immediate, ScheduledTask::FlushSyncQueue, None);
        assert_eq!(
            scheduler.pending_tasks(),
            vec![
                (PriorityLevel::Immediate, ScheduledTask::FlushSyncQueue),
                (PriorityLevel::UserBlocking, ScheduledTask::ProcessUpdates),
                (PriorityLevel::Low, ScheduledTask::FlushPassiveEffects),
            ]
        );
    }

    #[test]
    fn timers_fire_only_when_time_advances() {
        let scheduler = VirtualScheduler::new();
        scheduler.schedule_timeout(ScheduledTask::FlushPassiveEffects, 100);
        let cancelled = scheduler.schedule_timeout(ScheduledTask::ProcessUpdates, 50);
        scheduler.cancel_timeout(cancelled);
        assert_eq!(scheduler.next_timer_delay(), Some(100));

        scheduler.advance_time(99);
        assert_eq!(scheduler.pending_task_count(), 0);
        scheduler.advance_time(1);
        assert_eq!(
            scheduler.pending_tasks(),
            vec![(PriorityLevel::Normal, ScheduledTask::FlushPassiveEffects)]
        );
        assert_eq!(scheduler.armed_timer_count(), 0);
    }

    #[test]
    fn yield_budget_counts_down() {
        let scheduler = VirtualScheduler::new();
        assert!(!scheduler.should_yield());
        scheduler.yield_budget.set(Some(2));
        assert!(!scheduler.should_yield());
        assert!(!scheduler.should_yield());
        assert!(scheduler.should_yield());
        assert!(scheduler.yielded.get());
    }

    #[test]
    fn notifier_marks_wakeup_pending() {
        let scheduler = VirtualScheduler::new();
        let notify = scheduler.wakeup_notifier().expect("notifier");
        assert!(!scheduler.has_pending_tasks());
        notify();
        assert!(scheduler.has_pending_tasks());
        assert_eq!(scheduler.wakeup_count(), 1);
    }
}
