//! Platform abstraction traits for the reconciler's scheduling needs.
//!
//! The reconciler never decides *when* the host thread yields. It asks the
//! host through [`HostScheduler`] and hands it opaque [`ScheduledTask`]
//! tokens; the host later feeds each token back into
//! `Reconciler::run_task`.

use std::sync::Arc;

use crate::expiration::PriorityLevel;
use crate::root::RootId;

/// A unit of reconciler work the host must run later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScheduledTask {
    /// Render (and possibly commit) a root concurrently.
    PerformWork(RootId),
    /// Drain the queue of roots with synchronous work.
    FlushSyncQueue,
    /// Run deferred passive effects from the last commit.
    FlushPassiveEffects,
    /// A delayed commit of a suspended tree became due.
    CommitTimeout(RootId),
    /// Apply state updates queued by setters and resolved thenables.
    ProcessUpdates,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallbackHandle(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimeoutHandle(pub u64);

/// Outcome of running one scheduled task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Done,
    /// The task yielded; the host should run the same callback again later.
    Continue,
}

/// Cooperative task scheduler provided by the host.
pub trait HostScheduler {
    /// Monotonic milliseconds since an arbitrary origin.
    fn now_ms(&self) -> u64;

    /// `true` once the current time slice is used up.
    fn should_yield(&self) -> bool;

    /// Queues `task` at `priority`. `timeout_ms` is how long the task may wait
    /// before the host should run it with `did_timeout = true`.
    fn schedule_callback(
        &self,
        priority: PriorityLevel,
        task: ScheduledTask,
        timeout_ms: Option<u64>,
    ) -> CallbackHandle;

    fn cancel_callback(&self, handle: CallbackHandle);

    fn schedule_timeout(&self, task: ScheduledTask, delay_ms: u64) -> TimeoutHandle;

    fn cancel_timeout(&self, handle: TimeoutHandle);

    /// Hint that a commit changed the host tree and a paint would be useful.
    fn request_paint(&self) {}

    /// Callback invoked from any thread when a thenable the reconciler
    /// listens to settles. Hosts typically respond by queueing
    /// [`ScheduledTask::ProcessUpdates`].
    fn wakeup_notifier(&self) -> Option<Arc<dyn Fn() + Send + Sync>> {
        None
    }
}

/// Provides timing information for host scheduler implementations.
pub trait Clock {
    /// Instant type produced by this clock implementation.
    type Instant: Copy;

    /// Returns the current instant.
    fn now(&self) -> Self::Instant;

    /// Returns the number of milliseconds elapsed since `since`.
    fn elapsed_millis(&self, since: Self::Instant) -> u64;
}
