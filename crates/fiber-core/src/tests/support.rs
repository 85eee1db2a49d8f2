//! Helpers shared by unit tests inside this crate.

use std::cell::{Cell, RefCell};

use crate::expiration::PriorityLevel;
use crate::platform::{CallbackHandle, HostScheduler, ScheduledTask, TimeoutHandle};

/// Records every request and never runs anything.
#[derive(Default)]
pub(crate) struct RecordingScheduler {
    pub(crate) now: Cell<u64>,
    pub(crate) scheduled: RefCell<Vec<(PriorityLevel, ScheduledTask)>>,
}

impl HostScheduler for RecordingScheduler {
    fn now_ms(&self) -> u64 {
        self.now.get()
    }

    fn should_yield(&self) -> bool {
        false
    }

    fn schedule_callback(
        &self,
        priority: PriorityLevel,
        task: ScheduledTask,
        _timeout_ms: Option<u64>,
    ) -> CallbackHandle {
        let mut scheduled = self.scheduled.borrow_mut();
        scheduled.push((priority, task));
        CallbackHandle(scheduled.len() as u64)
    }

    fn cancel_callback(&self, _handle: CallbackHandle) {}

    fn schedule_timeout(&self, _task: ScheduledTask, _delay_ms: u64) -> TimeoutHandle {
        TimeoutHandle(0)
    }

    fn cancel_timeout(&self, _handle: TimeoutHandle) {}
}
