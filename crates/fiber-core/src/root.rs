//! Per-root scheduling bookkeeping.
//!
//! A root tracks the range of expiration times with pending work and the
//! sub-range known to be suspended, so the scheduler can pick the next level
//! to render without walking the tree.

use std::fmt;

use crate::applier::HostId;
use crate::element::Node;
use crate::expiration::{ExpirationTime, PriorityLevel};
use crate::fiber::FiberId;
use crate::hash::{HashMap, HashSet};
use crate::platform::{CallbackHandle, TimeoutHandle};
use crate::thenable::ThenableId;

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RootId(pub(crate) u32);

impl fmt::Debug for RootId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Root({})", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RootMode {
    /// Every update renders synchronously; suspended subtrees commit in an
    /// inconsistent state with their fallback shown.
    Legacy,
    /// Updates are prioritized, rendering yields, and suspended trees are
    /// never committed partially.
    Concurrent,
}

/// The state of a `HostRoot` fiber.
#[derive(Clone, Debug, Default)]
pub(crate) struct RootState {
    pub(crate) element: Node,
}

/// How the root's pending work has been handed to the host.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum RootCallback {
    /// Queued on the internal synchronous queue.
    Sync,
    Host(CallbackHandle),
}

pub(crate) struct FiberRoot {
    pub(crate) id: RootId,
    pub(crate) mode: RootMode,
    pub(crate) container: HostId,
    pub(crate) current: FiberId,
    /// A completed tree waiting to be committed.
    pub(crate) finished_work: Option<FiberId>,
    pub(crate) finished_expiration_time: ExpirationTime,
    /// Pending delayed commit of a suspended tree.
    pub(crate) timeout_handle: Option<TimeoutHandle>,
    pub(crate) callback: Option<RootCallback>,
    pub(crate) callback_expiration_time: ExpirationTime,
    pub(crate) callback_priority: PriorityLevel,
    /// Most urgent pending level.
    pub(crate) first_pending_time: ExpirationTime,
    /// Most urgent suspended level.
    pub(crate) first_suspended_time: ExpirationTime,
    /// Least urgent suspended level.
    pub(crate) last_suspended_time: ExpirationTime,
    /// Next level after the suspended range known to have work.
    pub(crate) next_known_pending_level: ExpirationTime,
    /// Least urgent level pinged by a resolved thenable.
    pub(crate) last_pinged_time: ExpirationTime,
    pub(crate) last_expired_time: ExpirationTime,
    /// Levels already waiting on each thenable.
    pub(crate) ping_cache: HashMap<ThenableId, HashSet<ExpirationTime>>,
}

fn one_lower(time: ExpirationTime) -> ExpirationTime {
    ExpirationTime::from_raw(time.raw().saturating_sub(1))
}

impl FiberRoot {
    pub(crate) fn new(id: RootId, mode: RootMode, container: HostId, current: FiberId) -> Self {
        Self {
            id,
            mode,
            container,
            current,
            finished_work: None,
            finished_expiration_time: ExpirationTime::NO_WORK,
            timeout_handle: None,
            callback: None,
            callback_expiration_time: ExpirationTime::NO_WORK,
            callback_priority: PriorityLevel::Idle,
            first_pending_time: ExpirationTime::NO_WORK,
            first_suspended_time: ExpirationTime::NO_WORK,
            last_suspended_time: ExpirationTime::NO_WORK,
            next_known_pending_level: ExpirationTime::NO_WORK,
            last_pinged_time: ExpirationTime::NO_WORK,
            last_expired_time: ExpirationTime::NO_WORK,
            ping_cache: HashMap::default(),
        }
    }

    pub(crate) fn is_suspended_at_time(&self, time: ExpirationTime) -> bool {
        let first = self.first_suspended_time;
        let last = self.last_suspended_time;
        !first.is_no_work() && first >= time && last <= time
    }

    pub(crate) fn mark_updated_at_time(&mut self, time: ExpirationTime) {
        if time > self.first_pending_time {
            self.first_pending_time = time;
        }
        let first_suspended = self.first_suspended_time;
        if !first_suspended.is_no_work() {
            if time >= first_suspended {
                // The update is more urgent than everything suspended, so
                // retry the whole range.
                self.first_suspended_time = ExpirationTime::NO_WORK;
                self.last_suspended_time = ExpirationTime::NO_WORK;
                self.next_known_pending_level = ExpirationTime::NO_WORK;
            } else if time >= self.last_suspended_time {
                self.last_suspended_time = one_lower(time);
            }
            if time > self.next_known_pending_level {
                self.next_known_pending_level = time;
            }
        }
    }

    pub(crate) fn mark_suspended_at_time(&mut self, time: ExpirationTime) {
        let first_suspended = self.first_suspended_time;
        if first_suspended < time {
            self.first_suspended_time = time;
        }
        if self.last_suspended_time > time || first_suspended.is_no_work() {
            self.last_suspended_time = time;
        }
        if time <= self.last_pinged_time {
            self.last_pinged_time = ExpirationTime::NO_WORK;
        }
        if time <= self.last_expired_time {
            self.last_expired_time = ExpirationTime::NO_WORK;
        }
    }

    pub(crate) fn mark_finished_at_time(
        &mut self,
        finished: ExpirationTime,
        remaining: ExpirationTime,
    ) {
        self.first_pending_time = remaining;
        if finished <= self.last_suspended_time {
            self.first_suspended_time = ExpirationTime::NO_WORK;
            self.last_suspended_time = ExpirationTime::NO_WORK;
            self.next_known_pending_level = ExpirationTime::NO_WORK;
        } else if finished <= self.first_suspended_time {
            self.first_suspended_time = one_lower(finished);
        }
        if finished <= self.last_pinged_time {
            self.last_pinged_time = ExpirationTime::NO_WORK;
        }
        if finished <= self.last_expired_time {
            self.last_expired_time = ExpirationTime::NO_WORK;
        }
    }

    pub(crate) fn mark_expired_at_time(&mut self, time: ExpirationTime) {
        let last_expired = self.last_expired_time;
        if last_expired.is_no_work() || last_expired > time {
            self.last_expired_time = time;
        }
    }

    /// The level the next render of this root should target.
    pub(crate) fn next_expiration_time_to_work_on(&self) -> ExpirationTime {
        if !self.last_expired_time.is_no_work() {
            return self.last_expired_time;
        }
        let first_pending = self.first_pending_time;
        if !self.is_suspended_at_time(first_pending) {
            return first_pending;
        }
        let next_level = self.last_pinged_time.max(self.next_known_pending_level);
        if next_level <= ExpirationTime::IDLE && first_pending != next_level {
            // Idle work is only worth doing if it is the only thing left.
            return ExpirationTime::NO_WORK;
        }
        next_level
    }
}

impl fmt::Debug for FiberRoot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FiberRoot")
            .field("id", &self.id)
            .field("mode", &self.mode)
            .field("current", &self.current)
            .field("first_pending_time", &self.first_pending_time)
            .field("first_suspended_time", &self.first_suspended_time)
            .field("last_suspended_time", &self.last_suspended_time)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::Element;
    use crate::fiber::{fiber_from_element, FiberArena, FiberMode};

    fn root() -> FiberRoot {
        let mut arena = FiberArena::new();
        let current = arena.alloc(fiber_from_element(
            &Element::host("root"),
            FiberMode::CONCURRENT,
            ExpirationTime::NO_WORK,
        ));
        FiberRoot::new(RootId(1), RootMode::Concurrent, HostId::from_raw(0), current)
    }

    #[test]
    fn suspended_level_is_skipped_until_pinged() {
        let mut root = root();
        let level = ExpirationTime::from_ms(5000);
        root.mark_updated_at_time(level);
        assert_eq!(root.next_expiration_time_to_work_on(), level);

        root.mark_suspended_at_time(level);
        assert!(root.is_suspended_at_time(level));
        assert!(root.next_expiration_time_to_work_on().is_no_work());

        root.last_pinged_time = level;
        assert_eq!(root.next_expiration_time_to_work_on(), level);
    }

    #[test]
    fn more_urgent_update_clears_suspended_range() {
        let mut root = root();
        let low = ExpirationTime::from_ms(5000);
        root.mark_updated_at_time(low);
        root.mark_suspended_at_time(low);
        root.mark_updated_at_time(ExpirationTime::SYNC);
        assert!(root.first_suspended_time.is_no_work());
        assert_eq!(root.next_expiration_time_to_work_on(), ExpirationTime::SYNC);
    }

    #[test]
    fn expired_level_wins() {
        let mut root = root();
        root.mark_updated_at_time(ExpirationTime::from_ms(1000));
        let expired = ExpirationTime::from_ms(9000);
        root.mark_expired_at_time(expired);
        assert_eq!(root.next_expiration_time_to_work_on(), expired);
        root.mark_finished_at_time(expired, ExpirationTime::NO_WORK);
        assert!(root.last_expired_time.is_no_work());
    }
}
