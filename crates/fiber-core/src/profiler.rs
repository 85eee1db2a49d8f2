//! Render timing for `Profiler` subtrees.

use std::fmt;
use std::rc::Rc;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProfilerPhase {
    Mount,
    Update,
}

/// Timing of one committed render of a profiled subtree. All values are
/// milliseconds on the scheduler clock.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProfilerReport {
    pub id: Rc<str>,
    pub phase: ProfilerPhase,
    /// Time spent rendering the subtree in this commit.
    pub actual_duration: u64,
    /// Estimated time to re-render the whole subtree without memoization.
    pub base_duration: u64,
    pub start_time: u64,
    pub commit_time: u64,
}

#[derive(Clone)]
pub(crate) struct ProfilerConfig {
    pub(crate) id: Rc<str>,
    pub(crate) on_render: Rc<dyn Fn(&ProfilerReport)>,
}

impl fmt::Debug for ProfilerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProfilerConfig").field("id", &self.id).finish()
    }
}

/// Start stamp of the fiber currently in begin/complete, so its duration can
/// be charged when it completes.
#[derive(Debug, Default)]
pub(crate) struct ProfilerTimer {
    pub(crate) commit_time: u64,
}
