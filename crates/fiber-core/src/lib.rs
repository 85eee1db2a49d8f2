#![doc = r"Interruptible fiber reconciler: prioritized, resumable rendering of component trees
with Suspense and a three-pass commit."]

extern crate self as fiber_core;

pub mod applier;
pub mod hash;
pub mod platform;

mod begin_work;
mod child_reconciler;
mod commit;
mod complete_work;
mod component;
mod config;
mod context;
mod element;
mod error;
mod expiration;
mod fiber;
mod hooks;
mod profiler;
mod root;
mod runtime;
mod suspense;
mod thenable;
mod unwind;
mod update_queue;
mod work_loop;

pub use applier::{
    diff_props, Applier, HostId, MemoryApplier, MemoryNode, MemoryNodeKind, PropChange,
    UpdatePayload,
};
pub use component::{
    state, ClassType, CompareFn, Component, ForwardRefType, FunctionComponent, LazyType, MemoType,
    RenderResult,
    StateValue, Updater,
};
pub use config::ReconcilerConfig;
pub use context::{AnyContext, Context, ContextId};
pub use element::{
    shallow_equal, Element, ElementType, Key, Node, PropValue, Props, Ref, RefObject, RefTarget,
    RevealOrder,
    TailMode,
};
pub use error::{CapturedError, NodeError, ReconcileError, Thrown};
pub use expiration::{ExpirationTime, PriorityLevel};
pub use fiber::{EffectFlags, Fiber, FiberArena, FiberId, FiberMode, WorkTag};
pub use hooks::{Cleanup, Dispatch, RenderCx, StateSetter};
pub use platform::{CallbackHandle, Clock, HostScheduler, ScheduledTask, TaskStatus, TimeoutHandle};
pub use profiler::{ProfilerPhase, ProfilerReport};
pub use root::{RootId, RootMode};
pub use runtime::RuntimeHandle;
pub use thenable::{Thenable, ThenableId, ThenableState};
pub use work_loop::Reconciler;

#[cfg(test)]
#[path = "tests/support.rs"]
mod test_support;

#[cfg(test)]
#[path = "tests/reconciler_tests.rs"]
mod reconciler_tests;
