//! Suspense boundary state shared by begin, complete, unwind and commit.

use std::rc::Rc;

use crate::applier::HostId;
use crate::element::{PropValue, Props, RevealOrder, TailMode};
use crate::expiration::ExpirationTime;
use crate::fiber::{EffectFlags, Fiber, FiberArena, FiberId, FiberMode, FiberState, WorkTag};

/// State of a Suspense fiber whose fallback is showing, or which still owns
/// dehydrated markup.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct SuspenseState {
    pub(crate) dehydrated: Option<HostId>,
    pub(crate) retry_time: ExpirationTime,
}

impl SuspenseState {
    pub(crate) fn timed_out() -> Self {
        Self {
            dehydrated: None,
            retry_time: ExpirationTime::NO_WORK,
        }
    }
}

/// Progress of a SuspenseList that is revealing its rows in order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct SuspenseListRenderState {
    pub(crate) is_backwards: bool,
    /// The row currently being rendered from the tail, if any.
    pub(crate) rendering: Option<FiberId>,
    pub(crate) rendering_start_time: u64,
    /// Last row in the rendered part of the list.
    pub(crate) last: Option<FiberId>,
    /// Rows not yet rendered.
    pub(crate) tail: Option<FiberId>,
    /// Time after which the tail stops being rendered row by row; zero until
    /// the first tail row starts.
    pub(crate) tail_expiration: u64,
    pub(crate) tail_mode: Option<TailMode>,
    /// Length of the list's effect list before the tail was processed.
    pub(crate) last_effect_len: usize,
}

/// How long rows of a SuspenseList tail keep being rendered one at a time
/// before the rest are left for a later pass.
pub(crate) const TAIL_EXPIRATION_MS: u64 = 500;

/// Bits describing the nearest Suspense ancestors.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub(crate) struct SuspenseContext(u8);

impl SuspenseContext {
    /// A boundary above currently shows its fallback; applies to the subtree.
    pub(crate) const INVISIBLE_PARENT: u8 = 1;
    /// Children of a SuspenseList must render their fallback; shallow.
    pub(crate) const FORCE_FALLBACK: u8 = 1 << 1;

    pub(crate) fn has(self, bit: u8) -> bool {
        self.0 & bit != 0
    }

    pub(crate) fn subtree(self) -> SuspenseContext {
        SuspenseContext(self.0 & Self::INVISIBLE_PARENT)
    }

    pub(crate) fn with(self, bit: u8) -> SuspenseContext {
        SuspenseContext(self.0 | bit)
    }

    pub(crate) fn with_shallow(self, bit: u8) -> SuspenseContext {
        SuspenseContext((self.0 & Self::INVISIBLE_PARENT) | bit)
    }
}

pub(crate) fn is_timed_out(fiber: &Fiber) -> bool {
    matches!(fiber.memoized_state, FiberState::Suspense(SuspenseState { dehydrated: None, .. }))
}

pub(crate) fn dehydrated_markup(fiber: &Fiber) -> Option<HostId> {
    fiber.memoized_state.suspense().and_then(|state| state.dehydrated)
}

pub(crate) fn fallback(props: &Props) -> Option<&PropValue> {
    props.attr("fallback")
}

/// Whether the Suspense boundary `fiber` can show a fallback for a thrown
/// thenable.
pub(crate) fn should_capture_suspense(fiber: &Fiber, has_invisible_parent: bool) -> bool {
    if let Some(state) = fiber.memoized_state.suspense() {
        return state.dehydrated.is_some();
    }
    let props = &fiber.memoized_props;
    if fallback(props).is_none() {
        return false;
    }
    if !props.bool("avoid_fallback") {
        return true;
    }
    !has_invisible_parent
}

/// First descendant of `row` (inclusive) that is currently showing a
/// fallback, used to decide whether a SuspenseList row has content.
pub(crate) fn find_first_suspended(arena: &FiberArena, row: FiberId) -> Option<FiberId> {
    // Return pointers below a bailed-out row may still name the other
    // buffer, so ancestors are tracked explicitly.
    let mut ancestors = Vec::new();
    let mut node = row;
    loop {
        let fiber = &arena[node];
        let suspended = match fiber.tag {
            WorkTag::SuspenseComponent => is_timed_out(fiber),
            WorkTag::SuspenseListComponent => {
                list_order(&fiber.memoized_props).is_some()
                    && fiber.flags.contains(EffectFlags::DID_CAPTURE)
            }
            _ => false,
        };
        if suspended {
            return Some(node);
        }
        if let Some(child) = fiber.child {
            ancestors.push(node);
            node = child;
            continue;
        }
        loop {
            if node == row {
                return None;
            }
            if let Some(sibling) = arena[node].sibling {
                node = sibling;
                break;
            }
            node = ancestors.pop()?;
        }
    }
}

pub(crate) fn list_order(props: &Props) -> Option<RevealOrder> {
    props.data::<(RevealOrder, TailMode)>().map(|(order, _)| *order)
}

pub(crate) fn list_tail_mode(props: &Props) -> Option<TailMode> {
    props.data::<(RevealOrder, TailMode)>().map(|(_, tail)| *tail)
}

/// Props of the wrapper around a boundary's primary children.
pub(crate) fn offscreen_props(visible: bool, children: crate::element::Node) -> Rc<Props> {
    Rc::new(
        Props::new()
            .with_attr("mode", if visible { "visible" } else { "hidden" })
            .with_children(children),
    )
}

pub(crate) fn offscreen_is_hidden(props: &Props) -> bool {
    props.str("mode") == Some("hidden")
}

pub(crate) fn create_offscreen(
    props: Rc<Props>,
    mode: FiberMode,
    expiration_time: ExpirationTime,
) -> Fiber {
    let mut fiber = Fiber::new(WorkTag::Offscreen, props, None, mode);
    fiber.expiration_time = expiration_time;
    fiber
}
