//! The unit of work and the arena that owns every fiber.
//!
//! Each tree position is represented by up to two fibers, the committed
//! ("current") one and the work-in-progress one, linked through `alternate`.
//! Links between fibers are plain [`FiberId`]s into a [`FiberArena`]; an id
//! carries a generation so a handle that outlives its fiber is detected
//! instead of silently aliasing a reused slot.

use std::cell::RefCell;
use std::fmt;
use std::ops::{Index, IndexMut};
use std::rc::Rc;

use bitflags::bitflags;

use crate::applier::{HostId, UpdatePayload};
use crate::component::{Component, StateValue};
use crate::context::Dependencies;
use crate::element::{Element, ElementType, Key, Node, Props, Ref};
use crate::expiration::ExpirationTime;
use crate::hash::HashSet;
use crate::hooks::{Effect, Hook};
use crate::root::RootId;
use crate::suspense::{SuspenseListRenderState, SuspenseState};
use crate::thenable::{Thenable, ThenableId};
use crate::update_queue::UpdateQueue;

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FiberId {
    index: u32,
    generation: u32,
}

impl fmt::Debug for FiberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fiber({}v{})", self.index, self.generation)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WorkTag {
    FunctionComponent,
    ClassComponent,
    /// A class whose first mount was interrupted by a legacy-mode suspend.
    IncompleteClassComponent,
    HostRoot,
    HostPortal,
    HostComponent,
    HostText,
    Fragment,
    Mode,
    ContextConsumer,
    ContextProvider,
    ForwardRef,
    Profiler,
    SuspenseComponent,
    MemoComponent,
    SimpleMemoComponent,
    LazyComponent,
    SuspenseListComponent,
    /// Wrapper around a Suspense boundary's primary children.
    Offscreen,
    /// Pre-existing host markup owned by a dehydrated boundary; only ever
    /// appears as a deletion.
    DehydratedFragment,
}

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct EffectFlags: u32 {
        const PERFORMED_WORK = 1;
        const PLACEMENT = 1 << 1;
        const UPDATE = 1 << 2;
        const PLACEMENT_AND_UPDATE = Self::PLACEMENT.bits() | Self::UPDATE.bits();
        const DELETION = 1 << 3;
        const CONTENT_RESET = 1 << 4;
        const CALLBACK = 1 << 5;
        const DID_CAPTURE = 1 << 6;
        const REF = 1 << 7;
        const SNAPSHOT = 1 << 8;
        const PASSIVE = 1 << 9;
        const HYDRATING = 1 << 10;
        const INCOMPLETE = 1 << 11;
        const SHOULD_CAPTURE = 1 << 12;

        const LIFECYCLE_EFFECT_MASK = Self::UPDATE.bits()
            | Self::CALLBACK.bits()
            | Self::REF.bits()
            | Self::SNAPSHOT.bits()
            | Self::PASSIVE.bits();
        const HOST_EFFECT_MASK = (1 << 11) - 1;
    }
}

impl EffectFlags {
    /// Anything beyond the performed-work marker must be visited in commit.
    pub(crate) fn has_commit_effect(self) -> bool {
        self.bits() > EffectFlags::PERFORMED_WORK.bits()
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct FiberMode: u8 {
        const CONCURRENT = 1;
        const PROFILE = 1 << 1;
    }
}

pub(crate) type ClassInstance = Rc<RefCell<Box<dyn Component>>>;

/// Thenables a boundary has already subscribed a retry listener to.
pub(crate) type RetryCache = Rc<RefCell<HashSet<ThenableId>>>;

#[derive(Clone, Default)]
pub(crate) enum StateNode {
    #[default]
    None,
    Host(HostId),
    Text(HostId),
    Root(RootId),
    Portal(HostId),
    Class(ClassInstance),
    Retry(RetryCache),
}

impl StateNode {
    pub(crate) fn host(&self) -> Option<HostId> {
        match self {
            StateNode::Host(id) | StateNode::Text(id) => Some(*id),
            _ => None,
        }
    }

    pub(crate) fn class(&self) -> Option<&ClassInstance> {
        match self {
            StateNode::Class(instance) => Some(instance),
            _ => None,
        }
    }
}

#[derive(Clone, Default)]
pub(crate) enum FiberState {
    #[default]
    None,
    /// Class and root state.
    Value(StateValue),
    Hooks(Vec<Hook>),
    Suspense(SuspenseState),
    SuspenseList(SuspenseListRenderState),
}

impl FiberState {
    pub(crate) fn value(&self) -> Option<&StateValue> {
        match self {
            FiberState::Value(value) => Some(value),
            _ => None,
        }
    }

    pub(crate) fn suspense(&self) -> Option<&SuspenseState> {
        match self {
            FiberState::Suspense(state) => Some(state),
            _ => None,
        }
    }

    pub(crate) fn suspense_list(&self) -> Option<&SuspenseListRenderState> {
        match self {
            FiberState::SuspenseList(state) => Some(state),
            _ => None,
        }
    }

    pub(crate) fn suspense_list_mut(&mut self) -> Option<&mut SuspenseListRenderState> {
        match self {
            FiberState::SuspenseList(state) => Some(state),
            _ => None,
        }
    }
}

pub struct Fiber {
    pub(crate) tag: WorkTag,
    pub(crate) key: Option<Key>,
    pub(crate) element_type: Option<ElementType>,
    /// The type actually rendered, after lazy resolution.
    pub(crate) resolved_type: Option<ElementType>,
    pub(crate) pending_props: Rc<Props>,
    pub(crate) memoized_props: Rc<Props>,
    pub(crate) memoized_state: FiberState,
    pub(crate) update_queue: Option<UpdateQueue>,
    /// Effects produced by the last hook render.
    pub(crate) hook_effects: Vec<Rc<Effect>>,
    /// Thenables a Suspense boundary (or list) is waiting on.
    pub(crate) retry_wakeables: Vec<Thenable>,
    pub(crate) update_payload: Option<UpdatePayload>,
    pub(crate) dependencies: Option<Dependencies>,
    pub(crate) state_node: StateNode,
    pub(crate) ref_: Option<Ref>,
    pub(crate) mode: FiberMode,
    pub(crate) flags: EffectFlags,
    /// Descendants with commit effects, in postorder, followed later by the
    /// parent once it completes.
    pub(crate) effects: Vec<FiberId>,
    pub(crate) expiration_time: ExpirationTime,
    pub(crate) child_expiration_time: ExpirationTime,
    pub(crate) return_fiber: Option<FiberId>,
    pub(crate) child: Option<FiberId>,
    pub(crate) sibling: Option<FiberId>,
    pub(crate) index: usize,
    pub(crate) alternate: Option<FiberId>,
    pub(crate) actual_duration: u64,
    pub(crate) actual_start_time: Option<u64>,
    pub(crate) self_base_duration: u64,
    pub(crate) tree_base_duration: u64,
}

impl Fiber {
    pub(crate) fn new(
        tag: WorkTag,
        pending_props: Rc<Props>,
        key: Option<Key>,
        mode: FiberMode,
    ) -> Self {
        Self {
            tag,
            key,
            element_type: None,
            resolved_type: None,
            pending_props,
            memoized_props: Rc::new(Props::new()),
            memoized_state: FiberState::None,
            update_queue: None,
            hook_effects: Vec::new(),
            retry_wakeables: Vec::new(),
            update_payload: None,
            dependencies: None,
            state_node: StateNode::None,
            ref_: None,
            mode,
            flags: EffectFlags::empty(),
            effects: Vec::new(),
            expiration_time: ExpirationTime::NO_WORK,
            child_expiration_time: ExpirationTime::NO_WORK,
            return_fiber: None,
            child: None,
            sibling: None,
            index: 0,
            alternate: None,
            actual_duration: 0,
            actual_start_time: None,
            self_base_duration: 0,
            tree_base_duration: 0,
        }
    }

    pub fn tag(&self) -> WorkTag {
        self.tag
    }

    pub fn key(&self) -> Option<&Key> {
        self.key.as_ref()
    }

    pub fn flags(&self) -> EffectFlags {
        self.flags
    }

    pub fn expiration_time(&self) -> ExpirationTime {
        self.expiration_time
    }

    pub fn child_expiration_time(&self) -> ExpirationTime {
        self.child_expiration_time
    }

    pub fn host_node(&self) -> Option<HostId> {
        self.state_node.host()
    }

    pub fn name(&self) -> String {
        match (&self.resolved_type, &self.element_type, self.tag) {
            (Some(ty), _, _) | (None, Some(ty), _) => ty.name(),
            (None, None, WorkTag::HostText) => "#text".to_string(),
            (None, None, WorkTag::HostRoot) => "#root".to_string(),
            (None, None, tag) => format!("{tag:?}"),
        }
    }

    /// Pending work here or anywhere below, whichever is more urgent.
    pub(crate) fn remaining_expiration_time(&self) -> ExpirationTime {
        self.expiration_time.max(self.child_expiration_time)
    }
}

impl fmt::Debug for Fiber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fiber")
            .field("tag", &self.tag)
            .field("name", &self.name())
            .field("key", &self.key)
            .field("flags", &self.flags)
            .field("expiration_time", &self.expiration_time)
            .field("child_expiration_time", &self.child_expiration_time)
            .finish()
    }
}

struct Slot {
    generation: u32,
    fiber: Option<Fiber>,
}

#[derive(Default)]
pub struct FiberArena {
    slots: Vec<Slot>,
    free: Vec<u32>,
}

impl FiberArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn alloc(&mut self, fiber: Fiber) -> FiberId {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.generation = slot.generation.wrapping_add(1);
            slot.fiber = Some(fiber);
            FiberId {
                index,
                generation: slot.generation,
            }
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Slot {
                generation: 0,
                fiber: Some(fiber),
            });
            FiberId {
                index,
                generation: 0,
            }
        }
    }

    pub(crate) fn free(&mut self, id: FiberId) -> Option<Fiber> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        let fiber = slot.fiber.take();
        if fiber.is_some() {
            self.free.push(id.index);
        }
        fiber
    }

    pub fn get(&self, id: FiberId) -> Option<&Fiber> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.fiber.as_ref())
    }

    pub(crate) fn get_mut(&mut self, id: FiberId) -> Option<&mut Fiber> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.fiber.as_mut())
    }

    pub fn contains(&self, id: FiberId) -> bool {
        self.get(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.fiber.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Children of `id` in sibling order.
    pub fn children(&self, id: FiberId) -> Vec<FiberId> {
        let mut out = Vec::new();
        let mut next = self.get(id).and_then(|f| f.child);
        while let Some(child) = next {
            out.push(child);
            next = self.get(child).and_then(|f| f.sibling);
        }
        out
    }

    /// Returns the work-in-progress counterpart of `current`, reusing its
    /// alternate when one exists.
    pub(crate) fn create_work_in_progress(
        &mut self,
        current: FiberId,
        pending_props: Rc<Props>,
    ) -> FiberId {
        let source = &self[current];
        let wip = match source.alternate {
            Some(wip) if self.contains(wip) => {
                // The committed fiber may have been upgraded (lazy resolved,
                // memo simplified, incomplete class remounted).
                let identity = (
                    source.tag,
                    source.element_type.clone(),
                    source.resolved_type.clone(),
                    source.state_node.clone(),
                );
                let fiber = &mut self[wip];
                fiber.tag = identity.0;
                fiber.element_type = identity.1;
                fiber.resolved_type = identity.2;
                fiber.state_node = identity.3;
                fiber.pending_props = pending_props;
                fiber.flags = EffectFlags::empty();
                fiber.effects.clear();
                fiber.update_payload = None;
                fiber.actual_duration = 0;
                fiber.actual_start_time = None;
                wip
            }
            _ => {
                let mut fiber = Fiber::new(
                    source.tag,
                    pending_props,
                    source.key.clone(),
                    source.mode,
                );
                fiber.element_type = source.element_type.clone();
                fiber.resolved_type = source.resolved_type.clone();
                fiber.state_node = source.state_node.clone();
                fiber.alternate = Some(current);
                let wip = self.alloc(fiber);
                self[current].alternate = Some(wip);
                wip
            }
        };
        let source = &self[current];
        let copied = (
            source.child_expiration_time,
            source.expiration_time,
            source.child,
            source.memoized_props.clone(),
            source.memoized_state.clone(),
            source.update_queue.clone(),
            source.hook_effects.clone(),
            source.retry_wakeables.clone(),
            source.dependencies.clone(),
            source.sibling,
            source.index,
            source.ref_.clone(),
            (source.self_base_duration, source.tree_base_duration),
        );
        let fiber = &mut self[wip];
        fiber.child_expiration_time = copied.0;
        fiber.expiration_time = copied.1;
        fiber.child = copied.2;
        fiber.memoized_props = copied.3;
        fiber.memoized_state = copied.4;
        fiber.update_queue = copied.5;
        fiber.hook_effects = copied.6;
        fiber.retry_wakeables = copied.7;
        fiber.dependencies = copied.8;
        fiber.sibling = copied.9;
        fiber.index = copied.10;
        fiber.ref_ = copied.11;
        fiber.self_base_duration = copied.12 .0;
        fiber.tree_base_duration = copied.12 .1;
        wip
    }

    /// Resets a fiber that already went through begin back to the state its
    /// current counterpart left it in, so its subtree can be rendered again
    /// within the same pass.
    pub(crate) fn reset_work_in_progress(
        &mut self,
        wip: FiberId,
        render_expiration_time: ExpirationTime,
    ) {
        let fiber = &mut self[wip];
        fiber.flags &= EffectFlags::PLACEMENT;
        fiber.effects.clear();
        match fiber.alternate {
            None => {
                fiber.child_expiration_time = ExpirationTime::NO_WORK;
                fiber.expiration_time = render_expiration_time;
                fiber.child = None;
                fiber.memoized_props = Rc::new(Props::new());
                fiber.memoized_state = FiberState::None;
                fiber.update_queue = None;
                fiber.dependencies = None;
                fiber.state_node = match fiber.state_node {
                    StateNode::Retry(_) => StateNode::None,
                    ref other => other.clone(),
                };
                fiber.self_base_duration = 0;
                fiber.tree_base_duration = 0;
            }
            Some(current) => {
                let source = &self[current];
                let copied = (
                    source.child_expiration_time,
                    source.expiration_time,
                    source.child,
                    source.memoized_props.clone(),
                    source.memoized_state.clone(),
                    source.update_queue.clone(),
                    source.hook_effects.clone(),
                    source.dependencies.clone(),
                );
                let fiber = &mut self[wip];
                fiber.child_expiration_time = copied.0;
                fiber.expiration_time = copied.1;
                fiber.child = copied.2;
                fiber.memoized_props = copied.3;
                fiber.memoized_state = copied.4;
                fiber.update_queue = copied.5;
                fiber.hook_effects = copied.6;
                fiber.dependencies = copied.7;
            }
        }
    }

    /// Frees `root` and every fiber below it, together with their alternates.
    pub(crate) fn free_subtree(&mut self, root: FiberId) -> usize {
        let mut freed = 0;
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            let Some(fiber) = self.free(id) else {
                continue;
            };
            freed += 1;
            if let Some(child) = fiber.child {
                stack.push(child);
            }
            if id != root {
                if let Some(sibling) = fiber.sibling {
                    stack.push(sibling);
                }
            }
            if let Some(alternate) = fiber.alternate {
                if let Some(alt) = self.free(alternate) {
                    freed += 1;
                    if let Some(child) = alt.child {
                        stack.push(child);
                    }
                    if id != root {
                        if let Some(sibling) = alt.sibling {
                            stack.push(sibling);
                        }
                    }
                }
            }
        }
        freed
    }
}

/// Panics on a stale or freed id, like slice indexing. Use
/// [`FiberArena::get`] where the id may be dead.
impl Index<FiberId> for FiberArena {
    type Output = Fiber;

    fn index(&self, id: FiberId) -> &Fiber {
        match self.get(id) {
            Some(fiber) => fiber,
            None => panic!("{id:?} is not a live fiber"),
        }
    }
}

impl IndexMut<FiberId> for FiberArena {
    fn index_mut(&mut self, id: FiberId) -> &mut Fiber {
        match self.get_mut(id) {
            Some(fiber) => fiber,
            None => panic!("{id:?} is not a live fiber"),
        }
    }
}

/// Maps an element to the fiber kind that renders it.
pub(crate) fn tag_for_element_type(ty: &ElementType) -> WorkTag {
    match ty {
        ElementType::Host(_) => WorkTag::HostComponent,
        ElementType::Function(_) => WorkTag::FunctionComponent,
        ElementType::Class(_) => WorkTag::ClassComponent,
        ElementType::ForwardRef(_) => WorkTag::ForwardRef,
        ElementType::Memo(_) => WorkTag::MemoComponent,
        ElementType::Lazy(_) => WorkTag::LazyComponent,
        ElementType::Fragment => WorkTag::Fragment,
        ElementType::Provider(_) => WorkTag::ContextProvider,
        ElementType::Consumer(_) => WorkTag::ContextConsumer,
        ElementType::Suspense => WorkTag::SuspenseComponent,
        ElementType::SuspenseList => WorkTag::SuspenseListComponent,
        ElementType::Profiler => WorkTag::Profiler,
        ElementType::Mode => WorkTag::Mode,
        ElementType::Portal(_) => WorkTag::HostPortal,
    }
}

pub(crate) fn fiber_from_element(
    element: &Element,
    mode: FiberMode,
    expiration_time: ExpirationTime,
) -> Fiber {
    let tag = tag_for_element_type(&element.ty);
    let mut fiber = Fiber::new(tag, element.props.clone(), element.key.clone(), mode);
    fiber.element_type = Some(element.ty.clone());
    fiber.resolved_type = match &element.ty {
        ElementType::Lazy(_) => None,
        other => Some(other.clone()),
    };
    if let ElementType::Portal(container) = element.ty {
        fiber.state_node = StateNode::Portal(container);
    }
    fiber.ref_ = element.ref_.clone();
    fiber.expiration_time = expiration_time;
    fiber
}

pub(crate) fn fiber_from_text(
    text: Rc<str>,
    mode: FiberMode,
    expiration_time: ExpirationTime,
) -> Fiber {
    let mut fiber = Fiber::new(WorkTag::HostText, Rc::new(Props::for_text(text)), None, mode);
    fiber.expiration_time = expiration_time;
    fiber
}

pub(crate) fn fiber_from_fragment(
    children: Node,
    key: Option<Key>,
    mode: FiberMode,
    expiration_time: ExpirationTime,
) -> Fiber {
    let mut fiber = Fiber::new(
        WorkTag::Fragment,
        Rc::new(Props::for_children(children)),
        key,
        mode,
    );
    fiber.expiration_time = expiration_time;
    fiber
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host(tag: &str) -> Fiber {
        fiber_from_element(&Element::host(tag), FiberMode::empty(), ExpirationTime::SYNC)
    }

    #[test]
    fn freed_ids_are_not_resurrected_by_slot_reuse() {
        let mut arena = FiberArena::new();
        let a = arena.alloc(host("a"));
        assert!(arena.free(a).is_some());
        let b = arena.alloc(host("b"));
        assert!(!arena.contains(a));
        assert!(arena.contains(b));
        assert!(arena.free(a).is_none());
    }

    #[test]
    fn work_in_progress_pairs_with_current_and_is_reused() {
        let mut arena = FiberArena::new();
        let current = arena.alloc(host("div"));
        let props = arena[current].pending_props.clone();
        let wip = arena.create_work_in_progress(current, props.clone());
        assert_eq!(arena[wip].alternate, Some(current));
        assert_eq!(arena[current].alternate, Some(wip));
        arena[wip].flags |= EffectFlags::UPDATE;
        arena[wip].effects.push(current);
        let again = arena.create_work_in_progress(current, props);
        assert_eq!(again, wip);
        assert!(arena[again].flags.is_empty());
        assert!(arena[again].effects.is_empty());
        assert_eq!(arena.len(), 2);
    }

    #[test]
    fn free_subtree_releases_both_buffers() {
        let mut arena = FiberArena::new();
        let parent = arena.alloc(host("div"));
        let child = arena.alloc(host("span"));
        let sibling = arena.alloc(host("p"));
        arena[parent].child = Some(child);
        arena[child].sibling = Some(sibling);
        arena[child].return_fiber = Some(parent);
        arena[sibling].return_fiber = Some(parent);
        let props = arena[parent].pending_props.clone();
        arena.create_work_in_progress(parent, props);
        let outside = arena.alloc(host("section"));
        arena[parent].sibling = Some(outside);
        assert_eq!(arena.free_subtree(parent), 4);
        assert!(arena.contains(outside));
    }
}
