//! Diffs a fiber's current children against newly rendered [`Node`]s.
//!
//! Matching is by key when present, otherwise by position. Fibers that
//! survive are cloned as work-in-progress; fibers that do not are recorded
//! as deletions on the parent; new or moved fibers are flagged for
//! placement. On mount no side effects are tracked at all: the whole new
//! subtree is inserted in one go by its nearest placed ancestor.

use std::rc::Rc;

use crate::element::{Element, ElementType, Key, Node, Props};
use crate::expiration::ExpirationTime;
use crate::fiber::{
    fiber_from_element, fiber_from_fragment, fiber_from_text, EffectFlags, Fiber, FiberArena,
    FiberId,
    StateNode, WorkTag,
};
use crate::hash::HashMap;

#[derive(Clone, PartialEq, Eq, Hash)]
enum SlotKey {
    Key(Key),
    Index(usize),
}

pub(crate) struct ChildReconciler<'a> {
    arena: &'a mut FiberArena,
    /// Fibers created by this render that have no committed counterpart yet.
    fresh: &'a mut Vec<FiberId>,
    track_side_effects: bool,
    expiration_time: ExpirationTime,
}

fn unwrap_fragment(node: &Node) -> &Node {
    match node {
        Node::Element(element)
            if matches!(element.ty, ElementType::Fragment) && element.key.is_none() =>
        {
            element.props.children()
        }
        other => other,
    }
}

impl<'a> ChildReconciler<'a> {
    pub(crate) fn new(
        arena: &'a mut FiberArena,
        fresh: &'a mut Vec<FiberId>,
        track_side_effects: bool,
        expiration_time: ExpirationTime,
    ) -> Self {
        Self {
            arena,
            fresh,
            track_side_effects,
            expiration_time,
        }
    }

    fn alloc(&mut self, fiber: Fiber, parent: FiberId) -> FiberId {
        let id = self.arena.alloc(fiber);
        self.arena[id].return_fiber = Some(parent);
        self.fresh.push(id);
        id
    }

    fn delete_child(&mut self, parent: FiberId, child: FiberId) {
        if !self.track_side_effects {
            return;
        }
        let fiber = &mut self.arena[child];
        fiber.effects.clear();
        fiber.flags = EffectFlags::DELETION;
        self.arena[parent].effects.push(child);
    }

    fn delete_remaining_children(&mut self, parent: FiberId, first: Option<FiberId>) {
        if !self.track_side_effects {
            return;
        }
        let mut next = first;
        while let Some(child) = next {
            next = self.arena[child].sibling;
            self.delete_child(parent, child);
        }
    }

    fn map_remaining_children(&self, first: FiberId) -> HashMap<SlotKey, FiberId> {
        let mut map = HashMap::default();
        let mut next = Some(first);
        while let Some(child) = next {
            let fiber = &self.arena[child];
            let key = match &fiber.key {
                Some(key) => SlotKey::Key(key.clone()),
                None => SlotKey::Index(fiber.index),
            };
            map.insert(key, child);
            next = fiber.sibling;
        }
        map
    }

    fn use_fiber(&mut self, current: FiberId, props: Rc<Props>) -> FiberId {
        let wip = self.arena.create_work_in_progress(current, props);
        let fiber = &mut self.arena[wip];
        fiber.index = 0;
        fiber.sibling = None;
        wip
    }

    fn place_child(&mut self, child: FiberId, last_placed_index: usize, new_index: usize) -> usize {
        let track = self.track_side_effects;
        let fiber = &mut self.arena[child];
        fiber.index = new_index;
        if !track {
            return last_placed_index;
        }
        let old_index =
            fiber.alternate.and_then(|current| self.arena.get(current)).map(|c| c.index);
        let fiber = &mut self.arena[child];
        match old_index {
            Some(old_index) if old_index < last_placed_index => {
                fiber.flags |= EffectFlags::PLACEMENT;
                last_placed_index
            }
            Some(old_index) => old_index,
            None => {
                fiber.flags |= EffectFlags::PLACEMENT;
                last_placed_index
            }
        }
    }

    fn place_single_child(&mut self, child: FiberId) -> FiberId {
        if self.track_side_effects && self.arena[child].alternate.is_none() {
            self.arena[child].flags |= EffectFlags::PLACEMENT;
        }
        child
    }

    fn create_text(&mut self, parent: FiberId, text: &Rc<str>) -> FiberId {
        let mode = self.arena[parent].mode;
        self.alloc(fiber_from_text(text.clone(), mode, self.expiration_time), parent)
    }

    fn create_element(&mut self, parent: FiberId, element: &Element) -> FiberId {
        if matches!(element.ty, ElementType::Fragment) {
            return self.create_fragment(parent, element.props.clone(), element.key.clone());
        }
        let mode = self.arena[parent].mode;
        self.alloc(fiber_from_element(element, mode, self.expiration_time), parent)
    }

    fn create_fragment(&mut self, parent: FiberId, props: Rc<Props>, key: Option<Key>) -> FiberId {
        let mode = self.arena[parent].mode;
        let mut fiber = fiber_from_fragment(Node::Empty, key, mode, self.expiration_time);
        fiber.pending_props = props;
        self.alloc(fiber, parent)
    }

    fn update_text_node(
        &mut self,
        parent: FiberId,
        current: Option<FiberId>,
        text: &Rc<str>,
    ) -> FiberId {
        match current {
            Some(current) if self.arena[current].tag == WorkTag::HostText => {
                let wip = self.use_fiber(current, Rc::new(Props::for_text(text.clone())));
                self.arena[wip].return_fiber = Some(parent);
                wip
            }
            _ => self.create_text(parent, text),
        }
    }

    fn update_element(
        &mut self,
        parent: FiberId,
        current: Option<FiberId>,
        element: &Element,
    ) -> FiberId {
        if let Some(current) = current {
            let same = self.arena[current]
                .element_type
                .as_ref()
                .is_some_and(|ty| ty.same_type(&element.ty));
            if same {
                let wip = self.use_fiber(current, element.props.clone());
                let fiber = &mut self.arena[wip];
                fiber.ref_ = element.ref_.clone();
                fiber.return_fiber = Some(parent);
                return wip;
            }
        }
        self.create_element(parent, element)
    }

    fn update_fragment(
        &mut self,
        parent: FiberId,
        current: Option<FiberId>,
        props: Rc<Props>,
        key: Option<Key>,
    ) -> FiberId {
        match current {
            Some(current) if self.arena[current].tag == WorkTag::Fragment => {
                let wip = self.use_fiber(current, props);
                self.arena[wip].return_fiber = Some(parent);
                wip
            }
            _ => self.create_fragment(parent, props, key),
        }
    }

    fn update_portal(
        &mut self,
        parent: FiberId,
        current: Option<FiberId>,
        element: &Element,
    ) -> FiberId {
        let container = match element.ty {
            ElementType::Portal(container) => Some(container),
            _ => None,
        };
        if let Some(current) = current {
            let fiber = &self.arena[current];
            let same = fiber.tag == WorkTag::HostPortal
                && matches!(fiber.state_node, StateNode::Portal(c) if Some(c) == container);
            if same {
                let wip = self.use_fiber(current, element.props.clone());
                self.arena[wip].return_fiber = Some(parent);
                return wip;
            }
        }
        self.create_element(parent, element)
    }

    fn create_child(&mut self, parent: FiberId, node: &Node) -> Option<FiberId> {
        match node {
            Node::Empty => None,
            Node::Text(text) => Some(self.create_text(parent, text)),
            Node::Element(element) => Some(self.create_element(parent, element)),
            Node::List(_) => {
                let props = Rc::new(Props::for_children(node.clone()));
                Some(self.create_fragment(parent, props, None))
            }
        }
    }

    /// Updates `old` in place when `node` belongs in the same slot.
    fn update_slot(
        &mut self,
        parent: FiberId,
        old: Option<FiberId>,
        node: &Node,
    ) -> Option<FiberId> {
        let old_key = old.and_then(|id| self.arena[id].key.clone());
        match node {
            Node::Empty => None,
            Node::Text(text) => {
                if old_key.is_some() {
                    return None;
                }
                Some(self.update_text_node(parent, old, text))
            }
            Node::Element(element) => {
                if element.key != old_key {
                    return None;
                }
                Some(self.update_element_or_kind(parent, old, element))
            }
            Node::List(_) => {
                if old_key.is_some() {
                    return None;
                }
                let props = Rc::new(Props::for_children(node.clone()));
                Some(self.update_fragment(parent, old, props, None))
            }
        }
    }

    fn update_element_or_kind(
        &mut self,
        parent: FiberId,
        old: Option<FiberId>,
        element: &Element,
    ) -> FiberId {
        match element.ty {
            ElementType::Fragment => self.update_fragment(
                parent,
                old,
                element.props.clone(),
                element.key.clone(),
            ),
            ElementType::Portal(_) => self.update_portal(parent, old, element),
            _ => self.update_element(parent, old, element),
        }
    }

    fn update_from_map(
        &mut self,
        map: &mut HashMap<SlotKey, FiberId>,
        parent: FiberId,
        new_index: usize,
        node: &Node,
    ) -> Option<FiberId> {
        match node {
            Node::Empty => None,
            Node::Text(text) => {
                let matched = map.get(&SlotKey::Index(new_index)).copied();
                Some(self.update_text_node(parent, matched, text))
            }
            Node::Element(element) => {
                let slot = match &element.key {
                    Some(key) => SlotKey::Key(key.clone()),
                    None => SlotKey::Index(new_index),
                };
                let matched = map.get(&slot).copied();
                Some(self.update_element_or_kind(parent, matched, element))
            }
            Node::List(_) => {
                let matched = map.get(&SlotKey::Index(new_index)).copied();
                let props = Rc::new(Props::for_children(node.clone()));
                Some(self.update_fragment(parent, matched, props, None))
            }
        }
    }

    fn reconcile_children_array(
        &mut self,
        parent: FiberId,
        current_first: Option<FiberId>,
        nodes: &[Node],
    ) -> Option<FiberId> {
        let mut first: Option<FiberId> = None;
        let mut previous: Option<FiberId> = None;
        let mut old = current_first;
        let mut last_placed_index = 0;
        let mut new_index = 0;

        while let Some(old_fiber) = old {
            if new_index >= nodes.len() {
                break;
            }
            let next_old = if self.arena[old_fiber].index > new_index {
                // A hole left by an empty slot: keep the old fiber for later.
                old.take()
            } else {
                self.arena[old_fiber].sibling
            };
            let Some(new_fiber) = self.update_slot(parent, old, &nodes[new_index]) else {
                if old.is_none() {
                    old = next_old;
                }
                break;
            };
            if let Some(old_fiber) = old {
                if self.track_side_effects && self.arena[new_fiber].alternate.is_none() {
                    self.delete_child(parent, old_fiber);
                }
            }
            last_placed_index = self.place_child(new_fiber, last_placed_index, new_index);
            self.link(&mut first, &mut previous, new_fiber);
            old = next_old;
            new_index += 1;
        }

        if new_index == nodes.len() {
            self.delete_remaining_children(parent, old);
            return first;
        }

        let Some(old_start) = old else {
            for (index, node) in nodes.iter().enumerate().skip(new_index) {
                if let Some(new_fiber) = self.create_child(parent, node) {
                    last_placed_index = self.place_child(new_fiber, last_placed_index, index);
                    self.link(&mut first, &mut previous, new_fiber);
                }
            }
            return first;
        };

        let mut existing = self.map_remaining_children(old_start);
        for (index, node) in nodes.iter().enumerate().skip(new_index) {
            let Some(new_fiber) = self.update_from_map(&mut existing, parent, index, node) else {
                continue;
            };
            if self.track_side_effects {
                if let Some(current) = self.arena[new_fiber].alternate {
                    let slot = match &self.arena[current].key {
                        Some(key) => SlotKey::Key(key.clone()),
                        None => SlotKey::Index(index),
                    };
                    existing.remove(&slot);
                }
            }
            last_placed_index = self.place_child(new_fiber, last_placed_index, index);
            self.link(&mut first, &mut previous, new_fiber);
        }
        if self.track_side_effects {
            let mut leftovers: Vec<FiberId> = existing.into_values().collect();
            leftovers.sort_by_key(|id| self.arena[*id].index);
            for child in leftovers {
                self.delete_child(parent, child);
            }
        }
        first
    }

    fn link(
        &mut self,
        first: &mut Option<FiberId>,
        previous: &mut Option<FiberId>,
        fiber: FiberId,
    ) {
        match previous {
            Some(prev) => self.arena[*prev].sibling = Some(fiber),
            None => *first = Some(fiber),
        }
        *previous = Some(fiber);
    }

    fn reconcile_single_text(
        &mut self,
        parent: FiberId,
        current_first: Option<FiberId>,
        text: &Rc<str>,
    ) -> FiberId {
        if let Some(current) = current_first {
            if self.arena[current].tag == WorkTag::HostText {
                let rest = self.arena[current].sibling;
                self.delete_remaining_children(parent, rest);
                let wip = self.use_fiber(current, Rc::new(Props::for_text(text.clone())));
                self.arena[wip].return_fiber = Some(parent);
                return wip;
            }
        }
        self.delete_remaining_children(parent, current_first);
        self.create_text(parent, text)
    }

    fn reconcile_single_element(
        &mut self,
        parent: FiberId,
        current_first: Option<FiberId>,
        element: &Element,
    ) -> FiberId {
        let mut child = current_first;
        while let Some(current) = child {
            let fiber = &self.arena[current];
            let sibling = fiber.sibling;
            if fiber.key == element.key {
                let matches = match element.ty {
                    ElementType::Fragment => fiber.tag == WorkTag::Fragment,
                    ElementType::Portal(container) => {
                        fiber.tag == WorkTag::HostPortal
                            && matches!(fiber.state_node, StateNode::Portal(c) if c == container)
                    }
                    _ => fiber.element_type.as_ref().is_some_and(|ty| ty.same_type(&element.ty)),
                };
                if matches {
                    self.delete_remaining_children(parent, sibling);
                    let wip = self.use_fiber(current, element.props.clone());
                    let fiber = &mut self.arena[wip];
                    fiber.ref_ = element.ref_.clone();
                    fiber.return_fiber = Some(parent);
                    return wip;
                }
                // Same key, different type: nothing else can match.
                self.delete_remaining_children(parent, Some(current));
                break;
            }
            self.delete_child(parent, current);
            child = sibling;
        }
        self.create_element(parent, element)
    }

    /// Reconciles `parent`'s children against `new_children` and returns the
    /// first new child.
    pub(crate) fn reconcile_child_fibers(
        &mut self,
        parent: FiberId,
        current_first: Option<FiberId>,
        new_children: &Node,
    ) -> Option<FiberId> {
        match unwrap_fragment(new_children) {
            Node::Element(element) => {
                let child = self.reconcile_single_element(parent, current_first, element);
                Some(self.place_single_child(child))
            }
            Node::Text(text) => {
                let child = self.reconcile_single_text(parent, current_first, text);
                Some(self.place_single_child(child))
            }
            Node::List(nodes) => self.reconcile_children_array(parent, current_first, nodes),
            Node::Empty => {
                self.delete_remaining_children(parent, current_first);
                None
            }
        }
    }
}

/// Replaces the children of `wip` with work-in-progress clones of the
/// current children, so a bailed-out parent can still descend into them.
pub(crate) fn clone_child_fibers(arena: &mut FiberArena, wip: FiberId) {
    let Some(first) = arena[wip].child else {
        return;
    };
    let props = arena[first].pending_props.clone();
    let new_first = arena.create_work_in_progress(first, props);
    arena[wip].child = Some(new_first);
    arena[new_first].return_fiber = Some(wip);
    let mut current = first;
    let mut new_child = new_first;
    while let Some(next) = arena[current].sibling {
        current = next;
        let props = arena[current].pending_props.clone();
        let clone = arena.create_work_in_progress(current, props);
        arena[new_child].sibling = Some(clone);
        arena[clone].return_fiber = Some(wip);
        new_child = clone;
    }
    arena[new_child].sibling = None;
}

/// Resets every child of `wip` so the list can be rendered a second time in
/// the same pass.
pub(crate) fn reset_child_fibers(
    arena: &mut FiberArena,
    wip: FiberId,
    render_expiration_time: ExpirationTime,
) {
    let mut next = arena[wip].child;
    while let Some(child) = next {
        arena.reset_work_in_progress(child, render_expiration_time);
        next = arena[child].sibling;
    }
}

#[cfg(test)]
#[path = "tests/child_reconciler_tests.rs"]
mod tests;
