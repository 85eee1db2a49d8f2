//! The commit phase: applying a finished tree to the host.
//!
//! A commit walks the finished root's effect list three times. The first
//! pass reads snapshots before anything changes, the second performs host
//! mutations and unmounts, and the third runs lifecycles, layout effects and
//! ref attachment once the tree is in place. Passive effects are deferred to
//! a separate task.

use std::any::Any;
use std::rc::Rc;

use tracing::{debug, trace, warn};

use crate::applier::{Applier, HostId};
use crate::component::{state, StateValue};
use crate::element::RefTarget;
use crate::error::{CapturedError, NodeError, ReconcileError};
use crate::expiration::{ExpirationTime, PriorityLevel};
use crate::fiber::{EffectFlags, FiberId, StateNode, WorkTag};
use crate::hooks::{Effect, HookFlags};
use crate::platform::ScheduledTask;
use crate::profiler::{ProfilerConfig, ProfilerPhase, ProfilerReport};
use crate::root::{RootId, RootState};
use crate::runtime::Wakeup;
use crate::suspense::{dehydrated_markup, is_timed_out};
use crate::unwind::instance_key;
use crate::update_queue::{StatePayload, Update, UpdateCallback, UpdateTag};
use crate::work_loop::{ExecutionContext, Reconciler};

fn empty_state() -> StateValue {
    state(())
}

fn is_host_parent(tag: WorkTag) -> bool {
    matches!(tag, WorkTag::HostComponent | WorkTag::HostRoot | WorkTag::HostPortal)
}

fn is_function_like(tag: WorkTag) -> bool {
    matches!(
        tag,
        WorkTag::FunctionComponent
            | WorkTag::ForwardRef
            | WorkTag::MemoComponent
            | WorkTag::SimpleMemoComponent
    )
}

/// Keeps the first host failure of a commit while the rest of it proceeds.
fn keep_first(slot: &mut Option<NodeError>, result: Result<(), NodeError>) {
    if let Err(error) = result {
        warn!(%error, "host operation failed during commit");
        if slot.is_none() {
            *slot = Some(error);
        }
    }
}

impl<A: Applier> Reconciler<A> {
    /// Commits the finished tree of `root_id`, if it has one.
    pub(crate) fn commit_root(&mut self, root_id: RootId) -> Result<(), ReconcileError> {
        let previous = self.runtime.set_current_priority(PriorityLevel::Immediate);
        let result = self.commit_root_impl(root_id);
        self.runtime.set_current_priority(previous);
        result
    }

    fn commit_root_impl(&mut self, root_id: RootId) -> Result<(), ReconcileError> {
        // Leftover passive effects must run before the tree changes again.
        while self.root_with_pending_passive.is_some() {
            self.flush_passive_effects()?;
        }
        if self
            .execution_context
            .intersects(ExecutionContext::RENDER | ExecutionContext::COMMIT)
        {
            return Err(ReconcileError::AlreadyWorking);
        }

        let Some(root) = self.roots.get_mut(&root_id) else {
            return Err(ReconcileError::UnknownRoot);
        };
        let Some(finished) = root.finished_work.take() else {
            return Ok(());
        };
        let expiration_time = root.finished_expiration_time;
        root.finished_expiration_time = ExpirationTime::NO_WORK;
        root.callback = None;
        root.callback_expiration_time = ExpirationTime::NO_WORK;
        root.callback_priority = PriorityLevel::Idle;
        let container = root.container;
        let remaining = self.arena[finished].remaining_expiration_time();
        root.mark_finished_at_time(expiration_time, remaining);
        if self.wip_root == Some(root_id) {
            self.wip_root = None;
            self.wip = None;
            self.render_expiration_time = ExpirationTime::NO_WORK;
        }

        let _span =
            tracing::debug_span!("commit_root", root = ?root_id, ?expiration_time).entered();
        self.profiler.commit_time = self.now_ms();

        let mut effects = std::mem::take(&mut self.arena[finished].effects);
        if self.arena[finished].flags.has_commit_effect() {
            effects.push(finished);
        }
        debug!(root = ?root_id, effects = effects.len(), "committing");

        let mut host_error = None;
        if effects.is_empty() {
            self.set_root_current(root_id, finished);
        } else {
            let prev_context = self.execution_context;
            self.execution_context |= ExecutionContext::COMMIT;

            self.commit_before_mutation_effects(&effects);

            self.applier.prepare_for_commit(container);
            self.commit_mutation_effects(&effects, &mut host_error);
            self.applier.reset_after_commit(container);

            self.set_root_current(root_id, finished);

            self.commit_layout_effects(&effects);
            self.runtime.scheduler().request_paint();
            self.execution_context = prev_context;
        }

        if self.root_does_have_passive_effects {
            self.root_does_have_passive_effects = false;
            self.root_with_pending_passive = Some(root_id);
            self.pending_passive_expiration = expiration_time;
        }

        self.sweep_fresh_fibers(root_id, finished);
        // Updates scheduled by lifecycles and layout effects are synchronous.
        let drained = self.drain_updates();

        let remaining = self
            .roots
            .get(&root_id)
            .map_or(ExpirationTime::NO_WORK, |root| root.first_pending_time);
        if remaining == ExpirationTime::NO_WORK {
            self.failed_legacy_boundaries.clear();
        }
        if remaining == ExpirationTime::SYNC {
            if self.root_with_nested_updates == Some(root_id) {
                self.nested_update_count += 1;
            } else {
                self.nested_update_count = 1;
                self.root_with_nested_updates = Some(root_id);
            }
        } else {
            self.nested_update_count = 0;
        }

        self.ensure_root_is_scheduled(root_id);

        if let Some(error) = self.uncaught_error.take() {
            return Err(ReconcileError::Uncaught(error));
        }
        if let Some(error) = host_error {
            return Err(ReconcileError::Host(error));
        }
        drained?;
        if self.execution_context.is_empty() {
            self.flush_sync_callback_queue()?;
        }
        Ok(())
    }

    fn set_root_current(&mut self, root_id: RootId, finished: FiberId) {
        if let Some(root) = self.roots.get_mut(&root_id) {
            root.current = finished;
        }
    }

    fn commit_before_mutation_effects(&mut self, effects: &[FiberId]) {
        for &effect in effects {
            let Some(fiber) = self.arena.get(effect) else {
                continue;
            };
            let flags = fiber.flags;
            if flags.contains(EffectFlags::SNAPSHOT) && fiber.tag == WorkTag::ClassComponent {
                if let (Some(current), StateNode::Class(instance)) =
                    (fiber.alternate, &fiber.state_node)
                {
                    let prev = &self.arena[current];
                    let prev_state =
                        prev.memoized_state.value().cloned().unwrap_or_else(empty_state);
                    let snapshot = instance
                        .borrow()
                        .get_snapshot_before_update(&prev.memoized_props, &prev_state);
                    if let Some(snapshot) = snapshot {
                        self.snapshots.insert(effect, snapshot);
                    }
                }
            }
            if flags.contains(EffectFlags::PASSIVE) {
                self.schedule_passive_flush();
            }
        }
    }

    fn schedule_passive_flush(&mut self) {
        if self.root_does_have_passive_effects {
            return;
        }
        self.root_does_have_passive_effects = true;
        self.runtime
            .scheduler()
            .schedule_callback(PriorityLevel::Normal, ScheduledTask::FlushPassiveEffects, None);
    }
}

impl<A: Applier> Reconciler<A> {
    fn commit_mutation_effects(&mut self, effects: &[FiberId], host_error: &mut Option<NodeError>) {
        for &effect in effects {
            let Some(fiber) = self.arena.get(effect) else {
                continue;
            };
            let flags = fiber.flags;
            if flags.contains(EffectFlags::CONTENT_RESET) {
                if let Some(instance) = fiber.state_node.host() {
                    keep_first(host_error, self.applier.reset_text_content(instance));
                }
            }
            if flags.contains(EffectFlags::REF) {
                if let Some(current) = fiber.alternate {
                    if let Some(ref_) = self.arena[current].ref_.clone() {
                        ref_.set(None);
                    }
                }
            }
            if flags.contains(EffectFlags::DELETION) {
                self.commit_deletion(effect, host_error);
                continue;
            }
            if flags.contains(EffectFlags::PLACEMENT) {
                keep_first(host_error, self.commit_placement(effect));
                self.arena[effect].flags.remove(EffectFlags::PLACEMENT);
            }
            if flags.contains(EffectFlags::UPDATE) {
                keep_first(host_error, self.commit_work(effect));
            }
        }
    }

    /// Nearest ancestor that owns host children, with its host node and
    /// whether that node is a container.
    fn host_parent(&self, fiber: FiberId) -> Option<(FiberId, HostId, bool)> {
        let mut node = self.arena[fiber].return_fiber;
        while let Some(id) = node {
            let parent = &self.arena[id];
            match (&parent.tag, &parent.state_node) {
                (WorkTag::HostComponent, StateNode::Host(host)) => return Some((id, *host, false)),
                (WorkTag::HostRoot, StateNode::Root(root)) => {
                    return self.roots.get(root).map(|root| (id, root.container, true));
                }
                (WorkTag::HostPortal, StateNode::Portal(container)) => {
                    return Some((id, *container, true))
                }
                _ => {}
            }
            node = parent.return_fiber;
        }
        None
    }

    /// First host node after `fiber` that is already in place, to insert
    /// before.
    fn host_sibling(&self, fiber: FiberId) -> Option<HostId> {
        let mut node = fiber;
        'siblings: loop {
            loop {
                let current = &self.arena[node];
                if current.sibling.is_some() {
                    break;
                }
                match current.return_fiber {
                    Some(parent) if !is_host_parent(self.arena[parent].tag) => node = parent,
                    _ => return None,
                }
            }
            node = self.arena[node].sibling?;
            loop {
                let candidate = &self.arena[node];
                if matches!(candidate.tag, WorkTag::HostComponent | WorkTag::HostText) {
                    break;
                }
                if candidate.flags.contains(EffectFlags::PLACEMENT)
                    || candidate.tag == WorkTag::HostPortal
                {
                    continue 'siblings;
                }
                match candidate.child {
                    Some(child) => node = child,
                    None => continue 'siblings,
                }
            }
            let candidate = &self.arena[node];
            if !candidate.flags.contains(EffectFlags::PLACEMENT) {
                return candidate.state_node.host();
            }
        }
    }

    fn commit_placement(&mut self, fiber: FiberId) -> Result<(), NodeError> {
        let Some((parent_fiber, parent, is_container)) = self.host_parent(fiber) else {
            warn!(?fiber, "placed fiber has no host parent");
            return Ok(());
        };
        if self.arena[parent_fiber].flags.contains(EffectFlags::CONTENT_RESET) {
            self.applier.reset_text_content(parent)?;
            self.arena[parent_fiber].flags.remove(EffectFlags::CONTENT_RESET);
        }
        let before = self.host_sibling(fiber);
        self.insert_or_append_placement_node(fiber, before, parent, is_container)
    }

    fn insert_or_append_placement_node(
        &mut self,
        fiber: FiberId,
        before: Option<HostId>,
        parent: HostId,
        is_container: bool,
    ) -> Result<(), NodeError> {
        let node = &self.arena[fiber];
        if let (WorkTag::HostComponent | WorkTag::HostText, Some(host)) =
            (node.tag, node.state_node.host())
        {
            return match (before, is_container) {
                (Some(before), true) => self.applier.insert_in_container_before(
                    parent,
                    host,
                    before,
                ),
                (Some(before), false) => self.applier.insert_before(parent, host, before),
                (None, true) => self.applier.append_child_to_container(parent, host),
                (None, false) => self.applier.append_child(parent, host),
            };
        }
        if node.tag == WorkTag::HostPortal {
            return Ok(());
        }
        for child in self.arena.children(fiber) {
            self.insert_or_append_placement_node(child, before, parent, is_container)?;
        }
        Ok(())
    }

    fn commit_work(&mut self, fiber: FiberId) -> Result<(), NodeError> {
        let tag = self.arena[fiber].tag;
        match tag {
            tag if is_function_like(tag) => {
                self.run_hook_destroys(fiber, HookFlags::LAYOUT | HookFlags::HAS_EFFECT);
                Ok(())
            }
            WorkTag::HostComponent => {
                let node = &self.arena[fiber];
                let (Some(instance), Some(payload)) =
                    (node.state_node.host(), node.update_payload.clone())
                else {
                    return Ok(());
                };
                let new_props = node.memoized_props.clone();
                let old_props = node
                    .alternate
                    .map_or_else(
                        || new_props.clone(),
                        |current| self.arena[current].memoized_props.clone(),
                    );
                let ty = self.host_type(fiber);
                self.arena[fiber].update_payload = None;
                self.applier
                    .commit_update(instance, &payload, &ty, &old_props, &new_props)
            }
            WorkTag::HostText => {
                let node = &self.arena[fiber];
                let Some(instance) = node.state_node.host() else {
                    return Ok(());
                };
                let new_text = node.memoized_props.text().unwrap_or_default().to_string();
                let old_text = node
                    .alternate
                    .and_then(|current| {
                        self.arena[current].memoized_props.text().map(str::to_string)
                    })
                    .unwrap_or_else(|| new_text.clone());
                self.applier.commit_text_update(instance, &old_text, &new_text)
            }
            WorkTag::SuspenseComponent => {
                let result = self.commit_suspense_component(fiber);
                self.attach_retry_listeners(fiber);
                result
            }
            WorkTag::SuspenseListComponent => {
                self.attach_retry_listeners(fiber);
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn commit_suspense_component(&mut self, fiber: FiberId) -> Result<(), NodeError> {
        let timed_out = is_timed_out(&self.arena[fiber]);
        if timed_out {
            self.most_recent_fallback_time = self.now_ms();
        }
        match self.arena[fiber].child {
            Some(offscreen) => self.hide_or_unhide_all_children(offscreen, timed_out),
            None => Ok(()),
        }
    }

    /// Hides or reveals the topmost host nodes below `subtree`, leaving the
    /// primary content of nested timed-out boundaries hidden.
    fn hide_or_unhide_all_children(
        &mut self,
        subtree: FiberId,
        hide: bool,
    ) -> Result<(), NodeError> {
        let mut stack = self.arena.children(subtree);
        stack.reverse();
        while let Some(id) = stack.pop() {
            let node = &self.arena[id];
            match (node.tag, node.state_node.host()) {
                (WorkTag::HostComponent, Some(instance)) => {
                    if hide {
                        self.applier.hide_instance(instance)?;
                    } else {
                        let props = node.memoized_props.clone();
                        self.applier.unhide_instance(instance, &props)?;
                    }
                }
                (WorkTag::HostText, Some(instance)) => {
                    if hide {
                        self.applier.hide_text_instance(instance)?;
                    } else {
                        let text = node.memoized_props.text().unwrap_or_default().to_string();
                        self.applier.unhide_text_instance(instance, &text)?;
                    }
                }
                (WorkTag::HostPortal, _) => {}
                (WorkTag::SuspenseComponent, _) if is_timed_out(node) => {
                    // Only the fallback of a nested timed-out boundary is visible.
                    let fallback = node.child.and_then(|offscreen| self.arena[offscreen].sibling);
                    if let Some(fallback) = fallback {
                        stack.push(fallback);
                    }
                }
                _ => {
                    let mut children = self.arena.children(id);
                    children.reverse();
                    stack.extend(children);
                }
            }
        }
        Ok(())
    }

    /// Subscribes the boundary to the thenables its content suspended on, so
    /// it re-renders once they settle.
    fn attach_retry_listeners(&mut self, fiber: FiberId) {
        let wakeables = std::mem::take(&mut self.arena[fiber].retry_wakeables);
        if wakeables.is_empty() {
            return;
        }
        let cache = match &self.arena[fiber].state_node {
            StateNode::Retry(cache) => cache.clone(),
            _ => {
                let cache = crate::fiber::RetryCache::default();
                self.arena[fiber].state_node = StateNode::Retry(cache.clone());
                if let Some(current) = self.arena[fiber].alternate {
                    self.arena[current].state_node = StateNode::Retry(cache.clone());
                }
                cache
            }
        };
        for thenable in wakeables {
            if !cache.borrow_mut().insert(thenable.id()) {
                continue;
            }
            trace!(boundary = ?fiber, thenable = ?thenable.id(), "retry listener");
            thenable.then(self.runtime.waker(Wakeup::Retry {
                boundary: fiber,
                thenable: thenable.id(),
            }));
        }
    }

    fn run_hook_destroys(&mut self, fiber: FiberId, flags: HookFlags) {
        let effects = self.arena[fiber].hook_effects.clone();
        for effect in effects.iter().filter(|effect| effect.has(flags)) {
            effect.run_destroy();
        }
    }
}

impl<A: Applier> Reconciler<A> {
    /// Removes the host nodes of a deleted subtree, runs its unmount
    /// lifecycles and releases its fibers.
    fn commit_deletion(&mut self, fiber: FiberId, host_error: &mut Option<NodeError>) {
        let parent = self.host_parent(fiber).map(|(_, host, is_container)| (host, is_container));
        if self.arena[fiber].tag == WorkTag::DehydratedFragment {
            if let (Some((parent, _)), Some(markup)) =
                (parent, self.arena[fiber].state_node.host())
            {
                keep_first(host_error, self.applier.clear_dehydrated_content(parent, markup));
            }
        } else {
            keep_first(host_error, self.unmount_host_components(fiber, parent));
        }

        let node = &mut self.arena[fiber];
        node.return_fiber = None;
        node.sibling = None;
        let freed = self.arena.free_subtree(fiber);
        trace!(?fiber, freed, "deleted subtree released");
    }

    /// Detaches the topmost host nodes below `fiber` from `parent` and
    /// unmounts everything else on the way.
    fn unmount_host_components(
        &mut self,
        fiber: FiberId,
        parent: Option<(HostId, bool)>,
    ) -> Result<(), NodeError> {
        let node = &self.arena[fiber];
        match (node.tag, node.state_node.host()) {
            (WorkTag::HostComponent | WorkTag::HostText, Some(host)) => {
                self.commit_nested_unmounts(fiber);
                if let Some((parent, is_container)) = parent {
                    if is_container {
                        self.applier.remove_child_from_container(parent, host)?;
                    } else {
                        self.applier.remove_child(parent, host)?;
                    }
                }
                Ok(())
            }
            (WorkTag::HostPortal, _) => {
                let container = match node.state_node {
                    StateNode::Portal(container) => Some((container, true)),
                    _ => None,
                };
                for child in self.arena.children(fiber) {
                    self.unmount_host_components(child, container)?;
                }
                Ok(())
            }
            (WorkTag::SuspenseComponent, _) if dehydrated_markup(node).is_some() => {
                if let (Some((parent, _)), Some(markup)) = (parent, dehydrated_markup(node)) {
                    self.applier.clear_dehydrated_content(parent, markup)?;
                }
                Ok(())
            }
            _ => {
                self.commit_unmount(fiber);
                for child in self.arena.children(fiber) {
                    self.unmount_host_components(child, parent)?;
                }
                Ok(())
            }
        }
    }

    /// Unmounts every fiber below a deleted host node. Portals inside it
    /// still own host children in their own container.
    fn commit_nested_unmounts(&mut self, root: FiberId) {
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            if id != root && self.arena[id].tag == WorkTag::HostPortal {
                if let Err(error) = self.unmount_host_components(id, None) {
                    warn!(%error, "failed to unmount portal content");
                }
                continue;
            }
            self.commit_unmount(id);
            stack.extend(self.arena.children(id));
        }
    }

    fn commit_unmount(&mut self, fiber: FiberId) {
        let tag = self.arena[fiber].tag;
        match tag {
            tag if is_function_like(tag) => {
                let effects = self.arena[fiber].hook_effects.clone();
                for effect in effects {
                    if effect.has(HookFlags::PASSIVE) {
                        self.pending_passive_unmounts.push(effect);
                        self.schedule_passive_flush();
                    } else {
                        effect.run_destroy();
                    }
                }
            }
            WorkTag::ClassComponent => {
                self.detach_ref(fiber);
                if let StateNode::Class(instance) = self.arena[fiber].state_node.clone() {
                    let result = instance.borrow_mut().component_will_unmount();
                    if let Err(error) = result {
                        self.capture_commit_phase_error(fiber, error);
                    }
                }
            }
            WorkTag::HostComponent | WorkTag::HostText => {
                if tag == WorkTag::HostComponent {
                    self.detach_ref(fiber);
                }
                if let Some(instance) = self.arena[fiber].state_node.host() {
                    self.applier.detach_deleted_instance(instance);
                }
            }
            _ => {}
        }
    }

    fn detach_ref(&mut self, fiber: FiberId) {
        if let Some(ref_) = self.arena[fiber].ref_.clone() {
            ref_.set(None);
        }
    }

    fn attach_ref(&mut self, fiber: FiberId) {
        let node = &self.arena[fiber];
        let Some(ref_) = node.ref_.clone() else {
            return;
        };
        let target = match &node.state_node {
            StateNode::Host(host) => RefTarget::Host(*host),
            StateNode::Class(instance) => RefTarget::Instance(instance.clone() as Rc<dyn Any>),
            _ => return,
        };
        ref_.set(Some(target));
    }
}

impl<A: Applier> Reconciler<A> {
    fn commit_layout_effects(&mut self, effects: &[FiberId]) {
        for &effect in effects {
            let Some(fiber) = self.arena.get(effect) else {
                continue;
            };
            let flags = fiber.flags;
            if flags.intersects(EffectFlags::UPDATE | EffectFlags::CALLBACK) {
                self.commit_lifecycles(effect);
            }
            if flags.contains(EffectFlags::REF) {
                self.attach_ref(effect);
            }
        }
    }

    fn commit_lifecycles(&mut self, fiber: FiberId) {
        let tag = self.arena[fiber].tag;
        match tag {
            tag if is_function_like(tag) => {
                let effects = self.arena[fiber].hook_effects.clone();
                for effect in effects.iter().filter(|e| e.has(HookFlags::HAS_EFFECT)) {
                    if effect.has(HookFlags::LAYOUT) {
                        if let Err(error) = effect.run_create() {
                            self.capture_commit_phase_error(fiber, error);
                        }
                    } else if effect.has(HookFlags::PASSIVE) {
                        self.pending_passive_unmounts.push(effect.clone());
                        self.pending_passive_mounts.push((fiber, effect.clone()));
                    }
                }
            }
            WorkTag::ClassComponent => {
                if self.arena[fiber].flags.contains(EffectFlags::UPDATE) {
                    if let Err(error) = self.commit_class_lifecycle(fiber) {
                        self.capture_commit_phase_error(fiber, error);
                    }
                }
                self.commit_update_callbacks(fiber);
            }
            WorkTag::HostRoot => self.commit_update_callbacks(fiber),
            WorkTag::HostComponent => {
                let node = &self.arena[fiber];
                if node.alternate.is_none() && node.flags.contains(EffectFlags::UPDATE) {
                    if let Some(instance) = node.state_node.host() {
                        let props = node.memoized_props.clone();
                        let ty = self.host_type(fiber);
                        if let Err(error) = self.applier.commit_mount(instance, &ty, &props) {
                            warn!(%error, "commit_mount failed");
                        }
                    }
                }
            }
            WorkTag::Profiler => self.report_profiler(fiber),
            _ => {}
        }
    }

    fn commit_class_lifecycle(&mut self, fiber: FiberId) -> Result<(), CapturedError> {
        let node = &self.arena[fiber];
        let StateNode::Class(instance) = node.state_node.clone() else {
            return Ok(());
        };
        let props = node.memoized_props.clone();
        let state = node.memoized_state.value().cloned().unwrap_or_else(empty_state);
        let previous = node
            .alternate
            .map(|current| &self.arena[current])
            .filter(|current| current.tag == WorkTag::ClassComponent)
            .map(|current| {
                let prev_state =
                    current.memoized_state.value().cloned().unwrap_or_else(empty_state);
                (current.memoized_props.clone(), prev_state)
            });
        match previous {
            None => instance.borrow_mut().component_did_mount(&props, &state),
            Some((prev_props, prev_state)) => {
                let snapshot = self.snapshots.remove(&fiber);
                instance
                    .borrow_mut()
                    .component_did_update(&props, &state, &prev_props, &prev_state, snapshot)
            }
        }
    }

    fn commit_update_callbacks(&mut self, fiber: FiberId) {
        let callbacks = match self.arena[fiber].update_queue.as_mut() {
            Some(queue) => std::mem::take(&mut queue.callbacks),
            None => return,
        };
        for callback in callbacks {
            match callback {
                UpdateCallback::User(callback) => callback(),
                UpdateCallback::DidCatch(error) => {
                    let node = &self.arena[fiber];
                    let has_derived = matches!(
                        &node.resolved_type,
                        Some(crate::element::ElementType::Class(class))
                            if class.has_derived_state_from_error()
                    );
                    if let StateNode::Class(instance) = &node.state_node {
                        if !has_derived {
                            // Without a derived state the boundary re-renders
                            // as before; it must not catch again.
                            self.failed_legacy_boundaries.insert(instance_key(instance));
                        }
                        instance.borrow_mut().component_did_catch(&error);
                    }
                }
                UpdateCallback::RootUncaught(error) => {
                    if self.uncaught_error.is_none() {
                        self.uncaught_error = Some(error);
                    }
                }
            }
        }
    }

    fn report_profiler(&mut self, fiber: FiberId) {
        let node = &self.arena[fiber];
        let Some(config) = node.memoized_props.data::<ProfilerConfig>() else {
            return;
        };
        let report = ProfilerReport {
            id: config.id.clone(),
            phase: if node.alternate.is_none() {
                ProfilerPhase::Mount
            } else {
                ProfilerPhase::Update
            },
            actual_duration: node.actual_duration,
            base_duration: node.tree_base_duration,
            start_time: node.actual_start_time.unwrap_or(self.profiler.commit_time),
            commit_time: self.profiler.commit_time,
        };
        let on_render = config.on_render.clone();
        on_render(&report);
    }
}

impl<A: Applier> Reconciler<A> {
    /// Runs the passive effects left by the last commit. Returns whether
    /// there were any.
    pub fn flush_passive_effects(&mut self) -> Result<bool, ReconcileError> {
        let Some(root_id) = self.root_with_pending_passive.take() else {
            return Ok(false);
        };
        if self
            .execution_context
            .intersects(ExecutionContext::RENDER | ExecutionContext::COMMIT)
        {
            self.root_with_pending_passive = Some(root_id);
            return Err(ReconcileError::AlreadyWorking);
        }
        let expiration_time = std::mem::replace(
            &mut self.pending_passive_expiration,
            ExpirationTime::NO_WORK,
        );
        trace!(root = ?root_id, ?expiration_time, "flushing passive effects");

        let previous = self.runtime.set_current_priority(PriorityLevel::Normal);
        let prev_context = self.execution_context;
        self.execution_context |= ExecutionContext::COMMIT;

        let unmounts: Vec<Rc<Effect>> = std::mem::take(&mut self.pending_passive_unmounts);
        for effect in unmounts {
            effect.run_destroy();
        }
        let mounts = std::mem::take(&mut self.pending_passive_mounts);
        for (fiber, effect) in mounts {
            if let Err(error) = effect.run_create() {
                self.capture_commit_phase_error(fiber, error);
            }
        }

        self.execution_context = prev_context;
        let drained = self.drain_updates();
        self.runtime.set_current_priority(previous);
        drained?;
        if self.execution_context.is_empty() {
            self.flush_sync_callback_queue()?;
        }
        self.nested_passive_update_count = if self.root_with_pending_passive.is_some() {
            self.nested_passive_update_count + 1
        } else {
            0
        };
        Ok(true)
    }

    /// Schedules the nearest error boundary above `source` to handle an
    /// error thrown while committing.
    pub(crate) fn capture_commit_phase_error(&mut self, source: FiberId, error: CapturedError) {
        if !self.arena.contains(source) {
            warn!(%error, "error from an unmounted fiber");
            return;
        }
        debug!(fiber = ?source, %error, "commit phase error");
        let mut node = if self.arena[source].tag == WorkTag::HostRoot {
            Some(source)
        } else {
            self.arena[source].return_fiber
        };
        while let Some(id) = node {
            let fiber = &self.arena[id];
            let update = match fiber.tag {
                WorkTag::HostRoot => Some(
                    Update::new(ExpirationTime::SYNC, UpdateTag::CaptureUpdate)
                        .with_payload(StatePayload::Value(state(RootState::default())))
                        .with_callback(UpdateCallback::RootUncaught(error.clone())),
                ),
                WorkTag::ClassComponent => {
                    let class = match &fiber.resolved_type {
                        Some(crate::element::ElementType::Class(class)) => Some(class),
                        _ => None,
                    };
                    let derived = class.and_then(|class| class.derived_state_from_error(&error));
                    let catches = match &fiber.state_node {
                        StateNode::Class(instance) => {
                            instance.borrow().catches_errors()
                                && !self.failed_legacy_boundaries.contains(&instance_key(instance))
                        }
                        _ => false,
                    };
                    if derived.is_some() || catches {
                        let mut update = Update::new(ExpirationTime::SYNC, UpdateTag::CaptureUpdate)
                            .with_callback(UpdateCallback::DidCatch(error.clone()));
                        if let Some(derived) = derived {
                            update = update.with_payload(StatePayload::Value(derived));
                        }
                        Some(update)
                    } else {
                        None
                    }
                }
                _ => None,
            };
            if let Some(update) = update {
                match fiber.update_queue.as_ref() {
                    Some(queue) => queue.enqueue(update),
                    None => {
                        warn!(boundary = ?id, "error boundary has no update queue");
                        return;
                    }
                }
                if let Some(root_id) = self.mark_update_time_from_fiber_to_root(
                    id,
                    ExpirationTime::SYNC,
                ) {
                    self.ensure_root_is_scheduled(root_id);
                }
                return;
            }
            node = fiber.return_fiber;
        }
        warn!(%error, "commit phase error escaped every boundary");
        if self.uncaught_error.is_none() {
            self.uncaught_error = Some(error);
        }
    }
}
