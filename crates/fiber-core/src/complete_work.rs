//! The complete phase: create and diff host instances, pop stack entries,
//! and drive Suspense boundaries and lists through their extra passes.

use std::rc::Rc;

use tracing::trace;

use crate::applier::{Applier, HostId};
use crate::child_reconciler::reset_child_fibers;
use crate::element::TailMode;
use crate::error::{CapturedError, ReconcileError};
use crate::expiration::ExpirationTime;
use crate::fiber::{EffectFlags, FiberId, FiberMode, StateNode, WorkTag};
use crate::suspense::{
    find_first_suspended, is_timed_out, SuspenseContext, SuspenseListRenderState,
    TAIL_EXPIRATION_MS,
};
use crate::work_loop::Reconciler;

impl<A: Applier> Reconciler<A> {
    /// Finishes `wip` once its children are done. Returns a fiber when the
    /// same subtree needs another pass before moving on.
    pub(crate) fn complete_work(
        &mut self,
        current: Option<FiberId>,
        wip: FiberId,
    ) -> Result<Option<FiberId>, ReconcileError> {
        let tag = self.arena[wip].tag;
        trace!(fiber = ?wip, ?tag, "complete");
        match tag {
            WorkTag::FunctionComponent
            | WorkTag::ForwardRef
            | WorkTag::Fragment
            | WorkTag::Mode
            | WorkTag::Profiler
            | WorkTag::ContextConsumer
            | WorkTag::MemoComponent
            | WorkTag::SimpleMemoComponent
            | WorkTag::LazyComponent
            | WorkTag::ClassComponent
            | WorkTag::IncompleteClassComponent
            | WorkTag::Offscreen
            | WorkTag::DehydratedFragment => Ok(None),
            WorkTag::HostRoot => {
                self.pop_host_container();
                Ok(None)
            }
            WorkTag::HostPortal => {
                self.pop_host_container();
                Ok(None)
            }
            WorkTag::ContextProvider => {
                if let Some((context, _)) = self.provider_value(wip) {
                    self.contexts.pop(&context);
                }
                Ok(None)
            }
            WorkTag::HostComponent => {
                self.complete_host_component(current, wip)?;
                Ok(None)
            }
            WorkTag::HostText => {
                self.complete_host_text(current, wip)?;
                Ok(None)
            }
            WorkTag::SuspenseComponent => Ok(self.complete_suspense_component(current, wip)),
            WorkTag::SuspenseListComponent => Ok(self.complete_suspense_list(current, wip)),
        }
    }

    fn complete_host_component(
        &mut self,
        current: Option<FiberId>,
        wip: FiberId,
    ) -> Result<(), ReconcileError> {
        self.pop_host_context();
        let ty = self.host_type(wip);
        let new_props = self.arena[wip].pending_props.clone();
        let existing = self.arena[wip].state_node.host();

        if let (Some(current), Some(instance)) = (current, existing) {
            let old_props = self.arena[current].memoized_props.clone();
            if !Rc::ptr_eq(&old_props, &new_props) {
                let payload = self.applier.prepare_update(instance, &ty, &old_props, &new_props);
                let fiber = &mut self.arena[wip];
                if payload.is_some() {
                    fiber.flags |= EffectFlags::UPDATE;
                }
                fiber.update_payload = payload;
            }
            let ref_changed = match (&self.arena[current].ref_, &self.arena[wip].ref_) {
                (None, None) => false,
                (Some(a), Some(b)) => !a.ptr_eq(b),
                _ => true,
            };
            if ref_changed {
                self.arena[wip].flags |= EffectFlags::REF;
            }
            return Ok(());
        }

        let Some(context) = self.current_host_context().cloned() else {
            return Err(outside_container());
        };
        let instance = self.applier.create_instance(&ty, &new_props, &context)?;
        self.append_all_children(instance, wip)?;
        let needs_mount = self.applier.finalize_initial_children(instance, &ty, &new_props);
        let fiber = &mut self.arena[wip];
        fiber.state_node = StateNode::Host(instance);
        if needs_mount {
            fiber.flags |= EffectFlags::UPDATE;
        }
        if fiber.ref_.is_some() {
            fiber.flags |= EffectFlags::REF;
        }
        Ok(())
    }

    /// Attaches the nearest host descendants of `wip` to `parent`, which is
    /// not yet part of the host tree.
    fn append_all_children(&mut self, parent: HostId, wip: FiberId) -> Result<(), ReconcileError> {
        let mut node = self.arena[wip].child;
        while let Some(id) = node {
            let fiber = &self.arena[id];
            match fiber.tag {
                WorkTag::HostComponent | WorkTag::HostText => {
                    if let Some(child) = fiber.state_node.host() {
                        self.applier.append_initial_child(parent, child)?;
                    }
                }
                WorkTag::HostPortal => {}
                _ => {
                    if let Some(child) = fiber.child {
                        self.arena[child].return_fiber = Some(id);
                        node = Some(child);
                        continue;
                    }
                }
            }
            node = self.next_host_sibling_in(wip, id);
        }
        Ok(())
    }

    fn next_host_sibling_in(&mut self, root: FiberId, mut node: FiberId) -> Option<FiberId> {
        loop {
            if node == root {
                return None;
            }
            if let Some(sibling) = self.arena[node].sibling {
                let parent = self.arena[node].return_fiber;
                self.arena[sibling].return_fiber = parent;
                return Some(sibling);
            }
            match self.arena[node].return_fiber {
                Some(parent) if parent != root => node = parent,
                _ => return None,
            }
        }
    }

    fn complete_host_text(
        &mut self,
        current: Option<FiberId>,
        wip: FiberId,
    ) -> Result<(), ReconcileError> {
        let new_text = self.arena[wip].pending_props.text().unwrap_or_default().to_string();
        if let (Some(current), Some(_)) = (current, self.arena[wip].state_node.host()) {
            let old_text = self.arena[current].memoized_props.text().unwrap_or_default();
            if old_text != new_text {
                self.arena[wip].flags |= EffectFlags::UPDATE;
            }
            return Ok(());
        }
        let Some(context) = self.current_host_context().cloned() else {
            return Err(outside_container());
        };
        let instance = self.applier.create_text_instance(&new_text, &context)?;
        self.arena[wip].state_node = StateNode::Text(instance);
        Ok(())
    }

    fn complete_suspense_component(
        &mut self,
        current: Option<FiberId>,
        wip: FiberId,
    ) -> Option<FiberId> {
        self.pop_suspense_context();
        if crate::suspense::dehydrated_markup(&self.arena[wip]).is_some() {
            return None;
        }
        if self.arena[wip].flags.contains(EffectFlags::DID_CAPTURE) {
            // Something below suspended in legacy mode; render again with
            // the fallback.
            self.arena[wip].expiration_time = self.render_expiration_time;
            return Some(wip);
        }

        let next_did_timeout = is_timed_out(&self.arena[wip]);
        let prev_did_timeout = current.is_some_and(|current| is_timed_out(&self.arena[current]));

        if let Some(current) = current {
            if !next_did_timeout && prev_did_timeout {
                // Content is back; the committed fallback goes away.
                let current_fallback =
                    self.arena[current].child.and_then(|primary| self.arena[primary].sibling);
                if let Some(fallback) = current_fallback {
                    let fiber = &mut self.arena[fallback];
                    fiber.flags = EffectFlags::DELETION;
                    fiber.effects.clear();
                    self.arena[wip].effects.insert(0, fallback);
                }
            }
        }

        if next_did_timeout
            && !prev_did_timeout
            && self.arena[wip].mode.contains(FiberMode::CONCURRENT)
        {
            let has_invisible_child_context =
                current.is_none() && !self.arena[wip].memoized_props.bool("avoid_fallback");
            if has_invisible_child_context
                || self.current_suspense_context().has(SuspenseContext::INVISIBLE_PARENT)
            {
                self.render_did_suspend();
            } else {
                self.render_did_suspend_delay_if_possible();
            }
        }

        if next_did_timeout || prev_did_timeout || !self.arena[wip].retry_wakeables.is_empty() {
            // Hides or reveals the primary children and subscribes retries.
            self.arena[wip].flags |= EffectFlags::UPDATE;
        }
        None
    }
}

impl<A: Applier> Reconciler<A> {
    fn complete_suspense_list(
        &mut self,
        current: Option<FiberId>,
        wip: FiberId,
    ) -> Option<FiberId> {
        self.pop_suspense_context();
        let Some(render_state) = self.arena[wip].memoized_state.suspense_list().cloned() else {
            // Independent rows need nothing from the list.
            return None;
        };
        let mut render_state = render_state;
        let mut did_suspend_already = self.arena[wip].flags.contains(EffectFlags::DID_CAPTURE);

        match render_state.rendering {
            None => {
                if did_suspend_already {
                    cut_off_tail_if_needed(&mut self.arena, &mut render_state, false);
                } else {
                    let cannot_be_suspended = self.render_has_not_suspended_yet()
                        && current.map_or(true, |current| {
                            !self.arena[current].flags.contains(EffectFlags::DID_CAPTURE)
                        });
                    if !cannot_be_suspended {
                        let mut row = self.arena[wip].child;
                        while let Some(id) = row {
                            if let Some(suspended) = find_first_suspended(&self.arena, id) {
                                self.arena[wip].flags |= EffectFlags::DID_CAPTURE;
                                cut_off_tail_if_needed(&mut self.arena, &mut render_state, false);
                                self.adopt_retry_wakeables(wip, suspended);
                                // Second pass over the same rows with every
                                // fallback forced.
                                self.arena[wip].effects.truncate(render_state.last_effect_len);
                                self.store_list_state(wip, render_state);
                                reset_child_fibers(
                                    &mut self.arena,
                                    wip,
                                    self.render_expiration_time,
                                );
                                let context = self
                                    .current_suspense_context()
                                    .with_shallow(SuspenseContext::FORCE_FALLBACK);
                                self.push_suspense_context(context);
                                return self.arena[wip].child;
                            }
                            row = self.arena[id].sibling;
                        }
                    }
                }
            }
            Some(rendered_tail) => {
                if !did_suspend_already {
                    if let Some(suspended) = find_first_suspended(&self.arena, rendered_tail) {
                        self.arena[wip].flags |= EffectFlags::DID_CAPTURE;
                        did_suspend_already = true;
                        self.adopt_retry_wakeables(wip, suspended);
                        cut_off_tail_if_needed(&mut self.arena, &mut render_state, true);
                        let is_new_row = self.arena[rendered_tail].alternate.is_none();
                        if render_state.tail.is_none()
                            && render_state.tail_mode == Some(TailMode::Hidden)
                            && is_new_row
                        {
                            // The row just rendered is dropped again.
                            self.arena[wip].effects.truncate(render_state.last_effect_len);
                            self.store_list_state(wip, render_state);
                            return None;
                        }
                    } else if self.now_ms() * 2
                        - render_state.rendering_start_time.min(self.now_ms())
                        > render_state.tail_expiration
                        && self.render_expiration_time > ExpirationTime::NEVER
                    {
                        // Out of time: show the rest of the tail as
                        // fallbacks and pick the rows up in a later render.
                        self.arena[wip].flags |= EffectFlags::DID_CAPTURE;
                        did_suspend_already = true;
                        cut_off_tail_if_needed(&mut self.arena, &mut render_state, false);
                        let next_priority =
                            ExpirationTime::from_raw(self.render_expiration_time.raw() - 1);
                        let fiber = &mut self.arena[wip];
                        fiber.expiration_time = next_priority;
                        fiber.child_expiration_time = next_priority;
                    }
                }
                if render_state.is_backwards {
                    let first = self.arena[wip].child;
                    self.arena[rendered_tail].sibling = first;
                    self.arena[wip].child = Some(rendered_tail);
                } else {
                    match render_state.last {
                        Some(previous) => self.arena[previous].sibling = Some(rendered_tail),
                        None => self.arena[wip].child = Some(rendered_tail),
                    }
                    render_state.last = Some(rendered_tail);
                }
            }
        }

        let Some(next) = render_state.tail else {
            self.store_list_state(wip, render_state);
            return None;
        };
        let now = self.now_ms();
        if render_state.tail_expiration == 0 {
            render_state.tail_expiration = now + TAIL_EXPIRATION_MS;
        }
        render_state.rendering = Some(next);
        render_state.tail = self.arena[next].sibling;
        render_state.last_effect_len = self.arena[wip].effects.len();
        render_state.rendering_start_time = now;
        self.arena[next].sibling = None;
        self.arena[next].return_fiber = Some(wip);
        self.store_list_state(wip, render_state);

        let context = self.current_suspense_context();
        let context = if did_suspend_already {
            context.with_shallow(SuspenseContext::FORCE_FALLBACK)
        } else {
            context.subtree()
        };
        self.push_suspense_context(context);
        Some(next)
    }

    fn store_list_state(&mut self, wip: FiberId, render_state: SuspenseListRenderState) {
        self.arena[wip].memoized_state = crate::fiber::FiberState::SuspenseList(render_state);
    }

    /// Moves the thenables of a suspended boundary onto the list so it is
    /// retried even if that boundary never commits.
    fn adopt_retry_wakeables(&mut self, wip: FiberId, suspended: FiberId) {
        let wakeables = self.arena[suspended].retry_wakeables.clone();
        if !wakeables.is_empty() {
            let fiber = &mut self.arena[wip];
            fiber.retry_wakeables = wakeables;
            fiber.flags |= EffectFlags::UPDATE;
        }
    }
}

fn outside_container() -> ReconcileError {
    ReconcileError::Uncaught(CapturedError::new("host node rendered outside a host container"))
}

/// Drops tail rows that are new insertions, according to the tail mode.
fn cut_off_tail_if_needed(
    arena: &mut crate::fiber::FiberArena,
    render_state: &mut SuspenseListRenderState,
    has_rendered_a_tail_fallback: bool,
) {
    let mode = match render_state.tail_mode {
        Some(mode @ (TailMode::Hidden | TailMode::Collapsed)) => mode,
        _ => return,
    };
    let mut last_mounted = None;
    let mut node = render_state.tail;
    while let Some(id) = node {
        if arena[id].alternate.is_some() {
            last_mounted = Some(id);
        }
        node = arena[id].sibling;
    }
    match last_mounted {
        Some(last) => arena[last].sibling = None,
        None => {
            if mode == TailMode::Collapsed && !has_rendered_a_tail_fallback {
                // Keep one row so something shows after the head.
                if let Some(first) = render_state.tail {
                    arena[first].sibling = None;
                }
            } else {
                render_state.tail = None;
            }
        }
    }
}
