//! Routing thrown values to boundaries, and unwinding the stack when a
//! subtree does not complete.

use std::rc::Rc;

use tracing::{debug, warn};

use crate::applier::Applier;
use crate::component::state;
use crate::element::ElementType;
use crate::error::{CapturedError, ReconcileError, Thrown, SUSPENDED_WITHOUT_FALLBACK};
use crate::expiration::ExpirationTime;
use crate::fiber::{ClassInstance, EffectFlags, FiberId, FiberMode, FiberState, StateNode, WorkTag};
use crate::root::RootState;
use crate::runtime::Wakeup;
use crate::suspense::{should_capture_suspense, SuspenseContext};
use crate::thenable::Thenable;
use crate::update_queue::{enqueue_captured_update, StatePayload, Update, UpdateCallback, UpdateTag};
use crate::work_loop::{Reconciler, RootExitStatus};

/// Identity of a class instance, stable for as long as the instance lives.
pub(crate) fn instance_key(instance: &ClassInstance) -> usize {
    Rc::as_ptr(instance) as *const () as usize
}

impl<A: Applier> Reconciler<A> {
    /// Marks `source` incomplete and schedules the boundary that will
    /// handle `thrown`: the nearest Suspense boundary able to show a
    /// fallback for a thenable, otherwise the nearest error boundary or,
    /// failing that, the root.
    pub(crate) fn throw_exception(
        &mut self,
        return_fiber: FiberId,
        source: FiberId,
        thrown: Thrown,
    ) {
        let render_expiration_time = self.render_expiration_time;
        {
            let fiber = &mut self.arena[source];
            fiber.flags |= EffectFlags::INCOMPLETE;
            fiber.effects.clear();
        }

        let error = match thrown {
            Thrown::Suspend(thenable) => match self.throw_suspend(return_fiber, source, thenable) {
                None => return,
                Some(error) => error,
            },
            Thrown::Error(error) => error,
        };

        self.render_did_error();
        let error = error.with_component_stack(self.component_stack(source));
        debug!(fiber = ?source, %error, "render error");
        let mut node = Some(return_fiber);
        while let Some(id) = node {
            match self.arena[id].tag {
                WorkTag::HostRoot => {
                    let fiber = &mut self.arena[id];
                    fiber.flags |= EffectFlags::SHOULD_CAPTURE;
                    fiber.expiration_time = render_expiration_time;
                    let update = Update::new(render_expiration_time, UpdateTag::CaptureUpdate)
                        .with_payload(StatePayload::Value(state(RootState::default())))
                        .with_callback(UpdateCallback::RootUncaught(error));
                    enqueue_captured_update(&mut self.arena, id, update);
                    return;
                }
                WorkTag::ClassComponent if self.can_catch(id) => {
                    let derived = match &self.arena[id].resolved_type {
                        Some(ElementType::Class(class)) => class.derived_state_from_error(&error),
                        _ => None,
                    };
                    let fiber = &mut self.arena[id];
                    fiber.flags |= EffectFlags::SHOULD_CAPTURE;
                    fiber.expiration_time = render_expiration_time;
                    let mut update = Update::new(render_expiration_time, UpdateTag::CaptureUpdate)
                        .with_callback(UpdateCallback::DidCatch(error));
                    if let Some(derived) = derived {
                        update = update.with_payload(StatePayload::Value(derived));
                    }
                    enqueue_captured_update(&mut self.arena, id, update);
                    return;
                }
                _ => {}
            }
            node = self.arena[id].return_fiber;
        }
    }

    /// Handles a thrown thenable. Returns the error to raise instead when
    /// no boundary above can show a fallback.
    fn throw_suspend(
        &mut self,
        return_fiber: FiberId,
        source: FiberId,
        thenable: Thenable,
    ) -> Option<CapturedError> {
        let render_expiration_time = self.render_expiration_time;
        let source_is_legacy = !self.arena[source].mode.contains(FiberMode::CONCURRENT);
        if source_is_legacy {
            // The partial render is committed as is; drop its new state.
            let restored = self.arena[source].alternate.map(|current| {
                let current = &self.arena[current];
                (
                    current.update_queue.clone(),
                    current.memoized_state.clone(),
                    current.expiration_time,
                )
            });
            let fiber = &mut self.arena[source];
            match restored {
                Some((queue, memoized_state, expiration_time)) => {
                    fiber.update_queue = queue;
                    fiber.memoized_state = memoized_state;
                    fiber.expiration_time = expiration_time;
                }
                None => {
                    fiber.update_queue = None;
                    fiber.memoized_state = FiberState::None;
                }
            }
        }

        let has_invisible_parent =
            self.current_suspense_context().has(SuspenseContext::INVISIBLE_PARENT);
        let mut node = Some(return_fiber);
        while let Some(id) = node {
            let boundary = &self.arena[id];
            if boundary.tag == WorkTag::SuspenseComponent
                && should_capture_suspense(boundary, has_invisible_parent)
            {
                if !self.arena[id].retry_wakeables.iter().any(|t| t.ptr_eq(&thenable)) {
                    self.arena[id].retry_wakeables.push(thenable.clone());
                }
                if !self.arena[id].mode.contains(FiberMode::CONCURRENT) {
                    self.arena[id].flags |= EffectFlags::DID_CAPTURE;
                    let source_fiber = &mut self.arena[source];
                    source_fiber
                        .flags
                        .remove(EffectFlags::LIFECYCLE_EFFECT_MASK | EffectFlags::INCOMPLETE);
                    if source_fiber.tag == WorkTag::ClassComponent {
                        match source_fiber.alternate {
                            None => source_fiber.tag = WorkTag::IncompleteClassComponent,
                            Some(_) => {
                                if let Some(queue) = source_fiber.update_queue.as_ref() {
                                    queue.enqueue(Update::new(
                                        ExpirationTime::SYNC,
                                        UpdateTag::ForceUpdate,
                                    ));
                                }
                            }
                        }
                    }
                    source_fiber.expiration_time = ExpirationTime::SYNC;
                    debug!(boundary = ?id, "legacy suspend");
                    return None;
                }
                self.attach_ping_listener(&thenable, render_expiration_time);
                let boundary = &mut self.arena[id];
                boundary.flags |= EffectFlags::SHOULD_CAPTURE;
                boundary.expiration_time = render_expiration_time;
                debug!(boundary = ?id, thenable = ?thenable.id(), "suspended");
                return None;
            }
            node = self.arena[id].return_fiber;
        }
        Some(CapturedError::new(SUSPENDED_WITHOUT_FALLBACK))
    }

    fn can_catch(&self, fiber: FiberId) -> bool {
        let fiber = &self.arena[fiber];
        if fiber.flags.contains(EffectFlags::DID_CAPTURE) {
            return false;
        }
        let has_derived = matches!(
            &fiber.resolved_type,
            Some(ElementType::Class(class)) if class.has_derived_state_from_error()
        );
        if has_derived {
            return true;
        }
        match &fiber.state_node {
            StateNode::Class(instance) => {
                instance.borrow().catches_errors()
                    && !self.failed_legacy_boundaries.contains(&instance_key(instance))
            }
            _ => false,
        }
    }

    /// Pings the render root when `thenable` settles, once per thenable and
    /// expiration time.
    fn attach_ping_listener(
        &mut self,
        thenable: &Thenable,
        render_expiration_time: ExpirationTime,
    ) {
        let Some(root_id) = self.wip_root else {
            return;
        };
        let Some(root) = self.roots.get_mut(&root_id) else {
            return;
        };
        let first_for_level = root
            .ping_cache
            .entry(thenable.id())
            .or_default()
            .insert(render_expiration_time);
        if first_for_level {
            let waker = self.runtime.waker(Wakeup::Ping {
                root: root_id,
                thenable: thenable.id(),
                expiration: render_expiration_time,
            });
            thenable.then(waker);
        }
    }

    /// Names of the components from `source` up to the root.
    fn component_stack(&self, source: FiberId) -> Vec<String> {
        let mut stack = Vec::new();
        let mut node = Some(source);
        while let Some(id) = node {
            let fiber = &self.arena[id];
            match fiber.tag {
                WorkTag::HostRoot
                | WorkTag::HostText
                | WorkTag::Fragment
                | WorkTag::Mode
                | WorkTag::Offscreen
                | WorkTag::ContextProvider
                | WorkTag::ContextConsumer
                | WorkTag::DehydratedFragment => {}
                _ => stack.push(fiber.name()),
            }
            node = fiber.return_fiber;
        }
        stack
    }

    /// Pops the stack entries of an incomplete fiber. Returns the fiber
    /// again when it captured what was thrown and must render once more.
    pub(crate) fn unwind_work(&mut self, wip: FiberId) -> Option<FiberId> {
        match self.arena[wip].tag {
            WorkTag::ClassComponent => self.capture_if_requested(wip),
            WorkTag::HostRoot => {
                self.pop_host_container();
                let fiber = &mut self.arena[wip];
                if fiber.flags.contains(EffectFlags::DID_CAPTURE) {
                    warn!("root failed to recover from an error");
                    self.exit_status = RootExitStatus::FatalErrored;
                    self.fatal_error = Some(ReconcileError::Uncaught(CapturedError::new(
                        "the root failed to unmount after an error",
                    )));
                    return None;
                }
                fiber.flags.remove(EffectFlags::SHOULD_CAPTURE);
                fiber.flags |= EffectFlags::DID_CAPTURE;
                Some(wip)
            }
            WorkTag::HostComponent => {
                self.pop_host_context();
                None
            }
            WorkTag::SuspenseComponent => {
                self.pop_suspense_context();
                self.capture_if_requested(wip)
            }
            WorkTag::SuspenseListComponent => {
                self.pop_suspense_context();
                None
            }
            WorkTag::HostPortal => {
                self.pop_host_container();
                None
            }
            WorkTag::ContextProvider => {
                if let Some((context, _)) = self.provider_value(wip) {
                    self.contexts.pop(&context);
                }
                None
            }
            _ => None,
        }
    }

    fn capture_if_requested(&mut self, wip: FiberId) -> Option<FiberId> {
        let fiber = &mut self.arena[wip];
        if !fiber.flags.contains(EffectFlags::SHOULD_CAPTURE) {
            return None;
        }
        fiber.flags.remove(EffectFlags::SHOULD_CAPTURE);
        fiber.flags |= EffectFlags::DID_CAPTURE;
        Some(wip)
    }

    /// Pops the stack entries of a fiber abandoned mid-render.
    pub(crate) fn unwind_interrupted_work(&mut self, interrupted: FiberId) {
        let Some(fiber) = self.arena.get(interrupted) else {
            return;
        };
        match fiber.tag {
            WorkTag::HostRoot | WorkTag::HostPortal => self.pop_host_container(),
            WorkTag::HostComponent => self.pop_host_context(),
            WorkTag::SuspenseComponent | WorkTag::SuspenseListComponent => {
                self.pop_suspense_context()
            }
            WorkTag::ContextProvider => {
                if let Some((context, _)) = self.provider_value(interrupted) {
                    self.contexts.pop(&context);
                }
            }
            _ => {}
        }
    }
}
