//! The begin phase: render one fiber and reconcile its children.

use std::any::Any;
use std::cell::RefCell;
use std::rc::Rc;

use tracing::trace;

use crate::applier::Applier;
use crate::child_reconciler::{clone_child_fibers, ChildReconciler};
use crate::component::{state, ClassType, FunctionComponent, StateValue, Updater};
use crate::context::{AnyContext, ConsumerRender, Dependencies};
use crate::element::{shallow_equal, Element, ElementType, Node, PropValue, Props, Ref};
use crate::error::{invalid_element_type, CapturedError, Thrown};
use crate::expiration::ExpirationTime;
use crate::fiber::{
    fiber_from_element, fiber_from_fragment, EffectFlags, FiberId, FiberMode, FiberState, StateNode,
    WorkTag,
};
use crate::hooks::{apply_hook_output, bailout_hooks, render_with_hooks, RenderCx};
use crate::root::RootState;
use crate::update_queue::{process_update_queue, QueueOutcome, SharedPending, UpdateQueue};
use crate::work_loop::Reconciler;

fn same_ref(a: &Option<Ref>, b: &Option<Ref>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => a.ptr_eq(b),
        _ => false,
    }
}

fn missing(what: &str) -> Thrown {
    Thrown::Error(CapturedError::new(format!("fiber is missing its {what}")))
}

impl<A: Applier> Reconciler<A> {
    /// Renders `wip` and returns the next fiber to begin, or `None` when
    /// the fiber has no children left to work on.
    pub(crate) fn begin_work(
        &mut self,
        current: Option<FiberId>,
        wip: FiberId,
        render_expiration_time: ExpirationTime,
    ) -> Result<Option<FiberId>, Thrown> {
        let update_expiration_time = self.arena[wip].expiration_time;

        if let Some(current_id) = current {
            let same_props = Rc::ptr_eq(
                &self.arena[current_id].memoized_props,
                &self.arena[wip].pending_props,
            );
            if !same_props {
                self.did_receive_update = true;
            } else if update_expiration_time < render_expiration_time {
                self.did_receive_update = false;
                return Ok(self.bailout_without_work(current_id, wip, render_expiration_time));
            } else {
                self.did_receive_update = false;
            }
        } else {
            self.did_receive_update = false;
        }

        self.arena[wip].expiration_time = ExpirationTime::NO_WORK;
        let tag = self.arena[wip].tag;
        trace!(fiber = ?wip, ?tag, "begin");
        match tag {
            WorkTag::LazyComponent => self.mount_lazy_component(
                current,
                wip,
                update_expiration_time,
                render_expiration_time,
            ),
            WorkTag::FunctionComponent => {
                let Some(ElementType::Function(component)) = self.arena[wip].resolved_type.clone()
                else {
                    return Err(missing("function component"));
                };
                self.update_function_component(current, wip, &component, render_expiration_time)
            }
            WorkTag::ClassComponent => {
                let Some(ElementType::Class(class)) = self.arena[wip].resolved_type.clone() else {
                    return Err(missing("class"));
                };
                self.update_class_component(current, wip, &class, render_expiration_time)
            }
            WorkTag::IncompleteClassComponent => {
                self.mount_incomplete_class_component(current, wip, render_expiration_time)
            }
            WorkTag::HostRoot => Ok(self.update_host_root(current, wip, render_expiration_time)),
            WorkTag::HostComponent => {
                Ok(self.update_host_component(current, wip, render_expiration_time))
            }
            WorkTag::HostText | WorkTag::DehydratedFragment => Ok(None),
            WorkTag::SuspenseComponent => {
                Ok(self.update_suspense_component(current, wip, render_expiration_time))
            }
            WorkTag::HostPortal => {
                Ok(self.update_portal_component(current, wip, render_expiration_time))
            }
            WorkTag::ForwardRef => self.update_forward_ref(current, wip, render_expiration_time),
            WorkTag::Fragment | WorkTag::Mode => {
                Ok(self.update_fragment(current, wip, render_expiration_time))
            }
            WorkTag::Profiler => Ok(self.update_profiler(current, wip, render_expiration_time)),
            WorkTag::ContextProvider => {
                Ok(self.update_context_provider(current, wip, render_expiration_time))
            }
            WorkTag::ContextConsumer => {
                self.update_context_consumer(current, wip, render_expiration_time)
            }
            WorkTag::MemoComponent => self.update_memo_component(
                current,
                wip,
                update_expiration_time,
                render_expiration_time,
            ),
            WorkTag::SimpleMemoComponent => self.update_simple_memo_component(
                current,
                wip,
                update_expiration_time,
                render_expiration_time,
            ),
            WorkTag::SuspenseListComponent => {
                Ok(self.update_suspense_list_component(current, wip, render_expiration_time))
            }
            WorkTag::Offscreen => {
                Ok(self.update_offscreen_component(current, wip, render_expiration_time))
            }
        }
    }

    /// Fast path for a fiber with the same props and no work of its own at
    /// this level: restore whatever stack entries its subtree expects and
    /// skip straight to the children.
    fn bailout_without_work(
        &mut self,
        current: FiberId,
        wip: FiberId,
        render_expiration_time: ExpirationTime,
    ) -> Option<FiberId> {
        match self.arena[wip].tag {
            WorkTag::HostRoot => self.push_root_container(wip),
            WorkTag::HostComponent => {
                let props = self.arena[wip].pending_props.clone();
                let ty = self.host_type(wip);
                self.push_host_context(&ty);
                if self.arena[wip].mode.contains(FiberMode::CONCURRENT)
                    && render_expiration_time != ExpirationTime::NEVER
                    && self.applier.should_deprioritize_subtree(&ty, &props)
                {
                    let fiber = &mut self.arena[wip];
                    fiber.expiration_time = ExpirationTime::NEVER;
                    fiber.child_expiration_time = ExpirationTime::NEVER;
                    return None;
                }
            }
            WorkTag::HostPortal => {
                if let StateNode::Portal(container) = self.arena[wip].state_node {
                    self.push_host_container(container);
                }
            }
            WorkTag::ContextProvider => {
                if let Some((context, value)) = self.provider_value(wip) {
                    self.contexts.push(&context, value);
                }
            }
            WorkTag::Profiler => {
                if self.arena[wip].child_expiration_time >= render_expiration_time {
                    self.arena[wip].flags |= EffectFlags::UPDATE;
                }
            }
            WorkTag::SuspenseComponent => return self.bailout_suspense(
                current,
                wip,
                render_expiration_time,
            ),
            WorkTag::SuspenseListComponent => {
                let has_child_work =
                    self.arena[wip].child_expiration_time >= render_expiration_time;
                if self.arena[current].flags.contains(EffectFlags::DID_CAPTURE) {
                    if has_child_work {
                        return self.update_suspense_list_component(
                            Some(current),
                            wip,
                            render_expiration_time,
                        );
                    }
                    self.arena[wip].flags |= EffectFlags::DID_CAPTURE;
                }
                if let Some(render_state) = self.arena[wip].memoized_state.suspense_list_mut() {
                    render_state.rendering = None;
                    render_state.tail = None;
                }
                let context = self.current_suspense_context();
                self.push_suspense_context(context);
                if !has_child_work {
                    return None;
                }
            }
            _ => {}
        }
        self.bailout_on_already_finished_work(Some(current), wip, render_expiration_time)
    }

    pub(crate) fn bailout_on_already_finished_work(
        &mut self,
        current: Option<FiberId>,
        wip: FiberId,
        render_expiration_time: ExpirationTime,
    ) -> Option<FiberId> {
        if let Some(current) = current {
            self.arena[wip].dependencies = self.arena[current].dependencies.clone();
        }
        let update_expiration_time = self.arena[wip].expiration_time;
        if update_expiration_time != ExpirationTime::NO_WORK {
            self.mark_unprocessed_update_time(update_expiration_time);
        }
        if self.arena[wip].child_expiration_time < render_expiration_time {
            return None;
        }
        clone_child_fibers(&mut self.arena, wip);
        self.arena[wip].child
    }

    pub(crate) fn reconcile_children(
        &mut self,
        current: Option<FiberId>,
        wip: FiberId,
        children: &Node,
        render_expiration_time: ExpirationTime,
    ) {
        let current_first = current.and_then(|current| self.arena[current].child);
        self.reconcile_children_from(
            wip,
            current_first,
            current.is_some(),
            children,
            render_expiration_time,
        );
    }

    fn reconcile_children_from(
        &mut self,
        wip: FiberId,
        current_first: Option<FiberId>,
        track_side_effects: bool,
        children: &Node,
        render_expiration_time: ExpirationTime,
    ) {
        let child = ChildReconciler::new(
            &mut self.arena,
            &mut self.fresh,
            track_side_effects,
            render_expiration_time,
        )
        .reconcile_child_fibers(wip, current_first, children);
        self.arena[wip].child = child;
    }

    /// Deletes every current child and mounts `children` from scratch, so
    /// nothing of the failed tree is reused.
    fn force_unmount_current_and_reconcile(
        &mut self,
        current: FiberId,
        wip: FiberId,
        children: &Node,
        render_expiration_time: ExpirationTime,
    ) {
        let current_first = self.arena[current].child;
        self.reconcile_children_from(
            wip,
            current_first,
            true,
            &Node::Empty,
            render_expiration_time,
        );
        self.reconcile_children_from(wip, None, true, children, render_expiration_time);
    }

    fn mark_ref(&mut self, current: Option<FiberId>, wip: FiberId) {
        let changed = match current {
            None => self.arena[wip].ref_.is_some(),
            Some(current) => !same_ref(&self.arena[current].ref_, &self.arena[wip].ref_),
        };
        if changed {
            self.arena[wip].flags |= EffectFlags::REF;
        }
    }

    fn note_queue_outcome(&mut self, outcome: &QueueOutcome) {
        self.mark_render_event_time(outcome.latest_processed);
        if outcome.remaining != ExpirationTime::NO_WORK {
            self.mark_unprocessed_update_time(outcome.remaining);
        }
    }

    pub(crate) fn host_type(&self, fiber: FiberId) -> Rc<str> {
        match &self.arena[fiber].element_type {
            Some(ElementType::Host(ty)) => ty.clone(),
            _ => Rc::from(""),
        }
    }

    fn push_root_container(&mut self, wip: FiberId) {
        let container = match self.arena[wip].state_node {
            StateNode::Root(root) => self.roots.get(&root).map(|root| root.container),
            _ => None,
        };
        if let Some(container) = container {
            self.push_host_container(container);
        }
    }

    /// Context and value supplied by the provider fiber `fiber`.
    pub(crate) fn provider_value(&self, fiber: FiberId) -> Option<(AnyContext, Rc<dyn Any>)> {
        let fiber = &self.arena[fiber];
        let Some(ElementType::Provider(context)) = &fiber.element_type else {
            return None;
        };
        let value = fiber
            .pending_props
            .raw_data()
            .cloned()
            .unwrap_or_else(|| context.default_value());
        Some((context.clone(), value))
    }
}

impl<A: Applier> Reconciler<A> {
    fn root_element(&self, fiber: FiberId) -> Node {
        self.arena[fiber]
            .memoized_state
            .value()
            .and_then(|value| value.downcast_ref::<RootState>())
            .map(|root| root.element.clone())
            .unwrap_or(Node::Empty)
    }

    fn update_host_root(
        &mut self,
        current: Option<FiberId>,
        wip: FiberId,
        render_expiration_time: ExpirationTime,
    ) -> Option<FiberId> {
        self.push_root_container(wip);
        let props = self.arena[wip].pending_props.clone();
        let prev_children = self.root_element(wip);
        let outcome = process_update_queue(&mut self.arena, wip, &props, render_expiration_time);
        self.note_queue_outcome(&outcome);
        let next_children = self.root_element(wip);
        if next_children == prev_children {
            return self.bailout_on_already_finished_work(current, wip, render_expiration_time);
        }
        self.reconcile_children(current, wip, &next_children, render_expiration_time);
        self.arena[wip].child
    }

    fn update_host_component(
        &mut self,
        current: Option<FiberId>,
        wip: FiberId,
        render_expiration_time: ExpirationTime,
    ) -> Option<FiberId> {
        let ty = self.host_type(wip);
        self.push_host_context(&ty);
        let next_props = self.arena[wip].pending_props.clone();
        let is_direct_text_child = self.applier.should_set_text_content(&ty, &next_props);
        let children = if is_direct_text_child {
            // Rendered by the host as the node's own text content.
            Node::Empty
        } else {
            next_props.children().clone()
        };
        if let Some(current) = current {
            let prev_props = self.arena[current].memoized_props.clone();
            if !is_direct_text_child && self.applier.should_set_text_content(&ty, &prev_props) {
                self.arena[wip].flags |= EffectFlags::CONTENT_RESET;
            }
        }
        self.mark_ref(current, wip);

        if self.arena[wip].mode.contains(FiberMode::CONCURRENT)
            && render_expiration_time != ExpirationTime::NEVER
            && self.applier.should_deprioritize_subtree(&ty, &next_props)
        {
            let fiber = &mut self.arena[wip];
            fiber.expiration_time = ExpirationTime::NEVER;
            fiber.child_expiration_time = ExpirationTime::NEVER;
            return None;
        }
        self.reconcile_children(current, wip, &children, render_expiration_time);
        self.arena[wip].child
    }

    /// Runs a hook component's render and reconciles what it returned, or
    /// bails out when nothing it depends on changed.
    fn finish_hook_render(
        &mut self,
        current: Option<FiberId>,
        wip: FiberId,
        render_expiration_time: ExpirationTime,
        render: impl FnOnce(&mut RenderCx<'_>) -> crate::component::RenderResult,
    ) -> Result<Option<FiberId>, Thrown> {
        let runtime = self.runtime.handle();
        let mut output = render_with_hooks(
            &mut self.arena,
            wip,
            current,
            &self.contexts,
            runtime,
            render_expiration_time,
            render,
        );
        let result = std::mem::replace(&mut output.result, Ok(Node::Empty));
        let children = result?;
        apply_hook_output(&mut self.arena, wip, &mut output);
        self.mark_render_event_time(output.latest_processed);
        if output.remaining != ExpirationTime::NO_WORK {
            self.mark_unprocessed_update_time(output.remaining);
        }
        if let Some(current) = current {
            if !self.did_receive_update && !output.did_receive_update {
                bailout_hooks(&mut self.arena, wip, current, render_expiration_time);
                return Ok(self.bailout_on_already_finished_work(
                    Some(current),
                    wip,
                    render_expiration_time,
                ));
            }
        }
        self.arena[wip].flags |= EffectFlags::PERFORMED_WORK;
        self.reconcile_children(current, wip, &children, render_expiration_time);
        Ok(self.arena[wip].child)
    }

    fn update_function_component(
        &mut self,
        current: Option<FiberId>,
        wip: FiberId,
        component: &FunctionComponent,
        render_expiration_time: ExpirationTime,
    ) -> Result<Option<FiberId>, Thrown> {
        let props = self.arena[wip].pending_props.clone();
        let component = component.clone();
        self.finish_hook_render(current, wip, render_expiration_time, move |cx| {
            component.render(cx, &props)
        })
    }

    fn update_forward_ref(
        &mut self,
        current: Option<FiberId>,
        wip: FiberId,
        render_expiration_time: ExpirationTime,
    ) -> Result<Option<FiberId>, Thrown> {
        let Some(ElementType::ForwardRef(component)) = self.arena[wip].resolved_type.clone() else {
            return Err(missing("forward-ref render function"));
        };
        let props = self.arena[wip].pending_props.clone();
        let ref_ = self.arena[wip].ref_.clone();
        self.finish_hook_render(current, wip, render_expiration_time, move |cx| {
            component.render(cx, &props, ref_.as_ref())
        })
    }

    fn update_memo_component(
        &mut self,
        current: Option<FiberId>,
        wip: FiberId,
        update_expiration_time: ExpirationTime,
        render_expiration_time: ExpirationTime,
    ) -> Result<Option<FiberId>, Thrown> {
        let Some(ElementType::Memo(memo)) = self.arena[wip].resolved_type.clone() else {
            return Err(missing("memo type"));
        };
        let next_props = self.arena[wip].pending_props.clone();
        let Some(current) = current else {
            if memo.is_simple() {
                // A plain function with the default comparison skips the
                // wrapper fiber entirely.
                let fiber = &mut self.arena[wip];
                fiber.tag = WorkTag::SimpleMemoComponent;
                fiber.resolved_type = Some(memo.inner().clone());
                return self.update_simple_memo_component(
                    None,
                    wip,
                    update_expiration_time,
                    render_expiration_time,
                );
            }
            let element = Element::with_shared_props(memo.inner().clone(), next_props);
            let mut child = fiber_from_element(
                &element,
                self.arena[wip].mode,
                render_expiration_time,
            );
            child.ref_ = self.arena[wip].ref_.clone();
            child.return_fiber = Some(wip);
            let child = self.arena.alloc(child);
            self.fresh.push(child);
            self.arena[wip].child = Some(child);
            return Ok(Some(child));
        };

        let Some(current_child) = self.arena[current].child else {
            return Err(missing("memoized child"));
        };
        if update_expiration_time < render_expiration_time {
            let prev_props = self.arena[current_child].memoized_props.clone();
            if memo.props_equal(&prev_props, &next_props)
                && same_ref(&self.arena[current].ref_, &self.arena[wip].ref_)
            {
                return Ok(self.bailout_on_already_finished_work(
                    Some(current),
                    wip,
                    render_expiration_time,
                ));
            }
        }
        self.arena[wip].flags |= EffectFlags::PERFORMED_WORK;
        let child = self.arena.create_work_in_progress(current_child, next_props);
        let ref_ = self.arena[wip].ref_.clone();
        let fiber = &mut self.arena[child];
        fiber.ref_ = ref_;
        fiber.return_fiber = Some(wip);
        fiber.sibling = None;
        self.arena[wip].child = Some(child);
        Ok(Some(child))
    }

    fn update_simple_memo_component(
        &mut self,
        current: Option<FiberId>,
        wip: FiberId,
        update_expiration_time: ExpirationTime,
        render_expiration_time: ExpirationTime,
    ) -> Result<Option<FiberId>, Thrown> {
        if let Some(current) = current {
            let prev_props = self.arena[current].memoized_props.clone();
            let next_props = self.arena[wip].pending_props.clone();
            if shallow_equal(&prev_props, &next_props)
                && same_ref(&self.arena[current].ref_, &self.arena[wip].ref_)
            {
                self.did_receive_update = false;
                if update_expiration_time < render_expiration_time {
                    self.arena[wip].expiration_time = self.arena[current].expiration_time;
                    return Ok(self.bailout_on_already_finished_work(
                        Some(current),
                        wip,
                        render_expiration_time,
                    ));
                }
            }
        }
        let Some(ElementType::Function(component)) = self.arena[wip].resolved_type.clone() else {
            return Err(missing("memoized function component"));
        };
        self.update_function_component(current, wip, &component, render_expiration_time)
    }

    /// Resolves a lazy element and renders the fiber as whatever it
    /// resolved to. Suspends with the loader's thenable until then.
    fn mount_lazy_component(
        &mut self,
        current: Option<FiberId>,
        wip: FiberId,
        update_expiration_time: ExpirationTime,
        render_expiration_time: ExpirationTime,
    ) -> Result<Option<FiberId>, Thrown> {
        let Some(ElementType::Lazy(lazy)) = self.arena[wip].element_type.clone() else {
            return Err(missing("lazy type"));
        };
        let resolved = lazy.resolve()?;
        let tag = crate::fiber::tag_for_element_type(&resolved);
        if matches!(tag, WorkTag::LazyComponent) {
            return Err(Thrown::Error(invalid_element_type("another lazy type")));
        }
        if current.is_some() {
            // The committed fiber never rendered; mount fresh in its place.
            self.arena[wip].flags |= EffectFlags::PLACEMENT;
        }
        let fiber = &mut self.arena[wip];
        fiber.tag = tag;
        fiber.resolved_type = Some(resolved);
        trace!(fiber = ?wip, ?tag, "lazy component resolved");
        match tag {
            WorkTag::FunctionComponent => {
                let Some(ElementType::Function(component)) = self.arena[wip].resolved_type.clone()
                else {
                    return Err(missing("function component"));
                };
                self.update_function_component(None, wip, &component, render_expiration_time)
            }
            WorkTag::ClassComponent => {
                let Some(ElementType::Class(class)) = self.arena[wip].resolved_type.clone() else {
                    return Err(missing("class"));
                };
                self.update_class_component(None, wip, &class, render_expiration_time)
            }
            WorkTag::ForwardRef => self.update_forward_ref(None, wip, render_expiration_time),
            WorkTag::MemoComponent => {
                self.update_memo_component(
                    None,
                    wip,
                    update_expiration_time,
                    render_expiration_time,
                )
            }
            other => Err(Thrown::Error(invalid_element_type(&format!("{other:?}")))),
        }
    }
}

impl<A: Applier> Reconciler<A> {
    fn state_value(&self, fiber: FiberId) -> StateValue {
        self.arena[fiber]
            .memoized_state
            .value()
            .cloned()
            .unwrap_or_else(|| state(()))
    }

    fn apply_derived_state(&mut self, wip: FiberId, derived: StateValue) {
        let fiber = &mut self.arena[wip];
        fiber.memoized_state = FiberState::Value(derived.clone());
        if fiber.expiration_time == ExpirationTime::NO_WORK {
            if let Some(queue) = fiber.update_queue.as_mut() {
                queue.base_state = derived;
            }
        }
    }

    fn update_class_component(
        &mut self,
        current: Option<FiberId>,
        wip: FiberId,
        class: &ClassType,
        render_expiration_time: ExpirationTime,
    ) -> Result<Option<FiberId>, Thrown> {
        let has_instance = self.arena[wip].state_node.class().is_some();
        match current {
            Some(current) if has_instance => {
                let should_update = self.update_class_instance(
                    current,
                    wip,
                    class,
                    render_expiration_time,
                );
                self.finish_class_component(
                    Some(current),
                    wip,
                    class,
                    should_update,
                    render_expiration_time,
                )
            }
            None if has_instance => {
                // Second pass of a first mount, e.g. after capturing an error.
                self.resume_mount_class_instance(wip, class, render_expiration_time);
                self.finish_class_component(None, wip, class, true, render_expiration_time)
            }
            _ => {
                if current.is_some() {
                    self.arena[wip].flags |= EffectFlags::PLACEMENT;
                }
                self.mount_class_instance(wip, class, render_expiration_time);
                self.finish_class_component(None, wip, class, true, render_expiration_time)
            }
        }
    }

    /// A class that suspended during its first legacy-mode mount committed
    /// without an instance; it mounts again from scratch.
    fn mount_incomplete_class_component(
        &mut self,
        current: Option<FiberId>,
        wip: FiberId,
        render_expiration_time: ExpirationTime,
    ) -> Result<Option<FiberId>, Thrown> {
        let Some(ElementType::Class(class)) = self.arena[wip].resolved_type.clone() else {
            return Err(missing("class"));
        };
        let fiber = &mut self.arena[wip];
        fiber.tag = WorkTag::ClassComponent;
        fiber.state_node = StateNode::None;
        if current.is_some() {
            fiber.flags |= EffectFlags::PLACEMENT;
        }
        self.mount_class_instance(wip, &class, render_expiration_time);
        self.finish_class_component(None, wip, &class, true, render_expiration_time)
    }

    fn mount_class_instance(
        &mut self,
        wip: FiberId,
        class: &ClassType,
        render_expiration_time: ExpirationTime,
    ) {
        let props = self.arena[wip].pending_props.clone();
        let shared: SharedPending = Rc::default();
        let updater = Updater::new(self.runtime.handle(), wip, shared.clone());
        let (instance, initial_state) = class.construct(&props, updater);
        let fiber = &mut self.arena[wip];
        fiber.state_node = StateNode::Class(Rc::new(RefCell::new(instance)));
        fiber.memoized_state = FiberState::Value(initial_state.clone());
        fiber.update_queue = Some(UpdateQueue::with_shared(initial_state, shared));

        let outcome = process_update_queue(&mut self.arena, wip, &props, render_expiration_time);
        self.note_queue_outcome(&outcome);
        let current_state = self.state_value(wip);
        if let Some(derived) = class.derived_state_from_props(&props, &current_state) {
            self.apply_derived_state(wip, derived);
        }
        self.arena[wip].flags |= EffectFlags::UPDATE;
    }

    fn resume_mount_class_instance(
        &mut self,
        wip: FiberId,
        class: &ClassType,
        render_expiration_time: ExpirationTime,
    ) {
        let props = self.arena[wip].pending_props.clone();
        let outcome = process_update_queue(&mut self.arena, wip, &props, render_expiration_time);
        self.note_queue_outcome(&outcome);
        let current_state = self.state_value(wip);
        if let Some(derived) = class.derived_state_from_props(&props, &current_state) {
            self.apply_derived_state(wip, derived);
        }
        self.arena[wip].flags |= EffectFlags::UPDATE;
    }

    /// Processes pending state for a mounted class and decides whether it
    /// needs to render again.
    fn update_class_instance(
        &mut self,
        current: FiberId,
        wip: FiberId,
        class: &ClassType,
        render_expiration_time: ExpirationTime,
    ) -> bool {
        let old_props = self.arena[wip].memoized_props.clone();
        let new_props = self.arena[wip].pending_props.clone();
        let old_state = self.state_value(wip);
        let outcome = process_update_queue(
            &mut self.arena,
            wip,
            &new_props,
            render_expiration_time,
        );
        self.note_queue_outcome(&outcome);
        let mut new_state = self.state_value(wip);

        let current_props = self.arena[current].memoized_props.clone();
        let current_state = self.state_value(current);
        let differs_from_committed =
            !Rc::ptr_eq(&old_props, &current_props) || !Rc::ptr_eq(&old_state, &current_state);

        if Rc::ptr_eq(&old_props, &new_props)
            && Rc::ptr_eq(&old_state, &new_state)
            && !outcome.has_force_update
        {
            if differs_from_committed {
                self.arena[wip].flags |= EffectFlags::UPDATE | EffectFlags::SNAPSHOT;
            }
            return false;
        }

        if let Some(derived) = class.derived_state_from_props(&new_props, &new_state) {
            self.apply_derived_state(wip, derived.clone());
            new_state = derived;
        }

        let should_update = outcome.has_force_update
            || self.arena[wip].state_node.class().map_or(true, |instance| {
                instance
                    .borrow()
                    .should_component_update(&old_props, &new_props, &old_state, &new_state)
            });
        if should_update {
            self.arena[wip].flags |= EffectFlags::UPDATE | EffectFlags::SNAPSHOT;
        } else {
            if differs_from_committed {
                self.arena[wip].flags |= EffectFlags::UPDATE | EffectFlags::SNAPSHOT;
            }
            let fiber = &mut self.arena[wip];
            fiber.memoized_props = new_props;
            fiber.memoized_state = FiberState::Value(new_state);
        }
        should_update
    }

    fn finish_class_component(
        &mut self,
        current: Option<FiberId>,
        wip: FiberId,
        class: &ClassType,
        should_update: bool,
        render_expiration_time: ExpirationTime,
    ) -> Result<Option<FiberId>, Thrown> {
        self.mark_ref(current, wip);
        let did_capture = self.arena[wip].flags.contains(EffectFlags::DID_CAPTURE);
        if !should_update && !did_capture {
            return Ok(self.bailout_on_already_finished_work(current, wip, render_expiration_time));
        }
        let Some(instance) = self.arena[wip].state_node.class().cloned() else {
            return Err(missing("class instance"));
        };
        let children = if did_capture && !class.has_derived_state_from_error() {
            // The boundary re-renders with its fallback once did_catch
            // schedules an update; until then it renders nothing.
            Node::Empty
        } else {
            let props = self.arena[wip].pending_props.clone();
            let current_state = self.state_value(wip);
            let rendered = instance.borrow().render(&props, &current_state);
            rendered?
        };
        self.arena[wip].flags |= EffectFlags::PERFORMED_WORK;
        match current {
            Some(current) if did_capture => {
                self.force_unmount_current_and_reconcile(
                    current,
                    wip,
                    &children,
                    render_expiration_time,
                )
            }
            _ => self.reconcile_children(current, wip, &children, render_expiration_time),
        }
        Ok(self.arena[wip].child)
    }
}

impl<A: Applier> Reconciler<A> {
    fn update_context_provider(
        &mut self,
        current: Option<FiberId>,
        wip: FiberId,
        render_expiration_time: ExpirationTime,
    ) -> Option<FiberId> {
        let Some((context, value)) = self.provider_value(wip) else {
            return None;
        };
        self.contexts.push(&context, value.clone());
        let next_props = self.arena[wip].pending_props.clone();
        if let Some(current) = current {
            let old_props = self.arena[current].memoized_props.clone();
            let old_value =
                old_props.raw_data().cloned().unwrap_or_else(|| context.default_value());
            if context.values_equal(&old_value, &value) {
                if old_props.children() == next_props.children() {
                    return self.bailout_on_already_finished_work(
                        Some(current),
                        wip,
                        render_expiration_time,
                    );
                }
            } else {
                self.propagate_context_change(wip, &context, render_expiration_time);
            }
        }
        self.reconcile_children(current, wip, next_props.children(), render_expiration_time);
        self.arena[wip].child
    }

    /// Schedules work on every fiber below `wip` that read `context`,
    /// stopping at nested providers of the same context.
    fn propagate_context_change(
        &mut self,
        wip: FiberId,
        context: &AnyContext,
        render_expiration_time: ExpirationTime,
    ) {
        let mut node = self.arena[wip].child;
        if let Some(child) = node {
            self.arena[child].return_fiber = Some(wip);
        }
        while let Some(id) = node {
            let reads = self.arena[id]
                .dependencies
                .as_ref()
                .is_some_and(|deps| deps.reads(context));
            if reads {
                self.schedule_work_on_fiber(id, render_expiration_time);
                if let Some(deps) = self.arena[id].dependencies.as_mut() {
                    if deps.expiration_time < render_expiration_time {
                        deps.expiration_time = render_expiration_time;
                    }
                }
            }
            let fiber = &self.arena[id];
            let is_same_provider = fiber.tag == WorkTag::ContextProvider
                && matches!(
                    &fiber.element_type,
                    Some(ElementType::Provider(c)) if c.id() == context.id()
                );
            let next = if is_same_provider { None } else { fiber.child };
            if let Some(child) = next {
                self.arena[child].return_fiber = Some(id);
                node = Some(child);
                continue;
            }
            node = self.next_in_subtree(wip, id);
        }
    }

    /// Next fiber in a depth-first walk below `root` once `node` and its
    /// children are done, fixing return pointers on the way.
    fn next_in_subtree(&mut self, root: FiberId, mut node: FiberId) -> Option<FiberId> {
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

    /// Raises the expiration time of `fiber` and the child expiration
    /// times of its ancestors so the render reaches it.
    fn schedule_work_on_fiber(&mut self, fiber: FiberId, render_expiration_time: ExpirationTime) {
        let alternate = self.arena[fiber].alternate;
        for id in std::iter::once(fiber).chain(alternate) {
            if let Some(f) = self.arena.get_mut(id) {
                if f.expiration_time < render_expiration_time {
                    f.expiration_time = render_expiration_time;
                }
            }
        }
        let mut node = self.arena[fiber].return_fiber;
        while let Some(id) = node {
            let alternate = self.arena[id].alternate.filter(|alt| self.arena.contains(*alt));
            if self.arena[id].child_expiration_time < render_expiration_time {
                self.arena[id].child_expiration_time = render_expiration_time;
                if let Some(alt) = alternate {
                    if self.arena[alt].child_expiration_time < render_expiration_time {
                        self.arena[alt].child_expiration_time = render_expiration_time;
                    }
                }
            } else if let Some(alt) = alternate
                .filter(|alt| self.arena[*alt].child_expiration_time < render_expiration_time)
            {
                self.arena[alt].child_expiration_time = render_expiration_time;
            } else {
                break;
            }
            node = self.arena[id].return_fiber;
        }
    }

    fn update_context_consumer(
        &mut self,
        current: Option<FiberId>,
        wip: FiberId,
        render_expiration_time: ExpirationTime,
    ) -> Result<Option<FiberId>, Thrown> {
        let Some(ElementType::Consumer(context)) = self.arena[wip].element_type.clone() else {
            return Err(missing("context"));
        };
        let props = self.arena[wip].pending_props.clone();
        let Some(render) = props.data::<ConsumerRender>().cloned() else {
            return Err(missing("consumer render function"));
        };
        let value = self.contexts.read(&context);
        self.arena[wip].dependencies = Some(Dependencies {
            expiration_time: ExpirationTime::NO_WORK,
            contexts: vec![context],
        });
        let children = render(&*value);
        self.arena[wip].flags |= EffectFlags::PERFORMED_WORK;
        self.reconcile_children(current, wip, &children, render_expiration_time);
        Ok(self.arena[wip].child)
    }

    fn update_portal_component(
        &mut self,
        current: Option<FiberId>,
        wip: FiberId,
        render_expiration_time: ExpirationTime,
    ) -> Option<FiberId> {
        if let StateNode::Portal(container) = self.arena[wip].state_node {
            self.push_host_container(container);
        }
        let children = self.arena[wip].pending_props.children().clone();
        match current {
            // Portal children are inserted into their own container, so
            // they are placed even when the portal itself is new.
            None => self.reconcile_children_from(
                wip,
                None,
                true,
                &children,
                render_expiration_time,
            ),
            Some(_) => self.reconcile_children(current, wip, &children, render_expiration_time),
        }
        self.arena[wip].child
    }

    fn update_fragment(
        &mut self,
        current: Option<FiberId>,
        wip: FiberId,
        render_expiration_time: ExpirationTime,
    ) -> Option<FiberId> {
        let children = self.arena[wip].pending_props.children().clone();
        self.reconcile_children(current, wip, &children, render_expiration_time);
        self.arena[wip].child
    }

    fn update_profiler(
        &mut self,
        current: Option<FiberId>,
        wip: FiberId,
        render_expiration_time: ExpirationTime,
    ) -> Option<FiberId> {
        if self.config.enable_profiler_timer {
            let fiber = &mut self.arena[wip];
            fiber.flags |= EffectFlags::UPDATE;
            fiber.mode |= FiberMode::PROFILE;
        }
        self.update_fragment(current, wip, render_expiration_time)
    }

    fn update_offscreen_component(
        &mut self,
        current: Option<FiberId>,
        wip: FiberId,
        render_expiration_time: ExpirationTime,
    ) -> Option<FiberId> {
        if crate::suspense::offscreen_is_hidden(&self.arena[wip].pending_props) {
            // Hidden content keeps its committed children untouched.
            return None;
        }
        self.update_fragment(current, wip, render_expiration_time)
    }
}

impl<A: Applier> Reconciler<A> {
    fn fallback_children(props: &Props) -> Node {
        match crate::suspense::fallback(props) {
            Some(PropValue::Node(node)) => node.clone(),
            _ => Node::Empty,
        }
    }

    fn bailout_suspense(
        &mut self,
        current: FiberId,
        wip: FiberId,
        render_expiration_time: ExpirationTime,
    ) -> Option<FiberId> {
        let context = self.current_suspense_context().subtree();
        if crate::suspense::dehydrated_markup(&self.arena[wip]).is_some() {
            // Stays dehydrated until the boundary's own idle-priority render.
            self.push_suspense_context(context);
            return None;
        }
        if crate::suspense::is_timed_out(&self.arena[wip]) {
            let primary_child_work = self
                .arena[current]
                .child
                .map_or(ExpirationTime::NO_WORK, |offscreen| {
                    self.arena[offscreen].child_expiration_time
                });
            if primary_child_work != ExpirationTime::NO_WORK
                && primary_child_work >= render_expiration_time
            {
                return self.update_suspense_component(Some(current), wip, render_expiration_time);
            }
            self.push_suspense_context(context);
            let child = self.bailout_on_already_finished_work(
                Some(current),
                wip,
                render_expiration_time,
            );
            // Only the fallback is visited while the primary tree is hidden.
            return child.and_then(|offscreen| self.arena[offscreen].sibling);
        }
        self.push_suspense_context(context);
        self.bailout_on_already_finished_work(Some(current), wip, render_expiration_time)
    }

    fn update_suspense_component(
        &mut self,
        current: Option<FiberId>,
        wip: FiberId,
        render_expiration_time: ExpirationTime,
    ) -> Option<FiberId> {
        use crate::suspense::{
            create_offscreen, dehydrated_markup, is_timed_out, offscreen_props, SuspenseContext,
            SuspenseState,
        };

        let mode = self.arena[wip].mode;
        let concurrent = mode.contains(FiberMode::CONCURRENT);
        let next_props = self.arena[wip].pending_props.clone();
        let mut context = self.current_suspense_context();
        let did_suspend = self.arena[wip].flags.contains(EffectFlags::DID_CAPTURE);
        let showing_content = current
            .is_some_and(|current| self.arena[current].memoized_state.suspense().is_none());
        let remain_on_fallback = context.has(SuspenseContext::FORCE_FALLBACK) && !showing_content;

        let show_fallback = did_suspend || remain_on_fallback;
        if show_fallback {
            self.arena[wip].flags.remove(EffectFlags::DID_CAPTURE);
        } else if !showing_content
            && crate::suspense::fallback(&next_props).is_some()
            && !next_props.bool("avoid_fallback")
        {
            context = context.with(SuspenseContext::INVISIBLE_PARENT);
        }
        self.push_suspense_context(context.subtree());

        let primary = next_props.children().clone();
        let markup = next_props.data::<crate::element::DehydratedMarkup>().map(|markup| markup.0);

        let Some(current) = current else {
            if let Some(markup) = markup {
                if concurrent && render_expiration_time > ExpirationTime::IDLE {
                    // Keep the server markup and come back at idle priority.
                    let fiber = &mut self.arena[wip];
                    fiber.memoized_state = FiberState::Suspense(SuspenseState {
                        dehydrated: Some(markup),
                        retry_time: ExpirationTime::IDLE,
                    });
                    fiber.expiration_time = ExpirationTime::IDLE;
                    fiber.child = None;
                    return None;
                }
                self.delete_dehydrated_markup(wip, markup);
            }
            if show_fallback {
                return Some(self.mount_suspense_fallback(
                    wip,
                    primary,
                    &next_props,
                    render_expiration_time,
                ));
            }
            let offscreen = self.arena.alloc(create_offscreen(
                offscreen_props(true, primary),
                mode,
                render_expiration_time,
            ));
            self.fresh.push(offscreen);
            self.arena[offscreen].return_fiber = Some(wip);
            let fiber = &mut self.arena[wip];
            fiber.child = Some(offscreen);
            fiber.memoized_state = FiberState::None;
            return Some(offscreen);
        };

        if let Some(markup) = dehydrated_markup(&self.arena[current]) {
            if render_expiration_time > ExpirationTime::IDLE {
                let fiber = &mut self.arena[wip];
                fiber.expiration_time = ExpirationTime::IDLE;
                fiber.child = None;
                return None;
            }
            trace!(fiber = ?wip, "client rendering dehydrated boundary");
            self.delete_dehydrated_markup(wip, markup);
            if show_fallback {
                let fallback = self.mount_suspense_fallback(
                    wip,
                    primary,
                    &next_props,
                    render_expiration_time,
                );
                if let Some(offscreen) = self.arena[wip].child {
                    self.arena[offscreen].flags |= EffectFlags::PLACEMENT;
                }
                self.arena[fallback].flags |= EffectFlags::PLACEMENT;
                return Some(fallback);
            }
            let offscreen = self.arena.alloc(create_offscreen(
                offscreen_props(true, primary),
                mode,
                render_expiration_time,
            ));
            self.fresh.push(offscreen);
            let fiber = &mut self.arena[offscreen];
            fiber.return_fiber = Some(wip);
            fiber.flags |= EffectFlags::PLACEMENT;
            let fiber = &mut self.arena[wip];
            fiber.child = Some(offscreen);
            fiber.memoized_state = FiberState::None;
            return Some(offscreen);
        }

        let Some(current_primary) = self.arena[current].child else {
            return Some(self.mount_suspense_fallback(
                wip,
                primary,
                &next_props,
                render_expiration_time,
            ));
        };
        let current_fallback = self.arena[current_primary].sibling;
        let was_timed_out = is_timed_out(&self.arena[current]);

        if !show_fallback {
            let offscreen = self
                .arena
                .create_work_in_progress(current_primary, offscreen_props(true, primary));
            let fiber = &mut self.arena[offscreen];
            fiber.return_fiber = Some(wip);
            fiber.sibling = None;
            if !concurrent && was_timed_out {
                fiber.expiration_time = render_expiration_time;
            }
            let fiber = &mut self.arena[wip];
            fiber.child = Some(offscreen);
            fiber.memoized_state = FiberState::None;
            return Some(offscreen);
        }

        let progressed = self.arena[wip].child.filter(|&child| child != current_primary);
        let hidden = offscreen_props(false, primary);
        let offscreen = match progressed {
            Some(progressed) if !concurrent => {
                // Legacy mode commits the partially rendered primary tree
                // as it is, hidden behind the fallback.
                progressed
            }
            _ => self.arena.create_work_in_progress(current_primary, hidden.clone()),
        };
        self.hide_offscreen(offscreen, wip, hidden);

        let fallback_children = Self::fallback_children(&next_props);
        let fallback = match current_fallback.filter(|_| was_timed_out) {
            Some(current_fallback) => self
                .arena
                .create_work_in_progress(
                    current_fallback,
                    Rc::new(Props::for_children(fallback_children)),
                ),
            None => {
                let fiber = fiber_from_fragment(
                    fallback_children,
                    None,
                    mode,
                    render_expiration_time,
                );
                let id = self.arena.alloc(fiber);
                self.fresh.push(id);
                self.arena[id].flags |= EffectFlags::PLACEMENT;
                id
            }
        };
        self.arena[fallback].return_fiber = Some(wip);
        self.arena[fallback].sibling = None;
        self.arena[offscreen].sibling = Some(fallback);
        let fiber = &mut self.arena[wip];
        fiber.child = Some(offscreen);
        fiber.memoized_state = FiberState::Suspense(SuspenseState::timed_out());
        Some(fallback)
    }

    /// First render of a boundary that is already showing its fallback.
    fn mount_suspense_fallback(
        &mut self,
        wip: FiberId,
        primary: Node,
        props: &Props,
        render_expiration_time: ExpirationTime,
    ) -> FiberId {
        use crate::suspense::{create_offscreen, offscreen_props, SuspenseState};

        let mode = self.arena[wip].mode;
        let hidden = offscreen_props(false, primary);
        let offscreen = match self.arena[wip].child {
            Some(progressed) if !mode.contains(FiberMode::CONCURRENT) => progressed,
            _ => {
                let id = self.arena.alloc(create_offscreen(
                    hidden.clone(),
                    mode,
                    ExpirationTime::NO_WORK,
                ));
                self.fresh.push(id);
                id
            }
        };
        self.hide_offscreen(offscreen, wip, hidden);
        let fallback = fiber_from_fragment(
            Self::fallback_children(props),
            None,
            mode,
            render_expiration_time,
        );
        let fallback = self.arena.alloc(fallback);
        self.fresh.push(fallback);
        self.arena[fallback].return_fiber = Some(wip);
        self.arena[offscreen].sibling = Some(fallback);
        let fiber = &mut self.arena[wip];
        fiber.child = Some(offscreen);
        fiber.memoized_state = FiberState::Suspense(SuspenseState::timed_out());
        fallback
    }

    /// Turns `offscreen` into the hidden primary wrapper. It is skipped by
    /// the render, so its props are final and its pending work does not
    /// bubble while the fallback shows.
    fn hide_offscreen(&mut self, offscreen: FiberId, boundary: FiberId, hidden: Rc<Props>) {
        let fiber = &mut self.arena[offscreen];
        fiber.pending_props = hidden.clone();
        fiber.memoized_props = hidden;
        fiber.return_fiber = Some(boundary);
        fiber.expiration_time = ExpirationTime::NO_WORK;
        fiber.child_expiration_time = ExpirationTime::NO_WORK;
    }

    /// Queues removal of server markup owned by the boundary `wip`. The
    /// deletion is recorded first so it commits before the client content
    /// is placed.
    fn delete_dehydrated_markup(&mut self, wip: FiberId, markup: crate::applier::HostId) {
        let mode = self.arena[wip].mode;
        let mut fiber = crate::fiber::Fiber::new(
            WorkTag::DehydratedFragment,
            Rc::new(Props::new()),
            None,
            mode,
        );
        fiber.state_node = StateNode::Host(markup);
        fiber.return_fiber = Some(wip);
        fiber.flags = EffectFlags::DELETION;
        self.arena[wip].memoized_state = FiberState::None;
        let already_queued = self.arena[wip]
            .effects
            .iter()
            .any(|&effect| self.arena[effect].tag == WorkTag::DehydratedFragment);
        if already_queued {
            return;
        }
        let id = self.arena.alloc(fiber);
        self.fresh.push(id);
        self.arena[wip].effects.insert(0, id);
    }
}

impl<A: Applier> Reconciler<A> {
    fn update_suspense_list_component(
        &mut self,
        current: Option<FiberId>,
        wip: FiberId,
        render_expiration_time: ExpirationTime,
    ) -> Option<FiberId> {
        use crate::element::RevealOrder;
        use crate::suspense::{list_order, list_tail_mode, SuspenseContext};

        let props = self.arena[wip].pending_props.clone();
        self.reconcile_children(current, wip, props.children(), render_expiration_time);

        let mut context = self.current_suspense_context();
        if context.has(SuspenseContext::FORCE_FALLBACK) {
            context = context.with_shallow(SuspenseContext::FORCE_FALLBACK);
            self.arena[wip].flags |= EffectFlags::DID_CAPTURE;
        } else {
            let did_suspend_before =
                current.is_some_and(|current| {
                    self.arena[current].flags.contains(EffectFlags::DID_CAPTURE)
                });
            if did_suspend_before {
                // Nested boundaries forced into fallback last time get
                // another chance to show content.
                self.propagate_suspense_context_change(wip, render_expiration_time);
            }
            context = context.subtree();
        }
        self.push_suspense_context(context);

        if !self.arena[wip].mode.contains(FiberMode::CONCURRENT) {
            self.arena[wip].memoized_state = FiberState::None;
            return self.arena[wip].child;
        }
        let tail_mode = list_tail_mode(&props);
        let last_effect_len = self.arena[wip].effects.len();
        match list_order(&props) {
            Some(RevealOrder::Forwards) => {
                let last_content_row = self.find_last_content_row(wip);
                let tail = match last_content_row {
                    None => self.arena[wip].child.take(),
                    Some(row) => self.arena[row].sibling.take(),
                };
                self.init_list_render_state(
                    wip,
                    false,
                    tail,
                    last_content_row,
                    tail_mode,
                    last_effect_len,
                );
            }
            Some(RevealOrder::Backwards) => {
                let mut tail = None;
                let mut row = self.arena[wip].child.take();
                while let Some(id) = row {
                    let has_content = self.arena[id]
                        .alternate
                        .filter(|&alt| self.arena.contains(alt))
                        .is_some_and(|alt| {
                            crate::suspense::find_first_suspended(&self.arena, alt).is_none()
                        });
                    if has_content {
                        self.arena[wip].child = Some(id);
                        break;
                    }
                    let next = self.arena[id].sibling;
                    self.arena[id].sibling = tail;
                    tail = Some(id);
                    row = next;
                }
                self.init_list_render_state(wip, true, tail, None, tail_mode, last_effect_len);
            }
            Some(RevealOrder::Together) => {
                self.init_list_render_state(wip, false, None, None, None, last_effect_len);
            }
            Some(RevealOrder::Independent) | None => {
                self.arena[wip].memoized_state = FiberState::None;
            }
        }
        self.arena[wip].child
    }

    /// Last row whose committed version is showing content.
    fn find_last_content_row(&self, wip: FiberId) -> Option<FiberId> {
        let mut last = None;
        let mut row = self.arena[wip].child;
        while let Some(id) = row {
            let has_content = self.arena[id]
                .alternate
                .filter(|&alt| self.arena.contains(alt))
                .is_some_and(|alt| {
                    crate::suspense::find_first_suspended(&self.arena, alt).is_none()
                });
            if has_content {
                last = Some(id);
            }
            row = self.arena[id].sibling;
        }
        last
    }

    fn init_list_render_state(
        &mut self,
        wip: FiberId,
        is_backwards: bool,
        tail: Option<FiberId>,
        last: Option<FiberId>,
        tail_mode: Option<crate::element::TailMode>,
        last_effect_len: usize,
    ) {
        self.arena[wip].memoized_state =
            FiberState::SuspenseList(crate::suspense::SuspenseListRenderState {
                is_backwards,
                rendering: None,
                rendering_start_time: 0,
                last,
                tail,
                tail_expiration: 0,
                tail_mode,
                last_effect_len,
            });
    }

    /// Schedules a render on every boundary and list directly below `wip`.
    fn propagate_suspense_context_change(
        &mut self,
        wip: FiberId,
        render_expiration_time: ExpirationTime,
    ) {
        let mut node = self.arena[wip].child;
        while let Some(id) = node {
            let fiber = &self.arena[id];
            let descend = match fiber.tag {
                WorkTag::SuspenseComponent => {
                    if fiber.memoized_state.suspense().is_some() {
                        self.schedule_work_on_fiber(id, render_expiration_time);
                    }
                    false
                }
                WorkTag::SuspenseListComponent => {
                    self.schedule_work_on_fiber(id, render_expiration_time);
                    false
                }
                _ => true,
            };
            if descend {
                if let Some(child) = self.arena[id].child {
                    self.arena[child].return_fiber = Some(id);
                    node = Some(child);
                    continue;
                }
            }
            node = self.next_in_subtree(wip, id);
        }
    }
}
