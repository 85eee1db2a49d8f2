//! Per-fiber state for function components.
//!
//! Hooks are identified by call order. Each render of a function component
//! builds a fresh list from the previous committed list; the update queues
//! behind state hooks are shared between both buffers, so updates that
//! arrive while a render is in flight are never lost.

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::hash::Hash;
use std::marker::PhantomData;
use std::rc::Rc;

use bitflags::bitflags;

use crate::component::RenderResult;
use crate::context::{AnyContext, Context, ContextStack, Dependencies};
use crate::error::{CapturedError, Thrown};
use crate::expiration::ExpirationTime;
use crate::fiber::{EffectFlags, FiberArena, FiberId, FiberState};
use crate::hash::DepsHash;
use crate::runtime::{PendingUpdate, RuntimeHandle, UpdateKind};

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub(crate) struct HookFlags: u8 {
        /// The effect must run in this commit.
        const HAS_EFFECT = 1;
        const LAYOUT = 1 << 1;
        const PASSIVE = 1 << 2;
    }
}

/// Teardown returned by an effect, run before the effect fires again or
/// when its component unmounts.
pub type Cleanup = Box<dyn FnOnce()>;

pub(crate) type CreateFn = Box<dyn FnOnce() -> Result<Option<Cleanup>, CapturedError>>;

pub(crate) struct Effect {
    pub(crate) tag: HookFlags,
    pub(crate) create: RefCell<Option<CreateFn>>,
    /// Shared by every generation of the same effect slot.
    pub(crate) destroy: Rc<RefCell<Option<Cleanup>>>,
    pub(crate) deps: Option<DepsHash>,
}

impl Effect {
    pub(crate) fn has(&self, flags: HookFlags) -> bool {
        self.tag.contains(flags)
    }

    /// Runs the cleanup left by the previous run, if any.
    pub(crate) fn run_destroy(&self) {
        let destroy = self.destroy.borrow_mut().take();
        if let Some(destroy) = destroy {
            destroy();
        }
    }

    pub(crate) fn run_create(&self) -> Result<(), CapturedError> {
        let create = self.create.borrow_mut().take();
        if let Some(create) = create {
            let cleanup = create()?;
            *self.destroy.borrow_mut() = cleanup;
        }
        Ok(())
    }
}

impl fmt::Debug for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Effect")
            .field("tag", &self.tag)
            .field("deps", &self.deps)
            .finish()
    }
}

#[derive(Clone)]
pub(crate) struct HookUpdate {
    pub(crate) expiration_time: ExpirationTime,
    pub(crate) action: Rc<dyn Any>,
}

/// Updates dispatched to one state hook and not yet processed by a render.
#[derive(Default)]
pub(crate) struct HookQueue {
    pub(crate) pending: RefCell<Vec<HookUpdate>>,
}

#[derive(Clone)]
pub(crate) struct StateHook {
    pub(crate) memoized: Rc<dyn Any>,
    pub(crate) base_state: Rc<dyn Any>,
    pub(crate) base_queue: Vec<HookUpdate>,
    pub(crate) queue: Rc<HookQueue>,
}

#[derive(Clone)]
pub(crate) enum Hook {
    State(StateHook),
    Effect(Rc<Effect>),
    Ref(Rc<dyn Any>),
    Memo { value: Rc<dyn Any>, deps: DepsHash },
}

impl Hook {
    fn kind(&self) -> &'static str {
        match self {
            Hook::State(_) => "state",
            Hook::Effect(_) => "effect",
            Hook::Ref(_) => "ref",
            Hook::Memo { .. } => "memo",
        }
    }
}

/// Action understood by the reducer behind [`RenderCx::use_state`].
enum StateAction<S> {
    Set(S),
    Update(Rc<dyn Fn(&S) -> S>),
}

fn basic_state_reducer<S: Clone>(state: &S, action: &StateAction<S>) -> S {
    match action {
        StateAction::Set(value) => value.clone(),
        StateAction::Update(update) => update(state),
    }
}

/// Setter returned by [`RenderCx::use_state`].
pub struct StateSetter<S> {
    runtime: RuntimeHandle,
    fiber: FiberId,
    queue: Rc<HookQueue>,
    _marker: PhantomData<fn(S)>,
}

impl<S> Clone for StateSetter<S> {
    fn clone(&self) -> Self {
        Self {
            runtime: self.runtime.clone(),
            fiber: self.fiber,
            queue: self.queue.clone(),
            _marker: PhantomData,
        }
    }
}

impl<S: 'static> StateSetter<S> {
    fn dispatch(&self, action: StateAction<S>) {
        self.runtime.enqueue_update(PendingUpdate::new(
            self.fiber,
            UpdateKind::Hook {
                queue: self.queue.clone(),
                action: Rc::new(action),
            },
        ));
    }

    pub fn set(&self, value: S) {
        self.dispatch(StateAction::Set(value));
    }

    /// Computes the next state from the state the update is applied to.
    pub fn update(&self, update: impl Fn(&S) -> S + 'static) {
        self.dispatch(StateAction::Update(Rc::new(update)));
    }
}

impl<S> fmt::Debug for StateSetter<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateSetter").field("fiber", &self.fiber).finish()
    }
}

/// Dispatcher returned by [`RenderCx::use_reducer`].
pub struct Dispatch<A> {
    runtime: RuntimeHandle,
    fiber: FiberId,
    queue: Rc<HookQueue>,
    _marker: PhantomData<fn(A)>,
}

impl<A> Clone for Dispatch<A> {
    fn clone(&self) -> Self {
        Self {
            runtime: self.runtime.clone(),
            fiber: self.fiber,
            queue: self.queue.clone(),
            _marker: PhantomData,
        }
    }
}

impl<A: 'static> Dispatch<A> {
    pub fn dispatch(&self, action: A) {
        self.runtime.enqueue_update(PendingUpdate::new(
            self.fiber,
            UpdateKind::Hook {
                queue: self.queue.clone(),
                action: Rc::new(action),
            },
        ));
    }
}

impl<A> fmt::Debug for Dispatch<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatch").field("fiber", &self.fiber).finish()
    }
}

/// Render context handed to function components.
pub struct RenderCx<'a> {
    fiber: FiberId,
    runtime: RuntimeHandle,
    contexts: &'a ContextStack,
    /// Hooks of the committed render; `None` while mounting.
    current: Option<Vec<Hook>>,
    hooks: Vec<Hook>,
    cursor: usize,
    render_expiration_time: ExpirationTime,
    remaining: ExpirationTime,
    latest_processed: ExpirationTime,
    effects: Vec<Rc<Effect>>,
    fiber_flags: EffectFlags,
    did_receive_update: bool,
    dependencies: Vec<AnyContext>,
    misuse: Option<CapturedError>,
}

/// Everything a hook render leaves behind for its fiber.
pub(crate) struct HookRenderOutput {
    pub(crate) result: RenderResult,
    pub(crate) hooks: Vec<Hook>,
    pub(crate) effects: Vec<Rc<Effect>>,
    pub(crate) flags: EffectFlags,
    pub(crate) remaining: ExpirationTime,
    pub(crate) latest_processed: ExpirationTime,
    pub(crate) did_receive_update: bool,
    pub(crate) dependencies: Vec<AnyContext>,
}

impl<'a> RenderCx<'a> {
    fn next_current(&mut self) -> Option<Hook> {
        self.current.as_ref().and_then(|hooks| hooks.get(self.cursor).cloned())
    }

    fn mismatch(&mut self, expected: &str, found: Option<&Hook>) {
        if self.misuse.is_some() {
            return;
        }
        let message = match found {
            Some(hook) => format!(
                "hook {} changed from {} to {expected} between renders; \
                 hooks must be called in the same order on every render",
                self.cursor,
                hook.kind()
            ),
            None => "rendered more hooks than during the previous render".to_string(),
        };
        self.misuse = Some(CapturedError::new(message));
    }

    fn push(&mut self, hook: Hook) {
        self.hooks.push(hook);
        self.cursor += 1;
    }

    pub fn use_state<S: Clone + PartialEq + 'static>(
        &mut self,
        init: impl FnOnce() -> S,
    ) -> (S, StateSetter<S>) {
        let (value, Dispatch { runtime, fiber, queue, .. }) =
            self.use_reducer(basic_state_reducer::<S>, init);
        (
            value,
            StateSetter {
                runtime,
                fiber,
                queue,
                _marker: PhantomData,
            },
        )
    }

    /// State driven by `reducer`. The reducer passed to the render that
    /// processes an action is the one applied to it.
    pub fn use_reducer<S: Clone + PartialEq + 'static, A: 'static>(
        &mut self,
        reducer: impl Fn(&S, &A) -> S,
        init: impl FnOnce() -> S,
    ) -> (S, Dispatch<A>) {
        let current = match self.next_current() {
            Some(Hook::State(hook)) if hook.memoized.is::<S>() && hook.base_state.is::<S>() => {
                Some(hook)
            }
            other => {
                if self.current.is_some() {
                    self.mismatch("state", other.as_ref());
                }
                None
            }
        };
        let (value, hook) = match current {
            Some(current) => {
                let prev = current.memoized.downcast_ref::<S>().cloned();
                let (value, hook) = self.update_state_hook(current, &reducer, init);
                if prev.as_ref() != Some(&value) {
                    self.did_receive_update = true;
                }
                (value, hook)
            }
            None => {
                let value = init();
                let initial: Rc<dyn Any> = Rc::new(value.clone());
                let hook = StateHook {
                    memoized: initial.clone(),
                    base_state: initial,
                    base_queue: Vec::new(),
                    queue: Rc::new(HookQueue::default()),
                };
                (value, hook)
            }
        };
        let queue = hook.queue.clone();
        self.push(Hook::State(hook));
        let dispatch = Dispatch {
            runtime: self.runtime.clone(),
            fiber: self.fiber,
            queue,
            _marker: PhantomData,
        };
        (value, dispatch)
    }

    fn update_state_hook<S: Clone + 'static, A: 'static>(
        &mut self,
        current: StateHook,
        reducer: &impl Fn(&S, &A) -> S,
        init: impl FnOnce() -> S,
    ) -> (S, StateHook) {
        let pending: Vec<HookUpdate> = std::mem::take(&mut *current.queue.pending.borrow_mut());
        let mut base_queue = current.base_queue.clone();
        if !pending.is_empty() {
            base_queue.extend(pending.iter().cloned());
            // Keep the drained updates on the committed hook too, so a
            // restarted render still sees them.
            if let Some(Hook::State(committed)) =
                self.current.as_mut().and_then(|hooks| hooks.get_mut(self.cursor))
            {
                committed.base_queue.extend(pending);
            }
        }

        let mut state: S = match current.base_state.downcast_ref::<S>() {
            Some(state) => state.clone(),
            None => init(),
        };
        let mut new_base_state: Option<S> = None;
        let mut new_base_queue = Vec::new();
        for update in base_queue {
            if update.expiration_time < self.render_expiration_time {
                if new_base_queue.is_empty() {
                    new_base_state = Some(state.clone());
                }
                self.remaining = self.remaining.max(update.expiration_time);
                new_base_queue.push(update);
                continue;
            }
            if !new_base_queue.is_empty() {
                new_base_queue.push(HookUpdate {
                    expiration_time: ExpirationTime::SYNC,
                    action: update.action.clone(),
                });
            }
            if update.expiration_time > ExpirationTime::IDLE {
                self.latest_processed = self.latest_processed.min(update.expiration_time);
            }
            if let Some(action) = update.action.downcast_ref::<A>() {
                state = reducer(&state, action);
            }
        }
        let base_state: Rc<dyn Any> = match new_base_state {
            Some(base) => Rc::new(base),
            None => Rc::new(state.clone()),
        };
        let hook = StateHook {
            memoized: Rc::new(state.clone()),
            base_state,
            base_queue: new_base_queue,
            queue: current.queue,
        };
        (state, hook)
    }

    fn use_effect_impl<D: Hash>(
        &mut self,
        fiber_flags: EffectFlags,
        hook_flags: HookFlags,
        deps: Option<&D>,
        create: CreateFn,
    ) {
        let deps = deps.map(DepsHash::of);
        let (destroy, unchanged) = match self.next_current() {
            Some(Hook::Effect(prev)) => {
                let unchanged = DepsHash::unchanged(prev.deps, deps);
                (prev.destroy.clone(), unchanged)
            }
            other => {
                if self.current.is_some() {
                    self.mismatch("effect", other.as_ref());
                }
                (Rc::new(RefCell::new(None)), false)
            }
        };
        let tag = if unchanged { hook_flags } else { hook_flags | HookFlags::HAS_EFFECT };
        if !unchanged {
            self.fiber_flags |= fiber_flags;
        }
        let effect = Rc::new(Effect {
            tag,
            create: RefCell::new(Some(create)),
            destroy,
            deps,
        });
        self.effects.push(effect.clone());
        self.push(Hook::Effect(effect));
    }

    /// Runs `create` after the commit is painted, whenever `deps` changed.
    pub fn use_effect<D: Hash>(
        &mut self,
        deps: Option<D>,
        create: impl FnOnce() -> Result<Option<Cleanup>, CapturedError> + 'static,
    ) {
        self.use_effect_impl(
            EffectFlags::UPDATE | EffectFlags::PASSIVE,
            HookFlags::PASSIVE,
            deps.as_ref(),
            Box::new(create),
        );
    }

    /// Like [`RenderCx::use_effect`] but runs synchronously in the commit,
    /// right after the host tree is mutated.
    pub fn use_layout_effect<D: Hash>(
        &mut self,
        deps: Option<D>,
        create: impl FnOnce() -> Result<Option<Cleanup>, CapturedError> + 'static,
    ) {
        self.use_effect_impl(
            EffectFlags::UPDATE,
            HookFlags::LAYOUT,
            deps.as_ref(),
            Box::new(create),
        );
    }

    pub fn use_ref<T: 'static>(&mut self, init: impl FnOnce() -> T) -> Rc<RefCell<T>> {
        let existing = match self.next_current() {
            Some(Hook::Ref(value)) => value.downcast::<RefCell<T>>().ok(),
            other => {
                if self.current.is_some() {
                    self.mismatch("ref", other.as_ref());
                }
                None
            }
        };
        let value = existing.unwrap_or_else(|| Rc::new(RefCell::new(init())));
        self.push(Hook::Ref(value.clone()));
        value
    }

    pub fn use_memo<T: Clone + 'static, D: Hash>(
        &mut self,
        deps: D,
        compute: impl FnOnce() -> T,
    ) -> T {
        let deps = DepsHash::of(&deps);
        let cached = match self.next_current() {
            Some(Hook::Memo { value, deps: prev }) if prev == deps => {
                value.downcast_ref::<T>().cloned()
            }
            Some(Hook::Memo { .. }) => None,
            other => {
                if self.current.is_some() {
                    self.mismatch("memo", other.as_ref());
                }
                None
            }
        };
        let value = cached.unwrap_or_else(compute);
        self.push(Hook::Memo {
            value: Rc::new(value.clone()),
            deps,
        });
        value
    }

    /// Reads the nearest provided value and subscribes to its changes.
    pub fn use_context<T: Clone + PartialEq + 'static>(&mut self, context: &Context<T>) -> T {
        let any = context.as_any();
        if !self.dependencies.iter().any(|c| c.id() == any.id()) {
            self.dependencies.push(any.clone());
        }
        Context::<T>::downcast(&self.contexts.read(any)).unwrap_or_else(|| context.default_value())
    }
}

/// Renders a hook-based component for `wip`, reusing the hook list of
/// `current` when there is one.
pub(crate) fn render_with_hooks(
    arena: &mut FiberArena,
    wip: FiberId,
    current: Option<FiberId>,
    contexts: &ContextStack,
    runtime: RuntimeHandle,
    render_expiration_time: ExpirationTime,
    render: impl FnOnce(&mut RenderCx<'_>) -> RenderResult,
) -> HookRenderOutput {
    let current_hooks = current.and_then(|current| match &mut arena[current].memoized_state {
        FiberState::Hooks(hooks) => Some(std::mem::take(hooks)),
        _ => None,
    });
    let mut did_receive_update = false;
    if let Some(deps) = &arena[wip].dependencies {
        if !deps.contexts.is_empty() && deps.expiration_time >= render_expiration_time {
            did_receive_update = true;
        }
    }

    let mut cx = RenderCx {
        fiber: wip,
        runtime,
        contexts,
        current: current_hooks,
        hooks: Vec::new(),
        cursor: 0,
        render_expiration_time,
        remaining: ExpirationTime::NO_WORK,
        latest_processed: ExpirationTime::SYNC,
        effects: Vec::new(),
        fiber_flags: EffectFlags::empty(),
        did_receive_update,
        dependencies: Vec::new(),
        misuse: None,
    };
    let mut result = render(&mut cx);
    if result.is_ok() {
        let used_fewer = cx.current.as_ref().is_some_and(|hooks| cx.cursor < hooks.len());
        if let Some(error) = cx.misuse.take() {
            result = Err(Thrown::Error(error));
        } else if used_fewer {
            result = Err(Thrown::Error(CapturedError::new(
                "rendered fewer hooks than expected; hooks must not be called conditionally",
            )));
        }
    }

    if let (Some(current), Some(hooks)) = (current, cx.current.take()) {
        arena[current].memoized_state = FiberState::Hooks(hooks);
    }
    HookRenderOutput {
        result,
        hooks: cx.hooks,
        effects: cx.effects,
        flags: cx.fiber_flags,
        remaining: cx.remaining,
        latest_processed: cx.latest_processed,
        did_receive_update: cx.did_receive_update,
        dependencies: cx.dependencies,
    }
}

/// Writes a finished hook render back into `wip`.
pub(crate) fn apply_hook_output(
    arena: &mut FiberArena,
    wip: FiberId,
    output: &mut HookRenderOutput,
) {
    let fiber = &mut arena[wip];
    fiber.memoized_state = FiberState::Hooks(std::mem::take(&mut output.hooks));
    fiber.hook_effects = std::mem::take(&mut output.effects);
    fiber.flags |= output.flags;
    fiber.expiration_time = output.remaining;
    fiber.dependencies = if output.dependencies.is_empty() {
        None
    } else {
        Some(Dependencies {
            expiration_time: ExpirationTime::NO_WORK,
            contexts: std::mem::take(&mut output.dependencies),
        })
    };
}

/// Skips a hook component whose render produced nothing new: its effects
/// stay as committed and the work it was scheduled for is considered done.
pub(crate) fn bailout_hooks(
    arena: &mut FiberArena,
    wip: FiberId,
    current: FiberId,
    render_expiration_time: ExpirationTime,
) {
    let effects = arena[current].hook_effects.clone();
    let fiber = &mut arena[wip];
    fiber.hook_effects = effects;
    fiber.flags.remove(EffectFlags::PASSIVE | EffectFlags::UPDATE);
    let current = &mut arena[current];
    if current.expiration_time <= render_expiration_time {
        current.expiration_time = ExpirationTime::NO_WORK;
    }
}

#[cfg(test)]
#[path = "tests/hooks_tests.rs"]
mod tests;
