//! Component kinds the reconciler knows how to render.

use std::any::Any;
use std::fmt;
use std::rc::Rc;

use crate::element::{shallow_equal, Element, ElementType, Node, Props, Ref};
use crate::error::{invalid_element_type, CapturedError, Thrown};
use crate::fiber::FiberId;
use crate::hooks::RenderCx;
use crate::runtime::{PendingUpdate, RuntimeHandle, UpdateKind};
use crate::thenable::{Thenable, ThenableState};
use crate::update_queue::{SharedPending, StatePayload, UpdateTag};

pub type RenderResult = Result<Node, Thrown>;

/// Opaque class-component state.
pub type StateValue = Rc<dyn Any>;

pub fn state<T: Any>(value: T) -> StateValue {
    Rc::new(value)
}

type RenderFn = dyn Fn(&mut RenderCx<'_>, &Props) -> RenderResult;

#[derive(Clone)]
pub struct FunctionComponent {
    inner: Rc<FunctionInner>,
}

struct FunctionInner {
    name: Rc<str>,
    render: Box<RenderFn>,
}

impl FunctionComponent {
    pub fn new(
        name: &str,
        render: impl Fn(&mut RenderCx<'_>, &Props) -> RenderResult + 'static,
    ) -> Self {
        Self {
            inner: Rc::new(FunctionInner {
                name: Rc::from(name),
                render: Box::new(render),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn ptr_eq(&self, other: &FunctionComponent) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn element(&self, props: Props) -> Element {
        Element::new(ElementType::Function(self.clone()), props)
    }

    pub(crate) fn render(&self, cx: &mut RenderCx<'_>, props: &Props) -> RenderResult {
        (self.inner.render)(cx, props)
    }
}

type ForwardRenderFn = dyn Fn(&mut RenderCx<'_>, &Props, Option<&Ref>) -> RenderResult;

/// A function component that also receives the `ref` its element carries.
#[derive(Clone)]
pub struct ForwardRefType {
    inner: Rc<ForwardRefInner>,
}

struct ForwardRefInner {
    name: Rc<str>,
    render: Box<ForwardRenderFn>,
}

impl ForwardRefType {
    pub fn new(
        name: &str,
        render: impl Fn(&mut RenderCx<'_>, &Props, Option<&Ref>) -> RenderResult + 'static,
    ) -> Self {
        Self {
            inner: Rc::new(ForwardRefInner {
                name: Rc::from(name),
                render: Box::new(render),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn ptr_eq(&self, other: &ForwardRefType) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn element(&self, props: Props) -> Element {
        Element::new(ElementType::ForwardRef(self.clone()), props)
    }

    pub(crate) fn render(
        &self,
        cx: &mut RenderCx<'_>,
        props: &Props,
        ref_: Option<&Ref>,
    ) -> RenderResult {
        (self.inner.render)(cx, props, ref_)
    }
}

pub type CompareFn = Rc<dyn Fn(&Props, &Props) -> bool>;

/// Skips re-rendering `inner` while props compare equal.
#[derive(Clone)]
pub struct MemoType {
    inner: Rc<MemoInner>,
}

struct MemoInner {
    ty: ElementType,
    compare: Option<CompareFn>,
}

impl MemoType {
    pub fn new(inner: ElementType) -> Self {
        Self {
            inner: Rc::new(MemoInner {
                ty: inner,
                compare: None,
            }),
        }
    }

    pub fn with_compare(
        inner: ElementType,
        compare: impl Fn(&Props, &Props) -> bool + 'static,
    ) -> Self {
        Self {
            inner: Rc::new(MemoInner {
                ty: inner,
                compare: Some(Rc::new(compare)),
            }),
        }
    }

    pub fn inner(&self) -> &ElementType {
        &self.inner.ty
    }

    pub fn ptr_eq(&self, other: &MemoType) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn element(&self, props: Props) -> Element {
        Element::new(ElementType::Memo(self.clone()), props)
    }

    /// A plain function without a custom comparator renders through the
    /// cheaper simple-memo path.
    pub(crate) fn is_simple(&self) -> bool {
        self.inner.compare.is_none() && matches!(self.inner.ty, ElementType::Function(_))
    }

    pub(crate) fn props_equal(&self, old: &Props, new: &Props) -> bool {
        match &self.inner.compare {
            Some(compare) => compare(old, new),
            None => shallow_equal(old, new),
        }
    }
}

/// A component type that is loaded asynchronously.
///
/// The thenable must resolve to an [`ElementType`]; anything else fails
/// when the lazy element is rendered.
#[derive(Clone)]
pub struct LazyType {
    inner: Rc<Thenable>,
}

impl LazyType {
    pub fn new(loader: Thenable) -> Self {
        Self {
            inner: Rc::new(loader),
        }
    }

    pub fn ptr_eq(&self, other: &LazyType) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn element(&self, props: Props) -> Element {
        Element::new(ElementType::Lazy(self.clone()), props)
    }

    pub(crate) fn resolve(&self) -> Result<ElementType, Thrown> {
        match self.inner.state() {
            ThenableState::Pending => Err(Thrown::Suspend((*self.inner).clone())),
            ThenableState::Rejected(error) => Err(Thrown::Error(error)),
            ThenableState::Resolved(value) => match value.downcast_ref::<ElementType>() {
                Some(
                    ty @ (ElementType::Function(_)
                    | ElementType::Class(_)
                    | ElementType::ForwardRef(_)
                    | ElementType::Memo(_)),
                ) => Ok(ty.clone()),
                Some(other) => Err(Thrown::Error(invalid_element_type(&other.name()))),
                None => Err(Thrown::Error(invalid_element_type("a non-component value"))),
            },
        }
    }
}

/// Class-style component instance.
///
/// The instance lives across renders; props and state are owned by the
/// reconciler and handed in on every call.
pub trait Component: 'static {
    fn render(&self, props: &Props, state: &StateValue) -> RenderResult;

    fn should_component_update(
        &self,
        _old_props: &Props,
        _new_props: &Props,
        _old_state: &StateValue,
        _new_state: &StateValue,
    ) -> bool {
        true
    }

    fn get_snapshot_before_update(
        &self,
        _prev_props: &Props,
        _prev_state: &StateValue,
    ) -> Option<StateValue> {
        None
    }

    fn component_did_mount(
        &mut self,
        _props: &Props,
        _state: &StateValue,
    ) -> Result<(), CapturedError> {
        Ok(())
    }

    fn component_did_update(
        &mut self,
        _props: &Props,
        _state: &StateValue,
        _prev_props: &Props,
        _prev_state: &StateValue,
        _snapshot: Option<StateValue>,
    ) -> Result<(), CapturedError> {
        Ok(())
    }

    fn component_will_unmount(&mut self) -> Result<(), CapturedError> {
        Ok(())
    }

    fn component_did_catch(&mut self, _error: &CapturedError) {}

    /// `true` when [`Component::component_did_catch`] is meaningful, making
    /// this instance an error boundary even without a derived-state hook.
    fn catches_errors(&self) -> bool {
        false
    }
}

type ConstructFn = dyn Fn(&Props, Updater) -> (Box<dyn Component>, StateValue);
type DerivedFromErrorFn = dyn Fn(&CapturedError) -> StateValue;
type DerivedFromPropsFn = dyn Fn(&Props, &StateValue) -> Option<StateValue>;

#[derive(Clone)]
pub struct ClassType {
    inner: Rc<ClassInner>,
}

struct ClassInner {
    name: Rc<str>,
    construct: Rc<ConstructFn>,
    derived_state_from_error: Option<Rc<DerivedFromErrorFn>>,
    derived_state_from_props: Option<Rc<DerivedFromPropsFn>>,
}

impl ClassType {
    pub fn new(
        name: &str,
        construct: impl Fn(&Props, Updater) -> (Box<dyn Component>, StateValue) + 'static,
    ) -> Self {
        Self {
            inner: Rc::new(ClassInner {
                name: Rc::from(name),
                construct: Rc::new(construct),
                derived_state_from_error: None,
                derived_state_from_props: None,
            }),
        }
    }

    fn rebuild(
        &self,
        derived_state_from_error: Option<Rc<DerivedFromErrorFn>>,
        derived_state_from_props: Option<Rc<DerivedFromPropsFn>>,
    ) -> Self {
        Self {
            inner: Rc::new(ClassInner {
                name: self.inner.name.clone(),
                construct: self.inner.construct.clone(),
                derived_state_from_error,
                derived_state_from_props,
            }),
        }
    }

    /// Makes this class an error boundary: a captured error replaces the
    /// state with the returned value.
    pub fn with_derived_state_from_error(
        self,
        derive: impl Fn(&CapturedError) -> StateValue + 'static,
    ) -> Self {
        self.rebuild(Some(Rc::new(derive)), self.inner.derived_state_from_props.clone())
    }

    /// Runs before every render; a returned value replaces the state.
    pub fn with_derived_state_from_props(
        self,
        derive: impl Fn(&Props, &StateValue) -> Option<StateValue> + 'static,
    ) -> Self {
        self.rebuild(self.inner.derived_state_from_error.clone(), Some(Rc::new(derive)))
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn ptr_eq(&self, other: &ClassType) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn element(&self, props: Props) -> Element {
        Element::new(ElementType::Class(self.clone()), props)
    }

    pub(crate) fn construct(
        &self,
        props: &Props,
        updater: Updater,
    ) -> (Box<dyn Component>, StateValue) {
        (self.inner.construct)(props, updater)
    }

    pub(crate) fn has_derived_state_from_error(&self) -> bool {
        self.inner.derived_state_from_error.is_some()
    }

    pub(crate) fn derived_state_from_error(&self, error: &CapturedError) -> Option<StateValue> {
        self.inner
            .derived_state_from_error
            .as_ref()
            .map(|derive| derive(error))
    }

    pub(crate) fn derived_state_from_props(
        &self,
        props: &Props,
        state: &StateValue,
    ) -> Option<StateValue> {
        self.inner
            .derived_state_from_props
            .as_ref()
            .and_then(|derive| derive(props, state))
    }
}

impl fmt::Debug for ClassType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ClassType({})", self.inner.name)
    }
}

/// Handle a class instance uses to enqueue state transitions on itself.
#[derive(Clone)]
pub struct Updater {
    runtime: RuntimeHandle,
    fiber: FiberId,
    pending: SharedPending,
}

impl Updater {
    pub(crate) fn new(runtime: RuntimeHandle, fiber: FiberId, pending: SharedPending) -> Self {
        Self {
            runtime,
            fiber,
            pending,
        }
    }

    fn enqueue(
        &self,
        tag: UpdateTag,
        payload: Option<StatePayload>,
        callback: Option<Rc<dyn Fn()>>,
    ) {
        self.runtime.enqueue_update(PendingUpdate::new(
            self.fiber,
            UpdateKind::Class {
                pending: self.pending.clone(),
                tag,
                payload,
                callback,
            },
        ));
    }

    pub fn set_state(&self, value: StateValue) {
        self.enqueue(UpdateTag::Update, Some(StatePayload::Value(value)), None);
    }

    /// Computes the next state from the state and props current when the
    /// update is processed.
    pub fn update_state(&self, update: impl Fn(&StateValue, &Props) -> StateValue + 'static) {
        self.enqueue(UpdateTag::Update, Some(StatePayload::Compute(Rc::new(update))), None);
    }

    pub fn set_state_with_callback(&self, value: StateValue, callback: impl Fn() + 'static) {
        self.enqueue(
            UpdateTag::Update,
            Some(StatePayload::Value(value)),
            Some(Rc::new(callback)),
        );
    }

    pub fn replace_state(&self, value: StateValue) {
        self.enqueue(UpdateTag::Replace, Some(StatePayload::Value(value)), None);
    }

    /// Re-renders even when `should_component_update` would refuse.
    pub fn force_update(&self) {
        self.enqueue(UpdateTag::ForceUpdate, None, None);
    }
}

impl fmt::Debug for Updater {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Updater").field("fiber", &self.fiber).finish()
    }
}
