//! Context values flowing down the tree without explicit props.

use std::any::Any;
use std::fmt;
use std::marker::PhantomData;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::element::{Element, ElementType, Node, Props};
use crate::hash::HashMap;

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ContextId(u64);

struct AnyContextInner {
    id: ContextId,
    default: Rc<dyn Any>,
    eq: fn(&dyn Any, &dyn Any) -> bool,
}

/// Type-erased handle used by fibers and the context stack.
#[derive(Clone)]
pub struct AnyContext {
    inner: Rc<AnyContextInner>,
}

impl AnyContext {
    pub fn id(&self) -> ContextId {
        self.inner.id
    }

    pub(crate) fn default_value(&self) -> Rc<dyn Any> {
        self.inner.default.clone()
    }

    pub(crate) fn values_equal(&self, a: &Rc<dyn Any>, b: &Rc<dyn Any>) -> bool {
        Rc::ptr_eq(a, b) || (self.inner.eq)(&**a, &**b)
    }
}

impl fmt::Debug for AnyContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Context({})", self.inner.id.0)
    }
}

fn typed_eq<T: PartialEq + 'static>(a: &dyn Any, b: &dyn Any) -> bool {
    match (a.downcast_ref::<T>(), b.downcast_ref::<T>()) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

pub struct Context<T> {
    any: AnyContext,
    default: Rc<T>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Context<T> {
    fn clone(&self) -> Self {
        Self {
            any: self.any.clone(),
            default: self.default.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T: Clone + PartialEq + 'static> Context<T> {
    pub fn new(default: T) -> Self {
        Self {
            any: AnyContext {
                inner: Rc::new(AnyContextInner {
                    id: ContextId(NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed)),
                    default: Rc::new(default.clone()),
                    eq: typed_eq::<T>,
                }),
            },
            default: Rc::new(default),
            _marker: PhantomData,
        }
    }

    pub fn as_any(&self) -> &AnyContext {
        &self.any
    }

    pub fn provider(&self, value: T, children: impl Into<Node>) -> Element {
        Element::new(
            ElementType::Provider(self.any.clone()),
            Props::new().with_data(value).with_children(children),
        )
    }

    /// Renders `render` with the nearest provided value.
    pub fn consumer(&self, render: impl Fn(&T) -> Node + 'static) -> Element {
        let render: ConsumerRender =
            Rc::new(move |value: &dyn Any| match value.downcast_ref::<T>() {
                Some(value) => render(value),
                None => Node::Empty,
            });
        Element::new(
            ElementType::Consumer(self.any.clone()),
            Props::new().with_data(render),
        )
    }

    pub(crate) fn downcast(value: &Rc<dyn Any>) -> Option<T> {
        value.downcast_ref::<T>().cloned()
    }

    /// The value read by consumers with no provider above them.
    pub fn default_value(&self) -> T {
        (*self.default).clone()
    }
}

pub(crate) type ConsumerRender = Rc<dyn Fn(&dyn Any) -> Node>;

/// Provider values currently in scope, pushed in begin and popped in
/// complete or unwind.
#[derive(Default)]
pub(crate) struct ContextStack {
    values: HashMap<ContextId, Vec<Rc<dyn Any>>>,
}

impl ContextStack {
    pub(crate) fn push(&mut self, context: &AnyContext, value: Rc<dyn Any>) {
        self.values.entry(context.id()).or_default().push(value);
    }

    pub(crate) fn pop(&mut self, context: &AnyContext) {
        if let Some(stack) = self.values.get_mut(&context.id()) {
            stack.pop();
        }
    }

    pub(crate) fn read(&self, context: &AnyContext) -> Rc<dyn Any> {
        self.values
            .get(&context.id())
            .and_then(|stack| stack.last().cloned())
            .unwrap_or_else(|| context.default_value())
    }

    pub(crate) fn clear(&mut self) {
        self.values.clear();
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.values.values().all(Vec::is_empty)
    }
}

/// The contexts a fiber read during its last render.
#[derive(Clone, Default)]
pub(crate) struct Dependencies {
    pub(crate) expiration_time: crate::expiration::ExpirationTime,
    pub(crate) contexts: Vec<AnyContext>,
}

impl Dependencies {
    pub(crate) fn reads(&self, context: &AnyContext) -> bool {
        self.contexts.iter().any(|c| c.id() == context.id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stack_falls_back_to_default_and_nests() {
        let theme = Context::new("light".to_string());
        let mut stack = ContextStack::default();
        let read = |stack: &ContextStack| Context::<String>::downcast(&stack.read(theme.as_any()));
        assert_eq!(read(&stack).as_deref(), Some("light"));
        stack.push(theme.as_any(), Rc::new("dark".to_string()));
        stack.push(theme.as_any(), Rc::new("blue".to_string()));
        assert_eq!(read(&stack).as_deref(), Some("blue"));
        stack.pop(theme.as_any());
        assert_eq!(read(&stack).as_deref(), Some("dark"));
        stack.pop(theme.as_any());
        assert!(stack.is_empty());
    }

    #[test]
    fn values_compare_by_type_equality() {
        let count = Context::new(0i32);
        let a: Rc<dyn Any> = Rc::new(3i32);
        let b: Rc<dyn Any> = Rc::new(3i32);
        let c: Rc<dyn Any> = Rc::new(4i32);
        assert!(count.as_any().values_equal(&a, &b));
        assert!(!count.as_any().values_equal(&a, &c));
    }
}
