//! Declarative descriptions of what the tree should look like.
//!
//! An [`Element`] is immutable once built: reconciliation compares elements by
//! type and key and props by reference, so every render that produces a new
//! `Element` produces new `Rc<Props>` unless the caller deliberately reuses one.

use std::any::Any;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::Hash;
use std::rc::Rc;

use crate::applier::HostId;
use crate::component::{ClassType, ForwardRefType, FunctionComponent, LazyType, MemoType};
use crate::context::AnyContext;
use crate::hash::hash_one;
use crate::profiler::{ProfilerConfig, ProfilerReport};

#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Key(Rc<str>);

impl Key {
    pub fn new(key: impl AsRef<str>) -> Self {
        Key(Rc::from(key.as_ref()))
    }

    /// Derives a key from any hashable value.
    pub fn hashed<K: Hash + ?Sized>(value: &K) -> Self {
        Key(Rc::from(format!("#{:016x}", hash_one(value))))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", &*self.0)
    }
}

impl From<&str> for Key {
    fn from(value: &str) -> Self {
        Key::new(value)
    }
}

impl From<String> for Key {
    fn from(value: String) -> Self {
        Key(Rc::from(value))
    }
}

impl From<u64> for Key {
    fn from(value: u64) -> Self {
        Key(Rc::from(value.to_string()))
    }
}

#[derive(Clone)]
pub enum PropValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    Node(Node),
    Callback(Rc<dyn Fn()>),
    Any(Rc<dyn Any>),
}

impl PartialEq for PropValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (PropValue::Null, PropValue::Null) => true,
            (PropValue::Bool(a), PropValue::Bool(b)) => a == b,
            (PropValue::Int(a), PropValue::Int(b)) => a == b,
            (PropValue::Float(a), PropValue::Float(b)) => a.to_bits() == b.to_bits(),
            (PropValue::Str(a), PropValue::Str(b)) => a == b,
            (PropValue::Node(a), PropValue::Node(b)) => a == b,
            (PropValue::Callback(a), PropValue::Callback(b)) => Rc::ptr_eq(a, b),
            (PropValue::Any(a), PropValue::Any(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for PropValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropValue::Null => f.write_str("null"),
            PropValue::Bool(v) => write!(f, "{v}"),
            PropValue::Int(v) => write!(f, "{v}"),
            PropValue::Float(v) => write!(f, "{v}"),
            PropValue::Str(v) => write!(f, "{:?}", &**v),
            PropValue::Node(v) => write!(f, "{v:?}"),
            PropValue::Callback(_) => f.write_str("<callback>"),
            PropValue::Any(_) => f.write_str("<any>"),
        }
    }
}

impl From<bool> for PropValue {
    fn from(value: bool) -> Self {
        PropValue::Bool(value)
    }
}

impl From<i64> for PropValue {
    fn from(value: i64) -> Self {
        PropValue::Int(value)
    }
}

impl From<i32> for PropValue {
    fn from(value: i32) -> Self {
        PropValue::Int(value as i64)
    }
}

impl From<f64> for PropValue {
    fn from(value: f64) -> Self {
        PropValue::Float(value)
    }
}

impl From<&str> for PropValue {
    fn from(value: &str) -> Self {
        PropValue::Str(Rc::from(value))
    }
}

impl From<String> for PropValue {
    fn from(value: String) -> Self {
        PropValue::Str(Rc::from(value))
    }
}

impl From<Node> for PropValue {
    fn from(value: Node) -> Self {
        PropValue::Node(value)
    }
}

/// Input to a component or host node.
#[derive(Clone, Default)]
pub struct Props {
    attrs: BTreeMap<Rc<str>, PropValue>,
    children: Node,
    text: Option<Rc<str>>,
    data: Option<Rc<dyn Any>>,
}

impl Props {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn for_text(text: Rc<str>) -> Self {
        Self {
            text: Some(text),
            ..Self::default()
        }
    }

    pub(crate) fn for_children(children: Node) -> Self {
        Self {
            children,
            ..Self::default()
        }
    }

    pub fn with_attr(mut self, name: &str, value: impl Into<PropValue>) -> Self {
        self.attrs.insert(Rc::from(name), value.into());
        self
    }

    pub fn with_children(mut self, children: impl Into<Node>) -> Self {
        self.children = children.into();
        self
    }

    pub fn with_data<T: Any>(mut self, data: T) -> Self {
        self.data = Some(Rc::new(data));
        self
    }

    pub fn attr(&self, name: &str) -> Option<&PropValue> {
        self.attrs.get(name)
    }

    pub fn attrs(&self) -> impl Iterator<Item = (&str, &PropValue)> {
        self.attrs.iter().map(|(k, v)| (&**k, v))
    }

    pub fn int(&self, name: &str) -> Option<i64> {
        match self.attrs.get(name) {
            Some(PropValue::Int(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn bool(&self, name: &str) -> bool {
        matches!(self.attrs.get(name), Some(PropValue::Bool(true)))
    }

    pub fn str(&self, name: &str) -> Option<&str> {
        match self.attrs.get(name) {
            Some(PropValue::Str(v)) => Some(v),
            _ => None,
        }
    }

    pub fn node(&self, name: &str) -> Option<&Node> {
        match self.attrs.get(name) {
            Some(PropValue::Node(v)) => Some(v),
            _ => None,
        }
    }

    pub fn children(&self) -> &Node {
        &self.children
    }

    pub fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }

    pub fn data<T: Any>(&self) -> Option<&T> {
        self.data.as_deref().and_then(|data| data.downcast_ref::<T>())
    }

    pub(crate) fn raw_data(&self) -> Option<&Rc<dyn Any>> {
        self.data.as_ref()
    }
}

/// Shallow comparison: same attributes, same children by reference, same data by reference.
pub fn shallow_equal(a: &Props, b: &Props) -> bool {
    if std::ptr::eq(a, b) {
        return true;
    }
    a.attrs == b.attrs
        && a.children == b.children
        && a.text == b.text
        && match (&a.data, &b.data) {
            (None, None) => true,
            (Some(x), Some(y)) => Rc::ptr_eq(x, y),
            _ => false,
        }
}

impl fmt::Debug for Props {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("Props");
        for (name, value) in &self.attrs {
            s.field(name, value);
        }
        if let Some(text) = &self.text {
            s.field("text", text);
        }
        s.finish()
    }
}

/// What a component renders: nothing, text, an element, or a list of those.
#[derive(Clone, Default)]
pub enum Node {
    #[default]
    Empty,
    Text(Rc<str>),
    Element(Element),
    List(Rc<[Node]>),
}

impl Node {
    pub fn text(text: impl AsRef<str>) -> Self {
        Node::Text(Rc::from(text.as_ref()))
    }

    pub fn list(nodes: impl IntoIterator<Item = Node>) -> Self {
        Node::List(nodes.into_iter().collect())
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Node::Empty)
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Node::Empty, Node::Empty) => true,
            (Node::Text(a), Node::Text(b)) => a == b,
            (Node::Element(a), Node::Element(b)) => {
                a.ty.same_type(&b.ty) && a.key == b.key && Rc::ptr_eq(&a.props, &b.props)
            }
            (Node::List(a), Node::List(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::Empty => f.write_str("Empty"),
            Node::Text(text) => write!(f, "Text({:?})", &**text),
            Node::Element(element) => write!(f, "{element:?}"),
            Node::List(nodes) => f.debug_list().entries(nodes.iter()).finish(),
        }
    }
}

impl From<Element> for Node {
    fn from(value: Element) -> Self {
        Node::Element(value)
    }
}

impl From<&str> for Node {
    fn from(value: &str) -> Self {
        Node::text(value)
    }
}

impl From<String> for Node {
    fn from(value: String) -> Self {
        Node::Text(Rc::from(value))
    }
}

impl From<Vec<Node>> for Node {
    fn from(value: Vec<Node>) -> Self {
        Node::List(value.into())
    }
}

impl From<Vec<Element>> for Node {
    fn from(value: Vec<Element>) -> Self {
        Node::List(value.into_iter().map(Node::Element).collect())
    }
}

impl<const N: usize> From<[Node; N]> for Node {
    fn from(value: [Node; N]) -> Self {
        Node::List(value.into_iter().collect())
    }
}

impl<const N: usize> From<[Element; N]> for Node {
    fn from(value: [Element; N]) -> Self {
        Node::List(value.into_iter().map(Node::Element).collect())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RevealOrder {
    Forwards,
    Backwards,
    Together,
    Independent,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TailMode {
    Visible,
    Collapsed,
    Hidden,
}

#[derive(Clone)]
pub enum ElementType {
    Host(Rc<str>),
    Function(FunctionComponent),
    Class(ClassType),
    ForwardRef(ForwardRefType),
    Memo(MemoType),
    Lazy(LazyType),
    Fragment,
    Provider(AnyContext),
    Consumer(AnyContext),
    Suspense,
    SuspenseList,
    Profiler,
    /// Pass-through wrapper with no behavior of its own.
    Mode,
    Portal(HostId),
}

impl ElementType {
    pub fn same_type(&self, other: &ElementType) -> bool {
        match (self, other) {
            (ElementType::Host(a), ElementType::Host(b)) => a == b,
            (ElementType::Function(a), ElementType::Function(b)) => a.ptr_eq(b),
            (ElementType::Class(a), ElementType::Class(b)) => a.ptr_eq(b),
            (ElementType::ForwardRef(a), ElementType::ForwardRef(b)) => a.ptr_eq(b),
            (ElementType::Memo(a), ElementType::Memo(b)) => a.ptr_eq(b),
            (ElementType::Lazy(a), ElementType::Lazy(b)) => a.ptr_eq(b),
            (ElementType::Provider(a), ElementType::Provider(b)) => a.id() == b.id(),
            (ElementType::Consumer(a), ElementType::Consumer(b)) => a.id() == b.id(),
            (ElementType::Portal(a), ElementType::Portal(b)) => a == b,
            (ElementType::Fragment, ElementType::Fragment)
            | (ElementType::Suspense, ElementType::Suspense)
            | (ElementType::SuspenseList, ElementType::SuspenseList)
            | (ElementType::Profiler, ElementType::Profiler)
            | (ElementType::Mode, ElementType::Mode) => true,
            _ => false,
        }
    }

    pub fn name(&self) -> String {
        match self {
            ElementType::Host(tag) => tag.to_string(),
            ElementType::Function(c) => c.name().to_string(),
            ElementType::Class(c) => c.name().to_string(),
            ElementType::ForwardRef(c) => format!("ForwardRef({})", c.name()),
            ElementType::Memo(c) => format!("Memo({})", c.inner().name()),
            ElementType::Lazy(_) => "Lazy".to_string(),
            ElementType::Fragment => "Fragment".to_string(),
            ElementType::Provider(_) => "Context.Provider".to_string(),
            ElementType::Consumer(_) => "Context.Consumer".to_string(),
            ElementType::Suspense => "Suspense".to_string(),
            ElementType::SuspenseList => "SuspenseList".to_string(),
            ElementType::Profiler => "Profiler".to_string(),
            ElementType::Mode => "Mode".to_string(),
            ElementType::Portal(_) => "Portal".to_string(),
        }
    }
}

impl fmt::Debug for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

/// Target a ref is attached to once its owner commits.
#[derive(Clone)]
pub enum RefTarget {
    Host(HostId),
    Instance(Rc<dyn Any>),
}

impl fmt::Debug for RefTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefTarget::Host(id) => write!(f, "Host({})", id.raw()),
            RefTarget::Instance(_) => f.write_str("Instance"),
        }
    }
}

pub type RefObject = Rc<RefCell<Option<RefTarget>>>;

#[derive(Clone)]
pub enum Ref {
    Object(RefObject),
    Callback(Rc<dyn Fn(Option<RefTarget>)>),
}

impl Ref {
    pub fn object() -> (Ref, RefObject) {
        let object: RefObject = Rc::new(RefCell::new(None));
        (Ref::Object(object.clone()), object)
    }

    pub fn callback(f: impl Fn(Option<RefTarget>) + 'static) -> Ref {
        Ref::Callback(Rc::new(f))
    }

    pub fn ptr_eq(&self, other: &Ref) -> bool {
        match (self, other) {
            (Ref::Object(a), Ref::Object(b)) => Rc::ptr_eq(a, b),
            (Ref::Callback(a), Ref::Callback(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    pub(crate) fn set(&self, target: Option<RefTarget>) {
        match self {
            Ref::Object(object) => *object.borrow_mut() = target,
            Ref::Callback(callback) => callback(target),
        }
    }
}

/// Host markup a dehydrated Suspense boundary takes ownership of.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct DehydratedMarkup(pub(crate) HostId);

#[derive(Clone)]
pub struct Element {
    pub(crate) ty: ElementType,
    pub(crate) key: Option<Key>,
    pub(crate) ref_: Option<Ref>,
    pub(crate) props: Rc<Props>,
}

impl Element {
    pub fn new(ty: ElementType, props: Props) -> Self {
        Self {
            ty,
            key: None,
            ref_: None,
            props: Rc::new(props),
        }
    }

    pub fn with_shared_props(ty: ElementType, props: Rc<Props>) -> Self {
        Self {
            ty,
            key: None,
            ref_: None,
            props,
        }
    }

    pub fn host(tag: &str) -> Self {
        Self::new(ElementType::Host(Rc::from(tag)), Props::new())
    }

    pub fn fragment(children: impl Into<Node>) -> Self {
        Self::new(ElementType::Fragment, Props::for_children(children.into()))
    }

    pub fn suspense(fallback: impl Into<Node>, children: impl Into<Node>) -> Self {
        Self::new(
            ElementType::Suspense,
            Props::new()
                .with_attr("fallback", PropValue::Node(fallback.into()))
                .with_children(children),
        )
    }

    pub fn suspense_list(order: RevealOrder, tail: TailMode, children: impl Into<Node>) -> Self {
        Self::new(
            ElementType::SuspenseList,
            Props::new().with_data((order, tail)).with_children(children),
        )
    }

    pub fn portal(container: HostId, children: impl Into<Node>) -> Self {
        Self::new(
            ElementType::Portal(container),
            Props::for_children(children.into()),
        )
    }

    /// A Suspense boundary that owns server-rendered `markup` already present
    /// in the host tree. In concurrent mode the markup stays until the
    /// boundary is rendered at idle priority and replaced by `children`.
    pub fn dehydrated_suspense(
        markup: HostId,
        fallback: impl Into<Node>,
        children: impl Into<Node>,
    ) -> Self {
        Self::new(
            ElementType::Suspense,
            Props::new()
                .with_attr("fallback", PropValue::Node(fallback.into()))
                .with_data(DehydratedMarkup(markup))
                .with_children(children),
        )
    }

    pub fn profiler(
        id: &str,
        on_render: impl Fn(&ProfilerReport) + 'static,
        children: impl Into<Node>,
    ) -> Self {
        Self::new(
            ElementType::Profiler,
            Props::new()
                .with_data(ProfilerConfig {
                    id: Rc::from(id),
                    on_render: Rc::new(on_render),
                })
                .with_children(children),
        )
    }

    pub fn mode(children: impl Into<Node>) -> Self {
        Self::new(ElementType::Mode, Props::for_children(children.into()))
    }

    pub fn with_key(mut self, key: impl Into<Key>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_ref(mut self, ref_: Ref) -> Self {
        self.ref_ = Some(ref_);
        self
    }

    /// Sets an attribute. Only valid while the props are not shared yet.
    pub fn attr(mut self, name: &str, value: impl Into<PropValue>) -> Self {
        let props = Rc::make_mut(&mut self.props);
        props.attrs.insert(Rc::from(name), value.into());
        self
    }

    pub fn child(mut self, child: impl Into<Node>) -> Self {
        let props = Rc::make_mut(&mut self.props);
        let child = child.into();
        props.children = match std::mem::take(&mut props.children) {
            Node::Empty => child,
            Node::List(existing) => {
                let mut nodes: Vec<Node> = existing.iter().cloned().collect();
                nodes.push(child);
                Node::List(nodes.into())
            }
            single => Node::List(vec![single, child].into()),
        };
        self
    }

    pub fn children(mut self, children: impl Into<Node>) -> Self {
        Rc::make_mut(&mut self.props).children = children.into();
        self
    }

    pub fn element_type(&self) -> &ElementType {
        &self.ty
    }

    pub fn key(&self) -> Option<&Key> {
        self.key.as_ref()
    }

    pub fn props(&self) -> &Rc<Props> {
        &self.props
    }
}

impl fmt::Debug for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("Element");
        s.field("type", &self.ty);
        if let Some(key) = &self.key {
            s.field("key", key);
        }
        s.field("props", &self.props).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_accumulates_into_list() {
        let element = Element::host("div").child("a").child("b").child("c");
        match element.props().children() {
            Node::List(nodes) => assert_eq!(nodes.len(), 3),
            other => panic!("expected list, got {other:?}"),
        }
    }

    #[test]
    fn shallow_equal_compares_children_by_reference() {
        let children = Node::list([Node::text("x")]);
        let a = Props::new().with_attr("n", 1).with_children(children.clone());
        let b = Props::new().with_attr("n", 1).with_children(children);
        assert!(shallow_equal(&a, &b));
        let c = Props::new()
            .with_attr("n", 1)
            .with_children(Node::list([Node::text("x")]));
        assert!(!shallow_equal(&a, &c));
    }

    #[test]
    fn hashed_keys_are_stable() {
        assert_eq!(Key::hashed(&("row", 3)), Key::hashed(&("row", 3)));
        assert_ne!(Key::hashed(&("row", 3)), Key::hashed(&("row", 4)));
    }
}
