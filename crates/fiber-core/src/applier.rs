//! Host binding: how committed fibers become platform nodes.
//!
//! The reconciler only ever talks to the host tree through [`Applier`]. Every
//! mutating call happens inside the commit's mutation pass, and creation calls
//! happen during complete for nodes that are not yet attached to anything.

use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use crate::element::{Node, PropValue, Props};
use crate::error::NodeError;

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HostId(usize);

impl HostId {
    pub fn from_raw(raw: usize) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> usize {
        self.0
    }
}

impl fmt::Debug for HostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One attribute delta computed by [`Applier::prepare_update`].
#[derive(Debug, Clone, PartialEq)]
pub struct PropChange {
    pub name: Rc<str>,
    /// `None` removes the attribute.
    pub value: Option<PropValue>,
}

pub type UpdatePayload = Vec<PropChange>;

/// Attribute name used for text content set directly on a host node.
pub const TEXT_CONTENT: &str = "children";

/// Attribute-level diff of two prop sets, including direct text content.
pub fn diff_props(old: &Props, new: &Props) -> UpdatePayload {
    let mut changes = Vec::new();
    for (name, value) in old.attrs() {
        if new.attr(name).is_none() {
            changes.push(PropChange {
                name: Rc::from(name),
                value: None,
            });
        } else if new.attr(name) != Some(value) {
            changes.push(PropChange {
                name: Rc::from(name),
                value: new.attr(name).cloned(),
            });
        }
    }
    for (name, value) in new.attrs() {
        if old.attr(name).is_none() {
            changes.push(PropChange {
                name: Rc::from(name),
                value: Some(value.clone()),
            });
        }
    }
    let old_text = direct_text(old.children());
    let new_text = direct_text(new.children());
    if old_text != new_text {
        changes.push(PropChange {
            name: Rc::from(TEXT_CONTENT),
            value: new_text.map(|text| PropValue::Str(Rc::from(text))),
        });
    }
    changes
}

pub(crate) fn direct_text(children: &Node) -> Option<&str> {
    match children {
        Node::Text(text) => Some(text),
        _ => None,
    }
}

pub trait Applier {
    /// Per-subtree information the host threads down through host nodes
    /// (namespaces, ancestor info).
    type HostContext: Clone + fmt::Debug;

    fn root_host_context(&self, container: HostId) -> Self::HostContext;

    fn child_host_context(&self, parent: &Self::HostContext, ty: &str) -> Self::HostContext;

    fn create_instance(
        &mut self,
        ty: &str,
        props: &Props,
        context: &Self::HostContext,
    ) -> Result<HostId, NodeError>;

    fn create_text_instance(
        &mut self,
        text: &str,
        context: &Self::HostContext,
    ) -> Result<HostId, NodeError>;

    /// Attaches a child to a parent that is not yet in the host tree.
    fn append_initial_child(&mut self, parent: HostId, child: HostId) -> Result<(), NodeError>;

    /// Returns `true` when the instance needs `commit_mount` after it is attached.
    fn finalize_initial_children(&mut self, _instance: HostId, _ty: &str, _props: &Props) -> bool {
        false
    }

    fn prepare_update(
        &self,
        _instance: HostId,
        _ty: &str,
        old_props: &Props,
        new_props: &Props,
    ) -> Option<UpdatePayload> {
        let payload = diff_props(old_props, new_props);
        if payload.is_empty() {
            None
        } else {
            Some(payload)
        }
    }

    /// Host-specific rule for rendering a lone text child without a text node.
    fn should_set_text_content(&self, _ty: &str, props: &Props) -> bool {
        direct_text(props.children()).is_some()
    }

    /// In concurrent mode a subtree reported here renders at `Never` priority.
    fn should_deprioritize_subtree(&self, _ty: &str, props: &Props) -> bool {
        props.bool("hidden")
    }

    fn append_child(&mut self, parent: HostId, child: HostId) -> Result<(), NodeError>;

    fn append_child_to_container(
        &mut self,
        container: HostId,
        child: HostId,
    ) -> Result<(), NodeError> {
        self.append_child(container, child)
    }

    fn insert_before(
        &mut self,
        parent: HostId,
        child: HostId,
        before: HostId,
    ) -> Result<(), NodeError>;

    fn insert_in_container_before(
        &mut self,
        container: HostId,
        child: HostId,
        before: HostId,
    ) -> Result<(), NodeError> {
        self.insert_before(container, child, before)
    }

    fn remove_child(&mut self, parent: HostId, child: HostId) -> Result<(), NodeError>;

    fn remove_child_from_container(
        &mut self,
        container: HostId,
        child: HostId,
    ) -> Result<(), NodeError> {
        self.remove_child(container, child)
    }

    fn commit_update(
        &mut self,
        instance: HostId,
        payload: &UpdatePayload,
        ty: &str,
        old_props: &Props,
        new_props: &Props,
    ) -> Result<(), NodeError>;

    fn commit_text_update(
        &mut self,
        text_instance: HostId,
        old_text: &str,
        new_text: &str,
    ) -> Result<(), NodeError>;

    fn reset_text_content(&mut self, instance: HostId) -> Result<(), NodeError>;

    fn commit_mount(
        &mut self,
        _instance: HostId,
        _ty: &str,
        _props: &Props,
    ) -> Result<(), NodeError> {
        Ok(())
    }

    fn hide_instance(&mut self, instance: HostId) -> Result<(), NodeError>;

    fn unhide_instance(&mut self, instance: HostId, props: &Props) -> Result<(), NodeError>;

    fn hide_text_instance(&mut self, text_instance: HostId) -> Result<(), NodeError>;

    fn unhide_text_instance(&mut self, text_instance: HostId, text: &str) -> Result<(), NodeError>;

    /// Removes pre-rendered markup left behind by a dehydrated Suspense
    /// boundary that is about to render on the client.
    fn clear_dehydrated_content(
        &mut self,
        parent: HostId,
        markup: HostId,
    ) -> Result<(), NodeError> {
        self.remove_child(parent, markup)?;
        self.detach_deleted_instance(markup);
        Ok(())
    }

    /// Releases host storage for an instance that was removed from the tree.
    fn detach_deleted_instance(&mut self, _instance: HostId) {}

    fn prepare_for_commit(&mut self, _container: HostId) {}

    fn reset_after_commit(&mut self, _container: HostId) {}
}

#[derive(Debug, Clone)]
pub enum MemoryNodeKind {
    Container,
    Element {
        tag: Rc<str>,
        attrs: BTreeMap<Rc<str>, PropValue>,
        text_content: Option<String>,
    },
    Text(String),
}

#[derive(Debug, Clone)]
pub struct MemoryNode {
    pub kind: MemoryNodeKind,
    pub children: Vec<HostId>,
    pub parent: Option<HostId>,
    pub hidden: bool,
}

/// In-memory host tree, used by tests and as a reference host.
#[derive(Default)]
pub struct MemoryApplier {
    nodes: Vec<Option<MemoryNode>>,
    log: Vec<String>,
}

impl MemoryApplier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_container(&mut self) -> HostId {
        self.insert(MemoryNode {
            kind: MemoryNodeKind::Container,
            children: Vec::new(),
            parent: None,
            hidden: false,
        })
    }

    /// Builds a detached element, as if it had been produced ahead of time
    /// and attached to a container before the reconciler ran.
    pub fn create_markup(
        &mut self,
        parent: HostId,
        tag: &str,
        text: &str,
    ) -> Result<HostId, NodeError> {
        let id = self.insert(MemoryNode {
            kind: MemoryNodeKind::Element {
                tag: Rc::from(tag),
                attrs: BTreeMap::new(),
                text_content: Some(text.to_string()),
            },
            children: Vec::new(),
            parent: Some(parent),
            hidden: false,
        });
        self.node_mut(parent)?.children.push(id);
        Ok(id)
    }

    fn insert(&mut self, node: MemoryNode) -> HostId {
        let id = HostId(self.nodes.len());
        self.nodes.push(Some(node));
        id
    }

    pub fn node(&self, id: HostId) -> Result<&MemoryNode, NodeError> {
        self.nodes
            .get(id.0)
            .and_then(|slot| slot.as_ref())
            .ok_or(NodeError::Missing { id })
    }

    fn node_mut(&mut self, id: HostId) -> Result<&mut MemoryNode, NodeError> {
        self.nodes
            .get_mut(id.0)
            .and_then(|slot| slot.as_mut())
            .ok_or(NodeError::Missing { id })
    }

    pub fn len(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn children(&self, id: HostId) -> Vec<HostId> {
        self.node(id).map(|n| n.children.clone()).unwrap_or_default()
    }

    /// Mutation log since the last [`MemoryApplier::take_log`].
    pub fn take_log(&mut self) -> Vec<String> {
        std::mem::take(&mut self.log)
    }

    /// Concatenated text of all visible descendants.
    pub fn text_content(&self, id: HostId) -> String {
        let mut out = String::new();
        self.collect_text(id, &mut out);
        out
    }

    fn collect_text(&self, id: HostId, out: &mut String) {
        let Ok(node) = self.node(id) else {
            return;
        };
        if node.hidden {
            return;
        }
        match &node.kind {
            MemoryNodeKind::Text(text) => out.push_str(text),
            MemoryNodeKind::Element {
                text_content: Some(text),
                ..
            } => out.push_str(text),
            _ => {
                for child in &node.children {
                    self.collect_text(*child, out);
                }
            }
        }
    }

    pub fn dump_tree(&self, root: Option<HostId>) -> String {
        let mut output = String::new();
        if let Some(root_id) = root {
            self.dump_node(&mut output, root_id, 0);
        } else {
            output.push_str("(no root)\n");
        }
        output
    }

    fn dump_node(&self, output: &mut String, id: HostId, depth: usize) {
        let indent = "  ".repeat(depth);
        match self.node(id) {
            Ok(node) => {
                let hidden = if node.hidden { " hidden" } else { "" };
                match &node.kind {
                    MemoryNodeKind::Container => {
                        output.push_str(&format!("{indent}[{}] container\n", id.0))
                    }
                    MemoryNodeKind::Element {
                        tag,
                        attrs,
                        text_content,
                    } => {
                        let attrs: Vec<String> =
                            attrs.iter().map(|(k, v)| format!("{k}={v:?}")).collect();
                        output.push_str(&format!(
                            "{indent}[{}] <{tag}{}{}>{}{hidden}\n",
                            id.0,
                            if attrs.is_empty() { "" } else { " " },
                            attrs.join(" "),
                            text_content.as_deref().unwrap_or("")
                        ));
                    }
                    MemoryNodeKind::Text(text) => {
                        output.push_str(&format!("{indent}[{}] {text:?}{hidden}\n", id.0))
                    }
                }
                for child in &node.children {
                    self.dump_node(output, *child, depth + 1);
                }
            }
            Err(_) => output.push_str(&format!("{indent}[{}] (missing)\n", id.0)),
        }
    }

    fn label(&self, id: HostId) -> String {
        match self.node(id).map(|n| &n.kind) {
            Ok(MemoryNodeKind::Container) => format!("container#{}", id.0),
            Ok(MemoryNodeKind::Element { tag, .. }) => format!("{tag}#{}", id.0),
            Ok(MemoryNodeKind::Text(text)) => format!("{text:?}#{}", id.0),
            Err(_) => format!("?#{}", id.0),
        }
    }

    fn detach_from_parent(&mut self, child: HostId) -> Result<(), NodeError> {
        if let Some(parent) = self.node(child)?.parent {
            self.node_mut(parent)?.children.retain(|c| *c != child);
        }
        Ok(())
    }

    fn free_subtree(&mut self, id: HostId) {
        let children = self.children(id);
        for child in children {
            self.free_subtree(child);
        }
        if let Some(slot) = self.nodes.get_mut(id.0) {
            slot.take();
        }
    }
}

impl fmt::Debug for MemoryApplier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryApplier")
            .field("nodes", &self.len())
            .finish()
    }
}

impl Applier for MemoryApplier {
    type HostContext = Rc<str>;

    fn root_host_context(&self, _container: HostId) -> Self::HostContext {
        Rc::from("root")
    }

    fn child_host_context(&self, _parent: &Self::HostContext, ty: &str) -> Self::HostContext {
        Rc::from(ty)
    }

    fn create_instance(
        &mut self,
        ty: &str,
        props: &Props,
        _context: &Self::HostContext,
    ) -> Result<HostId, NodeError> {
        let attrs = props
            .attrs()
            .map(|(k, v)| (Rc::from(k), v.clone()))
            .collect();
        let text_content = if self.should_set_text_content(ty, props) {
            direct_text(props.children()).map(str::to_string)
        } else {
            None
        };
        let id = self.insert(MemoryNode {
            kind: MemoryNodeKind::Element {
                tag: Rc::from(ty),
                attrs,
                text_content,
            },
            children: Vec::new(),
            parent: None,
            hidden: false,
        });
        self.log.push(format!("create {}", self.label(id)));
        Ok(id)
    }

    fn create_text_instance(
        &mut self,
        text: &str,
        _context: &Self::HostContext,
    ) -> Result<HostId, NodeError> {
        let id = self.insert(MemoryNode {
            kind: MemoryNodeKind::Text(text.to_string()),
            children: Vec::new(),
            parent: None,
            hidden: false,
        });
        self.log.push(format!("create {}", self.label(id)));
        Ok(id)
    }

    fn append_initial_child(&mut self, parent: HostId, child: HostId) -> Result<(), NodeError> {
        self.node_mut(child)?.parent = Some(parent);
        self.node_mut(parent)?.children.push(child);
        Ok(())
    }

    fn append_child(&mut self, parent: HostId, child: HostId) -> Result<(), NodeError> {
        self.detach_from_parent(child)?;
        self.node_mut(child)?.parent = Some(parent);
        self.node_mut(parent)?.children.push(child);
        self.log
            .push(format!("append {} -> {}", self.label(child), self.label(parent)));
        Ok(())
    }

    fn insert_before(
        &mut self,
        parent: HostId,
        child: HostId,
        before: HostId,
    ) -> Result<(), NodeError> {
        self.detach_from_parent(child)?;
        let parent_node = self.node_mut(parent)?;
        let index = parent_node
            .children
            .iter()
            .position(|c| *c == before)
            .ok_or(NodeError::Missing { id: before })?;
        parent_node.children.insert(index, child);
        self.node_mut(child)?.parent = Some(parent);
        self.log.push(format!(
            "insert {} before {} in {}",
            self.label(child),
            self.label(before),
            self.label(parent)
        ));
        Ok(())
    }

    fn remove_child(&mut self, parent: HostId, child: HostId) -> Result<(), NodeError> {
        self.log
            .push(format!("remove {} from {}", self.label(child), self.label(parent)));
        self.node_mut(parent)?.children.retain(|c| *c != child);
        self.node_mut(child)?.parent = None;
        Ok(())
    }

    fn commit_update(
        &mut self,
        instance: HostId,
        payload: &UpdatePayload,
        _ty: &str,
        _old_props: &Props,
        _new_props: &Props,
    ) -> Result<(), NodeError> {
        let label = self.label(instance);
        let node = self.node_mut(instance)?;
        if let MemoryNodeKind::Element {
            attrs,
            text_content,
            ..
        } = &mut node.kind
        {
            for change in payload {
                if &*change.name == TEXT_CONTENT {
                    *text_content = match &change.value {
                        Some(PropValue::Str(text)) => Some(text.to_string()),
                        _ => None,
                    };
                    continue;
                }
                match &change.value {
                    Some(value) => {
                        attrs.insert(change.name.clone(), value.clone());
                    }
                    None => {
                        attrs.remove(&change.name);
                    }
                }
            }
        }
        self.log.push(format!("update {label}"));
        Ok(())
    }

    fn commit_text_update(
        &mut self,
        text_instance: HostId,
        _old_text: &str,
        new_text: &str,
    ) -> Result<(), NodeError> {
        let node = self.node_mut(text_instance)?;
        node.kind = MemoryNodeKind::Text(new_text.to_string());
        self.log.push(format!("text {}", self.label(text_instance)));
        Ok(())
    }

    fn reset_text_content(&mut self, instance: HostId) -> Result<(), NodeError> {
        if let MemoryNodeKind::Element { text_content, .. } = &mut self.node_mut(instance)?.kind {
            *text_content = None;
        }
        Ok(())
    }

    fn hide_instance(&mut self, instance: HostId) -> Result<(), NodeError> {
        self.node_mut(instance)?.hidden = true;
        self.log.push(format!("hide {}", self.label(instance)));
        Ok(())
    }

    fn unhide_instance(&mut self, instance: HostId, _props: &Props) -> Result<(), NodeError> {
        self.node_mut(instance)?.hidden = false;
        self.log.push(format!("unhide {}", self.label(instance)));
        Ok(())
    }

    fn hide_text_instance(&mut self, text_instance: HostId) -> Result<(), NodeError> {
        self.hide_instance(text_instance)
    }

    fn unhide_text_instance(&mut self, text_instance: HostId, text: &str) -> Result<(), NodeError> {
        let node = self.node_mut(text_instance)?;
        node.hidden = false;
        node.kind = MemoryNodeKind::Text(text.to_string());
        self.log.push(format!("unhide {}", self.label(text_instance)));
        Ok(())
    }

    fn detach_deleted_instance(&mut self, instance: HostId) {
        let detached = self.node(instance).map(|n| n.parent.is_none()).unwrap_or(false);
        if detached {
            self.free_subtree(instance);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diff_reports_added_changed_and_removed_attrs() {
        let old = Props::new().with_attr("a", 1).with_attr("b", 2);
        let new = Props::new().with_attr("b", 3).with_attr("c", 4);
        let diff = diff_props(&old, &new);
        assert_eq!(diff.len(), 3);
        assert!(diff.iter().any(|c| &*c.name == "a" && c.value.is_none()));
        assert!(diff
            .iter()
            .any(|c| &*c.name == "b" && c.value == Some(PropValue::Int(3))));
        assert!(diff
            .iter()
            .any(|c| &*c.name == "c" && c.value == Some(PropValue::Int(4))));
    }

    #[test]
    fn memory_applier_tracks_text_and_hidden_nodes() {
        let mut applier = MemoryApplier::new();
        let ctx = applier.root_host_context(HostId(0));
        let container = applier.create_container();
        let div = applier
            .create_instance("div", &Props::new(), &ctx)
            .expect("create div");
        let text = applier.create_text_instance("hi", &ctx).expect("create text");
        applier.append_initial_child(div, text).expect("append initial");
        applier.append_child(container, div).expect("append");
        assert_eq!(applier.text_content(container), "hi");
        applier.hide_instance(div).expect("hide");
        assert_eq!(applier.text_content(container), "");
        assert!(applier.dump_tree(Some(container)).contains("<div>"));
    }
}
