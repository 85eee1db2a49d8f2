use super::*;
use crate::fiber::FiberMode;

fn keyed(keys: &[&str]) -> Node {
    Node::list(keys.iter().map(|k| Node::from(Element::host("li").with_key(*k))))
}

struct Tree {
    arena: FiberArena,
    fresh: Vec<FiberId>,
    current: FiberId,
}

impl Tree {
    fn mount(children: &Node) -> Self {
        let mut arena = FiberArena::new();
        let mut fresh = Vec::new();
        let current = arena.alloc(fiber_from_element(
            &Element::host("ul"),
            FiberMode::empty(),
            ExpirationTime::SYNC,
        ));
        let child = ChildReconciler::new(&mut arena, &mut fresh, false, ExpirationTime::SYNC)
            .reconcile_child_fibers(current, None, children);
        arena[current].child = child;
        Self { arena, fresh, current }
    }

    /// Reconciles `children` against the mounted list and returns the new
    /// first child together with the parent's recorded deletions.
    fn update(&mut self, children: &Node) -> (FiberId, Option<FiberId>) {
        let props = self.arena[self.current].pending_props.clone();
        let wip = self.arena.create_work_in_progress(self.current, props);
        let current_first = self.arena[self.current].child;
        let first = ChildReconciler::new(
            &mut self.arena,
            &mut self.fresh,
            true,
            ExpirationTime::SYNC,
        )
        .reconcile_child_fibers(wip, current_first, children);
        (wip, first)
    }

    fn keys(&self, first: Option<FiberId>) -> Vec<(String, bool)> {
        let mut out = Vec::new();
        let mut next = first;
        while let Some(id) = next {
            let fiber = &self.arena[id];
            let key = fiber.key.as_ref().map(|k| k.as_str().to_string()).unwrap_or_default();
            out.push((key, fiber.flags.contains(EffectFlags::PLACEMENT)));
            next = fiber.sibling;
        }
        out
    }
}

#[test]
fn mount_tracks_no_side_effects() {
    let tree = Tree::mount(&keyed(&["a", "b"]));
    let first = tree.arena[tree.current].child;
    assert_eq!(
        tree.keys(first),
        vec![("a".to_string(), false), ("b".to_string(), false)]
    );
    assert_eq!(tree.fresh.len(), 2);
}

#[test]
fn moving_an_item_forward_places_only_it() {
    let mut tree = Tree::mount(&keyed(&["a", "b", "c"]));
    let (wip, first) = tree.update(&keyed(&["b", "c", "a"]));
    assert_eq!(
        tree.keys(first),
        vec![
            ("b".to_string(), false),
            ("c".to_string(), false),
            ("a".to_string(), true),
        ]
    );
    assert!(tree.arena[wip].effects.is_empty());
}

#[test]
fn removed_keys_are_deleted_in_order() {
    let mut tree = Tree::mount(&keyed(&["a", "b", "c", "d"]));
    let (wip, first) = tree.update(&keyed(&["d", "b"]));
    assert_eq!(tree.keys(first).len(), 2);
    let deleted: Vec<String> = tree.arena[wip]
        .effects
        .iter()
        .map(|id| {
            assert_eq!(tree.arena[*id].flags, EffectFlags::DELETION);
            tree.arena[*id].key.as_ref().map(|k| k.as_str().to_string()).unwrap_or_default()
        })
        .collect();
    assert_eq!(deleted, vec!["a".to_string(), "c".to_string()]);
}

#[test]
fn type_change_replaces_the_fiber() {
    let mut tree = Tree::mount(&Node::from(Element::host("span")));
    let (wip, first) = tree.update(&Node::from(Element::host("div")));
    let first = first.expect("child");
    assert!(tree.arena[first].alternate.is_none());
    assert!(tree.arena[first].flags.contains(EffectFlags::PLACEMENT));
    assert_eq!(tree.arena[wip].effects.len(), 1);
}

#[test]
fn unkeyed_fragment_is_transparent_and_text_reuses_fibers() {
    let mut tree = Tree::mount(&Node::from(Element::fragment(Node::list([
        Node::text("x"),
        Node::text("y"),
    ]))));
    let (_, first) = tree.update(&Node::list([Node::text("x2"), Node::text("y2")]));
    let first = first.expect("child");
    assert_eq!(tree.arena[first].tag, WorkTag::HostText);
    assert!(tree.arena[first].alternate.is_some());
    assert_eq!(tree.arena[first].pending_props.text(), Some("x2"));
}

#[test]
fn empty_slots_keep_later_fibers_in_place() {
    let li = || Node::from(Element::host("li"));
    let mut tree = Tree::mount(&Node::list([li(), Node::Empty, li()]));
    let (wip, first) = tree.update(&Node::list([li(), li(), li()]));
    let mut children = Vec::new();
    let mut next = first;
    while let Some(id) = next {
        children.push(id);
        next = tree.arena[id].sibling;
    }
    assert_eq!(children.len(), 3);
    assert!(tree.arena[children[0]].alternate.is_some());
    assert!(tree.arena[children[1]].alternate.is_none());
    assert!(tree.arena[children[1]].flags.contains(EffectFlags::PLACEMENT));
    assert!(tree.arena[children[2]].alternate.is_some());
    assert!(!tree.arena[children[2]].flags.contains(EffectFlags::PLACEMENT));
    assert!(tree.arena[wip].effects.is_empty());
}

#[test]
fn clone_child_fibers_pairs_every_child() {
    let mut tree = Tree::mount(&keyed(&["a", "b"]));
    let props = tree.arena[tree.current].pending_props.clone();
    let wip = tree.arena.create_work_in_progress(tree.current, props);
    clone_child_fibers(&mut tree.arena, wip);
    let children = tree.arena.children(wip);
    assert_eq!(children.len(), 2);
    for child in children {
        assert!(tree.arena[child].alternate.is_some());
        assert_eq!(tree.arena[child].return_fiber, Some(wip));
    }
}
