//! Randomized checks of keyed reconciliation and effect ordering.

use std::cell::RefCell;
use std::rc::Rc;

use fiber_core::{Element, FunctionComponent, HostId, Node, Props};
use fiber_testing::TestRenderer;
use proptest::prelude::*;
use proptest::sample::subsequence;

fn keyed_list(keys: &[usize]) -> Element {
    let rows: Vec<Node> = keys
        .iter()
        .map(|&key| Element::host("li").with_key(key as u64).child(format!("{key},")).into())
        .collect();
    Element::host("ul").children(rows)
}

fn list_items(r: &TestRenderer) -> Vec<HostId> {
    let ul = r.children()[0];
    r.applier().children(ul)
}

/// A chain of `depth` components whose innermost level renders `leaves`
/// host children. Every level logs its depth from a layout effect.
fn nested(depth: usize, leaves: usize, log: &Rc<RefCell<Vec<usize>>>) -> Element {
    let innermost = {
        let log = log.clone();
        FunctionComponent::new("Leaf", move |cx, _props| {
            let log = log.clone();
            cx.use_layout_effect(Some(()), move || {
                log.borrow_mut().push(depth);
                Ok(None)
            });
            let rows: Vec<Node> =
                (0..leaves).map(|i| Element::host("i").child(i.to_string()).into()).collect();
            Ok(Node::list(rows))
        })
    };
    let mut element = innermost.element(Props::new());
    for level in (0..depth).rev() {
        let log = log.clone();
        let child = element;
        let component = FunctionComponent::new("Level", move |cx, _props| {
            let log = log.clone();
            cx.use_layout_effect(Some(()), move || {
                log.borrow_mut().push(level);
                Ok(None)
            });
            Ok(Element::host("div").child(child.clone()).into())
        });
        element = component.element(Props::new());
    }
    element
}

fn shuffled_survivors() -> impl Strategy<Value = (usize, Vec<usize>)> {
    (1usize..12).prop_flat_map(|n| {
        let all: Vec<usize> = (0..n).collect();
        (Just(n), subsequence(all, 0..=n).prop_shuffle())
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn keyed_reorders_keep_host_nodes((n, next) in shuffled_survivors()) {
        let mut r = TestRenderer::legacy();
        let first: Vec<usize> = (0..n).collect();
        r.render(keyed_list(&first)).expect("mount");
        let before = list_items(&r);
        prop_assert_eq!(before.len(), n);

        r.render(keyed_list(&next)).expect("reorder");
        let expected_text: String = next.iter().map(|key| format!("{key},")).collect();
        prop_assert_eq!(r.text(), expected_text);
        let expected_nodes: Vec<HostId> = next.iter().map(|&key| before[key]).collect();
        prop_assert_eq!(list_items(&r), expected_nodes);
    }

    #[test]
    fn concurrent_slices_commit_the_same_list(n in 1usize..20, units in 1usize..8) {
        let keys: Vec<usize> = (0..n).rev().collect();
        let mut sliced = TestRenderer::concurrent();
        sliced.render(keyed_list(&keys)).expect("schedule");
        while sliced.flush_until_yield(units).expect("slice") {}

        let mut sync = TestRenderer::legacy();
        sync.render(keyed_list(&keys)).expect("mount");
        prop_assert_eq!(sliced.text(), sync.text());
        prop_assert!(!sliced.has_pending_work());
    }

    #[test]
    fn layout_effects_run_children_first(depth in 0usize..8, leaves in 0usize..4) {
        let log: Rc<RefCell<Vec<usize>>> = Rc::default();
        let mut r = TestRenderer::legacy();
        r.render(nested(depth, leaves, &log)).expect("mount");
        let expected: Vec<usize> = (0..=depth).rev().collect();
        prop_assert_eq!(&*log.borrow(), &expected);
    }
}
