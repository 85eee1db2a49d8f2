//! End-to-end checks of render, unwind and commit against the in-memory
//! host, on legacy roots so every update commits synchronously.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::test_support::RecordingScheduler;
use crate::{
    state, CapturedError, ClassType, Component, EffectFlags, Element, ExpirationTime, FiberId,
    FunctionComponent,
    HostId, MemoryApplier, Node, PriorityLevel, Props, Reconciler, ReconcileError, Ref, RefTarget,
    RenderResult,
    RootId, RootMode, ScheduledTask, StateSetter, StateValue, Thenable, Thrown, Updater, WorkTag,
};

type Log = Rc<RefCell<Vec<String>>>;

struct Fixture {
    reconciler: Reconciler<MemoryApplier>,
    root: RootId,
    container: HostId,
}

impl Fixture {
    fn legacy() -> Self {
        Self::new(RootMode::Legacy)
    }

    /// Concurrent work only runs when the test feeds tasks to `run_task`.
    fn concurrent() -> Self {
        Self::new(RootMode::Concurrent)
    }

    fn new(mode: RootMode) -> Self {
        let mut applier = MemoryApplier::new();
        let container = applier.create_container();
        let mut reconciler = Reconciler::new(applier, Rc::new(RecordingScheduler::default()));
        let root = reconciler.create_root(container, mode);
        Self {
            reconciler,
            root,
            container,
        }
    }

    fn render(&mut self, node: impl Into<Node>) -> Result<(), ReconcileError> {
        self.reconciler.update_container(self.root, node).map(|_| ())
    }

    fn text(&self) -> String {
        self.reconciler.applier().text_content(self.container)
    }

    fn host_children(&self) -> Vec<HostId> {
        self.reconciler.applier().children(self.container)
    }

    fn perform_work(&mut self) {
        self.reconciler
            .run_task(ScheduledTask::PerformWork(self.root), false)
            .expect("perform work");
    }

    /// Every fiber of the committed tree, parents before children.
    fn current_fibers(&self) -> Vec<FiberId> {
        let arena = self.reconciler.arena();
        let mut out = Vec::new();
        let mut stack = vec![self.reconciler.roots[&self.root].current];
        while let Some(id) = stack.pop() {
            out.push(id);
            stack.extend(arena.children(id).into_iter().rev());
        }
        out
    }

    fn process_wakeups(&mut self) {
        self.reconciler
            .run_task(ScheduledTask::ProcessUpdates, false)
            .expect("process wakeups");
    }
}

fn item(key: &str) -> Element {
    Element::host("li").with_key(key).child(key)
}

struct Lifecycle {
    log: Log,
}

impl Component for Lifecycle {
    fn render(&self, props: &Props, _state: &StateValue) -> RenderResult {
        Ok(props.children().clone())
    }

    fn component_did_mount(
        &mut self,
        _props: &Props,
        _state: &StateValue,
    ) -> Result<(), CapturedError> {
        self.log.borrow_mut().push("did mount".into());
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
        self.log.borrow_mut().push("did update".into());
        Ok(())
    }

    fn component_will_unmount(&mut self) -> Result<(), CapturedError> {
        self.log.borrow_mut().push("will unmount".into());
        Ok(())
    }
}

fn lifecycle_class(log: &Log) -> ClassType {
    let log = log.clone();
    ClassType::new("Lifecycle", move |_props: &Props, _updater: Updater| {
        (Box::new(Lifecycle { log: log.clone() }) as Box<dyn Component>, state(()))
    })
}

struct Boundary {
    log: Log,
}

impl Component for Boundary {
    fn render(&self, props: &Props, state: &StateValue) -> RenderResult {
        match state.downcast_ref::<String>() {
            Some(message) => Ok(Node::text(format!("caught: {message}"))),
            None => Ok(props.children().clone()),
        }
    }

    fn component_did_catch(&mut self, error: &CapturedError) {
        self.log.borrow_mut().push(format!("did catch {}", error.message()));
    }
}

fn boundary_class(log: &Log) -> ClassType {
    let log = log.clone();
    ClassType::new("Boundary", move |_props: &Props, _updater: Updater| {
        (Box::new(Boundary { log: log.clone() }) as Box<dyn Component>, state(()))
    })
    .with_derived_state_from_error(|error| state(error.message().to_string()))
}

fn thrower() -> FunctionComponent {
    FunctionComponent::new("Thrower", |_cx, _props| Err(Thrown::error("boom")))
}

#[test]
fn mounts_updates_and_clears_host_tree() {
    let mut f = Fixture::legacy();
    f.render(Element::host("div").child(Element::host("span").child("a")).child("b"))
        .expect("mount");
    assert_eq!(f.text(), "ab");
    let div = f.host_children()[0];

    f.render(Element::host("div").child(Element::host("span").child("a2")).child("b"))
        .expect("update");
    assert_eq!(f.text(), "a2b");
    assert_eq!(f.host_children(), vec![div], "the div is updated in place");

    f.render(Node::Empty).expect("clear");
    assert_eq!(f.text(), "");
    assert!(f.host_children().is_empty());
}

#[test]
fn keyed_reorder_moves_existing_host_nodes() {
    let mut f = Fixture::legacy();
    f.render(Element::host("ul").children(vec![item("a"), item("b"), item("c")]))
        .expect("mount");
    let ul = f.host_children()[0];
    let before = f.reconciler.applier().children(ul);

    f.render(Element::host("ul").children(vec![item("c"), item("a"), item("b")]))
        .expect("reorder");
    let after = f.reconciler.applier().children(ul);
    assert_eq!(after, vec![before[2], before[0], before[1]]);
    assert_eq!(f.text(), "cab");
}

#[test]
fn class_lifecycles_follow_mount_update_unmount() {
    let mut f = Fixture::legacy();
    let log: Log = Rc::default();
    let class = lifecycle_class(&log);

    f.render(class.element(Props::new().with_children("one"))).expect("mount");
    f.render(class.element(Props::new().with_children("two"))).expect("update");
    assert_eq!(f.text(), "two");
    f.render(Node::Empty).expect("unmount");

    assert_eq!(*log.borrow(), vec!["did mount", "did update", "will unmount"]);
}

#[test]
fn error_boundary_renders_derived_state() {
    let mut f = Fixture::legacy();
    let log: Log = Rc::default();
    let boundary = boundary_class(&log);

    let child = Element::host("p").child(thrower().element(Props::new()));
    f.render(boundary.element(Props::new().with_children(child)))
        .expect("caught errors do not escape");

    assert_eq!(f.text(), "caught: boom");
    assert_eq!(*log.borrow(), vec!["did catch boom"]);
}

#[test]
fn uncaught_error_unmounts_root_and_reports() {
    let mut f = Fixture::legacy();
    f.render(Element::host("div").child("kept")).expect("mount");

    let error = f
        .render(Element::host("div").child(thrower().element(Props::new())))
        .expect_err("nothing catches the error");
    match error {
        ReconcileError::Uncaught(error) => {
            assert_eq!(error.message(), "boom");
            assert!(error.component_stack().iter().any(|name| name == "Thrower"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(f.text(), "");
}

#[test]
fn object_refs_attach_and_detach() {
    let mut f = Fixture::legacy();
    let (ref_, object) = Ref::object();
    f.render(Element::host("div").with_ref(ref_.clone())).expect("mount");
    let div = f.host_children()[0];
    assert!(matches!(*object.borrow(), Some(RefTarget::Host(id)) if id == div));

    f.render(Node::Empty).expect("unmount");
    assert!(object.borrow().is_none());
}

#[test]
fn layout_effects_run_in_commit_and_passive_effects_wait() {
    let mut f = Fixture::legacy();
    let log: Log = Rc::default();
    let component = {
        let log = log.clone();
        FunctionComponent::new("Effects", move |cx, _props| {
            let layout = log.clone();
            cx.use_layout_effect(None::<()>, move || {
                layout.borrow_mut().push("layout".into());
                Ok(None)
            });
            let passive = log.clone();
            cx.use_effect(Some(()), move || {
                passive.borrow_mut().push("passive".into());
                let cleanup = passive.clone();
                Ok(Some(Box::new(move || cleanup.borrow_mut().push("passive cleanup".into())) as _))
            });
            Ok(Node::text("x"))
        })
    };

    f.render(component.element(Props::new())).expect("mount");
    assert_eq!(*log.borrow(), vec!["layout"]);
    assert!(f.reconciler.has_pending_passive_effects());
    assert!(f.reconciler.flush_passive_effects().expect("flush"));
    assert_eq!(*log.borrow(), vec!["layout", "passive"]);

    f.render(Node::Empty).expect("unmount");
    f.reconciler.flush_passive_effects().expect("flush");
    assert_eq!(log.borrow().last().map(String::as_str), Some("passive cleanup"));
}

#[test]
fn legacy_suspense_shows_fallback_until_resolved() {
    let mut f = Fixture::legacy();
    let data = Thenable::new();
    let reader = {
        let data = data.clone();
        FunctionComponent::new("Reader", move |_cx, _props| match data.value::<String>() {
            Some(text) => Ok(Node::text(text)),
            None => Err(Thrown::Suspend(data.clone())),
        })
    };

    f.render(Element::suspense(
        "loading",
        Node::list([Node::text("static "), reader.element(Props::new()).into()]),
    ))
    .expect("mount");
    assert_eq!(f.text(), "loading");

    data.resolve("done".to_string());
    f.process_wakeups();
    assert_eq!(f.text(), "static done");
}

#[test]
fn suspending_without_boundary_is_an_error() {
    let mut f = Fixture::legacy();
    let pending = Thenable::new();
    let component = {
        let pending = pending.clone();
        FunctionComponent::new("Waits", move |_cx, _props| Err(Thrown::Suspend(pending.clone())))
    };
    let error = f.render(component.element(Props::new())).expect_err("no boundary");
    assert!(matches!(error, ReconcileError::Uncaught(_)));
}

#[test]
fn portal_children_mount_into_their_container() {
    let mut f = Fixture::legacy();
    let portal_target = f.reconciler.applier_mut().create_container();
    f.render(Element::host("div").child(Element::portal(
        portal_target,
        Element::host("b").child("inside"),
    )))
        .expect("mount");
    assert_eq!(f.reconciler.applier().text_content(portal_target), "inside");
    assert_eq!(f.text(), "");

    f.render(Node::Empty).expect("unmount");
    assert!(f.reconciler.applier().children(portal_target).is_empty());
}


#[test]
fn identical_props_bail_out_without_update_effects() {
    let mut f = Fixture::legacy();
    let leaf_renders = Rc::new(Cell::new(0));
    let leaf = {
        let renders = leaf_renders.clone();
        FunctionComponent::new("Leaf", move |_cx, _props| {
            renders.set(renders.get() + 1);
            Ok(Node::text("leaf"))
        })
    };
    // One element, so every parent render hands the div the same props.
    let shared = Element::host("div").attr("x", 1).child(leaf.element(Props::new()));
    let slot: Rc<RefCell<Option<StateSetter<i32>>>> = Rc::default();
    let parent = {
        let slot = slot.clone();
        FunctionComponent::new("Parent", move |cx, _props| {
            let (count, set) = cx.use_state(|| 0);
            *slot.borrow_mut() = Some(set);
            Ok(Node::list([Node::text(count.to_string()), shared.clone().into()]))
        })
    };
    f.render(parent.element(Props::new())).expect("mount");
    let div = f.host_children()[1];
    f.reconciler.applier_mut().take_log();

    slot.borrow().clone().expect("rendered").set(1);
    f.process_wakeups();

    assert_eq!(f.text(), "1leaf");
    assert_eq!(f.host_children()[1], div, "the host node is reused");
    assert_eq!(leaf_renders.get(), 1, "the child was not re-rendered");
    let log = f.reconciler.applier_mut().take_log();
    assert!(!log.iter().any(|op| op.starts_with("update")), "host log: {log:?}");
    let arena = f.reconciler.arena();
    let div_fiber = f
        .current_fibers()
        .into_iter()
        .find(|&id| arena[id].host_node() == Some(div))
        .expect("div fiber");
    assert!(!arena[div_fiber].flags().contains(EffectFlags::UPDATE));
}

#[test]
fn scheduled_updates_raise_every_ancestor_on_both_buffers() {
    let mut f = Fixture::concurrent();
    let slot: Rc<RefCell<Option<StateSetter<i32>>>> = Rc::default();
    let counter = {
        let slot = slot.clone();
        FunctionComponent::new("Counter", move |cx, _props| {
            let (count, set) = cx.use_state(|| 0);
            *slot.borrow_mut() = Some(set);
            Ok(Node::text(count.to_string()))
        })
    };
    let tree = |label: &str| {
        Element::host("section")
            .attr("label", label)
            .child(Element::host("div").child(counter.element(Props::new())))
    };
    // Two passes so every fiber has an alternate.
    f.render(tree("a")).expect("mount");
    f.perform_work();
    f.render(tree("b")).expect("update");
    f.perform_work();
    assert_eq!(f.text(), "0");

    let set = slot.borrow().clone().expect("rendered");
    let target = f
        .current_fibers()
        .into_iter()
        .find(|&id| f.reconciler.arena()[id].tag() == WorkTag::FunctionComponent)
        .expect("counter fiber");

    for priority in [PriorityLevel::Low, PriorityLevel::UserBlocking] {
        f.reconciler
            .run_with_priority(priority, |_| set.update(|n| n + 1))
            .expect("schedule");
        f.process_wakeups();

        let arena = f.reconciler.arena();
        let time = arena[target].expiration_time();
        assert_ne!(time, ExpirationTime::NO_WORK);
        let alternate = arena[target].alternate.expect("alternate");
        assert!(arena[alternate].expiration_time() >= time);

        let mut ancestor = arena[target].return_fiber;
        let mut depth = 0;
        while let Some(id) = ancestor {
            assert!(arena[id].child_expiration_time() >= time, "ancestor {depth}");
            let alternate = arena[id].alternate.expect("ancestor alternate");
            assert!(arena[alternate].child_expiration_time() >= time, "ancestor {depth} alternate");
            ancestor = arena[id].return_fiber;
            depth += 1;
        }
        assert!(depth >= 3, "walked up to the root");
    }
}

struct FailsOnUnmount;

impl Component for FailsOnUnmount {
    fn render(&self, _props: &Props, _state: &StateValue) -> RenderResult {
        Ok(Node::text("alive"))
    }

    fn component_will_unmount(&mut self) -> Result<(), CapturedError> {
        Err(CapturedError::new("teardown failed"))
    }
}

#[test]
fn unmount_root_reports_teardown_errors_and_keeps_the_root() {
    let mut f = Fixture::legacy();
    let class = ClassType::new("FailsOnUnmount", |_props: &Props, _updater: Updater| {
        (Box::new(FailsOnUnmount) as Box<dyn Component>, state(()))
    });
    f.render(class.element(Props::new())).expect("mount");

    let error = f.reconciler.unmount_root(f.root).expect_err("teardown error surfaces");
    match error {
        ReconcileError::Uncaught(error) => assert_eq!(error.message(), "teardown failed"),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(f.reconciler.root_container(f.root), Some(f.container));
}
