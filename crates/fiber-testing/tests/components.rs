//! Context, memoization, class state, refs and profiling through the test
//! renderer.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use fiber_core::{
    state, CapturedError, ClassType, Component, Context, Element, ElementType, ForwardRefType,
    FunctionComponent,
    MemoType, Node, ProfilerPhase, ProfilerReport, Props, Ref, RefTarget, RenderResult, StateValue,
    Thrown, Updater,
};
use fiber_testing::TestRenderer;

#[test]
fn context_change_reaches_consumers_behind_memo_bailouts() {
    let mut r = TestRenderer::concurrent();
    let theme = Context::new("light".to_string());
    let static_renders = Rc::new(Cell::new(0));

    let themed = {
        let theme = theme.clone();
        MemoType::new(ElementType::Function(FunctionComponent::new("Themed", move |cx, _props| {
            Ok(Node::text(cx.use_context(&theme)))
        })))
    };
    let fixed = {
        let renders = static_renders.clone();
        MemoType::new(ElementType::Function(FunctionComponent::new("Static", move |_cx, _props| {
            renders.set(renders.get() + 1);
            Ok(Node::text("|"))
        })))
    };
    let tree = |value: &str| {
        theme.provider(
            value.to_string(),
            Node::list([
                themed.element(Props::new()).into(),
                fixed.element(Props::new()).into(),
                theme.consumer(|value| Node::text(format!("({value})"))).into(),
            ]),
        )
    };

    r.render_and_flush(tree("dark")).expect("mount");
    assert_eq!(r.text(), "dark|(dark)");

    r.render_and_flush(tree("blue")).expect("update");
    assert_eq!(r.text(), "blue|(blue)");
    assert_eq!(static_renders.get(), 1, "memoized sibling bailed out");
}

#[test]
fn consumers_without_a_provider_read_the_default() {
    let mut r = TestRenderer::legacy();
    let locale = Context::new("en".to_string());
    let reader = {
        let locale = locale.clone();
        FunctionComponent::new("Locale", move |cx, _props| Ok(Node::text(cx.use_context(&locale))))
    };
    r.render(reader.element(Props::new())).expect("mount");
    assert_eq!(r.text(), "en");
}

#[test]
fn custom_memo_compare_controls_rerendering() {
    let mut r = TestRenderer::legacy();
    let renders = Rc::new(Cell::new(0));
    let label = {
        let renders = renders.clone();
        FunctionComponent::new("Label", move |_cx, props| {
            renders.set(renders.get() + 1);
            Ok(Node::text(props.str("text").unwrap_or_default().to_string()))
        })
    };
    // Only the "id" attribute matters for re-rendering.
    let memo = MemoType::with_compare(ElementType::Function(label), |old, new| {
        old.int("id") == new.int("id")
    });

    r.render(memo.element(Props::new().with_attr("id", 1).with_attr("text", "a")))
        .expect("mount");
    r.render(memo.element(Props::new().with_attr("id", 1).with_attr("text", "b")))
        .expect("same id");
    assert_eq!(r.text(), "a");
    r.render(memo.element(Props::new().with_attr("id", 2).with_attr("text", "c")))
        .expect("new id");
    assert_eq!(r.text(), "c");
    assert_eq!(renders.get(), 2);
}

struct Clicker {
    log: Rc<RefCell<Vec<String>>>,
}

impl Component for Clicker {
    fn render(&self, _props: &Props, state: &StateValue) -> RenderResult {
        let clicks = state.downcast_ref::<i32>().copied().unwrap_or_default();
        Ok(Node::text(format!("clicks: {clicks}")))
    }

    fn component_did_update(
        &mut self,
        _props: &Props,
        state: &StateValue,
        _prev_props: &Props,
        prev_state: &StateValue,
        _snapshot: Option<StateValue>,
    ) -> Result<(), CapturedError> {
        let before = prev_state.downcast_ref::<i32>().copied().unwrap_or_default();
        let after = state.downcast_ref::<i32>().copied().unwrap_or_default();
        self.log.borrow_mut().push(format!("{before} -> {after}"));
        Ok(())
    }
}

#[test]
fn class_updates_run_callbacks_after_commit() {
    let mut r = TestRenderer::concurrent();
    let log: Rc<RefCell<Vec<String>>> = Rc::default();
    let updater: Rc<RefCell<Option<Updater>>> = Rc::default();
    let class = {
        let log = log.clone();
        let updater = updater.clone();
        ClassType::new("Clicker", move |_props: &Props, handle: Updater| {
            *updater.borrow_mut() = Some(handle);
            (Box::new(Clicker { log: log.clone() }) as Box<dyn Component>, state(0i32))
        })
    };
    r.render_and_flush(class.element(Props::new())).expect("mount");
    assert_eq!(r.text(), "clicks: 0");

    let handle = updater.borrow().clone().expect("constructed");
    let callback_log = log.clone();
    r.act(|_| {
        handle.update_state(|prev, _props| {
            state(prev.downcast_ref::<i32>().copied().unwrap_or_default() + 1)
        });
        handle.set_state_with_callback(state(5i32), move || {
            callback_log.borrow_mut().push("callback".into())
        });
    })
    .expect("updates");

    assert_eq!(r.text(), "clicks: 5");
    assert_eq!(*log.borrow(), vec!["0 -> 5".to_string(), "callback".to_string()]);
}

struct Boundary;

impl Component for Boundary {
    fn render(&self, props: &Props, state: &StateValue) -> RenderResult {
        match state.downcast_ref::<String>() {
            Some(message) => Ok(Node::text(format!("recovered from {message}"))),
            None => Ok(props.children().clone()),
        }
    }
}

#[test]
fn concurrent_error_is_retried_synchronously_and_caught() {
    let mut r = TestRenderer::concurrent();
    let attempts = Rc::new(Cell::new(0));
    let flaky = {
        let attempts = attempts.clone();
        FunctionComponent::new("Flaky", move |_cx, _props| {
            attempts.set(attempts.get() + 1);
            Err(Thrown::error("kaput"))
        })
    };
    let boundary = ClassType::new("Boundary", |_props: &Props, _updater: Updater| {
        (Box::new(Boundary) as Box<dyn Component>, state(()))
    })
    .with_derived_state_from_error(|error| state(error.message().to_string()));

    r.render_and_flush(boundary.element(Props::new().with_children(flaky.element(Props::new()))))
        .expect("caught");
    assert_eq!(r.text(), "recovered from kaput");
    assert!(attempts.get() >= 2, "the failed render was retried");
}

#[test]
fn forward_ref_passes_the_ref_to_a_host_child() {
    let mut r = TestRenderer::legacy();
    let input = ForwardRefType::new("Input", |_cx, props, ref_| {
        let mut element = Element::host("input").attr(
            "value",
            props.str("value").unwrap_or_default(),
        );
        if let Some(ref_) = ref_ {
            element = element.with_ref(ref_.clone());
        }
        Ok(element.into())
    });
    let (ref_, object) = Ref::object();
    r.render(input.element(Props::new().with_attr("value", "x")).with_ref(ref_))
        .expect("mount");
    let host = r.children()[0];
    assert!(matches!(*object.borrow(), Some(RefTarget::Host(id)) if id == host));
}

#[test]
fn callback_refs_see_attach_and_detach() {
    let mut r = TestRenderer::legacy();
    let seen: Rc<RefCell<Vec<bool>>> = Rc::default();
    let ref_ = {
        let seen = seen.clone();
        Ref::callback(move |target| seen.borrow_mut().push(target.is_some()))
    };
    r.render(Element::host("div").with_ref(ref_)).expect("mount");
    r.render(Node::Empty).expect("unmount");
    assert_eq!(*seen.borrow(), vec![true, false]);
}

#[test]
fn profiler_reports_mount_and_update_phases() {
    let mut r = TestRenderer::legacy();
    let reports: Rc<RefCell<Vec<ProfilerReport>>> = Rc::default();
    let tree = |text: &str| {
        let reports = reports.clone();
        Element::profiler(
            "sidebar",
            move |report| reports.borrow_mut().push(report.clone()),
            Element::host("nav").child(text.to_string()),
        )
    };

    r.advance_time(40);
    r.render(tree("one")).expect("mount");
    r.render(tree("two")).expect("update");

    let reports = reports.borrow();
    let phases: Vec<ProfilerPhase> = reports.iter().map(|report| report.phase).collect();
    assert_eq!(phases, vec![ProfilerPhase::Mount, ProfilerPhase::Update]);
    assert!(reports.iter().all(|report| &*report.id == "sidebar"));
    assert!(reports.iter().all(|report| report.start_time <= report.commit_time));
}
