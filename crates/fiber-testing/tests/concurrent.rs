//! Time slicing, interruption and priority behavior of concurrent roots.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use fiber_core::{
    Element, FunctionComponent, Node, PriorityLevel, Props, ReconcileError, ReconcilerConfig,
    RootMode,
    ScheduledTask, StateSetter,
};
use fiber_testing::TestRenderer;

type Slot<S> = Rc<RefCell<Option<StateSetter<S>>>>;

fn counter(slot: &Slot<i32>, renders: &Rc<Cell<usize>>) -> FunctionComponent {
    let slot = slot.clone();
    let renders = renders.clone();
    FunctionComponent::new("Counter", move |cx, _props| {
        renders.set(renders.get() + 1);
        let (count, set) = cx.use_state(|| 0);
        *slot.borrow_mut() = Some(set);
        Ok(Node::text(count.to_string()))
    })
}

fn setter<S>(slot: &Slot<S>) -> StateSetter<S> {
    slot.borrow().clone().expect("component rendered")
}

fn items(renders: &Rc<Cell<usize>>, count: usize) -> Element {
    let renders = renders.clone();
    let item = FunctionComponent::new("Item", move |_cx, props| {
        renders.set(renders.get() + 1);
        Ok(Element::host("li").child(props.str("label").unwrap_or_default().to_string()).into())
    });
    let rows: Vec<Node> = (0..count)
        .map(|i| {
            item.element(Props::new().with_attr("label", i.to_string()))
                .with_key(i as u64)
                .into()
        })
        .collect();
    Element::host("ul").children(rows)
}

#[test]
fn yielded_render_resumes_without_redoing_finished_work() {
    let mut r = TestRenderer::concurrent();
    let renders = Rc::new(Cell::new(0));
    r.render(items(&renders, 5)).expect("schedule");

    let more = r.flush_until_yield(4).expect("slice");
    assert!(more, "the render yielded before finishing");
    assert_eq!(r.text(), "", "nothing commits mid-render");
    let partial = renders.get();
    assert!(partial >= 1 && partial < 5, "rendered {partial} items in the first slice");

    r.flush_all().expect("finish");
    assert_eq!(r.text(), "01234");
    assert_eq!(renders.get(), 5);
}

#[test]
fn sync_update_interrupts_a_pending_render() {
    let mut r = TestRenderer::concurrent();
    r.render(Element::host("p").child("async")).expect("schedule");
    r.flush_until_yield(1).expect("slice");

    let root = r.root();
    r.reconciler_mut()
        .flush_sync(|reconciler| {
            reconciler.update_container(root, Element::host("p").child("sync"))
        })
        .expect("flush sync")
        .expect("update");
    assert_eq!(r.text(), "sync");

    r.flush_all().expect("rebase");
    assert_eq!(r.text(), "sync", "the later update wins after rebasing");
}

#[test]
fn starved_work_expires_and_renders_synchronously() {
    let mut r = TestRenderer::concurrent();
    r.render(Element::host("p").child("late")).expect("schedule");
    r.flush_expired().expect("nothing expired yet");
    assert_eq!(r.text(), "");

    r.advance_time(10_000);
    r.flush_expired().expect("expired");
    assert_eq!(r.text(), "late");
}

#[test]
fn setters_batch_into_one_render() {
    let mut r = TestRenderer::concurrent();
    let slot: Slot<i32> = Rc::default();
    let renders = Rc::new(Cell::new(0));
    r.render_and_flush(counter(&slot, &renders).element(Props::new()))
        .expect("mount");
    assert_eq!(r.text(), "0");
    assert_eq!(renders.get(), 1);

    let set = setter(&slot);
    r.act(|_| {
        set.update(|n| n + 1);
        set.update(|n| n + 1);
        set.update(|n| n + 1);
    })
    .expect("updates");
    assert_eq!(r.text(), "3");
    assert_eq!(renders.get(), 2);
}

#[test]
fn discrete_events_schedule_user_blocking_work() {
    let mut r = TestRenderer::concurrent();
    let slot: Slot<i32> = Rc::default();
    let renders = Rc::new(Cell::new(0));
    r.render_and_flush(counter(&slot, &renders).element(Props::new()))
        .expect("mount");

    let set = setter(&slot);
    r.reconciler_mut().discrete_updates(|_| set.set(5)).expect("event");
    assert_eq!(r.text(), "0");
    let root = r.root();
    assert!(r
        .scheduler()
        .pending_tasks()
        .contains(&(PriorityLevel::UserBlocking, ScheduledTask::PerformWork(root))));

    r.reconciler_mut().flush_discrete_updates().expect("flush discrete");
    assert_eq!(r.text(), "5");
}

#[test]
fn deferred_updates_wait_behind_urgent_ones() {
    let mut r = TestRenderer::concurrent();
    let slot: Slot<i32> = Rc::default();
    let renders = Rc::new(Cell::new(0));
    r.render_and_flush(counter(&slot, &renders).element(Props::new()))
        .expect("mount");

    let set = setter(&slot);
    r.reconciler_mut()
        .run_with_priority(PriorityLevel::Low, |_| set.update(|n| n + 10))
        .expect("low");
    r.reconciler_mut()
        .run_with_priority(PriorityLevel::Immediate, |_| set.update(|n| n + 1))
        .expect("immediate");
    assert_eq!(r.text(), "1", "the urgent update renders on its own first");

    r.flush_all().expect("flush");
    assert_eq!(r.text(), "11", "the deferred update is rebased on top");
}

#[test]
fn layout_effect_update_loop_hits_the_nested_update_limit() {
    let mut r = TestRenderer::with_config(
        RootMode::Legacy,
        ReconcilerConfig::new().with_nested_update_limit(10),
    );
    let looping = FunctionComponent::new("Loop", |cx, _props| {
        let (count, set) = cx.use_state(|| 0);
        cx.use_layout_effect(None::<()>, move || {
            set.set(count + 1);
            Ok(None)
        });
        Ok(Node::text(count.to_string()))
    });

    let error = r.render(looping.element(Props::new())).expect_err("runaway updates");
    assert!(matches!(error, ReconcileError::NestedUpdateLimit { limit: 10 }));
}

/// Sets its own state from a layout effect until it has done so `updates`
/// times.
fn self_updating(updates: i32) -> FunctionComponent {
    FunctionComponent::new("Settle", move |cx, _props| {
        let (count, set) = cx.use_state(|| 0);
        cx.use_layout_effect(Some(count), move || {
            if count < updates {
                set.set(count + 1);
            }
            Ok(None)
        });
        Ok(Node::text(count.to_string()))
    })
}

#[test]
fn fifty_nested_updates_complete() {
    let mut r = TestRenderer::legacy();
    r.render(self_updating(50).element(Props::new())).expect("settles");
    assert_eq!(r.text(), "50");
}

#[test]
fn fifty_first_nested_update_hits_the_default_limit() {
    let mut r = TestRenderer::legacy();
    let error = r
        .render(self_updating(51).element(Props::new()))
        .expect_err("one update too many");
    assert!(matches!(error, ReconcileError::NestedUpdateLimit { limit: 50 }));
}

#[test]
fn nested_update_count_resets_after_the_tree_settles() {
    let mut r = TestRenderer::legacy();
    r.render(self_updating(40).element(Props::new())).expect("first burst");
    r.render(Node::Empty).expect("clear");
    r.render(self_updating(40).element(Props::new())).expect("second burst");
    assert_eq!(r.text(), "40");
}

#[test]
fn hidden_subtrees_render_after_visible_content() {
    let mut r = TestRenderer::concurrent();
    r.render(
        Element::host("main")
            .child(
                Element::host("div")
                    .attr("hidden", true)
                    .child(Element::host("span").child("secret")),
            )
            .child(Element::host("p").child("shown")),
    )
    .expect("schedule");

    assert!(r.flush_next().expect("visible pass"));
    assert_eq!(r.text(), "shown");
    let main = r.children()[0];
    let hidden_div = r.applier().children(main)[0];
    assert!(r.applier().children(hidden_div).is_empty());
    assert!(r.has_pending_work());

    r.flush_all().expect("idle pass");
    assert_eq!(r.text(), "secretshown");
    assert!(!r.has_pending_work());
}

#[test]
fn passive_effects_flush_after_paint() {
    let mut r = TestRenderer::concurrent();
    let log: Rc<RefCell<Vec<&'static str>>> = Rc::default();
    let component = {
        let log = log.clone();
        FunctionComponent::new("Effects", move |cx, _props| {
            let passive = log.clone();
            cx.use_effect(Some(()), move || {
                passive.borrow_mut().push("effect");
                Ok(None)
            });
            Ok(Node::text("x"))
        })
    };

    r.render(component.element(Props::new())).expect("schedule");
    assert!(r.flush_next().expect("render and commit"));
    assert_eq!(r.text(), "x");
    assert!(log.borrow().is_empty());
    assert!(r.scheduler().take_paint_count() >= 1);

    r.flush_all().expect("passive");
    assert_eq!(*log.borrow(), vec!["effect"]);
}
