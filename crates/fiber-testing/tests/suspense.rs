//! Suspense boundaries, lists and lazy components on concurrent roots.

use fiber_core::{
    ElementType, Element, FunctionComponent, LazyType, Node, Props, ReconcileError, RevealOrder,
    TailMode, Thenable,
    Thrown,
};
use fiber_testing::TestRenderer;

/// A component that renders the string its thenable resolves to.
fn reader(name: &str, data: &Thenable) -> FunctionComponent {
    let data = data.clone();
    FunctionComponent::new(name, move |_cx, _props| match data.value::<String>() {
        Some(text) => Ok(Node::text(text)),
        None => Err(Thrown::Suspend(data.clone())),
    })
}

fn read(name: &str, data: &Thenable) -> Element {
    reader(name, data).element(Props::new())
}

#[test]
fn first_mount_commits_fallback_then_retries() {
    let mut r = TestRenderer::concurrent();
    let data = Thenable::new();
    r.render_and_flush(Element::suspense("loading", read("Reader", &data)))
        .expect("mount");
    assert_eq!(r.text(), "loading");

    data.resolve("done".to_string());
    assert!(r.scheduler().wakeup_count() >= 1);
    r.flush_all().expect("retry");
    assert_eq!(r.text(), "done");
    assert!(!r.has_pending_work());
}

#[test]
fn suspending_update_keeps_content_until_the_commit_timeout() {
    let mut r = TestRenderer::concurrent();
    r.render_and_flush(Element::suspense("loading", "old")).expect("mount");
    assert_eq!(r.text(), "old");

    let data = Thenable::new();
    r.render_and_flush(Element::suspense("loading", read("Reader", &data)))
        .expect("suspend");
    assert_eq!(r.text(), "old", "the fallback is held back");

    let delay = r.scheduler().next_timer_delay().expect("commit timeout armed");
    assert!(delay > 10);
    r.advance_time(delay);
    r.flush_all().expect("timeout");
    assert_eq!(r.text(), "loading");

    data.resolve("new".to_string());
    r.flush_all().expect("retry");
    assert_eq!(r.text(), "new");
}

#[test]
fn resolving_before_the_timeout_skips_the_fallback() {
    let mut r = TestRenderer::concurrent();
    r.render_and_flush(Element::suspense("loading", "old")).expect("mount");

    let data = Thenable::new();
    r.render_and_flush(Element::suspense("loading", read("Reader", &data)))
        .expect("suspend");
    assert_eq!(r.scheduler().armed_timer_count(), 1);

    data.resolve("fresh".to_string());
    r.flush_all().expect("ping");
    assert_eq!(r.text(), "fresh");
    assert_eq!(r.scheduler().armed_timer_count(), 0, "the delayed commit was cancelled");
}

#[test]
fn nested_boundary_catches_only_its_subtree() {
    let mut r = TestRenderer::concurrent();
    let data = Thenable::new();
    r.render_and_flush(Element::suspense(
        "outer loading",
        Node::list([
            Node::text("shell "),
            Element::suspense("inner loading", read("Reader", &data)).into(),
        ]),
    ))
    .expect("mount");
    assert_eq!(r.text(), "shell inner loading");

    data.resolve("body".to_string());
    r.flush_all().expect("retry");
    assert_eq!(r.text(), "shell body");
}

#[test]
fn together_list_reveals_rows_at_once() {
    let mut r = TestRenderer::concurrent();
    let data = Thenable::new();
    let rows = Node::list([
        Element::suspense("loading A", read("A", &data)).into(),
        Element::suspense("loading B", "B").into(),
    ]);
    r.render_and_flush(Element::suspense_list(RevealOrder::Together, TailMode::Visible, rows))
        .expect("mount");
    assert_eq!(r.text(), "loading Aloading B", "B waits for A");

    data.resolve("A".to_string());
    r.flush_all().expect("retry");
    assert_eq!(r.text(), "AB");
}

#[test]
fn forwards_list_holds_later_rows_behind_a_pending_one() {
    let mut r = TestRenderer::concurrent();
    let data = Thenable::new();
    let rows = Node::list([
        Element::suspense("loading A", read("A", &data)).into(),
        Element::suspense("loading B", "B").into(),
    ]);
    r.render_and_flush(Element::suspense_list(RevealOrder::Forwards, TailMode::Visible, rows))
        .expect("mount");
    assert_eq!(r.text(), "loading Aloading B");

    data.resolve("A".to_string());
    r.flush_all().expect("retry");
    assert_eq!(r.text(), "AB");
}

#[test]
fn collapsed_tail_shows_only_the_first_pending_fallback() {
    let mut r = TestRenderer::concurrent();
    let data = Thenable::new();
    let rows = Node::list([
        Element::suspense("loading A", read("A", &data)).into(),
        Element::suspense("loading B", "B").into(),
        Element::suspense("loading C", "C").into(),
    ]);
    r.render_and_flush(Element::suspense_list(RevealOrder::Forwards, TailMode::Collapsed, rows))
        .expect("mount");
    assert_eq!(r.text(), "loading A");

    data.resolve("A".to_string());
    r.flush_all().expect("retry");
    assert_eq!(r.text(), "ABC");
}

fn three_rows_with_a_pending_middle(data: &Thenable) -> Node {
    Node::list([
        Element::suspense("loading A", "A").into(),
        Element::suspense("loading B", read("B", data)).into(),
        Element::suspense("loading C", "C").into(),
    ])
}

#[test]
fn forwards_list_commits_leading_rows_and_defers_the_rest() {
    let mut r = TestRenderer::concurrent();
    let data = Thenable::new();
    r.render_and_flush(Element::suspense_list(
        RevealOrder::Forwards,
        TailMode::Visible,
        three_rows_with_a_pending_middle(&data),
    ))
    .expect("mount");
    assert_eq!(r.text(), "Aloading Bloading C");

    data.resolve("B".to_string());
    r.flush_all().expect("retry");
    assert_eq!(r.text(), "ABC");
}

#[test]
fn collapsed_forwards_list_hides_rows_after_the_pending_one() {
    let mut r = TestRenderer::concurrent();
    let data = Thenable::new();
    r.render_and_flush(Element::suspense_list(
        RevealOrder::Forwards,
        TailMode::Collapsed,
        three_rows_with_a_pending_middle(&data),
    ))
    .expect("mount");
    assert_eq!(r.text(), "Aloading B");

    data.resolve("B".to_string());
    r.flush_all().expect("retry");
    assert_eq!(r.text(), "ABC");
}

#[test]
fn lazy_component_suspends_until_loaded() {
    let mut r = TestRenderer::concurrent();
    let loader = Thenable::new();
    let lazy = LazyType::new(loader.clone());
    r.render_and_flush(Element::suspense(
        "loading",
        lazy.element(Props::new().with_attr("name", "lazy")),
    ))
    .expect("mount");
    assert_eq!(r.text(), "loading");

    let greeting = FunctionComponent::new("Greeting", |_cx, props| {
        Ok(Node::text(format!("hello {}", props.str("name").unwrap_or("?"))))
    });
    loader.resolve(ElementType::Function(greeting));
    r.flush_all().expect("retry");
    assert_eq!(r.text(), "hello lazy");
}

#[test]
fn lazy_value_that_is_not_a_component_is_an_error() {
    let mut r = TestRenderer::legacy();
    let lazy = LazyType::new(Thenable::resolved(42u8));
    let error = r
        .render(Element::suspense("loading", lazy.element(Props::new())))
        .expect_err("invalid type");
    assert!(matches!(error, ReconcileError::Uncaught(_)));
}

#[test]
fn dehydrated_boundary_keeps_markup_until_idle_render() {
    let mut r = TestRenderer::concurrent();
    let container = r.container();
    let markup = r
        .applier_mut()
        .create_markup(container, "section", "server html")
        .expect("markup");

    r.render(Element::dehydrated_suspense(
        markup,
        "loading",
        Element::host("section").child("client html"),
    ))
    .expect("schedule");
    assert!(r.flush_next().expect("first pass"));
    assert_eq!(r.text(), "server html");
    assert_eq!(r.children(), vec![markup]);
    assert!(r.has_pending_work());

    r.flush_all().expect("idle pass");
    assert_eq!(r.text(), "client html");
    assert!(!r.children().contains(&markup));
}
