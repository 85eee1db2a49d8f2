use super::*;
use crate::element::{Element, Node};
use crate::fiber::{fiber_from_element, FiberMode};
use crate::runtime::Runtime;
use crate::test_support::RecordingScheduler;
use std::cell::Cell;

struct Harness {
    arena: FiberArena,
    contexts: ContextStack,
    runtime: Runtime,
    current: Option<FiberId>,
}

impl Harness {
    fn new() -> Self {
        Self {
            arena: FiberArena::new(),
            contexts: ContextStack::default(),
            runtime: Runtime::new(Rc::new(RecordingScheduler::default())),
            current: None,
        }
    }

    /// Renders once at `level` and commits the result as the new current.
    fn render(
        &mut self,
        level: ExpirationTime,
        body: impl FnOnce(&mut RenderCx<'_>) -> RenderResult,
    ) -> HookRenderOutput {
        let wip = match self.current {
            Some(current) => {
                let props = self.arena[current].memoized_props.clone();
                self.arena.create_work_in_progress(current, props)
            }
            None => self.arena.alloc(fiber_from_element(
                &Element::host("fn"),
                FiberMode::CONCURRENT,
                level,
            )),
        };
        let mut output = render_with_hooks(
            &mut self.arena,
            wip,
            self.current,
            &self.contexts,
            self.runtime.handle(),
            level,
            body,
        );
        if output.result.is_ok() {
            apply_hook_output(&mut self.arena, wip, &mut output);
            self.current = Some(wip);
        }
        output
    }

    /// Applies queued setter calls the way the work loop does.
    fn deliver(&mut self, level: ExpirationTime) {
        for update in self.runtime.take_updates() {
            if let UpdateKind::Hook { queue, action } = update.kind {
                queue.pending.borrow_mut().push(HookUpdate {
                    expiration_time: level,
                    action,
                });
            }
        }
    }
}

#[test]
fn state_survives_renders_and_applies_updates() {
    let mut h = Harness::new();
    let setter = Rc::new(RefCell::new(None));
    let captured = setter.clone();
    let output = h.render(ExpirationTime::SYNC, move |cx| {
        let (count, set) = cx.use_state(|| 1i32);
        *captured.borrow_mut() = Some(set);
        Ok(Node::text(count.to_string()))
    });
    assert!(output.result.is_ok());

    let set = setter.borrow_mut().take().expect("setter");
    set.update(|n| n + 10);
    set.update(|n| n * 2);
    h.deliver(ExpirationTime::SYNC);

    let seen = Rc::new(Cell::new(0));
    let observed = seen.clone();
    let output = h.render(ExpirationTime::SYNC, move |cx| {
        let (count, _) = cx.use_state(|| 1i32);
        observed.set(count);
        Ok(Node::Empty)
    });
    assert_eq!(seen.get(), 22);
    assert!(output.did_receive_update);
}

#[test]
fn low_priority_update_is_left_for_later() {
    let mut h = Harness::new();
    let setter = Rc::new(RefCell::new(None));
    let captured = setter.clone();
    h.render(ExpirationTime::SYNC, move |cx| {
        let (_, set) = cx.use_state(|| String::new());
        *captured.borrow_mut() = Some(set);
        Ok(Node::Empty)
    });
    let set = setter.borrow_mut().take().expect("setter");
    let low = ExpirationTime::from_ms(5000);
    set.update(|s| format!("{s}a"));
    h.deliver(low);
    set.update(|s| format!("{s}b"));
    h.deliver(ExpirationTime::SYNC);

    let seen = Rc::new(RefCell::new(String::new()));
    let observed = seen.clone();
    let output = h.render(ExpirationTime::SYNC, move |cx| {
        *observed.borrow_mut() = cx.use_state(|| String::new()).0;
        Ok(Node::Empty)
    });
    assert_eq!(*seen.borrow(), "b");
    assert_eq!(output.remaining, low);

    let observed = seen.clone();
    h.render(low, move |cx| {
        *observed.borrow_mut() = cx.use_state(|| String::new()).0;
        Ok(Node::Empty)
    });
    assert_eq!(*seen.borrow(), "ab");
}

#[test]
fn effects_fire_only_when_deps_change() {
    let mut h = Harness::new();
    let body = |dep: i32| {
        move |cx: &mut RenderCx<'_>| {
            cx.use_effect(Some(dep), || Ok(None));
            cx.use_layout_effect(None::<()>, || Ok(None));
            Ok(Node::Empty)
        }
    };
    let first = h.render(ExpirationTime::SYNC, body(1));
    assert!(first.flags.contains(EffectFlags::PASSIVE | EffectFlags::UPDATE));
    assert!(h.arena[h.current.expect("mounted")]
        .hook_effects
        .iter()
        .all(|e| e.has(HookFlags::HAS_EFFECT)));

    let second = h.render(ExpirationTime::SYNC, body(1));
    assert!(!second.flags.contains(EffectFlags::PASSIVE));
    let effects = &h.arena[h.current.expect("mounted")].hook_effects;
    assert!(!effects[0].has(HookFlags::HAS_EFFECT));
    assert!(effects[1].has(HookFlags::HAS_EFFECT | HookFlags::LAYOUT));
}

#[test]
fn refs_and_memos_are_stable() {
    let mut h = Harness::new();
    let computed = Rc::new(Cell::new(0));
    let first_ref = Rc::new(RefCell::new(None));
    for dep in [1, 1, 2] {
        let computed = computed.clone();
        let first_ref = first_ref.clone();
        h.render(ExpirationTime::SYNC, move |cx| {
            let slot = cx.use_ref(|| 7u8);
            let mut stored = first_ref.borrow_mut();
            match stored.as_ref() {
                Some(prev) => assert!(Rc::ptr_eq(prev, &slot)),
                None => *stored = Some(slot),
            }
            cx.use_memo(dep, || computed.set(computed.get() + 1));
            Ok(Node::Empty)
        });
    }
    assert_eq!(computed.get(), 2);
}

#[test]
fn changing_hook_order_fails_the_render() {
    let mut h = Harness::new();
    h.render(ExpirationTime::SYNC, |cx| {
        cx.use_state(|| 0u8);
        Ok(Node::Empty)
    });
    let output = h.render(ExpirationTime::SYNC, |cx| {
        cx.use_ref(|| 0u8);
        Ok(Node::Empty)
    });
    assert!(matches!(output.result, Err(Thrown::Error(_))));
    // The committed hooks are handed back untouched.
    let current = h.current.expect("mounted");
    assert!(matches!(
        &h.arena[current].memoized_state,
        FiberState::Hooks(hooks) if hooks.len() == 1
    ));
}

#[test]
fn context_reads_record_dependencies() {
    let mut h = Harness::new();
    let theme = Context::new("light".to_string());
    h.contexts.push(theme.as_any(), Rc::new("dark".to_string()));
    let reader = theme.clone();
    let output = h.render(ExpirationTime::SYNC, move |cx| Ok(Node::text(cx.use_context(&reader))));
    assert!(matches!(&output.result, Ok(Node::Text(t)) if &**t == "dark"));
    let wip = h.current.expect("mounted");
    assert!(h.arena[wip]
        .dependencies
        .as_ref()
        .is_some_and(|deps| deps.reads(theme.as_any())));
}
