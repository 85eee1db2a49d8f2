use super::*;
use crate::component::state;
use crate::element::Element;
use crate::fiber::{fiber_from_element, FiberMode};

fn queue_fiber(arena: &mut FiberArena) -> (FiberId, FiberId) {
    let current = arena.alloc(fiber_from_element(
        &Element::host("root"),
        FiberMode::CONCURRENT,
        ExpirationTime::NO_WORK,
    ));
    arena[current].update_queue = Some(UpdateQueue::new(state(String::new())));
    let props = arena[current].pending_props.clone();
    let wip = arena.create_work_in_progress(current, props);
    (current, wip)
}

fn append(text: &'static str) -> StatePayload {
    StatePayload::Compute(Rc::new(move |prev: &StateValue, _: &Props| {
        let prev = prev.downcast_ref::<String>().cloned().unwrap_or_default();
        state(prev + text)
    }))
}

fn memoized(arena: &FiberArena, id: FiberId) -> String {
    arena[id]
        .memoized_state
        .value()
        .and_then(|v| v.downcast_ref::<String>().cloned())
        .unwrap_or_default()
}

#[test]
fn skipped_updates_rebase_later_ones() {
    let mut arena = FiberArena::new();
    let (current, wip) = queue_fiber(&mut arena);
    let low = ExpirationTime::from_ms(5000);
    let high = ExpirationTime::SYNC;
    let queue = arena[wip].update_queue.clone().expect("queue");
    queue.enqueue(Update::new(high, UpdateTag::Update).with_payload(append("A")));
    queue.enqueue(Update::new(low, UpdateTag::Update).with_payload(append("B")));
    queue.enqueue(Update::new(high, UpdateTag::Update).with_payload(append("C")));

    let props = Props::new();
    let outcome = process_update_queue(&mut arena, wip, &props, high);
    assert_eq!(memoized(&arena, wip), "AC");
    assert_eq!(outcome.remaining, low);
    assert_eq!(arena[wip].expiration_time, low);

    // The current queue kept a copy, so restarting from it loses nothing.
    let current_queue = arena[current].update_queue.as_ref().expect("current queue");
    assert_eq!(current_queue.base_updates.len(), 3);

    let outcome = process_update_queue(&mut arena, wip, &props, low);
    assert_eq!(memoized(&arena, wip), "ABC");
    assert!(outcome.remaining.is_no_work());
}

#[test]
fn capture_update_flips_capture_flags_and_keeps_callback() {
    let mut arena = FiberArena::new();
    let (_, wip) = queue_fiber(&mut arena);
    arena[wip].flags |= EffectFlags::SHOULD_CAPTURE;
    enqueue_captured_update(
        &mut arena,
        wip,
        Update::new(ExpirationTime::SYNC, UpdateTag::CaptureUpdate)
            .with_payload(StatePayload::Value(state("caught".to_string())))
            .with_callback(UpdateCallback::DidCatch(CapturedError::new("boom"))),
    );
    let outcome = process_update_queue(&mut arena, wip, &Props::new(), ExpirationTime::SYNC);
    let flags = arena[wip].flags;
    assert!(flags.contains(EffectFlags::DID_CAPTURE | EffectFlags::CALLBACK));
    assert!(!flags.contains(EffectFlags::SHOULD_CAPTURE));
    assert_eq!(memoized(&arena, wip), "caught");
    assert!(!outcome.has_force_update);
    assert_eq!(arena[wip].update_queue.as_ref().map(|q| q.callbacks.len()), Some(1));
}

#[test]
fn force_update_is_reported() {
    let mut arena = FiberArena::new();
    let (_, wip) = queue_fiber(&mut arena);
    let queue = arena[wip].update_queue.clone().expect("queue");
    queue.enqueue(Update::new(ExpirationTime::SYNC, UpdateTag::ForceUpdate));
    let outcome = process_update_queue(&mut arena, wip, &Props::new(), ExpirationTime::SYNC);
    assert!(outcome.has_force_update);
    assert_eq!(outcome.latest_processed, ExpirationTime::SYNC);
}
