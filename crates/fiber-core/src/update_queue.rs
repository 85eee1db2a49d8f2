//! State update queues for classes and roots.
//!
//! Pending updates land in a queue shared by both buffers of a fiber. A
//! render moves them into the base list of the work-in-progress queue *and*
//! of the current queue, so an interrupted render never loses an update.
//! Updates skipped for insufficient priority stay in the base list, and so
//! does everything after them, which keeps the final state independent of
//! the order in which priorities were processed.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::component::StateValue;
use crate::element::Props;
use crate::error::CapturedError;
use crate::expiration::ExpirationTime;
use crate::fiber::{EffectFlags, FiberArena, FiberId, FiberState};

pub(crate) type SharedPending = Rc<RefCell<Vec<Update>>>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum UpdateTag {
    /// Next state computed from the payload.
    Update,
    Replace,
    /// Re-render even if nothing changed.
    ForceUpdate,
    /// Error recovery update produced while unwinding.
    CaptureUpdate,
}

pub(crate) type ComputeState = Rc<dyn Fn(&StateValue, &Props) -> StateValue>;

#[derive(Clone)]
pub(crate) enum StatePayload {
    Value(StateValue),
    Compute(ComputeState),
}

#[derive(Clone)]
pub(crate) enum UpdateCallback {
    User(Rc<dyn Fn()>),
    /// Deliver a captured error to the boundary instance.
    DidCatch(CapturedError),
    /// The root itself captured the error; it escapes as uncaught.
    RootUncaught(CapturedError),
}

impl fmt::Debug for UpdateCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdateCallback::User(_) => f.write_str("User"),
            UpdateCallback::DidCatch(error) => write!(f, "DidCatch({})", error.message()),
            UpdateCallback::RootUncaught(error) => write!(f, "RootUncaught({})", error.message()),
        }
    }
}

#[derive(Clone)]
pub(crate) struct Update {
    pub(crate) expiration_time: ExpirationTime,
    pub(crate) tag: UpdateTag,
    pub(crate) payload: Option<StatePayload>,
    pub(crate) callback: Option<UpdateCallback>,
}

impl Update {
    pub(crate) fn new(expiration_time: ExpirationTime, tag: UpdateTag) -> Self {
        Self {
            expiration_time,
            tag,
            payload: None,
            callback: None,
        }
    }

    pub(crate) fn with_payload(mut self, payload: StatePayload) -> Self {
        self.payload = Some(payload);
        self
    }

    pub(crate) fn with_callback(mut self, callback: UpdateCallback) -> Self {
        self.callback = Some(callback);
        self
    }
}

impl fmt::Debug for Update {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Update")
            .field("expiration_time", &self.expiration_time)
            .field("tag", &self.tag)
            .field("callback", &self.callback)
            .finish()
    }
}

#[derive(Clone)]
pub(crate) struct UpdateQueue {
    pub(crate) base_state: StateValue,
    pub(crate) base_updates: Vec<Update>,
    pub(crate) shared: SharedPending,
    /// Callbacks of processed updates, run in the layout pass.
    pub(crate) callbacks: Vec<UpdateCallback>,
}

impl UpdateQueue {
    pub(crate) fn new(base_state: StateValue) -> Self {
        Self::with_shared(base_state, Rc::new(RefCell::new(Vec::new())))
    }

    pub(crate) fn with_shared(base_state: StateValue, shared: SharedPending) -> Self {
        Self {
            base_state,
            base_updates: Vec::new(),
            shared,
            callbacks: Vec::new(),
        }
    }

    pub(crate) fn enqueue(&self, update: Update) {
        self.shared.borrow_mut().push(update);
    }
}

/// Result of [`process_update_queue`].
#[derive(Debug, Clone, Copy)]
pub(crate) struct QueueOutcome {
    pub(crate) has_force_update: bool,
    /// Most urgent update left unprocessed, `NO_WORK` when none.
    pub(crate) remaining: ExpirationTime,
    /// Least urgent non-idle update that was applied, `SYNC` when none.
    pub(crate) latest_processed: ExpirationTime,
}

/// Adds an update produced while unwinding. It goes straight into the
/// work-in-progress base list so it is applied on the retry of this render
/// and never leaks to the current tree.
pub(crate) fn enqueue_captured_update(arena: &mut FiberArena, wip: FiberId, update: Update) {
    if let Some(queue) = arena[wip].update_queue.as_mut() {
        queue.base_updates.push(update);
    }
}

fn state_from_update(
    update: &Update,
    prev: &StateValue,
    props: &Props,
    flags: &mut EffectFlags,
    has_force_update: &mut bool,
) -> StateValue {
    match update.tag {
        UpdateTag::ForceUpdate => {
            *has_force_update = true;
            prev.clone()
        }
        UpdateTag::CaptureUpdate | UpdateTag::Update | UpdateTag::Replace => {
            if update.tag == UpdateTag::CaptureUpdate {
                flags.remove(EffectFlags::SHOULD_CAPTURE);
                flags.insert(EffectFlags::DID_CAPTURE);
            }
            match &update.payload {
                Some(StatePayload::Value(value)) => value.clone(),
                Some(StatePayload::Compute(compute)) => compute(prev, props),
                None => prev.clone(),
            }
        }
    }
}

/// Applies every update at or above `render_expiration_time` to `wip`'s
/// queue, writing the resulting state into `memoized_state` and the
/// priority of skipped updates into `expiration_time`.
pub(crate) fn process_update_queue(
    arena: &mut FiberArena,
    wip: FiberId,
    props: &Props,
    render_expiration_time: ExpirationTime,
) -> QueueOutcome {
    let mut outcome = QueueOutcome {
        has_force_update: false,
        remaining: ExpirationTime::NO_WORK,
        latest_processed: ExpirationTime::SYNC,
    };
    let Some(mut queue) = arena[wip].update_queue.take() else {
        return outcome;
    };

    let pending: Vec<Update> = std::mem::take(&mut *queue.shared.borrow_mut());
    if !pending.is_empty() {
        if let Some(current) = arena[wip].alternate {
            if let Some(current_queue) =
                arena.get_mut(current).and_then(|f| f.update_queue.as_mut())
            {
                current_queue.base_updates.extend(pending.iter().cloned());
            }
        }
        queue.base_updates.extend(pending);
    }

    let mut flags = arena[wip].flags;
    let mut new_state = queue.base_state.clone();
    let mut new_base_state: Option<StateValue> = None;
    let mut new_base_updates: Vec<Update> = Vec::new();

    for update in std::mem::take(&mut queue.base_updates) {
        if update.expiration_time < render_expiration_time {
            if new_base_updates.is_empty() {
                new_base_state = Some(new_state.clone());
            }
            outcome.remaining = outcome.remaining.max(update.expiration_time);
            new_base_updates.push(update);
            continue;
        }
        if !new_base_updates.is_empty() {
            let mut kept = update.clone();
            kept.expiration_time = ExpirationTime::SYNC;
            new_base_updates.push(kept);
        }
        if update.expiration_time > ExpirationTime::IDLE {
            outcome.latest_processed = outcome.latest_processed.min(update.expiration_time);
        }
        new_state = state_from_update(
            &update,
            &new_state,
            props,
            &mut flags,
            &mut outcome.has_force_update,
        );
        if let Some(callback) = update.callback {
            flags.insert(EffectFlags::CALLBACK);
            queue.callbacks.push(callback);
        }
    }

    queue.base_state = new_base_state.unwrap_or_else(|| new_state.clone());
    queue.base_updates = new_base_updates;

    let fiber = &mut arena[wip];
    fiber.flags = flags;
    fiber.expiration_time = outcome.remaining;
    fiber.memoized_state = FiberState::Value(new_state);
    fiber.update_queue = Some(queue);
    outcome
}

#[cfg(test)]
#[path = "tests/update_queue_tests.rs"]
mod tests;
