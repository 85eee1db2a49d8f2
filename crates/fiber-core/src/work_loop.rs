//! The reconciler: root scheduling, the render loops and the batching API.
//!
//! Work flows through a single [`Reconciler`]. Updates land on fibers and
//! bubble their expiration times to the root, the root is handed to the
//! host scheduler (or the internal synchronous queue), and the host calls
//! back through [`Reconciler::run_task`]. Rendering walks the tree one
//! fiber at a time so concurrent roots can yield between units of work.

use std::rc::Rc;

use bitflags::bitflags;
use tracing::{debug, trace, warn};

use crate::applier::{Applier, HostId};
use crate::component::{state, StateValue};
use crate::config::ReconcilerConfig;
use crate::context::ContextStack;
use crate::element::{Node, Props};
use crate::error::{CapturedError, ReconcileError, Thrown};
use crate::expiration::{ExpirationTime, PriorityLevel};
use crate::fiber::{
    EffectFlags, Fiber, FiberArena, FiberId, FiberMode, FiberState, StateNode, WorkTag,
};
use crate::hash::{HashMap, HashSet};
use crate::hooks::{Effect, HookUpdate};
use crate::platform::{CallbackHandle, HostScheduler, ScheduledTask, TaskStatus};
use crate::profiler::ProfilerTimer;
use crate::root::{FiberRoot, RootCallback, RootId, RootMode, RootState};
use crate::runtime::{PendingUpdate, Runtime, UpdateKind, Wakeup};
use crate::suspense::SuspenseContext;
use crate::update_queue::{StatePayload, Update, UpdateCallback, UpdateQueue, UpdateTag};

bitflags! {
    /// What the reconciler is doing right now.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
    pub(crate) struct ExecutionContext: u8 {
        const BATCHED = 1;
        const EVENT = 1 << 1;
        const DISCRETE_EVENT = 1 << 2;
        const RENDER = 1 << 3;
        const COMMIT = 1 << 4;
    }
}

/// How the last render of the work-in-progress root ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum RootExitStatus {
    Incomplete,
    FatalErrored,
    Errored,
    Suspended,
    SuspendedWithDelay,
    Completed,
}

/// Perceptual thresholds for delaying a commit that would show a fallback.
const JND_THRESHOLDS: [u64; 6] = [120, 480, 1080, 1920, 3000, 4320];

fn jnd(elapsed_ms: u64) -> u64 {
    JND_THRESHOLDS
        .iter()
        .copied()
        .find(|&threshold| elapsed_ms < threshold)
        .unwrap_or_else(|| elapsed_ms.div_ceil(1960) * 1960)
}

pub struct Reconciler<A: Applier> {
    pub(crate) config: ReconcilerConfig,
    pub(crate) applier: A,
    pub(crate) arena: FiberArena,
    pub(crate) runtime: Runtime,
    pub(crate) roots: HashMap<RootId, FiberRoot>,
    next_root_id: u32,
    initial_time_ms: u64,
    current_event_time: ExpirationTime,
    pub(crate) execution_context: ExecutionContext,

    pub(crate) wip_root: Option<RootId>,
    pub(crate) wip: Option<FiberId>,
    pub(crate) render_expiration_time: ExpirationTime,
    pub(crate) exit_status: RootExitStatus,
    pub(crate) fatal_error: Option<ReconcileError>,
    latest_processed_expiration_time: ExpirationTime,
    pub(crate) next_unprocessed_update_time: ExpirationTime,
    has_pending_ping: bool,
    pub(crate) most_recent_fallback_time: u64,

    pub(crate) contexts: ContextStack,
    pub(crate) host_contexts: Vec<A::HostContext>,
    pub(crate) suspense_stack: Vec<SuspenseContext>,
    pub(crate) did_receive_update: bool,
    /// Fibers allocated during the current render, swept after commit.
    pub(crate) fresh: Vec<FiberId>,
    /// Fresh fibers of finished trees waiting for their commit.
    finished_fresh: HashMap<RootId, Vec<FiberId>>,

    sync_queue: Vec<RootId>,
    is_flushing_sync_queue: bool,
    sync_callback: Option<CallbackHandle>,
    pending_discrete: HashMap<RootId, ExpirationTime>,

    pub(crate) root_does_have_passive_effects: bool,
    pub(crate) root_with_pending_passive: Option<RootId>,
    pub(crate) pending_passive_unmounts: Vec<Rc<Effect>>,
    pub(crate) pending_passive_mounts: Vec<(FiberId, Rc<Effect>)>,
    pub(crate) pending_passive_expiration: ExpirationTime,

    pub(crate) nested_update_count: u32,
    pub(crate) root_with_nested_updates: Option<RootId>,
    pub(crate) nested_passive_update_count: u32,

    pub(crate) uncaught_error: Option<CapturedError>,
    /// Class instances that caught an error without a derived-state hook.
    pub(crate) failed_legacy_boundaries: HashSet<usize>,
    pub(crate) snapshots: HashMap<FiberId, StateValue>,
    pub(crate) profiler: ProfilerTimer,
}

impl<A: Applier> Reconciler<A> {
    pub fn new(applier: A, scheduler: Rc<dyn HostScheduler>) -> Self {
        Self::with_config(applier, scheduler, ReconcilerConfig::default())
    }

    pub fn with_config(
        applier: A,
        scheduler: Rc<dyn HostScheduler>,
        config: ReconcilerConfig,
    ) -> Self {
        let initial_time_ms = scheduler.now_ms();
        Self {
            config,
            applier,
            arena: FiberArena::new(),
            runtime: Runtime::new(scheduler),
            roots: HashMap::default(),
            next_root_id: 1,
            initial_time_ms,
            current_event_time: ExpirationTime::NO_WORK,
            execution_context: ExecutionContext::empty(),
            wip_root: None,
            wip: None,
            render_expiration_time: ExpirationTime::NO_WORK,
            exit_status: RootExitStatus::Incomplete,
            fatal_error: None,
            latest_processed_expiration_time: ExpirationTime::SYNC,
            next_unprocessed_update_time: ExpirationTime::NO_WORK,
            has_pending_ping: false,
            most_recent_fallback_time: 0,
            contexts: ContextStack::default(),
            host_contexts: Vec::new(),
            suspense_stack: Vec::new(),
            did_receive_update: false,
            fresh: Vec::new(),
            finished_fresh: HashMap::default(),
            sync_queue: Vec::new(),
            is_flushing_sync_queue: false,
            sync_callback: None,
            pending_discrete: HashMap::default(),
            root_does_have_passive_effects: false,
            root_with_pending_passive: None,
            pending_passive_unmounts: Vec::new(),
            pending_passive_mounts: Vec::new(),
            pending_passive_expiration: ExpirationTime::NO_WORK,
            nested_update_count: 0,
            root_with_nested_updates: None,
            nested_passive_update_count: 0,
            uncaught_error: None,
            failed_legacy_boundaries: HashSet::default(),
            snapshots: HashMap::default(),
            profiler: ProfilerTimer::default(),
        }
    }

    pub fn applier(&self) -> &A {
        &self.applier
    }

    pub fn applier_mut(&mut self) -> &mut A {
        &mut self.applier
    }

    pub fn arena(&self) -> &FiberArena {
        &self.arena
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    /// The committed `HostRoot` fiber of `root`.
    pub fn root_current(&self, root: RootId) -> Option<FiberId> {
        self.roots.get(&root).map(|root| root.current)
    }

    pub fn root_container(&self, root: RootId) -> Option<HostId> {
        self.roots.get(&root).map(|root| root.container)
    }

    /// Whether `root` has uncommitted work at any level.
    pub fn has_pending_work(&self, root: RootId) -> bool {
        self.roots
            .get(&root)
            .is_some_and(|root| root.first_pending_time != ExpirationTime::NO_WORK)
    }

    pub fn is_rendering(&self) -> bool {
        self.wip_root.is_some()
    }

    pub fn has_pending_passive_effects(&self) -> bool {
        self.root_with_pending_passive.is_some()
    }

    /// Creates a root rendering into `container`.
    pub fn create_root(&mut self, container: HostId, mode: RootMode) -> RootId {
        let id = RootId(self.next_root_id);
        self.next_root_id += 1;
        let fiber_mode = match mode {
            RootMode::Legacy => FiberMode::empty(),
            RootMode::Concurrent => FiberMode::CONCURRENT,
        };
        let mut fiber = Fiber::new(WorkTag::HostRoot, Rc::new(Props::new()), None, fiber_mode);
        fiber.state_node = StateNode::Root(id);
        let initial = state(RootState::default());
        fiber.memoized_state = FiberState::Value(initial.clone());
        fiber.update_queue = Some(UpdateQueue::new(initial));
        let current = self.arena.alloc(fiber);
        self.roots.insert(id, FiberRoot::new(id, mode, container, current));
        debug!(root = ?id, ?mode, "created root");
        id
    }

    /// Schedules `element` to become the content of `root`. Returns the
    /// expiration time the update was given.
    pub fn update_container(
        &mut self,
        root: RootId,
        element: impl Into<Node>,
    ) -> Result<ExpirationTime, ReconcileError> {
        self.update_container_with_callback(root, element, None)
    }

    pub fn update_container_with_callback(
        &mut self,
        root: RootId,
        element: impl Into<Node>,
        callback: Option<Rc<dyn Fn()>>,
    ) -> Result<ExpirationTime, ReconcileError> {
        let current = self.roots.get(&root).ok_or(ReconcileError::UnknownRoot)?.current;
        let current_time = self.request_current_time();
        let priority = self.runtime.current_priority();
        let expiration_time = self.compute_expiration_for_fiber(current_time, current, priority);
        let mut update = Update::new(expiration_time, UpdateTag::Update)
            .with_payload(StatePayload::Value(state(RootState { element: element.into() })));
        if let Some(callback) = callback {
            update = update.with_callback(UpdateCallback::User(callback));
        }
        match self.arena[current].update_queue.as_mut() {
            Some(queue) => queue.enqueue(update),
            None => return Err(ReconcileError::UnknownRoot),
        }
        trace!(?root, ?expiration_time, "container update");
        self.schedule_update_on_fiber(current, expiration_time)?;
        Ok(expiration_time)
    }

    /// Unmounts the content of `root` synchronously and releases it.
    pub fn unmount_root(&mut self, root: RootId) -> Result<(), ReconcileError> {
        if !self.roots.contains_key(&root) {
            return Err(ReconcileError::UnknownRoot);
        }
        self.flush_sync(|this| this.update_container(root, Node::Empty))??;
        self.flush_passive_effects()?;
        if self.wip_root == Some(root) {
            self.discard_work_in_progress();
        }
        if let Some(stale) = self.finished_fresh.remove(&root) {
            for id in stale {
                self.arena.free(id);
            }
        }
        self.sync_queue.retain(|queued| *queued != root);
        self.pending_discrete.remove(&root);
        if let Some(fiber_root) = self.roots.remove(&root) {
            if let Some(RootCallback::Host(handle)) = fiber_root.callback {
                self.runtime.scheduler().cancel_callback(handle);
            }
            if let Some(handle) = fiber_root.timeout_handle {
                self.runtime.scheduler().cancel_timeout(handle);
            }
            let freed = self.arena.free_subtree(fiber_root.current);
            debug!(?root, freed, "root unmounted");
        }
        Ok(())
    }
}

impl<A: Applier> Reconciler<A> {
    /// Milliseconds since this reconciler was created.
    pub(crate) fn now_ms(&self) -> u64 {
        self.runtime.scheduler().now_ms().saturating_sub(self.initial_time_ms)
    }

    pub(crate) fn now(&self) -> ExpirationTime {
        ExpirationTime::from_ms(self.now_ms())
    }

    /// The time updates scheduled now are stamped with. Every update in the
    /// same host event reads the same value.
    pub(crate) fn request_current_time(&mut self) -> ExpirationTime {
        if self
            .execution_context
            .intersects(ExecutionContext::RENDER | ExecutionContext::COMMIT)
        {
            return self.now();
        }
        if self.current_event_time == ExpirationTime::NO_WORK {
            self.current_event_time = self.now();
        }
        self.current_event_time
    }

    pub(crate) fn compute_expiration_for_fiber(
        &self,
        current_time: ExpirationTime,
        fiber: FiberId,
        priority: PriorityLevel,
    ) -> ExpirationTime {
        let concurrent = self
            .arena
            .get(fiber)
            .is_some_and(|fiber| fiber.mode.contains(FiberMode::CONCURRENT));
        if !concurrent {
            return ExpirationTime::SYNC;
        }
        if self.execution_context.contains(ExecutionContext::RENDER) {
            return self.render_expiration_time;
        }
        let expiration_time = match priority {
            PriorityLevel::Immediate => ExpirationTime::SYNC,
            PriorityLevel::UserBlocking => self.config.compute_for_interaction(current_time),
            PriorityLevel::Normal | PriorityLevel::Low => {
                self.config.compute_for_async(current_time)
            }
            PriorityLevel::Idle => ExpirationTime::IDLE,
        };
        // An update must not land in the batch that is being rendered.
        if self.wip_root.is_some() && expiration_time == self.render_expiration_time {
            return expiration_time.nudge_later();
        }
        expiration_time
    }

    pub(crate) fn schedule_update_on_fiber(
        &mut self,
        fiber: FiberId,
        expiration_time: ExpirationTime,
    ) -> Result<(), ReconcileError> {
        self.check_for_nested_updates()?;
        let Some(root_id) = self.mark_update_time_from_fiber_to_root(fiber, expiration_time) else {
            warn!(?fiber, "update scheduled on a fiber that is no longer mounted");
            return Ok(());
        };

        self.ensure_root_is_scheduled(root_id);
        if expiration_time == ExpirationTime::SYNC && self.execution_context.is_empty() {
            self.flush_sync_callback_queue()?;
        }

        if self.execution_context.contains(ExecutionContext::DISCRETE_EVENT)
            && matches!(
                self.runtime.current_priority(),
                PriorityLevel::UserBlocking | PriorityLevel::Immediate
            )
        {
            match self.pending_discrete.get(&root_id) {
                Some(&existing) if existing <= expiration_time => {}
                _ => {
                    self.pending_discrete.insert(root_id, expiration_time);
                }
            }
        }
        Ok(())
    }

    fn check_for_nested_updates(&mut self) -> Result<(), ReconcileError> {
        let limit = self.config.nested_update_limit;
        // The count covers commits already followed by a synchronous
        // re-render, so the update being scheduled is one past it.
        if self.nested_update_count >= limit {
            self.nested_update_count = 0;
            self.root_with_nested_updates = None;
            return Err(ReconcileError::NestedUpdateLimit { limit });
        }
        if self.nested_passive_update_count > self.config.nested_passive_update_limit {
            self.nested_passive_update_count = 0;
            warn!(
                limit = self.config.nested_passive_update_limit,
                "maximum update depth exceeded: a passive effect keeps scheduling updates"
            );
        }
        Ok(())
    }

    /// Raises the expiration time of `fiber` and the child expiration time
    /// of every ancestor on both buffers. Returns the root it reached.
    pub(crate) fn mark_update_time_from_fiber_to_root(
        &mut self,
        fiber: FiberId,
        expiration_time: ExpirationTime,
    ) -> Option<RootId> {
        let target = self.arena.get_mut(fiber)?;
        target.expiration_time = target.expiration_time.max(expiration_time);
        let alternate = target.alternate;
        let mut parent = target.return_fiber;
        if let Some(alternate) = alternate.and_then(|id| self.arena.get_mut(id)) {
            alternate.expiration_time = alternate.expiration_time.max(expiration_time);
        }

        let mut node = fiber;
        while let Some(id) = parent {
            let Some(ancestor) = self.arena.get_mut(id) else {
                return None;
            };
            ancestor.child_expiration_time = ancestor.child_expiration_time.max(expiration_time);
            let alternate = ancestor.alternate;
            parent = ancestor.return_fiber;
            if let Some(alternate) = alternate.and_then(|id| self.arena.get_mut(id)) {
                alternate.child_expiration_time =
                    alternate.child_expiration_time.max(expiration_time);
            }
            node = id;
        }

        let root_id = match (&self.arena[node].tag, &self.arena[node].state_node) {
            (WorkTag::HostRoot, StateNode::Root(id)) => *id,
            _ => return None,
        };
        if !self.roots.contains_key(&root_id) {
            return None;
        }
        if self.wip_root == Some(root_id) {
            self.mark_unprocessed_update_time(expiration_time);
            if self.exit_status == RootExitStatus::SuspendedWithDelay {
                let render_expiration_time = self.render_expiration_time;
                if let Some(root) = self.roots.get_mut(&root_id) {
                    root.mark_suspended_at_time(render_expiration_time);
                }
            }
        }
        if let Some(root) = self.roots.get_mut(&root_id) {
            root.mark_updated_at_time(expiration_time);
        }
        Some(root_id)
    }

    /// Makes sure exactly one task is scheduled for the most urgent pending
    /// level of `root`, reusing the existing task when it still fits.
    pub(crate) fn ensure_root_is_scheduled(&mut self, root_id: RootId) {
        let current_time = self.request_current_time();
        let Some(root) = self.roots.get_mut(&root_id) else {
            return;
        };
        let existing = root.callback;

        if root.last_expired_time != ExpirationTime::NO_WORK {
            root.callback_expiration_time = ExpirationTime::SYNC;
            root.callback_priority = PriorityLevel::Immediate;
            if existing != Some(RootCallback::Sync) {
                if let Some(RootCallback::Host(handle)) = existing {
                    self.runtime.scheduler().cancel_callback(handle);
                }
                root.callback = Some(RootCallback::Sync);
                self.push_sync_root(root_id);
            }
            return;
        }

        let expiration_time = root.next_expiration_time_to_work_on();
        if expiration_time == ExpirationTime::NO_WORK {
            if let Some(RootCallback::Host(handle)) = existing {
                self.runtime.scheduler().cancel_callback(handle);
            }
            root.callback = None;
            root.callback_expiration_time = ExpirationTime::NO_WORK;
            root.callback_priority = PriorityLevel::Idle;
            return;
        }

        let priority = self.config.infer_priority(current_time, expiration_time);
        if let Some(existing) = existing {
            if root.callback_expiration_time == expiration_time
                && root.callback_priority >= priority
            {
                return;
            }
            if let RootCallback::Host(handle) = existing {
                self.runtime.scheduler().cancel_callback(handle);
            }
        }
        root.callback_expiration_time = expiration_time;
        root.callback_priority = priority;

        if expiration_time == ExpirationTime::SYNC {
            root.callback = Some(RootCallback::Sync);
            self.push_sync_root(root_id);
        } else {
            let timeout_ms = expiration_time.to_ms().saturating_sub(current_time.to_ms());
            let handle = self.runtime.scheduler().schedule_callback(
                priority,
                ScheduledTask::PerformWork(root_id),
                Some(timeout_ms),
            );
            root.callback = Some(RootCallback::Host(handle));
        }
        trace!(root = ?root_id, ?expiration_time, ?priority, "root scheduled");
    }

    fn push_sync_root(&mut self, root_id: RootId) {
        if !self.sync_queue.contains(&root_id) {
            self.sync_queue.push(root_id);
        }
        if self.sync_callback.is_none() {
            self.sync_callback = Some(self.runtime.scheduler().schedule_callback(
                PriorityLevel::Immediate,
                ScheduledTask::FlushSyncQueue,
                None,
            ));
        }
    }

    /// Renders and commits every root queued for synchronous work.
    pub(crate) fn flush_sync_callback_queue(&mut self) -> Result<(), ReconcileError> {
        if self.is_flushing_sync_queue {
            return Ok(());
        }
        if let Some(handle) = self.sync_callback.take() {
            self.runtime.scheduler().cancel_callback(handle);
        }
        if self.sync_queue.is_empty() {
            return Ok(());
        }
        self.is_flushing_sync_queue = true;
        let mut result = Ok(());
        while !self.sync_queue.is_empty() {
            let root_id = self.sync_queue.remove(0);
            let queued = self
                .roots
                .get(&root_id)
                .is_some_and(|root| root.callback == Some(RootCallback::Sync));
            if !queued {
                continue;
            }
            if let Err(error) = self.perform_sync_work_on_root(root_id) {
                result = Err(error);
                break;
            }
        }
        self.is_flushing_sync_queue = false;
        if result.is_err() && !self.sync_queue.is_empty() && self.sync_callback.is_none() {
            self.sync_callback = Some(self.runtime.scheduler().schedule_callback(
                PriorityLevel::Immediate,
                ScheduledTask::FlushSyncQueue,
                None,
            ));
        }
        result
    }
}

impl<A: Applier> Reconciler<A> {
    /// Entry point for every task handed to the host scheduler.
    pub fn run_task(
        &mut self,
        task: ScheduledTask,
        did_timeout: bool,
    ) -> Result<TaskStatus, ReconcileError> {
        trace!(?task, did_timeout, "run task");
        match task {
            ScheduledTask::PerformWork(root) => self.perform_concurrent_work_on_root(
                root,
                did_timeout,
            ),
            ScheduledTask::FlushSyncQueue => {
                self.sync_callback = None;
                self.flush_sync_callback_queue()?;
                Ok(TaskStatus::Done)
            }
            ScheduledTask::FlushPassiveEffects => {
                self.flush_passive_effects()?;
                Ok(TaskStatus::Done)
            }
            ScheduledTask::CommitTimeout(root_id) => {
                let ready = match self.roots.get_mut(&root_id) {
                    Some(root) => {
                        root.timeout_handle = None;
                        root.finished_work.is_some()
                    }
                    None => false,
                };
                if ready {
                    self.commit_root(root_id)?;
                }
                Ok(TaskStatus::Done)
            }
            ScheduledTask::ProcessUpdates => {
                self.current_event_time = ExpirationTime::NO_WORK;
                self.process_updates()?;
                self.process_wakeups()?;
                Ok(TaskStatus::Done)
            }
        }
    }

    fn perform_sync_work_on_root(&mut self, root_id: RootId) -> Result<(), ReconcileError> {
        let Some(root) = self.roots.get(&root_id) else {
            return Ok(());
        };
        let expiration_time = if root.last_expired_time != ExpirationTime::NO_WORK {
            root.last_expired_time
        } else {
            ExpirationTime::SYNC
        };
        if root.finished_work.is_some() && root.finished_expiration_time == expiration_time {
            return self.commit_root(root_id);
        }
        if self
            .execution_context
            .intersects(ExecutionContext::RENDER | ExecutionContext::COMMIT)
        {
            return Err(ReconcileError::AlreadyWorking);
        }

        self.flush_passive_effects()?;
        if self.wip_root != Some(root_id) || self.render_expiration_time != expiration_time {
            self.prepare_fresh_stack(root_id, expiration_time);
        }
        if self.wip.is_none() {
            return Ok(());
        }

        let prev_context = self.execution_context;
        self.execution_context |= ExecutionContext::RENDER;
        {
            let _span = tracing::debug_span!(
                "render_root",
                root = ?root_id,
                expiration = ?expiration_time,
                sync = true
            )
            .entered();
            self.work_loop_sync();
        }
        self.execution_context = prev_context;

        if self.exit_status == RootExitStatus::FatalErrored {
            return Err(self.fail_root(root_id, expiration_time));
        }
        if self.wip.is_some() {
            warn!(root = ?root_id, "synchronous render stopped before completing");
            return Ok(());
        }
        self.take_finished_work(root_id, expiration_time);
        self.wip_root = None;
        self.commit_root(root_id)?;
        self.ensure_root_is_scheduled(root_id);
        Ok(())
    }

    fn perform_concurrent_work_on_root(
        &mut self,
        root_id: RootId,
        did_timeout: bool,
    ) -> Result<TaskStatus, ReconcileError> {
        self.current_event_time = ExpirationTime::NO_WORK;
        if did_timeout {
            let now = self.now();
            if let Some(root) = self.roots.get_mut(&root_id) {
                root.mark_expired_at_time(now);
            }
            self.ensure_root_is_scheduled(root_id);
            return Ok(TaskStatus::Done);
        }

        let Some(root) = self.roots.get(&root_id) else {
            return Ok(TaskStatus::Done);
        };
        let expiration_time = root.next_expiration_time_to_work_on();
        if expiration_time == ExpirationTime::NO_WORK {
            return Ok(TaskStatus::Done);
        }
        let original_callback = root.callback;
        self.flush_passive_effects()?;

        if self.wip_root != Some(root_id) || self.render_expiration_time != expiration_time {
            self.prepare_fresh_stack(root_id, expiration_time);
        }
        if self.wip.is_none() {
            return Ok(TaskStatus::Done);
        }

        let prev_context = self.execution_context;
        self.execution_context |= ExecutionContext::RENDER;
        {
            let _span = tracing::debug_span!(
                "render_root",
                root = ?root_id,
                expiration = ?expiration_time,
                sync = false
            )
            .entered();
            self.work_loop_concurrent();
        }
        self.execution_context = prev_context;

        if self.exit_status == RootExitStatus::FatalErrored {
            return Err(self.fail_root(root_id, expiration_time));
        }
        if self.wip.is_none() {
            self.take_finished_work(root_id, expiration_time);
            let exit_status = self.exit_status;
            self.finish_concurrent_render(root_id, exit_status, expiration_time)?;
        }
        self.ensure_root_is_scheduled(root_id);

        let unchanged = self
            .roots
            .get(&root_id)
            .is_some_and(|root| root.callback.is_some() && root.callback == original_callback);
        Ok(if unchanged {
            TaskStatus::Continue
        } else {
            TaskStatus::Done
        })
    }

    fn take_finished_work(&mut self, root_id: RootId, expiration_time: ExpirationTime) {
        let Some(root) = self.roots.get_mut(&root_id) else {
            return;
        };
        root.finished_work = self.arena[root.current].alternate;
        root.finished_expiration_time = expiration_time;
        let fresh = std::mem::take(&mut self.fresh);
        self.finished_fresh.entry(root_id).or_default().extend(fresh);
    }

    /// Throws away a render that hit an error nothing could capture.
    fn fail_root(&mut self, root_id: RootId, expiration_time: ExpirationTime) -> ReconcileError {
        let error = self
            .fatal_error
            .take()
            .unwrap_or_else(|| ReconcileError::Uncaught(CapturedError::new("render failed")));
        self.prepare_fresh_stack(root_id, expiration_time);
        if let Some(root) = self.roots.get_mut(&root_id) {
            root.mark_suspended_at_time(expiration_time);
        }
        self.ensure_root_is_scheduled(root_id);
        warn!(root = ?root_id, %error, "render failed");
        error
    }

    fn finish_concurrent_render(
        &mut self,
        root_id: RootId,
        exit_status: RootExitStatus,
        expiration_time: ExpirationTime,
    ) -> Result<(), ReconcileError> {
        self.wip_root = None;
        debug!(root = ?root_id, ?exit_status, ?expiration_time, "render finished");
        match exit_status {
            RootExitStatus::Incomplete | RootExitStatus::FatalErrored => {
                warn!(
                    root = ?root_id,
                    ?exit_status,
                    "unexpected exit status for a finished render"
                );
                Ok(())
            }
            RootExitStatus::Errored => {
                // Retry once synchronously at every level up to idle.
                if let Some(root) = self.roots.get_mut(&root_id) {
                    root.mark_expired_at_time(expiration_time.min(ExpirationTime::IDLE));
                }
                Ok(())
            }
            RootExitStatus::Suspended => {
                let last_suspended = self.mark_root_suspended(root_id, expiration_time);
                if self.latest_processed_expiration_time == ExpirationTime::SYNC {
                    let ms_until_timeout = (self.most_recent_fallback_time
                        + self.config.fallback_throttle_ms)
                        .saturating_sub(self.now_ms());
                    if ms_until_timeout > 10 {
                        if self.should_delay_commit(root_id, expiration_time, last_suspended) {
                            return Ok(());
                        }
                        self.schedule_commit_timeout(root_id, ms_until_timeout);
                        return Ok(());
                    }
                }
                self.commit_root(root_id)
            }
            RootExitStatus::SuspendedWithDelay => {
                let last_suspended = self.mark_root_suspended(root_id, expiration_time);
                if self.should_delay_commit(root_id, expiration_time, last_suspended) {
                    return Ok(());
                }
                let ms_until_timeout =
                    if self.latest_processed_expiration_time == ExpirationTime::SYNC {
                        0
                    } else {
                        let event_time_ms = self
                            .latest_processed_expiration_time
                            .to_ms()
                            .saturating_sub(self.config.async_expiration_ms);
                        let now_ms = self.now_ms();
                        let time_until_expiration = expiration_time.to_ms().saturating_sub(now_ms);
                        let elapsed = now_ms.saturating_sub(event_time_ms);
                        (jnd(elapsed) - elapsed).min(time_until_expiration)
                    };
                if ms_until_timeout > 10 {
                    self.schedule_commit_timeout(root_id, ms_until_timeout);
                    return Ok(());
                }
                self.commit_root(root_id)
            }
            RootExitStatus::Completed => self.commit_root(root_id),
        }
    }

    /// Records that `root` suspended at `expiration_time` and returns the
    /// least urgent suspended level.
    fn mark_root_suspended(
        &mut self,
        root_id: RootId,
        expiration_time: ExpirationTime,
    ) -> ExpirationTime {
        let remaining = self
            .roots
            .get(&root_id)
            .and_then(|root| root.finished_work)
            .map(|finished| self.arena[finished].remaining_expiration_time())
            .unwrap_or(ExpirationTime::NO_WORK);
        let Some(root) = self.roots.get_mut(&root_id) else {
            return ExpirationTime::NO_WORK;
        };
        root.mark_suspended_at_time(expiration_time);
        let last_suspended = root.last_suspended_time;
        if expiration_time == last_suspended {
            root.next_known_pending_level = remaining;
        }
        last_suspended
    }

    /// Whether a suspended tree should be dropped in favour of other work:
    /// a ping arrived while rendering, another level is pending, or a less
    /// urgent suspended level may unblock it.
    fn should_delay_commit(
        &mut self,
        root_id: RootId,
        expiration_time: ExpirationTime,
        last_suspended: ExpirationTime,
    ) -> bool {
        if self.has_pending_ping {
            let last_pinged = self
                .roots
                .get(&root_id)
                .map_or(ExpirationTime::NO_WORK, |root| root.last_pinged_time);
            if last_pinged == ExpirationTime::NO_WORK || last_pinged >= expiration_time {
                if let Some(root) = self.roots.get_mut(&root_id) {
                    root.last_pinged_time = expiration_time;
                }
                self.prepare_fresh_stack(root_id, expiration_time);
                return true;
            }
        }
        let Some(root) = self.roots.get_mut(&root_id) else {
            return true;
        };
        let next = root.next_expiration_time_to_work_on();
        if next != ExpirationTime::NO_WORK && next != expiration_time {
            return true;
        }
        if last_suspended != ExpirationTime::NO_WORK && last_suspended != expiration_time {
            root.last_pinged_time = last_suspended;
            return true;
        }
        false
    }

    fn schedule_commit_timeout(&mut self, root_id: RootId, delay_ms: u64) {
        let handle = self
            .runtime
            .scheduler()
            .schedule_timeout(ScheduledTask::CommitTimeout(root_id), delay_ms);
        if let Some(root) = self.roots.get_mut(&root_id) {
            debug!(root = ?root_id, delay_ms, "suspended commit delayed");
            root.timeout_handle = Some(handle);
        }
    }
}

impl<A: Applier> Reconciler<A> {
    /// Starts a new render of `root` at `expiration_time`, discarding any
    /// interrupted one.
    pub(crate) fn prepare_fresh_stack(&mut self, root_id: RootId, expiration_time: ExpirationTime) {
        let Some(root) = self.roots.get_mut(&root_id) else {
            return;
        };
        root.finished_work = None;
        root.finished_expiration_time = ExpirationTime::NO_WORK;
        let current = root.current;
        if let Some(handle) = root.timeout_handle.take() {
            self.runtime.scheduler().cancel_timeout(handle);
        }
        self.discard_work_in_progress();
        if let Some(stale) = self.finished_fresh.remove(&root_id) {
            for id in stale {
                self.arena.free(id);
            }
        }

        let props = self.arena[current].pending_props.clone();
        let wip = self.arena.create_work_in_progress(current, props);
        self.wip_root = Some(root_id);
        self.wip = Some(wip);
        self.render_expiration_time = expiration_time;
        self.exit_status = RootExitStatus::Incomplete;
        self.fatal_error = None;
        self.latest_processed_expiration_time = ExpirationTime::SYNC;
        self.next_unprocessed_update_time = ExpirationTime::NO_WORK;
        self.has_pending_ping = false;
        trace!(root = ?root_id, ?expiration_time, "fresh stack");
    }

    /// Pops whatever the interrupted render pushed and frees the fibers it
    /// allocated.
    fn discard_work_in_progress(&mut self) {
        let mut interrupted =
            self.wip.and_then(|wip| self.arena.get(wip)).and_then(|f| f.return_fiber);
        while let Some(id) = interrupted {
            self.unwind_interrupted_work(id);
            interrupted = self.arena.get(id).and_then(|fiber| fiber.return_fiber);
        }
        self.contexts.clear();
        self.host_contexts.clear();
        self.suspense_stack.clear();
        for id in self.fresh.drain(..) {
            self.arena.free(id);
        }
        self.wip = None;
        self.wip_root = None;
        self.did_receive_update = false;
    }

    fn work_loop_sync(&mut self) {
        while let Some(unit) = self.wip {
            self.perform_unit_of_work(unit);
        }
    }

    fn work_loop_concurrent(&mut self) {
        while let Some(unit) = self.wip {
            if self.runtime.scheduler().should_yield() {
                trace!("yielding to the host");
                break;
            }
            self.perform_unit_of_work(unit);
        }
    }

    fn perform_unit_of_work(&mut self, unit: FiberId) {
        let current = self.arena[unit].alternate;
        let start = self.start_profiler_timer(unit);
        let result = self.begin_work(current, unit, self.render_expiration_time);
        self.stop_profiler_timer(unit, start, true);
        match result {
            Ok(next) => {
                let fiber = &mut self.arena[unit];
                fiber.memoized_props = fiber.pending_props.clone();
                match next {
                    Some(next) => self.wip = Some(next),
                    None => self.complete_unit_of_work(unit),
                }
            }
            Err(thrown) => self.handle_error(unit, thrown),
        }
    }

    fn start_profiler_timer(&mut self, fiber: FiberId) -> Option<u64> {
        if !self.config.enable_profiler_timer
            || !self.arena[fiber].mode.contains(FiberMode::PROFILE)
        {
            return None;
        }
        let now = self.now_ms();
        let fiber = &mut self.arena[fiber];
        if fiber.actual_start_time.is_none() {
            fiber.actual_start_time = Some(now);
        }
        Some(now)
    }

    fn stop_profiler_timer(&mut self, fiber: FiberId, start: Option<u64>, override_base: bool) {
        let Some(start) = start else {
            return;
        };
        let elapsed = self.now_ms().saturating_sub(start);
        let fiber = &mut self.arena[fiber];
        fiber.actual_duration += elapsed;
        if override_base {
            fiber.self_base_duration = elapsed;
        }
    }

    /// Routes a value thrown by `unit` to the nearest boundary that can
    /// handle it, then continues by completing `unit` as incomplete.
    fn handle_error(&mut self, unit: FiberId, thrown: Thrown) {
        let Some(return_fiber) = self.arena[unit].return_fiber else {
            let error = match thrown {
                Thrown::Error(error) => error,
                Thrown::Suspend(_) => CapturedError::new(crate::error::SUSPENDED_WITHOUT_FALLBACK),
            };
            self.exit_status = RootExitStatus::FatalErrored;
            self.fatal_error = Some(ReconcileError::Uncaught(error));
            self.wip = None;
            return;
        };
        self.throw_exception(return_fiber, unit, thrown);
        self.complete_unit_of_work(unit);
    }

    /// Completes `unit` and walks up until a sibling (or a fiber that needs
    /// another pass) is found.
    pub(crate) fn complete_unit_of_work(&mut self, unit: FiberId) {
        let mut completed = unit;
        loop {
            let current = self.arena[completed].alternate;
            let return_fiber = self.arena[completed].return_fiber;

            if !self.arena[completed].flags.contains(EffectFlags::INCOMPLETE) {
                let start = self.start_profiler_timer(completed);
                let next = match self.complete_work(current, completed) {
                    Ok(next) => next,
                    Err(error) => {
                        self.exit_status = RootExitStatus::FatalErrored;
                        self.fatal_error = Some(error);
                        self.wip = None;
                        return;
                    }
                };
                self.stop_profiler_timer(completed, start, false);
                self.reset_child_expiration_time(completed);
                if let Some(next) = next {
                    self.wip = Some(next);
                    return;
                }
                if let Some(parent) = return_fiber {
                    if !self.arena[parent].flags.contains(EffectFlags::INCOMPLETE) {
                        let child_effects = std::mem::take(&mut self.arena[completed].effects);
                        let has_effect = self.arena[completed].flags.has_commit_effect();
                        let parent_effects = &mut self.arena[parent].effects;
                        parent_effects.extend(child_effects);
                        if has_effect {
                            parent_effects.push(completed);
                        }
                    }
                }
            } else {
                let next = self.unwind_work(completed);
                if self.arena[completed].mode.contains(FiberMode::PROFILE) {
                    let mut duration = self.arena[completed].actual_duration;
                    let mut child = self.arena[completed].child;
                    while let Some(id) = child {
                        duration += self.arena[id].actual_duration;
                        child = self.arena[id].sibling;
                    }
                    self.arena[completed].actual_duration = duration;
                }
                if let Some(next) = next {
                    self.arena[next].flags &= EffectFlags::HOST_EFFECT_MASK;
                    self.wip = Some(next);
                    return;
                }
                if let Some(parent) = return_fiber {
                    let parent = &mut self.arena[parent];
                    parent.effects.clear();
                    parent.flags |= EffectFlags::INCOMPLETE;
                }
            }

            if let Some(sibling) = self.arena[completed].sibling {
                self.wip = Some(sibling);
                return;
            }
            match return_fiber {
                Some(parent) => completed = parent,
                None => break,
            }
        }
        if self.exit_status == RootExitStatus::Incomplete {
            self.exit_status = RootExitStatus::Completed;
        }
        self.wip = None;
    }

    fn reset_child_expiration_time(&mut self, completed: FiberId) {
        let fiber = &self.arena[completed];
        if self.render_expiration_time != ExpirationTime::NEVER
            && fiber.child_expiration_time == ExpirationTime::NEVER
        {
            // Hidden children keep their deferred work.
            return;
        }
        let profiling =
            self.config.enable_profiler_timer && fiber.mode.contains(FiberMode::PROFILE);
        let bubble_actual = fiber
            .alternate
            .and_then(|current| self.arena.get(current))
            .map_or(true, |current| current.child != fiber.child);
        let mut actual_duration = fiber.actual_duration;
        let mut tree_base_duration = fiber.self_base_duration;
        let mut new_child_expiration = ExpirationTime::NO_WORK;
        let mut child = fiber.child;
        while let Some(id) = child {
            let child_fiber = &self.arena[id];
            new_child_expiration = new_child_expiration
                .max(child_fiber.expiration_time)
                .max(child_fiber.child_expiration_time);
            if profiling {
                if bubble_actual {
                    actual_duration += child_fiber.actual_duration;
                }
                tree_base_duration += child_fiber.tree_base_duration;
            }
            child = child_fiber.sibling;
        }
        let fiber = &mut self.arena[completed];
        fiber.child_expiration_time = new_child_expiration;
        if profiling {
            fiber.actual_duration = actual_duration;
            fiber.tree_base_duration = tree_base_duration;
        }
    }

    pub(crate) fn mark_render_event_time(&mut self, expiration_time: ExpirationTime) {
        if expiration_time < self.latest_processed_expiration_time
            && expiration_time > ExpirationTime::IDLE
        {
            self.latest_processed_expiration_time = expiration_time;
        }
    }

    pub(crate) fn mark_unprocessed_update_time(&mut self, expiration_time: ExpirationTime) {
        if expiration_time > self.next_unprocessed_update_time {
            self.next_unprocessed_update_time = expiration_time;
        }
    }

    pub(crate) fn render_did_suspend(&mut self) {
        if self.exit_status == RootExitStatus::Incomplete {
            self.exit_status = RootExitStatus::Suspended;
        }
    }

    pub(crate) fn render_did_suspend_delay_if_possible(&mut self) {
        if matches!(
            self.exit_status,
            RootExitStatus::Incomplete | RootExitStatus::Suspended
        ) {
            self.exit_status = RootExitStatus::SuspendedWithDelay;
        }
        // Park this level so the pending update gets its own render.
        if self.next_unprocessed_update_time != ExpirationTime::NO_WORK {
            let render_expiration_time = self.render_expiration_time;
            let next_unprocessed = self.next_unprocessed_update_time;
            if let Some(root) = self.wip_root.and_then(|id| self.roots.get_mut(&id)) {
                root.mark_suspended_at_time(render_expiration_time);
                root.mark_updated_at_time(next_unprocessed);
            }
        }
    }

    pub(crate) fn render_did_error(&mut self) {
        if self.exit_status != RootExitStatus::Completed {
            self.exit_status = RootExitStatus::Errored;
        }
    }

    /// Whether a render is in progress that has not yet suspended.
    pub(crate) fn render_has_not_suspended_yet(&self) -> bool {
        self.exit_status == RootExitStatus::Incomplete
    }
}

impl<A: Applier> Reconciler<A> {
    /// Runs `f` with updates batched; synchronous work is flushed once the
    /// outermost batch ends.
    pub fn batched_updates<R>(
        &mut self,
        f: impl FnOnce(&mut Self) -> R,
    ) -> Result<R, ReconcileError> {
        let prev_context = self.execution_context;
        self.execution_context |= ExecutionContext::BATCHED;
        let result = f(self);
        let drained = self.drain_updates();
        self.execution_context = prev_context;
        drained?;
        if self.execution_context.is_empty() {
            self.flush_sync_callback_queue()?;
        }
        Ok(result)
    }

    /// Runs `f` as a discrete user event at user-blocking priority.
    pub fn discrete_updates<R>(
        &mut self,
        f: impl FnOnce(&mut Self) -> R,
    ) -> Result<R, ReconcileError> {
        let prev_context = self.execution_context;
        self.execution_context |= ExecutionContext::DISCRETE_EVENT;
        let prev_priority = self.runtime.set_current_priority(PriorityLevel::UserBlocking);
        let result = f(self);
        let drained = self.drain_updates();
        self.runtime.set_current_priority(prev_priority);
        self.execution_context = prev_context;
        drained?;
        if self.execution_context.is_empty() {
            self.flush_sync_callback_queue()?;
        }
        Ok(result)
    }

    /// Runs `f` with `priority` as the ambient priority for new updates.
    pub fn run_with_priority<R>(
        &mut self,
        priority: PriorityLevel,
        f: impl FnOnce(&mut Self) -> R,
    ) -> Result<R, ReconcileError> {
        let prev_priority = self.runtime.set_current_priority(priority);
        let prev_context = self.execution_context;
        self.execution_context |= ExecutionContext::EVENT;
        let result = f(self);
        let drained = self.drain_updates();
        self.execution_context = prev_context;
        self.runtime.set_current_priority(prev_priority);
        drained?;
        if self.execution_context.is_empty() {
            self.flush_sync_callback_queue()?;
        }
        Ok(result)
    }

    /// Runs `f` at immediate priority and renders everything it scheduled
    /// before returning.
    pub fn flush_sync<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> Result<R, ReconcileError> {
        let prev_context = self.execution_context;
        self.execution_context |= ExecutionContext::BATCHED;
        let prev_priority = self.runtime.set_current_priority(PriorityLevel::Immediate);
        let result = f(self);
        let drained = self.drain_updates();
        self.runtime.set_current_priority(prev_priority);
        self.execution_context = prev_context;
        drained?;
        self.flush_sync_callback_queue()?;
        Ok(result)
    }

    /// Synchronously renders every root that received a discrete update,
    /// then flushes pending passive effects.
    pub fn flush_discrete_updates(&mut self) -> Result<(), ReconcileError> {
        if self.execution_context.intersects(
            ExecutionContext::BATCHED | ExecutionContext::RENDER | ExecutionContext::COMMIT,
        ) {
            return Ok(());
        }
        let pending: Vec<(RootId, ExpirationTime)> = self.pending_discrete.drain().collect();
        for (root_id, expiration_time) in pending {
            if let Some(root) = self.roots.get_mut(&root_id) {
                root.mark_expired_at_time(expiration_time);
            }
            self.ensure_root_is_scheduled(root_id);
        }
        self.flush_sync_callback_queue()?;
        self.flush_passive_effects()?;
        Ok(())
    }

    /// Runs `f` at normal priority.
    pub fn deferred_updates<R>(
        &mut self,
        f: impl FnOnce(&mut Self) -> R,
    ) -> Result<R, ReconcileError> {
        self.run_with_priority(PriorityLevel::Normal, f)
    }

    /// Applies every update queued by setters and class updaters.
    pub(crate) fn process_updates(&mut self) -> Result<(), ReconcileError> {
        self.drain_updates()?;
        if self.execution_context.is_empty() {
            self.flush_sync_callback_queue()?;
        }
        Ok(())
    }

    /// Moves queued updates onto their fibers and schedules them, without
    /// flushing synchronous work.
    pub(crate) fn drain_updates(&mut self) -> Result<(), ReconcileError> {
        if !self.runtime.has_updates() {
            return Ok(());
        }
        let prev_context = self.execution_context;
        self.execution_context |= ExecutionContext::BATCHED;
        let mut updates = self.runtime.take_updates().into_iter();
        let mut result = Ok(());
        for update in updates.by_ref() {
            if let Err(error) = self.apply_pending_update(update) {
                result = Err(error);
                break;
            }
        }
        let dropped = updates.count();
        if dropped > 0 {
            warn!(dropped, "discarding updates queued behind a failed update");
        }
        self.execution_context = prev_context;
        result
    }

    fn apply_pending_update(&mut self, update: PendingUpdate) -> Result<(), ReconcileError> {
        let PendingUpdate { fiber, priority, kind } = update;
        if !self.arena.contains(fiber) {
            trace!(?fiber, "dropping update for an unmounted component");
            return Ok(());
        }
        let current_time = self.request_current_time();
        let expiration_time = self.compute_expiration_for_fiber(current_time, fiber, priority);
        match kind {
            UpdateKind::Hook { queue, action } => queue.pending.borrow_mut().push(HookUpdate {
                expiration_time,
                action,
            }),
            UpdateKind::Class {
                pending,
                tag,
                payload,
                callback,
            } => {
                let mut update = Update::new(expiration_time, tag);
                if let Some(payload) = payload {
                    update = update.with_payload(payload);
                }
                if let Some(callback) = callback {
                    update = update.with_callback(UpdateCallback::User(callback));
                }
                pending.borrow_mut().push(update);
            }
        }
        self.schedule_update_on_fiber(fiber, expiration_time)
    }

    /// Handles thenables that settled since the last call.
    fn process_wakeups(&mut self) -> Result<(), ReconcileError> {
        for wakeup in self.runtime.take_wakeups() {
            match wakeup {
                Wakeup::Ping {
                    root,
                    thenable,
                    expiration,
                } => self.ping_suspended_root(root, thenable, expiration),
                Wakeup::Retry { boundary, thenable } => self.retry_timed_out_boundary(
                    boundary,
                    thenable,
                ),
            }
        }
        if self.execution_context.is_empty() {
            self.flush_sync_callback_queue()?;
        }
        Ok(())
    }

    fn ping_suspended_root(
        &mut self,
        root_id: RootId,
        thenable: crate::thenable::ThenableId,
        suspended_time: ExpirationTime,
    ) {
        let Some(root) = self.roots.get_mut(&root_id) else {
            return;
        };
        root.ping_cache.remove(&thenable);
        trace!(root = ?root_id, ?thenable, ?suspended_time, "ping");

        if self.wip_root == Some(root_id) && self.render_expiration_time == suspended_time {
            let since_fallback = self.now_ms().saturating_sub(self.most_recent_fallback_time);
            let restart = self.exit_status == RootExitStatus::SuspendedWithDelay
                || (self.exit_status == RootExitStatus::Suspended
                    && self.latest_processed_expiration_time == ExpirationTime::SYNC
                    && since_fallback < self.config.fallback_throttle_ms);
            if restart {
                self.prepare_fresh_stack(root_id, suspended_time);
            } else {
                self.has_pending_ping = true;
            }
            return;
        }

        let Some(root) = self.roots.get_mut(&root_id) else {
            return;
        };
        if !root.is_suspended_at_time(suspended_time) {
            return;
        }
        let last_pinged = root.last_pinged_time;
        if last_pinged != ExpirationTime::NO_WORK && last_pinged < suspended_time {
            return;
        }
        root.last_pinged_time = suspended_time;
        if root.finished_expiration_time == suspended_time {
            root.finished_expiration_time = ExpirationTime::NO_WORK;
            root.finished_work = None;
        }
        self.ensure_root_is_scheduled(root_id);
    }

    fn retry_timed_out_boundary(
        &mut self,
        boundary: FiberId,
        thenable: crate::thenable::ThenableId,
    ) {
        let Some(fiber) = self.arena.get(boundary) else {
            return;
        };
        if let StateNode::Retry(cache) = &fiber.state_node {
            cache.borrow_mut().remove(&thenable);
        }
        let current_time = self.request_current_time();
        let priority = self.runtime.current_priority();
        let retry_time = self.compute_expiration_for_fiber(current_time, boundary, priority);
        trace!(?boundary, ?retry_time, "retry timed out boundary");
        if let Some(root_id) = self.mark_update_time_from_fiber_to_root(boundary, retry_time) {
            self.ensure_root_is_scheduled(root_id);
        }
    }
}

impl<A: Applier> Reconciler<A> {
    pub(crate) fn push_host_container(&mut self, container: HostId) {
        let context = self.applier.root_host_context(container);
        self.host_contexts.push(context);
    }

    pub(crate) fn pop_host_container(&mut self) {
        self.host_contexts.pop();
    }

    pub(crate) fn push_host_context(&mut self, ty: &str) {
        let context = match self.host_contexts.last() {
            Some(parent) => self.applier.child_host_context(parent, ty),
            None => {
                warn!(ty, "host component rendered outside a host container");
                return;
            }
        };
        self.host_contexts.push(context);
    }

    pub(crate) fn pop_host_context(&mut self) {
        self.host_contexts.pop();
    }

    pub(crate) fn current_host_context(&self) -> Option<&A::HostContext> {
        self.host_contexts.last()
    }

    pub(crate) fn push_suspense_context(&mut self, context: SuspenseContext) {
        self.suspense_stack.push(context);
    }

    pub(crate) fn pop_suspense_context(&mut self) {
        self.suspense_stack.pop();
    }

    pub(crate) fn current_suspense_context(&self) -> SuspenseContext {
        self.suspense_stack.last().copied().unwrap_or_default()
    }

    /// Frees fibers allocated for a committed render that did not end up
    /// in the committed tree.
    pub(crate) fn sweep_fresh_fibers(&mut self, root_id: RootId, root_current: FiberId) {
        let Some(fresh) = self.finished_fresh.remove(&root_id) else {
            return;
        };
        let mut attached: HashSet<FiberId> = HashSet::default();
        attached.insert(root_current);
        let mut child_sets: HashMap<FiberId, HashSet<FiberId>> = HashMap::default();
        let mut freed = 0usize;
        for id in fresh {
            if !self.arena.contains(id) || self.is_attached(id, &mut attached, &mut child_sets) {
                continue;
            }
            self.arena.free(id);
            freed += 1;
        }
        if freed > 0 {
            trace!(root = ?root_id, freed, "released detached fibers");
        }
    }

    fn is_attached(
        &self,
        id: FiberId,
        attached: &mut HashSet<FiberId>,
        child_sets: &mut HashMap<FiberId, HashSet<FiberId>>,
    ) -> bool {
        let mut path = Vec::new();
        let mut node = id;
        let reached = loop {
            if attached.contains(&node) {
                break true;
            }
            let Some(parent) = self.arena.get(node).and_then(|fiber| fiber.return_fiber) else {
                break false;
            };
            let children = child_sets
                .entry(parent)
                .or_insert_with(|| self.arena.children(parent).into_iter().collect());
            if !children.contains(&node) {
                break false;
            }
            path.push(node);
            node = parent;
        };
        if reached {
            attached.extend(path);
        }
        reached
    }
}
