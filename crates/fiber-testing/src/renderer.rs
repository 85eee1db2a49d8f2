use std::rc::Rc;

use fiber_core::{
    ExpirationTime, HostId, MemoryApplier, Node, ReconcileError, Reconciler, ReconcilerConfig,
    RootId, RootMode,
};

use crate::scheduler::VirtualScheduler;

/// Headless harness for exercising a reconciler root in tests.
///
/// `TestRenderer` owns an in-memory host tree, a [`VirtualScheduler`] and a
/// single root. Nothing runs behind the test's back: work scheduled by
/// renders, setters or settled thenables waits until one of the flush
/// helpers (or [`TestRenderer::act`]) drives it.
pub struct TestRenderer {
    scheduler: Rc<VirtualScheduler>,
    reconciler: Reconciler<MemoryApplier>,
    root: RootId,
    container: HostId,
}

impl TestRenderer {
    pub fn new(mode: RootMode) -> Self {
        Self::with_config(mode, ReconcilerConfig::default())
    }

    /// A root whose updates render synchronously.
    pub fn legacy() -> Self {
        Self::new(RootMode::Legacy)
    }

    /// A root whose updates render in interruptible slices.
    pub fn concurrent() -> Self {
        Self::new(RootMode::Concurrent)
    }

    pub fn with_config(mode: RootMode, config: ReconcilerConfig) -> Self {
        let mut applier = MemoryApplier::new();
        let container = applier.create_container();
        let scheduler = Rc::new(VirtualScheduler::new());
        let mut reconciler = Reconciler::with_config(applier, scheduler.clone(), config);
        let root = reconciler.create_root(container, mode);
        Self {
            scheduler,
            reconciler,
            root,
            container,
        }
    }

    /// Schedules `node` as the root's content without flushing concurrent
    /// work.
    pub fn render(&mut self, node: impl Into<Node>) -> Result<ExpirationTime, ReconcileError> {
        self.reconciler.update_container(self.root, node)
    }

    /// Runs `f` against the reconciler, then flushes all resulting work
    /// including passive effects.
    pub fn act<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> Result<R, ReconcileError> {
        let result = f(self);
        self.flush_all()?;
        Ok(result)
    }

    /// Renders `node` and flushes everything it scheduled.
    pub fn render_and_flush(&mut self, node: impl Into<Node>) -> Result<(), ReconcileError> {
        self.render(node)?;
        self.flush_all()
    }

    pub fn flush_all(&mut self) -> Result<(), ReconcileError> {
        self.scheduler.flush_all(&mut self.reconciler)
    }

    /// Runs only the most urgent queued task.
    pub fn flush_next(&mut self) -> Result<bool, ReconcileError> {
        self.scheduler.flush_next(&mut self.reconciler)
    }

    /// Performs at most `units` units of render work before yielding.
    /// Returns whether work remains.
    pub fn flush_until_yield(&mut self, units: usize) -> Result<bool, ReconcileError> {
        self.scheduler.flush_until_yield(&mut self.reconciler, units)
    }

    pub fn flush_expired(&mut self) -> Result<(), ReconcileError> {
        self.scheduler.flush_expired(&mut self.reconciler)
    }

    /// Moves virtual time forward, queueing due timers without running them.
    pub fn advance_time(&mut self, ms: u64) {
        self.scheduler.advance_time(ms);
    }

    pub fn unmount(&mut self) -> Result<(), ReconcileError> {
        self.reconciler.unmount_root(self.root)?;
        self.flush_all()
    }

    /// Concatenated text of the visible host tree.
    pub fn text(&self) -> String {
        self.reconciler.applier().text_content(self.container)
    }

    /// Host nodes directly under the root container.
    pub fn children(&self) -> Vec<HostId> {
        self.reconciler.applier().children(self.container)
    }

    pub fn dump(&self) -> String {
        self.reconciler.applier().dump_tree(Some(self.container))
    }

    /// Drains the host operation log recorded by the in-memory applier.
    pub fn take_host_log(&mut self) -> Vec<String> {
        self.reconciler.applier_mut().take_log()
    }

    pub fn root(&self) -> RootId {
        self.root
    }

    pub fn container(&self) -> HostId {
        self.container
    }

    pub fn scheduler(&self) -> &VirtualScheduler {
        &self.scheduler
    }

    pub fn applier(&self) -> &MemoryApplier {
        self.reconciler.applier()
    }

    pub fn applier_mut(&mut self) -> &mut MemoryApplier {
        self.reconciler.applier_mut()
    }

    pub fn reconciler(&self) -> &Reconciler<MemoryApplier> {
        &self.reconciler
    }

    pub fn reconciler_mut(&mut self) -> &mut Reconciler<MemoryApplier> {
        &mut self.reconciler
    }

    /// Whether the root still has uncommitted work at any priority.
    pub fn has_pending_work(&self) -> bool {
        self.reconciler.has_pending_work(self.root)
    }
}

impl Default for TestRenderer {
    fn default() -> Self {
        Self::concurrent()
    }
}

/// Convenience helper for tests that only need temporary access to a
/// `TestRenderer`.
pub fn run_test_renderer<R>(mode: RootMode, f: impl FnOnce(&mut TestRenderer) -> R) -> R {
    let mut renderer = TestRenderer::new(mode);
    f(&mut renderer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fiber_core::Element;

    #[test]
    fn legacy_render_commits_immediately() {
        run_test_renderer(RootMode::Legacy, |r| {
            r.render(Element::host("p").child("hello")).expect("render");
            assert_eq!(r.text(), "hello");
            assert_eq!(r.children().len(), 1);
        });
    }

    #[test]
    fn concurrent_render_waits_for_a_flush() {
        run_test_renderer(RootMode::Concurrent, |r| {
            r.render(Element::host("p").child("hello")).expect("render");
            assert_eq!(r.text(), "");
            assert!(r.scheduler().has_pending_tasks());
            r.flush_all().expect("flush");
            assert_eq!(r.text(), "hello");
            assert!(!r.has_pending_work());
            assert!(r.dump().contains("p"));
        });
    }

    #[test]
    fn unmount_clears_the_container() {
        let mut r = TestRenderer::concurrent();
        r.render_and_flush(Element::host("p").child("bye")).expect("mount");
        r.unmount().expect("unmount");
        assert!(r.children().is_empty());
    }
}
