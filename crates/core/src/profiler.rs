use std::io::Write;
use std::time::Duration;

use callpath_protocol::{ResultNode, SharedStr, TreeSnapshot};
use tracing::debug;

use crate::config::ProfilerConfig;
use crate::error::{ProfileError, SnapshotError};
use crate::model::{CallPathTree, NodeId};
use crate::snapshot;
use crate::views::{stats::Statistics, tree_dump};

/// Whether `leave` commits or rolls back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfilerState {
    Normal,
    /// The active chain was cancelled; every `leave` until the cursor is back
    /// at the root undoes instead of committing.
    Cancelling,
}

type CancelHook = Box<dyn FnMut()>;

/// Orchestrates one [`CallPathTree`] for one logical call stack.
///
/// ```text
///   Normal ──cancel()──▶ Cancelling ──leave() reaching root──▶ Normal
/// ```
///
/// The profiler does no synchronization; a program profiling several
/// threads gives each its own instance (see [`crate::current`]).
pub struct CallProfiler {
    tree: CallPathTree,
    state: ProfilerState,
    generation: u64,
    config: ProfilerConfig,
    cancel_hooks: Vec<CancelHook>,
}

impl std::fmt::Debug for CallProfiler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallProfiler")
            .field("tree", &self.tree)
            .field("state", &self.state)
            .field("generation", &self.generation)
            .field("config", &self.config)
            .field("cancel_hooks", &self.cancel_hooks.len())
            .finish()
    }
}

impl Default for CallProfiler {
    fn default() -> Self {
        Self::new()
    }
}

impl CallProfiler {
    pub fn new() -> Self {
        Self::with_config(ProfilerConfig::default())
    }

    pub fn with_config(config: ProfilerConfig) -> Self {
        Self {
            tree: CallPathTree::new(),
            state: ProfilerState::Normal,
            generation: 0,
            config,
            cancel_hooks: Vec::new(),
        }
    }

    /// Rebuild an idle profiler from a saved snapshot.
    pub fn from_snapshot(snapshot: &TreeSnapshot, config: ProfilerConfig) -> Result<Self, SnapshotError> {
        let mut profiler = Self::with_config(config);
        profiler.tree = snapshot::restore_tree(snapshot)?;
        Ok(profiler)
    }

    pub fn config(&self) -> &ProfilerConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: ProfilerConfig) {
        self.config = config;
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn tree(&self) -> &CallPathTree {
        &self.tree
    }

    pub fn state(&self) -> ProfilerState {
        self.state
    }

    /// Incremented by every [`reset`](Self::reset). Scope guards compare it to
    /// detect that the chain they entered no longer exists.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn live_node_count(&self) -> usize {
        self.tree.live_node_count()
    }

    /// Throw away all statistics, any in-flight chain and registered cancel hooks.
    pub fn reset(&mut self) {
        if !self.tree.is_root() {
            debug!(depth = self.tree.depth(), "reset discards an active call chain");
        }
        self.tree.reset();
        self.state = ProfilerState::Normal;
        self.generation += 1;
        self.cancel_hooks.clear();
        debug!(generation = self.generation, "call profiler reset");
    }

    pub fn enter<I>(&mut self, identity: I) -> Result<NodeId, ProfileError>
    where
        I: AsRef<str> + Into<SharedStr>,
    {
        if identity.as_ref().is_empty() {
            return Err(ProfileError::InvalidIdentity);
        }
        self.tree.enter(identity)
    }

    /// Close the innermost active call: commit `elapsed`, or roll the node
    /// back if the chain was cancelled.
    pub fn leave(&mut self, elapsed: Duration) -> Result<NodeId, ProfileError> {
        match self.state {
            ProfilerState::Normal => self.tree.exit(elapsed),
            ProfilerState::Cancelling => {
                let id = self.tree.rollback_one()?;
                if self.tree.is_root() {
                    self.state = ProfilerState::Normal;
                    debug!(live = self.tree.live_node_count(), "cancelled call chain rolled back");
                }
                Ok(id)
            }
        }
    }

    /// Void the whole active call chain. Idempotent; a no-op when idle.
    pub fn cancel(&mut self) {
        if let Some(mut hooks) = self.begin_cancel() {
            let generation = self.generation;
            for hook in &mut hooks {
                hook();
            }
            self.return_cancel_hooks(hooks, generation);
        }
    }

    /// Switch to [`ProfilerState::Cancelling`] and hand out the hooks to run,
    /// or `None` when there is nothing to cancel.
    pub(crate) fn begin_cancel(&mut self) -> Option<Vec<CancelHook>> {
        if self.tree.is_root() {
            debug!("cancel ignored: no active call chain");
            return None;
        }
        if self.state == ProfilerState::Cancelling {
            return None;
        }
        self.state = ProfilerState::Cancelling;
        debug!(depth = self.tree.depth(), "call chain cancelled");
        Some(std::mem::take(&mut self.cancel_hooks))
    }

    /// Put hooks taken by [`begin_cancel`](Self::begin_cancel) back in front
    /// of any registered meanwhile. Dropped if a reset happened in between.
    pub(crate) fn return_cancel_hooks(&mut self, mut hooks: Vec<CancelHook>, generation: u64) {
        if self.generation != generation {
            return;
        }
        hooks.append(&mut self.cancel_hooks);
        self.cancel_hooks = hooks;
    }

    /// Run `hook` each time a chain switches to [`ProfilerState::Cancelling`].
    ///
    /// When cancelling through a [`ProfilerHandle`](crate::ProfilerHandle),
    /// hooks run after the handle's borrow is released, so they may inspect
    /// the profiler through a handle of their own.
    pub fn add_cancel_hook(&mut self, hook: impl FnMut() + 'static) {
        self.cancel_hooks.push(Box::new(hook));
    }

    /// Hierarchical dump, one line per call path.
    pub fn print_profiling_result<W: Write + ?Sized>(&self, out: &mut W) -> std::io::Result<()> {
        tree_dump::write_tree(&self.tree, self.config.indent_width, out)
    }

    pub fn statistics(&self) -> Statistics {
        Statistics::from_tree(&self.tree, self.config.sort, self.config.ascending)
    }

    /// Per-function table aggregated over every call path.
    pub fn print_statistics<W: Write + ?Sized>(&self, out: &mut W) -> std::io::Result<()> {
        self.statistics().write_report(out)
    }

    pub fn result(&self) -> ResultNode {
        snapshot::result_tree(&self.tree)
    }

    pub fn snapshot(&self) -> TreeSnapshot {
        snapshot::capture(&self.tree)
    }

    /// Write `{"radix_tree": <snapshot>}` as JSON.
    pub fn serialize<W: Write>(&self, out: W) -> Result<(), serde_json::Error> {
        snapshot::write_document(&self.tree, out)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn empty_identity_is_rejected() {
        let mut p = CallProfiler::new();
        assert_eq!(p.enter(""), Err(ProfileError::InvalidIdentity));
        assert!(p.tree().is_root());
        assert_eq!(p.live_node_count(), 0);
    }

    #[test]
    fn leave_without_enter_underflows() {
        let mut p = CallProfiler::new();
        assert_eq!(p.leave(ms(1)), Err(ProfileError::StackUnderflow));
    }

    #[test]
    fn cancel_rolls_back_and_returns_to_normal() {
        let mut p = CallProfiler::new();
        p.enter("f_outer").unwrap();
        p.enter("f_inner").unwrap();
        p.cancel();
        assert_eq!(p.state(), ProfilerState::Cancelling);
        p.leave(ms(3)).unwrap();
        assert_eq!(p.state(), ProfilerState::Cancelling);
        p.leave(ms(5)).unwrap();
        assert_eq!(p.state(), ProfilerState::Normal);
        assert_eq!(p.live_node_count(), 0);
    }

    #[test]
    fn cancel_is_idempotent_and_runs_hooks_once_per_chain() {
        let fired = Rc::new(Cell::new(0));
        let mut p = CallProfiler::new();
        let counter = Rc::clone(&fired);
        p.add_cancel_hook(move || counter.set(counter.get() + 1));

        p.enter("a").unwrap();
        p.cancel();
        p.cancel();
        p.leave(ms(1)).unwrap();
        assert_eq!(fired.get(), 1);

        p.enter("b").unwrap();
        p.cancel();
        p.leave(ms(1)).unwrap();
        assert_eq!(fired.get(), 2);
    }

    #[test]
    fn cancel_when_idle_is_ignored() {
        let mut p = CallProfiler::new();
        p.cancel();
        assert_eq!(p.state(), ProfilerState::Normal);
        p.enter("a").unwrap();
        p.leave(ms(2)).unwrap();
        assert_eq!(p.tree().get_child("a").map(|n| n.data().call_count), Some(1));
    }

    #[test]
    fn reset_clears_state_hooks_and_bumps_generation() {
        let fired = Rc::new(Cell::new(false));
        let mut p = CallProfiler::new();
        let flag = Rc::clone(&fired);
        p.add_cancel_hook(move || flag.set(true));
        p.enter("a").unwrap();
        p.cancel();
        p.reset();

        assert_eq!(p.state(), ProfilerState::Normal);
        assert_eq!(p.generation(), 1);
        assert_eq!(p.live_node_count(), 0);

        p.enter("b").unwrap();
        fired.set(false);
        p.cancel();
        assert!(!fired.get());
    }

    #[test]
    fn committed_work_before_cancel_in_same_chain_is_discarded() {
        let mut p = CallProfiler::new();
        p.enter("main").unwrap();
        p.leave(ms(10)).unwrap();

        p.enter("main").unwrap();
        p.enter("step").unwrap();
        p.leave(ms(4)).unwrap();
        p.cancel();
        p.leave(ms(9)).unwrap();

        assert_eq!(p.live_node_count(), 1);
        let main = p.tree().get_child("main").unwrap();
        assert_eq!(main.data().call_count, 1);
        assert_eq!(main.data().total_time, ms(10));
    }
}
