//! Property-based checks of the call-path tree invariants, driven through
//! `CallProfiler` with synthetic durations.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use callpath_core::{CallProfiler, ProfilerState};
use proptest::prelude::*;

const NAMES: [&str; 4] = ["alpha", "beta", "gamma", "delta"];

#[derive(Debug, Clone, Copy)]
enum Op {
    Enter(usize),
    /// Leave the innermost call after `n` microseconds of its own work.
    Leave(u64),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..NAMES.len()).prop_map(Op::Enter),
        (0u64..500).prop_map(Op::Leave),
    ]
}

/// Replays ops while keeping inclusive time consistent: a call's elapsed time
/// is its own work plus the elapsed time of the calls it made.
struct Driver {
    /// Accumulated child time per open call.
    open: Vec<Duration>,
    /// Identities of the open calls, outermost first.
    path: Vec<&'static str>,
    /// Completed calls per call path.
    closed: HashMap<Vec<&'static str>, u64>,
}

impl Driver {
    fn new() -> Self {
        Self {
            open: Vec::new(),
            path: Vec::new(),
            closed: HashMap::new(),
        }
    }

    fn enter(&mut self, p: &mut CallProfiler, name: usize) {
        p.enter(NAMES[name]).unwrap();
        self.open.push(Duration::ZERO);
        self.path.push(NAMES[name]);
    }

    fn leave(&mut self, p: &mut CallProfiler, own_us: u64) {
        *self.closed.entry(self.path.clone()).or_default() += 1;
        self.path.pop();
        let children = self.open.pop().unwrap();
        let elapsed = children + Duration::from_micros(own_us);
        p.leave(elapsed).unwrap();
        if let Some(parent) = self.open.last_mut() {
            *parent += elapsed;
        }
    }

    /// Apply `ops`, never closing calls below `floor` open frames.
    fn run(&mut self, p: &mut CallProfiler, ops: &[Op], floor: usize) {
        for op in ops {
            match *op {
                Op::Enter(name) => self.enter(p, name),
                Op::Leave(us) if self.open.len() > floor => self.leave(p, us),
                Op::Leave(_) => {}
            }
        }
    }

    fn finish(&mut self, p: &mut CallProfiler) {
        while !self.open.is_empty() {
            self.leave(p, 1);
        }
    }
}

fn profiled(ops: &[Op]) -> CallProfiler {
    profiled_with_counts(ops).0
}

fn profiled_with_counts(ops: &[Op]) -> (CallProfiler, HashMap<Vec<&'static str>, u64>) {
    let mut p = CallProfiler::new();
    let mut driver = Driver::new();
    driver.run(&mut p, ops, 0);
    driver.finish(&mut p);
    (p, driver.closed)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn prop_one_node_per_call_path_counting_its_calls(ops in prop::collection::vec(op(), 0..64)) {
        let (p, closed) = profiled_with_counts(&ops);
        let tree = p.tree();
        let mut path: Vec<&'static str> = Vec::new();
        for (depth, node) in tree.iter_preorder() {
            let mut seen = HashSet::new();
            for child in tree.children_of(node.id()) {
                prop_assert!(seen.insert(child.identity().as_str()), "duplicate {}", child.identity());
            }
            if node.is_root() {
                continue;
            }
            path.truncate(depth - 1);
            let name = NAMES.iter().copied().find(|n| node.identity() == *n);
            prop_assert!(name.is_some(), "unexpected identity {}", node.identity());
            path.extend(name);
            prop_assert_eq!(closed.get(&path).copied(), Some(node.data().call_count), "{:?}", path);
        }
        prop_assert_eq!(tree.live_node_count(), closed.len());
    }

    #[test]
    fn prop_self_times_partition_top_level_time(ops in prop::collection::vec(op(), 0..64)) {
        let p = profiled(&ops);
        let tree = p.tree();
        let mut total_self = Duration::ZERO;
        for (_, node) in tree.iter_preorder().filter(|(_, n)| !n.is_root()) {
            let self_time = tree.self_time(node.id());
            prop_assert!(self_time <= node.data().total_time);
            total_self += self_time;
        }
        let top_level: Duration = tree.children_of(tree.root().id()).map(|n| n.data().total_time).sum();
        prop_assert_eq!(total_self, top_level);
        prop_assert_eq!(p.statistics().total_self_time(), top_level);
    }

    #[test]
    fn prop_cancel_restores_previous_statistics(
        before in prop::collection::vec(op(), 0..48),
        chain in prop::collection::vec(op(), 0..48),
        first in 0..NAMES.len(),
        cancel_at in any::<prop::sample::Index>(),
    ) {
        let mut p = profiled(&before);
        let live = p.live_node_count();
        let stats = p.statistics();
        let result = p.result();

        let mut driver = Driver::new();
        driver.enter(&mut p, first);
        let split = cancel_at.index(chain.len() + 1);
        driver.run(&mut p, &chain[..split], 1);
        p.cancel();
        prop_assert_eq!(p.state(), ProfilerState::Cancelling);
        driver.run(&mut p, &chain[split..], 1);
        driver.finish(&mut p);

        prop_assert_eq!(p.state(), ProfilerState::Normal);
        prop_assert_eq!(p.live_node_count(), live);
        prop_assert_eq!(p.statistics(), stats);
        prop_assert_eq!(p.result(), result);
    }

    #[test]
    fn prop_reset_empties_everything(ops in prop::collection::vec(op(), 0..64)) {
        let mut p = CallProfiler::new();
        let mut driver = Driver::new();
        // Leave the last chain open so reset also has to discard it.
        driver.run(&mut p, &ops, 0);
        p.reset();

        prop_assert!(p.tree().is_root());
        prop_assert_eq!(p.live_node_count(), 0);
        let stats = p.statistics();
        prop_assert!(stats.entries.is_empty());
        prop_assert_eq!(stats.total_calls(), 0);
        prop_assert_eq!(p.result().children.len(), 0);
    }
}
