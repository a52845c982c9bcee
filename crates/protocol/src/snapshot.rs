use serde::{Deserialize, Serialize};

use crate::SharedStr;

/// Flat, serializable dump of a call-path tree.
///
/// ```text
///   CallPathTree ──▶ TreeSnapshot ──▶ JSON file ──▶ TreeSnapshot ──▶ CallPathTree
///      (live)          (this)          (disk)        (viewer)        (rebuilt)
/// ```
///
/// Nodes are listed breadth-first starting with the root. The root is the
/// only node whose `key` is `None`; every other node is identified by the
/// sequential id the tree assigned when it was created, and parents refer
/// to their children by that id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeSnapshot {
    pub nodes: Vec<SnapshotNode>,
    /// Node the cursor pointed at when the snapshot was taken (`None` = root).
    pub current_node: Option<u64>,
    /// Next id the tree would have assigned.
    pub unique_id: u64,
}

impl TreeSnapshot {
    /// The root entry, if the snapshot has one.
    pub fn root(&self) -> Option<&SnapshotNode> {
        self.nodes.iter().find(|n| n.key.is_none())
    }

    /// Number of non-root nodes.
    pub fn live_node_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.key.is_some()).count()
    }
}

/// One node of a [`TreeSnapshot`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotNode {
    pub key: Option<u64>,
    pub name: SharedStr,
    pub data: SnapshotProfile,
    pub children: Vec<u64>,
}

/// Timing record carried by a [`SnapshotNode`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotProfile {
    pub caller_name: SharedStr,
    /// Inclusive time in nanoseconds.
    pub total_time_ns: u64,
    pub call_count: u64,
}

/// Envelope written by the JSON serializer: `{"radix_tree": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotDocument {
    pub radix_tree: TreeSnapshot,
}

/// Nested profiling result, one level per call-path depth.
///
/// This is the shape handed to scripting layers: times are in seconds so a
/// consumer can print `total_time / count` without knowing the tree's
/// internal resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultNode {
    pub name: SharedStr,
    /// Inclusive time in seconds.
    pub total_time: f64,
    pub count: u64,
    pub children: Vec<ResultNode>,
}

impl ResultNode {
    /// Average inclusive seconds per call, `0.0` for nodes never called.
    pub fn per_call(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.total_time / self.count as f64
        }
    }

    /// Find a direct child by identity.
    pub fn child(&self, name: &str) -> Option<&ResultNode> {
        self.children.iter().find(|c| c.name == name)
    }
}
