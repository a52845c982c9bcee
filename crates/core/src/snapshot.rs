//! Conversions between a live [`CallPathTree`] and the serializable shapes in
//! `callpath_protocol`.

use std::collections::{HashMap, VecDeque};
use std::io::Write;
use std::time::Duration;

use callpath_protocol::{
    ResultNode, SnapshotDocument, SnapshotNode, SnapshotProfile, TreeSnapshot,
};

use crate::error::SnapshotError;
use crate::model::{CallNode, CallPathTree, CallerProfile, NodeId};

/// Flatten the tree breadth-first, root first.
pub fn capture(tree: &CallPathTree) -> TreeSnapshot {
    let mut nodes = Vec::with_capacity(tree.live_node_count() + 1);
    let mut queue = VecDeque::from([tree.root()]);
    while let Some(node) = queue.pop_front() {
        nodes.push(snapshot_node(node));
        queue.extend(tree.children_of(node.id()));
    }
    TreeSnapshot {
        nodes,
        current_node: tree.cursor().key(),
        unique_id: tree.unique_id(),
    }
}

fn snapshot_node(node: &CallNode) -> SnapshotNode {
    let data = node.data();
    SnapshotNode {
        key: node.key(),
        name: data.identity.clone(),
        data: SnapshotProfile {
            caller_name: data.identity.clone(),
            total_time_ns: u64::try_from(data.total_time.as_nanos()).unwrap_or(u64::MAX),
            call_count: data.call_count,
        },
        children: node.children().iter().filter_map(|c| c.key()).collect(),
    }
}

pub fn write_document<W: Write>(tree: &CallPathTree, out: W) -> Result<(), serde_json::Error> {
    let doc = SnapshotDocument {
        radix_tree: capture(tree),
    };
    serde_json::to_writer(out, &doc)
}

/// Parse either a bare [`TreeSnapshot`] or the `{"radix_tree": ...}` envelope.
pub fn parse_snapshot(data: &[u8]) -> Result<TreeSnapshot, SnapshotError> {
    let value: serde_json::Value = serde_json::from_slice(data)?;
    if value.get("radix_tree").is_some() {
        let doc: SnapshotDocument = serde_json::from_value(value)?;
        Ok(doc.radix_tree)
    } else {
        Ok(serde_json::from_value(value)?)
    }
}

/// Rebuild an idle tree. Children keep their recorded order and ids.
pub fn restore_tree(snapshot: &TreeSnapshot) -> Result<CallPathTree, SnapshotError> {
    if snapshot.current_node.is_some() {
        return Err(SnapshotError::ActiveChain);
    }
    let root = snapshot.root().ok_or(SnapshotError::MissingRoot)?;

    let reserved = NodeId::ROOT_KEY;
    if snapshot.unique_id >= reserved {
        return Err(SnapshotError::ReservedId(snapshot.unique_id));
    }

    let mut by_key: HashMap<u64, &SnapshotNode> = HashMap::with_capacity(snapshot.nodes.len());
    for node in &snapshot.nodes {
        let Some(key) = node.key else {
            continue;
        };
        if key >= reserved {
            return Err(SnapshotError::ReservedId(key));
        }
        if by_key.insert(key, node).is_some() {
            return Err(SnapshotError::UnknownNode(key));
        }
    }

    let mut tree = CallPathTree::new();
    let mut pending: VecDeque<(NodeId, &SnapshotNode)> = VecDeque::from([(NodeId::ROOT, root)]);
    let mut restored = 0usize;
    while let Some((parent, node)) = pending.pop_front() {
        for &key in &node.children {
            let child = by_key.get(&key).ok_or(SnapshotError::UnknownNode(key))?;
            if child.name.is_empty() {
                return Err(SnapshotError::InvalidIdentity(key));
            }
            let id = NodeId::from_key(key);
            if tree.node(id).is_some() {
                return Err(SnapshotError::UnknownNode(key));
            }
            let data = CallerProfile {
                identity: child.name.clone(),
                call_count: child.data.call_count,
                total_time: Duration::from_nanos(child.data.total_time_ns),
            };
            tree.insert_restored(parent, id, data)
                .ok_or_else(|| SnapshotError::DuplicateIdentity {
                    parent: parent.key(),
                    identity: child.name.to_string(),
                })?;
            restored += 1;
            pending.push_back((id, child));
        }
    }

    if restored != by_key.len() {
        // Some defined node is unreachable from the root.
        let orphan = by_key
            .keys()
            .copied()
            .find(|k| tree.node(NodeId::from_key(*k)).is_none())
            .unwrap_or_default();
        return Err(SnapshotError::UnknownNode(orphan));
    }

    let max_key = by_key.keys().copied().max().map_or(0, |k| k + 1);
    tree.set_unique_id(snapshot.unique_id.max(max_key));
    Ok(tree)
}

impl CallPathTree {
    /// See [`restore_tree`].
    pub fn from_snapshot(snapshot: &TreeSnapshot) -> Result<Self, SnapshotError> {
        restore_tree(snapshot)
    }
}

/// Nested result tree in seconds. The root carries the summed time of its
/// children and a count of zero.
pub fn result_tree(tree: &CallPathTree) -> ResultNode {
    let mut root = result_node(tree, tree.root());
    root.total_time = root.children.iter().map(|c| c.total_time).sum();
    root
}

// Recursion depth equals call-path depth, which the profiled program already
// sustained on its own stack.
fn result_node(tree: &CallPathTree, node: &CallNode) -> ResultNode {
    ResultNode {
        name: node.identity().clone(),
        total_time: node.data().total_time.as_secs_f64(),
        count: node.data().call_count,
        children: tree
            .children_of(node.id())
            .map(|c| result_node(tree, c))
            .collect(),
    }
}
