use std::collections::HashMap;
use std::time::Duration;

use callpath_protocol::SharedStr;
use serde::{Deserialize, Serialize};
use tracing::trace;

use super::profile::CallerProfile;
use crate::error::ProfileError;

/// Stable handle of a node in a [`CallPathTree`] arena.
///
/// Non-root nodes wrap the sequential id assigned at creation. Ids are
/// never reused, so a handle to a rolled-back node simply stops resolving.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(u64);

impl NodeId {
    /// Raw id held by [`NodeId::ROOT`]; never assigned to a call node.
    pub(crate) const ROOT_KEY: u64 = u64::MAX;
    pub const ROOT: NodeId = NodeId(Self::ROOT_KEY);

    pub(crate) fn from_key(key: u64) -> Self {
        NodeId(key)
    }

    /// Sequential id of a non-root node, `None` for the root.
    pub fn key(self) -> Option<u64> {
        (self != Self::ROOT).then_some(self.0)
    }
}

/// How a child is addressed by [`CallPathTree::get_child`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildKey<'a> {
    /// Position in creation order among the parent's children.
    Index(usize),
    Identity(&'a str),
}

impl From<usize> for ChildKey<'_> {
    fn from(index: usize) -> Self {
        ChildKey::Index(index)
    }
}

impl<'a> From<&'a str> for ChildKey<'a> {
    fn from(identity: &'a str) -> Self {
        ChildKey::Identity(identity)
    }
}

/// Per-chain undo state. Cleared whenever the cursor returns to the root.
#[derive(Debug, Clone, Default)]
struct ChainMark {
    /// Created after the cursor last left the root.
    fresh: bool,
    /// Listed in `CallPathTree::touched`.
    touched: bool,
    undo_count: u64,
    undo_time: Duration,
}

/// One identity at one call path.
#[derive(Debug, Clone)]
pub struct CallNode {
    id: NodeId,
    data: CallerProfile,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    index: HashMap<SharedStr, NodeId>,
    chain: ChainMark,
}

impl CallNode {
    fn root() -> Self {
        Self {
            id: NodeId::ROOT,
            data: CallerProfile::new(SharedStr::from("")),
            parent: None,
            children: Vec::new(),
            index: HashMap::new(),
            chain: ChainMark::default(),
        }
    }

    fn child(id: NodeId, data: CallerProfile, parent: NodeId) -> Self {
        Self {
            id,
            data,
            parent: Some(parent),
            children: Vec::new(),
            index: HashMap::new(),
            chain: ChainMark::default(),
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn key(&self) -> Option<u64> {
        self.id.key()
    }

    pub fn data(&self) -> &CallerProfile {
        &self.data
    }

    /// Empty for the root, which has no identity.
    pub fn identity(&self) -> &SharedStr {
        &self.data.identity
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// Children in creation order.
    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    pub fn child_id(&self, identity: &str) -> Option<NodeId> {
        self.index.get(identity).copied()
    }
}

/// Tree of call paths with a cursor on the currently active one.
///
/// Nodes live in an arena keyed by [`NodeId`]; parents own their children
/// logically through `children`, and the cursor is just an id, so there are
/// no borrowed back-references to keep alive.
///
/// Besides the aggregated timings, the tree keeps enough bookkeeping to undo
/// the current *chain* (everything since the cursor last left the root):
/// nodes created in the chain are marked fresh, and every commit in the chain
/// is mirrored in a per-node undo record. [`exit`](Self::exit) returning to
/// the root seals the chain; [`rollback_one`](Self::rollback_one) returning
/// to the root reverts it.
#[derive(Debug, Clone)]
pub struct CallPathTree {
    nodes: HashMap<NodeId, CallNode>,
    cursor: NodeId,
    next_id: u64,
    /// Nodes committed during the current chain, each listed once.
    touched: Vec<NodeId>,
}

impl Default for CallPathTree {
    fn default() -> Self {
        Self::new()
    }
}

impl CallPathTree {
    pub fn new() -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(NodeId::ROOT, CallNode::root());
        Self {
            nodes,
            cursor: NodeId::ROOT,
            next_id: 0,
            touched: Vec::new(),
        }
    }

    /// Discard every node and restart id assignment.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    pub fn root(&self) -> &CallNode {
        self.get(NodeId::ROOT)
    }

    pub fn cursor(&self) -> NodeId {
        self.cursor
    }

    /// The node the cursor points at.
    pub fn current(&self) -> &CallNode {
        self.get(self.cursor)
    }

    pub fn is_root(&self) -> bool {
        self.cursor == NodeId::ROOT
    }

    pub fn node(&self, id: NodeId) -> Option<&CallNode> {
        self.nodes.get(&id)
    }

    /// Number of non-root nodes.
    pub fn live_node_count(&self) -> usize {
        self.nodes.len() - 1
    }

    /// Id the next created node will receive.
    pub fn unique_id(&self) -> u64 {
        self.next_id
    }

    /// Length of the active call path (0 when idle).
    pub fn depth(&self) -> usize {
        let mut depth = 0;
        let mut at = self.current().parent;
        while let Some(id) = at {
            depth += 1;
            at = self.get(id).parent;
        }
        depth
    }

    /// Descend into `identity` below the cursor, creating the node on first visit.
    ///
    /// Only fails once every non-root id has been handed out.
    pub fn enter<I>(&mut self, identity: I) -> Result<NodeId, ProfileError>
    where
        I: AsRef<str> + Into<SharedStr>,
    {
        let parent = self.cursor;
        if let Some(existing) = self.get(parent).child_id(identity.as_ref()) {
            self.cursor = existing;
            return Ok(existing);
        }

        let id = NodeId(self.next_id);
        if id == NodeId::ROOT {
            return Err(ProfileError::IdSpaceExhausted);
        }
        self.next_id = self
            .next_id
            .checked_add(1)
            .ok_or(ProfileError::IdSpaceExhausted)?;
        let identity: SharedStr = identity.into();
        let mut node = CallNode::child(id, CallerProfile::new(identity.clone()), parent);
        node.chain.fresh = true;
        trace!(id = id.0, identity = %identity, "call node created");

        self.nodes.insert(id, node);
        let parent_node = self.get_mut(parent);
        parent_node.children.push(id);
        parent_node.index.insert(identity, id);
        self.cursor = id;
        Ok(id)
    }

    /// Commit one invocation of the cursor node and retreat to its parent.
    pub fn exit(&mut self, elapsed: Duration) -> Result<NodeId, ProfileError> {
        let id = self.cursor;
        let node = self.get_mut(id);
        let Some(parent) = node.parent else {
            return Err(ProfileError::StackUnderflow);
        };

        node.data.record(elapsed);
        node.chain.undo_count += 1;
        node.chain.undo_time += elapsed;
        if !node.chain.touched {
            node.chain.touched = true;
            self.touched.push(id);
        }

        self.cursor = parent;
        if self.is_root() {
            self.seal_chain();
        }
        Ok(id)
    }

    /// Retreat from the cursor node without committing, undoing the chain
    /// once the cursor is back at the root.
    ///
    /// A node created during the current chain is removed together with its
    /// subtree, all of which belongs to the same chain. A node that existed
    /// before is kept; whatever the chain committed to it is subtracted when
    /// the rollback reaches the root.
    pub fn rollback_one(&mut self) -> Result<NodeId, ProfileError> {
        let id = self.cursor;
        let node = self.get(id);
        let Some(parent) = node.parent else {
            return Err(ProfileError::StackUnderflow);
        };

        let fresh = node.chain.fresh;
        self.cursor = parent;
        if fresh {
            self.remove_subtree(id);
        }
        if self.is_root() {
            self.discard_chain();
        }
        Ok(id)
    }

    pub fn get_child<'a>(&self, key: impl Into<ChildKey<'a>>) -> Option<&CallNode> {
        self.child_of(self.cursor, key)
    }

    pub fn child_of<'a>(&self, parent: NodeId, key: impl Into<ChildKey<'a>>) -> Option<&CallNode> {
        let parent = self.nodes.get(&parent)?;
        let id = match key.into() {
            ChildKey::Index(i) => parent.children.get(i).copied(),
            ChildKey::Identity(identity) => parent.child_id(identity),
        }?;
        self.nodes.get(&id)
    }

    /// Direct children of `id` in creation order.
    pub fn children_of(&self, id: NodeId) -> impl Iterator<Item = &CallNode> + '_ {
        self.nodes
            .get(&id)
            .into_iter()
            .flat_map(|n| n.children.iter())
            .filter_map(|c| self.nodes.get(c))
    }

    /// Inclusive time of `id` minus the inclusive time of its children.
    pub fn self_time(&self, id: NodeId) -> Duration {
        let Some(node) = self.nodes.get(&id) else {
            return Duration::ZERO;
        };
        let children: Duration = self.children_of(id).map(|c| c.data.total_time).sum();
        node.data.total_time.saturating_sub(children)
    }

    /// Depth-first, pre-order walk starting at the root (depth 0).
    pub fn iter_preorder(&self) -> PreOrder<'_> {
        PreOrder {
            tree: self,
            stack: vec![(0, NodeId::ROOT)],
        }
    }

    /// Attach a node with a known id, used when rebuilding from a snapshot.
    pub(crate) fn insert_restored(
        &mut self,
        parent: NodeId,
        id: NodeId,
        data: CallerProfile,
    ) -> Option<()> {
        if self.nodes.contains_key(&id) || !self.nodes.contains_key(&parent) {
            return None;
        }
        let identity = data.identity.clone();
        let parent_node = self.get_mut(parent);
        if parent_node.index.contains_key(identity.as_str()) {
            return None;
        }
        parent_node.children.push(id);
        parent_node.index.insert(identity, id);
        self.nodes.insert(id, CallNode::child(id, data, parent));
        Some(())
    }

    pub(crate) fn set_unique_id(&mut self, next_id: u64) {
        self.next_id = next_id;
    }

    fn seal_chain(&mut self) {
        for id in std::mem::take(&mut self.touched) {
            if let Some(node) = self.nodes.get_mut(&id) {
                node.chain = ChainMark::default();
            }
        }
    }

    fn discard_chain(&mut self) {
        let touched = std::mem::take(&mut self.touched);
        let mut reverted = 0usize;
        for id in touched {
            let Some(node) = self.nodes.get_mut(&id) else {
                continue;
            };
            if node.chain.fresh {
                self.remove_subtree(id);
                continue;
            }
            node.data.call_count -= node.chain.undo_count;
            node.data.total_time = node.data.total_time.saturating_sub(node.chain.undo_time);
            node.chain = ChainMark::default();
            reverted += 1;
        }
        trace!(reverted, live = self.live_node_count(), "call chain discarded");
    }

    /// Unlink `id` from its parent and drop it with all descendants.
    fn remove_subtree(&mut self, id: NodeId) -> usize {
        let Some(node) = self.nodes.remove(&id) else {
            return 0;
        };
        if let Some(parent) = node.parent.and_then(|p| self.nodes.get_mut(&p)) {
            parent.children.retain(|c| *c != id);
            parent.index.remove(node.data.identity.as_str());
        }

        let mut removed = 1;
        let mut pending = node.children;
        while let Some(child) = pending.pop() {
            if let Some(child) = self.nodes.remove(&child) {
                removed += 1;
                pending.extend(child.children);
            }
        }
        trace!(id = id.0, removed, "call subtree removed");
        removed
    }

    fn get(&self, id: NodeId) -> &CallNode {
        match self.nodes.get(&id) {
            Some(node) => node,
            None => unreachable!("node {id:?} is not in the arena"),
        }
    }

    fn get_mut(&mut self, id: NodeId) -> &mut CallNode {
        match self.nodes.get_mut(&id) {
            Some(node) => node,
            None => unreachable!("node {id:?} is not in the arena"),
        }
    }
}

/// Iterator returned by [`CallPathTree::iter_preorder`], yielding `(depth, node)`.
#[derive(Debug)]
pub struct PreOrder<'a> {
    tree: &'a CallPathTree,
    stack: Vec<(usize, NodeId)>,
}

impl<'a> Iterator for PreOrder<'a> {
    type Item = (usize, &'a CallNode);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let (depth, id) = self.stack.pop()?;
            let Some(node) = self.tree.nodes.get(&id) else {
                continue;
            };
            self.stack
                .extend(node.children.iter().rev().map(|c| (depth + 1, *c)));
            return Some((depth, node));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn enter_creates_lazily_and_reuses_siblings() {
        let mut tree = CallPathTree::new();
        let a = tree.enter("a").unwrap();
        assert_eq!(tree.live_node_count(), 1);
        tree.exit(ms(1)).unwrap();
        let again = tree.enter("a").unwrap();
        assert_eq!(a, again);
        tree.exit(ms(2)).unwrap();

        assert_eq!(tree.live_node_count(), 1);
        let node = tree.get_child("a").unwrap();
        assert_eq!(node.data().call_count, 2);
        assert_eq!(node.data().total_time, ms(3));
    }

    #[test]
    fn exit_at_root_underflows() {
        let mut tree = CallPathTree::new();
        assert_eq!(tree.exit(ms(1)), Err(ProfileError::StackUnderflow));
        assert_eq!(tree.rollback_one(), Err(ProfileError::StackUnderflow));
    }

    #[test]
    fn recursion_deepens_the_tree() {
        let mut tree = CallPathTree::new();
        tree.enter("fib").unwrap();
        tree.enter("fib").unwrap();
        tree.enter("fib").unwrap();
        assert_eq!(tree.depth(), 3);
        assert_eq!(tree.live_node_count(), 3);
        for _ in 0..3 {
            tree.exit(ms(1)).unwrap();
        }
        assert!(tree.is_root());
        assert_eq!(tree.depth(), 0);
    }

    #[test]
    fn get_child_by_index_and_identity() {
        let mut tree = CallPathTree::new();
        for name in ["b", "a", "c"] {
            tree.enter(name).unwrap();
            tree.exit(ms(1)).unwrap();
        }
        assert_eq!(tree.get_child(0_usize).unwrap().identity(), "b");
        assert_eq!(tree.get_child(2_usize).unwrap().identity(), "c");
        assert!(tree.get_child(3_usize).is_none());
        assert_eq!(tree.get_child("a").unwrap().key(), Some(1));
        assert!(tree.get_child("missing").is_none());
    }

    #[test]
    fn rollback_removes_chain_created_nodes() {
        let mut tree = CallPathTree::new();
        tree.enter("outer").unwrap();
        tree.enter("inner").unwrap();
        tree.rollback_one().unwrap();
        assert_eq!(tree.live_node_count(), 1);
        tree.rollback_one().unwrap();
        assert_eq!(tree.live_node_count(), 0);
        assert!(tree.is_root());
    }

    #[test]
    fn rollback_removes_committed_children_of_cancelled_parent() {
        let mut tree = CallPathTree::new();
        tree.enter("outer").unwrap();
        tree.enter("helper").unwrap();
        tree.exit(ms(5)).unwrap();
        tree.rollback_one().unwrap();
        assert_eq!(tree.live_node_count(), 0);
    }

    #[test]
    fn rollback_restores_pre_existing_statistics() {
        let mut tree = CallPathTree::new();
        tree.enter("outer").unwrap();
        tree.enter("inner").unwrap();
        tree.exit(ms(4)).unwrap();
        tree.exit(ms(10)).unwrap();

        // Second run re-enters the same path, commits inner, then is cancelled.
        tree.enter("outer").unwrap();
        tree.enter("inner").unwrap();
        tree.exit(ms(6)).unwrap();
        tree.enter("late").unwrap();
        tree.rollback_one().unwrap();
        tree.rollback_one().unwrap();

        assert_eq!(tree.live_node_count(), 2);
        let outer = tree.get_child("outer").unwrap();
        assert_eq!(outer.data().call_count, 1);
        assert_eq!(outer.data().total_time, ms(10));
        let inner = tree.child_of(outer.id(), "inner").unwrap();
        assert_eq!(inner.data().call_count, 1);
        assert_eq!(inner.data().total_time, ms(4));
        assert!(tree.child_of(outer.id(), "late").is_none());
    }

    #[test]
    fn ids_are_not_reused_after_rollback() {
        let mut tree = CallPathTree::new();
        tree.enter("a").unwrap();
        tree.rollback_one().unwrap();
        let b = tree.enter("b").unwrap();
        assert_eq!(b.key(), Some(1));
        assert_eq!(tree.unique_id(), 2);
    }

    #[test]
    fn exhausted_id_space_never_reaches_the_root_id() {
        let mut tree = CallPathTree::new();
        tree.enter("a").unwrap();
        tree.exit(ms(1)).unwrap();
        tree.set_unique_id(u64::MAX - 1);

        let last = tree.enter("b").unwrap();
        assert_eq!(last.key(), Some(u64::MAX - 1));
        tree.exit(ms(1)).unwrap();
        assert_eq!(tree.enter("c"), Err(ProfileError::IdSpaceExhausted));

        // Existing paths stay reachable and nothing was overwritten.
        assert!(tree.is_root());
        assert_eq!(tree.enter("a").unwrap().key(), Some(0));
        tree.exit(ms(1)).unwrap();
        assert_eq!(tree.live_node_count(), 2);
        assert_eq!(tree.get_child("a").unwrap().data().call_count, 2);
    }

    #[test]
    fn self_time_subtracts_children() {
        let mut tree = CallPathTree::new();
        let outer = tree.enter("outer").unwrap();
        tree.enter("inner").unwrap();
        tree.exit(ms(30)).unwrap();
        tree.exit(ms(50)).unwrap();
        assert_eq!(tree.self_time(outer), ms(20));
    }

    #[test]
    fn preorder_visits_depth_first() {
        let mut tree = CallPathTree::new();
        tree.enter("a").unwrap();
        tree.enter("b").unwrap();
        tree.exit(ms(1)).unwrap();
        tree.exit(ms(1)).unwrap();
        tree.enter("c").unwrap();
        tree.exit(ms(1)).unwrap();

        let walk: Vec<_> = tree
            .iter_preorder()
            .map(|(d, n)| (d, n.identity().to_string()))
            .collect();
        assert_eq!(
            walk,
            vec![
                (0, String::new()),
                (1, "a".to_string()),
                (2, "b".to_string()),
                (1, "c".to_string()),
            ]
        );
    }

    #[test]
    fn reset_discards_everything() {
        let mut tree = CallPathTree::new();
        tree.enter("a").unwrap();
        tree.enter("b").unwrap();
        tree.reset();
        assert!(tree.is_root());
        assert_eq!(tree.live_node_count(), 0);
        assert_eq!(tree.unique_id(), 0);
    }
}
