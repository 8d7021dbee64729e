//! Sea-of-nodes graph storage.
//!
//! The graph provides:
//! - **Arena-based storage**: nodes are never freed, only flagged dead
//! - **Use lists**: for every node, the nodes consuming it as a data input or
//!   as a merge end
//! - **Control links**: successor edges plus a predecessor back pointer on
//!   every fixed node
//! - **Constant interning**: one node per `(value, stamp)` pair
//! - **Control-flow surgery**: killing unreachable regions and collapsing
//!   merges that are left with a single predecessor
//!
//! # Ownership
//!
//! [`Graph`] is the owned, mutable form. A graph that is published to a cache
//! is wrapped in [`SharedGraph`], which only hands out `&Graph`; the only way
//! back to a mutable graph is [`SharedGraph::to_owned_graph`], which copies.

use std::ops::Deref;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use smallvec::smallvec;

use super::arena::{Arena, BitSet, SecondaryMap};
use super::kind::{ConstValue, NodeKind};
use super::node::{Node, NodeFlags, NodeId};
use super::stamp::Stamp;
use crate::error::{InlineError, InlineResult};

// =============================================================================
// Graph Structure
// =============================================================================

#[derive(Clone, Debug, PartialEq)]
pub struct Graph {
    nodes: Arena<Node>,
    uses: SecondaryMap<Node, Vec<NodeId>>,
    constants: FxHashMap<(ConstValue, Stamp), NodeId>,
    start: NodeId,
    live: usize,
}

impl Graph {
    /// Create a graph holding only its `Start` node.
    pub fn new() -> Self {
        let mut nodes = Arena::with_capacity(64);
        let start = nodes.alloc(Node::new(NodeKind::Start, &[], Stamp::Void));
        let mut uses = SecondaryMap::new();
        uses.resize(1);
        Graph {
            nodes,
            uses,
            constants: FxHashMap::default(),
            start,
            live: 1,
        }
    }

    #[inline]
    pub fn start(&self) -> NodeId {
        self.start
    }

    // =========================================================================
    // Node Access
    // =========================================================================

    #[inline]
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    #[inline]
    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id]
    }

    #[inline]
    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    #[inline]
    pub fn is_live(&self, id: NodeId) -> bool {
        self.nodes.get(id).is_some_and(|n| !n.is_dead())
    }

    /// Number of live nodes.
    #[inline]
    pub fn node_count(&self) -> usize {
        self.live
    }

    /// Number of slots ever allocated, including dead nodes.
    #[inline]
    pub fn slot_count(&self) -> usize {
        self.nodes.len()
    }

    /// Live nodes in id order.
    pub fn live_nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes
            .iter()
            .filter(|(_, n)| !n.is_dead())
            .map(|(id, _)| id)
    }

    /// Live nodes with their data, in id order.
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes.iter().filter(|(_, n)| !n.is_dead())
    }

    /// Nodes that consume `id` as a data input or merge end.
    #[inline]
    pub fn uses(&self, id: NodeId) -> &[NodeId] {
        self.uses.get(id).map_or(&[], Vec::as_slice)
    }

    #[inline]
    pub fn usage_count(&self, id: NodeId) -> usize {
        self.uses(id).len()
    }

    /// `Start` has a successor, i.e. the graph has a body.
    pub fn has_body(&self) -> bool {
        self.node(self.start).next().is_some()
    }

    // =========================================================================
    // Node Creation
    // =========================================================================

    /// Add a node and register it as a user of its inputs.
    pub fn add_node(&mut self, kind: NodeKind, inputs: &[NodeId], stamp: Stamp) -> NodeId {
        debug_assert!(
            inputs.iter().all(|&i| self.is_live(i)),
            "{kind} created with a dead input"
        );
        let id = self.nodes.alloc(Node::new(kind, inputs, stamp));
        self.uses.resize(self.nodes.len());
        for &input in inputs {
            self.uses.entry(input).push(id);
        }
        self.live += 1;
        id
    }

    /// Constant with the stamp its value naturally carries.
    pub fn constant(&mut self, value: ConstValue) -> NodeId {
        self.intern_constant(value, Stamp::for_constant(value))
    }

    #[inline]
    pub fn const_int(&mut self, value: i64) -> NodeId {
        self.constant(ConstValue::Int(value))
    }

    /// Return the unique constant node for `(value, stamp)`, creating it if
    /// needed.
    pub fn intern_constant(&mut self, value: ConstValue, stamp: Stamp) -> NodeId {
        if let Some(&id) = self.constants.get(&(value, stamp)) {
            if self.is_live(id) {
                return id;
            }
        }
        let id = self.add_node(NodeKind::Constant(value), &[], stamp);
        self.constants.insert((value, stamp), id);
        id
    }

    /// Phi over `values`, one per end of `merge`.
    pub fn add_phi(&mut self, merge: NodeId, values: &[NodeId], stamp: Stamp) -> NodeId {
        debug_assert!(self.node(merge).kind.is_merge());
        let mut inputs = Vec::with_capacity(values.len() + 1);
        inputs.push(merge);
        inputs.extend_from_slice(values);
        self.add_node(NodeKind::Phi, &inputs, stamp)
    }

    /// Phis attached to `merge`, in id order.
    pub fn phis_of(&self, merge: NodeId) -> Vec<NodeId> {
        let mut phis: Vec<NodeId> = self
            .uses(merge)
            .iter()
            .copied()
            .filter(|&u| matches!(self.node(u).kind, NodeKind::Phi) && self.node(u).input(0) == merge)
            .collect();
        phis.sort_unstable();
        phis.dedup();
        phis
    }

    /// The live merge that `end` flows into.
    pub fn merge_of(&self, end: NodeId) -> Option<NodeId> {
        self.uses(end)
            .iter()
            .copied()
            .find(|&u| self.node(u).kind.is_merge() && self.node(u).ends.contains(&end))
    }

    /// Live parameters as `(declared index, node)`, sorted by index.
    pub fn parameters(&self) -> Vec<(u32, NodeId)> {
        let mut params: Vec<(u32, NodeId)> = self
            .iter()
            .filter_map(|(id, n)| match n.kind {
                NodeKind::Parameter { index } => Some((index, id)),
                _ => None,
            })
            .collect();
        params.sort_unstable();
        params
    }

    /// Live `Return` nodes, in id order.
    pub fn returns(&self) -> Vec<NodeId> {
        self.iter()
            .filter(|(_, n)| matches!(n.kind, NodeKind::Return))
            .map(|(id, _)| id)
            .collect()
    }

    /// Live invokes, in id order.
    pub fn invokes(&self) -> Vec<NodeId> {
        self.iter()
            .filter(|(_, n)| n.kind.as_invoke().is_some())
            .map(|(id, _)| id)
            .collect()
    }

    // =========================================================================
    // Data Edges
    // =========================================================================

    fn remove_use(&mut self, value: NodeId, user: NodeId) {
        if let Some(list) = self.uses.get(value) {
            if let Some(pos) = list.iter().position(|&u| u == user) {
                self.uses.entry(value).swap_remove(pos);
            }
        }
    }

    /// Point input `index` of `user` at `value`.
    pub fn replace_input(&mut self, user: NodeId, index: usize, value: NodeId) {
        let old = self.nodes[user].inputs[index];
        if old == value {
            return;
        }
        self.remove_use(old, user);
        self.nodes[user].inputs[index] = value;
        self.uses.entry(value).push(user);
    }

    pub fn push_input(&mut self, user: NodeId, value: NodeId) {
        self.nodes[user].inputs.push(value);
        self.uses.entry(value).push(user);
    }

    pub fn remove_input(&mut self, user: NodeId, index: usize) {
        let old = self.nodes[user].inputs.remove(index);
        self.remove_use(old, user);
    }

    /// Redirect every data use of `old` to `new`. Merge ends are not touched.
    pub fn replace_all_uses(&mut self, old: NodeId, new: NodeId) {
        if old == new {
            return;
        }
        let users = std::mem::take(self.uses.entry(old));
        let (merges, data_users): (Vec<NodeId>, Vec<NodeId>) = users
            .into_iter()
            .partition(|&u| self.nodes[u].ends.contains(&old));
        for &user in &data_users {
            for slot in self.nodes[user].inputs.iter_mut() {
                if *slot == old {
                    *slot = new;
                }
            }
        }
        *self.uses.entry(old) = merges;
        // A user holding `old` twice appears twice in the list; keep that
        // multiplicity for `new`.
        self.uses.entry(new).extend(data_users);
    }

    // =========================================================================
    // Control Edges
    // =========================================================================

    /// Link a straight-line fixed node to its successor.
    pub fn set_next(&mut self, node: NodeId, next: NodeId) {
        debug_assert!(self.nodes[node].kind.has_next(), "{} has no next", self.nodes[node].kind);
        if let Some(&old) = self.nodes[node].successors.first() {
            if old.is_valid() && self.nodes[old].predecessor == node {
                self.nodes[old].predecessor = NodeId::INVALID;
            }
        }
        self.nodes[node].successors = smallvec![next];
        if next.is_valid() {
            self.nodes[next].predecessor = node;
        }
    }

    /// Wire both arms of an `If`.
    pub fn set_branches(&mut self, if_node: NodeId, true_succ: NodeId, false_succ: NodeId) {
        debug_assert!(matches!(self.nodes[if_node].kind, NodeKind::If { .. }));
        self.nodes[if_node].successors = smallvec![true_succ, false_succ];
        self.nodes[true_succ].predecessor = if_node;
        self.nodes[false_succ].predecessor = if_node;
    }

    /// Replace `old` with `new` among the successors of `pred`.
    pub fn replace_successor(&mut self, pred: NodeId, old: NodeId, new: NodeId) {
        for slot in self.nodes[pred].successors.iter_mut() {
            if *slot == old {
                *slot = new;
            }
        }
        if old.is_valid() && self.nodes[old].predecessor == pred {
            self.nodes[old].predecessor = NodeId::INVALID;
        }
        if new.is_valid() {
            self.nodes[new].predecessor = pred;
        }
    }

    /// Append `end` to the incoming ends of `merge`.
    pub fn add_end(&mut self, merge: NodeId, end: NodeId) {
        debug_assert!(self.nodes[merge].kind.is_merge());
        debug_assert!(self.nodes[end].kind.is_end());
        self.nodes[merge].ends.push(end);
        self.uses.entry(end).push(merge);
    }

    /// Unlink a straight-line fixed node from the control chain and kill it.
    /// Its value uses must already be gone.
    pub fn remove_fixed(&mut self, node: NodeId) {
        let next = self.nodes[node].next().unwrap_or(NodeId::INVALID);
        self.nodes[node].successors.clear();
        if next.is_valid() {
            self.nodes[next].predecessor = NodeId::INVALID;
        }
        if let Some(pred) = self.nodes[node].predecessor() {
            self.replace_successor(pred, node, next);
        }
        self.kill(node);
    }

    /// Fixed nodes in control-flow order from `Start`.
    ///
    /// Arms of an `If` are walked true first; a merge is visited once all of
    /// its forward ends have been, a loop header right after its entry end.
    /// The order only depends on graph structure, so two structurally equal
    /// graphs yield the same sequence.
    pub fn control_order(&self) -> Vec<NodeId> {
        let mut order = Vec::with_capacity(self.live);
        let mut seen = BitSet::with_capacity(self.nodes.len());
        let mut arrived: FxHashMap<NodeId, usize> = FxHashMap::default();
        let mut stack = vec![self.start];

        while let Some(node) = stack.pop() {
            if !self.is_live(node) || !seen.insert(node.as_usize()) {
                continue;
            }
            order.push(node);
            let n = &self.nodes[node];
            match n.kind {
                NodeKind::End => {
                    if let Some(merge) = self.merge_of(node) {
                        let count = arrived.entry(merge).or_insert(0);
                        *count += 1;
                        let m = &self.nodes[merge];
                        let forward_ends = match m.kind {
                            NodeKind::LoopBegin => 1,
                            _ => m.ends.len(),
                        };
                        if *count >= forward_ends {
                            stack.push(merge);
                        }
                    }
                }
                NodeKind::If { .. } => {
                    for &succ in n.successors.iter().rev() {
                        stack.push(succ);
                    }
                }
                _ => {
                    if let Some(next) = n.next() {
                        stack.push(next);
                    }
                }
            }
        }
        order
    }

    // =========================================================================
    // Removal
    // =========================================================================

    /// Flag `id` dead and drop all of its edges.
    ///
    /// Users of `id` are left alone; callers remove or redirect them first.
    pub fn kill(&mut self, id: NodeId) {
        if self.nodes[id].is_dead() {
            return;
        }
        let node = &mut self.nodes[id];
        node.flags.insert(NodeFlags::DEAD);
        let inputs = std::mem::take(&mut node.inputs);
        let ends = std::mem::take(&mut node.ends);
        let successors = std::mem::take(&mut node.successors);
        let pred = std::mem::replace(&mut node.predecessor, NodeId::INVALID);
        let constant = node.kind.as_constant().map(|v| (v, node.stamp));

        for input in inputs {
            self.remove_use(input, id);
        }
        for end in ends {
            self.remove_use(end, id);
        }
        for succ in successors {
            if succ.is_valid() && self.nodes[succ].predecessor == id {
                self.nodes[succ].predecessor = NodeId::INVALID;
            }
        }
        if pred.is_valid() {
            for slot in self.nodes[pred].successors.iter_mut() {
                if *slot == id {
                    *slot = NodeId::INVALID;
                }
            }
        }
        if let Some(key) = constant {
            if self.constants.get(&key) == Some(&id) {
                self.constants.remove(&key);
            }
        }
        self.live -= 1;
    }

    /// Kill `id` if it is floating and unused, then repeat for its inputs.
    /// Returns the number of nodes removed.
    pub fn kill_if_unused_floating(&mut self, id: NodeId) -> usize {
        let mut removed = 0;
        let mut work = vec![id];
        while let Some(node) = work.pop() {
            if !self.is_live(node) || self.nodes[node].is_fixed() || !self.uses(node).is_empty() {
                continue;
            }
            work.extend(self.nodes[node].inputs.iter().copied());
            self.kill(node);
            removed += 1;
        }
        removed
    }

    /// Kill a fixed node and its floating users, recursively.
    pub(crate) fn kill_with_floating_users(&mut self, id: NodeId) {
        let mut work = vec![id];
        let mut freed = Vec::new();
        while let Some(node) = work.pop() {
            if !self.is_live(node) {
                continue;
            }
            for &user in self.uses(node) {
                if self.nodes[user].kind.is_floating() {
                    work.push(user);
                }
            }
            freed.extend(self.nodes[node].inputs.iter().copied());
            self.kill(node);
        }
        for input in freed {
            self.kill_if_unused_floating(input);
        }
    }

    /// Detach `end` from `merge`, dropping the matching phi inputs.
    pub fn detach_end(&mut self, merge: NodeId, end: NodeId) {
        let Some(index) = self.nodes[merge].ends.iter().position(|&e| e == end) else {
            return;
        };
        self.nodes[merge].ends.remove(index);
        self.remove_use(end, merge);
        for phi in self.phis_of(merge) {
            self.remove_input(phi, index + 1);
        }
    }

    /// Kill the control-flow region rooted at `root`.
    ///
    /// The region is everything reachable through successor edges. Merges lose
    /// the ends that die; a merge left without ends (or a loop that lost its
    /// entry) dies too, and one left with a single end is collapsed into
    /// straight-line code. Callers unlink `root` from its predecessor first.
    ///
    /// Returns the nodes that had an input rewritten by a collapse, for
    /// callers that re-simplify incrementally.
    pub fn kill_cfg(&mut self, root: NodeId) -> Vec<NodeId> {
        let mut dead = Vec::new();
        let mut collapse = Vec::new();
        let mut seen = BitSet::with_capacity(self.nodes.len());
        let mut stack = vec![root];

        while let Some(node) = stack.pop() {
            if !self.is_live(node) || !seen.insert(node.as_usize()) {
                continue;
            }
            dead.push(node);
            if self.nodes[node].kind.is_end() {
                let Some(merge) = self.merge_of(node) else {
                    continue;
                };
                let entry_lost = matches!(self.nodes[merge].kind, NodeKind::LoopBegin)
                    && self.nodes[merge].ends.first() == Some(&node);
                self.detach_end(merge, node);
                let remaining = self.nodes[merge].ends.len();
                if remaining == 0 || entry_lost {
                    stack.push(merge);
                } else if remaining == 1 {
                    collapse.push(merge);
                }
            } else {
                stack.extend(self.nodes[node].successors.iter().copied().filter(|s| s.is_valid()));
            }
        }

        for node in dead {
            self.kill_with_floating_users(node);
        }
        let mut touched = Vec::new();
        for merge in collapse {
            if self.is_live(merge) {
                touched.extend(self.collapse_merge(merge));
            }
        }
        touched
    }

    /// Replace a merge that has a single remaining end with straight-line
    /// control: phis become their only value, the end and merge disappear.
    /// Returns the former users of those phis.
    pub fn collapse_merge(&mut self, merge: NodeId) -> Vec<NodeId> {
        debug_assert_eq!(self.nodes[merge].ends.len(), 1);
        let end = self.nodes[merge].ends[0];
        let mut touched = Vec::new();
        for phi in self.phis_of(merge) {
            let value = self.nodes[phi].input(1);
            debug_assert_ne!(value, phi);
            touched.extend(self.uses(phi).iter().copied());
            self.replace_all_uses(phi, value);
            self.kill(phi);
        }
        let pred = self.nodes[end].predecessor;
        let next = self.nodes[merge].next().unwrap_or(NodeId::INVALID);
        self.detach_end(merge, end);
        self.kill(end);
        self.nodes[merge].successors.clear();
        if next.is_valid() {
            self.nodes[next].predecessor = NodeId::INVALID;
        }
        // Anything anchored on the merge now hangs off the surviving path.
        self.replace_all_uses(merge, pred);
        self.kill(merge);
        self.set_next(pred, next);
        touched.retain(|&n| self.is_live(n));
        touched
    }

    // =========================================================================
    // Verification
    // =========================================================================

    /// Check edge consistency and that every fixed node hangs off `Start`.
    /// Used by tests and debug builds after splicing.
    pub fn verify(&self) -> InlineResult<()> {
        let malformed = |msg: String| Err(InlineError::MalformedGraph(msg));
        if !self.is_live(self.start) {
            return malformed("start node is dead".into());
        }
        let mut reachable = BitSet::with_capacity(self.nodes.len());
        for node in self.control_order() {
            reachable.insert(node.as_usize());
        }
        for (id, node) in self.iter() {
            if node.is_fixed() && id != self.start {
                if !reachable.contains(id.as_usize()) {
                    return malformed(format!("{id} {} is unreachable from start", node.kind));
                }
                if !node.kind.is_merge() {
                    let linked = node
                        .predecessor()
                        .filter(|&p| self.is_live(p))
                        .is_some_and(|p| self.node(p).successors().contains(&id));
                    if !linked {
                        return malformed(format!("{id} {} has no valid predecessor", node.kind));
                    }
                }
            }
            for &input in node.inputs() {
                if !self.is_live(input) {
                    return malformed(format!("{id} {} uses dead input {input}", node.kind));
                }
                if !self.uses(input).contains(&id) {
                    return malformed(format!("{id} missing from use list of {input}"));
                }
            }
            for &succ in node.successors() {
                if !succ.is_valid() {
                    return malformed(format!("{id} {} has a dangling successor", node.kind));
                }
                if !self.is_live(succ) || self.node(succ).predecessor != id {
                    return malformed(format!("{id} -> {succ} has no back link"));
                }
            }
            if node.kind.has_next() && node.next().is_none() {
                return malformed(format!("{id} {} has no next", node.kind));
            }
            if node.kind.is_merge() {
                for phi in self.phis_of(id) {
                    if self.node(phi).inputs().len() != node.ends().len() + 1 {
                        return malformed(format!("phi {phi} does not match ends of {id}"));
                    }
                }
            }
            if node.kind.is_end() && self.merge_of(id).is_none() {
                return malformed(format!("end {id} flows into no merge"));
            }
            for &user in self.uses(id) {
                if !self.is_live(user) {
                    return malformed(format!("{id} used by dead node {user}"));
                }
            }
        }
        Ok(())
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Shared (Frozen) Graphs
// =============================================================================

/// A read-only graph that may be shared between compilations.
///
/// There is no way to get `&mut Graph` out of a `SharedGraph`; mutation
/// requires an owned copy from [`SharedGraph::to_owned_graph`].
#[derive(Clone, Debug)]
pub struct SharedGraph(Arc<Graph>);

impl SharedGraph {
    /// Freeze `graph` for sharing.
    pub fn new(graph: Graph) -> Self {
        SharedGraph(Arc::new(graph))
    }

    /// Private deep copy that may be mutated freely.
    pub fn to_owned_graph(&self) -> Graph {
        Graph::clone(&self.0)
    }

    /// `true` if both handles refer to the same frozen graph.
    pub fn ptr_eq(&self, other: &SharedGraph) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Deref for SharedGraph {
    type Target = Graph;

    fn deref(&self) -> &Graph {
        &self.0
    }
}

/// A callee graph as handed out by a cache or builder.
#[derive(Clone, Debug)]
pub enum CalleeSource {
    /// Frozen graph owned by a cache; must be copied before mutation.
    Shared(SharedGraph),
    /// Freshly built graph that nobody else references.
    Owned(Graph),
}

impl CalleeSource {
    pub fn is_shared(&self) -> bool {
        matches!(self, CalleeSource::Shared(_))
    }

    pub fn graph(&self) -> &Graph {
        match self {
            CalleeSource::Shared(shared) => shared,
            CalleeSource::Owned(graph) => graph,
        }
    }

    /// A graph the caller owns exclusively. Copies shared graphs only.
    pub fn into_owned_graph(self) -> Graph {
        match self {
            CalleeSource::Shared(shared) => shared.to_owned_graph(),
            CalleeSource::Owned(graph) => graph,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
