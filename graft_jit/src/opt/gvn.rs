//! Global Value Numbering.
//!
//! Pure floating nodes that compute the same value from the same inputs are
//! merged into one. Because floating nodes carry no control position, two
//! equal nodes are interchangeable anywhere in the graph; the scheduler
//! later places the survivor where all of its users can see it.
//!
//! Constants are already unique through interning and are not numbered
//! here. Commutative operations are numbered with their operands in a
//! canonical order, so `a + b` and `b + a` meet.

use std::collections::hash_map::Entry;

use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use tracing::trace;

use super::contract::PhaseSizeContract;
use super::OptimizationPass;
use crate::error::InlineResult;
use crate::ir::graph::Graph;
use crate::ir::kind::{ArithOp, CmpOp, NodeKind};
use crate::ir::node::NodeId;
use crate::ir::stamp::{Stamp, TypeId};

/// Identity of a value for numbering purposes.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
enum ValueKey {
    Arith(ArithOp, NodeId, NodeId),
    Compare(CmpOp, NodeId, NodeId),
    InstanceOf(TypeId, bool, NodeId),
    Pi(NodeId, NodeId, Stamp),
    Phi(SmallVec<[NodeId; 4]>),
}

impl ValueKey {
    fn of(graph: &Graph, id: NodeId) -> Option<ValueKey> {
        let node = graph.node(id);
        let (a, b) = (node.input(0), node.input(1));
        let key = match node.kind {
            NodeKind::Arith(op) if op.is_commutative() => ValueKey::Arith(op, a.min(b), a.max(b)),
            NodeKind::Arith(op) => ValueKey::Arith(op, a, b),
            NodeKind::Compare(op) => ValueKey::Compare(op, a, b),
            NodeKind::InstanceOf { ty, exact } => ValueKey::InstanceOf(ty, exact, a),
            NodeKind::Pi => ValueKey::Pi(a, b, node.stamp),
            NodeKind::Phi => ValueKey::Phi(SmallVec::from_slice(node.inputs())),
            _ => return None,
        };
        Some(key)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GvnStats {
    /// Nodes replaced by an equal earlier node.
    pub merged: usize,
    /// Numbering rounds run.
    pub rounds: usize,
}

/// Global value numbering pass.
#[derive(Debug, Default)]
pub struct Gvn {
    stats: GvnStats,
}

impl Gvn {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> GvnStats {
        self.stats
    }

    /// Number the graph until no two live nodes share a key.
    ///
    /// Merging two nodes can make their users equal, so rounds repeat until
    /// one finds nothing; every productive round removes at least one node.
    pub fn number(&mut self, graph: &mut Graph) -> bool {
        let mut changed = false;
        loop {
            self.stats.rounds += 1;
            let mut leaders: FxHashMap<ValueKey, NodeId> = FxHashMap::default();
            let mut merged = 0;

            let nodes: Vec<NodeId> = graph.live_nodes().collect();
            for id in nodes {
                if !graph.is_live(id) {
                    continue;
                }
                let Some(key) = ValueKey::of(graph, id) else {
                    continue;
                };
                match leaders.entry(key) {
                    Entry::Occupied(leader) => {
                        merge_into(graph, *leader.get(), id);
                        merged += 1;
                    }
                    Entry::Vacant(slot) => {
                        slot.insert(id);
                    }
                }
            }

            self.stats.merged += merged;
            if merged == 0 {
                return changed;
            }
            changed = true;
        }
    }
}

/// Redirect users of `duplicate` to `leader` and drop it.
fn merge_into(graph: &mut Graph, leader: NodeId, duplicate: NodeId) {
    trace!(%leader, %duplicate, "value numbered");
    let narrowed = graph.node(leader).stamp.join(graph.node(duplicate).stamp);
    if !narrowed.is_empty() {
        graph.node_mut(leader).stamp = narrowed;
    }
    graph.replace_all_uses(duplicate, leader);
    graph.kill_if_unused_floating(duplicate);
}

impl PhaseSizeContract for Gvn {
    fn contract_owner(&self) -> &str {
        "gvn"
    }

    fn growth_factor(&self) -> f64 {
        1.0
    }
}

impl OptimizationPass for Gvn {
    fn name(&self) -> &'static str {
        "gvn"
    }

    fn run(&mut self, graph: &mut Graph) -> InlineResult<bool> {
        Ok(self.number(graph))
    }
}
