//! Graph Duplication for Inlining
//!
//! Copies every live node of a candidate graph into the caller graph,
//! remapping node ids. Selected source nodes are not copied but replaced by
//! existing caller nodes: the inliner maps parameters to call arguments
//! and the candidate's `Start` to the fixed node the body is anchored on.
//!
//! # Algorithm
//!
//! 1. **Allocation**: one target node per copied source node, without
//!    edges. Constants are interned in the target instead, so a constant
//!    the caller already has is reused.
//! 2. **Wiring**: data inputs, control successors and merge ends are
//!    rewritten through the id map; the target graph's use lists are kept
//!    up to date as edges are added.
//!
//! The copied `Start` successor is left without a predecessor; linking the
//! copy into the caller's control flow is the splicer's job.

use rustc_hash::FxHashMap;

use crate::ir::graph::Graph;
use crate::ir::node::{NodeFlags, NodeId};

/// Source-to-target id mapping of one duplication.
#[derive(Debug, Default)]
pub struct DuplicateMap {
    map: FxHashMap<NodeId, NodeId>,
    copied: usize,
}

impl DuplicateMap {
    /// The target node standing for source node `old`.
    #[inline]
    pub fn get(&self, old: NodeId) -> Option<NodeId> {
        self.map.get(&old).copied()
    }

    /// Map every id that has a counterpart, dropping the others.
    pub fn map_ids(&self, old: &[NodeId]) -> Vec<NodeId> {
        old.iter().filter_map(|&id| self.get(id)).collect()
    }

    /// Nodes allocated in the target, constants excluded.
    pub fn nodes_copied(&self) -> usize {
        self.copied
    }
}

/// Copy the live nodes of `source` into `target`.
///
/// Source nodes that are keys of `replacements` are not copied; every edge
/// to one of them is redirected to its replacement.
pub fn copy_graph_into(
    target: &mut Graph,
    source: &Graph,
    replacements: &FxHashMap<NodeId, NodeId>,
) -> DuplicateMap {
    let mut dup = DuplicateMap {
        map: replacements.clone(),
        copied: 0,
    };
    let mut copies = Vec::with_capacity(source.node_count());

    for (old, node) in source.iter() {
        if replacements.contains_key(&old) {
            continue;
        }
        let new = match node.kind.as_constant() {
            Some(value) => {
                let c = target.intern_constant(value, node.stamp);
                target.node_mut(c).flags |= node.flags & NodeFlags::CONSTANT_FLAGS;
                c
            }
            None => {
                let n = target.add_node(node.kind.clone(), &[], node.stamp);
                target.node_mut(n).flags = node.flags - NodeFlags::DEAD;
                copies.push(old);
                dup.copied += 1;
                n
            }
        };
        dup.map.insert(old, new);
    }

    for old in copies {
        let src = source.node(old);
        let new = dup.map[&old];
        for &input in src.inputs() {
            target.push_input(new, dup.map[&input]);
        }
        for &end in src.ends() {
            target.add_end(new, dup.map[&end]);
        }
        let successors: smallvec::SmallVec<[NodeId; 2]> = src
            .successors()
            .iter()
            .map(|&s| dup.get(s).unwrap_or(NodeId::INVALID))
            .collect();
        for &succ in &successors {
            if succ.is_valid() {
                target.node_mut(succ).predecessor = new;
            }
        }
        target.node_mut(new).successors = successors;
    }
    dup
}
