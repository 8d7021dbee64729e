//! Block partition of a sea-of-nodes graph.
//!
//! The cost model needs to know how often each node runs. This module cuts
//! the control skeleton into basic blocks, assigns every floating node to a
//! block and computes block frequencies relative to the method entry.
//!
//! Two modes trade precision for speed:
//!
//! - [`ScheduleMode::Full`] builds a dominator tree, places each floating node
//!   in the common dominator of its users and derives every loop's iteration
//!   count from the probabilities of its back edges.
//! - [`ScheduleMode::Structural`] skips dominators, places floating nodes at
//!   their earliest using block and assumes a fixed iteration count per loop.

use rustc_hash::FxHashSet;

use super::arena::{Arena, BitSet, Id, SecondaryMap};
use super::graph::Graph;
use super::kind::NodeKind;
use super::node::{Node, NodeId};

/// Iterations assumed per loop entry in structural mode.
pub const STRUCTURAL_LOOP_FREQUENCY: f64 = 10.0;

/// Upper bound on iterations per loop entry derived from profiles.
pub const MAX_LOOP_FREQUENCY: f64 = 1_000.0;

// =============================================================================
// Blocks
// =============================================================================

pub type BlockId = Id<Block>;

#[derive(Clone, Debug, Default)]
pub struct Block {
    /// The begin-like node that opens the block.
    pub begin: NodeId,
    /// Fixed nodes in control order, `begin` first.
    pub fixed: Vec<NodeId>,
    /// Floating nodes scheduled into this block.
    pub floating: Vec<NodeId>,
    pub predecessors: Vec<BlockId>,
    pub successors: Vec<BlockId>,
    /// Executions per method entry.
    pub frequency: f64,
}

impl Block {
    /// The node that closes the block.
    pub fn terminator(&self) -> NodeId {
        self.fixed.last().copied().unwrap_or(self.begin)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScheduleMode {
    Full,
    Structural,
}

// =============================================================================
// Control Flow Graph
// =============================================================================

#[derive(Debug)]
pub struct ControlFlowGraph {
    blocks: Arena<Block>,
    block_of: SecondaryMap<Node, BlockId>,
    /// Blocks in reverse post order; forward edges always point later.
    order: Vec<BlockId>,
    position: SecondaryMap<Block, usize>,
    idom: Option<SecondaryMap<Block, BlockId>>,
}

impl ControlFlowGraph {
    pub fn build(graph: &Graph, mode: ScheduleMode) -> Self {
        let mut cfg = ControlFlowGraph {
            blocks: Arena::new(),
            block_of: SecondaryMap::with_capacity(graph.slot_count()),
            order: Vec::new(),
            position: SecondaryMap::new(),
            idom: None,
        };
        for slot in 0..graph.slot_count() {
            cfg.block_of.set(Id::new(slot as u32), BlockId::INVALID);
        }
        cfg.partition(graph);
        cfg.link(graph);
        if mode == ScheduleMode::Full {
            cfg.compute_dominators();
        }
        cfg.compute_frequencies(graph, mode);
        cfg.schedule_floating(graph, mode);
        cfg
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    #[inline]
    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id]
    }

    /// Blocks in reverse post order.
    pub fn blocks(&self) -> impl Iterator<Item = (BlockId, &Block)> {
        self.order.iter().map(|&b| (b, &self.blocks[b]))
    }

    pub fn block_of(&self, node: NodeId) -> Option<BlockId> {
        self.block_of.get(node).copied().filter(|b| b.is_valid())
    }

    /// Immediate dominator; `None` for the entry block or in structural mode.
    pub fn idom(&self, block: BlockId) -> Option<BlockId> {
        let idom = self.idom.as_ref()?.get(block).copied()?;
        Some(idom).filter(|&d| d.is_valid() && d != block)
    }

    /// `a` dominates `b`. Only meaningful in full mode.
    pub fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        let mut current = Some(b);
        while let Some(block) = current {
            if block == a {
                return true;
            }
            current = self.idom(block);
        }
        false
    }

    // =========================================================================
    // Partition
    // =========================================================================

    fn partition(&mut self, graph: &Graph) {
        let mut current = BlockId::INVALID;
        for node in graph.control_order() {
            let kind = &graph.node(node).kind;
            let opens_block = matches!(
                kind,
                NodeKind::Start | NodeKind::Begin | NodeKind::Merge | NodeKind::LoopBegin
            );
            if opens_block {
                current = self.blocks.alloc(Block {
                    begin: node,
                    frequency: 0.0,
                    ..Block::default()
                });
                self.position.set(current, self.order.len());
                self.order.push(current);
            }
            debug_assert!(current.is_valid(), "{kind} outside any block");
            self.blocks[current].fixed.push(node);
            self.block_of.set(node, current);
        }
    }

    fn add_edge(&mut self, from: BlockId, to: BlockId) {
        self.blocks[from].successors.push(to);
        self.blocks[to].predecessors.push(from);
    }

    fn link(&mut self, graph: &Graph) {
        // Merge predecessors must follow end order so they line up with phi
        // inputs, so edges are added from the merge side.
        for index in 0..self.order.len() {
            let block = self.order[index];
            let begin = self.blocks[block].begin;
            let begin_node = graph.node(begin);
            if begin_node.kind.is_merge() {
                for &end in begin_node.ends() {
                    if let Some(from) = self.block_of(end) {
                        self.add_edge(from, block);
                    }
                }
            } else if let Some(pred) = begin_node.predecessor() {
                if let Some(from) = self.block_of(pred) {
                    self.add_edge(from, block);
                }
            }
        }
    }

    /// Predecessors reached over forward edges only.
    fn forward_predecessors(&self, block: BlockId) -> &[BlockId] {
        let preds = &self.blocks[block].predecessors;
        if self.is_loop_header(block) {
            &preds[..preds.len().min(1)]
        } else {
            preds
        }
    }

    fn is_loop_header(&self, block: BlockId) -> bool {
        let b = &self.blocks[block];
        b.predecessors
            .iter()
            .any(|&p| self.position[p] >= self.position[block])
    }

    // =========================================================================
    // Dominators
    // =========================================================================

    /// Cooper-Harvey-Kennedy over the reverse post order.
    fn compute_dominators(&mut self) {
        let mut idom: SecondaryMap<Block, BlockId> = SecondaryMap::with_capacity(self.len());
        for &b in &self.order {
            idom.set(b, BlockId::INVALID);
        }
        let Some(&entry) = self.order.first() else {
            self.idom = Some(idom);
            return;
        };
        idom.set(entry, entry);

        let mut changed = true;
        while changed {
            changed = false;
            for &block in self.order.iter().skip(1) {
                let mut new_idom = BlockId::INVALID;
                for &pred in &self.blocks[block].predecessors {
                    if !idom[pred].is_valid() {
                        continue;
                    }
                    new_idom = if new_idom.is_valid() {
                        self.intersect(&idom, pred, new_idom)
                    } else {
                        pred
                    };
                }
                if new_idom.is_valid() && idom[block] != new_idom {
                    idom.set(block, new_idom);
                    changed = true;
                }
            }
        }
        self.idom = Some(idom);
    }

    fn intersect(&self, idom: &SecondaryMap<Block, BlockId>, a: BlockId, b: BlockId) -> BlockId {
        let (mut a, mut b) = (a, b);
        while a != b {
            while self.position[a] > self.position[b] {
                a = idom[a];
            }
            while self.position[b] > self.position[a] {
                b = idom[b];
            }
        }
        a
    }

    /// Nearest common dominator of two blocks.
    fn common_dominator(&self, a: BlockId, b: BlockId) -> BlockId {
        match &self.idom {
            Some(idom) => self.intersect(idom, a, b),
            None => a,
        }
    }

    // =========================================================================
    // Frequencies
    // =========================================================================

    /// Probability of taking the control edge into `block` from its single
    /// predecessor.
    fn edge_probability(&self, graph: &Graph, block: BlockId) -> f64 {
        let begin = self.blocks[block].begin;
        let Some(pred) = graph.node(begin).predecessor() else {
            return 1.0;
        };
        match graph.node(pred).kind {
            NodeKind::If { true_probability } => {
                let p = if true_probability.is_nan() {
                    0.5
                } else {
                    true_probability.clamp(0.0, 1.0)
                };
                if graph.node(pred).successors().first() == Some(&begin) {
                    p
                } else {
                    1.0 - p
                }
            }
            _ => 1.0,
        }
    }

    /// Frequency of `block` given the frequencies already known for its
    /// forward predecessors.
    fn propagate(&self, graph: &Graph, block: BlockId, freq: &[f64], loop_factor: &[f64]) -> f64 {
        let preds = self.forward_predecessors(block);
        let incoming: f64 = if self.blocks[block].predecessors.len() > 1
            || graph.node(self.blocks[block].begin).kind.is_merge()
        {
            preds.iter().map(|p| freq[p.as_usize()]).sum()
        } else {
            preds
                .first()
                .map_or(0.0, |p| freq[p.as_usize()] * self.edge_probability(graph, block))
        };
        incoming * loop_factor[block.as_usize()]
    }

    fn compute_frequencies(&mut self, graph: &Graph, mode: ScheduleMode) {
        let n = self.len();
        let mut loop_factor = vec![1.0; n];

        // Inner loops come later in the order, so walk backwards to have every
        // nested factor ready before its enclosing loop needs it.
        let headers: Vec<BlockId> = self
            .order
            .iter()
            .copied()
            .filter(|&b| self.is_loop_header(b))
            .collect();
        for &header in headers.iter().rev() {
            loop_factor[header.as_usize()] = match mode {
                ScheduleMode::Structural => STRUCTURAL_LOOP_FREQUENCY,
                ScheduleMode::Full => self.loop_frequency(graph, header, &loop_factor),
            };
        }

        let mut freq = vec![0.0; n];
        for index in 0..self.order.len() {
            let block = self.order[index];
            freq[block.as_usize()] = if index == 0 {
                1.0
            } else {
                self.propagate(graph, block, &freq, &loop_factor)
            };
        }
        for &block in &self.order {
            let f = freq[block.as_usize()];
            self.blocks[block].frequency = if f.is_finite() && f >= 0.0 { f } else { 0.0 };
        }
    }

    /// Expected iterations per entry of the loop at `header`:
    /// `1 / (1 - p)` where `p` is the probability of reaching a back edge from
    /// the header.
    fn loop_frequency(&self, graph: &Graph, header: BlockId, loop_factor: &[f64]) -> f64 {
        let back_edges: Vec<BlockId> = self.blocks[header]
            .predecessors
            .iter()
            .copied()
            .skip(1)
            .collect();

        // Loop body: blocks that reach a back edge without passing the header.
        let mut body = BitSet::with_capacity(self.len());
        let mut stack = back_edges.clone();
        while let Some(block) = stack.pop() {
            if block == header || !body.insert(block.as_usize()) {
                continue;
            }
            stack.extend(self.forward_predecessors(block).iter().copied());
        }

        let mut local = vec![0.0; self.len()];
        local[header.as_usize()] = 1.0;
        let start = self.position[header] + 1;
        for &block in &self.order[start..] {
            if body.contains(block.as_usize()) {
                local[block.as_usize()] = self.propagate(graph, block, &local, loop_factor);
            }
        }

        let back: f64 = back_edges.iter().map(|b| local[b.as_usize()]).sum();
        if back >= 1.0 || !back.is_finite() {
            MAX_LOOP_FREQUENCY
        } else {
            (1.0 / (1.0 - back)).clamp(1.0, MAX_LOOP_FREQUENCY)
        }
    }

    // =========================================================================
    // Floating Node Placement
    // =========================================================================

    /// Block in which `user` consumes input slot `slot`.
    fn use_block(&self, graph: &Graph, user: NodeId, slot: usize) -> BlockId {
        let node = graph.node(user);
        if matches!(node.kind, NodeKind::Phi) && slot > 0 {
            // A phi value is needed at the end of the matching predecessor.
            let merge = node.input(0);
            if let Some(&end) = graph.node(merge).ends().get(slot - 1) {
                return self.block_of(end).unwrap_or(BlockId::INVALID);
            }
        }
        self.block_of(user).unwrap_or(BlockId::INVALID)
    }

    fn schedule_floating(&mut self, graph: &Graph, mode: ScheduleMode) {
        let Some(&entry) = self.order.first() else {
            return;
        };
        let mut placed = BitSet::with_capacity(graph.slot_count());
        for (id, node) in graph.iter() {
            if node.is_fixed() {
                placed.insert(id.as_usize());
            }
        }

        for root in graph.live_nodes() {
            if placed.contains(root.as_usize()) {
                continue;
            }
            let mut stack = vec![(root, false)];
            while let Some((node, expanded)) = stack.pop() {
                if placed.contains(node.as_usize()) {
                    continue;
                }
                if let NodeKind::Phi = graph.node(node).kind {
                    let block = self.block_of(graph.node(node).input(0)).unwrap_or(entry);
                    self.place(node, block, &mut placed);
                    continue;
                }
                if !expanded {
                    stack.push((node, true));
                    for &user in graph.uses(node) {
                        if !placed.contains(user.as_usize()) {
                            stack.push((user, false));
                        }
                    }
                    continue;
                }

                let mut chosen = BlockId::INVALID;
                let mut seen_users: FxHashSet<NodeId> = FxHashSet::default();
                for &user in graph.uses(node) {
                    if !seen_users.insert(user) {
                        continue;
                    }
                    let slots = graph
                        .node(user)
                        .inputs()
                        .iter()
                        .enumerate()
                        .filter(|(_, &i)| i == node)
                        .map(|(slot, _)| slot);
                    for slot in slots {
                        let block = self.use_block(graph, user, slot);
                        if !block.is_valid() {
                            continue;
                        }
                        chosen = if !chosen.is_valid() {
                            block
                        } else {
                            match mode {
                                ScheduleMode::Full => self.common_dominator(chosen, block),
                                ScheduleMode::Structural => {
                                    if self.position[block] < self.position[chosen] {
                                        block
                                    } else {
                                        chosen
                                    }
                                }
                            }
                        };
                    }
                }
                let block = if chosen.is_valid() { chosen } else { entry };
                self.place(node, block, &mut placed);
            }
        }
    }

    fn place(&mut self, node: NodeId, block: BlockId, placed: &mut BitSet) {
        placed.insert(node.as_usize());
        self.block_of.set(node, block);
        self.blocks[block].floating.push(node);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::builder::GraphBuilder;
    use crate::ir::kind::CmpOp;
    use crate::ir::stamp::Stamp;

    fn diamond(probability: f64) -> (Graph, NodeId, NodeId, NodeId) {
        let mut b = GraphBuilder::new();
        let p = b.parameter(0, Stamp::BOOL);
        let (t, f) = b.branch(p, probability);
        b.switch_to(t);
        let e1 = b.end();
        b.switch_to(f);
        let e2 = b.end();
        let merge = b.merge(&[e1, e2]);
        b.return_value(None);
        (b.finish(), t, f, merge)
    }

    #[test]
    fn test_diamond_frequencies() {
        let (graph, t, f, merge) = diamond(0.25);
        for mode in [ScheduleMode::Full, ScheduleMode::Structural] {
            let cfg = ControlFlowGraph::build(&graph, mode);
            assert_eq!(cfg.len(), 4);
            let freq = |n| cfg.block(cfg.block_of(n).unwrap()).frequency;
            assert!((freq(t) - 0.25).abs() < 1e-9);
            assert!((freq(f) - 0.75).abs() < 1e-9);
            assert!((freq(merge) - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_dominators_of_diamond() {
        let (graph, t, _, merge) = diamond(0.5);
        let cfg = ControlFlowGraph::build(&graph, ScheduleMode::Full);
        let entry = cfg.block_of(graph.start()).unwrap();
        let tb = cfg.block_of(t).unwrap();
        let mb = cfg.block_of(merge).unwrap();
        assert_eq!(cfg.idom(mb), Some(entry));
        assert_eq!(cfg.idom(tb), Some(entry));
        assert!(cfg.dominates(entry, mb));
        assert!(!cfg.dominates(tb, mb));
    }

    #[test]
    fn test_loop_frequency_follows_back_edge_probability() {
        let mut b = GraphBuilder::new();
        let n = b.parameter(0, Stamp::INT);
        let zero = b.const_int(0);
        let one = b.const_int(1);
        let header = b.loop_begin();
        let i = b.loop_phi(header, zero, Stamp::INT);
        let next = b.add(i, one);
        let cond = b.compare(CmpOp::Lt, next, n);
        b.loop_exit(header, cond, 0.9);
        b.loop_back_value(i, next);
        let ret = b.return_value(Some(i));
        let graph = b.finish();

        let full = ControlFlowGraph::build(&graph, ScheduleMode::Full);
        let hb = full.block_of(header).unwrap();
        assert!((full.block(hb).frequency - 10.0).abs() < 1e-6);
        let exit = full.block_of(ret).unwrap();
        assert!((full.block(exit).frequency - 1.0).abs() < 1e-6);
        // The increment is needed in the loop body, not at entry.
        assert_eq!(full.block_of(next), Some(hb));

        let structural = ControlFlowGraph::build(&graph, ScheduleMode::Structural);
        let hb = structural.block_of(header).unwrap();
        assert_eq!(structural.block(hb).frequency, STRUCTURAL_LOOP_FREQUENCY);
    }

    #[test]
    fn test_start_only_graph_has_one_block() {
        let graph = Graph::new();
        let cfg = ControlFlowGraph::build(&graph, ScheduleMode::Full);
        assert_eq!(cfg.len(), 1);
        assert_eq!(cfg.block(cfg.block_of(graph.start()).unwrap()).frequency, 1.0);
    }
}
