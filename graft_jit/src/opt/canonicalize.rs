//! Canonicalization.
//!
//! A worklist-driven local simplifier:
//!
//! - constant folding of arithmetic and comparisons, using stamps so that a
//!   value narrowed to a single integer folds like a literal
//! - algebraic identities (`x + 0`, `x * 1`, `x ^ x`, ...)
//! - commutative operations keep their constant operand on the right
//! - stamp inference for `Add`, `Sub` and `And`, and interval reasoning for
//!   comparisons
//! - redundant `Pi`, `Phi` and `InstanceOf` elimination
//! - branches on constant conditions, including removal of the dead arm
//! - removal of unused floating nodes
//!
//! [`Canonicalizer::apply`] seeds the worklist with every live node;
//! [`Canonicalizer::apply_incremental`] only with the given seeds, and grows
//! from there through users of whatever changed. Running either again on an
//! unchanged graph leaves it untouched.

use std::collections::VecDeque;

use tracing::trace;

use super::contract::PhaseSizeContract;
use super::OptimizationPass;
use crate::error::InlineResult;
use crate::ir::arena::BitSet;
use crate::ir::graph::Graph;
use crate::ir::kind::{ArithOp, CmpOp, ConstValue, NodeKind};
use crate::ir::node::NodeId;
use crate::ir::stamp::Stamp;

// =============================================================================
// Canonicalizer Interface
// =============================================================================

/// Local simplification, whole-graph or scoped to a seed set.
pub trait Canonicalizer: Send + Sync {
    /// Simplify every live node. Returns whether the graph changed.
    fn apply(&self, graph: &mut Graph) -> bool;

    /// Simplify starting from `seeds`. Dead seeds are ignored.
    fn apply_incremental(&self, graph: &mut Graph, seeds: &[NodeId]) -> bool;
}

// =============================================================================
// Statistics
// =============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimplifyStats {
    pub constants_folded: usize,
    pub identities: usize,
    pub stamps_narrowed: usize,
    pub branches_folded: usize,
    pub dead_removed: usize,
    pub reordered: usize,
}

impl SimplifyStats {
    pub fn changed(&self) -> bool {
        *self != SimplifyStats::default()
    }
}

// =============================================================================
// Worklist
// =============================================================================

/// FIFO of node ids without duplicates.
struct Worklist {
    queue: VecDeque<NodeId>,
    queued: BitSet,
}

impl Worklist {
    fn with_capacity(n: usize) -> Self {
        Worklist {
            queue: VecDeque::with_capacity(n),
            queued: BitSet::with_capacity(n),
        }
    }

    fn push(&mut self, id: NodeId) {
        if id.is_valid() && self.queued.insert(id.as_usize()) {
            self.queue.push_back(id);
        }
    }

    fn extend(&mut self, ids: impl IntoIterator<Item = NodeId>) {
        for id in ids {
            self.push(id);
        }
    }

    fn pop(&mut self) -> Option<NodeId> {
        let id = self.queue.pop_front()?;
        self.queued.remove(id.as_usize());
        Some(id)
    }
}

// =============================================================================
// Simplifier
// =============================================================================

/// Outcome of looking at one node.
enum Step {
    Unchanged,
    /// Every use should go to the given node instead.
    Replace(NodeId),
    /// The node changed in place (stamp or operand order).
    Mutated,
    /// Control flow changed; the listed nodes need another look.
    Control(Vec<NodeId>),
}

/// The standard [`Canonicalizer`].
#[derive(Debug, Clone, Copy, Default)]
pub struct Simplifier;

impl Simplifier {
    pub fn new() -> Self {
        Simplifier
    }

    /// Run the worklist from `seeds` to a fixed point.
    pub fn simplify(
        &self,
        graph: &mut Graph,
        seeds: impl IntoIterator<Item = NodeId>,
    ) -> SimplifyStats {
        let mut stats = SimplifyStats::default();
        let mut work = Worklist::with_capacity(graph.slot_count());
        work.extend(seeds);

        while let Some(id) = work.pop() {
            if !graph.is_live(id) {
                continue;
            }
            let node = graph.node(id);
            if node.kind.is_floating() && graph.uses(id).is_empty() {
                let inputs: Vec<NodeId> = node.inputs().to_vec();
                stats.dead_removed += graph.kill_if_unused_floating(id);
                // Survivors lost a user; a phi may now be redundant.
                work.extend(inputs.into_iter().filter(|&i| graph.is_live(i)));
                continue;
            }

            match self.step(graph, id, &mut stats) {
                Step::Unchanged => {}
                Step::Replace(new) => {
                    trace!(node = %id, replacement = %new, "replaced");
                    let users = graph.uses(id).to_vec();
                    graph.replace_all_uses(id, new);
                    work.extend(users);
                    work.push(id);
                }
                Step::Mutated => {
                    work.extend(graph.uses(id).iter().copied());
                    work.push(id);
                }
                Step::Control(touched) => work.extend(touched),
            }
        }
        stats
    }

    fn step(&self, graph: &mut Graph, id: NodeId, stats: &mut SimplifyStats) -> Step {
        match graph.node(id).kind.clone() {
            NodeKind::Arith(op) => self.arith(graph, id, op, stats),
            NodeKind::Compare(op) => self.compare(graph, id, op, stats),
            NodeKind::InstanceOf { ty, exact } => {
                let value = graph.node(id).input(0);
                let value_node = graph.node(value);
                let checked = Stamp::object(ty, exact, true);
                let stamp = value_node.stamp;
                let known = if matches!(value_node.kind, NodeKind::Constant(ConstValue::Null))
                    || stamp.join(checked).is_empty()
                {
                    Some(false)
                } else if stamp.join(checked) == stamp {
                    Some(true)
                } else {
                    None
                };
                match known {
                    Some(result) => {
                        stats.constants_folded += 1;
                        Step::Replace(graph.const_int(i64::from(result)))
                    }
                    None => Step::Unchanged,
                }
            }
            NodeKind::Pi => {
                let value = graph.node(id).input(0);
                let value_stamp = graph.node(value).stamp;
                let pi_stamp = graph.node(id).stamp;
                if value_stamp.join(pi_stamp) == value_stamp {
                    stats.identities += 1;
                    Step::Replace(value)
                } else {
                    Step::Unchanged
                }
            }
            NodeKind::Phi => {
                let node = graph.node(id);
                let mut unique = None;
                for &value in node.phi_values() {
                    if value == id || Some(value) == unique {
                        continue;
                    }
                    if unique.is_some() {
                        return Step::Unchanged;
                    }
                    unique = Some(value);
                }
                match unique {
                    Some(value) => {
                        stats.identities += 1;
                        Step::Replace(value)
                    }
                    None => Step::Unchanged,
                }
            }
            NodeKind::If { .. } => {
                let condition = graph.node(id).input(0);
                match graph.node(condition).stamp.as_int_constant() {
                    Some(value) => self.fold_branch(graph, id, value != 0, stats),
                    None => Step::Unchanged,
                }
            }
            _ => Step::Unchanged,
        }
    }

    fn arith(&self, graph: &mut Graph, id: NodeId, op: ArithOp, stats: &mut SimplifyStats) -> Step {
        let (a, b) = (graph.node(id).input(0), graph.node(id).input(1));
        let (sa, sb) = (graph.node(a).stamp, graph.node(b).stamp);
        let (ca, cb) = (sa.as_int_constant(), sb.as_int_constant());

        if let (Some(x), Some(y)) = (ca, cb) {
            if let Some(v) = op.fold(x, y) {
                stats.constants_folded += 1;
                return Step::Replace(graph.const_int(v));
            }
        }

        if let Some(result) = arith_identity(graph, op, a, b, cb) {
            stats.identities += 1;
            return Step::Replace(result);
        }

        if op.is_commutative() && ca.is_some() && cb.is_none() {
            graph.replace_input(id, 0, b);
            graph.replace_input(id, 1, a);
            stats.reordered += 1;
            return Step::Mutated;
        }

        self.narrow(graph, id, arith_stamp(op, sa, sb), stats)
    }

    fn compare(&self, graph: &mut Graph, id: NodeId, op: CmpOp, stats: &mut SimplifyStats) -> Step {
        let (a, b) = (graph.node(id).input(0), graph.node(id).input(1));
        let known = if a == b {
            Some(matches!(op, CmpOp::Eq | CmpOp::Le | CmpOp::Ge))
        } else {
            match (graph.node(a).stamp, graph.node(b).stamp) {
                (Stamp::Int { lo: l1, hi: h1 }, Stamp::Int { lo: l2, hi: h2 }) => {
                    compare_ranges(op, (l1, h1), (l2, h2))
                }
                _ => None,
            }
        };
        match known {
            Some(result) => {
                stats.constants_folded += 1;
                Step::Replace(graph.const_int(i64::from(result)))
            }
            None => Step::Unchanged,
        }
    }

    /// Join the node's stamp with `inferred`; fold if that leaves one value.
    fn narrow(&self, graph: &mut Graph, id: NodeId, inferred: Stamp, stats: &mut SimplifyStats) -> Step {
        let current = graph.node(id).stamp;
        let narrowed = current.join(inferred);
        if narrowed == current || narrowed.is_empty() {
            return Step::Unchanged;
        }
        if let Some(value) = narrowed.as_int_constant() {
            stats.constants_folded += 1;
            return Step::Replace(graph.const_int(value));
        }
        graph.node_mut(id).stamp = narrowed;
        stats.stamps_narrowed += 1;
        Step::Mutated
    }

    /// Replace an `If` on a known condition by its taken arm.
    fn fold_branch(
        &self,
        graph: &mut Graph,
        if_node: NodeId,
        taken: bool,
        stats: &mut SimplifyStats,
    ) -> Step {
        let Some(pred) = graph.node(if_node).predecessor() else {
            return Step::Unchanged;
        };
        let (t, f) = match graph.node(if_node).successors() {
            &[t, f] => (t, f),
            _ => return Step::Unchanged,
        };
        let (live, dead) = if taken { (t, f) } else { (f, t) };
        let condition = graph.node(if_node).input(0);

        graph.replace_successor(if_node, dead, NodeId::INVALID);
        graph.replace_successor(if_node, live, NodeId::INVALID);
        graph.replace_successor(pred, if_node, live);
        graph.kill(if_node);
        let mut touched = graph.kill_cfg(dead);
        stats.dead_removed += graph.kill_if_unused_floating(condition);
        if graph.is_live(live) && graph.uses(live).is_empty() {
            graph.remove_fixed(live);
        }
        stats.branches_folded += 1;
        touched.retain(|&n| graph.is_live(n));
        Step::Control(touched)
    }
}

/// `Some(replacement)` when `a op b` is one of its operands or zero.
fn arith_identity(
    graph: &mut Graph,
    op: ArithOp,
    a: NodeId,
    b: NodeId,
    cb: Option<i64>,
) -> Option<NodeId> {
    match (op, cb) {
        (ArithOp::Add | ArithOp::Sub | ArithOp::Or | ArithOp::Xor | ArithOp::Shl, Some(0)) => {
            Some(a)
        }
        (ArithOp::Mul | ArithOp::Div, Some(1)) => Some(a),
        (ArithOp::Mul | ArithOp::And, Some(0)) => Some(graph.const_int(0)),
        (ArithOp::Sub | ArithOp::Xor, _) if a == b => Some(graph.const_int(0)),
        (ArithOp::And | ArithOp::Or, _) if a == b => Some(a),
        _ => None,
    }
}

/// Result range of `op` over two stamps, or the full range.
fn arith_stamp(op: ArithOp, a: Stamp, b: Stamp) -> Stamp {
    let (Stamp::Int { lo: l1, hi: h1 }, Stamp::Int { lo: l2, hi: h2 }) = (a, b) else {
        return Stamp::INT;
    };
    let range = match op {
        ArithOp::Add => l1.checked_add(l2).zip(h1.checked_add(h2)),
        ArithOp::Sub => l1.checked_sub(h2).zip(h1.checked_sub(l2)),
        ArithOp::And if l1 >= 0 && l2 >= 0 => Some((0, h1.min(h2))),
        ArithOp::And if l1 >= 0 => Some((0, h1)),
        ArithOp::And if l2 >= 0 => Some((0, h2)),
        _ => None,
    };
    range.map_or(Stamp::INT, |(lo, hi)| Stamp::int_range(lo, hi))
}

/// Outcome of `a op b` when it is the same for every value in both ranges.
fn compare_ranges(op: CmpOp, (l1, h1): (i64, i64), (l2, h2): (i64, i64)) -> Option<bool> {
    let lt = |(l1, h1): (i64, i64), (l2, h2): (i64, i64)| {
        if h1 < l2 {
            Some(true)
        } else if l1 >= h2 {
            Some(false)
        } else {
            None
        }
    };
    let le = |(l1, h1): (i64, i64), (l2, h2): (i64, i64)| {
        if h1 <= l2 {
            Some(true)
        } else if l1 > h2 {
            Some(false)
        } else {
            None
        }
    };
    let disjoint = h1 < l2 || h2 < l1;
    match op {
        CmpOp::Lt => lt((l1, h1), (l2, h2)),
        CmpOp::Le => le((l1, h1), (l2, h2)),
        CmpOp::Gt => lt((l2, h2), (l1, h1)),
        CmpOp::Ge => le((l2, h2), (l1, h1)),
        CmpOp::Eq if disjoint => Some(false),
        CmpOp::Ne if disjoint => Some(true),
        CmpOp::Eq | CmpOp::Ne if l1 == h1 && l2 == h2 => Some((l1 == l2) == (op == CmpOp::Eq)),
        CmpOp::Eq | CmpOp::Ne => None,
    }
}

impl Canonicalizer for Simplifier {
    fn apply(&self, graph: &mut Graph) -> bool {
        let seeds: Vec<NodeId> = graph.live_nodes().collect();
        self.simplify(graph, seeds).changed()
    }

    fn apply_incremental(&self, graph: &mut Graph, seeds: &[NodeId]) -> bool {
        self.simplify(graph, seeds.iter().copied()).changed()
    }
}

impl PhaseSizeContract for Simplifier {
    fn contract_owner(&self) -> &str {
        "canonicalizer"
    }

    fn growth_factor(&self) -> f64 {
        1.0
    }
}

impl OptimizationPass for Simplifier {
    fn name(&self) -> &'static str {
        "simplify"
    }

    fn run(&mut self, graph: &mut Graph) -> InlineResult<bool> {
        Ok(self.apply(graph))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::builder::GraphBuilder;
    use crate::ir::stamp::TypeId;

    fn returned_value(graph: &Graph) -> NodeId {
        let ret = graph.returns()[0];
        graph.node(ret).input(0)
    }

    #[test]
    fn test_folds_constant_arithmetic() {
        let mut b = GraphBuilder::new();
        let two = b.const_int(2);
        let three = b.const_int(3);
        let sum = b.add(two, three);
        let product = b.arith(ArithOp::Mul, sum, three);
        b.return_value(Some(product));
        let mut graph = b.finish();

        assert!(Simplifier.apply(&mut graph));
        let value = returned_value(&graph);
        assert_eq!(graph.node(value).kind, NodeKind::Constant(ConstValue::Int(15)));
        // Start, Return and the constant 15.
        assert_eq!(graph.node_count(), 3);
        assert!(graph.verify().is_ok());
    }

    #[test]
    fn test_division_by_zero_is_not_folded() {
        let mut b = GraphBuilder::new();
        let one = b.const_int(1);
        let zero = b.const_int(0);
        let div = b.arith(ArithOp::Div, one, zero);
        b.return_value(Some(div));
        let mut graph = b.finish();

        Simplifier.apply(&mut graph);
        assert_eq!(returned_value(&graph), div);
    }

    #[test]
    fn test_identities() {
        let mut b = GraphBuilder::new();
        let x = b.parameter(0, Stamp::INT);
        let zero = b.const_int(0);
        let one = b.const_int(1);
        let a = b.add(x, zero);
        let m = b.arith(ArithOp::Mul, one, a);
        let s = b.arith(ArithOp::Xor, m, m);
        let r = b.add(s, m);
        b.return_value(Some(r));
        let mut graph = b.finish();

        Simplifier.apply(&mut graph);
        assert_eq!(returned_value(&graph), x);
    }

    #[test]
    fn test_constant_moves_to_the_right() {
        let mut b = GraphBuilder::new();
        let x = b.parameter(0, Stamp::INT);
        let five = b.const_int(5);
        let sum = b.add(five, x);
        b.return_value(Some(sum));
        let mut graph = b.finish();

        Simplifier.apply(&mut graph);
        assert_eq!(graph.node(sum).inputs(), &[x, five]);
    }

    #[test]
    fn test_narrowed_stamp_folds_comparison() {
        let mut b = GraphBuilder::new();
        let x = b.parameter(0, Stamp::int_range(0, 10));
        let one = b.const_int(1);
        let sum = b.add(x, one);
        let limit = b.const_int(100);
        let cmp = b.compare(CmpOp::Lt, sum, limit);
        b.return_value(Some(cmp));
        let mut graph = b.finish();

        Simplifier.apply(&mut graph);
        let value = returned_value(&graph);
        assert_eq!(graph.node(value).kind, NodeKind::Constant(ConstValue::Int(1)));
    }

    #[test]
    fn test_constant_branch_removes_dead_arm() {
        let mut b = GraphBuilder::new();
        let x = b.parameter(0, Stamp::INT);
        let zero = b.const_int(0);
        let cond = b.compare(CmpOp::Eq, zero, zero);
        let (t, f) = b.branch(cond, 0.5);
        b.switch_to(t);
        let e1 = b.end();
        b.switch_to(f);
        let store = b.store_field(x, crate::ir::kind::FieldId(1), x);
        let e2 = b.end();
        let merge = b.merge(&[e1, e2]);
        let one = b.const_int(1);
        let phi = b.phi(merge, &[one, x], Stamp::INT);
        b.return_value(Some(phi));
        let mut graph = b.finish();

        assert!(Simplifier.apply(&mut graph));
        assert!(graph.verify().is_ok());
        assert!(!graph.is_live(store));
        assert!(!graph.is_live(merge));
        assert_eq!(returned_value(&graph), one);
        // Start now leads straight to the return.
        let ret = graph.returns()[0];
        assert_eq!(graph.node(graph.start()).next(), Some(ret));
    }

    #[test]
    fn test_redundant_phi_and_pi() {
        let mut b = GraphBuilder::new();
        let x = b.parameter(0, Stamp::object(TypeId(1), true, true));
        let p = b.parameter(1, Stamp::BOOL);
        let (t, f) = b.branch(p, 0.5);
        b.switch_to(t);
        let e1 = b.end();
        b.switch_to(f);
        let e2 = b.end();
        let merge = b.merge(&[e1, e2]);
        let phi = b.phi(merge, &[x, x], Stamp::OBJECT);
        let pi = b
            .graph_mut()
            .add_node(NodeKind::Pi, &[phi, merge], Stamp::object(TypeId(1), false, true));
        b.return_value(Some(pi));
        let mut graph = b.finish();

        Simplifier.apply(&mut graph);
        assert_eq!(returned_value(&graph), x);
        assert!(!graph.is_live(phi));
        assert!(graph.verify().is_ok());
    }

    #[test]
    fn test_instance_of_folds_on_exact_stamp() {
        let mut b = GraphBuilder::new();
        let obj = b.parameter(0, Stamp::object(TypeId(3), true, true));
        let same = b.instance_of(obj, TypeId(3), true);
        let other = b.instance_of(obj, TypeId(4), false);
        let sum = b.add(same, other);
        b.return_value(Some(sum));
        let mut graph = b.finish();

        Simplifier.apply(&mut graph);
        let value = returned_value(&graph);
        assert_eq!(graph.node(value).kind, NodeKind::Constant(ConstValue::Int(1)));
    }

    #[test]
    fn test_unused_nodes_are_removed() {
        let mut b = GraphBuilder::new();
        let x = b.parameter(0, Stamp::INT);
        let y = b.parameter(1, Stamp::INT);
        let _unused = b.add(x, y);
        b.return_value(Some(x));
        let mut graph = b.finish();

        Simplifier.apply(&mut graph);
        assert!(!graph.is_live(y));
        assert_eq!(graph.parameters(), vec![(0, x)]);
    }

    #[test]
    fn test_incremental_only_visits_reachable_work() {
        let mut b = GraphBuilder::new();
        let x = b.parameter(0, Stamp::INT);
        let zero = b.const_int(0);
        let a = b.add(x, zero);
        let y = b.parameter(1, Stamp::INT);
        let c = b.add(y, zero);
        let sum = b.add(a, c);
        b.return_value(Some(sum));
        let mut graph = b.finish();

        assert!(Simplifier.apply_incremental(&mut graph, &[a]));
        assert_eq!(graph.node(sum).inputs(), &[x, c]);
        assert!(graph.is_live(c));
    }

    #[test]
    fn test_incremental_is_idempotent() {
        let mut b = GraphBuilder::new();
        let x = b.parameter(0, Stamp::int_range(0, 3));
        let one = b.const_int(1);
        let sum = b.add(one, x);
        let cmp = b.compare(CmpOp::Gt, sum, one);
        let (t, f) = b.branch(cmp, 0.5);
        b.switch_to(t);
        b.return_value(Some(sum));
        b.switch_to(f);
        b.return_value(Some(one));
        let mut graph = b.finish();

        let seeds = [sum, cmp, x];
        Simplifier.apply_incremental(&mut graph, &seeds);
        let once = graph.clone();
        assert!(!Simplifier.apply_incremental(&mut graph, &seeds));
        assert_eq!(graph, once);
    }

    #[test]
    fn test_loop_phi_with_invariant_value_is_removed() {
        let mut b = GraphBuilder::new();
        let x = b.parameter(0, Stamp::INT);
        let p = b.parameter(1, Stamp::BOOL);
        let header = b.loop_begin();
        let phi = b.loop_phi(header, x, Stamp::INT);
        b.loop_exit(header, p, 0.9);
        b.loop_back_value(phi, phi);
        b.return_value(Some(phi));
        let mut graph = b.finish();

        Simplifier.apply(&mut graph);
        assert_eq!(returned_value(&graph), x);
        assert!(graph.verify().is_ok());
    }

    #[test]
    fn test_compare_ranges() {
        assert_eq!(compare_ranges(CmpOp::Lt, (0, 5), (6, 9)), Some(true));
        assert_eq!(compare_ranges(CmpOp::Lt, (6, 9), (0, 6)), Some(false));
        assert_eq!(compare_ranges(CmpOp::Lt, (0, 6), (6, 9)), None);
        assert_eq!(compare_ranges(CmpOp::Ge, (6, 9), (0, 6)), Some(true));
        assert_eq!(compare_ranges(CmpOp::Eq, (0, 1), (2, 3)), Some(false));
        assert_eq!(compare_ranges(CmpOp::Ne, (4, 4), (4, 4)), Some(false));
        assert_eq!(compare_ranges(CmpOp::Eq, (0, 4), (4, 8)), None);
    }
}
