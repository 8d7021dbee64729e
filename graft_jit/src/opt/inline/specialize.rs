//! Argument specialization.
//!
//! Before a candidate graph is judged, what the call site knows about its
//! arguments is pushed into the candidate's parameters: constant arguments
//! replace their parameter outright, and arguments with a more precise
//! stamp narrow it. The nodes that consumed a changed parameter are
//! returned so the caller can re-simplify just that region.
//!
//! Parameters are matched to arguments by their declared index. Earlier
//! simplification may have removed unused parameters, so the position of a
//! parameter among the survivors says nothing about which argument it is.

use tracing::trace;

use crate::ir::graph::Graph;
use crate::ir::kind::ConstValue;
use crate::ir::node::{NodeFlags, NodeId};
use crate::ir::stamp::Stamp;

/// What the call site knows about one argument.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ArgumentInfo {
    /// Set when the argument is a compile-time constant.
    pub value: Option<ConstValue>,
    pub stamp: Stamp,
    pub flags: NodeFlags,
}

impl ArgumentInfo {
    /// Describe argument node `node` of the caller graph.
    pub fn of(graph: &Graph, node: NodeId) -> Self {
        let n = graph.node(node);
        ArgumentInfo {
            value: n.kind.as_constant(),
            stamp: n.stamp,
            flags: n.flags & NodeFlags::CONSTANT_FLAGS,
        }
    }

    pub fn constant(value: ConstValue) -> Self {
        ArgumentInfo {
            value: Some(value),
            stamp: Stamp::for_constant(value),
            flags: NodeFlags::empty(),
        }
    }

    pub fn with_stamp(stamp: Stamp) -> Self {
        ArgumentInfo {
            value: None,
            stamp,
            flags: NodeFlags::empty(),
        }
    }

    #[inline]
    pub fn is_constant(&self) -> bool {
        self.value.is_some()
    }
}

/// Nodes whose inputs changed, sorted and free of duplicates.
pub type AffectedNodes = Vec<NodeId>;

/// Push `args` into the parameters of `graph`.
///
/// Returns `None` when no parameter changed.
pub fn specialize(graph: &mut Graph, args: &[ArgumentInfo]) -> Option<AffectedNodes> {
    let mut affected = Vec::new();
    let mut changed = false;

    for (index, param) in graph.parameters() {
        if graph.usage_count(param) == 0 {
            continue;
        }
        let Some(arg) = args.get(index as usize) else {
            trace!(index, "no argument for parameter");
            continue;
        };

        if let Some(value) = arg.value {
            let constant = graph.intern_constant(value, arg.stamp);
            graph.node_mut(constant).flags |= arg.flags & NodeFlags::CONSTANT_FLAGS;
            affected.extend_from_slice(graph.uses(param));
            graph.replace_all_uses(param, constant);
            graph.kill(param);
            changed = true;
            trace!(index, %value, "parameter replaced by constant");
        } else if arg.stamp.refines(graph.node(param).stamp) {
            trace!(index, from = %graph.node(param).stamp, to = %arg.stamp, "parameter narrowed");
            graph.node_mut(param).stamp = arg.stamp;
            affected.extend_from_slice(graph.uses(param));
            changed = true;
        }
    }

    if !changed {
        return None;
    }
    affected.sort_unstable();
    affected.dedup();
    debug_assert!(!affected.is_empty(), "specialization changed parameters without users");
    Some(affected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::builder::GraphBuilder;
    use crate::ir::kind::{ArithOp, NodeKind};
    use crate::opt::canonicalize::{Canonicalizer, Simplifier};

    /// `(p0 + p1) * p2`, returned.
    fn three_params() -> (Graph, [NodeId; 3], NodeId, NodeId) {
        let mut b = GraphBuilder::new();
        let p0 = b.parameter(0, Stamp::INT);
        let p1 = b.parameter(1, Stamp::INT);
        let p2 = b.parameter(2, Stamp::INT);
        let sum = b.add(p0, p1);
        let product = b.arith(ArithOp::Mul, sum, p2);
        b.return_value(Some(product));
        (b.finish(), [p0, p1, p2], sum, product)
    }

    #[test]
    fn test_constant_argument_replaces_parameter() {
        let (mut graph, [p0, ..], sum, _) = three_params();
        let args = [
            ArgumentInfo::constant(ConstValue::Int(7)),
            ArgumentInfo::with_stamp(Stamp::INT),
            ArgumentInfo::with_stamp(Stamp::INT),
        ];
        let affected = specialize(&mut graph, &args).unwrap();
        assert_eq!(affected, vec![sum]);
        assert!(!graph.is_live(p0));
        let c = graph.node(sum).input(0);
        assert_eq!(graph.node(c).kind, NodeKind::Constant(ConstValue::Int(7)));
        assert!(graph.verify().is_ok());
    }

    #[test]
    fn test_constant_keeps_stability_flags() {
        let (mut graph, _, sum, _) = three_params();
        let stable = ArgumentInfo {
            flags: NodeFlags::STABLE,
            ..ArgumentInfo::constant(ConstValue::Int(1))
        };
        specialize(&mut graph, &[stable]).unwrap();
        let c = graph.node(sum).input(0);
        assert!(graph.node(c).flags.contains(NodeFlags::STABLE));
    }

    #[test]
    fn test_narrower_stamp_is_applied_in_place() {
        let (mut graph, [_, p1, _], sum, _) = three_params();
        let args = [
            ArgumentInfo::with_stamp(Stamp::INT),
            ArgumentInfo::with_stamp(Stamp::int_range(0, 9)),
        ];
        let affected = specialize(&mut graph, &args).unwrap();
        assert_eq!(affected, vec![sum]);
        assert!(graph.is_live(p1));
        assert_eq!(graph.node(p1).stamp, Stamp::int_range(0, 9));
    }

    #[test]
    fn test_no_information_means_no_change() {
        let (mut graph, ..) = three_params();
        let before = graph.clone();
        let args = [ArgumentInfo::with_stamp(Stamp::INT); 3];
        assert_eq!(specialize(&mut graph, &args), None);
        assert_eq!(graph, before);
    }

    #[test]
    fn test_pairing_uses_declared_index() {
        let mut b = GraphBuilder::new();
        let p0 = b.parameter(0, Stamp::INT);
        let p1 = b.parameter(1, Stamp::INT);
        let p2 = b.parameter(2, Stamp::INT);
        let zero = b.const_int(0);
        let dropped = b.arith(ArithOp::Mul, p1, zero);
        let sum = b.add(p0, dropped);
        let result = b.add(sum, p2);
        b.return_value(Some(result));
        let mut graph = b.finish();

        // p1 * 0 folds away and p1 with it.
        Simplifier::new().apply(&mut graph);
        assert!(!graph.is_live(p1));
        assert_eq!(graph.parameters().len(), 2);

        let args = [
            ArgumentInfo::with_stamp(Stamp::INT),
            ArgumentInfo::constant(ConstValue::Int(111)),
            ArgumentInfo::constant(ConstValue::Int(222)),
        ];
        specialize(&mut graph, &args).unwrap();
        assert!(!graph.is_live(p2));
        let ret = graph.returns()[0];
        let value = graph.node(ret).input(0);
        let c = graph.node(value).input(1);
        assert_eq!(graph.node(c).kind, NodeKind::Constant(ConstValue::Int(222)));
    }

    #[test]
    fn test_specialization_is_deterministic() {
        let (graph, ..) = three_params();
        let args = [
            ArgumentInfo::constant(ConstValue::Int(3)),
            ArgumentInfo::with_stamp(Stamp::int_range(1, 2)),
            ArgumentInfo::constant(ConstValue::Int(5)),
        ];
        let mut a = graph.clone();
        let mut b = graph;
        let ra = specialize(&mut a, &args);
        let rb = specialize(&mut b, &args);
        assert_eq!(ra, rb);
        assert_eq!(a, b);
    }
}
