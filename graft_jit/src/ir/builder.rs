//! Structured graph construction.
//!
//! [`GraphBuilder`] keeps a cursor on the current control node and appends
//! fixed nodes after it, so callers write straight-line code and only deal
//! with control explicitly at branches, merges and loops. It is what the
//! method registry and the tests use to produce well-formed graphs.

use super::graph::Graph;
use super::kind::{ArithOp, CmpOp, ConstValue, DeoptReason, FieldId, InvokeTarget, NodeKind};
use super::node::NodeId;
use super::stamp::{Stamp, TypeId};

/// Builder for well-formed graphs.
pub struct GraphBuilder {
    graph: Graph,
    /// Fixed node that the next appended node follows. `INVALID` once the
    /// current path has been terminated.
    control: NodeId,
}

impl GraphBuilder {
    pub fn new() -> Self {
        let graph = Graph::new();
        let control = graph.start();
        GraphBuilder { graph, control }
    }

    pub fn finish(self) -> Graph {
        self.graph
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut Graph {
        &mut self.graph
    }

    // =========================================================================
    // Cursor
    // =========================================================================

    /// Current control node, `None` after a terminator.
    pub fn control(&self) -> Option<NodeId> {
        Some(self.control).filter(|c| c.is_valid())
    }

    /// Continue building after `control`.
    pub fn switch_to(&mut self, control: NodeId) {
        self.control = control;
    }

    fn append(&mut self, kind: NodeKind, inputs: &[NodeId], stamp: Stamp) -> NodeId {
        debug_assert!(self.control.is_valid(), "appending {kind} after a terminator");
        let id = self.graph.add_node(kind, inputs, stamp);
        self.graph.set_next(self.control, id);
        self.control = id;
        id
    }

    fn terminate(&mut self, kind: NodeKind, inputs: &[NodeId]) -> NodeId {
        debug_assert!(self.control.is_valid(), "terminating a finished path");
        let id = self.graph.add_node(kind, inputs, Stamp::Void);
        self.graph.set_next(self.control, id);
        self.control = NodeId::INVALID;
        id
    }

    // =========================================================================
    // Values
    // =========================================================================

    pub fn parameter(&mut self, index: u32, stamp: Stamp) -> NodeId {
        self.graph.add_node(NodeKind::Parameter { index }, &[], stamp)
    }

    pub fn const_int(&mut self, value: i64) -> NodeId {
        self.graph.const_int(value)
    }

    pub fn constant(&mut self, value: ConstValue, stamp: Stamp) -> NodeId {
        self.graph.intern_constant(value, stamp)
    }

    pub fn arith(&mut self, op: ArithOp, a: NodeId, b: NodeId) -> NodeId {
        self.graph.add_node(NodeKind::Arith(op), &[a, b], Stamp::INT)
    }

    pub fn add(&mut self, a: NodeId, b: NodeId) -> NodeId {
        self.arith(ArithOp::Add, a, b)
    }

    pub fn compare(&mut self, op: CmpOp, a: NodeId, b: NodeId) -> NodeId {
        self.graph.add_node(NodeKind::Compare(op), &[a, b], Stamp::BOOL)
    }

    pub fn instance_of(&mut self, value: NodeId, ty: TypeId, exact: bool) -> NodeId {
        self.graph
            .add_node(NodeKind::InstanceOf { ty, exact }, &[value], Stamp::BOOL)
    }

    pub fn phi(&mut self, merge: NodeId, values: &[NodeId], stamp: Stamp) -> NodeId {
        self.graph.add_phi(merge, values, stamp)
    }

    // =========================================================================
    // Fixed Nodes
    // =========================================================================

    pub fn invoke(&mut self, target: InvokeTarget, args: &[NodeId], stamp: Stamp) -> NodeId {
        self.append(NodeKind::Invoke(target), args, stamp)
    }

    pub fn load_field(&mut self, object: NodeId, field: FieldId, stamp: Stamp) -> NodeId {
        self.append(NodeKind::LoadField(field), &[object], stamp)
    }

    pub fn store_field(&mut self, object: NodeId, field: FieldId, value: NodeId) -> NodeId {
        self.append(NodeKind::StoreField(field), &[object, value], Stamp::Void)
    }

    pub fn array_equals(&mut self, a: NodeId, b: NodeId, length: u32) -> NodeId {
        self.append(NodeKind::ArrayEquals { length }, &[a, b], Stamp::BOOL)
    }

    pub fn return_value(&mut self, value: Option<NodeId>) -> NodeId {
        match value {
            Some(v) => self.terminate(NodeKind::Return, &[v]),
            None => self.terminate(NodeKind::Return, &[]),
        }
    }

    pub fn deoptimize(&mut self, reason: DeoptReason) -> NodeId {
        self.terminate(NodeKind::Deoptimize(reason), &[])
    }

    // =========================================================================
    // Control Flow
    // =========================================================================

    /// Split on `condition`. Returns the `Begin` of the true and false arms;
    /// the cursor is left unset until [`GraphBuilder::switch_to`].
    pub fn branch(&mut self, condition: NodeId, true_probability: f64) -> (NodeId, NodeId) {
        let if_node = self.terminate(NodeKind::If { true_probability }, &[condition]);
        let t = self.graph.add_node(NodeKind::Begin, &[], Stamp::Void);
        let f = self.graph.add_node(NodeKind::Begin, &[], Stamp::Void);
        self.graph.set_branches(if_node, t, f);
        (t, f)
    }

    /// Close the current path with an `End`, to be fed into a merge.
    pub fn end(&mut self) -> NodeId {
        self.terminate(NodeKind::End, &[])
    }

    /// Join `ends` and continue after the merge.
    pub fn merge(&mut self, ends: &[NodeId]) -> NodeId {
        let merge = self.graph.add_node(NodeKind::Merge, &[], Stamp::Void);
        for &end in ends {
            self.graph.add_end(merge, end);
        }
        self.control = merge;
        merge
    }

    /// Open a loop: the current path enters a new `LoopBegin`.
    pub fn loop_begin(&mut self) -> NodeId {
        let entry = self.end();
        let header = self.graph.add_node(NodeKind::LoopBegin, &[], Stamp::Void);
        self.graph.add_end(header, entry);
        self.control = header;
        header
    }

    /// Loop phi with its entry value; the back-edge value is added by
    /// [`GraphBuilder::loop_back_value`].
    pub fn loop_phi(&mut self, header: NodeId, initial: NodeId, stamp: Stamp) -> NodeId {
        self.graph.add_phi(header, &[initial], stamp)
    }

    /// Close the loop body: branch on `condition`, jumping back to `header`
    /// with probability `continue_probability`, and continue on the exit arm.
    pub fn loop_exit(
        &mut self,
        header: NodeId,
        condition: NodeId,
        continue_probability: f64,
    ) -> NodeId {
        let (back, exit) = self.branch(condition, continue_probability);
        self.switch_to(back);
        let loop_end = self.terminate(NodeKind::LoopEnd, &[]);
        self.graph.add_end(header, loop_end);
        self.switch_to(exit);
        loop_end
    }

    pub fn loop_back_value(&mut self, phi: NodeId, value: NodeId) {
        self.graph.push_input(phi, value);
    }
}

impl Default for GraphBuilder {
    fn default() -> Self {
        Self::new()
    }
}
