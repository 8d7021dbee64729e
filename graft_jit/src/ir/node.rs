//! IR node definitions.
//!
//! # Node Structure
//!
//! Each node has:
//! - **Kind**: what the node computes, see [`NodeKind`]
//! - **Inputs**: ordered data edges to the values it consumes
//! - **Successors**: control edges, one `next` for straight-line fixed nodes
//!   and `[true, false]` for an `If`
//! - **Ends**: for merges only, the incoming `End`/`LoopEnd` nodes, paired
//!   1:1 with the value inputs of every phi attached to the merge
//! - **Stamp**: the value-range descriptor of its result
//!
//! Edges are indices, never ownership: the [`Graph`](super::graph::Graph)
//! owns every node and keeps the reverse edges (use lists, predecessor
//! pointers) consistent. Edge lists are therefore only mutable through the
//! graph.

use smallvec::SmallVec;

use super::arena::Id;
use super::kind::NodeKind;
use super::stamp::Stamp;

/// Unique identifier for a node in the graph.
pub type NodeId = Id<Node>;

/// Inline capacity for data inputs. Phis and invokes with many arguments spill.
pub type InputList = SmallVec<[NodeId; 3]>;

// =============================================================================
// Node Flags
// =============================================================================

bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct NodeFlags: u8 {
        /// Removed from the graph. The slot stays allocated.
        const DEAD = 0b0000_0001;
        /// Constant whose referent never changes after publication.
        const STABLE = 0b0000_0010;
        /// Stable constant whose default (zero) value is also stable.
        const DEFAULT_STABLE = 0b0000_0100;
    }
}

impl NodeFlags {
    /// Flags that travel with a constant value when it is copied between
    /// graphs.
    pub const CONSTANT_FLAGS: NodeFlags = NodeFlags::STABLE.union(NodeFlags::DEFAULT_STABLE);
}

// =============================================================================
// Node
// =============================================================================

#[derive(Clone, Debug, PartialEq)]
pub struct Node {
    pub kind: NodeKind,
    pub stamp: Stamp,
    pub flags: NodeFlags,
    pub(crate) inputs: InputList,
    pub(crate) successors: SmallVec<[NodeId; 2]>,
    pub(crate) ends: SmallVec<[NodeId; 2]>,
    pub(crate) predecessor: NodeId,
}

impl Node {
    pub(crate) fn new(kind: NodeKind, inputs: &[NodeId], stamp: Stamp) -> Self {
        Node {
            kind,
            stamp,
            flags: NodeFlags::empty(),
            inputs: SmallVec::from_slice(inputs),
            successors: SmallVec::new(),
            ends: SmallVec::new(),
            predecessor: NodeId::INVALID,
        }
    }

    #[inline]
    pub fn inputs(&self) -> &[NodeId] {
        &self.inputs
    }

    #[inline]
    pub fn input(&self, index: usize) -> NodeId {
        self.inputs.get(index).copied().unwrap_or(NodeId::INVALID)
    }

    #[inline]
    pub fn successors(&self) -> &[NodeId] {
        &self.successors
    }

    /// Single control successor of a straight-line fixed node.
    #[inline]
    pub fn next(&self) -> Option<NodeId> {
        if self.kind.has_next() {
            self.successors.first().copied().filter(|s| s.is_valid())
        } else {
            None
        }
    }

    /// Incoming ends of a merge, in phi-input order.
    #[inline]
    pub fn ends(&self) -> &[NodeId] {
        &self.ends
    }

    /// Control predecessor, `None` for `Start` and merges.
    #[inline]
    pub fn predecessor(&self) -> Option<NodeId> {
        Some(self.predecessor).filter(|p| p.is_valid())
    }

    #[inline]
    pub fn is_dead(&self) -> bool {
        self.flags.contains(NodeFlags::DEAD)
    }

    #[inline]
    pub fn is_fixed(&self) -> bool {
        self.kind.is_fixed()
    }

    /// Value inputs of a phi, excluding the merge it hangs off.
    #[inline]
    pub fn phi_values(&self) -> &[NodeId] {
        debug_assert!(matches!(self.kind, NodeKind::Phi));
        &self.inputs[1..]
    }
}
