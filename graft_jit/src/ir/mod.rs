//! Sea-of-nodes intermediate representation.
//!
//! # Core Components
//!
//! - [`arena`]: typed ids, arena storage and side tables
//! - [`kind`]: the closed set of node kinds and their families
//! - [`stamp`]: value-range descriptors and their lattice operations
//! - [`node`]: node layout and flags
//! - [`graph`]: the owned graph, its frozen shared form and edge surgery
//! - [`builder`]: structured construction of well-formed graphs
//! - [`cfg`]: block partition, dominators and block frequencies

pub mod arena;
pub mod builder;
pub mod cfg;
pub mod graph;
pub mod kind;
pub mod node;
pub mod stamp;

pub use builder::GraphBuilder;
pub use cfg::{ControlFlowGraph, ScheduleMode};
pub use graph::{CalleeSource, Graph, SharedGraph};
pub use kind::{
    ArithOp, CmpOp, ConstValue, DeoptReason, FieldId, InvokeKind, InvokeTarget, KindTag,
    MethodId, NodeKind,
};
pub use node::{Node, NodeFlags, NodeId};
pub use stamp::{Stamp, TypeId};
