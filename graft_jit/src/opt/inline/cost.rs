//! Node Cost Model
//!
//! Every node kind is classified into a power-of-two bucket for the code it
//! emits (*size*) and for the time it takes (*cycles*). Graph totals built on
//! top of that drive the inlining budget and the phase contracts.
//!
//! # Resolution
//!
//! Costs are declared per kind or per family (see
//! [`Family`](crate::ir::kind::Family)). The nearest declaration wins: a kind's
//! own entry first, then its family, then each ancestor family. The table is
//! resolved once, when [`CostTable::build`] runs, and queries are array
//! lookups afterwards. A concrete kind that resolves to `Unset` is a
//! registration bug and aborts the build.
//!
//! # Compound Nodes
//!
//! Some nodes do work proportional to an operand, e.g. comparing an array of
//! known length. Their cost is `base * count`, snapped to the nearest bucket
//! with `(raw - lower) > (upper - lower) / 2 ? upper : lower`, so an exact
//! midpoint goes to the lower bucket.

use std::fmt;
use std::sync::LazyLock;

use crate::ir::cfg::{ControlFlowGraph, ScheduleMode};
use crate::ir::graph::Graph;
use crate::ir::kind::{Family, KindTag, NodeKind};
use crate::ir::node::Node;

// =============================================================================
// Cost Classes
// =============================================================================

/// Largest bucket value. Larger raw costs saturate here.
pub const MAX_BUCKET: u32 = 1024;

/// Snap a raw cost onto the bucket scale 0, 1, 2, 4, ..., 1024.
pub fn snap_to_bucket(raw: u64) -> u32 {
    if raw >= u64::from(MAX_BUCKET) {
        return MAX_BUCKET;
    }
    if raw <= 1 || raw.is_power_of_two() {
        return raw as u32;
    }
    let lower = 1u64 << (63 - raw.leading_zeros());
    let upper = lower * 2;
    if (raw - lower) > (upper - lower) / 2 {
        upper as u32
    } else {
        lower as u32
    }
}

macro_rules! cost_class {
    ($(#[$meta:meta])* $name:ident, $unit:literal, [$($variant:ident = $value:literal),+ $(,)?]) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum $name {
            /// No declaration reached this kind. Never valid on a concrete node.
            Unset,
            /// Cost cannot be estimated statically.
            Unknown,
            /// Node emits nothing worth counting.
            Ignored,
            $($variant,)+
        }

        impl $name {
            /// Numeric bucket value, `None` for the non-numeric classes.
            pub const fn value(self) -> Option<u32> {
                match self {
                    $name::Unset | $name::Unknown | $name::Ignored => None,
                    $($name::$variant => Some($value),)+
                }
            }

            /// What this class adds to a graph total. `Unknown` and `Ignored`
            /// count as zero.
            #[inline]
            pub fn contribution(self) -> u32 {
                self.value().unwrap_or(0)
            }

            #[inline]
            pub fn is_unset(self) -> bool {
                matches!(self, $name::Unset)
            }

            /// The class for an exact bucket value.
            pub const fn from_bucket(value: u32) -> Option<Self> {
                match value {
                    $($value => Some($name::$variant),)+
                    _ => None,
                }
            }

            /// Nearest bucket for an arbitrary raw cost.
            pub fn snap(raw: u64) -> Self {
                match Self::from_bucket(snap_to_bucket(raw)) {
                    Some(class) => class,
                    None => unreachable!("bucket scale is closed under snapping"),
                }
            }

            /// `base * count`, snapped. Non-numeric bases are returned as is.
            pub fn compound(base: Self, count: u32) -> Self {
                match base.value() {
                    Some(b) => Self::snap(u64::from(b).saturating_mul(u64::from(count))),
                    None => base,
                }
            }

            /// Next bucket up, saturating at the largest.
            pub fn next_larger(self) -> Self {
                match self.value() {
                    Some(0) => Self::snap(1),
                    Some(v) => Self::snap(u64::from(v) * 2),
                    None => self,
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                match self.value() {
                    Some(v) => write!(f, "{}{}", $unit, v),
                    None => write!(f, "{:?}", self),
                }
            }
        }
    };
}

cost_class!(
    /// Estimated code size of a node.
    SizeClass,
    "size",
    [
        Size0 = 0,
        Size1 = 1,
        Size2 = 2,
        Size4 = 4,
        Size8 = 8,
        Size16 = 16,
        Size32 = 32,
        Size64 = 64,
        Size128 = 128,
        Size256 = 256,
        Size512 = 512,
        Size1024 = 1024,
    ]
);

cost_class!(
    /// Estimated latency of a node.
    CyclesClass,
    "cycles",
    [
        Cycles0 = 0,
        Cycles1 = 1,
        Cycles2 = 2,
        Cycles4 = 4,
        Cycles8 = 8,
        Cycles16 = 16,
        Cycles32 = 32,
        Cycles64 = 64,
        Cycles128 = 128,
        Cycles256 = 256,
        Cycles512 = 512,
        Cycles1024 = 1024,
    ]
);

// =============================================================================
// Cost Table
// =============================================================================

/// What a declaration applies to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CostKey {
    Family(Family),
    Kind(KindTag),
}

/// One row of cost declarations. `Unset` leaves the dimension to ancestors.
#[derive(Clone, Copy, Debug)]
pub struct CostDeclaration {
    pub key: CostKey,
    pub size: SizeClass,
    pub cycles: CyclesClass,
    /// Required whenever a dimension is declared `Unknown` or `Ignored`.
    pub rationale: Option<&'static str>,
}

impl CostDeclaration {
    pub const fn kind(tag: KindTag, size: SizeClass, cycles: CyclesClass) -> Self {
        CostDeclaration {
            key: CostKey::Kind(tag),
            size,
            cycles,
            rationale: None,
        }
    }

    pub const fn family(family: Family, size: SizeClass, cycles: CyclesClass) -> Self {
        CostDeclaration {
            key: CostKey::Family(family),
            size,
            cycles,
            rationale: None,
        }
    }

    pub const fn because(mut self, rationale: &'static str) -> Self {
        self.rationale = Some(rationale);
        self
    }

    fn check_rationale(&self) {
        let needs = |unknown: bool, ignored: bool| unknown || ignored;
        let size_needs = needs(self.size == SizeClass::Unknown, self.size == SizeClass::Ignored);
        let cycles_needs = needs(
            self.cycles == CyclesClass::Unknown,
            self.cycles == CyclesClass::Ignored,
        );
        assert!(
            !(size_needs || cycles_needs) || self.rationale.is_some(),
            "{:?} declares an unknown or ignored cost without a rationale",
            self.key
        );
    }
}

/// Resolved per-kind costs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CostTable {
    size: [SizeClass; KindTag::COUNT],
    cycles: [CyclesClass; KindTag::COUNT],
}

impl CostTable {
    /// Resolve `declarations` for every concrete kind.
    ///
    /// # Panics
    ///
    /// If any concrete kind resolves to `Unset` in either dimension, or an
    /// `Unknown`/`Ignored` declaration carries no rationale.
    pub fn build(declarations: &[CostDeclaration]) -> Self {
        for decl in declarations {
            decl.check_rationale();
        }
        let find = |key: CostKey| declarations.iter().filter(move |d| d.key == key);

        let mut table = CostTable {
            size: [SizeClass::Unset; KindTag::COUNT],
            cycles: [CyclesClass::Unset; KindTag::COUNT],
        };
        for tag in KindTag::ALL {
            let chain = std::iter::once(CostKey::Kind(tag))
                .chain(tag.family().ancestry().map(CostKey::Family));
            let mut size = SizeClass::Unset;
            let mut cycles = CyclesClass::Unset;
            for key in chain {
                for decl in find(key) {
                    if size.is_unset() {
                        size = decl.size;
                    }
                    if cycles.is_unset() {
                        cycles = decl.cycles;
                    }
                }
            }
            assert!(!size.is_unset(), "node kind {} has no size declaration", tag.name());
            assert!(!cycles.is_unset(), "node kind {} has no cycles declaration", tag.name());
            table.size[tag.index()] = size;
            table.cycles[tag.index()] = cycles;
        }
        table
    }

    /// The table used by the compiler.
    pub fn standard() -> &'static CostTable {
        static TABLE: LazyLock<CostTable> = LazyLock::new(|| CostTable::build(STANDARD_COSTS));
        &TABLE
    }

    #[inline]
    pub fn size(&self, tag: KindTag) -> SizeClass {
        self.size[tag.index()]
    }

    #[inline]
    pub fn cycles(&self, tag: KindTag) -> CyclesClass {
        self.cycles[tag.index()]
    }
}

use CyclesClass::*;
use SizeClass::*;

const STANDARD_COSTS: &[CostDeclaration] = &[
    CostDeclaration::family(Family::BeginLike, Size0, Cycles0),
    CostDeclaration::family(Family::EndLike, Size1, Cycles1),
    CostDeclaration::kind(KindTag::LoopEnd, Size2, Cycles2),
    CostDeclaration::family(Family::ControlSplit, Size2, Cycles1),
    CostDeclaration::family(Family::ControlSink, Size2, Cycles2),
    CostDeclaration::kind(KindTag::Deoptimize, Size8, CyclesClass::Unknown)
        .because("execution continues in the interpreter"),
    CostDeclaration::family(Family::MemoryAccess, Size1, Cycles2),
    CostDeclaration::kind(KindTag::StoreField, Size2, CyclesClass::Unset),
    CostDeclaration::kind(KindTag::Invoke, Size2, Cycles2),
    // Per element; scaled by the length at each node.
    CostDeclaration::kind(KindTag::ArrayEquals, Size16, Cycles2),
    CostDeclaration::family(Family::Floating, Size1, Cycles1),
    CostDeclaration::kind(KindTag::Parameter, Size0, Cycles0),
    CostDeclaration::kind(KindTag::Constant, Size0, Cycles0),
    CostDeclaration::kind(KindTag::Phi, Size0, Cycles0),
    CostDeclaration::kind(KindTag::Pi, SizeClass::Ignored, CyclesClass::Ignored)
        .because("type annotation that emits no code"),
    CostDeclaration::family(Family::TypeCheck, Size4, Cycles2),
];

// =============================================================================
// Node and Graph Costs
// =============================================================================

/// Size bucket of a single node.
pub fn node_size(node: &Node) -> SizeClass {
    let base = CostTable::standard().size(node.kind.tag());
    assert!(!base.is_unset(), "unset size on {}", node.kind);
    match &node.kind {
        // Dispatch adds a receiver class load and an indirect call.
        NodeKind::Invoke(target) if !target.kind.is_exact() => base.next_larger(),
        _ => base,
    }
}

/// Cycles bucket of a single node.
pub fn node_cycles(node: &Node) -> CyclesClass {
    let base = CostTable::standard().cycles(node.kind.tag());
    assert!(!base.is_unset(), "unset cycles on {}", node.kind);
    match &node.kind {
        NodeKind::Arith(op) if op.is_division() => Cycles32,
        NodeKind::Invoke(target) if !target.kind.is_exact() => base.next_larger(),
        NodeKind::ArrayEquals { length } => CyclesClass::compound(base, *length),
        _ => base,
    }
}

/// Total estimated size of the live nodes of `graph`.
pub fn graph_size(graph: &Graph) -> i64 {
    let total: i64 = graph
        .iter()
        .map(|(_, node)| i64::from(node_size(node).contribution()))
        .sum();
    assert!(total >= 0, "negative graph size {total}");
    total
}

/// Frequency-weighted cycle estimate of `graph`.
///
/// `use_full_schedule` selects the precise but more expensive block
/// partition; see [`ScheduleMode`].
pub fn graph_cycles(graph: &Graph, use_full_schedule: bool) -> f64 {
    let mode = if use_full_schedule {
        ScheduleMode::Full
    } else {
        ScheduleMode::Structural
    };
    let cfg = ControlFlowGraph::build(graph, mode);
    let mut total = 0.0;
    for (_, block) in cfg.blocks() {
        let cycles: u64 = block
            .fixed
            .iter()
            .chain(block.floating.iter())
            .map(|&n| u64::from(node_cycles(graph.node(n)).contribution()))
            .sum();
        total += cycles as f64 * block.frequency;
    }
    assert!(
        total.is_finite() && total >= 0.0,
        "graph cycles estimate {total} is not a finite non-negative number"
    );
    total
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::builder::GraphBuilder;
    use crate::ir::kind::{ArithOp, FieldId, InvokeKind, InvokeTarget, MethodId};
    use crate::ir::stamp::Stamp;

    #[test]
    fn test_snap_rounds_to_nearest_bucket() {
        assert_eq!(snap_to_bucket(0), 0);
        assert_eq!(snap_to_bucket(1), 1);
        assert_eq!(snap_to_bucket(3), 2);
        assert_eq!(snap_to_bucket(5), 4);
        assert_eq!(snap_to_bucket(7), 8);
        assert_eq!(snap_to_bucket(2000), 1024);
    }

    #[test]
    fn test_snap_midpoint_goes_to_lower_bucket() {
        // 12 sits exactly between 8 and 16: (12 - 8) > 8 / 2 is false.
        assert_eq!(snap_to_bucket(12), 8);
        assert_eq!(snap_to_bucket(13), 16);
        assert_eq!(snap_to_bucket(6), 4);
        assert_eq!(snap_to_bucket(768), 512);
        assert_eq!(snap_to_bucket(769), 1024);
    }

    #[test]
    fn test_compound_cost() {
        assert_eq!(CyclesClass::compound(Cycles2, 6), Cycles8);
        assert_eq!(CyclesClass::compound(Cycles2, 1_000_000), Cycles1024);
        assert_eq!(CyclesClass::compound(CyclesClass::Unknown, 4), CyclesClass::Unknown);
    }

    #[test]
    fn test_every_kind_resolves() {
        let table = CostTable::standard();
        for tag in KindTag::ALL {
            assert!(!table.size(tag).is_unset());
            assert!(!table.cycles(tag).is_unset());
        }
    }

    #[test]
    fn test_nearest_declaration_wins() {
        let table = CostTable::standard();
        // Merge inherits from BeginLike.
        assert_eq!(table.size(KindTag::Merge), Size0);
        // LoopEnd overrides EndLike.
        assert_eq!(table.size(KindTag::LoopEnd), Size2);
        assert_eq!(table.size(KindTag::End), Size1);
        // StoreField overrides size only; cycles come from MemoryAccess.
        assert_eq!(table.size(KindTag::StoreField), Size2);
        assert_eq!(table.cycles(KindTag::StoreField), Cycles2);
        // Arith reaches Floating through Binary.
        assert_eq!(table.cycles(KindTag::Arith), Cycles1);
    }

    #[test]
    #[should_panic(expected = "has no size declaration")]
    fn test_unset_concrete_kind_is_fatal() {
        CostTable::build(&[CostDeclaration::family(Family::Floating, Size1, Cycles1)]);
    }

    #[test]
    #[should_panic(expected = "without a rationale")]
    fn test_unknown_cost_needs_rationale() {
        CostTable::build(&[CostDeclaration::family(Family::Node, SizeClass::Unknown, Cycles1)]);
    }

    #[test]
    fn test_dynamic_costs() {
        let mut b = GraphBuilder::new();
        let x = b.parameter(0, Stamp::INT);
        let y = b.parameter(1, Stamp::INT);
        let div = b.arith(ArithOp::Div, x, y);
        let call = b.invoke(
            InvokeTarget {
                method: MethodId(1),
                bci: 0,
                kind: InvokeKind::Virtual,
            },
            &[x],
            Stamp::INT,
        );
        let eq = b.array_equals(x, y, 6);
        b.return_value(Some(div));
        let graph = b.finish();

        assert_eq!(node_cycles(graph.node(div)), Cycles32);
        assert_eq!(node_size(graph.node(call)), Size4);
        assert_eq!(node_cycles(graph.node(call)), Cycles4);
        assert_eq!(node_cycles(graph.node(eq)), Cycles8);
    }

    #[test]
    fn test_store_inherits_memory_access_cycles() {
        let mut b = GraphBuilder::new();
        let obj = b.parameter(0, Stamp::OBJECT);
        let load = b.load_field(obj, FieldId(0), Stamp::INT);
        let store = b.store_field(obj, FieldId(1), load);
        b.return_value(None);
        let graph = b.finish();

        assert_eq!(node_size(graph.node(load)), Size1);
        assert_eq!(node_size(graph.node(store)), Size2);
        assert_eq!(node_cycles(graph.node(load)), Cycles2);
        assert_eq!(node_cycles(graph.node(store)), Cycles2);
    }

    #[test]
    fn test_trivial_graph_costs_are_non_negative() {
        let graph = Graph::new();
        assert_eq!(graph_size(&graph), 0);
        assert_eq!(graph_cycles(&graph, true), 0.0);

        let mut b = GraphBuilder::new();
        b.return_value(None);
        let graph = b.finish();
        assert_eq!(graph_size(&graph), 2);
        assert_eq!(graph_cycles(&graph, false), 2.0);
    }

    #[test]
    fn test_cycles_weight_by_frequency() {
        let mut b = GraphBuilder::new();
        let p = b.parameter(0, Stamp::BOOL);
        let x = b.parameter(1, Stamp::INT);
        let (t, f) = b.branch(p, 0.1);
        b.switch_to(t);
        let slow = b.arith(ArithOp::Div, x, x);
        b.return_value(Some(slow));
        b.switch_to(f);
        b.return_value(Some(x));
        let graph = b.finish();

        // If: 1, two returns: 2 * 0.1 + 2 * 0.9, division: 32 * 0.1.
        let expected = 1.0 + 2.0 + 3.2;
        assert!((graph_cycles(&graph, true) - expected).abs() < 1e-9);
    }
}
