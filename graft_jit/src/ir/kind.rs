//! Node kinds.
//!
//! The set of node kinds is closed: every pass matches on [`NodeKind`]
//! exhaustively, so adding a kind is a compile error everywhere it matters.
//!
//! Kinds are grouped into a small family tree ([`Family`]) that mirrors the
//! structural roles nodes play (begin, merge, end, split, sink, ...). Tables
//! that want "nearest ancestor wins" behaviour, such as the cost model, declare
//! values per family and override them per kind.

use std::fmt;

use super::stamp::TypeId;

// =============================================================================
// Identities
// =============================================================================

/// Identity of a compiled method.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MethodId(pub u32);

impl fmt::Display for MethodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "m{}", self.0)
    }
}

/// Identity of an object field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FieldId(pub u32);

// =============================================================================
// Operations
// =============================================================================

/// Compile-time constant payload.
///
/// Floats are stored by bit pattern so constants can be interned in a hash map.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConstValue {
    Int(i64),
    Float(u64),
    Null,
}

impl fmt::Display for ConstValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            ConstValue::Int(v) => write!(f, "{v}"),
            ConstValue::Float(bits) => write!(f, "{}", f64::from_bits(bits)),
            ConstValue::Null => write!(f, "null"),
        }
    }
}

/// Binary integer arithmetic.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    And,
    Or,
    Xor,
    Shl,
}

impl ArithOp {
    /// Fold two constants. `None` when the result is undefined (division by
    /// zero) or not representable.
    pub fn fold(self, a: i64, b: i64) -> Option<i64> {
        match self {
            ArithOp::Add => Some(a.wrapping_add(b)),
            ArithOp::Sub => Some(a.wrapping_sub(b)),
            ArithOp::Mul => Some(a.wrapping_mul(b)),
            ArithOp::Div => a.checked_div(b),
            ArithOp::Rem => a.checked_rem(b),
            ArithOp::And => Some(a & b),
            ArithOp::Or => Some(a | b),
            ArithOp::Xor => Some(a ^ b),
            ArithOp::Shl => Some(a.wrapping_shl(b as u32 & 63)),
        }
    }

    pub fn is_commutative(self) -> bool {
        matches!(
            self,
            ArithOp::Add | ArithOp::Mul | ArithOp::And | ArithOp::Or | ArithOp::Xor
        )
    }

    /// Operations the backend lowers to a long-latency instruction.
    pub fn is_division(self) -> bool {
        matches!(self, ArithOp::Div | ArithOp::Rem)
    }
}

/// Integer comparison producing 0 or 1.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    pub fn fold(self, a: i64, b: i64) -> bool {
        match self {
            CmpOp::Eq => a == b,
            CmpOp::Ne => a != b,
            CmpOp::Lt => a < b,
            CmpOp::Le => a <= b,
            CmpOp::Gt => a > b,
            CmpOp::Ge => a >= b,
        }
    }
}

/// Dispatch flavour of a call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum InvokeKind {
    /// Statically bound call.
    Static,
    /// Non-virtual instance call (constructors, private methods).
    Special,
    /// Virtual dispatch through the receiver's class.
    Virtual,
    /// Interface dispatch.
    Interface,
}

impl InvokeKind {
    /// `true` when the target is known without looking at the receiver.
    #[inline]
    pub fn is_exact(self) -> bool {
        matches!(self, InvokeKind::Static | InvokeKind::Special)
    }

    /// `true` when argument 0 is a receiver.
    #[inline]
    pub fn has_receiver(self) -> bool {
        !matches!(self, InvokeKind::Static)
    }
}

/// The declared target of a call site.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct InvokeTarget {
    pub method: MethodId,
    /// Bytecode index of the call inside its method; keys profile lookups.
    pub bci: u32,
    pub kind: InvokeKind,
}

/// Why compiled code gives up and falls back to the interpreter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DeoptReason {
    /// Receiver type not covered by a type switch.
    TypeCheckedInliningViolated,
    /// Code that the profile says is never reached.
    Unreached,
}

// =============================================================================
// Node Kind
// =============================================================================

#[derive(Clone, Debug, PartialEq)]
pub enum NodeKind {
    // Fixed nodes.
    Start,
    Begin,
    End,
    Merge,
    LoopBegin,
    LoopEnd,
    If { true_probability: f64 },
    Return,
    Deoptimize(DeoptReason),
    Invoke(InvokeTarget),
    LoadField(FieldId),
    StoreField(FieldId),
    ArrayEquals { length: u32 },

    // Floating nodes.
    Parameter { index: u32 },
    Constant(ConstValue),
    Arith(ArithOp),
    Compare(CmpOp),
    Phi,
    Pi,
    InstanceOf { ty: TypeId, exact: bool },
}

impl NodeKind {
    pub fn tag(&self) -> KindTag {
        match self {
            NodeKind::Start => KindTag::Start,
            NodeKind::Begin => KindTag::Begin,
            NodeKind::End => KindTag::End,
            NodeKind::Merge => KindTag::Merge,
            NodeKind::LoopBegin => KindTag::LoopBegin,
            NodeKind::LoopEnd => KindTag::LoopEnd,
            NodeKind::If { .. } => KindTag::If,
            NodeKind::Return => KindTag::Return,
            NodeKind::Deoptimize(_) => KindTag::Deoptimize,
            NodeKind::Invoke(_) => KindTag::Invoke,
            NodeKind::LoadField(_) => KindTag::LoadField,
            NodeKind::StoreField(_) => KindTag::StoreField,
            NodeKind::ArrayEquals { .. } => KindTag::ArrayEquals,
            NodeKind::Parameter { .. } => KindTag::Parameter,
            NodeKind::Constant(_) => KindTag::Constant,
            NodeKind::Arith(_) => KindTag::Arith,
            NodeKind::Compare(_) => KindTag::Compare,
            NodeKind::Phi => KindTag::Phi,
            NodeKind::Pi => KindTag::Pi,
            NodeKind::InstanceOf { .. } => KindTag::InstanceOf,
        }
    }

    /// Fixed nodes sit on the control skeleton.
    #[inline]
    pub fn is_fixed(&self) -> bool {
        self.tag().is_fixed()
    }

    #[inline]
    pub fn is_floating(&self) -> bool {
        !self.is_fixed()
    }

    /// Fixed nodes with exactly one control successor.
    pub fn has_next(&self) -> bool {
        matches!(
            self,
            NodeKind::Start
                | NodeKind::Begin
                | NodeKind::Merge
                | NodeKind::LoopBegin
                | NodeKind::Invoke(_)
                | NodeKind::LoadField(_)
                | NodeKind::StoreField(_)
                | NodeKind::ArrayEquals { .. }
        )
    }

    /// Merge-like nodes own an ordered list of incoming ends.
    #[inline]
    pub fn is_merge(&self) -> bool {
        matches!(self, NodeKind::Merge | NodeKind::LoopBegin)
    }

    #[inline]
    pub fn is_end(&self) -> bool {
        matches!(self, NodeKind::End | NodeKind::LoopEnd)
    }

    #[inline]
    pub fn is_constant(&self) -> bool {
        matches!(self, NodeKind::Constant(_))
    }

    #[inline]
    pub fn as_invoke(&self) -> Option<&InvokeTarget> {
        match self {
            NodeKind::Invoke(target) => Some(target),
            _ => None,
        }
    }

    #[inline]
    pub fn as_constant(&self) -> Option<ConstValue> {
        match self {
            NodeKind::Constant(value) => Some(*value),
            _ => None,
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeKind::If { true_probability } => write!(f, "If(p={true_probability:.3})"),
            NodeKind::Invoke(t) => write!(f, "Invoke({:?} {}@{})", t.kind, t.method, t.bci),
            NodeKind::Parameter { index } => write!(f, "Parameter({index})"),
            NodeKind::Constant(v) => write!(f, "Constant({v})"),
            NodeKind::Arith(op) => write!(f, "{op:?}"),
            NodeKind::Compare(op) => write!(f, "Cmp{op:?}"),
            NodeKind::InstanceOf { ty, exact } => {
                write!(f, "InstanceOf({}{ty})", if *exact { "=" } else { "" })
            }
            NodeKind::ArrayEquals { length } => write!(f, "ArrayEquals({length})"),
            other => write!(f, "{}", other.tag().name()),
        }
    }
}

// =============================================================================
// Kind Tags and Families
// =============================================================================

/// Payload-free discriminant of [`NodeKind`], usable as a table index.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KindTag {
    Start,
    Begin,
    End,
    Merge,
    LoopBegin,
    LoopEnd,
    If,
    Return,
    Deoptimize,
    Invoke,
    LoadField,
    StoreField,
    ArrayEquals,
    Parameter,
    Constant,
    Arith,
    Compare,
    Phi,
    Pi,
    InstanceOf,
}

impl KindTag {
    pub const COUNT: usize = 20;

    pub const ALL: [KindTag; Self::COUNT] = [
        KindTag::Start,
        KindTag::Begin,
        KindTag::End,
        KindTag::Merge,
        KindTag::LoopBegin,
        KindTag::LoopEnd,
        KindTag::If,
        KindTag::Return,
        KindTag::Deoptimize,
        KindTag::Invoke,
        KindTag::LoadField,
        KindTag::StoreField,
        KindTag::ArrayEquals,
        KindTag::Parameter,
        KindTag::Constant,
        KindTag::Arith,
        KindTag::Compare,
        KindTag::Phi,
        KindTag::Pi,
        KindTag::InstanceOf,
    ];

    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// The family this concrete kind belongs to.
    pub const fn family(self) -> Family {
        match self {
            KindTag::Start | KindTag::Begin => Family::BeginLike,
            KindTag::Merge | KindTag::LoopBegin => Family::MergeLike,
            KindTag::End | KindTag::LoopEnd => Family::EndLike,
            KindTag::If => Family::ControlSplit,
            KindTag::Return | KindTag::Deoptimize => Family::ControlSink,
            KindTag::Invoke | KindTag::ArrayEquals => Family::Fixed,
            KindTag::LoadField | KindTag::StoreField => Family::MemoryAccess,
            KindTag::Arith | KindTag::Compare => Family::Binary,
            KindTag::InstanceOf => Family::TypeCheck,
            KindTag::Parameter | KindTag::Constant | KindTag::Phi | KindTag::Pi => {
                Family::Floating
            }
        }
    }

    pub fn is_fixed(self) -> bool {
        self.family().is_within(Family::Fixed)
    }

    pub const fn name(self) -> &'static str {
        match self {
            KindTag::Start => "Start",
            KindTag::Begin => "Begin",
            KindTag::End => "End",
            KindTag::Merge => "Merge",
            KindTag::LoopBegin => "LoopBegin",
            KindTag::LoopEnd => "LoopEnd",
            KindTag::If => "If",
            KindTag::Return => "Return",
            KindTag::Deoptimize => "Deoptimize",
            KindTag::Invoke => "Invoke",
            KindTag::LoadField => "LoadField",
            KindTag::StoreField => "StoreField",
            KindTag::ArrayEquals => "ArrayEquals",
            KindTag::Parameter => "Parameter",
            KindTag::Constant => "Constant",
            KindTag::Arith => "Arith",
            KindTag::Compare => "Compare",
            KindTag::Phi => "Phi",
            KindTag::Pi => "Pi",
            KindTag::InstanceOf => "InstanceOf",
        }
    }
}

/// Abstract node families. Never instantiated as nodes.
///
/// ```text
/// Node
///  ├─ Fixed
///  │   ├─ BeginLike ── MergeLike
///  │   ├─ EndLike
///  │   ├─ ControlSplit
///  │   ├─ ControlSink
///  │   └─ MemoryAccess
///  └─ Floating
///      ├─ Binary
///      └─ TypeCheck
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Family {
    Node,
    Fixed,
    BeginLike,
    MergeLike,
    EndLike,
    ControlSplit,
    ControlSink,
    MemoryAccess,
    Floating,
    Binary,
    TypeCheck,
}

impl Family {
    /// Parent family, `None` for the root.
    pub const fn parent(self) -> Option<Family> {
        match self {
            Family::Node => None,
            Family::Fixed | Family::Floating => Some(Family::Node),
            Family::MergeLike => Some(Family::BeginLike),
            Family::BeginLike
            | Family::EndLike
            | Family::ControlSplit
            | Family::ControlSink
            | Family::MemoryAccess => Some(Family::Fixed),
            Family::Binary | Family::TypeCheck => Some(Family::Floating),
        }
    }

    /// `true` if `self` is `ancestor` or one of its descendants.
    pub fn is_within(self, ancestor: Family) -> bool {
        let mut current = Some(self);
        while let Some(family) = current {
            if family == ancestor {
                return true;
            }
            current = family.parent();
        }
        false
    }

    /// Families from `self` up to the root, nearest first.
    pub fn ancestry(self) -> impl Iterator<Item = Family> {
        std::iter::successors(Some(self), |f| f.parent())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tags_are_table_indices() {
        for (i, tag) in KindTag::ALL.iter().enumerate() {
            assert_eq!(tag.index(), i);
        }
    }

    #[test]
    fn test_family_ancestry_reaches_root() {
        let chain: Vec<_> = KindTag::LoopBegin.family().ancestry().collect();
        assert_eq!(
            chain,
            vec![Family::MergeLike, Family::BeginLike, Family::Fixed, Family::Node]
        );
        assert!(KindTag::Invoke.is_fixed());
        assert!(!KindTag::Phi.is_fixed());
        assert!(Family::Binary.is_within(Family::Floating));
    }

    #[test]
    fn test_arith_fold() {
        assert_eq!(ArithOp::Add.fold(2, 3), Some(5));
        assert_eq!(ArithOp::Div.fold(1, 0), None);
        assert_eq!(ArithOp::Div.fold(i64::MIN, -1), None);
        assert!(CmpOp::Le.fold(3, 3));
    }
}
