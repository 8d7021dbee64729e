//! Value-range descriptors ("stamps") attached to every value-producing node.
//!
//! A stamp is an immutable lattice element describing what a value may be at
//! runtime:
//!
//! ```text
//!          Int[min, max]     Float     Object{?, nullable}
//!               |              |              |
//!          Int[lo, hi]         |      Object{T, exact, non_null}
//!                \             |             /
//!                          Empty (unreachable)
//! ```
//!
//! Stamps of different kinds never meet: the IR is typed, so a phi or a
//! parameter only ever sees one kind. `join` is the greatest lower bound and is
//! what the argument specializer uses to decide whether an actual argument is
//! strictly more precise than the formal parameter.

use std::fmt;

use super::kind::ConstValue;

// =============================================================================
// Type Identity
// =============================================================================

/// Opaque identity of a runtime class.
///
/// The type universe is flat: two distinct ids are unrelated, and an object
/// stamp without a type id stands for "any object".
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TypeId(pub u32);

impl fmt::Display for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}", self.0)
    }
}

// =============================================================================
// Stamp
// =============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Stamp {
    /// Control-only nodes and void returns.
    Void,
    /// Signed 64-bit range, both bounds inclusive.
    Int { lo: i64, hi: i64 },
    /// Any double.
    Float,
    /// Object reference.
    Object {
        ty: Option<TypeId>,
        exact: bool,
        non_null: bool,
    },
    /// No value can inhabit this stamp; the producing code is unreachable.
    Empty,
}

impl Stamp {
    /// Full 64-bit integer range.
    pub const INT: Stamp = Stamp::Int {
        lo: i64::MIN,
        hi: i64::MAX,
    };

    /// Nullable reference to any object.
    pub const OBJECT: Stamp = Stamp::Object {
        ty: None,
        exact: false,
        non_null: false,
    };

    /// Stamp of a boolean-valued comparison.
    pub const BOOL: Stamp = Stamp::Int { lo: 0, hi: 1 };

    #[inline]
    pub const fn int_range(lo: i64, hi: i64) -> Stamp {
        if lo > hi {
            Stamp::Empty
        } else {
            Stamp::Int { lo, hi }
        }
    }

    #[inline]
    pub const fn int_constant(value: i64) -> Stamp {
        Stamp::Int {
            lo: value,
            hi: value,
        }
    }

    /// Object stamp of type `ty` (or its subclasses when not `exact`).
    #[inline]
    pub const fn object(ty: TypeId, exact: bool, non_null: bool) -> Stamp {
        Stamp::Object {
            ty: Some(ty),
            exact,
            non_null,
        }
    }

    /// Stamp that a constant of the given value naturally carries.
    pub fn for_constant(value: ConstValue) -> Stamp {
        match value {
            ConstValue::Int(v) => Stamp::int_constant(v),
            ConstValue::Float(_) => Stamp::Float,
            ConstValue::Null => Stamp::OBJECT,
        }
    }

    /// The widest stamp of the same kind.
    pub fn unrestricted(self) -> Stamp {
        match self {
            Stamp::Int { .. } => Stamp::INT,
            Stamp::Object { .. } => Stamp::OBJECT,
            other => other,
        }
    }

    #[inline]
    pub fn is_empty(self) -> bool {
        matches!(self, Stamp::Empty)
    }

    /// The single integer this stamp admits, if any.
    #[inline]
    pub fn as_int_constant(self) -> Option<i64> {
        match self {
            Stamp::Int { lo, hi } if lo == hi => Some(lo),
            _ => None,
        }
    }

    /// Greatest lower bound: everything both stamps admit.
    pub fn join(self, other: Stamp) -> Stamp {
        match (self, other) {
            (a, b) if a == b => a,
            (Stamp::Empty, _) | (_, Stamp::Empty) => Stamp::Empty,
            (Stamp::Int { lo: l1, hi: h1 }, Stamp::Int { lo: l2, hi: h2 }) => {
                Stamp::int_range(l1.max(l2), h1.min(h2))
            }
            (
                Stamp::Object {
                    ty: t1,
                    exact: e1,
                    non_null: n1,
                },
                Stamp::Object {
                    ty: t2,
                    exact: e2,
                    non_null: n2,
                },
            ) => {
                let ty = match (t1, t2) {
                    (None, t) | (t, None) => t,
                    (Some(a), Some(b)) if a == b => Some(a),
                    // Unrelated classes share no instances in a flat universe.
                    _ => return Stamp::Empty,
                };
                Stamp::Object {
                    ty,
                    exact: (e1 && t1.is_some()) || (e2 && t2.is_some()),
                    non_null: n1 || n2,
                }
            }
            // Different kinds share no values.
            _ => Stamp::Empty,
        }
    }

    /// Least upper bound: everything either stamp admits.
    pub fn meet(self, other: Stamp) -> Stamp {
        match (self, other) {
            (a, b) if a == b => a,
            (Stamp::Empty, x) | (x, Stamp::Empty) => x,
            (Stamp::Int { lo: l1, hi: h1 }, Stamp::Int { lo: l2, hi: h2 }) => Stamp::Int {
                lo: l1.min(l2),
                hi: h1.max(h2),
            },
            (
                Stamp::Object {
                    ty: t1,
                    exact: e1,
                    non_null: n1,
                },
                Stamp::Object {
                    ty: t2,
                    exact: e2,
                    non_null: n2,
                },
            ) => {
                let ty = if t1 == t2 { t1 } else { None };
                Stamp::Object {
                    ty,
                    exact: ty.is_some() && e1 && e2,
                    non_null: n1 && n2,
                }
            }
            // Mixed kinds only come out of malformed graphs.
            (a, _) => a.unrestricted(),
        }
    }

    /// `true` when `self` admits strictly fewer values than `other`.
    ///
    /// Used by the specializer: an argument stamp that refines the parameter
    /// stamp is worth propagating into the callee.
    #[inline]
    pub fn refines(self, other: Stamp) -> bool {
        self != other && self.join(other) == self
    }
}

impl fmt::Display for Stamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Stamp::Void => write!(f, "void"),
            Stamp::Int { lo, hi } if lo == i64::MIN && hi == i64::MAX => write!(f, "i64"),
            Stamp::Int { lo, hi } if lo == hi => write!(f, "i64[{lo}]"),
            Stamp::Int { lo, hi } => write!(f, "i64[{lo}..{hi}]"),
            Stamp::Float => write!(f, "f64"),
            Stamp::Object {
                ty,
                exact,
                non_null,
            } => {
                write!(f, "obj")?;
                if let Some(ty) = ty {
                    write!(f, "<{}{}>", if exact { "=" } else { "" }, ty)?;
                }
                if non_null {
                    write!(f, "!")?;
                }
                Ok(())
            }
            Stamp::Empty => write!(f, "empty"),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_int_join_intersects_ranges() {
        let a = Stamp::int_range(0, 10);
        let b = Stamp::int_range(5, 20);
        assert_eq!(a.join(b), Stamp::int_range(5, 10));
        assert_eq!(a.join(Stamp::int_range(11, 12)), Stamp::Empty);
        assert_eq!(a.meet(b), Stamp::int_range(0, 20));
    }

    #[test]
    fn test_refines_is_strict() {
        let narrow = Stamp::int_range(0, 3);
        assert!(narrow.refines(Stamp::INT));
        assert!(!Stamp::INT.refines(narrow));
        assert!(!narrow.refines(narrow));
    }

    #[test]
    fn test_object_join_gains_precision() {
        let ty = TypeId(7);
        let declared = Stamp::OBJECT;
        let actual = Stamp::object(ty, true, true);
        assert_eq!(declared.join(actual), actual);
        assert!(actual.refines(declared));

        let typed = Stamp::object(ty, false, false);
        let non_null = Stamp::Object {
            ty: None,
            exact: false,
            non_null: true,
        };
        assert_eq!(typed.join(non_null), Stamp::object(ty, false, true));
    }

    #[test]
    fn test_unrelated_objects_are_empty() {
        let a = Stamp::object(TypeId(1), false, false);
        let b = Stamp::object(TypeId(2), false, false);
        assert!(a.join(b).is_empty());
    }

    #[test]
    fn test_cross_kind_join_is_empty() {
        assert!(Stamp::INT.join(Stamp::Float).is_empty());
        assert_eq!(Stamp::Empty.meet(Stamp::Float), Stamp::Float);
    }

    #[test]
    fn test_display() {
        assert_eq!(Stamp::int_constant(4).to_string(), "i64[4]");
        assert_eq!(Stamp::object(TypeId(3), true, true).to_string(), "obj<=T3>!");
    }
}
