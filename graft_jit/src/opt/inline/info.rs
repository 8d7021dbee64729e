//! Inline candidates of one call site.
//!
//! An exact call has one possible target. A virtual call is inlined through
//! a type switch over the receiver types its profile recorded: receiver
//! types that resolve to the same implementation share one target, and
//! each target gets its own private candidate graph.

use smallvec::{smallvec, SmallVec};
use tracing::trace;

use super::callee::{GraphOrigin, MethodInfo, MethodResolver};
use super::policy::CandidateStats;
use super::profile::ProfileProvider;
use super::InliningOptions;
use crate::error::{InlineError, InlineResult};
use crate::ir::graph::Graph;
use crate::ir::kind::{InvokeTarget, MethodId};
use crate::ir::node::NodeId;
use crate::ir::stamp::{Stamp, TypeId};

/// Processing state of a call site's candidate graph.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum CandidateState {
    /// No candidate graph built yet.
    #[default]
    Unbuilt,
    /// Built and simplified for this call site, or specialized to its
    /// arguments and re-simplified. Statistics describe what would be
    /// spliced.
    FullyProcessed,
    /// A verbatim copy of a shared graph, not adapted to the call site.
    Generic,
}

impl CandidateState {
    #[inline]
    pub fn is_fully_processed(self) -> bool {
        self == CandidateState::FullyProcessed
    }
}

// =============================================================================
// Resolution
// =============================================================================

/// A method the call may dispatch to.
#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedTarget {
    pub method: MethodInfo,
    /// Receiver types dispatching here; empty for exact calls.
    pub receiver_types: SmallVec<[TypeId; 2]>,
    /// Fraction of calls reaching this target.
    pub probability: f64,
}

impl ResolvedTarget {
    /// Stamp of the receiver once dispatch has picked this target.
    pub fn receiver_stamp(&self) -> Option<Stamp> {
        match self.receiver_types.as_slice() {
            [] => None,
            [ty] => Some(Stamp::object(*ty, true, true)),
            _ => Some(Stamp::Object {
                ty: None,
                exact: false,
                non_null: true,
            }),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Resolution {
    Exact(ResolvedTarget),
    TypeSwitch {
        targets: Vec<ResolvedTarget>,
        /// Fraction of calls whose receiver type was not recorded.
        not_recorded_probability: f64,
    },
    /// Nothing to inline; the reason is for logs.
    Unresolved(&'static str),
}

/// Work out what the invoke `invoke` inside `caller` can dispatch to.
pub fn resolve(
    resolver: &dyn MethodResolver,
    profile: &dyn ProfileProvider,
    options: &InliningOptions,
    graph: &Graph,
    invoke: NodeId,
    caller: MethodId,
) -> InlineResult<Resolution> {
    let target: InvokeTarget = graph
        .get(invoke)
        .filter(|n| !n.is_dead())
        .and_then(|n| n.kind.as_invoke().copied())
        .ok_or(InlineError::InvalidCallSite(invoke))?;

    let exact = |method: MethodId| match resolver.method(method) {
        Some(info) => Resolution::Exact(ResolvedTarget {
            method: info,
            receiver_types: SmallVec::new(),
            probability: 1.0,
        }),
        None => Resolution::Unresolved("unknown target"),
    };

    if target.kind.is_exact() {
        return Ok(exact(target.method));
    }

    let receiver = graph.node(invoke).input(0);
    if let Stamp::Object {
        ty: Some(ty),
        exact: true,
        ..
    } = graph.node(receiver).stamp
    {
        return Ok(match resolver.resolve_virtual(target.method, ty) {
            Some(method) => exact(method),
            None => Resolution::Unresolved("no implementation for exact receiver"),
        });
    }

    if !options.inline_polymorphic {
        return Ok(Resolution::Unresolved("polymorphic inlining disabled"));
    }
    let Some(types) = profile.receiver_profile(caller, target.bci) else {
        return Ok(Resolution::Unresolved("no receiver profile"));
    };
    if types.is_empty() {
        return Ok(Resolution::Unresolved("no receiver profile"));
    }
    if !types.is_complete() && !options.inline_megamorphic {
        return Ok(Resolution::Unresolved("megamorphic call site"));
    }

    let mut targets: Vec<ResolvedTarget> = Vec::new();
    for entry in &types.entries {
        let Some(method) = resolver.resolve_virtual(target.method, entry.ty) else {
            return Ok(Resolution::Unresolved("receiver type without implementation"));
        };
        if let Some(existing) = targets.iter_mut().find(|t| t.method.id == method) {
            existing.receiver_types.push(entry.ty);
            existing.probability += entry.probability;
            continue;
        }
        let Some(info) = resolver.method(method) else {
            return Ok(Resolution::Unresolved("unknown target"));
        };
        targets.push(ResolvedTarget {
            method: info,
            receiver_types: smallvec![entry.ty],
            probability: entry.probability,
        });
    }
    if targets.len() > options.max_type_switch_targets {
        return Ok(Resolution::Unresolved("too many targets"));
    }
    trace!(%invoke, targets = targets.len(), "resolved through receiver profile");
    Ok(Resolution::TypeSwitch {
        targets,
        not_recorded_probability: types.not_recorded_probability,
    })
}

// =============================================================================
// Inline Info
// =============================================================================

/// A resolved target with its prepared candidate graph.
#[derive(Debug)]
pub struct InlineTarget {
    pub resolved: ResolvedTarget,
    pub graph: Graph,
    pub origin: GraphOrigin,
    pub state: CandidateState,
    pub stats: CandidateStats,
    /// Invokes of `graph` with their frequency per entry of the candidate,
    /// in control order.
    pub invoke_frequencies: Vec<(NodeId, f64)>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum InlineKind {
    Exact,
    TypeSwitch { not_recorded_probability: f64 },
}

/// Everything needed to decide on and splice one call site.
#[derive(Debug)]
pub struct InlineInfo {
    pub invoke: NodeId,
    pub kind: InlineKind,
    pub targets: Vec<InlineTarget>,
}

impl InlineInfo {
    pub fn is_exact(&self) -> bool {
        self.kind == InlineKind::Exact
    }

    /// Keep a virtual fallback call for unrecorded receivers.
    pub fn needs_fallback_invoke(&self) -> bool {
        matches!(
            self.kind,
            InlineKind::TypeSwitch { not_recorded_probability } if not_recorded_probability > 0.0
        )
    }

    /// The call site is fully processed once every candidate is.
    pub fn state(&self) -> CandidateState {
        if self.targets.is_empty() {
            CandidateState::Unbuilt
        } else if self.targets.iter().all(|t| t.state.is_fully_processed()) {
            CandidateState::FullyProcessed
        } else {
            CandidateState::Generic
        }
    }

    /// Statistics of all candidates taken together.
    ///
    /// Sizes add up, density is the worst target's, and the overriding
    /// flags only hold if they hold for every target.
    pub fn aggregate_stats(&self) -> CandidateStats {
        if self.targets.is_empty() {
            return CandidateStats::default();
        }
        let mut stats = CandidateStats {
            intrinsic: true,
            must_inline: true,
            substitution: true,
            ..CandidateStats::default()
        };
        for target in &self.targets {
            let s = &target.stats;
            stats.node_count += s.node_count;
            stats.compiled_code_size = match (stats.compiled_code_size, s.compiled_code_size) {
                (Some(a), Some(b)) => Some(a.saturating_add(b)),
                (a, b) => a.or(b),
            };
            stats.invoke_density = stats.invoke_density.max(s.invoke_density);
            stats.intrinsic &= s.intrinsic;
            stats.must_inline &= s.must_inline;
            stats.substitution &= s.substitution;
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::builder::GraphBuilder;
    use crate::ir::kind::InvokeKind;
    use crate::opt::inline::callee::MethodRegistry;
    use crate::opt::inline::profile::{NoProfile, StaticProfile, TypeProfile};

    fn body() -> Graph {
        let mut b = GraphBuilder::new();
        let x = b.parameter(0, Stamp::OBJECT);
        b.return_value(Some(x));
        b.finish()
    }

    fn registry() -> MethodRegistry {
        let registry = MethodRegistry::new();
        registry.register(MethodInfo::new(MethodId(1), "A.f").with_holder(TypeId(1)), Some(body()));
        registry.register(MethodInfo::new(MethodId(2), "B.f").with_holder(TypeId(2)), Some(body()));
        registry.register_override(MethodId(1), TypeId(2), MethodId(2));
        registry
    }

    /// Caller with one virtual call of `A.f` on a receiver of `stamp`.
    fn caller(stamp: Stamp) -> (Graph, NodeId) {
        let mut b = GraphBuilder::new();
        let recv = b.parameter(0, stamp);
        let target = InvokeTarget {
            method: MethodId(1),
            bci: 3,
            kind: InvokeKind::Virtual,
        };
        let call = b.invoke(target, &[recv], Stamp::OBJECT);
        b.return_value(Some(call));
        (b.finish(), call)
    }

    #[test]
    fn test_exact_receiver_resolves_directly() {
        let (graph, call) = caller(Stamp::object(TypeId(2), true, true));
        let options = InliningOptions::default();
        let r = resolve(&registry(), &NoProfile, &options, &graph, call, MethodId(0)).unwrap();
        match r {
            Resolution::Exact(t) => assert_eq!(t.method.id, MethodId(2)),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_profile_groups_types_by_implementation() {
        let (graph, call) = caller(Stamp::OBJECT);
        let profile = StaticProfile::new().with_receivers(
            MethodId(0),
            3,
            TypeProfile::new(&[(TypeId(1), 0.5), (TypeId(2), 0.3), (TypeId(3), 0.2)], 0.0),
        );
        let options = InliningOptions::default();
        let r = resolve(&registry(), &profile, &options, &graph, call, MethodId(0)).unwrap();
        let Resolution::TypeSwitch { targets, not_recorded_probability } = r else {
            panic!("expected a type switch");
        };
        assert_eq!(not_recorded_probability, 0.0);
        assert_eq!(targets.len(), 2);
        // TypeId(3) inherits A.f.
        assert_eq!(targets[0].method.id, MethodId(1));
        assert_eq!(targets[0].receiver_types.as_slice(), &[TypeId(1), TypeId(3)]);
        assert!((targets[0].probability - 0.7).abs() < 1e-9);
        assert_eq!(targets[1].receiver_stamp(), Some(Stamp::object(TypeId(2), true, true)));
    }

    #[test]
    fn test_missing_or_megamorphic_profile_is_unresolved() {
        let (graph, call) = caller(Stamp::OBJECT);
        let options = InliningOptions::default();
        let r = resolve(&registry(), &NoProfile, &options, &graph, call, MethodId(0)).unwrap();
        assert_eq!(r, Resolution::Unresolved("no receiver profile"));

        let profile = StaticProfile::new().with_receivers(
            MethodId(0),
            3,
            TypeProfile::new(&[(TypeId(1), 0.5)], 0.5),
        );
        let strict = InliningOptions {
            inline_megamorphic: false,
            ..InliningOptions::default()
        };
        let r = resolve(&registry(), &profile, &strict, &graph, call, MethodId(0)).unwrap();
        assert_eq!(r, Resolution::Unresolved("megamorphic call site"));
    }

    #[test]
    fn test_non_invoke_is_invalid_call_site() {
        let (graph, call) = caller(Stamp::OBJECT);
        let recv = graph.node(call).input(0);
        let options = InliningOptions::default();
        let err = resolve(&registry(), &NoProfile, &options, &graph, recv, MethodId(0)).unwrap_err();
        assert_eq!(err, InlineError::InvalidCallSite(recv));
    }
}
