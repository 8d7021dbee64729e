//! Inlining Driver
//!
//! Walks the call sites of one compilation root and inlines them one at a
//! time. The walk is breadth first: call sites of the root are visited in
//! control-flow order, and the invokes a splice brings in are appended to
//! the end of the worklist. Identical input therefore gives identical
//! decisions in identical order.
//!
//! # States
//!
//! ```text
//!            ┌──────────────────────────────────────┐
//!            ▼                                      │
//!        Scanning ──► Deciding ──► Splicing ──► Verifying
//!            │            │                         │
//!            │            └──(reject)──► Scanning   │
//!            ▼                                      ▼
//!          Done                                   Bailed
//! ```
//!
//! `Bailed` is reachable from every state through an error; the caller
//! graph is then left as it was after the last completed splice.
//!
//! # Relevance
//!
//! Each call site carries its relevance: how often it runs per entry of the
//! root. A call site of the root has the frequency of its block; a call
//! site brought in by a splice has the relevance of the call it replaced
//! times its frequency inside the callee (times the arm probability for a
//! type switch). Profile probabilities take precedence over block
//! frequencies when present.

use std::collections::VecDeque;

use smallvec::SmallVec;
use tracing::{debug, trace, warn};

use super::callee::{CallSiteKey, CalleeGraphProvider, GraphOrigin, InliningContext};
use super::cost::graph_size;
use super::info::{
    resolve, CandidateState, InlineInfo, InlineKind, InlineTarget, Resolution, ResolvedTarget,
};
use super::policy::{CallSiteStats, CandidateStats, InliningPolicy};
use super::profile::ProfileProvider;
use super::specialize::{specialize, ArgumentInfo};
use super::telemetry::Counter;
use super::transform::{build_type_switch, check_candidate, splice, Fallback, TypeSwitchArm};
use super::{InlineStats, InliningOptions};
use crate::error::{InlineError, InlineResult};
use crate::ir::cfg::{ControlFlowGraph, ScheduleMode};
use crate::ir::graph::Graph;
use crate::ir::kind::{InvokeTarget, MethodId};
use crate::ir::node::NodeId;
use crate::ir::stamp::Stamp;
use crate::opt::contract::{ContractVerifier, SizeContract};

// =============================================================================
// Walker State
// =============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WalkerState {
    Scanning,
    Deciding,
    Splicing,
    Verifying,
    Done,
    Bailed,
}

impl WalkerState {
    #[inline]
    pub fn is_terminal(self) -> bool {
        matches!(self, WalkerState::Done | WalkerState::Bailed)
    }
}

/// Index into the scope table.
type ScopeId = usize;

/// One level of the inlined call chain.
#[derive(Clone, Copy, Debug)]
struct Scope {
    method: MethodId,
    parent: Option<ScopeId>,
}

#[derive(Clone, Copy, Debug)]
struct CallSite {
    invoke: NodeId,
    depth: usize,
    /// Scope of the code the invoke sits in.
    scope: ScopeId,
    relevance: f64,
}

/// Result of a complete walk.
#[derive(Clone, Debug)]
pub struct InlineSummary {
    pub state: WalkerState,
    pub stats: InlineStats,
    pub initial_size: i64,
    pub final_size: i64,
}

// =============================================================================
// Frequencies
// =============================================================================

/// Invokes of `graph` in control order, each with its executions per entry
/// of `method`.
///
/// Profile probabilities are used where recorded; the block partition is
/// only built if some invoke has none.
pub fn invoke_frequencies(
    graph: &Graph,
    method: MethodId,
    profile: &dyn ProfileProvider,
) -> Vec<(NodeId, f64)> {
    let mut cfg: Option<ControlFlowGraph> = None;
    let mut out = Vec::new();
    for node in graph.control_order() {
        let Some(target) = graph.node(node).kind.as_invoke() else {
            continue;
        };
        let frequency = match profile.invoke_probability(method, target.bci) {
            Some(p) => p,
            None => {
                let cfg = cfg.get_or_insert_with(|| ControlFlowGraph::build(graph, ScheduleMode::Full));
                cfg.block_of(node).map_or(0.0, |b| cfg.block(b).frequency)
            }
        };
        out.push((node, frequency.max(0.0)));
    }
    out
}

// =============================================================================
// Walker
// =============================================================================

/// Drives inlining of one compilation root.
pub struct InliningWalker<'a> {
    context: &'a InliningContext,
    options: &'a InliningOptions,
    root: MethodId,
    state: WalkerState,
    worklist: VecDeque<CallSite>,
    scopes: Vec<Scope>,
    stats: InlineStats,
    verifier: ContractVerifier,
    contract: SizeContract,
}

impl<'a> InliningWalker<'a> {
    pub fn new(context: &'a InliningContext, options: &'a InliningOptions, root: MethodId) -> Self {
        InliningWalker {
            context,
            options,
            root,
            state: WalkerState::Scanning,
            worklist: VecDeque::new(),
            scopes: vec![Scope {
                method: root,
                parent: None,
            }],
            stats: InlineStats::default(),
            verifier: ContractVerifier::new(options.contract_min_size),
            contract: SizeContract::new("inlining", options.inlining_growth_factor),
        }
    }

    pub fn state(&self) -> WalkerState {
        self.state
    }

    pub fn stats(&self) -> &InlineStats {
        &self.stats
    }

    /// Inline into `graph`, the body of the root method.
    pub fn run(&mut self, graph: &mut Graph) -> InlineResult<InlineSummary> {
        let initial_size = graph_size(graph);
        self.stats.initial_size = initial_size;
        self.seed(graph);

        if let Err(err) = self.walk(graph, initial_size) {
            self.state = WalkerState::Bailed;
            self.stats.final_size = graph_size(graph);
            warn!(root = %self.root, error = %err, "inlining bailed out");
            return Err(err);
        }

        self.state = WalkerState::Done;
        let final_size = graph_size(graph);
        self.stats.final_size = final_size;
        debug!(
            root = %self.root,
            inlined = self.stats.sites_inlined,
            examined = self.stats.sites_examined,
            initial_size,
            final_size,
            "inlining done"
        );
        Ok(InlineSummary {
            state: self.state,
            stats: self.stats.clone(),
            initial_size,
            final_size,
        })
    }

    fn seed(&mut self, graph: &Graph) {
        let context = self.context;
        for (invoke, frequency) in invoke_frequencies(graph, self.root, &*context.profile) {
            self.worklist.push_back(CallSite {
                invoke,
                depth: 0,
                scope: 0,
                relevance: frequency,
            });
        }
    }

    fn walk(&mut self, graph: &mut Graph, initial_size: i64) -> InlineResult<()> {
        let context = self.context;
        let options = self.options;
        let telemetry = &*context.telemetry;
        let policy = InliningPolicy::new(options, telemetry);

        while let Some(site) = self.worklist.pop_front() {
            self.state = WalkerState::Scanning;
            let Some(target) = graph
                .get(site.invoke)
                .filter(|n| !n.is_dead())
                .and_then(|n| n.kind.as_invoke().copied())
            else {
                continue;
            };
            let size = graph_size(graph);
            if !policy.continue_inlining(size) {
                self.stats.cut_off = true;
                telemetry.increment(Counter::CutOffByMaxDesiredSize);
                debug!(size, limit = options.maximum_desired_size, "inlining budget exhausted");
                break;
            }
            self.stats.sites_examined += 1;
            telemetry.increment(Counter::SitesExamined);
            if site.depth >= options.max_inlining_depth {
                self.stats.rejected_depth += 1;
                telemetry.increment(Counter::RejectedByDepth);
                trace!(invoke = %site.invoke, depth = site.depth, "too deep");
                continue;
            }

            self.state = WalkerState::Deciding;
            let caller = self.scopes[site.scope].method;
            let resolution = resolve(
                &*context.resolver,
                &*context.profile,
                options,
                graph,
                site.invoke,
                caller,
            )?;
            let (kind, resolved) = match resolution {
                Resolution::Exact(t) => (InlineKind::Exact, vec![t]),
                Resolution::TypeSwitch {
                    targets,
                    not_recorded_probability,
                } => (InlineKind::TypeSwitch { not_recorded_probability }, targets),
                Resolution::Unresolved(reason) => {
                    self.stats.rejected_unresolved += 1;
                    trace!(invoke = %site.invoke, method = %target.method, reason, "not resolved");
                    continue;
                }
            };
            if !self.prechecks(&site, &resolved) {
                continue;
            }

            let Some(info) = self.build_info(graph, &site, target, kind, resolved)? else {
                continue;
            };
            let site_stats = CallSiteStats {
                relevance: site.relevance,
                constant_args: graph
                    .node(site.invoke)
                    .inputs()
                    .iter()
                    .filter(|&&a| graph.node(a).kind.as_constant().is_some())
                    .count(),
            };
            let candidate = info.aggregate_stats();
            let decision = policy.decide(
                &site_stats,
                &candidate,
                site.depth,
                info.state().is_fully_processed(),
            );
            debug!(
                method = %target.method,
                bci = target.bci,
                depth = site.depth,
                accept = decision.is_accept(),
                reason = %decision.reason(),
                "inlining decision"
            );
            if !decision.is_accept() {
                self.stats.rejected_policy += 1;
                telemetry.increment(Counter::Rejected);
                continue;
            }

            self.state = WalkerState::Splicing;
            self.splice_info(graph, &site, info)?;

            self.state = WalkerState::Verifying;
            self.verifier
                .check(initial_size, graph_size(graph), &self.contract, Some(self.root))?;
        }
        Ok(())
    }

    /// Depth-independent rejections that need no candidate graph.
    fn prechecks(&mut self, site: &CallSite, targets: &[ResolvedTarget]) -> bool {
        let context = self.context;
        let telemetry = &*context.telemetry;
        for t in targets {
            if t.method.never_inline() {
                self.stats.rejected_never_inline += 1;
                telemetry.increment(Counter::RejectedNeverInline);
                trace!(method = %t.method.id, "never inline");
                return false;
            }
            let occurrences = self.occurrences(site.scope, t.method.id);
            if occurrences > self.options.max_recursive_depth {
                self.stats.rejected_recursive += 1;
                telemetry.increment(Counter::RejectedByRecursion);
                trace!(method = %t.method.id, occurrences, "recursion too deep");
                return false;
            }
        }
        true
    }

    /// How often `method` appears in the call chain ending at `scope`.
    fn occurrences(&self, scope: ScopeId, method: MethodId) -> usize {
        let mut count = 0;
        let mut cursor = Some(scope);
        while let Some(s) = cursor {
            if self.scopes[s].method == method {
                count += 1;
            }
            cursor = self.scopes[s].parent;
        }
        count
    }

    /// Obtain and prepare a candidate graph for every target. `None` when a
    /// target has no graph.
    fn build_info(
        &mut self,
        graph: &Graph,
        site: &CallSite,
        target: InvokeTarget,
        kind: InlineKind,
        resolved: Vec<ResolvedTarget>,
    ) -> InlineResult<Option<InlineInfo>> {
        let provider = CalleeGraphProvider::new(self.context, self.options);
        let key = CallSiteKey {
            caller: self.scopes[site.scope].method,
            bci: target.bci,
            allow_substitutions: self.options.intrinsify,
        };
        let args: SmallVec<[ArgumentInfo; 4]> = graph
            .node(site.invoke)
            .inputs()
            .iter()
            .map(|&a| ArgumentInfo::of(graph, a))
            .collect();

        let mut targets = Vec::with_capacity(resolved.len());
        for r in resolved {
            let candidate = match provider.obtain_callee_graph(&r.method, &key) {
                Ok(c) => c,
                Err(InlineError::MissingBody(method)) => {
                    self.stats.rejected_missing_body += 1;
                    trace!(%method, "no body to inline");
                    return Ok(None);
                }
                Err(err) => return Err(err),
            };
            let mut callee = candidate.graph;

            let mut site_args = args.clone();
            if let (Some(stamp), Some(first)) = (r.receiver_stamp(), site_args.first_mut()) {
                *first = ArgumentInfo::with_stamp(stamp);
            }
            let mut state = match candidate.origin {
                GraphOrigin::Built => CandidateState::FullyProcessed,
                GraphOrigin::Substitution { .. } => CandidateState::Generic,
            };
            if let Some(affected) = specialize(&mut callee, &site_args) {
                self.context.canonicalizer.apply_incremental(&mut callee, &affected);
                self.stats.candidates_specialized += 1;
                self.context.telemetry.increment(Counter::CandidatesSpecialized);
                state = CandidateState::FullyProcessed;
            }

            let frequencies = invoke_frequencies(&callee, r.method.id, &*self.context.profile);
            let invoke_density = self
                .context
                .profile
                .invoke_density(r.method.id)
                .unwrap_or_else(|| frequencies.iter().map(|&(_, f)| f).sum());
            let substitution = matches!(candidate.origin, GraphOrigin::Substitution { .. });
            let stats = CandidateStats {
                node_count: callee.node_count(),
                compiled_code_size: r.method.compiled_code_size,
                invoke_density,
                intrinsic: r.method.is_intrinsic() && substitution,
                must_inline: r.method.must_inline(),
                substitution,
            };
            trace!(method = %r.method.id, ?state, nodes = stats.node_count, invoke_density, "candidate ready");
            targets.push(InlineTarget {
                resolved: r,
                graph: callee,
                origin: candidate.origin,
                state,
                stats,
                invoke_frequencies: frequencies,
            });
        }
        Ok(Some(InlineInfo {
            invoke: site.invoke,
            kind,
            targets,
        }))
    }

    fn splice_info(&mut self, graph: &mut Graph, site: &CallSite, info: InlineInfo) -> InlineResult<()> {
        match info.kind {
            InlineKind::Exact => {
                for target in info.targets {
                    self.splice_target(graph, site, site.invoke, &target, 1.0)?;
                }
            }
            InlineKind::TypeSwitch { .. } => {
                let fallback = if info.needs_fallback_invoke() {
                    Fallback::VirtualCall
                } else {
                    Fallback::Deoptimize
                };
                let arms: Vec<TypeSwitchArm> = info
                    .targets
                    .iter()
                    .map(|t| TypeSwitchArm {
                        method: t.resolved.method.id,
                        receiver_types: t.resolved.receiver_types.clone(),
                        probability: t.resolved.probability,
                        receiver_stamp: t.resolved.receiver_stamp().unwrap_or(Stamp::OBJECT),
                    })
                    .collect();
                // Every arm must splice cleanly before the switch is committed.
                let arg_count = graph.node(site.invoke).inputs().len();
                let result_used = graph.usage_count(site.invoke) > 0;
                for target in &info.targets {
                    check_candidate(&target.graph, arg_count, result_used, target.resolved.method.id)?;
                }
                let switch = build_type_switch(graph, site.invoke, &arms, fallback)?;
                for (&arm_invoke, target) in switch.arm_invokes.iter().zip(&info.targets) {
                    self.splice_target(graph, site, arm_invoke, target, target.resolved.probability)?;
                }
                self.stats.polymorphic_inlines += 1;
                self.context.telemetry.increment(Counter::InlinedPolymorphic);
            }
        }
        Ok(())
    }

    /// Splice one candidate at `invoke` and queue the invokes it brings in.
    fn splice_target(
        &mut self,
        graph: &mut Graph,
        site: &CallSite,
        invoke: NodeId,
        target: &InlineTarget,
        probability: f64,
    ) -> InlineResult<()> {
        let method = target.resolved.method.id;
        let result = splice(graph, invoke, &target.graph, method)?;

        self.scopes.push(Scope {
            method,
            parent: Some(site.scope),
        });
        let scope = self.scopes.len() - 1;
        let relevance = site.relevance * probability;
        for (old, new) in result.new_invokes {
            let frequency = target
                .invoke_frequencies
                .iter()
                .find(|&&(n, _)| n == old)
                .map_or(0.0, |&(_, f)| f);
            self.worklist.push_back(CallSite {
                invoke: new,
                depth: site.depth + 1,
                scope,
                relevance: relevance * frequency,
            });
        }

        self.stats.sites_inlined += 1;
        self.stats.nodes_added += result.nodes_added;
        let context = self.context;
        context.telemetry.increment(Counter::Inlined);
        context.telemetry.record_inlined(self.scopes[site.scope].method);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::ir::builder::GraphBuilder;
    use crate::ir::kind::InvokeKind;
    use crate::opt::inline::callee::{MethodInfo, MethodRegistry};
    use crate::opt::inline::profile::StaticProfile;
    use crate::opt::inline::telemetry::InlineCounters;

    fn call(method: u32, bci: u32) -> InvokeTarget {
        InvokeTarget {
            method: MethodId(method),
            bci,
            kind: InvokeKind::Static,
        }
    }

    /// `return p0 + 1`
    fn inc() -> Graph {
        let mut b = GraphBuilder::new();
        let x = b.parameter(0, Stamp::INT);
        let one = b.const_int(1);
        let sum = b.add(x, one);
        b.return_value(Some(sum));
        b.finish()
    }

    /// `return f(p0)` for method `f`.
    fn calls(f: u32) -> Graph {
        let mut b = GraphBuilder::new();
        let x = b.parameter(0, Stamp::INT);
        let r = b.invoke(call(f, 0), &[x], Stamp::INT);
        b.return_value(Some(r));
        b.finish()
    }

    fn context(registry: MethodRegistry) -> InliningContext {
        InliningContext::with_registry(Arc::new(registry))
    }

    #[test]
    fn test_simple_call_is_inlined() {
        let registry = MethodRegistry::new();
        registry.register(MethodInfo::new(MethodId(1), "inc"), Some(inc()));
        let ctx = context(registry);
        let options = InliningOptions::default();

        let mut graph = calls(1);
        let summary = InliningWalker::new(&ctx, &options, MethodId(0)).run(&mut graph).unwrap();
        assert_eq!(summary.state, WalkerState::Done);
        assert!(summary.state.is_terminal());
        assert!(!WalkerState::Splicing.is_terminal());
        assert_eq!(summary.stats.sites_inlined, 1);
        assert!(graph.invokes().is_empty());
        assert!(graph.verify().is_ok());
    }

    #[test]
    fn test_nested_calls_are_followed() {
        let registry = MethodRegistry::new();
        registry.register(MethodInfo::new(MethodId(1), "outer"), Some(calls(2)));
        registry.register(MethodInfo::new(MethodId(2), "inc"), Some(inc()));
        let ctx = context(registry);
        let options = InliningOptions::default();

        let mut graph = calls(1);
        let summary = InliningWalker::new(&ctx, &options, MethodId(0)).run(&mut graph).unwrap();
        assert_eq!(summary.stats.sites_inlined, 2);
        assert_eq!(summary.stats.sites_examined, 2);
        assert!(graph.invokes().is_empty());
    }

    #[test]
    fn test_self_recursion_stops_at_recursive_depth() {
        let registry = MethodRegistry::new();
        registry.register(MethodInfo::new(MethodId(1), "rec"), Some(calls(1)));
        let ctx = context(registry);
        let options = InliningOptions {
            max_recursive_depth: 2,
            ..InliningOptions::default()
        };

        let mut graph = calls(1);
        let summary = InliningWalker::new(&ctx, &options, MethodId(0)).run(&mut graph).unwrap();
        // Inlined at chain lengths 0, 1 and 2; the next copy would be the third.
        assert_eq!(summary.stats.sites_inlined, 3);
        assert_eq!(summary.stats.rejected_recursive, 1);
        assert_eq!(graph.invokes().len(), 1);
    }

    #[test]
    fn test_never_inline_is_respected() {
        let registry = MethodRegistry::new();
        registry.register(
            MethodInfo::new(MethodId(1), "cold").with_flags(crate::opt::inline::callee::MethodFlags::NEVER_INLINE),
            Some(inc()),
        );
        let counters = Arc::new(InlineCounters::new());
        let ctx = context(registry).with_telemetry(counters.clone());
        let options = InliningOptions::default();

        let mut graph = calls(1);
        let summary = InliningWalker::new(&ctx, &options, MethodId(0)).run(&mut graph).unwrap();
        assert_eq!(summary.stats.sites_inlined, 0);
        assert_eq!(counters.get(Counter::RejectedNeverInline), 1);
        assert_eq!(graph.invokes().len(), 1);
    }

    #[test]
    fn test_missing_body_is_a_rejection() {
        let registry = MethodRegistry::new();
        registry.register(
            MethodInfo::new(MethodId(1), "native").with_flags(crate::opt::inline::callee::MethodFlags::NATIVE),
            None,
        );
        let ctx = context(registry);
        let options = InliningOptions::default();

        let mut graph = calls(1);
        let summary = InliningWalker::new(&ctx, &options, MethodId(0)).run(&mut graph).unwrap();
        assert_eq!(summary.stats.rejected_missing_body, 1);
        assert_eq!(summary.state, WalkerState::Done);
    }

    #[test]
    fn test_profile_probability_sets_relevance() {
        let mut b = GraphBuilder::new();
        let x = b.parameter(0, Stamp::INT);
        let r = b.invoke(call(1, 4), &[x], Stamp::INT);
        b.return_value(Some(r));
        let graph = b.finish();

        let profile = StaticProfile::new().with_probability(MethodId(0), 4, 0.25);
        let freqs = invoke_frequencies(&graph, MethodId(0), &profile);
        assert_eq!(freqs, vec![(r, 0.25)]);

        let structural = invoke_frequencies(&graph, MethodId(0), &StaticProfile::new());
        assert_eq!(structural.len(), 1);
        assert!((structural[0].1 - 1.0).abs() < 1e-9);
    }
}
