//! Inlining Policy
//!
//! Decides whether one candidate is worth inlining at one call site. The
//! rules are tried in order and the first that applies wins:
//!
//! 1. inline-everything override accepts
//! 2. intrinsics accept
//! 3. must-inline methods accept
//! 4. a large earlier compilation of the callee rejects
//! 5. trivially small candidates accept
//! 6. invocation-heavy candidates reject (fully processed sites only)
//! 7. otherwise the node count is held against a ceiling scaled by the
//!    relevance of the call site
//!
//! Thresholds of rules 4 to 7 are multiplied by a bonus that grows with
//! what the call site brings: a substitution graph, constant arguments.
//!
//! The policy is pure apart from one counter on the rule 4 path. Rationale
//! strings are only formatted when tracing is enabled.

use std::borrow::Cow;

use super::telemetry::{Counter, TelemetrySink};
use super::InliningOptions;

// =============================================================================
// Statistics
// =============================================================================

/// What is known about the call site.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CallSiteStats {
    /// Executions per entry of the compilation root, from the profile or
    /// estimated from block frequencies.
    pub relevance: f64,
    /// Arguments that are compile-time constants.
    pub constant_args: usize,
}

/// What is known about the candidate(s) for the call site.
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct CandidateStats {
    /// Live nodes after specialization.
    pub node_count: usize,
    /// Machine code size from an earlier compilation.
    pub compiled_code_size: Option<u32>,
    /// Summed frequency of the calls inside the candidate.
    pub invoke_density: f64,
    /// The candidate is an intrinsic served by its substitution.
    pub intrinsic: bool,
    pub must_inline: bool,
    /// The graph came from the substitution collaborator.
    pub substitution: bool,
}

// =============================================================================
// Decision
// =============================================================================

/// The rule that produced a decision.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DecisionRule {
    InlineEverything,
    Intrinsic,
    MustInline,
    PreviouslyCompiledTooLarge,
    Trivial,
    InvokeDensity,
    RelevanceBased,
}

impl DecisionRule {
    pub const fn summary(self) -> &'static str {
        match self {
            DecisionRule::InlineEverything => "inline everything",
            DecisionRule::Intrinsic => "intrinsic",
            DecisionRule::MustInline => "must inline",
            DecisionRule::PreviouslyCompiledTooLarge => "previously compiled too large",
            DecisionRule::Trivial => "trivial",
            DecisionRule::InvokeDensity => "callee invoke density too high",
            DecisionRule::RelevanceBased => "relevance-based",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Decision {
    accept: bool,
    rule: DecisionRule,
    rationale: Option<String>,
}

impl Decision {
    fn new(accept: bool, rule: DecisionRule, tracing: bool, rationale: impl FnOnce() -> String) -> Self {
        Decision {
            accept,
            rule,
            rationale: tracing.then(rationale),
        }
    }

    fn yes(rule: DecisionRule, tracing: bool, rationale: impl FnOnce() -> String) -> Self {
        Self::new(true, rule, tracing, rationale)
    }

    fn no(rule: DecisionRule, tracing: bool, rationale: impl FnOnce() -> String) -> Self {
        Self::new(false, rule, tracing, rationale)
    }

    #[inline]
    pub fn is_accept(&self) -> bool {
        self.accept
    }

    #[inline]
    pub fn rule(&self) -> DecisionRule {
        self.rule
    }

    /// Formatted rationale; only present when tracing was enabled.
    pub fn rationale(&self) -> Option<&str> {
        self.rationale.as_deref()
    }

    /// The rationale if formatted, else the rule summary.
    pub fn reason(&self) -> Cow<'_, str> {
        match &self.rationale {
            Some(text) => Cow::Borrowed(text),
            None => Cow::Borrowed(self.rule.summary()),
        }
    }
}

// =============================================================================
// Policy
// =============================================================================

pub struct InliningPolicy<'a> {
    options: &'a InliningOptions,
    telemetry: &'a dyn TelemetrySink,
}

impl<'a> InliningPolicy<'a> {
    pub fn new(options: &'a InliningOptions, telemetry: &'a dyn TelemetrySink) -> Self {
        InliningPolicy { options, telemetry }
    }

    /// Cheap pre-check: may the walk look at another call site?
    #[inline]
    pub fn continue_inlining(&self, current_size: i64) -> bool {
        current_size < self.options.maximum_desired_size
    }

    /// Threshold multiplier for this call site and candidate. Never below 1.
    pub fn bonus(&self, site: &CallSiteStats, candidate: &CandidateStats) -> f64 {
        let mut bonus = 1.0;
        if candidate.substitution {
            bonus += self.options.substitution_bonus;
        }
        bonus += self.options.constant_argument_bonus * site.constant_args as f64;
        bonus
    }

    pub fn decide(
        &self,
        site: &CallSiteStats,
        candidate: &CandidateStats,
        depth: usize,
        fully_processed: bool,
    ) -> Decision {
        let o = self.options;
        let tracing = o.tracing_enabled;

        if o.inline_everything {
            return Decision::yes(DecisionRule::InlineEverything, tracing, || {
                format!("inline everything (depth {depth})")
            });
        }
        if candidate.intrinsic {
            return Decision::yes(DecisionRule::Intrinsic, tracing, || {
                format!("intrinsic (depth {depth})")
            });
        }
        if candidate.must_inline {
            return Decision::yes(DecisionRule::MustInline, tracing, || {
                format!("must inline (depth {depth})")
            });
        }

        let bonus = self.bonus(site, candidate);
        if let Some(size) = candidate.compiled_code_size {
            let limit = o.small_graph_size_threshold as f64 * bonus;
            if !candidate.substitution && f64::from(size) > limit {
                self.telemetry
                    .increment(Counter::RejectedPreviouslyCompiledTooLarge);
                return Decision::no(DecisionRule::PreviouslyCompiledTooLarge, tracing, || {
                    format!("previously compiled too large ({size} > {limit:.1}, bonus {bonus:.2})")
                });
            }
        }

        let nodes = candidate.node_count as f64;
        let trivial = o.trivial_size_threshold * bonus;
        if nodes < trivial {
            return Decision::yes(DecisionRule::Trivial, tracing, || {
                format!("trivial ({nodes} < {trivial:.1}, bonus {bonus:.2})")
            });
        }

        let density = candidate.invoke_density;
        let density_limit = o.max_invoke_probability * bonus;
        if fully_processed && density > density_limit {
            return Decision::no(DecisionRule::InvokeDensity, tracing, || {
                format!("callee invoke density too high ({density:.2} > {density_limit:.2})")
            });
        }

        let relevance = site.relevance.min(o.relevance_cap);
        let ceiling = relevance * o.max_inlining_size * bonus;
        Decision::new(nodes <= ceiling, DecisionRule::RelevanceBased, tracing, || {
            format!(
                "relevance-based ({nodes} {} {ceiling:.1}, relevance {:.3}, bonus {bonus:.2})",
                if nodes <= ceiling { "<=" } else { ">" },
                site.relevance
            )
        })
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opt::inline::telemetry::{InlineCounters, NullSink};

    fn site(relevance: f64) -> CallSiteStats {
        CallSiteStats {
            relevance,
            constant_args: 0,
        }
    }

    fn candidate(node_count: usize) -> CandidateStats {
        CandidateStats {
            node_count,
            ..CandidateStats::default()
        }
    }

    fn options() -> InliningOptions {
        InliningOptions {
            trivial_size_threshold: 10.0,
            max_inlining_size: 300.0,
            max_invoke_probability: 5.0,
            small_graph_size_threshold: 300,
            relevance_cap: 1.0,
            substitution_bonus: 9.0,
            constant_argument_bonus: 0.5,
            tracing_enabled: true,
            ..InliningOptions::default()
        }
    }

    #[test]
    fn test_trivial_candidate_is_accepted() {
        let options = options();
        let policy = InliningPolicy::new(&options, &NullSink);
        let d = policy.decide(&site(0.0), &candidate(5), 0, false);
        assert!(d.is_accept());
        assert_eq!(d.rule(), DecisionRule::Trivial);
        assert!(d.reason().contains("trivial"));
    }

    #[test]
    fn test_rationale_only_formatted_when_tracing() {
        let options = InliningOptions {
            tracing_enabled: false,
            ..options()
        };
        let policy = InliningPolicy::new(&options, &NullSink);
        let d = policy.decide(&site(0.0), &candidate(5), 0, false);
        assert_eq!(d.rationale(), None);
        assert_eq!(d.reason(), "trivial");
    }

    #[test]
    fn test_rules_are_ordered() {
        let options = options();
        let policy = InliningPolicy::new(&options, &NullSink);
        // Intrinsic wins over a huge earlier compilation.
        let big_intrinsic = CandidateStats {
            intrinsic: true,
            compiled_code_size: Some(100_000),
            ..candidate(5000)
        };
        assert_eq!(
            policy.decide(&site(1.0), &big_intrinsic, 0, true).rule(),
            DecisionRule::Intrinsic
        );

        // A large earlier compilation rejects even a trivial graph.
        let compiled = CandidateStats {
            compiled_code_size: Some(301),
            ..candidate(2)
        };
        let d = policy.decide(&site(1.0), &compiled, 0, true);
        assert!(!d.is_accept());
        assert_eq!(d.rule(), DecisionRule::PreviouslyCompiledTooLarge);
    }

    #[test]
    fn test_previously_compiled_too_large_is_counted() {
        let options = options();
        let counters = InlineCounters::new();
        let policy = InliningPolicy::new(&options, &counters);
        let compiled = CandidateStats {
            compiled_code_size: Some(1000),
            ..candidate(50)
        };
        policy.decide(&site(1.0), &compiled, 0, false);
        assert_eq!(counters.get(Counter::RejectedPreviouslyCompiledTooLarge), 1);

        // Substitutions are exempt from the check.
        let substituted = CandidateStats {
            substitution: true,
            ..compiled
        };
        assert!(policy.decide(&site(1.0), &substituted, 0, false).is_accept());
        assert_eq!(counters.get(Counter::RejectedPreviouslyCompiledTooLarge), 1);
    }

    #[test]
    fn test_density_only_checked_when_fully_processed() {
        let options = options();
        let policy = InliningPolicy::new(&options, &NullSink);
        let busy = CandidateStats {
            invoke_density: 8.0,
            ..candidate(50)
        };
        let d = policy.decide(&site(1.0), &busy, 1, true);
        assert_eq!(d.rule(), DecisionRule::InvokeDensity);
        assert!(!d.is_accept());

        let d = policy.decide(&site(1.0), &busy, 1, false);
        assert_eq!(d.rule(), DecisionRule::RelevanceBased);
        assert!(d.is_accept());
    }

    #[test]
    fn test_relevance_scales_ceiling() {
        let options = options();
        let policy = InliningPolicy::new(&options, &NullSink);
        // ceiling = 0.5 * 300 = 150
        assert!(policy.decide(&site(0.5), &candidate(150), 0, true).is_accept());
        assert!(!policy.decide(&site(0.5), &candidate(151), 0, true).is_accept());
        // Relevance above the cap counts as the cap.
        assert!(!policy.decide(&site(50.0), &candidate(301), 0, true).is_accept());
        let d = policy.decide(&site(0.01), &candidate(200), 0, true);
        assert!(d.reason().contains("relevance-based"));
    }

    #[test]
    fn test_bonus_grows_with_substitution_and_constants() {
        let options = options();
        let policy = InliningPolicy::new(&options, &NullSink);
        let plain = candidate(12);
        assert_eq!(policy.bonus(&site(1.0), &plain), 1.0);

        let with_constants = CallSiteStats {
            relevance: 0.0,
            constant_args: 2,
        };
        assert_eq!(policy.bonus(&with_constants, &plain), 2.0);
        // 12 < 10 * 2.0
        assert_eq!(
            policy.decide(&with_constants, &plain, 0, true).rule(),
            DecisionRule::Trivial
        );

        let substituted = CandidateStats {
            substitution: true,
            ..plain
        };
        assert_eq!(policy.bonus(&site(1.0), &substituted), 10.0);
    }

    #[test]
    fn test_overrides_accept() {
        let options = InliningOptions {
            inline_everything: true,
            ..options()
        };
        let policy = InliningPolicy::new(&options, &NullSink);
        let d = policy.decide(&site(0.0), &candidate(1_000_000), 9, true);
        assert_eq!(d.rule(), DecisionRule::InlineEverything);

        let options = self::options();
        let policy = InliningPolicy::new(&options, &NullSink);
        let forced = CandidateStats {
            must_inline: true,
            ..candidate(1_000_000)
        };
        assert_eq!(
            policy.decide(&site(0.0), &forced, 0, true).rule(),
            DecisionRule::MustInline
        );
    }

    #[test]
    fn test_continue_inlining_respects_budget() {
        let options = InliningOptions {
            maximum_desired_size: 100,
            ..options()
        };
        let policy = InliningPolicy::new(&options, &NullSink);
        assert!(policy.continue_inlining(99));
        assert!(!policy.continue_inlining(100));
    }
}
