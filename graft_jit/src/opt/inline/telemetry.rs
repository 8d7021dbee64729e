//! Inlining Telemetry
//!
//! Counters bumped on specific decision branches for offline analysis.
//! The sink interface returns nothing: a sink that drops events cannot
//! change what the inliner decides.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

use crate::ir::kind::MethodId;

// =============================================================================
// Counters
// =============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Counter {
    /// Call sites popped from the worklist.
    SitesExamined,
    /// Call sites replaced by a spliced body.
    Inlined,
    /// Inlined through a type switch.
    InlinedPolymorphic,
    /// Policy said no.
    Rejected,
    /// Walk stopped because the graph reached the size budget.
    CutOffByMaxDesiredSize,
    RejectedPreviouslyCompiledTooLarge,
    RejectedByDepth,
    RejectedByRecursion,
    RejectedNeverInline,
    /// Candidate graphs changed by argument specialization.
    CandidatesSpecialized,
    /// Candidate graphs served by the substitution collaborator.
    SubstitutionsUsed,
    /// Candidate graphs produced by the graph builder.
    GraphsBuilt,
}

impl Counter {
    pub const COUNT: usize = 12;

    pub const ALL: [Counter; Self::COUNT] = [
        Counter::SitesExamined,
        Counter::Inlined,
        Counter::InlinedPolymorphic,
        Counter::Rejected,
        Counter::CutOffByMaxDesiredSize,
        Counter::RejectedPreviouslyCompiledTooLarge,
        Counter::RejectedByDepth,
        Counter::RejectedByRecursion,
        Counter::RejectedNeverInline,
        Counter::CandidatesSpecialized,
        Counter::SubstitutionsUsed,
        Counter::GraphsBuilt,
    ];

    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }

    pub const fn name(self) -> &'static str {
        match self {
            Counter::SitesExamined => "sites_examined",
            Counter::Inlined => "inlined",
            Counter::InlinedPolymorphic => "inlined_polymorphic",
            Counter::Rejected => "rejected",
            Counter::CutOffByMaxDesiredSize => "cut_off_by_max_desired_size",
            Counter::RejectedPreviouslyCompiledTooLarge => {
                "rejected_previously_compiled_too_large"
            }
            Counter::RejectedByDepth => "rejected_by_depth",
            Counter::RejectedByRecursion => "rejected_by_recursion",
            Counter::RejectedNeverInline => "rejected_never_inline",
            Counter::CandidatesSpecialized => "candidates_specialized",
            Counter::SubstitutionsUsed => "substitutions_used",
            Counter::GraphsBuilt => "graphs_built",
        }
    }
}

impl fmt::Display for Counter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// Sinks
// =============================================================================

/// Receiver of inlining counter events.
pub trait TelemetrySink: Send + Sync {
    fn increment(&self, counter: Counter);

    /// A call site inside `caller` was inlined. Default: nothing.
    fn record_inlined(&self, _caller: MethodId) {}
}

/// Sink that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl TelemetrySink for NullSink {
    #[inline]
    fn increment(&self, _counter: Counter) {}
}

/// In-memory counters, safe to share between compiler threads.
#[derive(Debug, Default)]
pub struct InlineCounters {
    counts: [AtomicU64; Counter::COUNT],
    per_method: DashMap<MethodId, u64>,
}

impl InlineCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, counter: Counter) -> u64 {
        self.counts[counter.index()].load(Ordering::Relaxed)
    }

    /// Call sites inlined into code of `method`.
    pub fn inlined_count(&self, method: MethodId) -> u64 {
        self.per_method.get(&method).map_or(0, |c| *c)
    }

    /// Non-zero counters, in declaration order.
    pub fn snapshot(&self) -> Vec<(Counter, u64)> {
        Counter::ALL
            .iter()
            .map(|&c| (c, self.get(c)))
            .filter(|&(_, n)| n > 0)
            .collect()
    }

    pub fn reset(&self) {
        for count in &self.counts {
            count.store(0, Ordering::Relaxed);
        }
        self.per_method.clear();
    }
}

impl TelemetrySink for InlineCounters {
    fn increment(&self, counter: Counter) {
        self.counts[counter.index()].fetch_add(1, Ordering::Relaxed);
    }

    fn record_inlined(&self, caller: MethodId) {
        *self.per_method.entry(caller).or_insert(0) += 1;
    }
}
