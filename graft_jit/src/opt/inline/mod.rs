//! Interprocedural Inlining
//!
//! Replaces call sites with specialized copies of the called method's graph.
//!
//! # Architecture
//!
//! - **Cost Model** (`cost.rs`): size and cycle buckets per node kind
//! - **Candidate Graphs** (`callee.rs`): substitutions, graph building and
//!   the collaborator interfaces
//! - **Specialization** (`specialize.rs`): constant and stamp propagation
//!   from arguments into parameters
//! - **Policy** (`policy.rs`): the accept/reject decision
//! - **Candidates** (`info.rs`): target resolution and per-site candidates
//! - **Duplication** (`clone.rs`) and **Transform** (`transform.rs`): graph
//!   splicing, type switches
//! - **Driver** (`walker.rs`): the worklist walk over one compilation root
//! - **Telemetry** (`telemetry.rs`) and **Profiles** (`profile.rs`)
//!
//! # Inlining Process
//!
//! 1. **Discovery**: call sites of the root in control-flow order
//! 2. **Resolution**: exact target, or a type switch over profiled receivers
//! 3. **Candidate**: obtain, specialize and re-simplify a private graph
//! 4. **Decision**: policy over call-site and candidate statistics
//! 5. **Transformation**: splice, enqueue the invokes brought in
//! 6. **Verification**: size contract of the whole phase
//!
//! Graph growth is bounded by `maximum_desired_size`, nesting by
//! `max_inlining_depth` and recursion by `max_recursive_depth`.

pub mod callee;
pub mod clone;
pub mod cost;
pub mod info;
pub mod policy;
pub mod profile;
pub mod specialize;
pub mod telemetry;
pub mod transform;
pub mod walker;

pub use callee::{
    CalleeGraphProvider, CallSiteKey, GraphBuilderService, InliningContext, MethodFlags,
    MethodInfo, MethodRegistry, MethodResolver, SubstitutionProvider,
};
pub use cost::{graph_cycles, graph_size, node_cycles, node_size, CostTable, CyclesClass, SizeClass};
pub use info::{CandidateState, InlineInfo, Resolution};
pub use policy::{CallSiteStats, CandidateStats, Decision, DecisionRule, InliningPolicy};
pub use profile::{NoProfile, ProfileProvider, StaticProfile, TypeProfile};
pub use specialize::{specialize, ArgumentInfo};
pub use telemetry::{Counter, InlineCounters, NullSink, TelemetrySink};
pub use walker::{InlineSummary, InliningWalker, WalkerState};

use std::fmt;

use crate::error::{InlineError, InlineResult};
use crate::ir::graph::Graph;
use crate::ir::kind::MethodId;
use crate::opt::contract::{PhaseSizeContract, DEFAULT_MIN_CONTRACT_SIZE};
use crate::opt::OptimizationPass;

// =============================================================================
// Configuration
// =============================================================================

/// Prefix of the environment variables read by [`InliningOptions::from_env`].
pub const ENV_PREFIX: &str = "GRAFT_";

/// Parsing and printing of one option value.
trait OptionValue: Sized + fmt::Display {
    fn parse_option(name: &str, raw: &str) -> InlineResult<Self>;
}

fn invalid(name: &str, raw: &str) -> InlineError {
    InlineError::InvalidOption {
        name: name.to_string(),
        value: raw.to_string(),
    }
}

impl OptionValue for bool {
    fn parse_option(name: &str, raw: &str) -> InlineResult<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "on" | "yes" => Ok(true),
            "0" | "false" | "off" | "no" => Ok(false),
            _ => Err(invalid(name, raw)),
        }
    }
}

impl OptionValue for f64 {
    fn parse_option(name: &str, raw: &str) -> InlineResult<Self> {
        match raw.trim().parse::<f64>() {
            Ok(v) if v.is_finite() && v >= 0.0 => Ok(v),
            _ => Err(invalid(name, raw)),
        }
    }
}

macro_rules! integer_option {
    ($($ty:ty),*) => {
        $(
            impl OptionValue for $ty {
                fn parse_option(name: &str, raw: &str) -> InlineResult<Self> {
                    raw.trim().parse::<$ty>().map_err(|_| invalid(name, raw))
                }
            }
        )*
    };
}

integer_option!(u32, usize, i64);

/// Declares the option struct together with its by-name accessors.
macro_rules! inlining_options {
    ($(
        $(#[$doc:meta])*
        $field:ident: $ty:ty = $default:expr,
    )*) => {
        /// Thresholds and switches of the inliner.
        #[derive(Debug, Clone, PartialEq)]
        pub struct InliningOptions {
            $(
                $(#[$doc])*
                pub $field: $ty,
            )*
        }

        impl Default for InliningOptions {
            fn default() -> Self {
                Self {
                    $($field: $default,)*
                }
            }
        }

        impl InliningOptions {
            /// Names accepted by [`set`](Self::set) and [`get`](Self::get).
            pub const NAMES: &'static [&'static str] = &[$(stringify!($field)),*];

            /// Set option `name` from its textual value.
            pub fn set(&mut self, name: &str, value: &str) -> InlineResult<()> {
                match name {
                    $(stringify!($field) => {
                        self.$field = <$ty as OptionValue>::parse_option(name, value)?;
                        Ok(())
                    })*
                    _ => Err(InlineError::UnknownOption(name.to_string())),
                }
            }

            /// Current value of option `name`, formatted.
            pub fn get(&self, name: &str) -> InlineResult<String> {
                match name {
                    $(stringify!($field) => Ok(self.$field.to_string()),)*
                    _ => Err(InlineError::UnknownOption(name.to_string())),
                }
            }
        }
    };
}

inlining_options! {
    /// Accept every call site that can be resolved and built.
    inline_everything: bool = false,
    /// Value-number freshly built candidate graphs.
    enable_global_value_numbering: bool = false,
    /// Format decision rationales.
    tracing_enabled: bool = false,
    /// Let substitutions and intrinsics replace call targets.
    intrinsify: bool = true,
    /// Inline virtual calls through a type switch over profiled receivers.
    inline_polymorphic: bool = true,
    /// Also when some receivers were not recorded; a virtual call remains
    /// for them.
    inline_megamorphic: bool = true,
    /// Candidates below this many nodes are always taken.
    trivial_size_threshold: f64 = 10.0,
    /// Node ceiling of a call site with relevance 1.
    max_inlining_size: f64 = 300.0,
    /// Reject candidates whose own calls run more often than this per entry.
    max_invoke_probability: f64 = 5.0,
    /// Reject callees whose earlier machine code was larger than this.
    small_graph_size_threshold: u32 = 300,
    max_inlining_depth: usize = 9,
    /// Occurrences of one method allowed in a call chain.
    max_recursive_depth: usize = 1,
    /// Stop inlining once the caller graph reaches this size.
    maximum_desired_size: i64 = 20_000,
    relevance_cap: f64 = 1.0,
    substitution_bonus: f64 = 9.0,
    /// Added to the bonus per constant argument.
    constant_argument_bonus: f64 = 0.5,
    /// Growth allowed for the inlining phase as a whole.
    inlining_growth_factor: f64 = 2.0,
    /// Graphs at or below this size skip the growth check.
    contract_min_size: i64 = DEFAULT_MIN_CONTRACT_SIZE,
    /// Targets a type switch may dispatch to.
    max_type_switch_targets: usize = 3,
}

impl InliningOptions {
    /// Create a conservative inlining configuration for faster compilation.
    pub fn conservative() -> Self {
        Self {
            inline_megamorphic: false,
            trivial_size_threshold: 6.0,
            max_inlining_size: 100.0,
            max_inlining_depth: 3,
            maximum_desired_size: 5_000,
            max_type_switch_targets: 2,
            inlining_growth_factor: 1.5,
            ..Default::default()
        }
    }

    /// Create an aggressive inlining configuration for maximum optimization.
    pub fn aggressive() -> Self {
        Self {
            trivial_size_threshold: 20.0,
            max_inlining_size: 1_000.0,
            max_invoke_probability: 10.0,
            max_inlining_depth: 15,
            max_recursive_depth: 2,
            maximum_desired_size: 50_000,
            relevance_cap: 2.0,
            inlining_growth_factor: 5.0,
            max_type_switch_targets: 8,
            ..Default::default()
        }
    }

    /// Defaults overridden by `GRAFT_<NAME>` environment variables, `NAME`
    /// being the upper-cased option name.
    pub fn from_env() -> InlineResult<Self> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Defaults overridden by `lookup`, queried with the variable names
    /// [`from_env`](Self::from_env) reads.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> InlineResult<Self> {
        let mut options = Self::default();
        for name in Self::NAMES {
            let var = format!("{ENV_PREFIX}{}", name.to_ascii_uppercase());
            if let Some(value) = lookup(&var) {
                options.set(name, &value)?;
            }
        }
        Ok(options)
    }
}

// =============================================================================
// Inlining Statistics
// =============================================================================

/// Statistics from one inlining run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InlineStats {
    /// Number of live call sites visited.
    pub sites_examined: usize,
    /// Number of candidates spliced; a type switch counts once per arm.
    pub sites_inlined: usize,
    pub polymorphic_inlines: usize,
    pub candidates_specialized: usize,
    /// Live nodes added by splicing.
    pub nodes_added: usize,
    /// Graph size (cost model) before the walk.
    pub initial_size: i64,
    pub final_size: i64,
    pub rejected_policy: usize,
    pub rejected_depth: usize,
    pub rejected_recursive: usize,
    pub rejected_never_inline: usize,
    pub rejected_unresolved: usize,
    pub rejected_missing_body: usize,
    /// The size budget stopped the walk.
    pub cut_off: bool,
}

// =============================================================================
// Inlining Pass
// =============================================================================

/// Inlining as a pipeline pass over the graph of `root`.
pub struct InliningPhase {
    context: InliningContext,
    options: InliningOptions,
    root: MethodId,
    last: Option<InlineSummary>,
}

impl InliningPhase {
    pub fn new(context: InliningContext, options: InliningOptions, root: MethodId) -> Self {
        Self {
            context,
            options,
            root,
            last: None,
        }
    }

    pub fn options(&self) -> &InliningOptions {
        &self.options
    }

    /// Summary of the last successful run.
    pub fn last_summary(&self) -> Option<&InlineSummary> {
        self.last.as_ref()
    }

    /// Inline into `graph` and return the summary.
    pub fn inline(&mut self, graph: &mut Graph) -> InlineResult<InlineSummary> {
        let summary = InliningWalker::new(&self.context, &self.options, self.root).run(graph)?;
        self.last = Some(summary.clone());
        Ok(summary)
    }
}

impl PhaseSizeContract for InliningPhase {
    fn contract_owner(&self) -> &str {
        "inlining"
    }

    fn growth_factor(&self) -> f64 {
        self.options.inlining_growth_factor
    }
}

impl OptimizationPass for InliningPhase {
    fn name(&self) -> &'static str {
        "inline"
    }

    fn run(&mut self, graph: &mut Graph) -> InlineResult<bool> {
        let summary = self.inline(graph)?;
        Ok(summary.stats.sites_inlined > 0)
    }
}
