//! Graph optimization passes.
//!
//! Every pass implements [`OptimizationPass`], which carries a
//! [`PhaseSizeContract`]: the pipeline measures the graph before and after
//! each pass and rejects growth beyond the declared factor.
//!
//! - [`canonicalize`]: constant folding, identities, branch folding
//! - [`gvn`]: global value numbering of pure floating nodes
//! - [`inline`]: interprocedural inlining
//! - [`pipeline`]: phase ordering, fixed-point iteration, statistics

pub mod canonicalize;
pub mod contract;
pub mod gvn;
pub mod inline;
pub mod pipeline;

pub use contract::{ContractVerifier, PhaseSizeContract, SizeContract};
pub use pipeline::{PassPhase, PhasePipeline, PipelineConfig, PipelineStats};

use crate::error::InlineResult;
use crate::ir::graph::Graph;

/// A transformation over a whole graph.
pub trait OptimizationPass: PhaseSizeContract {
    /// Short name used in statistics and logs.
    fn name(&self) -> &'static str;

    /// Run the pass. Returns whether the graph changed.
    fn run(&mut self, graph: &mut Graph) -> InlineResult<bool>;
}
