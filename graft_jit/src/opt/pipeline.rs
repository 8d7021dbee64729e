//! Optimization Pipeline.
//!
//! Orchestrates optimization passes with phase ordering, fixed-point
//! iteration within a phase, per-pass size contracts and statistics.
//!
//! # Pass Phases
//!
//! 1. **Canonicalization**: folding, identities, dead code
//! 2. **Local**: GVN
//! 3. **Interprocedural**: inlining
//! 4. **Cleanup**: a final canonicalization after inlining
//!
//! Each pass run is bracketed by a size measurement; the
//! [`ContractVerifier`] turns excessive growth into an error that stops the
//! pipeline with the graph in its state after the offending pass.

use std::time::{Duration, Instant};

use tracing::debug;

use super::canonicalize::Simplifier;
use super::contract::ContractVerifier;
use super::gvn::Gvn;
use super::OptimizationPass;
use crate::error::InlineResult;
use crate::ir::graph::Graph;
use crate::ir::kind::MethodId;
use crate::opt::inline::cost::graph_size;

// =============================================================================
// Pass Phase
// =============================================================================

/// Phase of the optimization pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PassPhase {
    /// Early passes: canonicalization, constant folding.
    Canonicalization,
    /// Local optimizations: GVN.
    Local,
    /// Interprocedural: inlining.
    Interprocedural,
    /// Cleanup after inlining.
    Cleanup,
}

impl PassPhase {
    pub const ALL: [PassPhase; 4] = [
        PassPhase::Canonicalization,
        PassPhase::Local,
        PassPhase::Interprocedural,
        PassPhase::Cleanup,
    ];
}

// =============================================================================
// Pass Entry
// =============================================================================

/// A registered pass in the pipeline.
struct PassEntry {
    pass: Box<dyn OptimizationPass>,
    phase: PassPhase,
    enabled: bool,
    runs: usize,
    changes: usize,
    time: Duration,
}

impl PassEntry {
    fn new<P: OptimizationPass + 'static>(pass: P, phase: PassPhase) -> Self {
        Self {
            pass: Box::new(pass),
            phase,
            enabled: true,
            runs: 0,
            changes: 0,
            time: Duration::ZERO,
        }
    }
}

// =============================================================================
// Pipeline Configuration
// =============================================================================

/// Configuration for the optimization pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Maximum iterations per phase.
    pub max_iterations_per_phase: usize,

    /// Enable GVN.
    pub enable_gvn: bool,

    /// Enable simplification.
    pub enable_simplify: bool,

    /// Collect timing statistics.
    pub collect_timing: bool,

    /// Size floor below which pass contracts are not checked.
    pub contract_min_size: i64,

    /// Method being compiled, reported on contract violations.
    pub method: Option<MethodId>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_iterations_per_phase: 5,
            enable_gvn: true,
            enable_simplify: true,
            collect_timing: true,
            contract_min_size: ContractVerifier::default().min_size_floor,
            method: None,
        }
    }
}

impl PipelineConfig {
    /// Create a minimal configuration (fewer passes for faster compile).
    pub fn minimal() -> Self {
        Self {
            max_iterations_per_phase: 2,
            enable_gvn: false,
            collect_timing: false,
            ..Default::default()
        }
    }
}

// =============================================================================
// Phase Pipeline
// =============================================================================

/// Ordered set of passes run over one graph.
pub struct PhasePipeline {
    config: PipelineConfig,
    passes: Vec<PassEntry>,
    verifier: ContractVerifier,
}

impl PhasePipeline {
    /// Create a new pipeline with default configuration.
    pub fn new() -> Self {
        Self::with_config(PipelineConfig::default())
    }

    /// Create a pipeline with custom configuration. Local passes are
    /// registered; interprocedural ones need collaborators and are added
    /// with [`PhasePipeline::register`].
    pub fn with_config(config: PipelineConfig) -> Self {
        let verifier = ContractVerifier::new(config.contract_min_size);
        let mut pipeline = Self {
            config,
            passes: Vec::new(),
            verifier,
        };
        pipeline.register_default_passes();
        pipeline
    }

    fn register_default_passes(&mut self) {
        if self.config.enable_simplify {
            self.register(Simplifier::new(), PassPhase::Canonicalization);
        }
        if self.config.enable_gvn {
            self.register(Gvn::new(), PassPhase::Local);
        }
        if self.config.enable_simplify {
            self.register(Simplifier::new(), PassPhase::Cleanup);
        }
    }

    /// Register a custom pass.
    pub fn register<P: OptimizationPass + 'static>(&mut self, pass: P, phase: PassPhase) {
        self.passes.push(PassEntry::new(pass, phase));
    }

    /// Enable or disable every pass with the given name.
    pub fn set_enabled(&mut self, name: &str, enabled: bool) {
        for entry in &mut self.passes {
            if entry.pass.name() == name {
                entry.enabled = enabled;
            }
        }
    }

    /// Run all phases in order. Stops at the first failing pass.
    pub fn run(&mut self, graph: &mut Graph) -> InlineResult<PipelineStats> {
        let start = Instant::now();
        let mut stats = PipelineStats {
            initial_size: graph_size(graph),
            ..Default::default()
        };

        for phase in PassPhase::ALL {
            stats.total_iterations += self.run_phase(graph, phase)?;
            stats.phases_run += 1;
        }

        stats.total_time = start.elapsed();
        stats.final_size = graph_size(graph);
        Ok(stats)
    }

    /// Run the passes of `phase` until none of them changes the graph.
    /// Returns the number of iterations.
    fn run_phase(&mut self, graph: &mut Graph, phase: PassPhase) -> InlineResult<usize> {
        let mut iterations = 0;
        for _ in 0..self.config.max_iterations_per_phase {
            iterations += 1;
            let mut iter_changed = false;

            for entry in &mut self.passes {
                if entry.phase != phase || !entry.enabled {
                    continue;
                }

                let timer = self.config.collect_timing.then(Instant::now);
                let before = graph_size(graph);
                let changed = entry.pass.run(graph)?;
                let after = graph_size(graph);
                if let Some(timer) = timer {
                    entry.time += timer.elapsed();
                }

                entry.runs += 1;
                if changed {
                    entry.changes += 1;
                    iter_changed = true;
                    debug!(pass = entry.pass.name(), before, after, "pass changed graph");
                }
                self.verifier
                    .check(before, after, entry.pass.as_ref(), self.config.method)?;
            }

            if !iter_changed {
                break;
            }
        }
        Ok(iterations)
    }

    /// Get pass statistics.
    pub fn pass_stats(&self) -> Vec<PassStat> {
        self.passes
            .iter()
            .map(|e| PassStat {
                name: e.pass.name().to_string(),
                phase: e.phase,
                runs: e.runs,
                changes: e.changes,
                time: e.time,
            })
            .collect()
    }
}

impl Default for PhasePipeline {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Statistics from a single pass.
#[derive(Debug, Clone)]
pub struct PassStat {
    pub name: String,
    pub phase: PassPhase,
    /// Number of times run.
    pub runs: usize,
    /// Number of times it made changes.
    pub changes: usize,
    pub time: Duration,
}

/// Statistics from the entire pipeline.
#[derive(Debug, Clone, Default)]
pub struct PipelineStats {
    /// Total iterations across all phases.
    pub total_iterations: usize,
    pub phases_run: usize,
    pub total_time: Duration,
    /// Graph size (cost model) before the first pass.
    pub initial_size: i64,
    pub final_size: i64,
}

impl PipelineStats {
    /// Ratio of final to initial size.
    pub fn size_ratio(&self) -> f64 {
        if self.initial_size == 0 {
            1.0
        } else {
            self.final_size as f64 / self.initial_size as f64
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
