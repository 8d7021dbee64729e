//! Property-based tests for the cost model, simplification and
//! specialization.
//!
//! Graphs are generated as straight-line integer arithmetic over two
//! parameters, optionally joined through a diamond with a phi, so every
//! generated graph is well formed.

#![allow(clippy::unwrap_used, reason = "Tests can panic")]

use graft_jit::ir::builder::GraphBuilder;
use graft_jit::ir::graph::Graph;
use graft_jit::ir::kind::{ArithOp, CmpOp, ConstValue};
use graft_jit::ir::node::NodeId;
use graft_jit::ir::stamp::Stamp;
use graft_jit::opt::canonicalize::{Canonicalizer, Simplifier};
use graft_jit::opt::inline::policy::{CallSiteStats, CandidateStats, InliningPolicy};
use graft_jit::opt::inline::specialize::{specialize, ArgumentInfo};
use graft_jit::opt::inline::telemetry::NullSink;
use graft_jit::opt::inline::{graph_cycles, graph_size, InliningOptions};
use proptest::prelude::*;
use proptest::sample::Index;

// -- Graph Generation Strategies --

#[derive(Clone, Debug)]
enum Step {
    Const(i64),
    Arith(ArithOp, Index, Index),
    Compare(CmpOp, Index, Index),
}

fn step_strategy() -> impl Strategy<Value = Step> {
    let arith = prop_oneof![
        Just(ArithOp::Add),
        Just(ArithOp::Sub),
        Just(ArithOp::Mul),
        Just(ArithOp::And),
        Just(ArithOp::Xor),
    ];
    let cmp = prop_oneof![Just(CmpOp::Lt), Just(CmpOp::Eq), Just(CmpOp::Ge)];
    prop_oneof![
        (-8i64..8).prop_map(Step::Const),
        (arith, any::<Index>(), any::<Index>()).prop_map(|(op, a, b)| Step::Arith(op, a, b)),
        (cmp, any::<Index>(), any::<Index>()).prop_map(|(op, a, b)| Step::Compare(op, a, b)),
    ]
}

#[derive(Clone, Debug)]
struct Program {
    steps: Vec<Step>,
    diamond: bool,
    branch_probability: f64,
}

fn program_strategy() -> impl Strategy<Value = Program> {
    (
        prop::collection::vec(step_strategy(), 0..24),
        any::<bool>(),
        0.0f64..=1.0,
    )
        .prop_map(|(steps, diamond, branch_probability)| Program {
            steps,
            diamond,
            branch_probability,
        })
}

fn build(program: &Program) -> Graph {
    let mut b = GraphBuilder::new();
    let p0 = b.parameter(0, Stamp::INT);
    let p1 = b.parameter(1, Stamp::INT);
    let mut values: Vec<NodeId> = vec![p0, p1];
    for step in &program.steps {
        let value = match step {
            Step::Const(c) => b.const_int(*c),
            Step::Arith(op, x, y) => {
                let (x, y) = (*x.get(&values), *y.get(&values));
                b.arith(*op, x, y)
            }
            Step::Compare(op, x, y) => {
                let (x, y) = (*x.get(&values), *y.get(&values));
                b.compare(*op, x, y)
            }
        };
        values.push(value);
    }
    let last = values[values.len() - 1];

    if program.diamond {
        let cond = b.compare(CmpOp::Lt, p0, p1);
        let (t, f) = b.branch(cond, program.branch_probability);
        b.switch_to(t);
        let e1 = b.end();
        b.switch_to(f);
        let e2 = b.end();
        let merge = b.merge(&[e1, e2]);
        let phi = b.phi(merge, &[last, p0], Stamp::INT);
        b.return_value(Some(phi));
    } else {
        b.return_value(Some(last));
    }
    b.finish()
}

// -- Properties --

proptest! {
    #[test]
    fn size_and_cycles_are_non_negative_and_finite(program in program_strategy()) {
        let graph = build(&program);
        prop_assert!(graph_size(&graph) >= 0);
        for full in [true, false] {
            let cycles = graph_cycles(&graph, full);
            prop_assert!(cycles.is_finite());
            prop_assert!(cycles >= 0.0);
        }
    }

    #[test]
    fn simplification_never_grows_the_graph(program in program_strategy()) {
        let mut graph = build(&program);
        let before = graph_size(&graph);
        Simplifier::new().apply(&mut graph);
        prop_assert!(graph_size(&graph) <= before);
        prop_assert!(graph.verify().is_ok());
    }

    #[test]
    fn incremental_simplification_is_idempotent(program in program_strategy()) {
        let simplifier = Simplifier::new();
        let mut graph = build(&program);
        let seeds: Vec<NodeId> = graph.live_nodes().collect();
        simplifier.apply_incremental(&mut graph, &seeds);
        let settled = graph.clone();

        let seeds: Vec<NodeId> = graph.live_nodes().collect();
        prop_assert!(!simplifier.apply_incremental(&mut graph, &seeds));
        prop_assert_eq!(graph, settled);
    }

    #[test]
    fn specialization_is_deterministic(
        program in program_strategy(),
        c0 in proptest::option::of(-4i64..4),
        lo in -10i64..0,
        hi in 0i64..10,
    ) {
        let graph = build(&program);
        let args = [
            c0.map_or(ArgumentInfo::with_stamp(Stamp::INT), |c| ArgumentInfo::constant(ConstValue::Int(c))),
            ArgumentInfo::with_stamp(Stamp::int_range(lo, hi)),
        ];
        let mut a = graph.clone();
        let mut b = graph;
        let ra = specialize(&mut a, &args);
        let rb = specialize(&mut b, &args);
        prop_assert_eq!(&ra, &rb);
        prop_assert_eq!(&a, &b);
        if let Some(affected) = ra {
            prop_assert!(affected.windows(2).all(|w| w[0] < w[1]));
            prop_assert!(a.verify().is_ok());
        }
    }

    #[test]
    fn policy_is_deterministic(
        relevance in 0.0f64..4.0,
        constant_args in 0usize..4,
        node_count in 0usize..2000,
        compiled in proptest::option::of(0u32..2000),
        density in 0.0f64..10.0,
        substitution in any::<bool>(),
        fully_processed in any::<bool>(),
    ) {
        let options = InliningOptions { tracing_enabled: true, ..InliningOptions::default() };
        let policy = InliningPolicy::new(&options, &NullSink);
        let site = CallSiteStats { relevance, constant_args };
        let candidate = CandidateStats {
            node_count,
            compiled_code_size: compiled,
            invoke_density: density,
            substitution,
            ..CandidateStats::default()
        };
        let first = policy.decide(&site, &candidate, 0, fully_processed);
        let second = policy.decide(&site, &candidate, 0, fully_processed);
        prop_assert_eq!(first, second);
    }
}
