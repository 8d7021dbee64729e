//! Inlining Benchmarks
//!
//! Measures the cost model and the inlining walker on synthetic call trees.
//!
//! # Benchmark Categories
//!
//! 1. **Cost Model**: size and cycle estimates over growing graphs
//! 2. **Walker**: inlining a balanced call tree of increasing depth
//! 3. **Specialization**: pushing constant arguments into a candidate

use std::sync::Arc;

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use graft_jit::ir::builder::GraphBuilder;
use graft_jit::ir::graph::Graph;
use graft_jit::ir::kind::{ArithOp, CmpOp, ConstValue, InvokeKind, InvokeTarget, MethodId};
use graft_jit::ir::stamp::Stamp;
use graft_jit::opt::canonicalize::{Canonicalizer, Simplifier};
use graft_jit::opt::inline::{
    ArgumentInfo, InliningContext, InliningOptions, InliningWalker, MethodInfo, MethodRegistry,
    graph_cycles, graph_size, specialize,
};

// =============================================================================
// Benchmark Helpers
// =============================================================================

/// A chain of `n` arithmetic nodes closed by a diamond.
fn arithmetic_graph(n: usize) -> Graph {
    let mut b = GraphBuilder::new();
    let x = b.parameter(0, Stamp::INT);
    let y = b.parameter(1, Stamp::INT);
    let mut acc = x;
    for i in 0..n {
        let op = if i % 2 == 0 { ArithOp::Add } else { ArithOp::Mul };
        acc = b.arith(op, acc, y);
    }
    let cond = b.compare(CmpOp::Lt, acc, x);
    let (t, f) = b.branch(cond, 0.5);
    b.switch_to(t);
    b.return_value(Some(acc));
    b.switch_to(f);
    b.return_value(Some(y));
    b.finish()
}

/// Heap-numbered call tree: method `m` calls `2m` and `2m + 1` down to
/// `depth` levels; the leaves add a constant.
fn call_tree(depth: u32) -> MethodRegistry {
    let registry = MethodRegistry::new();
    let call = |method: u32| InvokeTarget {
        method: MethodId(method),
        bci: method,
        kind: InvokeKind::Static,
    };
    let first_leaf = 1u32 << depth;
    for m in 1..(first_leaf * 2) {
        let mut b = GraphBuilder::new();
        let x = b.parameter(0, Stamp::INT);
        let body = if m < first_leaf {
            let left = b.invoke(call(m * 2), &[x], Stamp::INT);
            let right = b.invoke(call(m * 2 + 1), &[left], Stamp::INT);
            b.add(left, right)
        } else {
            let c = b.const_int(i64::from(m));
            b.add(x, c)
        };
        b.return_value(Some(body));
        registry.register(MethodInfo::new(MethodId(m), format!("m{m}")), Some(b.finish()));
    }
    registry
}

fn root() -> Graph {
    let mut b = GraphBuilder::new();
    let x = b.parameter(0, Stamp::INT);
    let target = InvokeTarget {
        method: MethodId(1),
        bci: 0,
        kind: InvokeKind::Static,
    };
    let r = b.invoke(target, &[x], Stamp::INT);
    b.return_value(Some(r));
    b.finish()
}

// =============================================================================
// Cost Model Benchmarks
// =============================================================================

fn bench_cost_model(c: &mut Criterion) {
    let mut group = c.benchmark_group("cost_model");
    for n in [16usize, 256, 4096] {
        let graph = arithmetic_graph(n);
        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::new("size", n), &graph, |b, g| {
            b.iter(|| black_box(graph_size(g)));
        });
        group.bench_with_input(BenchmarkId::new("cycles_structural", n), &graph, |b, g| {
            b.iter(|| black_box(graph_cycles(g, false)));
        });
        group.bench_with_input(BenchmarkId::new("cycles_full", n), &graph, |b, g| {
            b.iter(|| black_box(graph_cycles(g, true)));
        });
    }
    group.finish();
}

// =============================================================================
// Walker Benchmarks
// =============================================================================

fn bench_walker(c: &mut Criterion) {
    let mut group = c.benchmark_group("walker");
    for depth in [2u32, 4, 6] {
        let ctx = InliningContext::with_registry(Arc::new(call_tree(depth)));
        let options = InliningOptions::aggressive();
        group.bench_with_input(BenchmarkId::new("call_tree", depth), &depth, |b, _| {
            b.iter(|| {
                let mut graph = root();
                let summary = InliningWalker::new(&ctx, &options, MethodId(0)).run(&mut graph);
                black_box((graph, summary.is_ok()))
            });
        });
    }
    group.finish();
}

// =============================================================================
// Specialization Benchmarks
// =============================================================================

fn bench_specialize(c: &mut Criterion) {
    let simplifier = Simplifier::new();
    let args = [
        ArgumentInfo::constant(ConstValue::Int(3)),
        ArgumentInfo::constant(ConstValue::Int(5)),
    ];
    c.bench_function("specialize/constant_args_256", |b| {
        let template = arithmetic_graph(256);
        b.iter(|| {
            let mut graph = template.clone();
            if let Some(affected) = specialize(&mut graph, &args) {
                simplifier.apply_incremental(&mut graph, &affected);
            }
            black_box(graph)
        });
    });
}

criterion_group!(benches, bench_cost_model, bench_walker, bench_specialize);
criterion_main!(benches);
