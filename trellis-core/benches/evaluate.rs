use std::hint::black_box;
use std::sync::Arc;

use criterion::{criterion_group, criterion_main, Criterion};
use trellis_core::{
    CacheConfig, ComputeCache, Context, Dependencies, FnNode, Graph, NodeType, PlugId, Value, ValueType,
};

fn scale() -> Arc<dyn NodeType> {
    FnNode::new("Scale")
        .input("in", ValueType::Float)
        .input_with_default("factor", 1.01)
        .output("out", ValueType::Float, Dependencies::on(["in", "factor"]), |i| {
            Ok(Value::Float(i.float("in")? * i.float("factor")?))
        })
        .build()
}

/// A chain of `len` nodes. Returns the graph, the head input and the tail output.
fn chain(len: usize) -> (Graph, PlugId, PlugId) {
    let graph = Graph::with_cache(Arc::new(ComputeCache::new(CacheConfig::default())));
    let node_type = scale();
    let mut head = None;
    let mut previous: Option<PlugId> = None;
    for n in 0..len {
        let node = graph.add_node(format!("n{n}"), node_type.clone()).unwrap();
        let input = graph.plug(node, "in").unwrap();
        match previous {
            Some(upstream) => graph.connect(upstream, input).unwrap(),
            None => head = Some(input),
        }
        previous = Some(graph.plug(node, "out").unwrap());
    }
    (graph, head.unwrap(), previous.unwrap())
}

// ============================================================================
// Pulls through a chain
// ============================================================================

fn bench_clean_pull(c: &mut Criterion) {
    let (graph, _, tail) = chain(100);
    let ctx = Context::new();
    graph.get_value(tail, &ctx).unwrap();

    c.bench_function("clean_pull_100", |b| {
        b.iter(|| black_box(graph.get_value(tail, &ctx).unwrap()))
    });
}

fn bench_dirty_pull(c: &mut Criterion) {
    let (graph, head, tail) = chain(100);
    let ctx = Context::new();
    let mut n = 0.0;

    c.bench_function("dirty_pull_100", |b| {
        b.iter(|| {
            n += 1.0;
            graph.set_value(head, n).unwrap();
            black_box(graph.get_value(tail, &ctx).unwrap())
        })
    });
}

// ============================================================================
// Dirty propagation alone
// ============================================================================

fn bench_propagation(c: &mut Criterion) {
    let (graph, head, _) = chain(1000);
    let mut n = 0.0;

    c.bench_function("propagate_1000", |b| {
        b.iter(|| {
            n += 1.0;
            graph.set_value(head, n).unwrap();
        })
    });
}

criterion_group!(benches, bench_clean_pull, bench_dirty_pull, bench_propagation);
criterion_main!(benches);
