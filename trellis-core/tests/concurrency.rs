//! Concurrency Tests
//!
//! Parallel pulls share in-flight computations, and edits never interleave
//! with evaluation.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use trellis_core::{
    CacheConfig, ComputeCache, Context, Dependencies, FnNode, Graph, NodeType, PlugId, Value, ValueType,
};

fn slow_square(calls: Arc<AtomicUsize>) -> Arc<dyn NodeType> {
    FnNode::new("SlowSquare")
        .input("in", ValueType::Float)
        .output("out", ValueType::Float, Dependencies::on(["in"]), move |i| {
            calls.fetch_add(1, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(20));
            let x = i.float("in")?;
            Ok(Value::Float(x * x))
        })
        .build()
}

fn graph() -> Graph {
    Graph::with_cache(Arc::new(ComputeCache::new(CacheConfig { capacity: 1024 })))
}

#[test]
fn concurrent_pulls_compute_at_most_once() {
    let calls = Arc::new(AtomicUsize::new(0));
    let graph = graph();
    let node = graph.add_node("sq", slow_square(calls.clone())).unwrap();
    graph.set_value(graph.plug(node, "in").unwrap(), 3.0).unwrap();
    let out = graph.plug(node, "out").unwrap();
    let ctx = Context::new();
    let barrier = Barrier::new(8);

    thread::scope(|s| {
        for _ in 0..8 {
            s.spawn(|| {
                barrier.wait();
                assert_eq!(graph.get_value(out, &ctx).unwrap(), Value::Float(9.0));
            });
        }
    });

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let stats = graph.cache().stats();
    assert_eq!(stats.computes, 1);
}

#[test]
fn identical_nodes_share_in_flight_work() {
    let calls = Arc::new(AtomicUsize::new(0));
    let graph = graph();
    let outs: Vec<PlugId> = (0..6)
        .map(|n| {
            let node = graph.add_node(format!("sq{n}"), slow_square(calls.clone())).unwrap();
            graph.set_value(graph.plug(node, "in").unwrap(), 2.0).unwrap();
            graph.plug(node, "out").unwrap()
        })
        .collect();

    let results = graph.evaluate_many(&outs, &Context::new());
    assert_eq!(results.len(), 6);
    for result in results {
        assert_eq!(result.unwrap(), Value::Float(4.0));
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn evaluate_many_keeps_request_order_and_errors() {
    let graph = graph();
    let calls = Arc::new(AtomicUsize::new(0));
    let broken = FnNode::new("Broken")
        .output("out", ValueType::Float, Dependencies::none(), |_| {
            Err(trellis_core::GraphError::custom("broken"))
        })
        .build();

    let mut plugs = Vec::new();
    for n in 0..4 {
        let node = graph.add_node(format!("sq{n}"), slow_square(calls.clone())).unwrap();
        graph.set_value(graph.plug(node, "in").unwrap(), n as f64).unwrap();
        plugs.push(graph.plug(node, "out").unwrap());
    }
    let bad = graph.add_node("bad", broken).unwrap();
    plugs.insert(2, graph.plug(bad, "out").unwrap());

    let results = graph.evaluate_many(&plugs, &Context::new());
    assert_eq!(results[0].as_ref().unwrap(), &Value::Float(0.0));
    assert_eq!(results[1].as_ref().unwrap(), &Value::Float(1.0));
    assert!(results[2].as_ref().unwrap_err().is_compute());
    assert_eq!(results[3].as_ref().unwrap(), &Value::Float(4.0));
    assert_eq!(results[4].as_ref().unwrap(), &Value::Float(9.0));
}

#[test]
fn edits_and_pulls_interleave_safely() {
    let calls = Arc::new(AtomicUsize::new(0));
    let graph = graph();
    let node = graph.add_node("sq", slow_square(calls.clone())).unwrap();
    let input = graph.plug(node, "in").unwrap();
    let out = graph.plug(node, "out").unwrap();

    thread::scope(|s| {
        s.spawn(|| {
            for n in 0..10 {
                graph.set_value(input, n as f64).unwrap();
            }
        });
        for _ in 0..3 {
            s.spawn(|| {
                let ctx = Context::new();
                for _ in 0..5 {
                    let value = graph.get_value(out, &ctx).unwrap();
                    let x = value.as_float().unwrap();
                    // Any value seen must be the square of some written input.
                    assert!((0..10).any(|n| (n * n) as f64 == x));
                }
            });
        }
    });

    graph.set_value(input, 9.0).unwrap();
    assert_eq!(graph.get_value(out, &Context::new()).unwrap(), Value::Float(81.0));
}
