use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use openexec::{DType, DagBuilder, FunctionRegistry, RuntimeBundle};

use crate::common;

#[test]
fn diamond_converges_and_dispatches_join_once() {
    let c_dispatches = Arc::new(AtomicUsize::new(0));
    let registry = common::diamond_registry(Some(Arc::clone(&c_dispatches))).expect("registry");
    let executor = common::cpu_executor(registry).expect("executor");
    let dag = common::diamond_dag().expect("dag");

    let (cb, rx) = common::result_channel();
    executor.run(
        Some(&dag),
        common::caller_context(&[("x", vec![1.0, 2.0])], &["out"]),
        21,
        cb,
    );

    let (run_id, result, ctx) = common::recv_outcome(&rx);
    assert_eq!(run_id, 21);
    assert!(result.is_ok(), "run failed: {:?}", result.err());
    assert_eq!(common::expect_f32(&ctx, "out"), vec![2.0, 4.0]);
    assert_eq!(c_dispatches.load(Ordering::SeqCst), 1);

    common::assert_no_more_outcomes(&rx);
    executor.shutdown();
    assert_eq!(executor.active_runs(), 0);
    assert_eq!(executor.inflight_count(), 0);
}

#[test]
fn chain_propagates_through_intermediates() {
    let mut registry = FunctionRegistry::new();
    registry.register("first", common::copy_function("x", "t1")).unwrap();
    registry.register("second", common::copy_function("t1", "t2")).unwrap();
    registry.register("third", common::copy_function("t2", "out")).unwrap();
    let executor = common::cpu_executor(registry).expect("executor");

    let mut builder = DagBuilder::new();
    builder
        .add_node(
            "first",
            RuntimeBundle::new()
                .with_placeholder("x", DType::F32)
                .with_placeholder("t1", DType::F32),
            &[0],
        )
        .unwrap();
    builder
        .add_node(
            "second",
            RuntimeBundle::new()
                .with_placeholder("t1", DType::F32)
                .with_placeholder("t2", DType::F32),
            &[0],
        )
        .unwrap();
    builder
        .add_node(
            "third",
            RuntimeBundle::new()
                .with_placeholder("t2", DType::F32)
                .with_placeholder("out", DType::F32),
            &[0],
        )
        .unwrap();
    builder.add_edge("first", "second").unwrap();
    builder.add_edge("second", "third").unwrap();
    builder.add_entry("first").unwrap();
    let dag = builder.build().expect("dag");

    let (cb, rx) = common::result_channel();
    executor.run(
        Some(&dag),
        common::caller_context(&[("x", vec![5.0, 6.0])], &["out"]),
        22,
        cb,
    );

    let (_, result, ctx) = common::recv_outcome(&rx);
    assert!(result.is_ok(), "run failed: {:?}", result.err());
    assert_eq!(common::expect_f32(&ctx, "out"), vec![5.0, 6.0]);
}

#[test]
fn fan_out_clones_tensor_for_each_consumer() {
    let mut registry = FunctionRegistry::new();
    registry.register("producer", common::copy_function("x", "shared")).unwrap();
    registry.register("left", common::copy_function("shared", "out_left")).unwrap();
    registry.register("right", common::copy_function("shared", "out_right")).unwrap();
    let executor = common::cpu_executor(registry).expect("executor");

    let mut builder = DagBuilder::new();
    builder
        .add_node(
            "producer",
            RuntimeBundle::new()
                .with_placeholder("x", DType::F32)
                .with_placeholder("shared", DType::F32),
            &[0],
        )
        .unwrap();
    builder
        .add_node(
            "left",
            RuntimeBundle::new()
                .with_placeholder("shared", DType::F32)
                .with_placeholder("out_left", DType::F32),
            &[0],
        )
        .unwrap();
    builder
        .add_node(
            "right",
            RuntimeBundle::new()
                .with_placeholder("shared", DType::F32)
                .with_placeholder("out_right", DType::F32),
            &[0],
        )
        .unwrap();
    builder.add_edge("producer", "left").unwrap();
    builder.add_edge("producer", "right").unwrap();
    builder.add_entry("producer").unwrap();
    let dag = builder.build().expect("dag");

    let (cb, rx) = common::result_channel();
    executor.run(
        Some(&dag),
        common::caller_context(&[("x", vec![9.0])], &["out_left", "out_right"]),
        23,
        cb,
    );

    let (_, result, ctx) = common::recv_outcome(&rx);
    assert!(result.is_ok(), "run failed: {:?}", result.err());
    assert_eq!(common::expect_f32(&ctx, "out_left"), vec![9.0]);
    assert_eq!(common::expect_f32(&ctx, "out_right"), vec![9.0]);
}

#[test]
fn concurrent_runs_complete_independently() {
    let registry = common::diamond_registry(None).expect("registry");
    let executor = common::cpu_executor(registry).expect("executor");
    let dag = common::diamond_dag().expect("dag");

    let mut receivers = Vec::new();
    for index in 0..8u64 {
        let (cb, rx) = common::result_channel();
        executor.run(
            Some(&dag),
            common::caller_context(&[("x", vec![index as f32])], &["out"]),
            100 + index,
            cb,
        );
        receivers.push((100 + index, rx));
    }

    let mut outputs = HashMap::new();
    for (expected_id, rx) in &receivers {
        let (run_id, result, ctx) = common::recv_outcome(rx);
        assert_eq!(run_id, *expected_id);
        assert!(result.is_ok(), "run {} failed: {:?}", run_id, result.err());
        outputs.insert(run_id, common::expect_f32(&ctx, "out"));
    }

    for index in 0..8u64 {
        assert_eq!(outputs[&(100 + index)], vec![2.0 * index as f32]);
    }

    executor.shutdown();
    assert_eq!(executor.active_runs(), 0);
    assert_eq!(executor.inflight_count(), 0);
}
