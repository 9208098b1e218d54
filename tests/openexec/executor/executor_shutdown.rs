use std::time::Duration;

use openexec::{DType, DagBuilder, FunctionRegistry, RuntimeBundle};

use crate::common;

fn slow_single_node_setup(
    delay: Duration,
) -> (
    std::sync::Arc<openexec::Executor>,
    openexec::Dag,
) {
    let mut registry = FunctionRegistry::new();
    registry
        .register("slow", common::slow_copy_function("x", "out", delay))
        .expect("register");
    let executor = common::cpu_executor(registry).expect("executor");

    let mut builder = DagBuilder::new();
    builder
        .add_node(
            "slow",
            RuntimeBundle::new()
                .with_placeholder("x", DType::F32)
                .with_placeholder("out", DType::F32),
            &[0],
        )
        .expect("node");
    builder.add_entry("slow").expect("entry");
    (executor, builder.build().expect("dag"))
}

#[test]
fn shutdown_waits_for_outstanding_runs() {
    let (executor, dag) = slow_single_node_setup(Duration::from_millis(200));

    let (cb, rx) = common::result_channel();
    executor.run(
        Some(&dag),
        common::caller_context(&[("x", vec![8.0])], &["out"]),
        41,
        cb,
    );
    assert!(
        rx.try_recv().is_err(),
        "run should still be inflight when shutdown starts"
    );

    executor.shutdown();

    // The terminal callback runs before the barrier releases shutdown, so
    // the outcome must already be queued.
    let (run_id, result, ctx) = rx.try_recv().expect("callback delivered before shutdown returned");
    assert_eq!(run_id, 41);
    assert!(result.is_ok(), "run failed: {:?}", result.err());
    assert_eq!(common::expect_f32(&ctx, "out"), vec![8.0]);
    assert_eq!(executor.inflight_count(), 0);
    assert_eq!(executor.active_runs(), 0);
}

#[test]
fn shutdown_is_idempotent() {
    let (executor, dag) = slow_single_node_setup(Duration::from_millis(50));

    let (cb, rx) = common::result_channel();
    executor.run(
        Some(&dag),
        common::caller_context(&[("x", vec![1.0])], &["out"]),
        42,
        cb,
    );

    executor.shutdown();
    executor.shutdown();
    assert_eq!(executor.inflight_count(), 0);

    let (_, result, _ctx) = common::recv_outcome(&rx);
    assert!(result.is_ok());

    executor.shutdown();
}
