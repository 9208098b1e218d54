use openexec::{TraceContext, TraceEventKind, TraceLevel};

use crate::common;

#[test]
fn traced_run_collects_engine_and_device_events() {
    let registry = common::diamond_registry(None).expect("registry");
    let executor = common::cpu_executor(registry).expect("executor");
    let dag = common::diamond_dag().expect("dag");

    let mut ctx = common::caller_context(&[("x", vec![1.0])], &["out"]);
    ctx.set_trace(TraceContext::new(TraceLevel::Full, 7));

    let (cb, rx) = common::result_channel();
    executor.run(Some(&dag), ctx, 51, cb);

    let (_, result, ctx) = common::recv_outcome(&rx);
    assert!(result.is_ok(), "run failed: {:?}", result.err());

    let trace = ctx.trace().expect("result context keeps its trace");
    let labels: Vec<&str> = trace.events().iter().map(|event| event.label.as_str()).collect();

    assert!(labels.contains(&"run_prepare"));
    assert!(labels.contains(&"propagate_inputs"));
    assert!(labels.contains(&"propagate_outputs"));
    for node in ["a", "b", "c"] {
        assert!(labels.contains(&format!("enqueue:{node}").as_str()));
        assert!(labels.contains(&format!("defer_result:{node}").as_str()));
        assert!(labels.contains(&format!("handle_result:{node}").as_str()));
        assert!(labels.contains(&format!("device:{node}").as_str()));
    }

    // Begin/end events stay paired per label.
    for label in labels.iter() {
        let begins = trace
            .events()
            .iter()
            .filter(|e| e.label == **label && e.kind == TraceEventKind::Begin)
            .count();
        let ends = trace
            .events()
            .iter()
            .filter(|e| e.label == **label && e.kind == TraceEventKind::End)
            .count();
        assert_eq!(begins, ends, "unbalanced trace block {label}");
    }

    // Device work is tagged with the device id; deferred handling is retagged
    // with the run's own trace thread.
    let device_event = trace
        .events()
        .iter()
        .find(|e| e.label == "device:a")
        .expect("device event present");
    assert_eq!(device_event.thread, 0);
    let handle_event = trace
        .events()
        .iter()
        .find(|e| e.label == "handle_result:a")
        .expect("handle event present");
    assert_eq!(handle_event.thread, 7);

    assert_eq!(trace.thread_name(0), Some("cpu0"));
    let json = trace.to_json().expect("trace serializes");
    assert!(json.contains("enqueue:a"));
    assert!(json.contains("cpu0"));
}

#[test]
fn untraced_run_stays_untraced() {
    let registry = common::diamond_registry(None).expect("registry");
    let executor = common::cpu_executor(registry).expect("executor");
    let dag = common::diamond_dag().expect("dag");

    let (cb, rx) = common::result_channel();
    executor.run(
        Some(&dag),
        common::caller_context(&[("x", vec![1.0])], &["out"]),
        52,
        cb,
    );

    let (_, result, ctx) = common::recv_outcome(&rx);
    assert!(result.is_ok());
    assert!(ctx.trace().is_none());
}
