use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::context::ExecutionContext;
use crate::device::DeviceManager;
use crate::error::RuntimeError;
use crate::graph::{Dag, Node};
use crate::runtime::barrier::InflightBarrier;
use crate::runtime::state::RunState;
use crate::types::{DeviceId, ResultCallback, RunId, RunResult};

/// Drives partitioned DAG runs to completion across a pool of device
/// managers.
///
/// Each accepted run gets a [`RunState`] pinned in the registry until its
/// terminal callback has returned. Completion work is bounced off the device
/// threads onto the executor's own worker pool, and a global inflight
/// barrier lets [`Executor::shutdown`] wait until every outstanding node
/// execution has fully unwound.
pub struct Executor {
    devices: HashMap<DeviceId, Arc<dyn DeviceManager>>,
    pool: ThreadPool,
    runs: Mutex<HashMap<RunId, Arc<RunState>>>,
    inflight: InflightBarrier,
    shutting_down: AtomicBool,
}

impl Executor {
    /// Build an executor over `devices` with one worker per available core.
    pub fn new(devices: HashMap<DeviceId, Arc<dyn DeviceManager>>) -> Result<Self> {
        Self::with_workers(devices, 0)
    }

    /// Build an executor with an explicit worker count (0 = one per core).
    pub fn with_workers(
        devices: HashMap<DeviceId, Arc<dyn DeviceManager>>,
        workers: usize,
    ) -> Result<Self> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|index| format!("openexec-worker-{index}"))
            .build()
            .map_err(|err| anyhow!("failed to build executor threadpool: {}", err))?;
        Ok(Self {
            devices,
            pool,
            runs: Mutex::new(HashMap::new()),
            inflight: InflightBarrier::new(),
            shutting_down: AtomicBool::new(false),
        })
    }

    /// Number of runs currently pinned in the registry.
    pub fn active_runs(&self) -> usize {
        self.runs.lock().expect("run registry mutex poisoned").len()
    }

    /// Snapshot of the global inflight barrier count.
    pub fn inflight_count(&self) -> usize {
        self.inflight.count()
    }

    /// Submit a run. The callback fires exactly once per call: immediately
    /// with `RequestRefused` when the executor is shutting down or `run_id`
    /// is already active, immediately with success for an empty graph, and
    /// otherwise from a worker thread once every reachable node has been
    /// handled.
    pub fn run(
        self: &Arc<Self>,
        dag: Option<&Dag>,
        mut ctx: Box<ExecutionContext>,
        run_id: RunId,
        cb: ResultCallback,
    ) {
        if let Some(trace) = ctx.trace_mut() {
            trace.begin("run_prepare");
        }

        if self.shutting_down.load(Ordering::Acquire) {
            crate::trace!("run {} refused: executor is shutting down", run_id);
            if let Some(trace) = ctx.trace_mut() {
                trace.end("run_prepare");
            }
            cb(
                run_id,
                Err(RuntimeError::RequestRefused(
                    "executor is shutting down".to_string(),
                )),
                ctx,
            );
            return;
        }

        // An absent or empty graph has nothing to schedule; hand the context
        // straight back.
        let root = match dag {
            Some(dag) if !dag.root().children().is_empty() => dag.root(),
            _ => {
                if let Some(trace) = ctx.trace_mut() {
                    trace.end("run_prepare");
                }
                cb(run_id, Ok(()), ctx);
                return;
            }
        };

        if let Some(trace) = ctx.trace_mut() {
            trace.end("run_prepare");
        }

        let mut runs = self.runs.lock().expect("run registry mutex poisoned");
        if runs.contains_key(&run_id) {
            drop(runs);
            crate::warning!("run {} refused: id already active", run_id);
            cb(
                run_id,
                Err(RuntimeError::RequestRefused(format!(
                    "run {} is already active",
                    run_id
                ))),
                ctx,
            );
            return;
        }
        let state = Arc::new(RunState::new(run_id, root, ctx, cb));
        runs.insert(run_id, Arc::clone(&state));
        drop(runs);

        let children = root.children();
        crate::trace!(
            "run {} accepted: {} entry nodes, {} interned placeholders",
            run_id,
            children.len(),
            state.interned_placeholders()
        );

        // Count every entry node as inflight before dispatching any of them,
        // so the terminal transition cannot fire mid-dispatch.
        state.add_inflight(children.len());
        self.inflight.increment(children.len());

        for child in children {
            state.propagate_inputs_from_result(child);
            self.execute_dag_node(&state, child);
        }
    }

    /// Dispatch one ready node to its device manager. On a prior run error
    /// or an unknown device the dispatch is retired without running, which
    /// may carry the run's terminal transition.
    fn execute_dag_node(self: &Arc<Self>, state: &Arc<RunState>, node: &Arc<Node>) {
        if state.error().has_error() {
            self.retire_undispatched(state);
            return;
        }

        let device = node.next_device();
        let Some(manager) = self.devices.get(&device) else {
            crate::error!(
                "run {}: node {} selected unknown device {}",
                state.run_id(),
                node.name(),
                device
            );
            state
                .error()
                .record(RuntimeError::DeviceNotFound(device));
            self.retire_undispatched(state);
            return;
        };

        if state.trace_enabled() {
            state.set_device_thread_name(device, manager.device_config().name());
        }

        let mut node_ctx = state
            .take_node_ctx(node)
            .expect("input context already taken for node");

        let mut initial_thread = 0;
        if let Some(trace) = node_ctx.trace_mut() {
            trace.begin(format!("enqueue:{}", node.name()));
            trace.end(format!("enqueue:{}", node.name()));
            initial_thread = trace.thread();
            trace.set_thread(device);
        }

        crate::trace!(
            "run {}: dispatching node {} on device {}",
            state.run_id(),
            node.describe(),
            device
        );

        let function = node.name().to_string();
        let executor = Arc::clone(self);
        let state = Arc::clone(state);
        let node = Arc::clone(node);
        manager.run_function(
            &function,
            node_ctx,
            Box::new(move |_device_run, result, mut ctx| {
                if let Some(trace) = ctx.trace_mut() {
                    trace.set_thread(initial_thread);
                    trace.begin(format!("defer_result:{}", node.name()));
                }
                // Hand the result straight to the worker pool so the device
                // thread is never blocked on bindings or dispatch work.
                let handler = Arc::clone(&executor);
                executor.pool.spawn(move || {
                    if let Some(trace) = ctx.trace_mut() {
                        trace.end(format!("defer_result:{}", node.name()));
                    }
                    handler.handle_device_manager_result(&state, result, ctx, &node);
                });
            }),
        );
    }

    /// Process one device completion on a worker thread: record the error
    /// (first wins), propagate outputs onward, dispatch children that became
    /// ready, and retire the node. May carry the run's terminal transition.
    fn handle_device_manager_result(
        self: &Arc<Self>,
        state: &Arc<RunState>,
        result: RunResult,
        mut ctx: Box<ExecutionContext>,
        node: &Arc<Node>,
    ) {
        if let Some(trace) = ctx.trace_mut() {
            trace.begin(format!("handle_result:{}", node.name()));
        }

        let success = result.is_ok();
        if let Err(err) = result {
            crate::warning!(
                "run {}: node {} failed: {}",
                state.run_id(),
                node.name(),
                err
            );
            state.error().record(err);
        }

        if success {
            if node.children().is_empty() {
                let bindings = std::mem::take(ctx.bindings_mut());
                state.propagate_outputs(bindings);
            } else {
                for child in node.children() {
                    state.propagate_inputs(child, &ctx);
                    if state.mark_parent_done(child) {
                        state.add_inflight(1);
                        self.inflight.increment(1);
                        self.execute_dag_node(state, child);
                    }
                }
            }
        }

        if let Some(trace) = ctx.trace_mut() {
            trace.end(format!("handle_result:{}", node.name()));
            let mut events = trace.take_events();
            state.merge_trace_events(&mut events);
        }

        if state.finish_inflight() {
            self.complete_run(state);
        }
        // Decremented only after the terminal callback has returned, so
        // shutdown cannot tear down executor state the callback still uses.
        self.inflight.decrement(1);
    }

    /// Retire a dispatch that never reached a device manager. The node goes
    /// straight to handled; the terminal transition may fire here.
    fn retire_undispatched(&self, state: &Arc<RunState>) {
        if state.finish_inflight() {
            self.complete_run(state);
        }
        self.inflight.decrement(1);
    }

    /// Invoked by whichever caller observed the inflight counter reach zero:
    /// deliver the one-shot callback, then unpin the run from the registry.
    fn complete_run(&self, state: &Arc<RunState>) {
        let run_id = state.run_id();
        let cb = state.take_callback();
        let error = state.error().take();
        let result_ctx = state.take_result_ctx();
        match &error {
            Some(err) => crate::trace!("run {} complete: {}", run_id, err),
            None => crate::trace!("run {} complete", run_id),
        }
        cb(
            run_id,
            match error {
                Some(err) => Err(err),
                None => Ok(()),
            },
            result_ctx,
        );

        let mut runs = self.runs.lock().expect("run registry mutex poisoned");
        runs.remove(&run_id);
    }

    /// Stop accepting runs and block until every outstanding node-execution
    /// lifecycle has fully unwound. Idempotent.
    pub fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::Release);
        crate::trace!(
            "executor shutting down: {} dispatches inflight",
            self.inflight.count()
        );
        self.inflight.wait();
    }
}

impl Drop for Executor {
    fn drop(&mut self) {
        self.shutdown();
    }
}
