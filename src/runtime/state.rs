use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::context::{ExecutionContext, Placeholder, PlaceholderBindings};
use crate::error::RuntimeError;
use crate::graph::{Node, SymbolCategory};
use crate::runtime::trace::{TraceContext, TraceEvent};
use crate::tensor::{DType, TensorValue};
use crate::types::{DeviceId, ResultCallback, RunId};

/// Single-writer-wins slot for the first failure of a run. Later errors are
/// recorded-but-suppressed; reading is always allowed.
#[derive(Debug, Default)]
pub(crate) struct ErrorSlot {
    occupied: AtomicBool,
    slot: Mutex<Option<RuntimeError>>,
}

impl ErrorSlot {
    pub(crate) fn record(&self, err: RuntimeError) {
        let mut slot = self.slot.lock().expect("error slot mutex poisoned");
        if slot.is_none() {
            *slot = Some(err);
            self.occupied.store(true, Ordering::Release);
        }
    }

    pub(crate) fn has_error(&self) -> bool {
        self.occupied.load(Ordering::Acquire)
    }

    pub(crate) fn take(&self) -> Option<RuntimeError> {
        self.slot.lock().expect("error slot mutex poisoned").take()
    }
}

#[derive(Debug)]
struct NodeProgress {
    parents_done: AtomicUsize,
    parents: usize,
}

/// Both the per-node input contexts and the result context live behind one
/// mutex: writes to any bindings in the run are serialized through it.
#[derive(Debug)]
struct BindingsTable {
    node_inputs: HashMap<String, Option<Box<ExecutionContext>>>,
    result: Option<Box<ExecutionContext>>,
}

/// Per-run bookkeeping shared between the executor, pending child dispatch
/// closures and device-manager completions. The last holder drops it.
pub(crate) struct RunState {
    run_id: RunId,
    callback: Mutex<Option<ResultCallback>>,
    inflight: AtomicUsize,
    progress: HashMap<String, NodeProgress>,
    placeholders: HashMap<String, Arc<Placeholder>>,
    error: ErrorSlot,
    trace_enabled: bool,
    bindings: Mutex<BindingsTable>,
}

impl RunState {
    /// Walk the graph breadth-first from the root's children, preparing a
    /// parents-done counter and an input context per reachable node. Every
    /// placeholder symbol gets a slot backed by an interned intermediate
    /// placeholder; other symbol categories are ignored.
    pub(crate) fn new(
        run_id: RunId,
        root: &Arc<Node>,
        result_ctx: Box<ExecutionContext>,
        callback: ResultCallback,
    ) -> Self {
        let trace_template = result_ctx
            .trace()
            .map(|trace| (trace.level(), trace.thread()));

        let mut progress = HashMap::new();
        let mut placeholders: HashMap<String, Arc<Placeholder>> = HashMap::new();
        let mut node_inputs = HashMap::new();

        let mut queue: VecDeque<Arc<Node>> = root.children().iter().cloned().collect();
        while let Some(node) = queue.pop_front() {
            if progress.contains_key(node.name()) {
                continue;
            }
            progress.insert(
                node.name().to_string(),
                NodeProgress {
                    parents_done: AtomicUsize::new(0),
                    parents: node.parent_count(),
                },
            );

            let mut node_ctx = ExecutionContext::new();
            if let Some((level, thread)) = trace_template {
                node_ctx.set_trace(TraceContext::new(level, thread));
            }
            for (name, info) in node.bundle().symbols() {
                if info.category != SymbolCategory::Placeholder {
                    continue;
                }
                let placeholder = intern_placeholder(&mut placeholders, name, info.dtype);
                node_ctx.bindings_mut().allocate(Arc::clone(placeholder));
            }
            node_inputs.insert(node.name().to_string(), Some(Box::new(node_ctx)));

            for child in node.children() {
                if !progress.contains_key(child.name()) {
                    queue.push_back(Arc::clone(child));
                }
            }
        }

        Self {
            run_id,
            callback: Mutex::new(Some(callback)),
            inflight: AtomicUsize::new(0),
            progress,
            placeholders,
            error: ErrorSlot::default(),
            trace_enabled: trace_template.is_some(),
            bindings: Mutex::new(BindingsTable {
                node_inputs,
                result: Some(result_ctx),
            }),
        }
    }

    pub(crate) fn run_id(&self) -> RunId {
        self.run_id
    }

    pub(crate) fn error(&self) -> &ErrorSlot {
        &self.error
    }

    pub(crate) fn trace_enabled(&self) -> bool {
        self.trace_enabled
    }

    /// Number of intermediate placeholders interned during construction.
    pub(crate) fn interned_placeholders(&self) -> usize {
        self.placeholders.len()
    }

    pub(crate) fn add_inflight(&self, incr: usize) {
        self.inflight.fetch_add(incr, Ordering::AcqRel);
    }

    /// Retire one inflight node. Returns true for exactly the caller whose
    /// decrement brings the counter to zero; that caller owns the terminal
    /// callback.
    pub(crate) fn finish_inflight(&self) -> bool {
        let previous = self.inflight.fetch_sub(1, Ordering::AcqRel);
        assert!(previous > 0, "inflight node counter underflow");
        previous == 1
    }

    /// Record one parent completion for `node`. Returns true for exactly the
    /// caller whose increment reaches the node's parent count; that caller
    /// owns dispatching the node.
    pub(crate) fn mark_parent_done(&self, node: &Node) -> bool {
        let progress = self
            .progress
            .get(node.name())
            .expect("parents-done counter missing for node");
        let done = progress.parents_done.fetch_add(1, Ordering::AcqRel) + 1;
        assert!(
            done <= progress.parents,
            "parents-done counter for {} incremented past {}",
            node.name(),
            progress.parents
        );
        done == progress.parents
    }

    /// Move the node's input context out. Single-shot: later calls for the
    /// same node return `None`.
    pub(crate) fn take_node_ctx(&self, node: &Node) -> Option<Box<ExecutionContext>> {
        let mut table = self.bindings.lock().expect("bindings mutex poisoned");
        table
            .node_inputs
            .get_mut(node.name())
            .expect("input context entry missing for node")
            .take()
    }

    /// Clone every tensor the source bindings hold for a name in `node`'s
    /// symbol table into the node's input context. Names the source lacks are
    /// left for an upstream node's output propagation.
    pub(crate) fn propagate_inputs(&self, node: &Node, src: &ExecutionContext) {
        self.trace_result_event(|trace| trace.begin("propagate_inputs"));
        {
            let mut table = self.bindings.lock().expect("bindings mutex poisoned");
            for (name, _) in node.bundle().symbols() {
                if let Some(tensor) = src.bindings().get(name) {
                    let tensor = tensor.clone();
                    bind_node_input(&mut table, node, name, tensor);
                }
            }
        }
        self.trace_result_event(|trace| trace.end("propagate_inputs"));
    }

    /// Input propagation for entry nodes, where the source is the run's own
    /// result context. Source and destination live behind the same mutex.
    pub(crate) fn propagate_inputs_from_result(&self, node: &Node) {
        let mut table = self.bindings.lock().expect("bindings mutex poisoned");
        let BindingsTable {
            node_inputs,
            result,
        } = &mut *table;
        let result_ctx = result.as_mut().expect("result context already taken");
        if let Some(trace) = result_ctx.trace_mut() {
            trace.begin("propagate_inputs");
        }
        for (name, _) in node.bundle().symbols() {
            if let Some(tensor) = result_ctx.bindings().get(name) {
                let tensor = tensor.clone();
                let node_ctx = node_inputs
                    .get_mut(node.name())
                    .expect("input context entry missing for node")
                    .as_mut()
                    .expect("input context already taken for node");
                node_ctx
                    .bindings_mut()
                    .set(name, tensor)
                    .expect("placeholder slot missing for node input");
            }
        }
        if let Some(trace) = result_ctx.trace_mut() {
            trace.end("propagate_inputs");
        }
    }

    /// Move every bound (placeholder, tensor) pair of a terminal node's
    /// bindings into the result context by name. Outputs the caller did not
    /// request are dropped.
    pub(crate) fn propagate_outputs(&self, bindings: PlaceholderBindings) {
        self.trace_result_event(|trace| trace.begin("propagate_outputs"));
        for (placeholder, tensor) in bindings.into_pairs() {
            self.bind_result(placeholder.name(), tensor);
        }
        self.trace_result_event(|trace| trace.end("propagate_outputs"));
    }

    /// Move a single named tensor into the result bindings if the caller
    /// requested it; silently drop it otherwise.
    pub(crate) fn bind_result(&self, name: &str, tensor: TensorValue) {
        let mut table = self.bindings.lock().expect("bindings mutex poisoned");
        let result_ctx = table.result.as_mut().expect("result context already taken");
        if result_ctx.bindings().contains(name) {
            result_ctx
                .bindings_mut()
                .set(name, tensor)
                .expect("result binding slot disappeared");
        }
    }

    /// Append-move node trace events onto the result trace context. Clears
    /// `events` when the run is not traced.
    pub(crate) fn merge_trace_events(&self, events: &mut Vec<TraceEvent>) {
        if !self.trace_enabled {
            events.clear();
            return;
        }
        let mut table = self.bindings.lock().expect("bindings mutex poisoned");
        let result_ctx = table.result.as_mut().expect("result context already taken");
        if let Some(trace) = result_ctx.trace_mut() {
            trace.merge(events);
        } else {
            events.clear();
        }
    }

    pub(crate) fn set_device_thread_name(&self, device: DeviceId, name: &str) {
        if !self.trace_enabled {
            return;
        }
        self.trace_result_event(|trace| trace.set_thread_name(device, name));
    }

    pub(crate) fn take_callback(&self) -> ResultCallback {
        self.callback
            .lock()
            .expect("callback mutex poisoned")
            .take()
            .expect("result callback already taken")
    }

    pub(crate) fn take_result_ctx(&self) -> Box<ExecutionContext> {
        self.bindings
            .lock()
            .expect("bindings mutex poisoned")
            .result
            .take()
            .expect("result context already taken")
    }

    fn trace_result_event(&self, record: impl FnOnce(&mut TraceContext)) {
        if !self.trace_enabled {
            return;
        }
        let mut table = self.bindings.lock().expect("bindings mutex poisoned");
        if let Some(trace) = table
            .result
            .as_mut()
            .and_then(|result_ctx| result_ctx.trace_mut())
        {
            record(trace);
        }
    }
}

fn bind_node_input(table: &mut BindingsTable, node: &Node, name: &str, tensor: TensorValue) {
    let node_ctx = table
        .node_inputs
        .get_mut(node.name())
        .expect("input context entry missing for node")
        .as_mut()
        .expect("input context already taken for node");
    node_ctx
        .bindings_mut()
        .set(name, tensor)
        .expect("placeholder slot missing for node input");
}

/// First caller for a name allocates and memoizes the placeholder; later
/// callers get the same handle. Engine-created placeholders are never
/// trainable.
fn intern_placeholder<'a>(
    table: &'a mut HashMap<String, Arc<Placeholder>>,
    name: &str,
    dtype: DType,
) -> &'a Arc<Placeholder> {
    table
        .entry(name.to_string())
        .or_insert_with(|| Arc::new(Placeholder::new(name, dtype, false)))
}
