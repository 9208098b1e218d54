use crate::context::ExecutionContext;
use crate::error::RuntimeError;

/// Caller-supplied identifier for one invocation of `Executor::run`.
pub type RunId = u64;

/// Identifier selecting which device manager runs a node.
pub type DeviceId = usize;

/// Aggregate outcome of a run or of a single node execution.
pub type RunResult = Result<(), RuntimeError>;

/// One-shot continuation invoked exactly once per accepted run.
pub type ResultCallback = Box<dyn FnOnce(RunId, RunResult, Box<ExecutionContext>) + Send>;

/// One-shot continuation a device manager must invoke exactly once per
/// `run_function` call.
pub type CompletionCallback = Box<dyn FnOnce(RunId, RunResult, Box<ExecutionContext>) + Send>;
