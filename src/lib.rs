//! Concurrent execution engine for pre-partitioned neural-network DAGs.
//!
//! Nodes are opaque device-bound functions. The executor drives every node
//! reachable from a graph's root across a pool of device managers, honoring
//! data dependencies, cloning intermediate tensors across fan-out edges, and
//! delivering exactly one aggregate result per run.

mod backend;
mod context;
mod device;
mod error;
mod graph;
pub mod logging;
mod runtime;
mod tensor;
mod types;

pub use backend::{CompiledFunction, CpuDeviceManager, FunctionRegistry};
pub use context::{ExecutionContext, Placeholder, PlaceholderBindings};
pub use device::{DeviceConfig, DeviceManager};
pub use error::RuntimeError;
pub use graph::{Dag, DagBuilder, Node, RuntimeBundle, SymbolCategory, SymbolInfo};
pub use runtime::{Executor, InflightBarrier, TraceContext, TraceEvent, TraceEventKind, TraceLevel};
pub use tensor::{DType, Tensor, TensorValue};
pub use types::{CompletionCallback, DeviceId, ResultCallback, RunId, RunResult};
