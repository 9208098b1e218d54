use crate::context::ExecutionContext;
use crate::types::CompletionCallback;

/// Static description of a device backing a device manager.
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    name: String,
}

impl DeviceConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Opaque async executor bound to one device.
///
/// `run_function` submits a named compiled function with its input context
/// and returns without blocking; the implementation must invoke `done`
/// exactly once, from any thread, with the (possibly mutated) context. The
/// run id passed to `done` is the manager's own submission identifier.
pub trait DeviceManager: Send + Sync {
    fn run_function(&self, name: &str, ctx: Box<ExecutionContext>, done: CompletionCallback);

    fn device_config(&self) -> &DeviceConfig;
}
