mod cpu;

pub use cpu::{CompiledFunction, CpuDeviceManager, FunctionRegistry};
