mod barrier;
mod executor;
mod state;
mod trace;

pub use barrier::InflightBarrier;
pub use executor::Executor;
pub use trace::{TraceContext, TraceEvent, TraceEventKind, TraceLevel};
