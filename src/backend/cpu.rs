use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::thread::{self, JoinHandle};

use anyhow::{anyhow, bail, Result};

use crate::context::{ExecutionContext, PlaceholderBindings};
use crate::device::{DeviceConfig, DeviceManager};
use crate::error::RuntimeError;
use crate::types::{CompletionCallback, RunId};

/// A compiled node function: reads its inputs from the bindings and writes
/// its outputs back into them.
pub type CompiledFunction = Box<dyn Fn(&mut PlaceholderBindings) -> Result<()> + Send + Sync>;

/// Named compiled functions a CPU device manager can run.
#[derive(Default)]
pub struct FunctionRegistry {
    functions: HashMap<String, CompiledFunction>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, name: &str, function: F) -> Result<()>
    where
        F: Fn(&mut PlaceholderBindings) -> Result<()> + Send + Sync + 'static,
    {
        if self.functions.contains_key(name) {
            bail!("function {} already registered", name);
        }
        self.functions.insert(name.to_string(), Box::new(function));
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    fn get(&self, name: &str) -> Option<&CompiledFunction> {
        self.functions.get(name)
    }
}

struct Job {
    run_id: RunId,
    name: String,
    ctx: Box<ExecutionContext>,
    done: CompletionCallback,
}

/// Reference device manager: one owned worker thread draining an mpsc job
/// queue. Every submission gets exactly one completion, including after the
/// worker has stopped.
pub struct CpuDeviceManager {
    config: DeviceConfig,
    sender: Option<mpsc::Sender<Job>>,
    worker: Option<JoinHandle<()>>,
    next_run: AtomicU64,
}

impl CpuDeviceManager {
    pub fn spawn(config: DeviceConfig, registry: FunctionRegistry) -> Result<Self> {
        let (sender, receiver) = mpsc::channel::<Job>();
        let worker = thread::Builder::new()
            .name(format!("openexec-cpu-{}", config.name()))
            .spawn(move || worker_loop(registry, receiver))
            .map_err(|err| anyhow!("failed to spawn cpu device worker: {}", err))?;
        Ok(Self {
            config,
            sender: Some(sender),
            worker: Some(worker),
            next_run: AtomicU64::new(0),
        })
    }
}

fn worker_loop(registry: FunctionRegistry, receiver: mpsc::Receiver<Job>) {
    while let Ok(job) = receiver.recv() {
        let Job {
            run_id,
            name,
            mut ctx,
            done,
        } = job;

        if let Some(trace) = ctx.trace_mut() {
            trace.begin(format!("device:{}", name));
        }
        let result = match registry.get(&name) {
            Some(function) => function(ctx.bindings_mut()).map_err(RuntimeError::Device),
            None => Err(RuntimeError::Device(anyhow!("unknown function: {}", name))),
        };
        if let Some(trace) = ctx.trace_mut() {
            trace.end(format!("device:{}", name));
        }

        done(run_id, result, ctx);
    }
}

impl DeviceManager for CpuDeviceManager {
    fn run_function(&self, name: &str, ctx: Box<ExecutionContext>, done: CompletionCallback) {
        let run_id = self.next_run.fetch_add(1, Ordering::Relaxed);
        let sender = self
            .sender
            .as_ref()
            .expect("cpu device worker already stopped");
        let job = Job {
            run_id,
            name: name.to_string(),
            ctx,
            done,
        };
        if let Err(mpsc::SendError(job)) = sender.send(job) {
            (job.done)(
                job.run_id,
                Err(RuntimeError::Device(anyhow!("cpu device worker stopped"))),
                job.ctx,
            );
        }
    }

    fn device_config(&self) -> &DeviceConfig {
        &self.config
    }
}

impl Drop for CpuDeviceManager {
    fn drop(&mut self) {
        drop(self.sender.take());
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}
