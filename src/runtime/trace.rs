use std::collections::HashMap;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, Result};
use serde::Serialize;

use crate::types::DeviceId;

/// Verbosity of a run's trace context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TraceLevel {
    Basic,
    Full,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TraceEventKind {
    Begin,
    End,
    Instant,
}

impl fmt::Display for TraceEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TraceEventKind::Begin => write!(f, "Begin"),
            TraceEventKind::End => write!(f, "End"),
            TraceEventKind::Instant => write!(f, "Instant"),
        }
    }
}

/// Timestamped record of one engine or device phase.
#[derive(Debug, Clone, Serialize)]
pub struct TraceEvent {
    pub label: String,
    pub kind: TraceEventKind,
    pub thread: usize,
    pub micros: u64,
}

/// Appendable event sink attached to an execution context.
///
/// Each per-node context gets its own trace context inheriting the level and
/// thread of the run's result context; node events are merged back into the
/// result sink when the node's completion is handled.
#[derive(Debug, Serialize)]
pub struct TraceContext {
    level: TraceLevel,
    thread: usize,
    thread_names: HashMap<DeviceId, String>,
    events: Vec<TraceEvent>,
}

impl TraceContext {
    pub fn new(level: TraceLevel, thread: usize) -> Self {
        Self {
            level,
            thread,
            thread_names: HashMap::new(),
            events: Vec::new(),
        }
    }

    pub fn level(&self) -> TraceLevel {
        self.level
    }

    pub fn thread(&self) -> usize {
        self.thread
    }

    /// Retag subsequent events, e.g. with the device id a node runs on.
    pub fn set_thread(&mut self, thread: usize) {
        self.thread = thread;
    }

    pub fn set_thread_name(&mut self, device: DeviceId, name: impl Into<String>) {
        self.thread_names.insert(device, name.into());
    }

    pub fn thread_name(&self, device: DeviceId) -> Option<&str> {
        self.thread_names.get(&device).map(String::as_str)
    }

    pub fn begin(&mut self, label: impl Into<String>) {
        self.push(label.into(), TraceEventKind::Begin);
    }

    pub fn end(&mut self, label: impl Into<String>) {
        self.push(label.into(), TraceEventKind::End);
    }

    pub fn instant(&mut self, label: impl Into<String>) {
        self.push(label.into(), TraceEventKind::Instant);
    }

    fn push(&mut self, label: String, kind: TraceEventKind) {
        self.events.push(TraceEvent {
            label,
            kind,
            thread: self.thread,
            micros: now_micros(),
        });
    }

    pub fn events(&self) -> &[TraceEvent] {
        &self.events
    }

    pub fn take_events(&mut self) -> Vec<TraceEvent> {
        std::mem::take(&mut self.events)
    }

    /// Append-move `events` onto this sink.
    pub fn merge(&mut self, events: &mut Vec<TraceEvent>) {
        self.events.append(events);
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|err| anyhow!("failed to serialize trace context: {}", err))
    }
}

fn now_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros() as u64
}
