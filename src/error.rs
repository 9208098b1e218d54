use thiserror::Error;

use crate::types::DeviceId;

/// Errors surfaced through run callbacks.
///
/// Device managers report their own failures as opaque [`anyhow::Error`]
/// values; the engine passes them through unchanged.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The executor refused the run: it is shutting down, or the run id is
    /// already active.
    #[error("request refused: {0}")]
    RequestRefused(String),

    /// A node selected a device with no registered device manager.
    #[error("no device manager registered for device {0}")]
    DeviceNotFound(DeviceId),

    /// A device manager failed while executing a node function.
    #[error("device execution failed: {0}")]
    Device(#[from] anyhow::Error),
}

impl RuntimeError {
    pub fn is_refused(&self) -> bool {
        matches!(self, RuntimeError::RequestRefused(_))
    }
}
