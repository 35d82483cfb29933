//! Execution failures reported by backends.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A backend failed to execute a graph.
///
/// Serializable so a worker process can hand it back to the orchestrator
/// unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecutionError {
    /// Clean refusal, e.g. a shape the backend does not support.
    #[error("rejected: {reason}")]
    Rejected { reason: String },

    #[error("panicked: {message}")]
    Panicked { message: String },

    #[error("worker exited abnormally (code {code:?}): {stderr}")]
    AbnormalExit { code: Option<i32>, stderr: String },

    #[error("protocol error: {reason}")]
    Protocol { reason: String },

    #[error("I/O error: {message}")]
    Io { message: String },
}

impl ExecutionError {
    pub fn rejected(reason: impl Into<String>) -> Self {
        ExecutionError::Rejected { reason: reason.into() }
    }

    pub fn protocol(reason: impl Into<String>) -> Self {
        ExecutionError::Protocol { reason: reason.into() }
    }

    /// Short class name used in logs and verdicts.
    pub fn class(&self) -> &'static str {
        match self {
            ExecutionError::Rejected { .. } => "rejected",
            ExecutionError::Panicked { .. } => "panicked",
            ExecutionError::AbnormalExit { .. } => "abnormal_exit",
            ExecutionError::Protocol { .. } => "protocol",
            ExecutionError::Io { .. } => "io",
        }
    }

    /// Extract a message from a `catch_unwind` payload.
    pub fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        ExecutionError::Panicked { message }
    }
}

impl From<std::io::Error> for ExecutionError {
    fn from(err: std::io::Error) -> Self {
        ExecutionError::Io { message: err.to_string() }
    }
}
