use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A convenience `Result` alias using [`ForemanError`].
pub type ForemanResult<T> = Result<T, ForemanError>;

/// Top-level error type for the Foreman dispatch core.
///
/// The first six variants are the expected failure modes of dispatch and are
/// converted into failed [`TaskResult`](crate::TaskResult)s at the dispatcher
/// boundary. The remaining variants belong to the surrounding subsystems.
#[derive(Debug, Error)]
pub enum ForemanError {
    /// Malformed task input (e.g. missing capability).
    #[error("Invalid task: {0}")]
    InvalidTask(String),

    /// No registered worker declares the requested capability.
    #[error("No worker available for capability '{0}'")]
    NoWorkerAvailable(String),

    /// The worker's own logic failed.
    #[error("Worker '{worker}' failed: {message}")]
    WorkerExecution {
        /// Identity of the worker that failed.
        worker: String,
        /// Original failure message.
        message: String,
    },

    /// The worker did not answer within its invocation bound.
    #[error("Worker '{worker}' timed out after {timeout_ms}ms")]
    Timeout {
        /// Identity of the worker that timed out.
        worker: String,
        /// Bound that was exceeded.
        timeout_ms: u64,
    },

    /// A delegate call was made with no coordinator registered.
    #[error("Coordinator unavailable")]
    CoordinatorUnavailable,

    /// A worker with the same id is already registered.
    #[error("Worker '{0}' is already registered")]
    DuplicateWorker(String),

    /// A worker descriptor failed validation at registration.
    #[error("Invalid worker: {0}")]
    InvalidWorker(String),

    /// An error from the message bus.
    #[error("Channel error: {0}")]
    Channel(String),

    /// An error from the health monitor or its collaborators.
    #[error("Monitor error: {0}")]
    Monitor(String),

    /// An error in configuration parsing or validation.
    #[error("Config error: {0}")]
    Config(String),

    /// An unexpected internal failure.
    #[error("Internal error: {0}")]
    Internal(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ForemanError {
    /// Shorthand for a [`ForemanError::WorkerExecution`].
    pub fn worker(worker: impl Into<String>, message: impl Into<String>) -> Self {
        Self::WorkerExecution {
            worker: worker.into(),
            message: message.into(),
        }
    }

    /// The taxonomy kind this error is reported under in a failed result.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidTask(_) => ErrorKind::InvalidTask,
            Self::NoWorkerAvailable(_) => ErrorKind::NoWorkerAvailable,
            Self::WorkerExecution { .. } => ErrorKind::WorkerExecutionError,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::CoordinatorUnavailable => ErrorKind::CoordinatorUnavailable,
            Self::DuplicateWorker(_) => ErrorKind::DuplicateWorker,
            _ => ErrorKind::Internal,
        }
    }
}

/// Best-effort text of a caught panic payload.
pub fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}

/// Serializable error classification carried by failed task results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed input; never retried.
    InvalidTask,
    /// Zero candidates for the capability.
    NoWorkerAvailable,
    /// The worker's domain logic failed.
    WorkerExecutionError,
    /// The invocation exceeded its bound.
    Timeout,
    /// No coordinator registered.
    CoordinatorUnavailable,
    /// Registration collision.
    DuplicateWorker,
    /// Anything unexpected.
    Internal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::InvalidTask => "invalid_task",
            ErrorKind::NoWorkerAvailable => "no_worker_available",
            ErrorKind::WorkerExecutionError => "worker_execution_error",
            ErrorKind::Timeout => "timeout",
            ErrorKind::CoordinatorUnavailable => "coordinator_unavailable",
            ErrorKind::DuplicateWorker => "duplicate_worker",
            ErrorKind::Internal => "internal",
        };
        f.write_str(s)
    }
}
