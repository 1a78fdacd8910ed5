use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How a failed outbound call should be treated by the retry helper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorRetryability {
    Retryable,
    RateLimited,
    NonRetryable,
}

/// Node-level errors
#[derive(Debug, Clone, Error)]
pub enum NodeError {
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },
    #[error("Execution error: {0}")]
    ExecutionError(String),
    #[error("Aborted")]
    Aborted,
    #[error("Loop controller {title} exceeded max iterations of {max}")]
    MaxIterationsExceeded { title: String, max: u32 },
    #[error("Nested loops are not supported")]
    NestedLoop,
    #[error("Graph not found: {0}")]
    GraphNotFound(String),
    #[error("External function not found: {0}")]
    ExternalFunctionNotFound(String),
    #[error("User input rejected: {0}")]
    UserInputRejected(String),
    #[error("Error processing subgraph: {0}")]
    SubGraph(String),
    #[error("Serialization error: {0}")]
    SerializationError(String),
    #[error("IO error: {0}")]
    Io(String),
    #[error("Rate limited{}", .retry_after_ms.map(|ms| format!(", retry after {ms}ms")).unwrap_or_default())]
    RateLimited { retry_after_ms: Option<u64> },
    #[error("Client error {status}: {message}")]
    ClientError { status: u16, message: String },
    #[error("Network error: {0}")]
    Transient(String),
    #[error("{0}")]
    SplitRun(String),
}

impl NodeError {
    pub fn retryability(&self) -> ErrorRetryability {
        match self {
            NodeError::RateLimited { .. } => ErrorRetryability::RateLimited,
            NodeError::ClientError { status, .. } if *status == 429 => {
                ErrorRetryability::RateLimited
            }
            NodeError::Transient(_) => ErrorRetryability::Retryable,
            _ => ErrorRetryability::NonRetryable,
        }
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, NodeError::Aborted)
    }
}

impl From<serde_json::Error> for NodeError {
    fn from(e: serde_json::Error) -> Self {
        NodeError::SerializationError(e.to_string())
    }
}

impl From<std::io::Error> for NodeError {
    fn from(e: std::io::Error) -> Self {
        NodeError::Io(e.to_string())
    }
}
