use thiserror::Error;

/// Errors raised while reading or writing graphs, projects and recordings.
#[derive(Debug, Error)]
pub enum SerializationError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Unsupported version: {0}")]
    UnsupportedVersion(u64),
    #[error("Invalid visual data string: {0}")]
    InvalidVisualData(String),
    #[error("Invalid connection string: {0}")]
    InvalidConnection(String),
    #[error("Node {node_id} connects to unknown node {target}")]
    UnknownConnectionTarget { node_id: String, target: String },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Could not deserialize {what}: {}", .attempts.join("; "))]
    Exhausted { what: String, attempts: Vec<String> },
}
