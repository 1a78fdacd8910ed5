//! Scheduler-level error types.

use super::{NodeError, SerializationError};
use thiserror::Error;

/// One errored node inside an aggregate run failure.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeFailure {
    pub node_id: String,
    pub title: String,
    pub error: String,
}

impl std::fmt::Display for NodeFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}): {}", self.title, self.node_id, self.error)
    }
}

fn join_failures(failures: &[NodeFailure]) -> String {
    failures
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Scheduler-level errors
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("Graph not found: {0}")]
    GraphNotFound(String),
    #[error("Unknown node type {node_type} for node {node_id}")]
    UnknownNodeType { node_id: String, node_type: String },
    #[error("Graph validation error: {0}")]
    GraphValidation(String),
    #[error("Processor is already running")]
    AlreadyRunning,
    #[error(
        "Graph {graph_name} ({graph_id}) failed to process due to errors in nodes: {}",
        join_failures(.failures)
    )]
    GraphFailed {
        graph_name: String,
        graph_id: String,
        failures: Vec<NodeFailure>,
    },
    #[error("Processing aborted: {0}")]
    Aborted(String),
    #[error("Mismatch between project and recording: {0}")]
    RecordingMismatch(String),
    #[error("Recorded run failed: {0}")]
    ReplayFailed(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error(transparent)]
    Serialization(#[from] SerializationError),
    #[error("Node error: {0}")]
    Node(#[from] NodeError),
}

impl ProcessError {
    /// Errored nodes carried by an aggregate failure, empty for any other variant.
    pub fn failures(&self) -> &[NodeFailure] {
        match self {
            ProcessError::GraphFailed { failures, .. } => failures,
            _ => &[],
        }
    }
}
