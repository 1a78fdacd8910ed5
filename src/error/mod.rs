//! Error types for the dataflow engine.
//!
//! - [`NodeError`]: Errors raised by an individual node computation.
//! - [`ProcessError`]: Scheduler-level errors (construction, run failure, abort, replay).
//! - [`SerializationError`]: Graph/project/recording (de)serialization failures.

pub mod node_error;
pub mod process_error;
pub mod serialization_error;

pub use node_error::{ErrorRetryability, NodeError};
pub use process_error::{NodeFailure, ProcessError};
pub use serialization_error::SerializationError;

/// Convenience alias for scheduler-level results.
pub type ProcessResult<T> = Result<T, ProcessError>;
/// Convenience alias for node-level results.
pub type NodeResult<T> = Result<T, NodeError>;
