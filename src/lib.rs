//! # xflow: a node-based dataflow execution engine
//!
//! `xflow` runs graphs of typed nodes connected port to port. A node runs once
//! every producer it depends on has run; branches not taken propagate a
//! control-flow-excluded sentinel instead of a value. On top of that the
//! engine offers:
//!
//! - **Loops**: a loop controller re-runs its body until its `continue` input
//!   goes false, with a configurable iteration cap.
//! - **Split runs**: a node can fan out over array inputs and aggregate the
//!   results in index order.
//! - **Sub-graphs**: graphs call other graphs of the same project through
//!   child processors that share globals, cache and pause state.
//! - **Control**: pause, resume, abort, user-input answers, global variables
//!   and named user events.
//! - **Events**: every lifecycle step is published on an [`EventBus`]; an
//!   [`ExecutionRecorder`] captures them and a processor can replay them.
//! - **Debugger**: a transport-agnostic [`DebuggerServer`] mirrors events to
//!   remote clients and accepts run/abort/pause/resume commands.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use xflow::{load_project_from_file, GraphRunner};
//!
//! #[tokio::main]
//! async fn main() {
//!     let project = load_project_from_file("project.json").await.unwrap();
//!     let outputs = GraphRunner::builder(project)
//!         .input("name", "Ada")
//!         .run()
//!         .await
//!         .unwrap();
//!     println!("{:?}", outputs);
//! }
//! ```

pub mod api;
pub mod core;
pub mod debugger;
pub mod error;
pub mod graph;
pub mod nodes;
pub mod recording;
pub mod value;

pub use crate::api::{
    load_project_from_file, load_project_from_str, GraphRunner, GraphRunnerBuilder, PreparedRun,
};
pub use crate::core::{
    EventBus, EventKind, GraphProcessor, NodeContext, ProcessContext, ProcessEvent,
    ProcessorConfig, ProcessorOptions, RetryConfig, RuntimeContext, Settings,
};
pub use crate::debugger::{DebuggerOptions, DebuggerServer};
pub use crate::error::{NodeError, NodeResult, ProcessError, ProcessResult, SerializationError};
pub use crate::graph::{Connection, Graph, GraphBuilder, Node, PortDefinition, Project};
pub use crate::nodes::{NodeImpl, NodeRegistry};
pub use crate::recording::{ExecutionRecorder, RecorderOptions, Recording};
pub use crate::value::{DataType, DataValue, GraphInputs, GraphOutputs, Inputs, Outputs};
