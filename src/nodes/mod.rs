//! Built-in node kinds and the registry that maps type strings to them.

pub mod control_flow;
pub mod events;
pub mod executor;
pub mod external_call;
pub mod globals;
pub mod graph_io;
pub mod loop_controller;
pub mod subgraph;
pub mod text;
pub mod user_input;
pub mod utils;

pub use executor::{DefinitionContext, EditorDefinition, NodeImpl, NodeRegistry};
