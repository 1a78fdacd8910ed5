//! Graph model: nodes, connections, projects, cycle analysis and file formats.

pub mod builder;
pub mod scc;
pub mod serialization;
pub mod types;

pub use builder::GraphBuilder;
pub use scc::{strongly_connected_components, CycleAnalysis};
pub use serialization::{
    deserialize_graph, deserialize_project, serialize_graph, serialize_graph_as,
    serialize_project, serialize_project_as, FormatVersion,
};
pub use types::*;
