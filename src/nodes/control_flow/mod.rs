//! Branching nodes, most of which observe excluded inputs, and graph abort.

pub mod abort;
pub mod coalesce;
pub mod if_else;
pub mod race;

pub use abort::AbortGraphNode;
pub use coalesce::{CoalesceNode, PassthroughNode};
pub use if_else::{IfElseNode, IfNode};
pub use race::RaceInputsNode;
