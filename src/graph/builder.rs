use serde_json::Value;

use super::types::{Connection, Graph, GraphMetadata, Node};
use crate::error::ProcessError;

/// Fluent construction of a [`Graph`], validated on [`GraphBuilder::build`].
#[derive(Debug, Default)]
pub struct GraphBuilder {
    graph: Graph,
}

impl GraphBuilder {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            graph: Graph {
                metadata: GraphMetadata {
                    name: id.clone(),
                    id,
                    description: String::new(),
                },
                nodes: Vec::new(),
                connections: Vec::new(),
            },
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.graph.metadata.name = name.into();
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.graph.metadata.description = description.into();
        self
    }

    pub fn node(mut self, node: Node) -> Self {
        self.graph.nodes.push(node);
        self
    }

    /// Shorthand for a node with the given id, type and config.
    pub fn add(self, id: &str, node_type: &str, data: Value) -> Self {
        self.node(Node::new(id, node_type).with_title(id).with_data(data))
    }

    pub fn connect(mut self, from: &str, output: &str, to: &str, input: &str) -> Self {
        self.graph
            .connections
            .push(Connection::new(from, output, to, input));
        self
    }

    pub fn build(self) -> Result<Graph, ProcessError> {
        self.graph.validate()?;
        Ok(self.graph)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_build_graph() {
        let graph = GraphBuilder::new("main")
            .name("Main")
            .add("t", "text", json!({"text": "hi"}))
            .add("o", "graphOutput", json!({"id": "out"}))
            .connect("t", "output", "o", "value")
            .build()
            .unwrap();
        assert_eq!(graph.metadata.id, "main");
        assert_eq!(graph.metadata.name, "Main");
        assert_eq!(graph.nodes.len(), 2);
        assert_eq!(graph.node("t").unwrap().title, "t");
        assert_eq!(graph.connections[0], Connection::new("t", "output", "o", "value"));
    }

    #[test]
    fn test_build_rejects_invalid_graph() {
        let result = GraphBuilder::new("main")
            .add("t", "text", json!({}))
            .connect("t", "output", "missing", "value")
            .build();
        assert!(result.is_err());
    }
}
