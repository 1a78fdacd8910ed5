use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::process_context::NodeContext;
use crate::error::NodeResult;
use crate::graph::{Connection, Graph, Node, PortDefinition, Project};
use crate::value::{Inputs, Outputs};

/// What a node may look at when declaring its ports.
pub struct DefinitionContext<'a> {
    pub project: &'a Project,
    pub graph: &'a Graph,
    /// Connections touching the node being defined
    pub connections: &'a [Connection],
}

impl<'a> DefinitionContext<'a> {
    pub fn incoming(&self, node_id: &'a str) -> impl Iterator<Item = &'a Connection> + 'a {
        self.connections
            .iter()
            .filter(move |c| c.input_node_id == node_id)
    }

    pub fn outgoing(&self, node_id: &'a str) -> impl Iterator<Item = &'a Connection> + 'a {
        self.connections
            .iter()
            .filter(move |c| c.output_node_id == node_id)
    }
}

/// Editor metadata for a config field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditorDefinition {
    pub data_key: String,
    pub label: String,
    pub editor_type: String,
}

impl EditorDefinition {
    pub fn new(data_key: &str, label: &str, editor_type: &str) -> Self {
        Self {
            data_key: data_key.to_string(),
            label: label.to_string(),
            editor_type: editor_type.to_string(),
        }
    }
}

/// Trait for node kinds. One stateless implementation serves every node of
/// its type; per-node configuration is read from [`Node::data`].
#[async_trait]
pub trait NodeImpl: Send + Sync {
    fn input_definitions(&self, node: &Node, cx: &DefinitionContext<'_>) -> Vec<PortDefinition>;

    fn output_definitions(&self, node: &Node, cx: &DefinitionContext<'_>) -> Vec<PortDefinition>;

    fn editors(&self, _node: &Node) -> Vec<EditorDefinition> {
        Vec::new()
    }

    /// Graph output slot fed by this node's `valueOutput` port.
    fn graph_output_id(&self, _node: &Node) -> Option<String> {
        None
    }

    async fn process(&self, node: &Node, inputs: Inputs, ctx: &NodeContext) -> NodeResult<Outputs>;
}

/// Registry of node implementations by node type string
#[derive(Clone)]
pub struct NodeRegistry {
    impls: HashMap<String, Arc<dyn NodeImpl>>,
}

impl NodeRegistry {
    /// Registry with no node kinds at all.
    pub fn empty() -> Self {
        NodeRegistry {
            impls: HashMap::new(),
        }
    }

    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.register("loopController", super::loop_controller::LoopControllerNode);
        registry.register("if", super::control_flow::IfNode);
        registry.register("ifElse", super::control_flow::IfElseNode);
        registry.register("coalesce", super::control_flow::CoalesceNode);
        registry.register("passthrough", super::control_flow::PassthroughNode);
        registry.register("raceInputs", super::control_flow::RaceInputsNode);
        registry.register("abortGraph", super::control_flow::AbortGraphNode);
        registry.register("graphInput", super::graph_io::GraphInputNode);
        registry.register("graphOutput", super::graph_io::GraphOutputNode);
        registry.register("context", super::graph_io::ContextNode);
        registry.register("text", super::text::TextNode);
        registry.register("subGraph", super::subgraph::SubGraphNode);
        registry.register("getGlobal", super::globals::GetGlobalNode);
        registry.register("setGlobal", super::globals::SetGlobalNode);
        registry.register("raiseEvent", super::events::RaiseEventNode);
        registry.register("waitForEvent", super::events::WaitForEventNode);
        registry.register("userInput", super::user_input::UserInputNode);
        registry.register("externalCall", super::external_call::ExternalCallNode);
        registry
    }

    pub fn register(&mut self, node_type: &str, node: impl NodeImpl + 'static) {
        self.impls.insert(node_type.to_string(), Arc::new(node));
    }

    pub fn register_arc(&mut self, node_type: &str, node: Arc<dyn NodeImpl>) {
        self.impls.insert(node_type.to_string(), node);
    }

    pub fn get(&self, node_type: &str) -> Option<Arc<dyn NodeImpl>> {
        self.impls.get(node_type).cloned()
    }

    pub fn contains(&self, node_type: &str) -> bool {
        self.impls.contains_key(node_type)
    }

    pub fn types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.impls.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}
