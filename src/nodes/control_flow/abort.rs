use async_trait::async_trait;
use serde::Deserialize;

use crate::core::process_context::NodeContext;
use crate::error::NodeResult;
use crate::graph::{Node, PortDefinition};
use crate::nodes::utils::node_config;
use crate::nodes::{DefinitionContext, EditorDefinition, NodeImpl};
use crate::value::{coerce_to_bool, coerce_to_string, DataType, Inputs, Outputs};

fn default_successfully() -> bool {
    true
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AbortGraphConfig {
    /// Early exit instead of an error abort
    #[serde(default = "default_successfully")]
    pub successfully: bool,
    #[serde(default)]
    pub use_successfully_input: bool,
    #[serde(default)]
    pub error_message: String,
}

impl Default for AbortGraphConfig {
    fn default() -> Self {
        Self {
            successfully: default_successfully(),
            use_successfully_input: false,
            error_message: String::new(),
        }
    }
}

/// Aborts the graph it runs in, either as an early exit or with an error.
pub struct AbortGraphNode;

#[async_trait]
impl NodeImpl for AbortGraphNode {
    fn input_definitions(&self, node: &Node, _cx: &DefinitionContext<'_>) -> Vec<PortDefinition> {
        let config: AbortGraphConfig = node_config(node).unwrap_or_default();
        let mut inputs = vec![PortDefinition::new("data", "Data or Error", DataType::ANY)];
        if config.use_successfully_input {
            inputs.push(PortDefinition::new("successfully", "Successfully", DataType::BOOLEAN));
        }
        inputs
    }

    fn output_definitions(&self, _node: &Node, _cx: &DefinitionContext<'_>) -> Vec<PortDefinition> {
        Vec::new()
    }

    fn editors(&self, _node: &Node) -> Vec<EditorDefinition> {
        vec![
            EditorDefinition::new("successfully", "Successfully Abort", "toggle"),
            EditorDefinition::new("errorMessage", "Error Message", "string"),
        ]
    }

    async fn process(&self, node: &Node, inputs: Inputs, ctx: &NodeContext) -> NodeResult<Outputs> {
        let config: AbortGraphConfig = node_config(node)?;
        let successfully = match inputs.get("successfully") {
            Some(value) if config.use_successfully_input => coerce_to_bool(Some(value)),
            _ => config.successfully,
        };
        if successfully {
            ctx.abort_graph(None);
        } else {
            let message = coerce_to_string(inputs.get("data"))
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .or_else(|| Some(config.error_message.clone()).filter(|s| !s.is_empty()))
                .unwrap_or_else(|| "Graph aborted with error".to_string());
            ctx.abort_graph(Some(message));
        }
        Ok(Outputs::new())
    }
}
