//! Named user events on the root processor's bus.

use async_trait::async_trait;
use serde::Deserialize;

use super::utils::node_config;
use crate::core::process_context::NodeContext;
use crate::error::NodeResult;
use crate::graph::{Node, PortDefinition};
use crate::nodes::{DefinitionContext, EditorDefinition, NodeImpl};
use crate::value::{coerce_type, DataType, DataValue, Inputs, Outputs};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventConfig {
    #[serde(default)]
    pub event_name: String,
    #[serde(default)]
    pub use_event_name_input: bool,
}

impl EventConfig {
    fn name(&self, inputs: &Inputs) -> NodeResult<String> {
        if self.use_event_name_input {
            let value = coerce_type(inputs.get("eventName"), DataType::STRING)?;
            Ok(value.as_str().unwrap_or_default().to_string())
        } else {
            Ok(self.event_name.clone())
        }
    }

    fn name_port(&self) -> Option<PortDefinition> {
        self.use_event_name_input
            .then(|| PortDefinition::new("eventName", "Event Name", DataType::STRING))
    }
}

fn event_editors() -> Vec<EditorDefinition> {
    vec![
        EditorDefinition::new("eventName", "Event Name", "string"),
        EditorDefinition::new("useEventNameInput", "Use Event Name Input", "toggle"),
    ]
}

/// Raises `eventName` with the `data` input as payload.
pub struct RaiseEventNode;

#[async_trait]
impl NodeImpl for RaiseEventNode {
    fn input_definitions(&self, node: &Node, _cx: &DefinitionContext<'_>) -> Vec<PortDefinition> {
        let config: EventConfig = node_config(node).unwrap_or_default();
        let mut inputs: Vec<PortDefinition> = config.name_port().into_iter().collect();
        inputs.push(PortDefinition::new("data", "Data", DataType::ANY));
        inputs
    }

    fn output_definitions(&self, _node: &Node, _cx: &DefinitionContext<'_>) -> Vec<PortDefinition> {
        vec![PortDefinition::new("result", "Result", DataType::ANY)]
    }

    fn editors(&self, _node: &Node) -> Vec<EditorDefinition> {
        event_editors()
    }

    async fn process(&self, node: &Node, inputs: Inputs, ctx: &NodeContext) -> NodeResult<Outputs> {
        let config: EventConfig = node_config(node)?;
        let name = config.name(&inputs)?;
        let data = inputs.get("data").cloned();
        ctx.raise_event(&name, data.clone());
        let mut outputs = Outputs::new();
        if let Some(data) = data {
            outputs.insert("result".to_string(), data);
        }
        Ok(outputs)
    }
}

/// Suspends until `eventName` is raised, then forwards `inputData`.
pub struct WaitForEventNode;

#[async_trait]
impl NodeImpl for WaitForEventNode {
    fn input_definitions(&self, node: &Node, _cx: &DefinitionContext<'_>) -> Vec<PortDefinition> {
        let config: EventConfig = node_config(node).unwrap_or_default();
        let mut inputs: Vec<PortDefinition> = config.name_port().into_iter().collect();
        inputs.push(PortDefinition::new("inputData", "Data", DataType::ANY));
        inputs
    }

    fn output_definitions(&self, _node: &Node, _cx: &DefinitionContext<'_>) -> Vec<PortDefinition> {
        vec![
            PortDefinition::new("outputData", "Data", DataType::ANY),
            PortDefinition::new("eventData", "Event Data", DataType::ANY),
        ]
    }

    fn editors(&self, _node: &Node) -> Vec<EditorDefinition> {
        event_editors()
    }

    async fn process(&self, node: &Node, inputs: Inputs, ctx: &NodeContext) -> NodeResult<Outputs> {
        let config: EventConfig = node_config(node)?;
        let name = config.name(&inputs)?;
        let event_data = ctx.wait_for_event(&name).await?;

        let mut outputs = Outputs::new();
        if let Some(data) = inputs.get("inputData") {
            outputs.insert("outputData".to_string(), data.clone());
        }
        outputs.insert(
            "eventData".to_string(),
            event_data.unwrap_or_else(|| DataValue::any(serde_json::Value::Null)),
        );
        Ok(outputs)
    }
}
