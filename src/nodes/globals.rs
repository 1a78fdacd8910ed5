//! Nodes reading and writing processor-tree global variables.

use async_trait::async_trait;
use serde::Deserialize;

use super::utils::{default_value, node_config};
use crate::core::process_context::NodeContext;
use crate::error::{NodeError, NodeResult};
use crate::graph::{Node, PortDefinition};
use crate::nodes::{DefinitionContext, EditorDefinition, NodeImpl};
use crate::value::{coerce_type, DataType, DataValue, Inputs, Outputs};

fn default_on_demand() -> bool {
    true
}

fn default_data_type() -> DataType {
    DataType::STRING
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetGlobalConfig {
    #[serde(default)]
    pub id: String,
    #[serde(default = "default_data_type")]
    pub data_type: DataType,
    /// Output a function value that reads the global when evaluated
    #[serde(default = "default_on_demand")]
    pub on_demand: bool,
    #[serde(default)]
    pub use_id_input: bool,
    /// Block until some node sets the variable
    #[serde(default)]
    pub wait: bool,
}

impl Default for GetGlobalConfig {
    fn default() -> Self {
        Self {
            id: String::new(),
            data_type: default_data_type(),
            on_demand: default_on_demand(),
            use_id_input: false,
            wait: false,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetGlobalConfig {
    #[serde(default)]
    pub id: String,
    #[serde(default = "default_data_type")]
    pub data_type: DataType,
    #[serde(default)]
    pub use_id_input: bool,
}

impl Default for SetGlobalConfig {
    fn default() -> Self {
        Self {
            id: String::new(),
            data_type: default_data_type(),
            use_id_input: false,
        }
    }
}

fn variable_id(configured: &str, use_input: bool, inputs: &Inputs) -> NodeResult<String> {
    if use_input {
        Ok(coerce_type(inputs.get("id"), DataType::STRING)?
            .as_str()
            .unwrap_or_default()
            .to_string())
    } else {
        Ok(configured.to_string())
    }
}

fn id_port(use_input: bool) -> Vec<PortDefinition> {
    if use_input {
        vec![PortDefinition::new("id", "Variable ID", DataType::STRING)]
    } else {
        Vec::new()
    }
}

pub struct GetGlobalNode;

#[async_trait]
impl NodeImpl for GetGlobalNode {
    fn input_definitions(&self, node: &Node, _cx: &DefinitionContext<'_>) -> Vec<PortDefinition> {
        let config: GetGlobalConfig = node_config(node).unwrap_or_default();
        id_port(config.use_id_input)
    }

    fn output_definitions(&self, node: &Node, _cx: &DefinitionContext<'_>) -> Vec<PortDefinition> {
        let config: GetGlobalConfig = node_config(node).unwrap_or_default();
        let value_type = if config.on_demand {
            config.data_type.function_of()
        } else {
            config.data_type
        };
        vec![
            PortDefinition::new("value", "Value", value_type),
            PortDefinition::new("variable_id_out", "Variable ID", DataType::STRING),
        ]
    }

    fn editors(&self, _node: &Node) -> Vec<EditorDefinition> {
        vec![
            EditorDefinition::new("id", "Variable ID", "string"),
            EditorDefinition::new("dataType", "Data Type", "dataTypeSelector"),
            EditorDefinition::new("onDemand", "On Demand", "toggle"),
            EditorDefinition::new("wait", "Wait", "toggle"),
        ]
    }

    async fn process(&self, node: &Node, inputs: Inputs, ctx: &NodeContext) -> NodeResult<Outputs> {
        let config: GetGlobalConfig = node_config(node)?;
        let id = variable_id(&config.id, config.use_id_input, &inputs)?;

        let value = if config.on_demand {
            if config.wait {
                return Err(NodeError::ConfigError(
                    "Cannot use onDemand and wait together".to_string(),
                ));
            }
            let globals = ctx.globals();
            let data_type = config.data_type;
            let read_id = id.clone();
            DataValue::lazy(data_type, move || {
                globals
                    .get(&read_id)
                    .map(|v| v.value())
                    .unwrap_or_else(|| default_value(data_type).value())
            })
        } else if config.wait {
            ctx.wait_for_global(&id).await?
        } else {
            ctx.get_global(&id)
                .unwrap_or_else(|| default_value(config.data_type))
        };

        Ok(Outputs::from([
            ("value".to_string(), value),
            ("variable_id_out".to_string(), DataValue::string(id)),
        ]))
    }
}

pub struct SetGlobalNode;

#[async_trait]
impl NodeImpl for SetGlobalNode {
    fn input_definitions(&self, node: &Node, _cx: &DefinitionContext<'_>) -> Vec<PortDefinition> {
        let config: SetGlobalConfig = node_config(node).unwrap_or_default();
        let mut inputs = vec![PortDefinition::new("value", "Value", config.data_type)];
        inputs.extend(id_port(config.use_id_input));
        inputs
    }

    fn output_definitions(&self, node: &Node, _cx: &DefinitionContext<'_>) -> Vec<PortDefinition> {
        let config: SetGlobalConfig = node_config(node).unwrap_or_default();
        vec![
            PortDefinition::new("saved-value", "Value", config.data_type),
            PortDefinition::new("previous-value", "Previous Value", config.data_type),
            PortDefinition::new("variable_id_out", "Variable ID", DataType::STRING),
        ]
    }

    fn editors(&self, _node: &Node) -> Vec<EditorDefinition> {
        vec![
            EditorDefinition::new("id", "Variable ID", "string"),
            EditorDefinition::new("dataType", "Data Type", "dataTypeSelector"),
        ]
    }

    async fn process(&self, node: &Node, inputs: Inputs, ctx: &NodeContext) -> NodeResult<Outputs> {
        let config: SetGlobalConfig = node_config(node)?;
        let Some(raw) = inputs.get("value") else {
            return Ok(Outputs::new());
        };
        let id = variable_id(&config.id, config.use_id_input, &inputs)?;
        if id.is_empty() {
            return Err(NodeError::ConfigError("Missing variable ID".to_string()));
        }

        let value = raw.unwrap_function();
        let previous = ctx
            .set_global(&id, value.clone())
            .unwrap_or_else(|| default_value(config.data_type));

        Ok(Outputs::from([
            ("saved-value".to_string(), value),
            ("previous-value".to_string(), previous),
            ("variable_id_out".to_string(), DataValue::string(id)),
        ]))
    }
}
