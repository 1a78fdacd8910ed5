//! Nodes that bind a graph to its caller: graph inputs, graph outputs and
//! context values.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::utils::node_config;
use crate::core::process_context::NodeContext;
use crate::error::NodeResult;
use crate::graph::{Node, PortDefinition};
use crate::nodes::{DefinitionContext, EditorDefinition, NodeImpl};
use crate::value::{coerce_type_optional, infer_type, DataType, DataValue, Inputs, Outputs};

fn default_data_type() -> DataType {
    DataType::STRING
}

/// Shared by graph input and context nodes.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValueSourceConfig {
    #[serde(default)]
    pub id: String,
    #[serde(default = "default_data_type")]
    pub data_type: DataType,
    #[serde(default)]
    pub use_default_value_input: bool,
    #[serde(default)]
    pub default_value: Value,
}

impl Default for ValueSourceConfig {
    fn default() -> Self {
        Self {
            id: String::new(),
            data_type: default_data_type(),
            use_default_value_input: false,
            default_value: Value::Null,
        }
    }
}

impl ValueSourceConfig {
    fn default_input(&self) -> Vec<PortDefinition> {
        if self.use_default_value_input {
            vec![PortDefinition::new("default", "Default", self.data_type)]
        } else {
            Vec::new()
        }
    }

    /// Resolution order: the supplied value, the `default` input, the
    /// configured default, then an empty value of the declared type.
    fn resolve(&self, supplied: Option<&DataValue>, inputs: &Inputs) -> DataValue {
        let target = self.data_type;
        let mut value = coerce_type_optional(supplied, target);
        if value.is_none() && self.use_default_value_input {
            value = coerce_type_optional(inputs.get("default"), target);
        }
        if value.is_none() && !self.default_value.is_null() {
            let configured = DataValue::new(infer_type(&self.default_value), self.default_value.clone());
            value = coerce_type_optional(Some(&configured), target);
        }
        value.unwrap_or_else(|| {
            if target.is_array() {
                DataValue::new(target, json!([]))
            } else {
                DataValue::new(target, Value::Null)
            }
        })
    }
}

fn value_source_editors() -> Vec<EditorDefinition> {
    vec![
        EditorDefinition::new("id", "ID", "string"),
        EditorDefinition::new("dataType", "Data Type", "dataTypeSelector"),
        EditorDefinition::new("defaultValue", "Default Value", "anyData"),
        EditorDefinition::new("useDefaultValueInput", "Use Default Value Input", "toggle"),
    ]
}

/// Reads graph input `id`.
pub struct GraphInputNode;

#[async_trait]
impl NodeImpl for GraphInputNode {
    fn input_definitions(&self, node: &Node, _cx: &DefinitionContext<'_>) -> Vec<PortDefinition> {
        node_config::<ValueSourceConfig>(node)
            .map(|c| c.default_input())
            .unwrap_or_default()
    }

    fn output_definitions(&self, node: &Node, _cx: &DefinitionContext<'_>) -> Vec<PortDefinition> {
        let config: ValueSourceConfig = node_config(node).unwrap_or_default();
        vec![PortDefinition::new("data", config.id, config.data_type)]
    }

    fn editors(&self, _node: &Node) -> Vec<EditorDefinition> {
        value_source_editors()
    }

    async fn process(&self, node: &Node, inputs: Inputs, ctx: &NodeContext) -> NodeResult<Outputs> {
        let config: ValueSourceConfig = node_config(node)?;
        let value = config.resolve(ctx.graph_input(&config.id), &inputs);
        Ok(Outputs::from([("data".to_string(), value)]))
    }
}

/// Reads context value `id`.
pub struct ContextNode;

#[async_trait]
impl NodeImpl for ContextNode {
    fn input_definitions(&self, node: &Node, _cx: &DefinitionContext<'_>) -> Vec<PortDefinition> {
        node_config::<ValueSourceConfig>(node)
            .map(|c| c.default_input())
            .unwrap_or_default()
    }

    fn output_definitions(&self, node: &Node, _cx: &DefinitionContext<'_>) -> Vec<PortDefinition> {
        let config: ValueSourceConfig = node_config(node).unwrap_or_default();
        vec![PortDefinition::new("data", config.id, config.data_type)]
    }

    fn editors(&self, _node: &Node) -> Vec<EditorDefinition> {
        value_source_editors()
    }

    async fn process(&self, node: &Node, inputs: Inputs, ctx: &NodeContext) -> NodeResult<Outputs> {
        let config: ValueSourceConfig = node_config(node)?;
        let value = config.resolve(ctx.context_value(&config.id), &inputs);
        Ok(Outputs::from([("data".to_string(), value)]))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphOutputConfig {
    #[serde(default)]
    pub id: String,
    #[serde(default = "default_data_type")]
    pub data_type: DataType,
}

impl Default for GraphOutputConfig {
    fn default() -> Self {
        Self {
            id: String::new(),
            data_type: default_data_type(),
        }
    }
}

/// Publishes `value` as graph output `id`.
pub struct GraphOutputNode;

#[async_trait]
impl NodeImpl for GraphOutputNode {
    fn input_definitions(&self, node: &Node, _cx: &DefinitionContext<'_>) -> Vec<PortDefinition> {
        let config: GraphOutputConfig = node_config(node).unwrap_or_default();
        vec![PortDefinition::new("value", config.id, config.data_type)]
    }

    fn output_definitions(&self, node: &Node, _cx: &DefinitionContext<'_>) -> Vec<PortDefinition> {
        let config: GraphOutputConfig = node_config(node).unwrap_or_default();
        vec![PortDefinition::new("valueOutput", config.id, config.data_type)]
    }

    fn editors(&self, _node: &Node) -> Vec<EditorDefinition> {
        vec![
            EditorDefinition::new("id", "ID", "string"),
            EditorDefinition::new("dataType", "Data Type", "dataTypeSelector"),
        ]
    }

    fn graph_output_id(&self, node: &Node) -> Option<String> {
        node_config::<GraphOutputConfig>(node).ok().map(|c| c.id)
    }

    async fn process(&self, node: &Node, inputs: Inputs, _ctx: &NodeContext) -> NodeResult<Outputs> {
        let config: GraphOutputConfig = node_config(node)?;
        let value = match inputs.get("value") {
            Some(v) if v.is_excluded() => DataValue::excluded(),
            Some(v) => coerce_type_optional(Some(v), config.data_type).unwrap_or_else(|| v.clone()),
            None => DataValue::new(config.data_type, Value::Null),
        };
        Ok(Outputs::from([("valueOutput".to_string(), value)]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_order() {
        let config = ValueSourceConfig {
            id: "x".into(),
            data_type: DataType::NUMBER,
            use_default_value_input: true,
            default_value: json!(7.0),
        };
        let inputs = Inputs::from([("default".to_string(), DataValue::string("3"))]);

        let supplied = DataValue::string("12");
        assert_eq!(config.resolve(Some(&supplied), &inputs), DataValue::number(12.0));
        assert_eq!(config.resolve(None, &inputs), DataValue::number(3.0));
        assert_eq!(config.resolve(None, &Inputs::new()), DataValue::number(7.0));
    }

    #[test]
    fn test_array_type_resolves_to_empty_array() {
        let config = ValueSourceConfig {
            data_type: DataType::STRING.array_of(),
            ..Default::default()
        };
        let value = config.resolve(None, &Inputs::new());
        assert_eq!(value.value(), json!([]));
    }

    #[test]
    fn test_graph_output_id() {
        let node = Node::new("o", "graphOutput").with_data(json!({"id": "answer"}));
        assert_eq!(GraphOutputNode.graph_output_id(&node).as_deref(), Some("answer"));
    }
}
