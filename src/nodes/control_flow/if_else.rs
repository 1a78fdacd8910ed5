use async_trait::async_trait;
use serde_json::Value;

use crate::core::process_context::NodeContext;
use crate::error::NodeResult;
use crate::graph::{Node, PortDefinition};
use crate::nodes::{DefinitionContext, NodeImpl};
use crate::value::{coerce_to_bool, DataType, DataValue, Inputs, Outputs};

/// An excluded or missing condition counts as false.
fn condition(inputs: &Inputs) -> bool {
    match inputs.get("if") {
        Some(v) if v.is_excluded() => false,
        v => coerce_to_bool(v),
    }
}

/// Routes `value` to `output` when `if` holds, to `falseOutput` otherwise.
pub struct IfNode;

#[async_trait]
impl NodeImpl for IfNode {
    fn input_definitions(&self, _node: &Node, _cx: &DefinitionContext<'_>) -> Vec<PortDefinition> {
        vec![
            PortDefinition::new("if", "If", DataType::ANY),
            PortDefinition::new("value", "Value", DataType::ANY),
        ]
    }

    fn output_definitions(&self, _node: &Node, _cx: &DefinitionContext<'_>) -> Vec<PortDefinition> {
        vec![
            PortDefinition::new("output", "True", DataType::ANY),
            PortDefinition::new("falseOutput", "False", DataType::ANY),
        ]
    }

    async fn process(&self, _node: &Node, inputs: Inputs, _ctx: &NodeContext) -> NodeResult<Outputs> {
        let value = inputs
            .get("value")
            .cloned()
            .unwrap_or_else(|| DataValue::any(Value::Null));

        let mut outputs = Outputs::new();
        if value.is_excluded() {
            outputs.insert("output".to_string(), DataValue::excluded());
            outputs.insert("falseOutput".to_string(), DataValue::excluded());
            return Ok(outputs);
        }

        let (taken, other) = if condition(&inputs) {
            ("output", "falseOutput")
        } else {
            ("falseOutput", "output")
        };
        outputs.insert(taken.to_string(), value);
        outputs.insert(other.to_string(), DataValue::excluded());
        Ok(outputs)
    }
}

/// Picks `true` or `false` depending on `if`.
pub struct IfElseNode;

#[async_trait]
impl NodeImpl for IfElseNode {
    fn input_definitions(&self, _node: &Node, _cx: &DefinitionContext<'_>) -> Vec<PortDefinition> {
        vec![
            PortDefinition::new("if", "If", DataType::ANY),
            PortDefinition::new("true", "True", DataType::ANY),
            PortDefinition::new("false", "False", DataType::ANY),
        ]
    }

    fn output_definitions(&self, _node: &Node, _cx: &DefinitionContext<'_>) -> Vec<PortDefinition> {
        vec![PortDefinition::new("output", "Output", DataType::ANY)]
    }

    async fn process(&self, _node: &Node, inputs: Inputs, _ctx: &NodeContext) -> NodeResult<Outputs> {
        let branch = if condition(&inputs) { "true" } else { "false" };
        let chosen = inputs
            .get(branch)
            .cloned()
            .unwrap_or_else(DataValue::excluded);
        Ok(Outputs::from([("output".to_string(), chosen)]))
    }
}
