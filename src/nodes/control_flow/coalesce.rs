use async_trait::async_trait;

use crate::core::process_context::NodeContext;
use crate::error::NodeResult;
use crate::graph::{Node, PortDefinition};
use crate::nodes::utils::highest_connected_index;
use crate::nodes::{DefinitionContext, NodeImpl};
use crate::value::{coerce_to_bool, DataType, DataValue, Inputs, Outputs};

/// Variadic `input{i}` ports: every connected one plus a free slot.
pub(crate) fn variadic_inputs(node: &Node, cx: &DefinitionContext<'_>) -> Vec<PortDefinition> {
    let count = highest_connected_index(cx, &node.id, "input", "") + 1;
    (1..=count)
        .map(|i| PortDefinition::new(format!("input{i}"), format!("Input {i}"), DataType::ANY))
        .collect()
}

/// Outputs the first input that is neither excluded nor falsy.
pub struct CoalesceNode;

#[async_trait]
impl NodeImpl for CoalesceNode {
    fn input_definitions(&self, node: &Node, cx: &DefinitionContext<'_>) -> Vec<PortDefinition> {
        let mut inputs = vec![PortDefinition::new("conditional", "Conditional", DataType::ANY)];
        inputs.extend(variadic_inputs(node, cx));
        inputs
    }

    fn output_definitions(&self, _node: &Node, _cx: &DefinitionContext<'_>) -> Vec<PortDefinition> {
        vec![PortDefinition::new("output", "Output", DataType::ANY)]
    }

    async fn process(&self, _node: &Node, inputs: Inputs, _ctx: &NodeContext) -> NodeResult<Outputs> {
        // An excluded conditional lets the coalesce itself be excluded.
        if inputs.get("conditional").is_some_and(DataValue::is_excluded) {
            return Ok(Outputs::from([("output".to_string(), DataValue::excluded())]));
        }

        let mut numbered: Vec<(usize, &DataValue)> = inputs
            .iter()
            .filter_map(|(port, value)| Some((port.strip_prefix("input")?.parse().ok()?, value)))
            .collect();
        numbered.sort_by_key(|(i, _)| *i);
        let chosen = numbered
            .into_iter()
            .map(|(_, value)| value)
            .find(|v| !v.is_excluded() && coerce_to_bool(Some(v)))
            .cloned()
            .unwrap_or_else(DataValue::excluded);
        Ok(Outputs::from([("output".to_string(), chosen)]))
    }
}

/// Forwards every `input{i}` to `output{i}`.
pub struct PassthroughNode;

#[async_trait]
impl NodeImpl for PassthroughNode {
    fn input_definitions(&self, node: &Node, cx: &DefinitionContext<'_>) -> Vec<PortDefinition> {
        variadic_inputs(node, cx)
    }

    fn output_definitions(&self, node: &Node, cx: &DefinitionContext<'_>) -> Vec<PortDefinition> {
        let count = highest_connected_index(cx, &node.id, "input", "");
        (1..=count)
            .map(|i| PortDefinition::new(format!("output{i}"), format!("Output {i}"), DataType::ANY))
            .collect()
    }

    async fn process(&self, _node: &Node, inputs: Inputs, _ctx: &NodeContext) -> NodeResult<Outputs> {
        Ok(inputs
            .into_iter()
            .filter_map(|(port, value)| {
                let index = port.strip_prefix("input")?;
                Some((format!("output{index}"), value))
            })
            .collect())
    }
}
