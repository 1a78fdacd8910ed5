use async_trait::async_trait;

use super::coalesce::variadic_inputs;
use crate::core::process_context::NodeContext;
use crate::error::NodeResult;
use crate::graph::{Node, PortDefinition};
use crate::nodes::{DefinitionContext, NodeImpl};
use crate::value::{DataType, DataValue, Inputs, Outputs};

/// Outputs the first branch to deliver a value. The processor dispatches it as
/// soon as one input holds a value and cancels the slower branches.
pub struct RaceInputsNode;

#[async_trait]
impl NodeImpl for RaceInputsNode {
    fn input_definitions(&self, node: &Node, cx: &DefinitionContext<'_>) -> Vec<PortDefinition> {
        variadic_inputs(node, cx)
    }

    fn output_definitions(&self, _node: &Node, _cx: &DefinitionContext<'_>) -> Vec<PortDefinition> {
        vec![PortDefinition::new("result", "Result", DataType::ANY)]
    }

    async fn process(&self, _node: &Node, inputs: Inputs, _ctx: &NodeContext) -> NodeResult<Outputs> {
        let mut numbered: Vec<(usize, DataValue)> = inputs
            .into_iter()
            .filter_map(|(port, value)| Some((port.strip_prefix("input")?.parse().ok()?, value)))
            .filter(|(_, value)| !value.is_excluded())
            .collect();
        numbered.sort_by_key(|(i, _)| *i);
        let result = numbered
            .into_iter()
            .next()
            .map(|(_, value)| value)
            .unwrap_or_else(DataValue::excluded);
        Ok(Outputs::from([("result".to_string(), result)]))
    }
}
