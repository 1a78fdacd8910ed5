use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use super::utils::{highest_connected_index, node_config};
use crate::core::process_context::NodeContext;
use crate::error::{NodeError, NodeResult};
use crate::graph::{Node, PortDefinition};
use crate::nodes::{DefinitionContext, EditorDefinition, NodeImpl};
use crate::value::{coerce_to_bool, DataType, DataValue, Inputs, Outputs};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AtMaxIterations {
    #[default]
    Error,
    Break,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoopControllerConfig {
    #[serde(default)]
    pub max_iterations: Option<u32>,
    #[serde(default)]
    pub at_max_iterations_action: AtMaxIterations,
}

/// Governs one cycle. While `continue` holds, each `input{i}` (or its
/// default on the first pass) is passed to `output{i}` and `break` reads
/// loop-not-broken; once it fails, `break` carries the current values and
/// every `output{i}` is excluded.
///
/// Controllers never see excluded inputs: the processor excludes the whole
/// loop when any of them arrives excluded.
pub struct LoopControllerNode;

fn loop_port_count(node: &Node, cx: &DefinitionContext<'_>) -> usize {
    highest_connected_index(cx, &node.id, "input", "Default")
}

#[async_trait]
impl NodeImpl for LoopControllerNode {
    fn input_definitions(&self, node: &Node, cx: &DefinitionContext<'_>) -> Vec<PortDefinition> {
        let mut inputs = vec![PortDefinition::new("continue", "Continue", DataType::ANY)];
        for i in 1..=loop_port_count(node, cx) + 1 {
            inputs.push(PortDefinition::new(format!("input{i}"), format!("Input {i}"), DataType::ANY));
            inputs.push(PortDefinition::new(
                format!("input{i}Default"),
                format!("Input {i} Default"),
                DataType::ANY,
            ));
        }
        inputs
    }

    fn output_definitions(&self, node: &Node, cx: &DefinitionContext<'_>) -> Vec<PortDefinition> {
        let mut outputs = vec![
            PortDefinition::new("break", "Break", DataType::ANY.array_of()),
            PortDefinition::new("iteration", "Iteration", DataType::NUMBER),
        ];
        for i in 1..=loop_port_count(node, cx) {
            outputs.push(PortDefinition::new(format!("output{i}"), format!("Output {i}"), DataType::ANY));
        }
        outputs
    }

    fn editors(&self, _node: &Node) -> Vec<EditorDefinition> {
        vec![
            EditorDefinition::new("maxIterations", "Max Iterations", "number"),
            EditorDefinition::new("atMaxIterationsAction", "At Max Iterations", "dropdown"),
        ]
    }

    async fn process(&self, node: &Node, inputs: Inputs, ctx: &NodeContext) -> NodeResult<Outputs> {
        let config: LoopControllerConfig = node_config(node)?;
        let mut outputs = Outputs::new();

        let mut count = 0;
        while inputs.contains_key(&format!("input{}", count + 1))
            || inputs.contains_key(&format!("input{}Default", count + 1))
        {
            count += 1;
        }

        let iteration = ctx.loop_iteration();
        let max = config
            .max_iterations
            .unwrap_or(ctx.config().max_loop_iterations);
        outputs.insert(
            "iteration".to_string(),
            DataValue::number(f64::from(iteration + 1)),
        );

        let at_max = iteration >= max;
        if at_max && config.at_max_iterations_action == AtMaxIterations::Error {
            return Err(NodeError::MaxIterationsExceeded {
                title: node.title.clone(),
                max,
            });
        }

        let keep_going = !at_max
            && match inputs.get("continue") {
                None => true,
                v => coerce_to_bool(v),
            };

        let current = |i: usize| {
            inputs
                .get(&format!("input{i}"))
                .or_else(|| inputs.get(&format!("input{i}Default")))
        };

        if keep_going {
            outputs.insert("break".to_string(), DataValue::loop_not_broken());
            for i in 1..=count {
                if let Some(value) = current(i) {
                    outputs.insert(format!("output{i}"), value.clone());
                }
            }
        } else {
            let values: Vec<Value> = (1..=count)
                .map(|i| current(i).map(DataValue::value).unwrap_or(Value::Null))
                .collect();
            outputs.insert(
                "break".to_string(),
                DataValue::new(DataType::ANY.array_of(), Value::Array(values)),
            );
            for i in 1..=count {
                outputs.insert(format!("output{i}"), DataValue::excluded());
            }
        }
        Ok(outputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Connection, Graph, Project};
    use serde_json::json;

    #[test]
    fn test_ports_grow_with_connections() {
        let project = Project::default();
        let graph = Graph::default();
        let connections = vec![
            Connection::new("a", "output", "loop", "input1Default"),
            Connection::new("b", "output", "loop", "input2"),
        ];
        let cx = DefinitionContext {
            project: &project,
            graph: &graph,
            connections: &connections,
        };
        let node = Node::new("loop", "loopController");
        let inputs = LoopControllerNode.input_definitions(&node, &cx);
        // continue + three input pairs
        assert_eq!(inputs.len(), 7);
        let outputs = LoopControllerNode.output_definitions(&node, &cx);
        let ids: Vec<&str> = outputs.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["break", "iteration", "output1", "output2"]);
    }

    #[test]
    fn test_config_parsing() {
        let node = Node::new("loop", "loopController")
            .with_data(json!({"maxIterations": 3, "atMaxIterationsAction": "break"}));
        let config: LoopControllerConfig = node_config(&node).unwrap();
        assert_eq!(config.max_iterations, Some(3));
        assert_eq!(config.at_max_iterations_action, AtMaxIterations::Break);
        let config: LoopControllerConfig =
            node_config(&Node::new("loop", "loopController")).unwrap();
        assert_eq!(config.at_max_iterations_action, AtMaxIterations::Error);
    }
}
