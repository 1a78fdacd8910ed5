use std::collections::HashMap;
use std::time::Instant;

use async_trait::async_trait;
use serde::Deserialize;

use super::graph_io::{GraphOutputConfig, ValueSourceConfig};
use super::utils::node_config;
use crate::core::process_context::NodeContext;
use crate::error::{NodeError, NodeResult, ProcessError};
use crate::graph::{Graph, Node, PortDefinition};
use crate::nodes::{DefinitionContext, EditorDefinition, NodeImpl};
use crate::value::{DataType, DataValue, GraphInputs, Inputs, Outputs};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubGraphConfig {
    #[serde(default)]
    pub graph_id: String,
    /// Report failures on an `error` port instead of failing the node
    #[serde(default)]
    pub use_error_output: bool,
    /// Fallback values for unconnected graph inputs
    #[serde(default)]
    pub input_data: HashMap<String, DataValue>,
}

/// Graph input ports of `graph`, one per distinct id, sorted by id.
fn graph_inputs_of(graph: &Graph) -> Vec<PortDefinition> {
    let mut ports: Vec<PortDefinition> = graph
        .nodes
        .iter()
        .filter(|n| n.node_type == "graphInput")
        .filter_map(|n| node_config::<ValueSourceConfig>(n).ok())
        .map(|c| PortDefinition::new(c.id.clone(), c.id, c.data_type))
        .collect();
    ports.sort_by(|a, b| a.id.cmp(&b.id));
    ports.dedup_by(|a, b| a.id == b.id);
    ports
}

fn graph_outputs_of(graph: &Graph) -> Vec<PortDefinition> {
    let mut ports: Vec<PortDefinition> = graph
        .nodes
        .iter()
        .filter(|n| n.node_type == "graphOutput")
        .filter_map(|n| node_config::<GraphOutputConfig>(n).ok())
        .map(|c| PortDefinition::new(c.id.clone(), c.id, c.data_type))
        .collect();
    ports.sort_by(|a, b| a.id.cmp(&b.id));
    ports.dedup_by(|a, b| a.id == b.id);
    ports
}

/// Runs another graph of the project on a child processor.
pub struct SubGraphNode;

#[async_trait]
impl NodeImpl for SubGraphNode {
    fn input_definitions(&self, node: &Node, cx: &DefinitionContext<'_>) -> Vec<PortDefinition> {
        let config: SubGraphConfig = node_config(node).unwrap_or_default();
        cx.project
            .graphs
            .get(&config.graph_id)
            .map(graph_inputs_of)
            .unwrap_or_default()
    }

    fn output_definitions(&self, node: &Node, cx: &DefinitionContext<'_>) -> Vec<PortDefinition> {
        let config: SubGraphConfig = node_config(node).unwrap_or_default();
        let mut outputs = cx
            .project
            .graphs
            .get(&config.graph_id)
            .map(graph_outputs_of)
            .unwrap_or_default();
        outputs.push(PortDefinition::new("duration", "duration", DataType::NUMBER));
        if config.use_error_output {
            outputs.push(PortDefinition::new("error", "Error", DataType::STRING));
        }
        outputs
    }

    fn editors(&self, _node: &Node) -> Vec<EditorDefinition> {
        vec![
            EditorDefinition::new("graphId", "Graph", "graphSelector"),
            EditorDefinition::new("useErrorOutput", "Use Error Output", "toggle"),
        ]
    }

    async fn process(&self, node: &Node, inputs: Inputs, ctx: &NodeContext) -> NodeResult<Outputs> {
        let config: SubGraphConfig = node_config(node)?;
        let graph = ctx
            .project()
            .graphs
            .get(&config.graph_id)
            .ok_or_else(|| NodeError::GraphNotFound(config.graph_id.clone()))?;

        let mut sub_inputs = GraphInputs::new();
        for port in graph_inputs_of(graph) {
            let value = inputs
                .get(&port.id)
                .or_else(|| config.input_data.get(&port.id))
                .cloned();
            if let Some(value) = value {
                sub_inputs.insert(port.id, value);
            }
        }
        let output_ports = graph_outputs_of(graph);

        let sub = ctx.create_sub_processor(&config.graph_id)?;
        let started = Instant::now();
        let result = Box::pin(sub.process_graph(
            ctx.process_context(),
            sub_inputs,
            ctx.context_values(),
        ))
        .await;

        match result {
            Ok(mut outputs) => {
                if config.use_error_output {
                    outputs.insert("error".to_string(), DataValue::excluded());
                }
                outputs.entry("duration".to_string()).or_insert_with(|| {
                    DataValue::number(started.elapsed().as_millis() as f64)
                });
                Ok(outputs)
            }
            Err(ProcessError::Aborted(_)) => Err(NodeError::Aborted),
            Err(e) if !config.use_error_output => Err(NodeError::SubGraph(e.to_string())),
            Err(e) => {
                let mut outputs: Outputs = output_ports
                    .into_iter()
                    .map(|p| (p.id, DataValue::excluded()))
                    .collect();
                outputs.insert("error".to_string(), DataValue::string(e.to_string()));
                outputs.insert(
                    "duration".to_string(),
                    DataValue::number(started.elapsed().as_millis() as f64),
                );
                Ok(outputs)
            }
        }
    }
}
