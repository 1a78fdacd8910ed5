#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use xflow::core::NodeContext;
use xflow::graph::ProjectMetadata;
use xflow::nodes::DefinitionContext;
use xflow::value::coerce_to_number;
use xflow::{
    DataType, DataValue, Graph, GraphProcessor, Inputs, Node, NodeError, NodeImpl, NodeRegistry,
    NodeResult, Outputs, PortDefinition, ProcessEvent, ProcessorOptions, Project,
};

fn number_config(node: &Node, key: &str) -> f64 {
    node.data.get(key).and_then(Value::as_f64).unwrap_or(0.0)
}

/// Emits the configured `value` as a number.
pub struct NumberNode;

#[async_trait]
impl NodeImpl for NumberNode {
    fn input_definitions(&self, _: &Node, _: &DefinitionContext<'_>) -> Vec<PortDefinition> {
        Vec::new()
    }

    fn output_definitions(&self, _: &Node, _: &DefinitionContext<'_>) -> Vec<PortDefinition> {
        vec![PortDefinition::new("value", "Value", DataType::NUMBER)]
    }

    async fn process(&self, node: &Node, _: Inputs, _: &NodeContext) -> NodeResult<Outputs> {
        Ok(Outputs::from([(
            "value".to_string(),
            DataValue::number(number_config(node, "value")),
        )]))
    }
}

/// `out = in + 1`
pub struct IncrementNode;

#[async_trait]
impl NodeImpl for IncrementNode {
    fn input_definitions(&self, _: &Node, _: &DefinitionContext<'_>) -> Vec<PortDefinition> {
        vec![PortDefinition::new("in", "In", DataType::NUMBER)]
    }

    fn output_definitions(&self, _: &Node, _: &DefinitionContext<'_>) -> Vec<PortDefinition> {
        vec![PortDefinition::new("out", "Out", DataType::NUMBER)]
    }

    async fn process(&self, _: &Node, inputs: Inputs, _: &NodeContext) -> NodeResult<Outputs> {
        let n = coerce_to_number(inputs.get("in")).unwrap_or(0.0);
        Ok(Outputs::from([("out".to_string(), DataValue::number(n + 1.0))]))
    }
}

/// `result = in < limit`
pub struct LessThanNode;

#[async_trait]
impl NodeImpl for LessThanNode {
    fn input_definitions(&self, _: &Node, _: &DefinitionContext<'_>) -> Vec<PortDefinition> {
        vec![PortDefinition::new("in", "In", DataType::NUMBER)]
    }

    fn output_definitions(&self, _: &Node, _: &DefinitionContext<'_>) -> Vec<PortDefinition> {
        vec![PortDefinition::new("result", "Result", DataType::BOOLEAN)]
    }

    async fn process(&self, node: &Node, inputs: Inputs, _: &NodeContext) -> NodeResult<Outputs> {
        let n = coerce_to_number(inputs.get("in")).unwrap_or(0.0);
        Ok(Outputs::from([(
            "result".to_string(),
            DataValue::boolean(n < number_config(node, "limit")),
        )]))
    }
}

/// Always fails.
pub struct FailNode;

#[async_trait]
impl NodeImpl for FailNode {
    fn input_definitions(&self, _: &Node, _: &DefinitionContext<'_>) -> Vec<PortDefinition> {
        vec![PortDefinition::new("in", "In", DataType::ANY)]
    }

    fn output_definitions(&self, _: &Node, _: &DefinitionContext<'_>) -> Vec<PortDefinition> {
        vec![PortDefinition::new("out", "Out", DataType::ANY)]
    }

    async fn process(&self, _: &Node, _: Inputs, _: &NodeContext) -> NodeResult<Outputs> {
        Err(NodeError::ExecutionError("boom".to_string()))
    }
}

/// Sleeps `ms` milliseconds, then forwards `in` (or `true`) to `out`.
pub struct SlowNode;

#[async_trait]
impl NodeImpl for SlowNode {
    fn input_definitions(&self, _: &Node, _: &DefinitionContext<'_>) -> Vec<PortDefinition> {
        vec![PortDefinition::new("in", "In", DataType::ANY)]
    }

    fn output_definitions(&self, _: &Node, _: &DefinitionContext<'_>) -> Vec<PortDefinition> {
        vec![PortDefinition::new("out", "Out", DataType::ANY)]
    }

    async fn process(&self, node: &Node, inputs: Inputs, _: &NodeContext) -> NodeResult<Outputs> {
        let ms = number_config(node, "ms") as u64;
        tokio::time::sleep(Duration::from_millis(ms)).await;
        let value = inputs
            .get("in")
            .cloned()
            .unwrap_or_else(|| DataValue::boolean(true));
        Ok(Outputs::from([("out".to_string(), value)]))
    }
}

/// Joins `a` and `b` as `"a-b"`; a missing side reads `none`. Fails on `b == 2`
/// when `failOnTwo` is set.
pub struct PairNode;

#[async_trait]
impl NodeImpl for PairNode {
    fn input_definitions(&self, _: &Node, _: &DefinitionContext<'_>) -> Vec<PortDefinition> {
        vec![
            PortDefinition::new("a", "A", DataType::ANY),
            PortDefinition::new("b", "B", DataType::ANY),
        ]
    }

    fn output_definitions(&self, _: &Node, _: &DefinitionContext<'_>) -> Vec<PortDefinition> {
        vec![PortDefinition::new("out", "Out", DataType::STRING)]
    }

    async fn process(&self, node: &Node, inputs: Inputs, ctx: &NodeContext) -> NodeResult<Outputs> {
        let side = |port: &str| {
            inputs
                .get(port)
                .and_then(|v| coerce_to_number(Some(v)))
                .map(|n| n.to_string())
                .unwrap_or_else(|| "none".to_string())
        };
        let fail_on_two = node.data.get("failOnTwo").and_then(Value::as_bool).unwrap_or(false);
        if fail_on_two && side("b") == "2" {
            return Err(NodeError::ExecutionError(format!(
                "bad value at index {}",
                ctx.split_index()
            )));
        }
        Ok(Outputs::from([(
            "out".to_string(),
            DataValue::string(format!("{}-{}", side("a"), side("b"))),
        )]))
    }
}

/// Built-in node kinds plus the test nodes above.
pub fn registry() -> Arc<NodeRegistry> {
    let mut registry = NodeRegistry::new();
    registry.register("number", NumberNode);
    registry.register("increment", IncrementNode);
    registry.register("lessThan", LessThanNode);
    registry.register("fail", FailNode);
    registry.register("slow", SlowNode);
    registry.register("pair", PairNode);
    Arc::new(registry)
}

pub fn project(graphs: Vec<Graph>) -> Arc<Project> {
    let mut project = Project::new(ProjectMetadata {
        id: "test-project".into(),
        title: "Test".into(),
        ..Default::default()
    });
    for graph in graphs {
        project = project.with_graph(graph);
    }
    Arc::new(project)
}

pub fn processor(project: Arc<Project>, graph_id: &str) -> GraphProcessor {
    GraphProcessor::with_options(
        project,
        graph_id,
        ProcessorOptions {
            registry: registry(),
            ..Default::default()
        },
    )
    .unwrap()
}

/// Every event emitted on the processor's bus, in order.
#[derive(Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<ProcessEvent>>>,
}

impl EventLog {
    pub fn attach(processor: &GraphProcessor) -> Self {
        let log = Self::default();
        let events = log.events.clone();
        processor.on_any(move |event| events.lock().push(event.clone()));
        log
    }

    pub fn events(&self) -> Vec<ProcessEvent> {
        self.events.lock().clone()
    }

    /// Event names without trace noise.
    pub fn names(&self) -> Vec<String> {
        self.events()
            .iter()
            .filter(|e| !matches!(e, ProcessEvent::Trace { .. }))
            .map(|e| e.name().to_string())
            .collect()
    }

    /// `(event name, node id)` for node-scoped events.
    pub fn node_events(&self) -> Vec<(String, String)> {
        self.events()
            .iter()
            .filter_map(|e| Some((e.name().to_string(), e.node_id()?.to_string())))
            .filter(|(name, _)| name != "partialOutput")
            .collect()
    }

    pub fn count(&self, name: &str, node_id: &str) -> usize {
        self.node_events()
            .iter()
            .filter(|(n, id)| n == name && id == node_id)
            .count()
    }
}
