use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProcessError;
use crate::value::DataType;

pub type NodeId = String;
pub type PortId = String;
pub type GraphId = String;

/// Editor placement of a node
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisualData {
    pub x: f64,
    pub y: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub z_index: Option<f64>,
}

/// Graph node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    /// Node id, unique within its graph
    pub id: NodeId,

    /// Node kind (text, loopController, subGraph, ...)
    #[serde(rename = "type")]
    pub node_type: String,

    /// Display title
    pub title: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Kind-specific configuration
    #[serde(default)]
    pub data: Value,

    #[serde(default)]
    pub visual_data: VisualData,

    /// Fan out over array inputs, one computation per index
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_split_run: bool,

    /// Upper bound on split-run fan-out; the processor default applies when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub split_run_max: Option<usize>,
}

impl Node {
    pub fn new(id: impl Into<String>, node_type: impl Into<String>) -> Self {
        let node_type = node_type.into();
        Self {
            id: id.into(),
            title: node_type.clone(),
            node_type,
            description: None,
            data: Value::Object(Default::default()),
            visual_data: VisualData::default(),
            is_split_run: false,
            split_run_max: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    pub fn with_split_run(mut self, max: Option<usize>) -> Self {
        self.is_split_run = true;
        self.split_run_max = max;
        self
    }

    pub fn at(mut self, x: f64, y: f64) -> Self {
        self.visual_data.x = x;
        self.visual_data.y = y;
        self
    }
}

/// Directed edge from one node's output port to another node's input port
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    pub output_node_id: NodeId,
    pub output_id: PortId,
    pub input_node_id: NodeId,
    pub input_id: PortId,
}

impl Connection {
    pub fn new(
        output_node_id: impl Into<String>,
        output_id: impl Into<String>,
        input_node_id: impl Into<String>,
        input_id: impl Into<String>,
    ) -> Self {
        Self {
            output_node_id: output_node_id.into(),
            output_id: output_id.into(),
            input_node_id: input_node_id.into(),
            input_id: input_id.into(),
        }
    }
}

/// Port definition, derived per node from its current connections
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortDefinition {
    pub id: PortId,
    pub title: String,
    pub data_type: DataType,
    #[serde(default)]
    pub required: bool,
}

impl PortDefinition {
    pub fn new(id: impl Into<String>, title: impl Into<String>, data_type: DataType) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            data_type,
            required: false,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphMetadata {
    #[serde(default)]
    pub id: GraphId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// A graph of nodes and connections
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Graph {
    #[serde(default)]
    pub metadata: GraphMetadata,
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub connections: Vec<Connection>,
}

impl Graph {
    pub fn id(&self) -> &str {
        &self.metadata.id
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn node(&self, node_id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == node_id)
    }

    /// Rejects duplicate node ids, connections to unknown nodes, and more
    /// than one connection into the same input port.
    pub fn validate(&self) -> Result<(), ProcessError> {
        let mut ids = HashSet::new();
        for node in &self.nodes {
            if !ids.insert(node.id.as_str()) {
                return Err(ProcessError::GraphValidation(format!(
                    "duplicate node id '{}' in graph '{}'",
                    node.id,
                    self.name()
                )));
            }
        }

        let mut targeted = HashSet::new();
        for conn in &self.connections {
            for endpoint in [&conn.output_node_id, &conn.input_node_id] {
                if !ids.contains(endpoint.as_str()) {
                    return Err(ProcessError::GraphValidation(format!(
                        "connection references unknown node '{}'",
                        endpoint
                    )));
                }
            }
            if !targeted.insert((conn.input_node_id.as_str(), conn.input_id.as_str())) {
                return Err(ProcessError::GraphValidation(format!(
                    "input port '{}' of node '{}' has more than one connection",
                    conn.input_id, conn.input_node_id
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectMetadata {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, rename = "mainGraphId", skip_serializing_if = "Option::is_none")]
    pub main_graph_id: Option<GraphId>,
}

/// A set of graphs that may reference each other through sub-graph nodes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Project {
    #[serde(default)]
    pub metadata: ProjectMetadata,
    #[serde(default)]
    pub graphs: BTreeMap<GraphId, Graph>,
}

impl Project {
    pub fn new(metadata: ProjectMetadata) -> Self {
        Self {
            metadata,
            graphs: BTreeMap::new(),
        }
    }

    /// Adds a graph keyed by its metadata id.
    pub fn with_graph(mut self, graph: Graph) -> Self {
        self.graphs.insert(graph.metadata.id.clone(), graph);
        self
    }

    pub fn graph(&self, graph_id: &str) -> Option<&Graph> {
        self.graphs.get(graph_id)
    }

    pub fn graph_by_name(&self, name: &str) -> Option<&Graph> {
        self.graphs.values().find(|g| g.metadata.name == name)
    }

    /// Resolves a graph by id first, then by name.
    pub fn resolve_graph(&self, id_or_name: &str) -> Option<&Graph> {
        self.graph(id_or_name).or_else(|| self.graph_by_name(id_or_name))
    }

    /// Node lookup across every graph, used when replaying recordings.
    pub fn nodes_by_id(&self) -> HashMap<&str, &Node> {
        self.graphs
            .values()
            .flat_map(|g| g.nodes.iter())
            .map(|n| (n.id.as_str(), n))
            .collect()
    }
}
