//! Versioned graph and project files.
//!
//! Files are a `{version, data}` envelope. Version 3 (written by default) keys
//! nodes by id, stores each node's outgoing connections as sorted
//! `port->"Title" nodeId/port` strings and its placement as `x/y/width/zIndex`.
//! Version 2 is the plain structured form and version 1 the bare graph or
//! project without an envelope. Readers try 3, then 2, then 1.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::types::{
    Connection, Graph, GraphId, GraphMetadata, Node, NodeId, Project, ProjectMetadata, VisualData,
};
use crate::error::SerializationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatVersion {
    V1,
    V2,
    V3,
}

impl FormatVersion {
    pub const CURRENT: FormatVersion = FormatVersion::V3;

    pub fn number(&self) -> u64 {
        match self {
            FormatVersion::V1 => 1,
            FormatVersion::V2 => 2,
            FormatVersion::V3 => 3,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct Envelope<T> {
    version: u64,
    data: T,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SerializedNode {
    #[serde(rename = "type")]
    node_type: String,
    title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    visual_data: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    is_split_run: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    split_run_max: Option<usize>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    data: Value,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    outgoing_connections: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SerializedGraph {
    #[serde(default)]
    metadata: GraphMetadata,
    nodes: BTreeMap<NodeId, SerializedNode>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SerializedProject {
    #[serde(default)]
    metadata: ProjectMetadata,
    graphs: BTreeMap<GraphId, SerializedGraph>,
}

/// Bare version 1 graph; `nodes` must be present.
#[derive(Deserialize)]
struct BareGraph {
    #[serde(default)]
    metadata: GraphMetadata,
    nodes: Vec<Node>,
    #[serde(default)]
    connections: Vec<Connection>,
}

/// Bare version 1 project; `graphs` must be present.
#[derive(Deserialize)]
struct BareProject {
    #[serde(default)]
    metadata: ProjectMetadata,
    graphs: BTreeMap<GraphId, BareGraph>,
}

impl From<BareGraph> for Graph {
    fn from(g: BareGraph) -> Self {
        Graph {
            metadata: g.metadata,
            nodes: g.nodes,
            connections: g.connections,
        }
    }
}

fn format_opt(value: Option<f64>) -> String {
    value.map_or_else(|| "null".to_string(), |v| v.to_string())
}

pub fn encode_visual_data(v: &VisualData) -> String {
    format!("{}/{}/{}/{}", v.x, v.y, format_opt(v.width), format_opt(v.z_index))
}

pub fn decode_visual_data(s: &str) -> Result<VisualData, SerializationError> {
    let invalid = || SerializationError::InvalidVisualData(s.to_string());
    let parts: Vec<&str> = s.split('/').collect();
    let [x, y, width, z_index] = parts.as_slice() else {
        return Err(invalid());
    };
    let opt = |p: &str| -> Result<Option<f64>, SerializationError> {
        if p == "null" {
            Ok(None)
        } else {
            p.parse().map(Some).map_err(|_| invalid())
        }
    };
    Ok(VisualData {
        x: x.parse().map_err(|_| invalid())?,
        y: y.parse().map_err(|_| invalid())?,
        width: opt(width)?,
        z_index: opt(z_index)?,
    })
}

pub fn encode_connection(conn: &Connection, input_node_title: &str) -> String {
    format!(
        "{}->\"{}\" {}/{}",
        conn.output_id, input_node_title, conn.input_node_id, conn.input_id
    )
}

/// Parses a version 3 connection string belonging to `output_node_id`.
pub fn decode_connection(output_node_id: &str, s: &str) -> Result<Connection, SerializationError> {
    let invalid = || SerializationError::InvalidConnection(s.to_string());
    let (output_id, rest) = s.split_once("->").ok_or_else(invalid)?;
    let (title, target) = rest.rsplit_once(' ').ok_or_else(invalid)?;
    if !(title.starts_with('"') && title.ends_with('"') && title.len() >= 2) {
        return Err(invalid());
    }
    let (input_node_id, input_id) = target.split_once('/').ok_or_else(invalid)?;
    if output_id.is_empty() || input_node_id.is_empty() || input_id.is_empty() {
        return Err(invalid());
    }
    Ok(Connection::new(output_node_id, output_id, input_node_id, input_id))
}

fn to_serialized_graph(graph: &Graph) -> Result<SerializedGraph, SerializationError> {
    let titles: BTreeMap<&str, &str> = graph
        .nodes
        .iter()
        .map(|n| (n.id.as_str(), n.title.as_str()))
        .collect();

    let mut nodes = BTreeMap::new();
    for node in &graph.nodes {
        let mut outgoing = graph
            .connections
            .iter()
            .filter(|c| c.output_node_id == node.id)
            .map(|c| {
                titles
                    .get(c.input_node_id.as_str())
                    .map(|title| encode_connection(c, title))
                    .ok_or_else(|| SerializationError::UnknownConnectionTarget {
                        node_id: node.id.clone(),
                        target: c.input_node_id.clone(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        outgoing.sort();

        nodes.insert(
            node.id.clone(),
            SerializedNode {
                node_type: node.node_type.clone(),
                title: node.title.clone(),
                description: node.description.clone(),
                visual_data: encode_visual_data(&node.visual_data),
                is_split_run: node.is_split_run,
                split_run_max: node.split_run_max,
                data: node.data.clone(),
                outgoing_connections: outgoing,
            },
        );
    }

    Ok(SerializedGraph {
        metadata: graph.metadata.clone(),
        nodes,
    })
}

fn from_serialized_graph(serialized: SerializedGraph) -> Result<Graph, SerializationError> {
    let mut nodes = Vec::with_capacity(serialized.nodes.len());
    let mut connections = Vec::new();
    for (id, node) in &serialized.nodes {
        for s in &node.outgoing_connections {
            let conn = decode_connection(id, s)?;
            if !serialized.nodes.contains_key(&conn.input_node_id) {
                return Err(SerializationError::UnknownConnectionTarget {
                    node_id: id.clone(),
                    target: conn.input_node_id,
                });
            }
            connections.push(conn);
        }
    }
    for (id, node) in serialized.nodes {
        nodes.push(Node {
            id,
            node_type: node.node_type,
            title: node.title,
            description: node.description,
            data: node.data,
            visual_data: decode_visual_data(&node.visual_data)?,
            is_split_run: node.is_split_run,
            split_run_max: node.split_run_max,
        });
    }
    Ok(Graph {
        metadata: serialized.metadata,
        nodes,
        connections,
    })
}

fn envelope_data<T: DeserializeOwned>(value: &Value, version: u64) -> Result<T, String> {
    match value.get("version").and_then(Value::as_u64) {
        Some(found) if found == version => {
            let data = value.get("data").cloned().unwrap_or(Value::Null);
            serde_json::from_value(data).map_err(|e| format!("v{}: {}", version, e))
        }
        Some(found) => Err(format!("v{}: found version {}", version, found)),
        None => Err(format!("v{}: missing version envelope", version)),
    }
}

pub fn serialize_graph(graph: &Graph) -> Result<String, SerializationError> {
    serialize_graph_as(graph, FormatVersion::CURRENT)
}

pub fn serialize_graph_as(graph: &Graph, version: FormatVersion) -> Result<String, SerializationError> {
    let text = match version {
        FormatVersion::V3 => serde_json::to_string_pretty(&Envelope {
            version: 3,
            data: to_serialized_graph(graph)?,
        })?,
        FormatVersion::V2 => serde_json::to_string_pretty(&Envelope {
            version: 2,
            data: graph,
        })?,
        FormatVersion::V1 => serde_json::to_string_pretty(graph)?,
    };
    Ok(text)
}

pub fn deserialize_graph(text: &str) -> Result<Graph, SerializationError> {
    let value: Value = serde_json::from_str(text)?;
    let mut attempts = Vec::new();

    match envelope_data::<SerializedGraph>(&value, 3) {
        Ok(serialized) => match from_serialized_graph(serialized) {
            Ok(graph) => return Ok(graph),
            Err(e) => attempts.push(format!("v3: {}", e)),
        },
        Err(e) => attempts.push(e),
    }
    match envelope_data::<Graph>(&value, 2) {
        Ok(graph) => return Ok(graph),
        Err(e) => attempts.push(e),
    }
    match serde_json::from_value::<BareGraph>(value) {
        Ok(graph) => return Ok(graph.into()),
        Err(e) => attempts.push(format!("v1: {}", e)),
    }

    tracing::warn!(?attempts, "graph deserialization failed for every version");
    Err(SerializationError::Exhausted {
        what: "graph".to_string(),
        attempts,
    })
}

pub fn serialize_project(project: &Project) -> Result<String, SerializationError> {
    serialize_project_as(project, FormatVersion::CURRENT)
}

pub fn serialize_project_as(
    project: &Project,
    version: FormatVersion,
) -> Result<String, SerializationError> {
    let text = match version {
        FormatVersion::V3 => {
            let graphs = project
                .graphs
                .iter()
                .map(|(id, g)| Ok((id.clone(), to_serialized_graph(g)?)))
                .collect::<Result<BTreeMap<_, _>, SerializationError>>()?;
            serde_json::to_string_pretty(&Envelope {
                version: 3,
                data: SerializedProject {
                    metadata: project.metadata.clone(),
                    graphs,
                },
            })?
        }
        FormatVersion::V2 => serde_json::to_string_pretty(&Envelope {
            version: 2,
            data: project,
        })?,
        FormatVersion::V1 => serde_json::to_string_pretty(project)?,
    };
    Ok(text)
}

pub fn deserialize_project(text: &str) -> Result<Project, SerializationError> {
    let value: Value = serde_json::from_str(text)?;
    let mut attempts = Vec::new();

    match envelope_data::<SerializedProject>(&value, 3) {
        Ok(serialized) => {
            let converted = serialized
                .graphs
                .into_iter()
                .map(|(id, g)| Ok((id, from_serialized_graph(g)?)))
                .collect::<Result<BTreeMap<_, _>, SerializationError>>();
            match converted {
                Ok(graphs) => {
                    return Ok(Project {
                        metadata: serialized.metadata,
                        graphs,
                    })
                }
                Err(e) => attempts.push(format!("v3: {}", e)),
            }
        }
        Err(e) => attempts.push(e),
    }
    match envelope_data::<Project>(&value, 2) {
        Ok(project) => return Ok(project),
        Err(e) => attempts.push(e),
    }
    match serde_json::from_value::<BareProject>(value) {
        Ok(project) => {
            return Ok(Project {
                metadata: project.metadata,
                graphs: project
                    .graphs
                    .into_iter()
                    .map(|(id, g)| (id, g.into()))
                    .collect(),
            })
        }
        Err(e) => attempts.push(format!("v1: {}", e)),
    }

    tracing::warn!(?attempts, "project deserialization failed for every version");
    Err(SerializationError::Exhausted {
        what: "project".to_string(),
        attempts,
    })
}
