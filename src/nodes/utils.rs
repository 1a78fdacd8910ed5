use serde::de::DeserializeOwned;
use serde_json::Value;

use super::executor::DefinitionContext;
use crate::error::{NodeError, NodeResult};
use crate::graph::Node;
use crate::value::{DataType, DataValue, ScalarType};

/// Parses a node's `data` into its typed config; absent data yields the default.
pub fn node_config<T: DeserializeOwned + Default>(node: &Node) -> NodeResult<T> {
    match &node.data {
        Value::Null => Ok(T::default()),
        data => serde_json::from_value(data.clone()).map_err(|e| {
            NodeError::ConfigError(format!("node {} ({}): {}", node.title, node.id, e))
        }),
    }
}

/// Highest connected 1-based index among ports named `{prefix}{i}` or
/// `{prefix}{i}{suffix}`.
pub fn highest_connected_index(
    cx: &DefinitionContext<'_>,
    node_id: &str,
    prefix: &str,
    suffix: &str,
) -> usize {
    cx.connections
        .iter()
        .filter(|c| c.input_node_id == node_id)
        .filter_map(|c| {
            let rest = c.input_id.strip_prefix(prefix)?;
            let digits = rest.strip_suffix(suffix).unwrap_or(rest);
            digits.parse::<usize>().ok()
        })
        .max()
        .unwrap_or(0)
}

/// Placeholder payload of a type before anything was produced: an empty
/// array, `""`, `0`, `false`, or null.
pub fn default_payload(data_type: DataType) -> Value {
    if data_type.is_array() {
        return Value::Array(Vec::new());
    }
    match data_type.scalar_type() {
        ScalarType::String => Value::String(String::new()),
        ScalarType::Number => Value::from(0),
        ScalarType::Boolean => Value::Bool(false),
        _ => Value::Null,
    }
}

pub fn default_value(data_type: DataType) -> DataValue {
    DataValue::new(data_type.unwrap_function(), default_payload(data_type.unwrap_function()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Connection, Graph, Project};
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Default, Deserialize, PartialEq)]
    struct Cfg {
        #[serde(default)]
        id: String,
    }

    #[test]
    fn test_node_config() {
        let node = Node::new("n", "x").with_data(json!({"id": "abc"}));
        assert_eq!(node_config::<Cfg>(&node).unwrap().id, "abc");
        let node = Node::new("n", "x").with_data(Value::Null);
        assert_eq!(node_config::<Cfg>(&node).unwrap(), Cfg::default());
        let node = Node::new("n", "x").with_data(json!({"id": 5}));
        assert!(matches!(node_config::<Cfg>(&node), Err(NodeError::ConfigError(_))));
    }

    #[test]
    fn test_default_payload() {
        assert_eq!(default_payload(DataType::STRING), json!(""));
        assert_eq!(default_payload(DataType::NUMBER.array_of()), json!([]));
        assert_eq!(default_payload(DataType::OBJECT), Value::Null);
        assert_eq!(default_value(DataType::BOOLEAN.function_of()), DataValue::boolean(false));
    }

    #[test]
    fn test_highest_connected_index() {
        let project = Project::default();
        let graph = Graph::default();
        let connections = vec![
            Connection::new("a", "output", "n", "input1"),
            Connection::new("a", "output", "n", "input3Default"),
            Connection::new("a", "output", "n", "continue"),
        ];
        let cx = DefinitionContext {
            project: &project,
            graph: &graph,
            connections: &connections,
        };
        assert_eq!(highest_connected_index(&cx, "n", "input", "Default"), 3);
        assert_eq!(highest_connected_index(&cx, "other", "input", "Default"), 0);
    }
}
