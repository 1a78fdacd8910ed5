//! Invokes a host-registered external function by name.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::utils::node_config;
use crate::core::process_context::NodeContext;
use crate::core::retry::{retry_with_backoff, RetryConfig};
use crate::error::{NodeError, NodeResult};
use crate::graph::{Node, PortDefinition};
use crate::nodes::{DefinitionContext, EditorDefinition, NodeImpl};
use crate::value::{coerce_type, infer_type, DataType, DataValue, Inputs, Outputs};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalCallConfig {
    #[serde(default)]
    pub function_name: String,
    #[serde(default)]
    pub use_function_name_input: bool,
    #[serde(default)]
    pub use_error_output: bool,
    /// Reuse results of identical calls within the processor tree
    #[serde(default)]
    pub cache: bool,
    /// Retry transient and rate-limited failures
    #[serde(default)]
    pub retry: Option<RetryConfig>,
}

/// `arguments` as a list: arrays are spread, anything else is one argument.
fn call_arguments(inputs: &Inputs) -> Vec<DataValue> {
    let Some(arguments) = inputs.get("arguments") else {
        return Vec::new();
    };
    match arguments.value() {
        Value::Array(items) => {
            let element_type = arguments.data_type.element_type();
            items
                .into_iter()
                .map(|item| {
                    let data_type = if element_type == DataType::ANY {
                        infer_type(&item)
                    } else {
                        element_type
                    };
                    DataValue::new(data_type, item)
                })
                .collect()
        }
        _ => vec![arguments.clone()],
    }
}

fn cache_key(name: &str, args: &[DataValue]) -> String {
    let values: Vec<Value> = args.iter().map(DataValue::value).collect();
    format!("externalCall:{name}:{}", Value::Array(values))
}

fn error_outputs(message: String) -> Outputs {
    Outputs::from([
        ("result".to_string(), DataValue::excluded()),
        ("error".to_string(), DataValue::string(message)),
    ])
}

pub struct ExternalCallNode;

#[async_trait]
impl NodeImpl for ExternalCallNode {
    fn input_definitions(&self, node: &Node, _cx: &DefinitionContext<'_>) -> Vec<PortDefinition> {
        let config: ExternalCallConfig = node_config(node).unwrap_or_default();
        let mut inputs = Vec::new();
        if config.use_function_name_input {
            inputs.push(PortDefinition::new(
                "functionName",
                "Function Name",
                DataType::STRING,
            ));
        }
        inputs.push(PortDefinition::new(
            "arguments",
            "Arguments",
            DataType::ANY.array_of(),
        ));
        inputs
    }

    fn output_definitions(&self, node: &Node, _cx: &DefinitionContext<'_>) -> Vec<PortDefinition> {
        let config: ExternalCallConfig = node_config(node).unwrap_or_default();
        let mut outputs = vec![PortDefinition::new("result", "Result", DataType::ANY)];
        if config.use_error_output {
            outputs.push(PortDefinition::new("error", "Error", DataType::STRING));
        }
        outputs
    }

    fn editors(&self, _node: &Node) -> Vec<EditorDefinition> {
        vec![
            EditorDefinition::new("functionName", "Function Name", "string"),
            EditorDefinition::new("useErrorOutput", "Use Error Output", "toggle"),
            EditorDefinition::new("cache", "Cache", "toggle"),
        ]
    }

    async fn process(&self, node: &Node, inputs: Inputs, ctx: &NodeContext) -> NodeResult<Outputs> {
        let config: ExternalCallConfig = node_config(node)?;
        let name = if config.use_function_name_input {
            coerce_type(inputs.get("functionName"), DataType::STRING)?
                .as_str()
                .unwrap_or_default()
                .to_string()
        } else {
            config.function_name.clone()
        };

        let Some(function) = ctx.external_function(&name) else {
            if config.use_error_output {
                return Ok(error_outputs(format!("Function {name} not found")));
            }
            return Err(NodeError::ExternalFunctionNotFound(name));
        };

        let args = call_arguments(&inputs);
        let key = cache_key(&name, &args);
        if config.cache {
            if let Some(hit) = ctx.execution_cache().get::<DataValue>(&key) {
                debug!(function = %name, "external call served from cache");
                return Ok(Outputs::from([("result".to_string(), (*hit).clone())]));
            }
        }

        let result = match &config.retry {
            Some(retry) => {
                retry_with_backoff(retry, ctx, |_| function(args.clone())).await
            }
            None => function(args).await,
        };

        match result {
            Ok(value) => {
                if config.cache {
                    ctx.execution_cache().insert(key, value.clone());
                }
                let mut outputs = Outputs::from([("result".to_string(), value)]);
                if config.use_error_output {
                    outputs.insert("error".to_string(), DataValue::excluded());
                }
                Ok(outputs)
            }
            Err(NodeError::Aborted) => Err(NodeError::Aborted),
            Err(e) if config.use_error_output => Ok(error_outputs(e.to_string())),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_scalar_argument_is_wrapped() {
        let inputs = Inputs::from([("arguments".to_string(), DataValue::number(3.0))]);
        let args = call_arguments(&inputs);
        assert_eq!(args.len(), 1);
        assert_eq!(args[0].value(), json!(3.0));
    }

    #[test]
    fn test_array_arguments_are_spread() {
        let inputs = Inputs::from([(
            "arguments".to_string(),
            DataValue::new(DataType::ANY.array_of(), json!(["a", 2])),
        )]);
        let args = call_arguments(&inputs);
        assert_eq!(args.len(), 2);
        assert_eq!(args[0].data_type, DataType::STRING);
        assert_eq!(args[1].data_type, DataType::NUMBER);
    }

    #[test]
    fn test_cache_key_depends_on_arguments() {
        let a = cache_key("f", &[DataValue::number(1.0)]);
        let b = cache_key("f", &[DataValue::number(2.0)]);
        assert_ne!(a, b);
    }
}
