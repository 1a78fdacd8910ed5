use std::sync::OnceLock;

use async_trait::async_trait;
use regex::{Captures, Regex};
use serde::Deserialize;

use super::utils::node_config;
use crate::core::process_context::NodeContext;
use crate::error::NodeResult;
use crate::graph::{Node, PortDefinition};
use crate::nodes::{DefinitionContext, EditorDefinition, NodeImpl};
use crate::value::{coerce_to_string, DataType, DataValue, Inputs, Outputs};

fn tag_pattern() -> Option<&'static Regex> {
    static TAG: OnceLock<Option<Regex>> = OnceLock::new();
    TAG.get_or_init(|| Regex::new(r"\{\{\s*([^{}]+?)\s*\}\}").ok())
        .as_ref()
}

/// Distinct `{{tag}}` names in order of first appearance.
pub fn extract_tags(text: &str) -> Vec<String> {
    let Some(pattern) = tag_pattern() else {
        return Vec::new();
    };
    let mut tags: Vec<String> = Vec::new();
    for caps in pattern.captures_iter(text) {
        let tag = caps[1].to_string();
        if !tags.contains(&tag) {
            tags.push(tag);
        }
    }
    tags
}

/// Replaces every `{{tag}}` with `lookup(tag)`, or nothing when it has no value.
pub fn interpolate(text: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    match tag_pattern() {
        Some(pattern) => pattern
            .replace_all(text, |caps: &Captures<'_>| lookup(&caps[1]).unwrap_or_default())
            .into_owned(),
        None => text.to_string(),
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct TextConfig {
    #[serde(default)]
    pub text: String,
}

/// Interpolated text. Each tag becomes an input port; a tag without a
/// connection falls back to the graph input of the same name.
pub struct TextNode;

#[async_trait]
impl NodeImpl for TextNode {
    fn input_definitions(&self, node: &Node, _cx: &DefinitionContext<'_>) -> Vec<PortDefinition> {
        let config: TextConfig = node_config(node).unwrap_or_default();
        extract_tags(&config.text)
            .into_iter()
            .map(|tag| PortDefinition::new(tag.clone(), tag, DataType::STRING))
            .collect()
    }

    fn output_definitions(&self, _node: &Node, _cx: &DefinitionContext<'_>) -> Vec<PortDefinition> {
        vec![PortDefinition::new("output", "Output", DataType::STRING)]
    }

    fn editors(&self, _node: &Node) -> Vec<EditorDefinition> {
        vec![EditorDefinition::new("text", "Text", "code")]
    }

    async fn process(&self, node: &Node, inputs: Inputs, ctx: &NodeContext) -> NodeResult<Outputs> {
        let config: TextConfig = node_config(node)?;
        let text = interpolate(&config.text, |tag| {
            let value = inputs.get(tag).or_else(|| ctx.graph_input(tag));
            coerce_to_string(value)
        });
        Ok(Outputs::from([("output".to_string(), DataValue::string(text))]))
    }
}
