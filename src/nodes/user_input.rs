//! Pauses a run until an external caller answers.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use super::utils::node_config;
use crate::core::process_context::NodeContext;
use crate::error::NodeResult;
use crate::graph::{Node, PortDefinition};
use crate::nodes::{DefinitionContext, EditorDefinition, NodeImpl};
use crate::value::{DataType, DataValue, Inputs, Outputs};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInputConfig {
    #[serde(default)]
    pub prompt: String,
    /// Take the questions from the `questions` input instead of `prompt`
    #[serde(default)]
    pub use_input: bool,
}

impl UserInputConfig {
    fn questions(&self, inputs: &Inputs) -> Vec<String> {
        if !self.use_input {
            return vec![self.prompt.clone()];
        }
        match inputs.get("questions").map(DataValue::value) {
            Some(Value::Array(items)) => items
                .into_iter()
                .map(|item| match item {
                    Value::String(s) => s,
                    other => other.to_string(),
                })
                .collect(),
            Some(Value::String(s)) => vec![s],
            Some(Value::Null) | None => Vec::new(),
            Some(other) => vec![other.to_string()],
        }
    }
}

pub struct UserInputNode;

#[async_trait]
impl NodeImpl for UserInputNode {
    fn input_definitions(&self, node: &Node, _cx: &DefinitionContext<'_>) -> Vec<PortDefinition> {
        let config: UserInputConfig = node_config(node).unwrap_or_default();
        if config.use_input {
            vec![PortDefinition::new(
                "questions",
                "Questions",
                DataType::STRING.array_of(),
            )]
        } else {
            Vec::new()
        }
    }

    fn output_definitions(&self, _node: &Node, _cx: &DefinitionContext<'_>) -> Vec<PortDefinition> {
        vec![
            PortDefinition::new("output", "Answers Only", DataType::STRING.array_of()),
            PortDefinition::new(
                "questionsAndAnswers",
                "Q & A",
                DataType::STRING.array_of(),
            ),
        ]
    }

    fn editors(&self, _node: &Node) -> Vec<EditorDefinition> {
        vec![
            EditorDefinition::new("prompt", "Prompt", "code"),
            EditorDefinition::new("useInput", "Use Questions Input", "toggle"),
        ]
    }

    async fn process(&self, node: &Node, inputs: Inputs, ctx: &NodeContext) -> NodeResult<Outputs> {
        let config: UserInputConfig = node_config(node)?;
        let questions = config.questions(&inputs);
        let answers = ctx.request_user_input(inputs).await?;

        let pairs = questions
            .iter()
            .zip(answers.iter())
            .map(|(q, a)| format!("Q: {q}\nA: {a}"))
            .collect();

        Ok(Outputs::from([
            ("output".to_string(), DataValue::string_array(answers)),
            (
                "questionsAndAnswers".to_string(),
                DataValue::string_array(pairs),
            ),
        ]))
    }
}
