use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::event_bus::ProcessEvent;
use crate::core::process_context::Settings;
use crate::error::SerializationError;
use crate::graph::{deserialize_project, Project};
use crate::value::DataValue;

/// Client → server message.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    #[serde(rename_all = "camelCase")]
    Run {
        graph_id: String,
        #[serde(default)]
        inputs: HashMap<String, DataValue>,
    },
    Abort,
    Pause,
    Resume,
    /// `project` is a serialized project, either as text or as inline JSON
    SetDynamicData {
        project: Value,
        #[serde(default)]
        settings: Settings,
    },
    #[serde(rename_all = "camelCase")]
    UserInput { node_id: String, answers: Vec<String> },
}

impl ClientMessage {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// Reads the project carried by a `set-dynamic-data` message.
pub fn decode_project(project: &Value) -> Result<Project, SerializationError> {
    match project {
        Value::String(text) => deserialize_project(text),
        other => deserialize_project(&other.to_string()),
    }
}

/// Server → client frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerFrame {
    pub message: String,
    pub data: Value,
}

impl ServerFrame {
    pub fn new(message: impl Into<String>, data: Value) -> Self {
        Self {
            message: message.into(),
            data,
        }
    }

    pub fn from_event(event: &ProcessEvent) -> Self {
        let (message, data) = event.to_parts();
        Self { message, data }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(r#"{{"message":"{}","data":null}}"#, self.message)
        })
    }
}
