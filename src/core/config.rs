use serde::{Deserialize, Serialize};

use super::retry::RetryConfig;
use crate::error::ProcessError;

/// Processor tuning knobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessorConfig {
    /// Default cap for loop controllers that do not set `maxIterations`
    #[serde(default = "default_max_loop_iterations")]
    pub max_loop_iterations: u32,
    /// Fan-out bound for split-run nodes that do not set their own
    #[serde(default = "default_split_run_max")]
    pub split_run_max: usize,
    #[serde(default = "default_replay_chat_latency_ms")]
    pub replay_chat_latency_ms: u64,
    /// Node types whose recorded start is delayed during replay
    #[serde(default = "default_replay_delay_node_types")]
    pub replay_delay_node_types: Vec<String>,
    #[serde(default)]
    pub slow_mode: bool,
    #[serde(default = "default_slow_mode_delay_ms")]
    pub slow_mode_delay_ms: u64,
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_max_loop_iterations() -> u32 {
    100
}

fn default_split_run_max() -> usize {
    10
}

fn default_replay_chat_latency_ms() -> u64 {
    1000
}

fn default_replay_delay_node_types() -> Vec<String> {
    vec!["chat".to_string()]
}

fn default_slow_mode_delay_ms() -> u64 {
    250
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        ProcessorConfig {
            max_loop_iterations: default_max_loop_iterations(),
            split_run_max: default_split_run_max(),
            replay_chat_latency_ms: default_replay_chat_latency_ms(),
            replay_delay_node_types: default_replay_delay_node_types(),
            slow_mode: false,
            slow_mode_delay_ms: default_slow_mode_delay_ms(),
            retry: RetryConfig::default(),
        }
    }
}

impl ProcessorConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ProcessError> {
        toml::from_str(text).map_err(|e| ProcessError::Config(e.to_string()))
    }
}
