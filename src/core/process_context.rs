//! Context handed to node computations.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use futures::future::BoxFuture;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::config::ProcessorConfig;
use super::event_bus::{EventBus, EventKind, ProcessEvent};
use super::globals::GlobalVariables;
use super::native::NativeApi;
use super::processor::{GraphProcessor, ProcessorInner};
use crate::error::{NodeError, NodeResult, ProcessError};
use crate::graph::{Node, Project};
use crate::value::{DataValue, GraphInputs, Inputs, Outputs};

/// Settings and secrets made available to node computations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(default)]
    pub secrets: HashMap<String, String>,
    #[serde(default, flatten)]
    pub values: HashMap<String, Value>,
}

impl Settings {
    pub fn secret(&self, key: &str) -> Option<&str> {
        self.secrets.get(key).map(String::as_str)
    }
}

/// Caller-supplied environment of a run.
#[derive(Clone, Default)]
pub struct ProcessContext {
    pub settings: Arc<Settings>,
    pub native: Option<Arc<dyn NativeApi>>,
}

impl ProcessContext {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings: Arc::new(settings),
            native: None,
        }
    }

    pub fn with_native(mut self, native: Arc<dyn NativeApi>) -> Self {
        self.native = Some(native);
        self
    }
}

/// Cache shared by every run of a processor and its sub-processors.
#[derive(Clone, Default)]
pub struct ExecutionCache {
    entries: Arc<DashMap<String, Arc<dyn Any + Send + Sync>>>,
}

impl ExecutionCache {
    pub fn get<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        let entry = self.entries.get(key)?.value().clone();
        entry.downcast::<T>().ok()
    }

    pub fn insert<T: Any + Send + Sync>(&self, key: impl Into<String>, value: T) {
        self.entries.insert(key.into(), Arc::new(value));
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn remove(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub type ExternalFunction =
    Arc<dyn Fn(Vec<DataValue>) -> BoxFuture<'static, NodeResult<DataValue>> + Send + Sync>;

/// Functions callable by name from inside a graph.
#[derive(Clone, Default)]
pub struct ExternalFunctions {
    functions: Arc<RwLock<HashMap<String, ExternalFunction>>>,
}

impl ExternalFunctions {
    pub fn register<F, Fut>(&self, name: impl Into<String>, f: F)
    where
        F: Fn(Vec<DataValue>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = NodeResult<DataValue>> + Send + 'static,
    {
        let function: ExternalFunction = Arc::new(move |args| Box::pin(f(args)));
        self.functions.write().insert(name.into(), function);
    }

    pub fn get(&self, name: &str) -> Option<ExternalFunction> {
        self.functions.read().get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.functions.read().keys().cloned().collect();
        names.sort();
        names
    }
}

/// Per-run environment shared by every node of the run.
pub(crate) struct RunEnv {
    pub(crate) graph_inputs: GraphInputs,
    pub(crate) context_values: Arc<HashMap<String, DataValue>>,
    pub(crate) context: ProcessContext,
    pub(crate) token: CancellationToken,
}

/// What a node computation can reach while it runs.
#[derive(Clone)]
pub struct NodeContext {
    processor: Arc<ProcessorInner>,
    run: Arc<RunEnv>,
    node: Arc<Node>,
    process_id: String,
    index: usize,
    loop_iteration: u32,
    /// Cancelled on run abort or when a race this node feeds is won elsewhere
    signal: CancellationToken,
}

impl NodeContext {
    pub(crate) fn new(
        processor: Arc<ProcessorInner>,
        run: Arc<RunEnv>,
        node: Arc<Node>,
        process_id: String,
        index: usize,
        loop_iteration: u32,
        signal: CancellationToken,
    ) -> Self {
        Self {
            processor,
            run,
            node,
            process_id,
            index,
            loop_iteration,
            signal,
        }
    }

    pub fn node(&self) -> &Node {
        &self.node
    }

    pub fn node_id(&self) -> &str {
        &self.node.id
    }

    pub fn process_id(&self) -> &str {
        &self.process_id
    }

    /// Split-run index; 0 for ordinary runs.
    pub fn split_index(&self) -> usize {
        self.index
    }

    /// Completed iterations of the loop this controller governs.
    pub fn loop_iteration(&self) -> u32 {
        self.loop_iteration
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.processor.config
    }

    pub fn project(&self) -> &Project {
        &self.processor.project
    }

    pub fn graph_inputs(&self) -> &GraphInputs {
        &self.run.graph_inputs
    }

    pub fn graph_input(&self, id: &str) -> Option<&DataValue> {
        self.run.graph_inputs.get(id)
    }

    pub fn context_value(&self, id: &str) -> Option<&DataValue> {
        self.run.context_values.get(id)
    }

    pub fn settings(&self) -> &Settings {
        &self.run.context.settings
    }

    pub fn native(&self) -> Option<&Arc<dyn NativeApi>> {
        self.run.context.native.as_ref()
    }

    pub fn signal(&self) -> &CancellationToken {
        &self.signal
    }

    pub fn is_aborted(&self) -> bool {
        self.signal.is_cancelled()
    }

    /// Aborts the run of the graph this node belongs to. `None` is an early
    /// exit that keeps the outputs produced so far.
    pub fn abort_graph(&self, error: Option<String>) {
        self.processor.abort_run(error.is_none(), error);
    }

    pub fn execution_cache(&self) -> &ExecutionCache {
        &self.processor.resources.execution_cache
    }

    pub fn external_function(&self, name: &str) -> Option<ExternalFunction> {
        self.processor.resources.external_functions.get(name)
    }

    pub fn trace(&self, message: impl Into<String>) {
        self.processor.bus.emit(ProcessEvent::Trace {
            message: message.into(),
        });
    }

    /// Streams intermediate outputs before the node finishes.
    pub fn emit_partial_output(&self, outputs: Outputs) {
        let bus = &self.processor.bus;
        let forward_as_graph = self
            .node
            .data
            .get("useAsGraphPartialOutput")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        if let (true, Some(executor)) = (forward_as_graph, &self.processor.executor) {
            bus.emit(ProcessEvent::PartialOutput {
                node_id: executor.node_id.clone(),
                outputs: outputs.clone(),
                index: executor.index,
                process_id: executor.process_id.clone(),
            });
        }
        bus.emit(ProcessEvent::PartialOutput {
            node_id: self.node.id.clone(),
            outputs,
            index: self.index,
            process_id: self.process_id.clone(),
        });
    }

    /// The global variable map itself, for values read after the node finishes.
    pub fn globals(&self) -> Arc<GlobalVariables> {
        self.processor.resources.globals.clone()
    }

    pub fn get_global(&self, id: &str) -> Option<DataValue> {
        self.processor.resources.globals.get(id)
    }

    /// Stores a global and announces it; returns the previous value.
    pub fn set_global(&self, id: &str, value: DataValue) -> Option<DataValue> {
        let previous = self.processor.resources.globals.insert(id, value.clone());
        self.processor.bus.emit(ProcessEvent::GlobalSet {
            id: id.to_string(),
            value,
            process_id: self.process_id.clone(),
        });
        previous
    }

    pub async fn wait_for_global(&self, id: &str) -> NodeResult<DataValue> {
        self.processor
            .resources
            .globals
            .wait(id, &self.processor.root_bus, &self.signal)
            .await
    }

    pub fn raise_event(&self, name: &str, data: Option<DataValue>) {
        self.processor.root_bus.emit(ProcessEvent::UserEvent {
            name: name.to_string(),
            data,
        });
    }

    pub async fn wait_for_event(&self, name: &str) -> NodeResult<Option<DataValue>> {
        let mut sub = self.processor.root_bus.subscribe(EventKind::UserEvent);
        loop {
            tokio::select! {
                event = sub.recv() => match event {
                    Some(ProcessEvent::UserEvent { name: raised, data }) if raised == name => {
                        return Ok(data);
                    }
                    Some(_) => continue,
                    None => return Err(NodeError::Aborted),
                },
                _ = self.signal.cancelled() => return Err(NodeError::Aborted),
            }
        }
    }

    /// Suspends until an external caller answers through
    /// [`GraphProcessor::user_input`], or fails when the run is aborted.
    pub async fn request_user_input(&self, inputs: Inputs) -> NodeResult<Vec<String>> {
        let pending = &self.processor.user_inputs;
        let rx = pending.register(&self.node.id);
        self.processor.bus.emit(ProcessEvent::UserInput {
            node_id: self.node.id.clone(),
            inputs,
            process_id: self.process_id.clone(),
        });
        tokio::select! {
            answers = rx => answers.map_err(|_| {
                NodeError::UserInputRejected("processing was aborted".to_string())
            }),
            _ = self.signal.cancelled() => {
                pending.remove(&self.node.id);
                Err(NodeError::Aborted)
            }
        }
    }

    /// A child processor for `graph_id`, sharing this processor's cache,
    /// globals and external functions.
    pub fn create_sub_processor(&self, graph_id: &str) -> NodeResult<GraphProcessor> {
        GraphProcessor::spawn_child(
            &self.processor,
            graph_id,
            &self.node.id,
            self.index,
            &self.process_id,
            self.run.context_values.clone(),
        )
        .map_err(|e| match e {
            ProcessError::GraphNotFound(id) => NodeError::GraphNotFound(id),
            other => NodeError::SubGraph(other.to_string()),
        })
    }

    pub fn process_context(&self) -> ProcessContext {
        self.run.context.clone()
    }

    pub fn context_values(&self) -> HashMap<String, DataValue> {
        (*self.run.context_values).clone()
    }

    pub async fn wait_until_unpaused(&self) {
        self.processor.pause.wait_until_unpaused().await
    }

    pub fn events(&self) -> &EventBus {
        &self.processor.bus
    }
}
