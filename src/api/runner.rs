//! High-level graph runner and builder.
//!
//! [`GraphRunner`] (constructed via [`GraphRunnerBuilder`]) wires a project,
//! a node registry, processor configuration, event callbacks and external
//! functions into a [`GraphProcessor`] and runs it.

use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::core::config::ProcessorConfig;
use crate::core::event_bus::{EventKind, ProcessEvent, Subscription};
use crate::core::native::NativeApi;
use crate::core::process_context::{ProcessContext, Settings};
use crate::core::processor::{GraphProcessor, ProcessorOptions};
use crate::core::runtime_context::RuntimeContext;
use crate::error::{NodeResult, ProcessError, ProcessResult, SerializationError};
use crate::graph::{deserialize_project, Project};
use crate::nodes::NodeRegistry;
use crate::value::{DataValue, GraphInputs, GraphOutputs};

type Setup = Box<dyn FnOnce(&GraphProcessor) + Send>;

pub fn load_project_from_str(text: &str) -> Result<Project, SerializationError> {
    deserialize_project(text)
}

pub async fn load_project_from_file(path: impl AsRef<Path>) -> Result<Project, SerializationError> {
    let text = tokio::fs::read_to_string(path.as_ref()).await?;
    deserialize_project(&text)
}

/// Entry point for running a graph of a project.
pub struct GraphRunner;

impl GraphRunner {
    pub fn builder(project: impl Into<Arc<Project>>) -> GraphRunnerBuilder {
        GraphRunnerBuilder {
            project: project.into(),
            graph: None,
            inputs: GraphInputs::new(),
            context_values: HashMap::new(),
            settings: Settings::default(),
            native: None,
            registry: None,
            config: ProcessorConfig::default(),
            runtime: RuntimeContext::default(),
            setup: Vec::new(),
        }
    }
}

pub struct GraphRunnerBuilder {
    project: Arc<Project>,
    graph: Option<String>,
    inputs: GraphInputs,
    context_values: HashMap<String, DataValue>,
    settings: Settings,
    native: Option<Arc<dyn NativeApi>>,
    registry: Option<Arc<NodeRegistry>>,
    config: ProcessorConfig,
    runtime: RuntimeContext,
    setup: Vec<Setup>,
}

impl GraphRunnerBuilder {
    /// Graph to run, by id or by name. Defaults to the project's main graph.
    pub fn graph(mut self, id_or_name: impl Into<String>) -> Self {
        self.graph = Some(id_or_name.into());
        self
    }

    pub fn input(mut self, id: impl Into<String>, value: impl Into<DataValue>) -> Self {
        self.inputs.insert(id.into(), value.into());
        self
    }

    pub fn inputs(mut self, inputs: GraphInputs) -> Self {
        self.inputs.extend(inputs);
        self
    }

    pub fn context_value(mut self, id: impl Into<String>, value: impl Into<DataValue>) -> Self {
        self.context_values.insert(id.into(), value.into());
        self
    }

    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    pub fn native_api(mut self, native: Arc<dyn NativeApi>) -> Self {
        self.native = Some(native);
        self
    }

    pub fn registry(mut self, registry: Arc<NodeRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn config(mut self, config: ProcessorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn runtime(mut self, runtime: RuntimeContext) -> Self {
        self.runtime = runtime;
        self
    }

    pub fn on_event(
        mut self,
        kind: EventKind,
        callback: impl Fn(&ProcessEvent) + Send + Sync + 'static,
    ) -> Self {
        self.setup.push(Box::new(move |processor: &GraphProcessor| {
            processor.on(kind, callback);
        }));
        self
    }

    pub fn on_any_event(mut self, callback: impl Fn(&ProcessEvent) + Send + Sync + 'static) -> Self {
        self.setup.push(Box::new(move |processor: &GraphProcessor| {
            processor.on_any(callback);
        }));
        self
    }

    pub fn external_function<F, Fut>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Vec<DataValue>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = NodeResult<DataValue>> + Send + 'static,
    {
        let name = name.into();
        self.setup.push(Box::new(move |processor: &GraphProcessor| {
            processor.set_external_function(name, f);
        }));
        self
    }

    fn graph_id(&self) -> ProcessResult<String> {
        let wanted = self
            .graph
            .clone()
            .or_else(|| self.project.metadata.main_graph_id.clone())
            .ok_or_else(|| ProcessError::GraphNotFound("no graph selected".to_string()))?;
        self.project
            .resolve_graph(&wanted)
            .map(|g| g.id().to_string())
            .ok_or(ProcessError::GraphNotFound(wanted))
    }

    /// Builds the processor without running it, plus the run arguments.
    pub fn build(self) -> ProcessResult<PreparedRun> {
        let graph_id = self.graph_id()?;
        let options = ProcessorOptions {
            registry: self
                .registry
                .unwrap_or_else(|| Arc::new(NodeRegistry::new())),
            config: self.config,
            runtime: self.runtime,
        };
        let processor = GraphProcessor::with_options(self.project, &graph_id, options)?;
        for setup in self.setup {
            setup(&processor);
        }
        let mut context = ProcessContext::new(self.settings);
        if let Some(native) = self.native {
            context = context.with_native(native);
        }
        Ok(PreparedRun {
            processor,
            context,
            inputs: self.inputs,
            context_values: self.context_values,
        })
    }

    /// Runs the graph to completion and returns its outputs.
    pub async fn run(self) -> ProcessResult<GraphOutputs> {
        self.build()?.run().await
    }

    /// Starts the run in the background and streams its partial outputs.
    pub fn run_streaming(self) -> ProcessResult<(Subscription, JoinHandle<ProcessResult<GraphOutputs>>)> {
        let prepared = self.build()?;
        let partials = prepared.processor.events().subscribe(EventKind::PartialOutput);
        Ok((partials, tokio::spawn(prepared.run())))
    }
}

/// A built processor together with the arguments of its run.
pub struct PreparedRun {
    pub processor: GraphProcessor,
    pub context: ProcessContext,
    pub inputs: GraphInputs,
    pub context_values: HashMap<String, DataValue>,
}

impl PreparedRun {
    pub async fn run(self) -> ProcessResult<GraphOutputs> {
        self.processor
            .process_graph(self.context, self.inputs, self.context_values)
            .await
    }
}
