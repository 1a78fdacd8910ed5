//! Graph scheduler.
//!
//! A [`GraphProcessor`] is bound to one graph of a project. Each call to
//! [`GraphProcessor::process_graph`] runs a dispatch loop that owns the run
//! state exclusively: node computations run on a [`JoinSet`] and report back
//! through [`NodeOutcome`]s, and only the loop mutates results, visited and
//! errored sets.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::FutureExt;
use parking_lot::Mutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::config::ProcessorConfig;
use super::control::{AbortOutcome, AbortState, PendingUserInputs};
use super::event_bus::{EventBus, EventKind, ProcessEvent, SubscriptionId};
use super::globals::GlobalVariables;
use super::pause::PauseGate;
use super::process_context::{
    ExecutionCache, ExternalFunctions, NodeContext, ProcessContext, RunEnv,
};
use super::run_state::{NodeState, RunSnapshot, RunState, Work};
use super::runtime_context::RuntimeContext;
use super::split_run::run_split;
use crate::error::{NodeError, NodeFailure, NodeResult, ProcessError, ProcessResult};
use crate::graph::{Connection, CycleAnalysis, Graph, Node, NodeId, PortDefinition, Project};
use crate::nodes::{DefinitionContext, NodeImpl, NodeRegistry};
use crate::value::{DataValue, GraphInputs, GraphOutputs, Inputs, Outputs};

pub const LOOP_CONTROLLER_TYPE: &str = "loopController";
pub const RACE_INPUTS_TYPE: &str = "raceInputs";

/// Node types that receive excluded inputs instead of being excluded themselves.
const EXCLUSION_CONSUMERS: [&str; 5] =
    ["if", "ifElse", "coalesce", "graphOutput", RACE_INPUTS_TYPE];

/// Construction options for a root processor.
#[derive(Clone)]
pub struct ProcessorOptions {
    pub registry: Arc<NodeRegistry>,
    pub config: ProcessorConfig,
    pub runtime: RuntimeContext,
}

impl Default for ProcessorOptions {
    fn default() -> Self {
        Self {
            registry: Arc::new(NodeRegistry::new()),
            config: ProcessorConfig::default(),
            runtime: RuntimeContext::default(),
        }
    }
}

/// The sub-graph node a child processor runs on behalf of.
#[derive(Debug, Clone)]
pub(crate) struct ExecutorInfo {
    pub(crate) node_id: String,
    pub(crate) index: usize,
    pub(crate) process_id: String,
}

/// State shared by reference across a processor tree and across runs.
#[derive(Clone, Default)]
pub(crate) struct SharedResources {
    pub(crate) execution_cache: ExecutionCache,
    pub(crate) globals: Arc<GlobalVariables>,
    pub(crate) external_functions: ExternalFunctions,
}

/// Ports a node declared for the current graph shape.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeDefinitions {
    pub inputs: Vec<PortDefinition>,
    pub outputs: Vec<PortDefinition>,
}

/// Where a processor sits in a processor tree.
struct Lineage {
    bus: EventBus,
    root_bus: EventBus,
    resources: SharedResources,
    pause: Arc<PauseGate>,
    parent: Option<Weak<ProcessorInner>>,
    executor: Option<ExecutorInfo>,
    inherited_context_values: Arc<HashMap<String, DataValue>>,
}

impl Lineage {
    fn root() -> Self {
        let bus = EventBus::new();
        Self {
            root_bus: bus.clone(),
            bus,
            resources: SharedResources::default(),
            pause: Arc::new(PauseGate::new()),
            parent: None,
            executor: None,
            inherited_context_values: Arc::new(HashMap::new()),
        }
    }
}

pub(crate) struct ProcessorInner {
    pub(crate) id: String,
    pub(crate) project: Arc<Project>,
    pub(crate) graph: Arc<Graph>,
    pub(crate) nodes: HashMap<NodeId, Arc<Node>>,
    /// Node ids in graph declaration order
    pub(crate) node_order: Vec<NodeId>,
    instances: HashMap<NodeId, Arc<dyn NodeImpl>>,
    /// Connections into each node, restricted to declared ports
    inputs_from: HashMap<NodeId, Vec<Connection>>,
    /// Connections out of each node, restricted to declared ports
    outputs_to: HashMap<NodeId, Vec<Connection>>,
    definitions: HashMap<NodeId, NodeDefinitions>,
    cycles: CycleAnalysis,
    registry: Arc<NodeRegistry>,
    pub(crate) config: ProcessorConfig,
    pub(crate) runtime: RuntimeContext,
    pub(crate) bus: EventBus,
    pub(crate) root_bus: EventBus,
    pub(crate) resources: SharedResources,
    pub(crate) pause: Arc<PauseGate>,
    pub(crate) abort: Mutex<AbortState>,
    pub(crate) user_inputs: PendingUserInputs,
    children: Mutex<Vec<Weak<ProcessorInner>>>,
    parent: Option<Weak<ProcessorInner>>,
    pub(crate) executor: Option<ExecutorInfo>,
    inherited_context_values: Arc<HashMap<String, DataValue>>,
    pub(crate) running: AtomicBool,
    pub(crate) last_run: Mutex<RunSnapshot>,
}

impl ProcessorInner {
    fn build(
        project: Arc<Project>,
        graph_id: &str,
        registry: Arc<NodeRegistry>,
        config: ProcessorConfig,
        runtime: RuntimeContext,
        lineage: Lineage,
    ) -> ProcessResult<Self> {
        let graph = project
            .graphs
            .get(graph_id)
            .cloned()
            .ok_or_else(|| ProcessError::GraphNotFound(graph_id.to_string()))?;
        graph.validate()?;

        let mut nodes = HashMap::new();
        let mut instances = HashMap::new();
        for node in &graph.nodes {
            let instance =
                registry
                    .get(&node.node_type)
                    .ok_or_else(|| ProcessError::UnknownNodeType {
                        node_id: node.id.clone(),
                        node_type: node.node_type.clone(),
                    })?;
            instances.insert(node.id.clone(), instance);
            nodes.insert(node.id.clone(), Arc::new(node.clone()));
        }

        let mut definitions = HashMap::new();
        for node in &graph.nodes {
            let touching: Vec<Connection> = graph
                .connections
                .iter()
                .filter(|c| c.input_node_id == node.id || c.output_node_id == node.id)
                .cloned()
                .collect();
            let cx = DefinitionContext {
                project: &project,
                graph: &graph,
                connections: &touching,
            };
            let instance = &instances[&node.id];
            definitions.insert(
                node.id.clone(),
                NodeDefinitions {
                    inputs: instance.input_definitions(node, &cx),
                    outputs: instance.output_definitions(node, &cx),
                },
            );
        }

        let declared = |conn: &Connection| {
            let input_ok = definitions
                .get(&conn.input_node_id)
                .is_some_and(|d: &NodeDefinitions| d.inputs.iter().any(|p| p.id == conn.input_id));
            let output_ok = definitions
                .get(&conn.output_node_id)
                .is_some_and(|d: &NodeDefinitions| {
                    d.outputs.iter().any(|p| p.id == conn.output_id)
                });
            input_ok && output_ok
        };
        let mut inputs_from: HashMap<NodeId, Vec<Connection>> = HashMap::new();
        let mut outputs_to: HashMap<NodeId, Vec<Connection>> = HashMap::new();
        for conn in graph.connections.iter().filter(|c| declared(c)) {
            inputs_from
                .entry(conn.input_node_id.clone())
                .or_default()
                .push(conn.clone());
            outputs_to
                .entry(conn.output_node_id.clone())
                .or_default()
                .push(conn.clone());
        }

        let cycles = CycleAnalysis::analyze(&graph.nodes, &graph.connections);

        Ok(Self {
            id: runtime.id_generator.next_id(),
            node_order: graph.nodes.iter().map(|n| n.id.clone()).collect(),
            project,
            graph: Arc::new(graph),
            nodes,
            instances,
            inputs_from,
            outputs_to,
            definitions,
            cycles,
            registry,
            config,
            runtime,
            bus: lineage.bus,
            root_bus: lineage.root_bus,
            resources: lineage.resources,
            pause: lineage.pause,
            abort: Mutex::new(AbortState::default()),
            user_inputs: PendingUserInputs::default(),
            children: Mutex::new(Vec::new()),
            parent: lineage.parent,
            executor: lineage.executor,
            inherited_context_values: lineage.inherited_context_values,
            running: AtomicBool::new(false),
            last_run: Mutex::new(RunSnapshot::default()),
        })
    }

    pub(crate) fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    fn live_children(&self) -> Vec<Arc<ProcessorInner>> {
        let mut children = self.children.lock();
        children.retain(|c| c.strong_count() > 0);
        children.iter().filter_map(Weak::upgrade).collect()
    }

    fn incoming(&self, node_id: &str) -> &[Connection] {
        self.inputs_from.get(node_id).map(Vec::as_slice).unwrap_or(&[])
    }

    fn outgoing(&self, node_id: &str) -> &[Connection] {
        self.outputs_to.get(node_id).map(Vec::as_slice).unwrap_or(&[])
    }

    fn required_inputs_connected(&self, node_id: &str) -> bool {
        let Some(definitions) = self.definitions.get(node_id) else {
            return false;
        };
        let incoming = self.incoming(node_id);
        definitions
            .inputs
            .iter()
            .filter(|p| p.required)
            .all(|p| incoming.iter().any(|c| c.input_id == p.id))
    }

    pub(crate) fn abort_run(&self, successful: bool, error: Option<String>) -> bool {
        if !self.running.load(Ordering::SeqCst) {
            return false;
        }
        for child in self.live_children() {
            child.abort_run(successful, error.clone());
        }
        if !self.abort.lock().abort(successful, error.clone()) {
            return false;
        }
        self.bus.emit(ProcessEvent::Abort { successful, error });
        let rejected = self.user_inputs.reject_all();
        tracing::debug!(graph_id = %self.graph.id(), rejected, "run aborted");
        true
    }

    fn resolve_user_input(&self, node_id: &str, answers: Vec<String>) -> bool {
        if self.user_inputs.resolve(node_id, answers.clone()) {
            return true;
        }
        self.live_children()
            .iter()
            .any(|child| child.resolve_user_input(node_id, answers.clone()))
    }
}

/// Clears the running flag when a run ends, however it ends.
pub(crate) struct RunningGuard<'a>(pub(crate) &'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Executes one graph of a project.
#[derive(Clone)]
pub struct GraphProcessor {
    pub(crate) inner: Arc<ProcessorInner>,
}

impl GraphProcessor {
    pub fn new(project: Arc<Project>, graph_id: &str) -> ProcessResult<Self> {
        Self::with_options(project, graph_id, ProcessorOptions::default())
    }

    pub fn with_options(
        project: Arc<Project>,
        graph_id: &str,
        options: ProcessorOptions,
    ) -> ProcessResult<Self> {
        let inner = ProcessorInner::build(
            project,
            graph_id,
            options.registry,
            options.config,
            options.runtime,
            Lineage::root(),
        )?;
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// Child processor for a sub-graph node. Shares the parent's cache,
    /// globals, external functions and pause gate; forwards its events to the
    /// parent bus.
    pub(crate) fn spawn_child(
        parent: &Arc<ProcessorInner>,
        graph_id: &str,
        executor_node_id: &str,
        index: usize,
        process_id: &str,
        context_values: Arc<HashMap<String, DataValue>>,
    ) -> ProcessResult<Self> {
        let bus = EventBus::new();
        bus.forward_to(&parent.bus, |event| !event.kind().is_run_level());
        let lineage = Lineage {
            bus,
            root_bus: parent.root_bus.clone(),
            resources: parent.resources.clone(),
            pause: parent.pause.clone(),
            parent: Some(Arc::downgrade(parent)),
            executor: Some(ExecutorInfo {
                node_id: executor_node_id.to_string(),
                index,
                process_id: process_id.to_string(),
            }),
            inherited_context_values: context_values,
        };
        let inner = Arc::new(ProcessorInner::build(
            parent.project.clone(),
            graph_id,
            parent.registry.clone(),
            parent.config.clone(),
            parent.runtime.clone(),
            lineage,
        )?);
        parent.children.lock().push(Arc::downgrade(&inner));
        Ok(Self { inner })
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn graph(&self) -> &Graph {
        &self.inner.graph
    }

    pub fn project(&self) -> &Project {
        &self.inner.project
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.inner.config
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.bus
    }

    pub fn on(
        &self,
        kind: EventKind,
        callback: impl Fn(&ProcessEvent) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.inner.bus.on(kind, callback)
    }

    pub fn on_any(&self, callback: impl Fn(&ProcessEvent) + Send + Sync + 'static) -> SubscriptionId {
        self.inner.bus.on_any(callback)
    }

    pub fn definitions(&self, node_id: &str) -> Option<&NodeDefinitions> {
        self.inner.definitions.get(node_id)
    }

    pub fn cycles(&self) -> &CycleAnalysis {
        &self.inner.cycles
    }

    pub fn execution_cache(&self) -> &ExecutionCache {
        &self.inner.resources.execution_cache
    }

    pub fn set_external_function<F, Fut>(&self, name: impl Into<String>, f: F)
    where
        F: Fn(Vec<DataValue>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = NodeResult<DataValue>> + Send + 'static,
    {
        self.inner.resources.external_functions.register(name, f);
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    pub fn is_paused(&self) -> bool {
        self.inner.pause.is_paused()
    }

    /// Holds every dispatch of this processor tree until [`resume`](Self::resume).
    pub fn pause(&self) {
        if self.inner.pause.pause() {
            self.inner.bus.emit(ProcessEvent::Pause);
        }
    }

    pub fn resume(&self) {
        if self.inner.pause.resume() {
            self.inner.bus.emit(ProcessEvent::Resume);
        }
    }

    /// Cancels the current run and every live sub-processor. A successful
    /// abort still returns the outputs produced so far. Returns false when
    /// nothing is running or the run was already aborted.
    pub fn abort(&self, successful: bool, error: Option<String>) -> bool {
        self.inner.abort_run(successful, error)
    }

    /// Answers a waiting user-input node here or in any live sub-processor.
    pub fn user_input(&self, node_id: &str, answers: Vec<String>) -> bool {
        self.inner.resolve_user_input(node_id, answers)
    }

    pub fn get_global(&self, id: &str) -> Option<DataValue> {
        self.inner.resources.globals.get(id)
    }

    pub fn set_global(&self, id: &str, value: DataValue) -> Option<DataValue> {
        let previous = self.inner.resources.globals.insert(id, value.clone());
        self.inner.bus.emit(ProcessEvent::GlobalSet {
            id: id.to_string(),
            value,
            process_id: self.inner.id.clone(),
        });
        previous
    }

    pub fn raise_event(&self, name: &str, data: Option<DataValue>) {
        self.inner.root_bus.emit(ProcessEvent::UserEvent {
            name: name.to_string(),
            data,
        });
    }

    /// Results, visited and errored sets of the most recent run.
    pub fn last_run(&self) -> RunSnapshot {
        self.inner.last_run.lock().clone()
    }

    /// Runs the graph to completion and returns its graph outputs.
    pub async fn process_graph(
        &self,
        context: ProcessContext,
        inputs: GraphInputs,
        context_values: HashMap<String, DataValue>,
    ) -> ProcessResult<GraphOutputs> {
        let inner = &self.inner;
        if inner.running.swap(true, Ordering::SeqCst) {
            return Err(ProcessError::AlreadyRunning);
        }
        let _running = RunningGuard(&inner.running);

        let parent_token = inner
            .parent
            .as_ref()
            .and_then(Weak::upgrade)
            .map(|p| p.abort.lock().token());
        let token = inner.abort.lock().begin_run(parent_token.as_ref());

        let mut merged = (*inner.inherited_context_values).clone();
        merged.extend(context_values);
        let context_values = Arc::new(merged);

        let graph_id = inner.graph.id().to_string();
        if inner.is_root() {
            inner.bus.emit(ProcessEvent::Start {
                project_id: inner.project.metadata.id.clone(),
                graph_id: graph_id.clone(),
                inputs: inputs.clone(),
                context_values: (*context_values).clone(),
            });
        }
        inner.bus.emit(ProcessEvent::GraphStart {
            graph_id: graph_id.clone(),
            inputs: inputs.clone(),
        });
        tracing::debug!(graph_id = %graph_id, nodes = inner.nodes.len(), "processing graph");

        tokio::select! {
            _ = inner.pause.wait_until_unpaused() => {}
            _ = token.cancelled() => {}
        }

        let env = Arc::new(RunEnv {
            graph_inputs: inputs,
            context_values,
            context,
            token: token.clone(),
        });
        let mut run = Run {
            inner: inner.clone(),
            env,
            state: RunState::new(inner.node_order.iter().cloned()),
            tasks: JoinSet::new(),
            signals: HashMap::new(),
        };

        for node_id in &inner.node_order {
            if inner.outgoing(node_id).is_empty() {
                run.state.work.push_back(Work::Fetch(node_id.clone()));
            }
        }

        let mut cancellation_seen = false;
        loop {
            run.drain_work();
            if run.tasks.is_empty() {
                break;
            }
            tokio::select! {
                joined = run.tasks.join_next() => match joined {
                    Some(Ok(outcome)) => run.complete_node(outcome),
                    Some(Err(e)) => tracing::warn!(graph_id = %graph_id, error = %e, "node task failed to join"),
                    None => {}
                },
                _ = token.cancelled(), if !cancellation_seen => {
                    cancellation_seen = true;
                    inner.user_inputs.reject_all();
                    tracing::debug!(graph_id = %graph_id, in_flight = run.tasks.len(), "draining after abort");
                }
            }
        }

        run.finish()
    }
}

/// Reported by a node task back to the dispatch loop.
struct NodeOutcome {
    node_id: NodeId,
    process_id: String,
    generation: u64,
    result: NodeResult<Outputs>,
}

/// One run of the dispatch loop.
struct Run {
    inner: Arc<ProcessorInner>,
    env: Arc<RunEnv>,
    state: RunState,
    tasks: JoinSet<NodeOutcome>,
    /// Per-dispatch cancellation, keyed by process id
    signals: HashMap<String, (NodeId, CancellationToken)>,
}

impl Run {
    fn is_controller(&self, node_id: &str) -> bool {
        self.inner
            .nodes
            .get(node_id)
            .is_some_and(|n| n.node_type == LOOP_CONTROLLER_TYPE)
    }

    fn is_race(&self, node_id: &str) -> bool {
        self.inner
            .nodes
            .get(node_id)
            .is_some_and(|n| n.node_type == RACE_INPUTS_TYPE)
    }

    /// Cancels every in-flight member of a won race and keeps the rest from starting.
    fn complete_race(&mut self, race_id: &str) {
        self.state.completed_races.insert(race_id.to_string());
        for (node_id, signal) in self.signals.values() {
            if self.state.in_race(node_id, race_id) {
                self.inner.bus.emit(ProcessEvent::Trace {
                    message: format!("Aborting node {} because other race branch won", node_id),
                });
                signal.cancel();
            }
        }
    }

    fn title(&self, node_id: &str) -> String {
        self.inner
            .nodes
            .get(node_id)
            .map(|n| n.title.clone())
            .unwrap_or_else(|| node_id.to_string())
    }

    fn trace(&self, message: String) {
        self.inner.bus.emit(ProcessEvent::Trace { message });
    }

    fn drain_work(&mut self) {
        while let Some(work) = self.state.work.pop_front() {
            match work {
                Work::Fetch(node_id) => self.fetch(&node_id),
                Work::TryProcess(node_id) => self.try_process(&node_id),
            }
        }
    }

    fn has_errored_input(&self, node_id: &str) -> bool {
        self.inner
            .incoming(node_id)
            .iter()
            .any(|c| self.state.errored.contains_key(&c.output_node_id))
    }

    /// Schedules a node's producers, then the node itself.
    fn fetch(&mut self, node_id: &str) {
        let state = &self.state;
        if state.processing.contains(node_id)
            || state.queued.contains(node_id)
            || state.results.contains_key(node_id)
            || state.errored.contains_key(node_id)
        {
            return;
        }
        let is_race = self.is_race(node_id);
        if (!is_race && self.has_errored_input(node_id))
            || !self.inner.required_inputs_connected(node_id)
        {
            return;
        }

        self.state.queued.insert(node_id.to_string());
        let mut producers: Vec<NodeId> = Vec::new();
        for conn in self.inner.incoming(node_id) {
            if !producers.contains(&conn.output_node_id) {
                producers.push(conn.output_node_id.clone());
            }
        }
        for producer in &producers {
            self.state.join_races(node_id, producer, is_race);
        }
        for producer in producers {
            self.state.work.push_back(Work::Fetch(producer));
        }
        self.state.work.push_back(Work::TryProcess(node_id.to_string()));
    }

    fn gather_inputs(&self, node_id: &str) -> Inputs {
        let mut inputs = Inputs::new();
        for conn in self.inner.incoming(node_id) {
            let value = self
                .state
                .results
                .get(&conn.output_node_id)
                .and_then(|r| r.output(&conn.output_id));
            if let Some(value) = value {
                inputs.insert(conn.input_id.clone(), value);
            }
        }
        inputs
    }

    /// Dispatches the node when every producer it depends on has run.
    fn try_process(&mut self, node_id: &str) {
        let is_controller = self.is_controller(node_id);
        let is_race = self.is_race(node_id);
        let state = &self.state;
        if state.processing.contains(node_id)
            || (state.visited.contains(node_id) && !is_controller)
            || state.broken_loops.contains(node_id)
            || state.errored.contains_key(node_id)
        {
            return;
        }
        if state.in_completed_race(node_id) {
            self.trace(format!(
                "Node {} is part of a race that was completed",
                self.title(node_id)
            ));
            return;
        }
        if !is_race && self.has_errored_input(node_id) {
            self.trace(format!("Node {} has an errored input node", self.title(node_id)));
            return;
        }
        if !self.inner.required_inputs_connected(node_id) {
            self.trace(format!("Node {} has unconnected required inputs", self.title(node_id)));
            return;
        }

        let inputs = self.gather_inputs(node_id);
        if inputs.values().any(DataValue::is_loop_not_broken) {
            self.trace(format!("Node {} is waiting for a loop to break", self.title(node_id)));
            return;
        }

        let bootstrap = is_controller && !state.loop_controllers_seen.contains(node_id);
        let race_won = is_race && inputs.values().any(|v| !v.is_excluded());
        let waiting = self.inner.incoming(node_id).iter().find(|c| {
            if race_won {
                return false;
            }
            // A controller's first pass skips its back edges but still needs its defaults.
            if bootstrap
                && !c.input_id.ends_with("Default")
                && self.inner.cycles.in_same_component(node_id, &c.output_node_id)
            {
                return false;
            }
            !state.visited.contains(&c.output_node_id)
        });
        if let Some(conn) = waiting {
            self.trace(format!(
                "Node {} is waiting for input node {}",
                self.title(node_id),
                self.title(&conn.output_node_id)
            ));
            return;
        }

        self.dispatch(node_id, inputs);
    }

    fn dispatch(&mut self, node_id: &str, inputs: Inputs) {
        if self.env.token.is_cancelled() {
            return;
        }
        let Some(node) = self.inner.nodes.get(node_id).cloned() else {
            return;
        };
        let Some(instance) = self.inner.instances.get(node_id).cloned() else {
            return;
        };
        let is_controller = node.node_type == LOOP_CONTROLLER_TYPE;

        self.state.processing.insert(node_id.to_string());
        if is_controller {
            self.state.loop_controllers_seen.insert(node_id.to_string());
        }
        self.state.join_loop(node_id);

        let process_id = self.inner.runtime.id_generator.next_id();
        self.inner.bus.emit(ProcessEvent::NodeStart {
            node_id: node_id.to_string(),
            inputs: inputs.clone(),
            process_id: process_id.clone(),
        });

        let excluded = !EXCLUSION_CONSUMERS.contains(&node.node_type.as_str())
            && inputs.values().any(DataValue::is_excluded);
        if excluded {
            tracing::debug!(graph_id = %self.inner.graph.id(), node_id, "node excluded by control flow");
            self.inner.bus.emit(ProcessEvent::NodeExcluded {
                node_id: node_id.to_string(),
                process_id,
            });
            self.state
                .results
                .insert(node_id.to_string(), NodeState::Excluded);
            self.finish_node(node_id);
            return;
        }

        if is_controller
            && self
                .state
                .loop_of
                .get(node_id)
                .is_some_and(|owner| owner != node_id)
        {
            self.fail_node(node_id, &process_id, NodeError::NestedLoop);
            return;
        }

        let iteration = if is_controller {
            let count = self
                .state
                .loop_iterations
                .entry(node_id.to_string())
                .or_insert(0);
            let completed = *count;
            *count += 1;
            completed
        } else {
            0
        };

        tracing::debug!(
            graph_id = %self.inner.graph.id(),
            node_id,
            node_type = %node.node_type,
            "dispatching node"
        );
        let generation = self.state.generation(node_id);
        let signal = self.env.token.child_token();
        self.signals
            .insert(process_id.clone(), (node_id.to_string(), signal.clone()));
        self.tasks.spawn(run_node(
            self.inner.clone(),
            self.env.clone(),
            node,
            instance,
            inputs,
            process_id,
            generation,
            iteration,
            signal,
        ));
    }

    fn complete_node(&mut self, outcome: NodeOutcome) {
        let NodeOutcome {
            node_id,
            process_id,
            generation,
            result,
        } = outcome;
        self.signals.remove(&process_id);
        let stale = generation != self.state.generation(&node_id);

        match result {
            Ok(outputs) => {
                self.inner.bus.emit(ProcessEvent::NodeFinish {
                    node_id: node_id.clone(),
                    outputs: outputs.clone(),
                    process_id,
                });
                if stale {
                    self.trace(format!("Discarding stale result of {}", self.title(&node_id)));
                    return;
                }
                let output_id = self
                    .inner
                    .nodes
                    .get(&node_id)
                    .zip(self.inner.instances.get(&node_id))
                    .and_then(|(node, instance)| instance.graph_output_id(node));
                if let Some(output_id) = output_id {
                    self.state
                        .record_graph_output(&output_id, outputs.get("valueOutput"));
                }
                self.state
                    .results
                    .insert(node_id.clone(), NodeState::Outputs(outputs));
                self.finish_node(&node_id);
            }
            Err(error) => {
                if stale {
                    self.inner.bus.emit(ProcessEvent::NodeError {
                        node_id,
                        error: error.to_string(),
                        process_id,
                    });
                    return;
                }
                self.fail_node(&node_id, &process_id, error);
            }
        }
    }

    fn fail_node(&mut self, node_id: &str, process_id: &str, error: NodeError) {
        let message = error.to_string();
        tracing::warn!(graph_id = %self.inner.graph.id(), node_id, error = %message, "node failed");
        self.inner.bus.emit(ProcessEvent::NodeError {
            node_id: node_id.to_string(),
            error: message.clone(),
            process_id: process_id.to_string(),
        });
        self.state.errored.insert(node_id.to_string(), message);
        self.state.mark_visited(node_id);
        if self.is_controller(node_id) {
            self.state.broken_loops.insert(node_id.to_string());
        }
    }

    /// Marks the node visited, advances its loop, and re-checks its consumers.
    fn finish_node(&mut self, node_id: &str) {
        self.state.mark_visited(node_id);
        let is_controller = self.is_controller(node_id);

        if is_controller {
            if self.state.did_break(node_id) {
                tracing::debug!(graph_id = %self.inner.graph.id(), node_id, "loop finished");
                self.state.broken_loops.insert(node_id.to_string());
            } else {
                let body = self.state.reset_loop(node_id);
                tracing::debug!(
                    graph_id = %self.inner.graph.id(),
                    node_id,
                    body = body.len(),
                    "loop continues"
                );
                self.trace(format!(
                    "Loop controller {} did not break, so we're looping again",
                    self.title(node_id)
                ));
            }
        }

        if self.is_race(node_id) {
            self.complete_race(node_id);
        }

        let owner = if is_controller {
            Some(node_id.to_string())
        } else {
            self.state.loop_of.get(node_id).cloned()
        };

        let mut downstream: Vec<NodeId> = Vec::new();
        let mut seen = HashSet::new();
        for conn in self.inner.outgoing(node_id) {
            let from_break = is_controller && conn.output_id == "break";
            if let (Some(owner), false) = (&owner, from_break) {
                self.state
                    .loop_of
                    .entry(conn.input_node_id.clone())
                    .or_insert_with(|| owner.clone());
            }
            if seen.insert(conn.input_node_id.clone()) {
                downstream.push(conn.input_node_id.clone());
            }
        }
        for next in downstream {
            self.state.work.push_back(Work::TryProcess(next));
        }
    }

    fn finish(self) -> ProcessResult<GraphOutputs> {
        let inner = self.inner;
        *inner.last_run.lock() = self.state.snapshot();
        let graph_id = inner.graph.id().to_string();
        let outputs = self.state.graph_outputs.clone();

        if self.env.token.is_cancelled() {
            let outcome = inner.abort.lock().outcome();
            if let Some(AbortOutcome {
                successful: true, ..
            }) = outcome
            {
                return Ok(succeed(&inner, graph_id, outputs));
            }
            let message = outcome
                .and_then(|o| o.error)
                .unwrap_or_else(|| "run was cancelled".to_string());
            inner.bus.emit(ProcessEvent::GraphError {
                graph_id,
                error: message.clone(),
            });
            if inner.is_root() {
                inner.bus.emit(ProcessEvent::Error {
                    error: message.clone(),
                });
            }
            return Err(ProcessError::Aborted(message));
        }

        let failed = self
            .state
            .errored
            .keys()
            .any(|id| !self.state.in_completed_race(id));
        if failed {
            let failures: Vec<NodeFailure> = inner
                .node_order
                .iter()
                .filter(|id| !self.state.in_completed_race(id))
                .filter_map(|id| {
                    let error = self.state.errored.get(id)?;
                    Some(NodeFailure {
                        node_id: id.clone(),
                        title: inner.nodes.get(id).map(|n| n.title.clone()).unwrap_or_default(),
                        error: error.clone(),
                    })
                })
                .collect();
            let err = ProcessError::GraphFailed {
                graph_name: inner.graph.name().to_string(),
                graph_id: graph_id.clone(),
                failures,
            };
            let message = err.to_string();
            tracing::warn!(graph_id = %graph_id, error = %message, "graph failed");
            inner.bus.emit(ProcessEvent::GraphError {
                graph_id,
                error: message.clone(),
            });
            if inner.is_root() {
                inner.bus.emit(ProcessEvent::Error { error: message });
            }
            return Err(err);
        }

        Ok(succeed(&inner, graph_id, outputs))
    }
}

fn succeed(inner: &ProcessorInner, graph_id: String, outputs: GraphOutputs) -> GraphOutputs {
    tracing::debug!(graph_id = %graph_id, outputs = outputs.len(), "graph finished");
    inner.bus.emit(ProcessEvent::GraphFinish {
        graph_id,
        outputs: outputs.clone(),
    });
    if inner.is_root() {
        inner.bus.emit(ProcessEvent::Done {
            results: outputs.clone(),
        });
    }
    outputs
}

#[allow(clippy::too_many_arguments)]
async fn run_node(
    inner: Arc<ProcessorInner>,
    env: Arc<RunEnv>,
    node: Arc<Node>,
    instance: Arc<dyn NodeImpl>,
    inputs: Inputs,
    process_id: String,
    generation: u64,
    iteration: u32,
    signal: CancellationToken,
) -> NodeOutcome {
    tokio::select! {
        _ = inner.pause.wait_until_unpaused() => {}
        _ = signal.cancelled() => {}
    }

    let work = async {
        if node.is_split_run {
            let max = node.split_run_max.unwrap_or(inner.config.split_run_max);
            run_split(&inputs, max, |index, slice| {
                let ctx = NodeContext::new(
                    inner.clone(),
                    env.clone(),
                    node.clone(),
                    process_id.clone(),
                    index,
                    iteration,
                    signal.clone(),
                );
                let instance = instance.clone();
                let node = node.clone();
                async move { invoke(instance.as_ref(), &node, slice, &ctx).await }
            })
            .await
        } else {
            let ctx = NodeContext::new(
                inner.clone(),
                env.clone(),
                node.clone(),
                process_id.clone(),
                0,
                iteration,
                signal.clone(),
            );
            invoke(instance.as_ref(), &node, inputs.clone(), &ctx).await
        }
    };
    let result = match AssertUnwindSafe(work).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => Err(NodeError::ExecutionError(panic_message(panic.as_ref()))),
    };

    if inner.config.slow_mode {
        tokio::time::sleep(Duration::from_millis(inner.config.slow_mode_delay_ms)).await;
    }

    NodeOutcome {
        node_id: node.id.clone(),
        process_id,
        generation,
        result,
    }
}

/// Runs one computation, racing it against the abort signal.
async fn invoke(
    instance: &dyn NodeImpl,
    node: &Node,
    inputs: Inputs,
    ctx: &NodeContext,
) -> NodeResult<Outputs> {
    let signal = ctx.signal().clone();
    tokio::select! {
        biased;
        _ = signal.cancelled() => Err(NodeError::Aborted),
        result = instance.process(node, inputs, ctx) => {
            if signal.is_cancelled() {
                Err(NodeError::Aborted)
            } else {
                result
            }
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("node panicked: {}", s)
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("node panicked: {}", s)
    } else {
        "node panicked".to_string()
    }
}
