//! Replays a [`Recording`] through a processor's bus without running any node.

use std::sync::atomic::Ordering;
use std::time::Duration;

use crate::core::event_bus::ProcessEvent;
use crate::core::processor::{GraphProcessor, RunningGuard};
use crate::core::run_state::{NodeState, RunSnapshot};
use crate::error::{ProcessError, ProcessResult};
use crate::graph::Project;
use crate::value::GraphOutputs;

use super::recorder::Recording;

/// Every recorded event must name graphs and nodes of the current project.
fn check_against_project(project: &Project, events: &[ProcessEvent]) -> ProcessResult<()> {
    let nodes = project.nodes_by_id();

    for event in events {
        let graph_id = match event {
            ProcessEvent::Start { graph_id, .. }
            | ProcessEvent::GraphStart { graph_id, .. }
            | ProcessEvent::GraphFinish { graph_id, .. }
            | ProcessEvent::GraphError { graph_id, .. } => Some(graph_id),
            _ => None,
        };
        if let Some(graph_id) = graph_id {
            if !project.graphs.contains_key(graph_id) {
                return Err(ProcessError::RecordingMismatch(format!(
                    "graph {graph_id} not found in project"
                )));
            }
        }
        if let Some(node_id) = event.node_id() {
            if !nodes.contains_key(node_id) {
                return Err(ProcessError::RecordingMismatch(format!(
                    "node {node_id} not found in project"
                )));
            }
        }
    }
    Ok(())
}

impl GraphProcessor {
    /// Re-emits a recorded run on this processor's bus and rebuilds the run
    /// snapshot from the event payloads.
    pub async fn replay_recording(&self, recording: &Recording) -> ProcessResult<GraphOutputs> {
        let inner = &self.inner;
        let events = recording
            .events
            .iter()
            .map(|e| e.to_event())
            .collect::<Result<Vec<_>, _>>()?;
        check_against_project(&inner.project, &events)?;

        if inner.running.swap(true, Ordering::SeqCst) {
            return Err(ProcessError::AlreadyRunning);
        }
        let _running = RunningGuard(&inner.running);
        let token = inner.abort.lock().begin_run(None);

        tracing::debug!(
            graph_id = %inner.graph.id(),
            recording_id = %recording.recording_id,
            events = events.len(),
            "replaying recording"
        );

        let own_graph = inner.graph.id().to_string();
        let project_nodes = inner.project.nodes_by_id();
        let delay = Duration::from_millis(inner.config.replay_chat_latency_ms);
        let mut snapshot = RunSnapshot::default();
        let mut failure: Option<String> = None;

        for event in events {
            if token.is_cancelled() {
                break;
            }
            match &event {
                ProcessEvent::NodeStart { node_id, .. } => {
                    let delayed = project_nodes.get(node_id.as_str()).is_some_and(|n| {
                        inner.config.replay_delay_node_types.contains(&n.node_type)
                    });
                    if delayed {
                        tokio::select! {
                            _ = tokio::time::sleep(delay) => {}
                            _ = token.cancelled() => break,
                        }
                    }
                }
                ProcessEvent::NodeFinish {
                    node_id, outputs, ..
                } if inner.nodes.contains_key(node_id) => {
                    snapshot
                        .results
                        .insert(node_id.clone(), NodeState::Outputs(outputs.clone()));
                    snapshot.visited.insert(node_id.clone());
                }
                ProcessEvent::NodeExcluded { node_id, .. } if inner.nodes.contains_key(node_id) => {
                    snapshot.results.insert(node_id.clone(), NodeState::Excluded);
                    snapshot.visited.insert(node_id.clone());
                }
                ProcessEvent::NodeError { node_id, error, .. }
                    if inner.nodes.contains_key(node_id) =>
                {
                    snapshot.errored.insert(node_id.clone(), error.clone());
                    snapshot.visited.insert(node_id.clone());
                }
                ProcessEvent::GraphFinish { graph_id, outputs } if *graph_id == own_graph => {
                    snapshot.graph_outputs = outputs.clone();
                }
                ProcessEvent::Done { results } => {
                    snapshot.graph_outputs = results.clone();
                }
                ProcessEvent::Error { error } => {
                    failure = Some(error.clone());
                }
                _ => {}
            }
            inner.bus.emit(event);
        }

        let outputs = snapshot.graph_outputs.clone();
        *inner.last_run.lock() = snapshot;

        if token.is_cancelled() {
            let outcome = inner.abort.lock().outcome();
            return match outcome {
                Some(o) if o.successful => Ok(outputs),
                other => Err(ProcessError::Aborted(
                    other
                        .and_then(|o| o.error)
                        .unwrap_or_else(|| "run was cancelled".to_string()),
                )),
            };
        }
        match failure {
            Some(error) => Err(ProcessError::ReplayFailed(error)),
            None => Ok(outputs),
        }
    }
}
