use std::collections::{HashMap, HashSet, VecDeque};

use crate::graph::NodeId;
use crate::value::{DataValue, GraphOutputs, Outputs};

/// Result recorded for a visited node.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeState {
    Outputs(Outputs),
    /// Skipped because one of its inputs came from a branch not taken
    Excluded,
}

impl NodeState {
    /// Value of one output port; every port of an excluded node reads as excluded.
    pub fn output(&self, port: &str) -> Option<DataValue> {
        match self {
            NodeState::Outputs(outputs) => outputs.get(port).cloned(),
            NodeState::Excluded => Some(DataValue::excluded()),
        }
    }

    pub fn outputs(&self) -> Option<&Outputs> {
        match self {
            NodeState::Outputs(outputs) => Some(outputs),
            NodeState::Excluded => None,
        }
    }

    pub fn is_excluded(&self) -> bool {
        matches!(self, NodeState::Excluded)
    }
}

/// Run-state maps kept after a run ends for inspection.
#[derive(Debug, Clone, Default)]
pub struct RunSnapshot {
    pub results: HashMap<NodeId, NodeState>,
    pub visited: HashSet<NodeId>,
    pub errored: HashMap<NodeId, String>,
    pub graph_outputs: GraphOutputs,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Work {
    /// Schedule a node's producers, then try the node itself
    Fetch(NodeId),
    /// Re-check readiness and dispatch when ready
    TryProcess(NodeId),
}

/// Per-run scheduler state, owned and mutated only by the dispatch loop.
#[derive(Debug, Default)]
pub(crate) struct RunState {
    pub(crate) results: HashMap<NodeId, NodeState>,
    pub(crate) visited: HashSet<NodeId>,
    pub(crate) processing: HashSet<NodeId>,
    pub(crate) errored: HashMap<NodeId, String>,
    pub(crate) remaining: HashSet<NodeId>,
    pub(crate) queued: HashSet<NodeId>,
    pub(crate) loop_controllers_seen: HashSet<NodeId>,
    /// Dispatches per loop controller in this run
    pub(crate) loop_iterations: HashMap<NodeId, u32>,
    /// Loop controller → nodes that took part in its body
    pub(crate) loops: HashMap<NodeId, HashSet<NodeId>>,
    /// Node → governing loop controller
    pub(crate) loop_of: HashMap<NodeId, NodeId>,
    pub(crate) broken_loops: HashSet<NodeId>,
    /// Node → race nodes whose branches it feeds
    races: HashMap<NodeId, HashSet<NodeId>>,
    pub(crate) completed_races: HashSet<NodeId>,
    generations: HashMap<NodeId, u64>,
    pub(crate) work: VecDeque<Work>,
    pub(crate) graph_outputs: GraphOutputs,
}

impl RunState {
    pub(crate) fn new(node_ids: impl IntoIterator<Item = NodeId>) -> Self {
        Self {
            remaining: node_ids.into_iter().collect(),
            ..Default::default()
        }
    }

    pub(crate) fn generation(&self, node_id: &str) -> u64 {
        self.generations.get(node_id).copied().unwrap_or(0)
    }

    pub(crate) fn mark_visited(&mut self, node_id: &str) {
        self.visited.insert(node_id.to_string());
        self.processing.remove(node_id);
        self.remaining.remove(node_id);
    }

    /// Records the node as a member of the loop body governing it, if any.
    pub(crate) fn join_loop(&mut self, node_id: &str) {
        if let Some(controller) = self.loop_of.get(node_id) {
            if controller != node_id {
                self.loops
                    .entry(controller.clone())
                    .or_default()
                    .insert(node_id.to_string());
            }
        }
    }

    /// A controller broke unless its `break` output still reads loop-not-broken.
    pub(crate) fn did_break(&self, controller: &str) -> bool {
        match self.results.get(controller) {
            Some(NodeState::Outputs(outputs)) => {
                !outputs.get("break").is_some_and(DataValue::is_loop_not_broken)
            }
            _ => true,
        }
    }

    /// Clears the per-iteration state of every node in the controller's body.
    /// In-flight computations of those nodes become stale.
    pub(crate) fn reset_loop(&mut self, controller: &str) -> Vec<NodeId> {
        let body: Vec<NodeId> = self
            .loops
            .get(controller)
            .map(|nodes| nodes.iter().cloned().collect())
            .unwrap_or_default();
        for node_id in &body {
            self.visited.remove(node_id);
            self.results.remove(node_id);
            if self.processing.remove(node_id) {
                *self.generations.entry(node_id.clone()).or_insert(0) += 1;
            }
            self.remaining.insert(node_id.clone());
        }
        body
    }

    /// A producer joins the consumer's races, and the consumer itself when it is a race.
    pub(crate) fn join_races(&mut self, consumer: &str, producer: &str, consumer_is_race: bool) {
        let mut inherited = self.races.get(consumer).cloned().unwrap_or_default();
        if consumer_is_race {
            inherited.insert(consumer.to_string());
        }
        if !inherited.is_empty() {
            self.races
                .entry(producer.to_string())
                .or_default()
                .extend(inherited);
        }
    }

    pub(crate) fn in_race(&self, node_id: &str, race: &str) -> bool {
        self.races.get(node_id).is_some_and(|r| r.contains(race))
    }

    pub(crate) fn in_completed_race(&self, node_id: &str) -> bool {
        self.races
            .get(node_id)
            .is_some_and(|r| r.iter().any(|race| self.completed_races.contains(race)))
    }

    /// First non-excluded value wins; an excluded marker only fills an unset slot.
    pub(crate) fn record_graph_output(&mut self, output_id: &str, value: Option<&DataValue>) {
        let Some(value) = value else {
            return;
        };
        let current = self.graph_outputs.get(output_id);
        let replace = if value.is_excluded() {
            current.is_none()
        } else {
            current.map_or(true, DataValue::is_excluded)
        };
        if replace {
            self.graph_outputs
                .insert(output_id.to_string(), value.clone());
        }
    }

    pub(crate) fn snapshot(&self) -> RunSnapshot {
        RunSnapshot {
            results: self.results.clone(),
            visited: self.visited.clone(),
            errored: self.errored.clone(),
            graph_outputs: self.graph_outputs.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outputs(pairs: &[(&str, DataValue)]) -> Outputs {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_excluded_node_reads_excluded_on_every_port() {
        assert!(NodeState::Excluded.output("anything").unwrap().is_excluded());
        let state = NodeState::Outputs(outputs(&[("a", DataValue::string("x"))]));
        assert_eq!(state.output("a"), Some(DataValue::string("x")));
        assert_eq!(state.output("b"), None);
    }

    #[test]
    fn test_did_break() {
        let mut state = RunState::default();
        state.results.insert(
            "loop".into(),
            NodeState::Outputs(outputs(&[("break", DataValue::loop_not_broken())])),
        );
        assert!(!state.did_break("loop"));
        state.results.insert(
            "loop".into(),
            NodeState::Outputs(outputs(&[("break", DataValue::string_array(vec![]))])),
        );
        assert!(state.did_break("loop"));
        state.results.insert("loop".into(), NodeState::Outputs(Outputs::new()));
        assert!(state.did_break("loop"));
    }

    #[test]
    fn test_reset_loop_clears_body_and_bumps_in_flight_generation() {
        let mut state = RunState::new(vec!["c".to_string(), "a".to_string(), "b".to_string()]);
        state.loop_of.insert("a".into(), "c".into());
        state.loop_of.insert("b".into(), "c".into());
        state.loop_of.insert("c".into(), "c".into());
        for id in ["a", "b", "c"] {
            state.join_loop(id);
        }
        state.results.insert("a".into(), NodeState::Outputs(Outputs::new()));
        state.mark_visited("a");
        state.processing.insert("b".into());

        let mut reset = state.reset_loop("c");
        reset.sort();
        assert_eq!(reset, vec!["a".to_string(), "b".to_string()]);
        assert!(!state.visited.contains("a"));
        assert!(!state.results.contains_key("a"));
        assert!(!state.processing.contains("b"));
        assert_eq!(state.generation("a"), 0);
        assert_eq!(state.generation("b"), 1);
        assert!(state.remaining.contains("a"));
    }

    #[test]
    fn test_graph_output_precedence() {
        let mut state = RunState::default();
        state.record_graph_output("out", Some(&DataValue::excluded()));
        assert!(state.graph_outputs["out"].is_excluded());
        state.record_graph_output("out", Some(&DataValue::string("a")));
        state.record_graph_output("out", Some(&DataValue::string("b")));
        state.record_graph_output("out", Some(&DataValue::excluded()));
        assert_eq!(state.graph_outputs["out"], DataValue::string("a"));
    }

    #[test]
    fn test_race_membership_reaches_indirect_producers() {
        let mut state = RunState::default();
        state.join_races("race", "branch", true);
        state.join_races("branch", "source", false);
        state.join_races("other", "unrelated", false);
        assert!(state.in_race("source", "race"));
        assert!(!state.in_completed_race("source"));
        state.completed_races.insert("race".into());
        assert!(state.in_completed_race("branch"));
        assert!(state.in_completed_race("source"));
        assert!(!state.in_completed_race("unrelated"));
        assert!(!state.in_completed_race("race"));
    }
}
