//! Strongly-connected-component analysis of a graph's connections.
//!
//! Runs Tarjan's index/low-link algorithm with an explicit call stack so deep
//! graphs cannot overflow the thread stack. Nodes in a single-member component
//! execute at most once per run; members of a larger component may take part
//! in a loop governed by a loop controller.

use std::collections::HashMap;

use super::types::{Connection, Node, NodeId};

/// Result of SCC analysis, computed once per processor.
#[derive(Debug, Clone, Default)]
pub struct CycleAnalysis {
    components: Vec<Vec<NodeId>>,
    component_of: HashMap<NodeId, usize>,
}

impl CycleAnalysis {
    pub fn analyze(nodes: &[Node], connections: &[Connection]) -> Self {
        let components = strongly_connected_components(nodes, connections);
        let component_of = components
            .iter()
            .enumerate()
            .flat_map(|(i, members)| members.iter().map(move |id| (id.clone(), i)))
            .collect();
        Self {
            components,
            component_of,
        }
    }

    /// Components in reverse topological order of the condensation.
    pub fn components(&self) -> &[Vec<NodeId>] {
        &self.components
    }

    pub fn component(&self, node_id: &str) -> Option<&[NodeId]> {
        self.component_of
            .get(node_id)
            .map(|&i| self.components[i].as_slice())
    }

    pub fn in_same_component(&self, a: &str, b: &str) -> bool {
        match (self.component_of.get(a), self.component_of.get(b)) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        }
    }

    /// True for members of a component with more than one node.
    pub fn is_loop_eligible(&self, node_id: &str) -> bool {
        self.component(node_id).is_some_and(|c| c.len() > 1)
    }
}

pub fn strongly_connected_components(
    nodes: &[Node],
    connections: &[Connection],
) -> Vec<Vec<NodeId>> {
    let position: HashMap<&str, usize> = nodes
        .iter()
        .enumerate()
        .map(|(i, n)| (n.id.as_str(), i))
        .collect();

    let mut adjacency = vec![Vec::new(); nodes.len()];
    for conn in connections {
        if let (Some(&from), Some(&to)) = (
            position.get(conn.output_node_id.as_str()),
            position.get(conn.input_node_id.as_str()),
        ) {
            if !adjacency[from].contains(&to) {
                adjacency[from].push(to);
            }
        }
    }

    let mut next_index = 0usize;
    let mut index: Vec<Option<usize>> = vec![None; nodes.len()];
    let mut low_link = vec![0usize; nodes.len()];
    let mut on_stack = vec![false; nodes.len()];
    let mut stack: Vec<usize> = Vec::new();
    let mut components = Vec::new();

    for root in 0..nodes.len() {
        if index[root].is_some() {
            continue;
        }

        index[root] = Some(next_index);
        low_link[root] = next_index;
        next_index += 1;
        stack.push(root);
        on_stack[root] = true;
        let mut call_stack: Vec<(usize, usize)> = vec![(root, 0)];

        while let Some(frame) = call_stack.last_mut() {
            let v = frame.0;
            if frame.1 < adjacency[v].len() {
                let w = adjacency[v][frame.1];
                frame.1 += 1;
                match index[w] {
                    None => {
                        index[w] = Some(next_index);
                        low_link[w] = next_index;
                        next_index += 1;
                        stack.push(w);
                        on_stack[w] = true;
                        call_stack.push((w, 0));
                    }
                    Some(w_index) if on_stack[w] => {
                        low_link[v] = low_link[v].min(w_index);
                    }
                    Some(_) => {}
                }
                continue;
            }

            call_stack.pop();
            if let Some(&(parent, _)) = call_stack.last() {
                low_link[parent] = low_link[parent].min(low_link[v]);
            }

            if Some(low_link[v]) == index[v] {
                let mut component = Vec::new();
                while let Some(w) = stack.pop() {
                    on_stack[w] = false;
                    component.push(nodes[w].id.clone());
                    if w == v {
                        break;
                    }
                }
                components.push(component);
            }
        }
    }

    components
}

#[cfg(test)]
mod tests {
    use super::*;
    use petgraph::algo::tarjan_scc;
    use petgraph::graph::DiGraph;

    fn nodes(ids: &[&str]) -> Vec<Node> {
        ids.iter().map(|id| Node::new(*id, "text")).collect()
    }

    fn conns(edges: &[(&str, &str)]) -> Vec<Connection> {
        edges
            .iter()
            .enumerate()
            .map(|(i, (a, b))| Connection::new(*a, "output", *b, format!("input{}", i)))
            .collect()
    }

    fn normalize(mut comps: Vec<Vec<String>>) -> Vec<Vec<String>> {
        for c in comps.iter_mut() {
            c.sort();
        }
        comps.sort();
        comps
    }

    fn oracle(ids: &[&str], edges: &[(&str, &str)]) -> Vec<Vec<String>> {
        let mut g = DiGraph::<String, ()>::new();
        let idx: HashMap<&str, _> = ids.iter().map(|id| (*id, g.add_node(id.to_string()))).collect();
        for (a, b) in edges {
            g.add_edge(idx[a], idx[b], ());
        }
        normalize(
            tarjan_scc(&g)
                .into_iter()
                .map(|c| c.into_iter().map(|i| g[i].clone()).collect())
                .collect(),
        )
    }

    #[test]
    fn test_matches_petgraph_on_mixed_graphs() {
        let cases: Vec<(Vec<&str>, Vec<(&str, &str)>)> = vec![
            (vec!["a", "b", "c"], vec![("a", "b"), ("b", "c")]),
            (vec!["a", "b", "c"], vec![("a", "b"), ("b", "a"), ("b", "c")]),
            (
                vec!["a", "b", "c", "d", "e"],
                vec![("a", "b"), ("b", "c"), ("c", "a"), ("c", "d"), ("d", "e"), ("e", "d")],
            ),
            (
                vec!["l", "x", "y", "out"],
                vec![("l", "x"), ("x", "y"), ("y", "l"), ("l", "out")],
            ),
            (vec!["solo"], vec![("solo", "solo")]),
        ];
        for (ids, edges) in cases {
            let ours = strongly_connected_components(&nodes(&ids), &conns(&edges));
            assert_eq!(normalize(ours), oracle(&ids, &edges));
        }
    }

    #[test]
    fn test_loop_eligibility() {
        let analysis = CycleAnalysis::analyze(
            &nodes(&["in", "loop", "body", "out"]),
            &conns(&[("in", "loop"), ("loop", "body"), ("body", "loop"), ("loop", "out")]),
        );
        assert!(analysis.is_loop_eligible("loop"));
        assert!(analysis.is_loop_eligible("body"));
        assert!(analysis.in_same_component("loop", "body"));
        assert!(!analysis.is_loop_eligible("in"));
        assert!(!analysis.is_loop_eligible("out"));
        assert!(!analysis.in_same_component("in", "out"));
        assert_eq!(analysis.components().len(), 3);
    }

    #[test]
    fn test_deep_chain_does_not_overflow() {
        let ids: Vec<String> = (0..50_000).map(|i| format!("n{}", i)).collect();
        let ns: Vec<Node> = ids.iter().map(|id| Node::new(id.clone(), "text")).collect();
        let cs: Vec<Connection> = ids
            .windows(2)
            .map(|w| Connection::new(w[0].clone(), "output", w[1].clone(), "input"))
            .collect();
        let comps = strongly_connected_components(&ns, &cs);
        assert_eq!(comps.len(), 50_000);
    }
}
