//! Connection types and graph utilities.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use uuid::Uuid;

/// Default handle name on both ends of a connection.
pub const HANDLE_MAIN: &str = "main";

/// Routing handles used by the built-in control nodes.
pub const HANDLE_TRUE: &str = "true";
pub const HANDLE_FALSE: &str = "false";
pub const HANDLE_TRY: &str = "try";
pub const HANDLE_CATCH: &str = "catch";
pub const HANDLE_DEFAULT: &str = "default";

fn default_handle() -> String {
    HANDLE_MAIN.to_string()
}

/// A directed edge between a source node's output handle and a target
/// node's input handle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    #[serde(default)]
    pub id: String,
    pub source_node_id: String,
    #[serde(default = "default_handle")]
    pub source_output: String,
    pub target_node_id: String,
    #[serde(default = "default_handle")]
    pub target_input: String,
}

impl Connection {
    /// Create a main-to-main connection. Self-loops are refused.
    pub fn new(
        source: impl Into<String>,
        target: impl Into<String>,
    ) -> Result<Self, crate::WorkflowError> {
        Self::with_handles(source, HANDLE_MAIN, target, HANDLE_MAIN)
    }

    /// Create a connection with explicit handles. Blank handles normalise
    /// to `"main"`; self-loops are refused.
    pub fn with_handles(
        source: impl Into<String>,
        source_output: impl Into<String>,
        target: impl Into<String>,
        target_input: impl Into<String>,
    ) -> Result<Self, crate::WorkflowError> {
        let source = source.into();
        let target = target.into();
        if source == target {
            return Err(crate::WorkflowError::ConnectionError(format!(
                "Node '{source}' cannot be connected to itself"
            )));
        }
        if source.trim().is_empty() || target.trim().is_empty() {
            return Err(crate::WorkflowError::ConnectionError(
                "Connection endpoints must not be blank".to_string(),
            ));
        }
        let mut conn = Self {
            id: Uuid::new_v4().to_string(),
            source_node_id: source,
            source_output: source_output.into(),
            target_node_id: target,
            target_input: target_input.into(),
        };
        conn.normalise();
        Ok(conn)
    }

    /// Normalise blank handles to `"main"` and assign an id when the
    /// import omitted one. Applied after deserialization so imported JSON
    /// with empty handle strings behaves like omitted ones.
    pub fn normalise(&mut self) {
        if self.id.trim().is_empty() {
            self.id = Uuid::new_v4().to_string();
        }
        if self.source_output.trim().is_empty() {
            self.source_output = HANDLE_MAIN.to_string();
        }
        if self.target_input.trim().is_empty() {
            self.target_input = HANDLE_MAIN.to_string();
        }
    }
}

/// Utility functions for working with the connection set as a graph.
pub mod graph {
    use super::*;

    /// Adjacency list keyed by source node id.
    pub fn adjacency(connections: &[Connection]) -> HashMap<&str, Vec<&Connection>> {
        let mut map: HashMap<&str, Vec<&Connection>> = HashMap::new();
        for conn in connections {
            map.entry(conn.source_node_id.as_str()).or_default().push(conn);
        }
        map
    }

    /// Reverse adjacency list keyed by target node id.
    pub fn reverse_adjacency(connections: &[Connection]) -> HashMap<&str, Vec<&Connection>> {
        let mut map: HashMap<&str, Vec<&Connection>> = HashMap::new();
        for conn in connections {
            map.entry(conn.target_node_id.as_str()).or_default().push(conn);
        }
        map
    }

    /// Nodes with no incoming edges, in declaration order.
    pub fn entry_nodes(node_ids: &[String], connections: &[Connection]) -> Vec<String> {
        let has_incoming: HashSet<&str> = connections
            .iter()
            .map(|c| c.target_node_id.as_str())
            .collect();
        node_ids
            .iter()
            .filter(|id| !has_incoming.contains(id.as_str()))
            .cloned()
            .collect()
    }

    /// Result of laying the graph out in evaluation order.
    #[derive(Debug, Clone)]
    pub struct Layering {
        /// Node ids grouped by layer index, each layer in declaration order.
        pub layers: Vec<Vec<String>>,
        /// Layer index per node id.
        pub layer_of: HashMap<String, usize>,
        /// Edges discarded to break cycles, as (source, target) pairs.
        pub discarded_edges: Vec<(String, String)>,
    }

    impl Layering {
        /// Flattened evaluation order: layers in ascending index, nodes in
        /// declaration order within a layer.
        pub fn order(&self) -> Vec<String> {
            self.layers.iter().flatten().cloned().collect()
        }
    }

    /// Assign each node a layer equal to the longest path from any entry,
    /// matching the editor's column assignment. The static graph may
    /// contain cycles; back edges found during the traversal are discarded
    /// and reported so every node is laid out at most once.
    pub fn layering(node_ids: &[String], connections: &[Connection]) -> Layering {
        let index_of: HashMap<&str, usize> = node_ids
            .iter()
            .enumerate()
            .map(|(i, id)| (id.as_str(), i))
            .collect();
        let adj = adjacency(connections);

        // Pass 1: iterative DFS marking back edges. Roots are the entry
        // nodes; any node unreachable from an entry (a detached cycle) is
        // promoted to a pseudo-root in declaration order.
        let mut state: HashMap<&str, u8> = HashMap::new(); // 0 unseen, 1 on stack, 2 done
        let mut discarded: HashSet<(String, String)> = HashSet::new();
        let mut discard_order: Vec<(String, String)> = Vec::new();

        let mut roots = entry_nodes(node_ids, connections);
        for id in node_ids {
            if !roots.contains(id) {
                roots.push(id.clone());
            }
        }

        for root in &roots {
            if state.get(root.as_str()).copied().unwrap_or(0) != 0 {
                continue;
            }
            // (node, next child index)
            let mut stack: Vec<(&str, usize)> = vec![(root.as_str(), 0)];
            state.insert(root.as_str(), 1);
            while let Some((node, child_idx)) = stack.pop() {
                let children = adj.get(node).map(|v| v.as_slice()).unwrap_or(&[]);
                if child_idx < children.len() {
                    stack.push((node, child_idx + 1));
                    let target = children[child_idx].target_node_id.as_str();
                    if !index_of.contains_key(target) {
                        continue;
                    }
                    match state.get(target).copied().unwrap_or(0) {
                        0 => {
                            state.insert(target, 1);
                            stack.push((target, 0));
                        }
                        1 => {
                            let edge = (node.to_string(), target.to_string());
                            if discarded.insert(edge.clone()) {
                                discard_order.push(edge);
                            }
                        }
                        _ => {}
                    }
                } else {
                    state.insert(node, 2);
                }
            }
        }

        // Pass 2: Kahn over the acyclic remainder, relaxing layer indices
        // so a node lands one past its deepest predecessor.
        let live: Vec<&Connection> = connections
            .iter()
            .filter(|c| {
                index_of.contains_key(c.source_node_id.as_str())
                    && index_of.contains_key(c.target_node_id.as_str())
                    && !discarded
                        .contains(&(c.source_node_id.clone(), c.target_node_id.clone()))
            })
            .collect();

        let mut in_degree: HashMap<&str, usize> =
            node_ids.iter().map(|id| (id.as_str(), 0)).collect();
        for conn in &live {
            *in_degree.get_mut(conn.target_node_id.as_str()).unwrap() += 1;
        }

        let mut layer_of: HashMap<String, usize> = HashMap::new();
        let mut queue: VecDeque<&str> = node_ids
            .iter()
            .map(|id| id.as_str())
            .filter(|id| in_degree[id] == 0)
            .collect();
        for id in &queue {
            layer_of.insert(id.to_string(), 0);
        }

        let mut live_adj: HashMap<&str, Vec<&Connection>> = HashMap::new();
        for conn in &live {
            live_adj
                .entry(conn.source_node_id.as_str())
                .or_default()
                .push(conn);
        }

        while let Some(node) = queue.pop_front() {
            let layer = layer_of[node];
            for conn in live_adj.get(node).map(|v| v.as_slice()).unwrap_or(&[]) {
                let target = conn.target_node_id.as_str();
                let entry = layer_of.entry(target.to_string()).or_insert(0);
                *entry = (*entry).max(layer + 1);
                let degree = in_degree.get_mut(target).unwrap();
                *degree -= 1;
                if *degree == 0 {
                    queue.push_back(target);
                }
            }
        }

        let max_layer = layer_of.values().copied().max().unwrap_or(0);
        let mut layers: Vec<Vec<String>> = vec![Vec::new(); max_layer + 1];
        for id in node_ids {
            if let Some(&layer) = layer_of.get(id) {
                layers[layer].push(id.clone());
            }
        }
        layers.retain(|l| !l.is_empty());

        Layering {
            layers,
            layer_of,
            discarded_edges: discard_order,
        }
    }

    /// Nodes reachable from `from`. When `first_hop_handle` is given, only
    /// edges leaving `from` on that output handle seed the traversal; the
    /// rest of the walk follows every edge.
    pub fn descendants(
        connections: &[Connection],
        from: &str,
        first_hop_handle: Option<&str>,
    ) -> HashSet<String> {
        let adj = adjacency(connections);
        let mut seen: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<&str> = VecDeque::new();

        for conn in adj.get(from).map(|v| v.as_slice()).unwrap_or(&[]) {
            if let Some(handle) = first_hop_handle {
                if conn.source_output != handle {
                    continue;
                }
            }
            if seen.insert(conn.target_node_id.clone()) {
                queue.push_back(conn.target_node_id.as_str());
            }
        }

        while let Some(node) = queue.pop_front() {
            for conn in adj.get(node).map(|v| v.as_slice()).unwrap_or(&[]) {
                if seen.insert(conn.target_node_id.clone()) {
                    queue.push_back(conn.target_node_id.as_str());
                }
            }
        }

        seen
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn self_loop_is_refused() {
        assert!(Connection::new("a", "a").is_err());
    }

    #[test]
    fn blank_handles_normalise_to_main() {
        let conn = Connection::with_handles("a", "  ", "b", "").unwrap();
        assert_eq!(conn.source_output, HANDLE_MAIN);
        assert_eq!(conn.target_input, HANDLE_MAIN);
    }

    #[test]
    fn layering_uses_longest_path() {
        // a -> b -> d, a -> d: d must wait for its deepest predecessor.
        let nodes = ids(&["a", "b", "d"]);
        let conns = vec![
            Connection::new("a", "b").unwrap(),
            Connection::new("b", "d").unwrap(),
            Connection::new("a", "d").unwrap(),
        ];
        let layering = graph::layering(&nodes, &conns);
        assert_eq!(layering.layer_of["a"], 0);
        assert_eq!(layering.layer_of["b"], 1);
        assert_eq!(layering.layer_of["d"], 2);
        assert!(layering.discarded_edges.is_empty());
    }

    #[test]
    fn cycle_edge_is_discarded_and_every_node_laid_out() {
        let nodes = ids(&["a", "b", "c"]);
        let conns = vec![
            Connection::new("a", "b").unwrap(),
            Connection::new("b", "c").unwrap(),
            Connection::new("c", "b").unwrap(),
        ];
        let layering = graph::layering(&nodes, &conns);
        assert_eq!(layering.discarded_edges, vec![("c".to_string(), "b".to_string())]);
        assert_eq!(layering.order().len(), 3);
    }

    #[test]
    fn descendants_respects_first_hop_handle() {
        let conns = vec![
            Connection::with_handles("if", "true", "yes", HANDLE_MAIN).unwrap(),
            Connection::with_handles("if", "false", "no", HANDLE_MAIN).unwrap(),
            Connection::new("yes", "after").unwrap(),
        ];
        let reached = graph::descendants(&conns, "if", Some("true"));
        assert!(reached.contains("yes"));
        assert!(reached.contains("after"));
        assert!(!reached.contains("no"));
    }
}
