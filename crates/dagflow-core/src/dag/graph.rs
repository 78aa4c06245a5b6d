//! The directed acyclic graph built from a loaded workflow: cycle detection,
//! orphan/unreachable diagnostics, and layered execution planning.

use std::collections::{HashMap, HashSet};

use crate::dag::types::{EdgeDefinition, NodeDefinition, WorkflowDefinition};
use crate::{DagError, Result};

/// The validated, immutable graph shared by every run of a workflow.
#[derive(Debug, Clone)]
pub struct Graph {
    pub nodes: HashMap<String, NodeDefinition>,
    pub edges: Vec<EdgeDefinition>,
    /// node -> nodes that depend on it.
    dependents: HashMap<String, Vec<String>>,
    /// node -> nodes it depends on.
    predecessors: HashMap<String, Vec<String>>,
}

impl Graph {
    /// Build the graph from a loaded workflow and run cycle detection.
    /// Orphan and unreachable nodes are reported as warnings via `tracing`,
    /// never as errors.
    pub fn build(workflow: &WorkflowDefinition) -> Result<Self> {
        let mut nodes = HashMap::new();
        for node in &workflow.nodes {
            nodes.insert(node.name.clone(), node.clone());
        }

        let mut dependents: HashMap<String, Vec<String>> =
            nodes.keys().map(|n| (n.clone(), Vec::new())).collect();
        let mut predecessors: HashMap<String, Vec<String>> =
            nodes.keys().map(|n| (n.clone(), Vec::new())).collect();

        for edge in &workflow.edges {
            dependents
                .get_mut(&edge.from)
                .expect("loader validated edge endpoints")
                .push(edge.to.clone());
            predecessors
                .get_mut(&edge.to)
                .expect("loader validated edge endpoints")
                .push(edge.from.clone());
        }

        let graph = Self {
            nodes,
            edges: workflow.edges.clone(),
            dependents,
            predecessors,
        };

        graph.detect_cycle()?;

        for name in graph.orphan_nodes() {
            tracing::warn!(node = %name, "orphan node: no dependencies and nothing depends on it");
        }
        for name in graph.unreachable_nodes() {
            tracing::warn!(node = %name, "unreachable node: not reachable from any root node");
        }

        Ok(graph)
    }

    pub fn predecessors_of(&self, name: &str) -> &[String] {
        self.predecessors
            .get(name)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn dependents_of(&self, name: &str) -> &[String] {
        self.dependents
            .get(name)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Nodes with no predecessors and no dependents at all.
    pub fn orphan_nodes(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .nodes
            .keys()
            .filter(|n| self.predecessors_of(n).is_empty() && self.dependents_of(n).is_empty())
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Nodes not reachable from any in-degree-0 node.
    pub fn unreachable_nodes(&self) -> Vec<String> {
        let roots: Vec<&String> = self
            .nodes
            .keys()
            .filter(|n| self.predecessors_of(n).is_empty())
            .collect();

        let mut reachable: HashSet<String> = HashSet::new();
        let mut stack: Vec<String> = roots.iter().map(|s| (*s).clone()).collect();
        while let Some(current) = stack.pop() {
            if reachable.insert(current.clone()) {
                for next in self.dependents_of(&current) {
                    if !reachable.contains(next) {
                        stack.push(next.clone());
                    }
                }
            }
        }

        let mut names: Vec<String> = self
            .nodes
            .keys()
            .filter(|n| !reachable.contains(*n))
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Kahn's algorithm over the full graph; returns `CyclicGraph` naming
    /// every node that never reached in-degree zero (i.e. every node left
    /// out of a valid topological linearization).
    fn detect_cycle(&self) -> Result<()> {
        let mut in_degree: HashMap<&str, usize> = self
            .nodes
            .keys()
            .map(|n| (n.as_str(), self.predecessors_of(n).len()))
            .collect();

        let mut queue: Vec<&str> = in_degree
            .iter()
            .filter(|(_, &deg)| deg == 0)
            .map(|(&n, _)| n)
            .collect();
        queue.sort();

        let mut processed: HashSet<&str> = HashSet::new();
        while let Some(current) = queue.pop() {
            if !processed.insert(current) {
                continue;
            }
            for dep in self.dependents_of(current) {
                if let Some(deg) = in_degree.get_mut(dep.as_str()) {
                    *deg -= 1;
                    if *deg == 0 {
                        queue.push(dep.as_str());
                    }
                }
            }
        }

        if processed.len() != self.nodes.len() {
            let mut cyclic: Vec<String> = self
                .nodes
                .keys()
                .filter(|n| !processed.contains(n.as_str()))
                .cloned()
                .collect();
            cyclic.sort();
            return Err(DagError::CyclicGraph { nodes: cyclic });
        }

        Ok(())
    }

    /// Layer the given subset of node names: layer 0 holds nodes whose
    /// predecessors are all outside `remaining`; layer k+1 holds nodes all
    /// of whose still-to-execute predecessors sit in layers ≤ k. If no
    /// node in what's left has all predecessors satisfied, the remainder is
    /// appended as one terminal layer so forward progress is guaranteed
    /// (possible only when `remaining` itself is inconsistent with the
    /// graph, never for the full node set since that case is already
    /// rejected by [`Graph::build`]).
    pub fn layer(&self, remaining: &HashSet<String>) -> Vec<Vec<String>> {
        let mut pending: HashSet<String> = remaining.clone();
        let mut layers: Vec<Vec<String>> = Vec::new();
        let mut done: HashSet<String> = HashSet::new();

        while !pending.is_empty() {
            let mut layer: Vec<String> = pending
                .iter()
                .filter(|n| {
                    self.predecessors_of(n)
                        .iter()
                        .all(|p| !pending.contains(p) || done.contains(p))
                })
                .cloned()
                .collect();
            layer.sort();

            if layer.is_empty() {
                // Forward-progress guarantee: dump everything left into one
                // terminal layer rather than looping forever.
                let mut remainder: Vec<String> = pending.iter().cloned().collect();
                remainder.sort();
                layers.push(remainder);
                break;
            }

            for name in &layer {
                pending.remove(name);
                done.insert(name.clone());
            }
            layers.push(layer);
        }

        layers
    }

    /// Layer the full node set. Never falls back to the terminal-layer
    /// guarantee since acyclicity was already established at build time.
    pub fn layer_all(&self) -> Vec<Vec<String>> {
        let all: HashSet<String> = self.nodes.keys().cloned().collect();
        self.layer(&all)
    }
}
