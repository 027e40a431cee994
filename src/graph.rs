//! Read-only view of the dependency graph between registered caches
//!
//! Propagation walks each entity's dependents directly; this view exists for
//! inspection (cycle detection, ordering, listing edges).

use petgraph::algo::{is_cyclic_directed, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use std::collections::HashMap;

/// Snapshot of entity → dependent edges
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    graph: DiGraph<String, ()>, // Node = cache name, edge = "propagates to"
    indices: HashMap<String, NodeIndex>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node for `name` unless one exists
    pub fn add_cache(&mut self, name: &str) -> NodeIndex {
        if let Some(&idx) = self.indices.get(name) {
            return idx;
        }
        let idx = self.graph.add_node(name.to_string());
        self.indices.insert(name.to_string(), idx);
        idx
    }

    /// `dependent` is notified of lifecycle changes to `name`
    pub fn add_dependent(&mut self, name: &str, dependent: &str) {
        let from = self.add_cache(name);
        let to = self.add_cache(dependent);
        if self.graph.find_edge(from, to).is_none() {
            self.graph.add_edge(from, to, ());
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.indices.contains_key(name)
    }

    pub fn cache_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Direct dependents of `name`, sorted
    pub fn dependents_of(&self, name: &str) -> Vec<&str> {
        let Some(&idx) = self.indices.get(name) else {
            return vec![];
        };

        let mut dependents: Vec<&str> = self
            .graph
            .edges_directed(idx, Direction::Outgoing)
            .filter_map(|edge| self.graph.node_weight(edge.target()).map(|s| s.as_str()))
            .collect();
        dependents.sort_unstable();
        dependents
    }

    /// Caches that list `name` as a dependent, sorted
    pub fn dependees_of(&self, name: &str) -> Vec<&str> {
        let Some(&idx) = self.indices.get(name) else {
            return vec![];
        };

        let mut dependees: Vec<&str> = self
            .graph
            .edges_directed(idx, Direction::Incoming)
            .filter_map(|edge| self.graph.node_weight(edge.source()).map(|s| s.as_str()))
            .collect();
        dependees.sort_unstable();
        dependees
    }

    pub fn has_cycles(&self) -> bool {
        is_cyclic_directed(&self.graph)
    }

    /// Every cache ahead of its dependents, or `None` when the graph has a cycle
    pub fn topological_order(&self) -> Option<Vec<&str>> {
        toposort(&self.graph, None).ok().map(|order| {
            order
                .into_iter()
                .filter_map(|idx| self.graph.node_weight(idx).map(|s| s.as_str()))
                .collect()
        })
    }

    pub fn graph(&self) -> &DiGraph<String, ()> {
        &self.graph
    }
}
