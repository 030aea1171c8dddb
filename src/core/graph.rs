//! Dependency graph over named nodes
//!
//! Used to order builds and to find the ones that can never become
//! buildable because they sit on (or behind) a dependency cycle.

use std::collections::{HashMap, VecDeque};

use crate::error::ResolverError;

/// Dependency graph: node -> dependencies
#[derive(Debug, Default)]
pub struct DependencyGraph {
    /// Nodes in insertion order
    nodes: Vec<String>,
    /// Adjacency list: node -> dependencies
    edges: HashMap<String, Vec<String>>,
}

impl DependencyGraph {
    /// Create a new empty dependency graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node with its dependencies
    ///
    /// Dependencies that never become nodes themselves are treated as
    /// already satisfied.
    pub fn add_node(&mut self, name: &str, dependencies: Vec<String>) {
        if !self.edges.contains_key(name) {
            self.nodes.push(name.to_string());
        }
        self.edges.insert(name.to_string(), dependencies);
    }

    /// Number of nodes
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the graph has no nodes
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// In-degree reduction; returns (ordered, remaining)
    fn reduce(&self) -> (Vec<String>, Vec<String>) {
        let mut in_degree: HashMap<&str, usize> = HashMap::new();
        let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();

        for node in &self.nodes {
            let deps = self.edges.get(node).map(Vec::as_slice).unwrap_or_default();
            let mut count = 0;
            for dep in deps {
                if self.edges.contains_key(dep) {
                    count += 1;
                    dependents.entry(dep.as_str()).or_default().push(node.as_str());
                }
            }
            in_degree.insert(node.as_str(), count);
        }

        let mut queue: VecDeque<&str> = self
            .nodes
            .iter()
            .map(String::as_str)
            .filter(|node| in_degree.get(node) == Some(&0))
            .collect();
        let mut ordered = Vec::with_capacity(self.nodes.len());

        while let Some(node) = queue.pop_front() {
            ordered.push(node.to_string());
            for dependent in dependents.get(node).into_iter().flatten() {
                if let Some(degree) = in_degree.get_mut(dependent) {
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push_back(*dependent);
                    }
                }
            }
        }

        let remaining = self
            .nodes
            .iter()
            .filter(|node| in_degree.get(node.as_str()).is_some_and(|d| *d > 0))
            .cloned()
            .collect();

        (ordered, remaining)
    }

    /// Compute topological sort (build order)
    ///
    /// Dependencies come before dependents; otherwise insertion order is kept.
    pub fn topological_sort(&self) -> Result<Vec<String>, ResolverError> {
        let (ordered, remaining) = self.reduce();
        if remaining.is_empty() {
            Ok(ordered)
        } else {
            Err(ResolverError::CircularDependency { cycle: remaining })
        }
    }

    /// Nodes that keep a nonzero in-degree after reduction
    ///
    /// These are on a cycle or depend on one.
    pub fn blocked_nodes(&self) -> Vec<String> {
        self.reduce().1
    }

    /// Check if the graph has any cycles
    pub fn has_cycle(&self) -> bool {
        !self.blocked_nodes().is_empty()
    }
}
