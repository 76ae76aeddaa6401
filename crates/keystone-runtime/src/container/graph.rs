//! # Dependency Graph
//!
//! Built from the registry whenever it changes. Edges only point at keys
//! that are registered at build time; anything else is resolved lazily by
//! the factory and fails there if it never shows up.

use super::registry::ServiceRegistry;
use keystone_types::{ContainerError, ServiceKey};
use serde::Serialize;
use std::collections::HashMap;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    InProgress,
    Done,
}

/// Registered keys and their registered dependencies.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    /// Roots in priority, then registration order.
    nodes: Vec<ServiceKey>,
    edges: HashMap<ServiceKey, Vec<ServiceKey>>,
}

impl DependencyGraph {
    #[must_use]
    pub fn build(registry: &ServiceRegistry) -> Self {
        let descriptors = registry.ordered();
        let mut nodes = Vec::with_capacity(descriptors.len());
        let mut edges = HashMap::with_capacity(descriptors.len());
        for descriptor in descriptors {
            nodes.push(descriptor.key);
            let registered: Vec<ServiceKey> = descriptor
                .dependencies
                .iter()
                .copied()
                .filter(|dep| registry.contains(dep))
                .collect();
            edges.insert(descriptor.key, registered);
        }
        Self { nodes, edges }
    }

    /// Registered dependencies of `key`.
    #[must_use]
    pub fn dependencies_of(&self, key: &ServiceKey) -> &[ServiceKey] {
        self.edges.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    #[must_use]
    pub fn nodes(&self) -> &[ServiceKey] {
        &self.nodes
    }

    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.edges.values().map(Vec::len).sum()
    }

    /// Dependencies-first order over every node.
    ///
    /// With `detect_cycles` a back edge fails with
    /// [`ContainerError::CircularDependency`]. Without it the edge is skipped
    /// and a warning is logged.
    pub fn topological_order(&self, detect_cycles: bool) -> Result<Vec<ServiceKey>, ContainerError> {
        let mut marks = HashMap::with_capacity(self.nodes.len());
        let mut stack = Vec::new();
        let mut order = Vec::with_capacity(self.nodes.len());
        for root in &self.nodes {
            self.visit(*root, detect_cycles, &mut marks, &mut stack, &mut order)?;
        }
        Ok(order)
    }

    fn visit(
        &self,
        key: ServiceKey,
        detect_cycles: bool,
        marks: &mut HashMap<ServiceKey, Mark>,
        stack: &mut Vec<ServiceKey>,
        order: &mut Vec<ServiceKey>,
    ) -> Result<(), ContainerError> {
        match marks.get(&key) {
            Some(Mark::Done) => return Ok(()),
            Some(Mark::InProgress) => {
                let start = stack.iter().position(|k| *k == key).unwrap_or(0);
                let mut path = stack[start..].to_vec();
                path.push(key);
                let err = ContainerError::CircularDependency { key, path };
                if detect_cycles {
                    return Err(err);
                }
                warn!("[Container] {}, skipping edge", err);
                return Ok(());
            }
            None => {}
        }

        marks.insert(key, Mark::InProgress);
        stack.push(key);
        for dep in self.dependencies_of(&key) {
            self.visit(*dep, detect_cycles, marks, stack, order)?;
        }
        stack.pop();
        marks.insert(key, Mark::Done);
        order.push(key);
        Ok(())
    }

    /// Serializable adjacency view.
    #[must_use]
    pub fn snapshot(&self) -> Vec<GraphNode> {
        self.nodes
            .iter()
            .map(|key| GraphNode {
                service: key.to_string(),
                depends_on: self
                    .dependencies_of(key)
                    .iter()
                    .map(ToString::to_string)
                    .collect(),
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GraphNode {
    pub service: String,
    pub depends_on: Vec<String>,
}
