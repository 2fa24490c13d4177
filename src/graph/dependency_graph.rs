//! # Dependency Graph
//!
//! Immutable subgraph of the node definitions reachable from a target, built by a
//! single iterative depth-first traversal with three-colour marking. The same
//! traversal detects cycles, resolves every dependency id, and yields a
//! post-order (dependencies before dependents) used for level assignment.
//!
//! Layers are assigned by longest path from any source: a node sits one layer
//! above its deepest dependency, so every node in layer `i` has all of its
//! dependencies in layers `< i` and nodes within a layer are independent.

use super::errors::GraphError;
use crate::models::{MeasurementNode, NodeDefinitions, NodeId};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    InProgress,
    Done,
}

struct Frame {
    id: NodeId,
    dependencies: Vec<NodeId>,
    next: usize,
}

/// Reachable dependency subgraph for one target
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    target: NodeId,
    revision: u64,
    nodes: BTreeMap<NodeId, Arc<MeasurementNode>>,
    dependents: BTreeMap<NodeId, BTreeSet<NodeId>>,
    /// Post-order: every node appears after all of its dependencies
    order: Vec<NodeId>,
}

impl DependencyGraph {
    /// Build the subgraph reachable from `target`.
    ///
    /// O(V + E) over the reachable nodes and edges.
    pub fn build(definitions: &NodeDefinitions, target: &NodeId) -> Result<Self, GraphError> {
        let root = definitions
            .get(target)
            .ok_or_else(|| GraphError::UnknownNode {
                node_id: target.clone(),
                referenced_by: None,
            })?;

        let mut marks: HashMap<NodeId, Mark> = HashMap::new();
        let mut nodes = BTreeMap::new();
        let mut order = Vec::new();
        let mut stack = vec![Frame::new(root)];
        marks.insert(target.clone(), Mark::InProgress);
        nodes.insert(target.clone(), Arc::clone(root));

        while let Some(frame) = stack.last_mut() {
            let Some(dependency) = frame.dependencies.get(frame.next).cloned() else {
                marks.insert(frame.id.clone(), Mark::Done);
                order.push(frame.id.clone());
                stack.pop();
                continue;
            };
            frame.next += 1;

            if dependency == frame.id {
                return Err(GraphError::SelfDependency {
                    node_id: dependency,
                });
            }

            match marks.get(&dependency).copied() {
                Some(Mark::Done) => {}
                Some(Mark::InProgress) => {
                    let start = stack
                        .iter()
                        .position(|f| f.id == dependency)
                        .unwrap_or_default();
                    let mut cycle: Vec<NodeId> =
                        stack[start..].iter().map(|f| f.id.clone()).collect();
                    cycle.push(dependency);
                    return Err(GraphError::Cycle { cycle });
                }
                None => {
                    let node = definitions.get(&dependency).ok_or_else(|| {
                        GraphError::UnknownNode {
                            node_id: dependency.clone(),
                            referenced_by: Some(frame.id.clone()),
                        }
                    })?;
                    marks.insert(dependency.clone(), Mark::InProgress);
                    nodes.insert(dependency, Arc::clone(node));
                    stack.push(Frame::new(node));
                }
            }
        }

        let mut dependents: BTreeMap<NodeId, BTreeSet<NodeId>> = nodes
            .keys()
            .map(|id| (id.clone(), BTreeSet::new()))
            .collect();
        for node in nodes.values() {
            for dependency in &node.dependencies {
                dependents
                    .entry(dependency.clone())
                    .or_default()
                    .insert(node.id.clone());
            }
        }

        debug!(
            target = %target,
            revision = definitions.revision(),
            nodes = nodes.len(),
            "Built dependency graph"
        );

        Ok(Self {
            target: target.clone(),
            revision: definitions.revision(),
            nodes,
            dependents,
            order,
        })
    }

    pub fn target(&self) -> &NodeId {
        &self.target
    }

    /// Definition revision the graph was built from
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn node(&self, id: &NodeId) -> Option<&Arc<MeasurementNode>> {
        self.nodes.get(id)
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node_ids(&self) -> impl Iterator<Item = &NodeId> {
        self.nodes.keys()
    }

    /// Nodes in dependency order (leaves first, target last)
    pub fn topological_order(&self) -> &[NodeId] {
        &self.order
    }

    /// Direct dependencies of `id`
    pub fn dependencies(&self, id: &NodeId) -> impl Iterator<Item = &NodeId> {
        self.nodes
            .get(id)
            .into_iter()
            .flat_map(|node| node.dependencies.iter())
    }

    /// Direct dependents of `id` within this graph
    pub fn dependents(&self, id: &NodeId) -> impl Iterator<Item = &NodeId> {
        self.dependents.get(id).into_iter().flatten()
    }

    /// Every node that depends on `id`, directly or transitively
    pub fn transitive_dependents(&self, id: &NodeId) -> BTreeSet<NodeId> {
        let mut seen = BTreeSet::new();
        let mut frontier: Vec<&NodeId> = self.dependents(id).collect();
        while let Some(next) = frontier.pop() {
            if seen.insert(next.clone()) {
                frontier.extend(self.dependents(next));
            }
        }
        seen
    }

    /// Parallelism layers over the whole graph
    pub fn topological_layers(&self) -> Vec<BTreeSet<NodeId>> {
        self.layers_where(|_| true)
    }

    /// Parallelism layers over a subset of the graph.
    ///
    /// Only edges between members of `subset` count, so a node whose
    /// dependencies all lie outside the subset lands in layer 0.
    pub fn layers_of_subset(&self, subset: &BTreeSet<NodeId>) -> Vec<BTreeSet<NodeId>> {
        self.layers_where(|id| subset.contains(id))
    }

    fn layers_where(&self, include: impl Fn(&NodeId) -> bool) -> Vec<BTreeSet<NodeId>> {
        let mut levels: HashMap<&NodeId, usize> = HashMap::new();
        let mut layers: Vec<BTreeSet<NodeId>> = Vec::new();

        for id in self.order.iter().filter(|id| include(*id)) {
            let level = self
                .dependencies(id)
                .filter_map(|dep| levels.get(dep))
                .map(|level| level + 1)
                .max()
                .unwrap_or(0);
            levels.insert(id, level);
            if layers.len() <= level {
                layers.resize_with(level + 1, BTreeSet::new);
            }
            layers[level].insert(id.clone());
        }

        layers
    }

    /// Pretty-print the target's dependency tree.
    ///
    /// A node's dependencies are listed once, at its first appearance. Later
    /// appearances of a node with dependencies are marked `(*)`.
    pub fn render_tree(&self) -> String {
        let mut out = String::new();
        let mut expanded = HashSet::new();
        out.push_str(self.target.as_str());
        out.push('\n');
        expanded.insert(&self.target);
        self.render_children(&self.target, "", &mut expanded, &mut out);
        out
    }

    fn render_children<'a>(
        &'a self,
        id: &NodeId,
        prefix: &str,
        expanded: &mut HashSet<&'a NodeId>,
        out: &mut String,
    ) {
        let children: Vec<&NodeId> = self.dependencies(id).collect();
        for (index, child) in children.iter().enumerate() {
            let last = index + 1 == children.len();
            let repeated = !expanded.insert(*child);
            out.push_str(prefix);
            out.push_str(if last { "└── " } else { "├── " });
            out.push_str(child.as_str());
            if repeated {
                if self.dependencies(child).next().is_some() {
                    out.push_str(" (*)");
                }
                out.push('\n');
                continue;
            }
            out.push('\n');
            let extended = format!("{prefix}{}", if last { "    " } else { "│   " });
            self.render_children(child, &extended, expanded, out);
        }
    }
}

impl Frame {
    fn new(node: &MeasurementNode) -> Self {
        Self {
            id: node.id.clone(),
            dependencies: node.dependencies.iter().cloned().collect(),
            next: 0,
        }
    }
}
