//! # Node Definitions
//!
//! Append-only, revisioned table of measurement nodes indexed by id. Nodes refer
//! to each other by id only; a dependency graph is resolved from a snapshot of
//! this table at the start of every request, so editing definitions never
//! disturbs a resolution that is already underway.
//!
//! Definitions are usually loaded from a project file:
//!
//! ```yaml
//! nodes:
//!   attenuation:
//!     procedure: wiring_check
//!   resonator:
//!     procedure: resonator_spectroscopy
//!     dependencies: [attenuation]
//!     parameters: { span_mhz: 20 }
//!     expiry: { after: 3600 }
//! ```

use super::node::{ExpiryPolicy, MeasurementNode, NodeId, Parameters, ProcedureHandle};
use parking_lot::RwLock;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Errors raised while loading or validating node definitions
#[derive(Debug, thiserror::Error)]
pub enum DefinitionError {
    #[error("Invalid YAML in project definition: {0}")]
    InvalidYaml(#[from] serde_yaml::Error),

    #[error("Failed to read project file '{path}': {error}")]
    FileRead { path: String, error: String },

    #[error("Node '{node_id}' has an empty procedure handle")]
    MissingProcedure { node_id: NodeId },

    #[error("Node '{node_id}' lists itself as a dependency")]
    SelfDependency { node_id: NodeId },
}

#[derive(Debug, Deserialize)]
struct ProjectFile {
    #[serde(default)]
    nodes: BTreeMap<NodeId, NodeSpec>,
}

#[derive(Debug, Deserialize)]
struct NodeSpec {
    procedure: ProcedureHandle,
    #[serde(default)]
    dependencies: BTreeSet<NodeId>,
    #[serde(default)]
    parameters: Parameters,
    #[serde(default)]
    expiry: ExpiryPolicy,
}

/// Revisioned table of measurement node definitions
#[derive(Debug, Clone, Default)]
pub struct NodeDefinitions {
    revision: u64,
    nodes: BTreeMap<NodeId, Arc<MeasurementNode>>,
}

impl NodeDefinitions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table from a set of nodes. Later duplicates replace earlier ones.
    pub fn from_nodes(nodes: impl IntoIterator<Item = MeasurementNode>) -> Self {
        let nodes = nodes
            .into_iter()
            .map(|node| (node.id.clone(), Arc::new(node)))
            .collect();
        Self { revision: 1, nodes }
    }

    /// Parse a YAML project file body
    pub fn from_yaml_str(yaml: &str) -> Result<Self, DefinitionError> {
        let project: ProjectFile = serde_yaml::from_str(yaml)?;

        let mut nodes = Vec::with_capacity(project.nodes.len());
        for (id, spec) in project.nodes {
            if spec.procedure.as_str().trim().is_empty() {
                return Err(DefinitionError::MissingProcedure { node_id: id });
            }
            if spec.dependencies.contains(&id) {
                return Err(DefinitionError::SelfDependency { node_id: id });
            }
            nodes.push(MeasurementNode {
                id,
                dependencies: spec.dependencies,
                parameters: spec.parameters,
                expiry: spec.expiry,
                procedure: spec.procedure,
            });
        }

        let definitions = Self::from_nodes(nodes);
        debug!(nodes = definitions.len(), "Loaded node definitions from YAML");
        Ok(definitions)
    }

    /// Read and parse a YAML project file from disk
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, DefinitionError> {
        let path = path.as_ref();
        let body = std::fs::read_to_string(path).map_err(|e| DefinitionError::FileRead {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        Self::from_yaml_str(&body)
    }

    /// Return a new revision with `node` added or replaced
    pub fn with_node(&self, node: MeasurementNode) -> Self {
        let mut nodes = self.nodes.clone();
        nodes.insert(node.id.clone(), Arc::new(node));
        Self {
            revision: self.revision + 1,
            nodes,
        }
    }

    /// Return a new revision without `id`
    pub fn without_node(&self, id: &NodeId) -> Self {
        let mut nodes = self.nodes.clone();
        nodes.remove(id);
        Self {
            revision: self.revision + 1,
            nodes,
        }
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn get(&self, id: &NodeId) -> Option<&Arc<MeasurementNode>> {
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

    pub fn iter(&self) -> impl Iterator<Item = &Arc<MeasurementNode>> {
        self.nodes.values()
    }
}

/// Supplies the definition set a request resolves against
pub trait DefinitionSource: Send + Sync {
    /// A consistent snapshot for one request
    fn snapshot(&self) -> NodeDefinitions;
}

impl DefinitionSource for NodeDefinitions {
    fn snapshot(&self) -> NodeDefinitions {
        self.clone()
    }
}

/// Live-editable definitions shared between an editor and the coordinator
#[derive(Debug, Default, Clone)]
pub struct SharedDefinitions {
    inner: Arc<RwLock<NodeDefinitions>>,
}

impl SharedDefinitions {
    pub fn new(definitions: NodeDefinitions) -> Self {
        Self {
            inner: Arc::new(RwLock::new(definitions)),
        }
    }

    /// Add or replace a node, bumping the revision
    pub fn upsert(&self, node: MeasurementNode) -> u64 {
        let mut guard = self.inner.write();
        *guard = guard.with_node(node);
        guard.revision()
    }

    pub fn remove(&self, id: &NodeId) -> u64 {
        let mut guard = self.inner.write();
        *guard = guard.without_node(id);
        guard.revision()
    }

    /// Replace the whole table
    pub fn replace(&self, definitions: NodeDefinitions) {
        *self.inner.write() = definitions;
    }
}

impl DefinitionSource for SharedDefinitions {
    fn snapshot(&self) -> NodeDefinitions {
        self.inner.read().clone()
    }
}
