use crate::graph::GraphError;
use crate::models::NodeId;
use crate::store::StoreError;

/// Resolution failures. Raised before any job is launched, so a failed
/// resolution never leaves a partially executed plan behind.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ResolveError {
    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("Failed to read latest result for '{node_id}': {source}")]
    Store {
        node_id: NodeId,
        #[source]
        source: StoreError,
    },
}

impl ResolveError {
    pub fn is_cycle(&self) -> bool {
        matches!(self, Self::Graph(err) if err.is_cycle())
    }

    pub fn is_unknown_node(&self) -> bool {
        matches!(self, Self::Graph(GraphError::UnknownNode { .. }))
    }
}
