use crate::models::NodeId;

/// Graph construction failures. Any of these is fatal to the whole request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    /// A referenced node is missing from the definitions. `referenced_by` is
    /// `None` when the requested target itself is unknown.
    #[error("Unknown node '{node_id}'{}", referenced_by.as_ref().map(|r| format!(" (dependency of '{r}')")).unwrap_or_default())]
    UnknownNode {
        node_id: NodeId,
        referenced_by: Option<NodeId>,
    },

    /// A dependency cycle; the first id is repeated at the end
    #[error("Dependency cycle detected: {}", format_cycle(cycle))]
    Cycle { cycle: Vec<NodeId> },

    #[error("Node '{node_id}' depends on itself")]
    SelfDependency { node_id: NodeId },
}

impl GraphError {
    pub fn is_cycle(&self) -> bool {
        matches!(self, Self::Cycle { .. } | Self::SelfDependency { .. })
    }
}

fn format_cycle(cycle: &[NodeId]) -> String {
    cycle
        .iter()
        .map(NodeId::as_str)
        .collect::<Vec<_>>()
        .join(" -> ")
}
