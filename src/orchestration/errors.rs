use crate::models::{NodeId, ProcedureHandle};
use serde::{Deserialize, Serialize};

/// Per-job failures.
///
/// Contained to the failing node and its dependents. `Clone` so a single failure
/// can be delivered to every requester attached to the same execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum JobError {
    #[error("Node '{node_id}' timed out after {deadline_ms}ms")]
    Timeout { node_id: NodeId, deadline_ms: u64 },

    #[error("Procedure for node '{node_id}' failed: {message}")]
    Procedure { node_id: NodeId, message: String },

    #[error("Result store unavailable while executing '{node_id}': {reason}")]
    StoreUnavailable { node_id: NodeId, reason: String },

    #[error("No procedure registered under handle '{handle}' (node '{node_id}')")]
    ProcedureNotRegistered {
        node_id: NodeId,
        handle: ProcedureHandle,
    },

    #[error("Execution of node '{node_id}' was cancelled")]
    Cancelled { node_id: NodeId },

    #[error("Execution of node '{node_id}' ended without reporting an outcome")]
    Aborted { node_id: NodeId },
}

impl JobError {
    pub fn node_id(&self) -> &NodeId {
        match self {
            Self::Timeout { node_id, .. }
            | Self::Procedure { node_id, .. }
            | Self::StoreUnavailable { node_id, .. }
            | Self::ProcedureNotRegistered { node_id, .. }
            | Self::Cancelled { node_id }
            | Self::Aborted { node_id } => node_id,
        }
    }

    /// Short machine-readable kind, used in logs and events
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "timeout",
            Self::Procedure { .. } => "procedure",
            Self::StoreUnavailable { .. } => "store_unavailable",
            Self::ProcedureNotRegistered { .. } => "procedure_not_registered",
            Self::Cancelled { .. } => "cancelled",
            Self::Aborted { .. } => "aborted",
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}
