use crate::models::NodeId;

/// Errors raised by node state tracking
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StateMachineError {
    #[error("Invalid transition for '{node_id}' from {from} on event {event}")]
    InvalidTransition {
        node_id: NodeId,
        from: String,
        event: String,
    },

    #[error("Node '{node_id}' is not tracked in this execution")]
    UnknownNode { node_id: NodeId },
}

pub type StateMachineResult<T> = Result<T, StateMachineError>;
