//! Crate-level error aggregating every module's error type.

use crate::config::ConfigurationError;
use crate::events::PublishError;
use crate::graph::GraphError;
use crate::models::DefinitionError;
use crate::orchestration::JobError;
use crate::resolution::ResolveError;
use crate::state_machine::StateMachineError;
use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum RecalError {
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("Resolution error: {0}")]
    Resolve(#[from] ResolveError),

    #[error("Job error: {0}")]
    Job(#[from] JobError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("State transition error: {0}")]
    StateMachine(#[from] StateMachineError),

    #[error("Definition error: {0}")]
    Definition(#[from] DefinitionError),

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Event error: {0}")]
    Event(#[from] PublishError),
}

pub type Result<T> = std::result::Result<T, RecalError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversions_keep_messages() {
        let err: RecalError = GraphError::SelfDependency {
            node_id: "a".into(),
        }
        .into();
        assert_eq!(err.to_string(), "Graph error: Node 'a' depends on itself");

        let err: RecalError = StoreError::Unavailable("down".into()).into();
        assert!(matches!(err, RecalError::Store(_)));
    }
}
