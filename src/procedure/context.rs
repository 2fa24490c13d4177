use crate::models::{MeasurementNode, NodeId, ParameterFingerprint, ResultRecord};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Everything a procedure receives for one invocation
#[derive(Debug, Clone)]
pub struct InvocationContext {
    pub node: Arc<MeasurementNode>,
    pub fingerprint: ParameterFingerprint,
    /// Latest successful record of every direct dependency
    pub inputs: BTreeMap<NodeId, ResultRecord>,
    pub deadline: Option<Instant>,
    /// Request that launched this execution
    pub request_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub cancellation: CancellationToken,
}

impl InvocationContext {
    pub fn node_id(&self) -> &NodeId {
        &self.node.id
    }

    pub fn parameter(&self, name: &str) -> Option<&Value> {
        self.node.parameters.get(name)
    }

    /// Payload produced by dependency `id`
    pub fn input(&self, id: &NodeId) -> Option<&Value> {
        self.inputs.get(id).map(|record| &record.payload)
    }

    /// Time left before the deadline, `None` when unbounded
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}
