//! # Orchestration Types
//!
//! Per-node outcomes and the report returned for one execution call.

use super::errors::JobError;
use crate::models::{NodeId, ResultRecord};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Why a planned node was never attempted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum SkipReason {
    /// `upstream` is the node that actually failed, even across chains of skips
    UpstreamFailed { upstream: NodeId },
    /// The request was cancelled before this node's layer was admitted
    Cancelled,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UpstreamFailed { upstream } => write!(f, "upstream '{upstream}' failed"),
            Self::Cancelled => write!(f, "request cancelled"),
        }
    }
}

/// Terminal outcome of one node in an execution call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum NodeOutcome {
    Succeeded { record: ResultRecord },
    Failed { error: JobError },
    Skipped { reason: SkipReason },
    /// Fresh node excluded from the plan; carries the cached record
    Reused { record: ResultRecord },
}

/// Discriminant of [`NodeOutcome`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Succeeded,
    Failed,
    Skipped,
    Reused,
}

impl NodeOutcome {
    pub fn kind(&self) -> OutcomeKind {
        match self {
            Self::Succeeded { .. } => OutcomeKind::Succeeded,
            Self::Failed { .. } => OutcomeKind::Failed,
            Self::Skipped { .. } => OutcomeKind::Skipped,
            Self::Reused { .. } => OutcomeKind::Reused,
        }
    }

    /// Record available to dependents, if any
    pub fn record(&self) -> Option<&ResultRecord> {
        match self {
            Self::Succeeded { record } | Self::Reused { record } => Some(record),
            _ => None,
        }
    }

    pub fn payload(&self) -> Option<&serde_json::Value> {
        self.record().map(|record| &record.payload)
    }

    pub fn error(&self) -> Option<&JobError> {
        match self {
            Self::Failed { error } => Some(error),
            _ => None,
        }
    }

    /// Whether dependents of this node may run
    pub fn is_usable(&self) -> bool {
        self.record().is_some()
    }
}

impl fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::Skipped => write!(f, "skipped"),
            Self::Reused => write!(f, "reused"),
        }
    }
}

/// Per-request execution options
#[derive(Debug, Clone)]
pub struct ExecutionOptions {
    pub request_id: Uuid,
    /// Absolute deadline applied to every invocation launched by this request
    pub deadline: Option<Instant>,
    pub cancellation: CancellationToken,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self {
            request_id: Uuid::new_v4(),
            deadline: None,
            cancellation: CancellationToken::new(),
        }
    }
}

impl ExecutionOptions {
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = cancellation;
        self
    }
}

/// Structured result of one execution call. Every node of the plan, and every
/// reused node, appears with an explicit terminal outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub request_id: Uuid,
    pub plan_id: Uuid,
    pub target: NodeId,
    pub outcomes: BTreeMap<NodeId, NodeOutcome>,
    /// Layers of the executed plan, leaves first
    pub layers: Vec<Vec<NodeId>>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl ExecutionReport {
    pub fn outcome(&self, id: &NodeId) -> Option<&NodeOutcome> {
        self.outcomes.get(id)
    }

    pub fn target_outcome(&self) -> Option<&NodeOutcome> {
        self.outcomes.get(&self.target)
    }

    pub fn count(&self, kind: OutcomeKind) -> usize {
        self.outcomes
            .values()
            .filter(|outcome| outcome.kind() == kind)
            .count()
    }

    /// Ids of every node with the given outcome kind
    pub fn nodes_with(&self, kind: OutcomeKind) -> Vec<NodeId> {
        self.outcomes
            .iter()
            .filter(|(_, outcome)| outcome.kind() == kind)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// True when the target produced a usable record
    pub fn is_success(&self) -> bool {
        self.target_outcome().is_some_and(NodeOutcome::is_usable)
    }

    pub fn duration(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}
