//! # Execution Plan
//!
//! Transient handoff from the staleness resolver to the job scheduler. Holds only
//! the stale nodes, grouped into layers computed over the stale subset, plus the
//! records of the fresh nodes so callers can see what was reused.

use crate::models::{MeasurementNode, NodeId, ParameterFingerprint, ResultRecord};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Why a node was scheduled for (re-)execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum StalenessReason {
    /// An operator forced the node stale
    ManuallyExpired,
    /// No successful record exists for the current fingerprint
    NoRecord,
    /// The latest record outlived its expiry policy
    Expired { produced_at: DateTime<Utc> },
    /// A direct dependency is being recomputed
    DependencyStale { dependency: NodeId },
}

impl fmt::Display for StalenessReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ManuallyExpired => write!(f, "manually expired"),
            Self::NoRecord => write!(f, "no record"),
            Self::Expired { produced_at } => write!(f, "expired (produced at {produced_at})"),
            Self::DependencyStale { dependency } => {
                write!(f, "dependency '{dependency}' is stale")
            }
        }
    }
}

/// One stale node scheduled for execution
#[derive(Debug, Clone)]
pub struct PlannedJob {
    pub node: Arc<MeasurementNode>,
    pub fingerprint: ParameterFingerprint,
    pub reason: StalenessReason,
    /// Latest record seen at resolution time, if any
    pub observed_record: Option<ResultRecord>,
    pub layer: usize,
}

impl PlannedJob {
    pub fn node_id(&self) -> &NodeId {
        &self.node.id
    }
}

#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    pub plan_id: Uuid,
    pub target: NodeId,
    pub resolved_at: DateTime<Utc>,
    /// Definition revision the plan was resolved against
    pub graph_revision: u64,
    /// Execution groups; group `k` completes before group `k + 1` starts
    pub layers: Vec<BTreeSet<NodeId>>,
    pub jobs: BTreeMap<NodeId, PlannedJob>,
    /// Fresh nodes and the records they reuse
    pub reused: BTreeMap<NodeId, ResultRecord>,
}

impl ExecutionPlan {
    pub fn stale_node_ids(&self) -> BTreeSet<NodeId> {
        self.jobs.keys().cloned().collect()
    }

    pub fn job(&self, id: &NodeId) -> Option<&PlannedJob> {
        self.jobs.get(id)
    }

    pub fn is_stale(&self, id: &NodeId) -> bool {
        self.jobs.contains_key(id)
    }

    /// Number of jobs to execute
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Layer membership as plain id lists, leaves first
    pub fn layer_ids(&self) -> Vec<Vec<NodeId>> {
        self.layers
            .iter()
            .map(|layer| layer.iter().cloned().collect())
            .collect()
    }
}
