//! Manual expiration switches.
//!
//! An operator can force a node stale regardless of its record's age. The mark
//! stays in place until an execution that *started after* the mark succeeds, so
//! marking a node while it is already running does not get lost.

use crate::models::NodeId;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::info;

#[derive(Debug, Default)]
pub struct ExpiryOverrides {
    marks: DashMap<NodeId, DateTime<Utc>>,
}

impl ExpiryOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    /// Force `node_id` stale on every resolution until it next succeeds
    pub fn mark(&self, node_id: NodeId, at: DateTime<Utc>) {
        info!(node_id = %node_id, marked_at = %at, "Node manually expired");
        self.marks.insert(node_id, at);
    }

    pub fn is_marked(&self, node_id: &NodeId) -> bool {
        self.marks.contains_key(node_id)
    }

    pub fn marked_at(&self, node_id: &NodeId) -> Option<DateTime<Utc>> {
        self.marks.get(node_id).map(|entry| *entry.value())
    }

    /// Clear the mark if it was placed no later than `started_at`.
    ///
    /// Returns true when a mark was removed.
    pub fn clear_if_before(&self, node_id: &NodeId, started_at: DateTime<Utc>) -> bool {
        self.marks
            .remove_if(node_id, |_, marked_at| *marked_at <= started_at)
            .is_some()
    }

    pub fn len(&self) -> usize {
        self.marks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.marks.is_empty()
    }
}
