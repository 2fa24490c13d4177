use super::errors::{StateMachineError, StateMachineResult};
use super::events::NodeEvent;
use super::states::NodeState;
use crate::models::NodeId;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use tracing::trace;

/// Tracks the state of every planned node during one execution call.
///
/// Allowed transitions: `pending → running → {succeeded | failed}` and
/// `pending → skipped`. Terminal states are final.
#[derive(Debug, Default)]
pub struct NodeStateTracker {
    states: Mutex<BTreeMap<NodeId, NodeState>>,
}

impl NodeStateTracker {
    /// Start tracking `nodes`, all pending
    pub fn new<'a>(nodes: impl IntoIterator<Item = &'a NodeId>) -> Self {
        Self {
            states: Mutex::new(
                nodes
                    .into_iter()
                    .map(|id| (id.clone(), NodeState::Pending))
                    .collect(),
            ),
        }
    }

    pub fn state(&self, node_id: &NodeId) -> Option<NodeState> {
        self.states.lock().get(node_id).copied()
    }

    /// Apply `event` to `node_id`, returning the new state
    pub fn transition(&self, node_id: &NodeId, event: &NodeEvent) -> StateMachineResult<NodeState> {
        let mut states = self.states.lock();
        let current = states
            .get_mut(node_id)
            .ok_or_else(|| StateMachineError::UnknownNode {
                node_id: node_id.clone(),
            })?;
        let target = Self::determine_target_state(node_id, *current, event)?;
        trace!(
            node_id = %node_id,
            from = %current,
            to = %target,
            event = event.event_type(),
            "Node state transition"
        );
        *current = target;
        Ok(target)
    }

    /// Target state for `event` in `current`, without applying it
    pub fn determine_target_state(
        node_id: &NodeId,
        current: NodeState,
        event: &NodeEvent,
    ) -> StateMachineResult<NodeState> {
        let target = match (current, event) {
            (NodeState::Pending, NodeEvent::Start) => NodeState::Running,
            (NodeState::Pending, NodeEvent::Skip(_)) => NodeState::Skipped,
            (NodeState::Running, NodeEvent::Succeed) => NodeState::Succeeded,
            (NodeState::Running, NodeEvent::Fail(_)) => NodeState::Failed,
            (from, _) => {
                return Err(StateMachineError::InvalidTransition {
                    node_id: node_id.clone(),
                    from: from.to_string(),
                    event: event.event_type().to_string(),
                })
            }
        };
        Ok(target)
    }

    /// Whether every tracked node has reached a terminal state
    pub fn all_terminal(&self) -> bool {
        self.states.lock().values().all(NodeState::is_terminal)
    }

    pub fn snapshot(&self) -> BTreeMap<NodeId, NodeState> {
        self.states.lock().clone()
    }
}
