#![allow(dead_code)]

pub mod builders;
pub mod mock_procedure;
pub mod strategies;

pub use builders::*;
pub use mock_procedure::*;

use chrono::{DateTime, Utc};
use recal_core::{ExecutionReport, NodeId, NodeOutcome, OutcomeKind};

pub fn id(name: &str) -> NodeId {
    NodeId::new(name)
}

pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Outcome kind recorded for `node`, panicking if the node is absent
pub fn kind_of(report: &ExecutionReport, node: &str) -> OutcomeKind {
    report
        .outcome(&id(node))
        .map(NodeOutcome::kind)
        .unwrap_or_else(|| panic!("no outcome for '{node}' in {:?}", report.outcomes.keys()))
}

/// Layers as plain strings for easy comparison
pub fn layer_names(report: &ExecutionReport) -> Vec<Vec<String>> {
    report
        .layers
        .iter()
        .map(|layer| layer.iter().map(|id| id.as_str().to_string()).collect())
        .collect()
}

/// Receive events until one named `name` for `node` arrives
pub async fn wait_for_event(
    receiver: &mut tokio::sync::broadcast::Receiver<recal_core::PublishedEvent>,
    name: &str,
    node: &str,
) -> recal_core::PublishedEvent {
    tokio::time::timeout(std::time::Duration::from_secs(5), async {
        loop {
            match receiver.recv().await {
                Ok(event) if event.name == name && event.node_id() == Some(node) => return event,
                Ok(_) | Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(e) => panic!("event channel closed while waiting for {name}: {e}"),
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {name} on '{node}'"))
}

/// Poll `condition` until it holds
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(std::time::Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("condition did not hold in time");
}
