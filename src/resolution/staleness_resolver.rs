//! # Staleness Resolver
//!
//! Walks a dependency graph leaves-first and decides, per node, whether its latest
//! stored result can be reused. Rules are evaluated in order:
//!
//! 1. A manual expiration mark forces the node stale.
//! 2. No successful record for the node's current fingerprint: stale.
//! 3. The record outlived the node's expiry policy: stale.
//! 4. Any direct dependency is stale: stale by propagation, regardless of age.
//!
//! Fresh nodes are excluded from the plan and their records reused as-is. The
//! plan's layers are computed over the stale subset only.

use super::errors::ResolveError;
use super::execution_plan::{ExecutionPlan, PlannedJob, StalenessReason};
use super::expiry_overrides::ExpiryOverrides;
use crate::graph::DependencyGraph;
use crate::models::{DefinitionSource, NodeId, ResultRecord};
use crate::store::ResultStore;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info, instrument};
use uuid::Uuid;

#[derive(Clone)]
pub struct StalenessResolver {
    store: Arc<dyn ResultStore>,
    overrides: Arc<ExpiryOverrides>,
}

impl std::fmt::Debug for StalenessResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StalenessResolver")
            .field("overrides", &self.overrides.len())
            .finish()
    }
}

impl StalenessResolver {
    pub fn new(store: Arc<dyn ResultStore>, overrides: Arc<ExpiryOverrides>) -> Self {
        Self { store, overrides }
    }

    /// Build the graph for `target` from a definition snapshot and resolve it
    pub async fn resolve_definitions(
        &self,
        definitions: &dyn DefinitionSource,
        target: &NodeId,
        now: DateTime<Utc>,
    ) -> Result<ExecutionPlan, ResolveError> {
        let snapshot = definitions.snapshot();
        let graph = DependencyGraph::build(&snapshot, target)?;
        self.resolve(&graph, now).await
    }

    /// Compute the minimal set of nodes that must run for `graph`'s target.
    ///
    /// Fails only if the result store cannot be read; graph errors are raised
    /// while building the graph.
    #[instrument(skip(self, graph), fields(target = %graph.target(), nodes = graph.len()))]
    pub async fn resolve(
        &self,
        graph: &DependencyGraph,
        now: DateTime<Utc>,
    ) -> Result<ExecutionPlan, ResolveError> {
        let mut stale: BTreeMap<NodeId, (StalenessReason, Option<ResultRecord>)> = BTreeMap::new();
        let mut reused = BTreeMap::new();

        for id in graph.topological_order() {
            let Some(node) = graph.node(id) else {
                continue;
            };
            let key = node.job_key();
            let latest = self
                .store
                .get_latest(&key)
                .await
                .map_err(|source| ResolveError::Store {
                    node_id: id.clone(),
                    source,
                })?;

            let reason = if self.overrides.is_marked(id) {
                Some(StalenessReason::ManuallyExpired)
            } else {
                match latest.as_ref().filter(|record| record.is_success()) {
                    None => Some(StalenessReason::NoRecord),
                    Some(record) if node.expiry.is_expired(record.produced_at, now) => {
                        Some(StalenessReason::Expired {
                            produced_at: record.produced_at,
                        })
                    }
                    Some(_) => graph
                        .dependencies(id)
                        .find(|dependency| stale.contains_key(*dependency))
                        .map(|dependency| StalenessReason::DependencyStale {
                            dependency: dependency.clone(),
                        }),
                }
            };

            match (reason, latest) {
                (Some(reason), latest) => {
                    debug!(node_id = %id, reason = %reason, "Node is stale");
                    stale.insert(id.clone(), (reason, latest));
                }
                (None, Some(record)) => {
                    reused.insert(id.clone(), record);
                }
                // Unreachable: a node without a record is always stale.
                (None, None) => {}
            }
        }

        let stale_ids: BTreeSet<NodeId> = stale.keys().cloned().collect();
        let layers = graph.layers_of_subset(&stale_ids);
        let mut jobs = BTreeMap::new();
        for (layer_index, layer) in layers.iter().enumerate() {
            for id in layer {
                let (Some(node), Some((reason, observed_record))) = (graph.node(id), stale.remove(id))
                else {
                    continue;
                };
                jobs.insert(
                    id.clone(),
                    PlannedJob {
                        node: Arc::clone(node),
                        fingerprint: node.fingerprint(),
                        reason,
                        observed_record,
                        layer: layer_index,
                    },
                );
            }
        }

        info!(
            target = %graph.target(),
            stale = jobs.len(),
            reused = reused.len(),
            layers = layers.len(),
            "Resolved execution plan"
        );

        Ok(ExecutionPlan {
            plan_id: Uuid::new_v4(),
            target: graph.target().clone(),
            resolved_at: now,
            graph_revision: graph.revision(),
            layers,
            jobs,
            reused,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ExpiryPolicy, MeasurementNode, NodeDefinitions};
    use crate::store::InMemoryResultStore;
    use chrono::Duration;
    use serde_json::json;

    fn chain(r_expiry: ExpiryPolicy) -> NodeDefinitions {
        NodeDefinitions::from_nodes([
            MeasurementNode::new("r", "attenuation").with_expiry(r_expiry),
            MeasurementNode::new("q", "resonator").depends_on("r"),
            MeasurementNode::new("p", "rabi").depends_on("q"),
        ])
    }

    fn seed(store: &InMemoryResultStore, node: &MeasurementNode, produced_at: DateTime<Utc>) {
        store.seed(ResultRecord::success(
            &node.job_key(),
            produced_at,
            produced_at,
            json!({ "node": node.id.as_str() }),
            None,
        ));
    }

    fn seed_all(store: &InMemoryResultStore, definitions: &NodeDefinitions, at: DateTime<Utc>) {
        for node in definitions.iter() {
            seed(store, node, at);
        }
    }

    fn resolver(store: Arc<InMemoryResultStore>) -> StalenessResolver {
        StalenessResolver::new(store, Arc::new(ExpiryOverrides::new()))
    }

    fn ids(names: &[&str]) -> BTreeSet<NodeId> {
        names.iter().map(|n| NodeId::from(*n)).collect()
    }

    #[tokio::test]
    async fn test_never_run_graph_is_fully_stale() {
        let store = Arc::new(InMemoryResultStore::new());
        let definitions = chain(ExpiryPolicy::Never);

        let plan = resolver(store)
            .resolve_definitions(&definitions, &"p".into(), Utc::now())
            .await
            .unwrap();

        assert_eq!(plan.layers, vec![ids(&["r"]), ids(&["q"]), ids(&["p"])]);
        assert!(plan.reused.is_empty());
        assert!(plan
            .jobs
            .values()
            .all(|job| job.reason == StalenessReason::NoRecord));
    }

    #[tokio::test]
    async fn test_fresh_graph_yields_empty_plan() {
        let store = Arc::new(InMemoryResultStore::new());
        let definitions = chain(ExpiryPolicy::Never);
        let now = Utc::now();
        seed_all(&store, &definitions, now - Duration::hours(1));

        let plan = resolver(store)
            .resolve_definitions(&definitions, &"p".into(), now)
            .await
            .unwrap();

        assert!(plan.is_empty());
        assert!(plan.layers.is_empty());
        assert_eq!(plan.reused.keys().cloned().collect::<BTreeSet<_>>(), ids(&["p", "q", "r"]));
    }

    #[tokio::test]
    async fn test_expired_dependency_propagates_downstream() {
        let store = Arc::new(InMemoryResultStore::new());
        let definitions = chain(ExpiryPolicy::Always);
        let now = Utc::now();
        seed_all(&store, &definitions, now);

        let plan = resolver(store)
            .resolve_definitions(&definitions, &"p".into(), now)
            .await
            .unwrap();

        assert_eq!(plan.layers, vec![ids(&["r"]), ids(&["q"]), ids(&["p"])]);
        assert!(matches!(
            plan.job(&"r".into()).unwrap().reason,
            StalenessReason::Expired { .. }
        ));
        assert_eq!(
            plan.job(&"q".into()).unwrap().reason,
            StalenessReason::DependencyStale {
                dependency: "r".into()
            }
        );
        assert_eq!(plan.job(&"p".into()).unwrap().layer, 2);
    }

    #[tokio::test]
    async fn test_ttl_expiry_boundary() {
        let store = Arc::new(InMemoryResultStore::new());
        let definitions = NodeDefinitions::from_nodes([
            MeasurementNode::new("r", "attenuation").with_expiry(ExpiryPolicy::after_secs(60))
        ]);
        let produced = Utc::now();
        seed_all(&store, &definitions, produced);
        let resolver = resolver(store);

        let at_boundary = resolver
            .resolve_definitions(&definitions, &"r".into(), produced + Duration::seconds(60))
            .await
            .unwrap();
        assert!(at_boundary.is_empty());

        let past = resolver
            .resolve_definitions(&definitions, &"r".into(), produced + Duration::seconds(61))
            .await
            .unwrap();
        assert_eq!(past.stale_node_ids(), ids(&["r"]));
    }

    #[tokio::test]
    async fn test_stale_subset_layers_skip_fresh_intermediate_nodes() {
        // top depends on mid and base; only base and top are stale
        let store = Arc::new(InMemoryResultStore::new());
        let base = MeasurementNode::new("base", "p");
        let mid = MeasurementNode::new("mid", "p");
        let top = MeasurementNode::new("top", "p")
            .depends_on("mid")
            .depends_on("base");
        let definitions = NodeDefinitions::from_nodes([base, mid.clone(), top]);
        seed(&store, &mid, Utc::now());

        let plan = resolver(store)
            .resolve_definitions(&definitions, &"top".into(), Utc::now())
            .await
            .unwrap();

        assert_eq!(plan.layers, vec![ids(&["base"]), ids(&["top"])]);
        assert!(plan.reused.contains_key(&NodeId::from("mid")));
    }

    #[tokio::test]
    async fn test_parameter_change_only_affects_that_node() {
        let store = Arc::new(InMemoryResultStore::new());
        let definitions = chain(ExpiryPolicy::Never);
        let now = Utc::now();
        seed_all(&store, &definitions, now);

        let changed = definitions.with_node(
            MeasurementNode::new("p", "rabi")
                .depends_on("q")
                .with_parameter("amplitude", json!(0.5)),
        );
        let plan = resolver(store)
            .resolve_definitions(&changed, &"p".into(), now)
            .await
            .unwrap();

        assert_eq!(plan.stale_node_ids(), ids(&["p"]));
        assert_eq!(plan.job(&"p".into()).unwrap().reason, StalenessReason::NoRecord);
        assert_eq!(plan.graph_revision, changed.revision());
    }

    #[tokio::test]
    async fn test_manual_expiration_overrides_fresh_record() {
        let store = Arc::new(InMemoryResultStore::new());
        let definitions = chain(ExpiryPolicy::Never);
        let now = Utc::now();
        seed_all(&store, &definitions, now);
        let overrides = Arc::new(ExpiryOverrides::new());
        overrides.mark("q".into(), now);

        let plan = StalenessResolver::new(store, overrides)
            .resolve_definitions(&definitions, &"p".into(), now)
            .await
            .unwrap();

        assert_eq!(plan.stale_node_ids(), ids(&["p", "q"]));
        assert_eq!(
            plan.job(&"q".into()).unwrap().reason,
            StalenessReason::ManuallyExpired
        );
        assert!(plan.job(&"q".into()).unwrap().observed_record.is_some());
    }

    #[tokio::test]
    async fn test_store_outage_aborts_resolution() {
        let store = Arc::new(InMemoryResultStore::new());
        store.set_unavailable(true);

        let err = resolver(store)
            .resolve_definitions(&chain(ExpiryPolicy::Never), &"p".into(), Utc::now())
            .await
            .unwrap_err();

        assert!(matches!(err, ResolveError::Store { node_id, .. } if node_id.as_str() == "r"));
    }

    #[tokio::test]
    async fn test_cycle_surfaces_as_resolve_error() {
        let definitions = NodeDefinitions::from_nodes([
            MeasurementNode::new("a", "p").depends_on("b"),
            MeasurementNode::new("b", "p").depends_on("a"),
        ]);

        let err = resolver(Arc::new(InMemoryResultStore::new()))
            .resolve_definitions(&definitions, &"a".into(), Utc::now())
            .await
            .unwrap_err();

        assert!(err.is_cycle());
    }
}
