//! # Calibration Coordinator
//!
//! Caller-facing entry point. A request snapshots the node definitions, builds
//! the target's dependency graph, resolves staleness against the result store and
//! hands the plan to the shared job scheduler:
//!
//! ```text
//! request_result(target) -> DependencyGraph::build -> StalenessResolver::resolve
//!                        -> JobScheduler::execute -> ExecutionReport
//! ```
//!
//! Graph and resolution errors abort the request before any job runs. Job-level
//! failures never surface as errors; they appear in the report's outcome map.

use super::job_scheduler::JobScheduler;
use super::procedure_runner::ProcedureRunner;
use super::types::{ExecutionOptions, ExecutionReport, NodeOutcome};
use crate::config::RecalConfig;
use crate::constants::events;
use crate::graph::{DependencyGraph, GraphError};
use crate::models::{DefinitionSource, NodeId};
use crate::procedure::ProcedureRegistry;
use crate::resolution::{ExecutionPlan, ExpiryOverrides, ResolveError, StalenessResolver};
use crate::store::ResultStore;
use chrono::{DateTime, Utc};
use serde_json::json;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{info, instrument, warn};

pub struct CalibrationCoordinator {
    definitions: Arc<dyn DefinitionSource>,
    overrides: Arc<ExpiryOverrides>,
    resolver: StalenessResolver,
    scheduler: Arc<JobScheduler>,
    runner: Arc<ProcedureRunner>,
}

impl std::fmt::Debug for CalibrationCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CalibrationCoordinator")
            .field("scheduler", &self.scheduler)
            .field("runner", &self.runner)
            .finish()
    }
}

impl CalibrationCoordinator {
    /// Create a coordinator with its own scheduler
    pub fn new(
        definitions: Arc<dyn DefinitionSource>,
        store: Arc<dyn ResultStore>,
        procedures: Arc<ProcedureRegistry>,
        config: &RecalConfig,
    ) -> Self {
        let scheduler = Arc::new(JobScheduler::new(config.scheduler.clone()));
        Self::with_scheduler(definitions, store, procedures, scheduler)
    }

    /// Create a coordinator sharing an existing scheduler, and with it the
    /// scheduler's in-flight registry and execution slots
    pub fn with_scheduler(
        definitions: Arc<dyn DefinitionSource>,
        store: Arc<dyn ResultStore>,
        procedures: Arc<ProcedureRegistry>,
        scheduler: Arc<JobScheduler>,
    ) -> Self {
        let overrides = Arc::new(ExpiryOverrides::new());
        let runner = Arc::new(
            ProcedureRunner::new(procedures, Arc::clone(&store))
                .with_default_timeout(scheduler.config().default_job_timeout()),
        );
        Self {
            definitions,
            resolver: StalenessResolver::new(store, Arc::clone(&overrides)),
            overrides,
            scheduler,
            runner,
        }
    }

    pub fn scheduler(&self) -> &Arc<JobScheduler> {
        &self.scheduler
    }

    pub fn overrides(&self) -> &Arc<ExpiryOverrides> {
        &self.overrides
    }

    /// Bring `target` up to date and return every node's outcome
    pub async fn request_result(
        &self,
        target: &NodeId,
        now: DateTime<Utc>,
        deadline: Option<Instant>,
    ) -> Result<ExecutionReport, ResolveError> {
        let mut options = ExecutionOptions::default().with_cancellation(self.scheduler.request_token());
        options.deadline = deadline;
        self.request_result_with(target, now, options).await
    }

    /// As [`request_result`](Self::request_result), with explicit request options
    #[instrument(skip(self, options), fields(request_id = %options.request_id))]
    pub async fn request_result_with(
        &self,
        target: &NodeId,
        now: DateTime<Utc>,
        options: ExecutionOptions,
    ) -> Result<ExecutionReport, ResolveError> {
        let plan = self.dry_run_resolve(target, now).await?;
        if let Err(e) = self
            .scheduler
            .events()
            .publish(
                events::PLAN_RESOLVED,
                json!({
                    "request_id": options.request_id.to_string(),
                    "target": target.as_str(),
                    "stale": plan.stale_node_ids(),
                    "reused": plan.reused.keys().collect::<Vec<_>>(),
                }),
            )
            .await
        {
            warn!(error = %e, "Failed to publish resolved plan");
        }

        let report = self
            .scheduler
            .execute(&plan, Arc::clone(&self.runner), options)
            .await;

        for (id, outcome) in &report.outcomes {
            if let NodeOutcome::Succeeded { record } = outcome {
                self.overrides.clear_if_before(id, record.started_at);
            }
        }

        Ok(report)
    }

    /// Resolve which nodes `target` would need to run, without running anything
    #[instrument(skip(self))]
    pub async fn dry_run_resolve(
        &self,
        target: &NodeId,
        now: DateTime<Utc>,
    ) -> Result<ExecutionPlan, ResolveError> {
        self.resolver
            .resolve_definitions(self.definitions.as_ref(), target, now)
            .await
    }

    /// Force `node_id` stale on every request until it next succeeds
    pub fn mark_expired(&self, node_id: &NodeId) -> Result<(), GraphError> {
        if !self.definitions.snapshot().contains(node_id) {
            return Err(GraphError::UnknownNode {
                node_id: node_id.clone(),
                referenced_by: None,
            });
        }
        self.overrides.mark(node_id.clone(), Utc::now());
        Ok(())
    }

    /// Pretty-printed dependency tree of `target`
    pub fn dependency_tree(&self, target: &NodeId) -> Result<String, GraphError> {
        let graph = DependencyGraph::build(&self.definitions.snapshot(), target)?;
        Ok(graph.render_tree())
    }

    /// Cancel running executions and stop admitting work
    pub fn shutdown(&self) {
        info!("Shutting down calibration coordinator");
        self.scheduler.shutdown();
    }
}
