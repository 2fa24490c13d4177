//! # Job Scheduler
//!
//! Executes a resolved plan layer by layer. All admitted nodes of a layer run
//! concurrently and the scheduler waits for every one of them to reach a terminal
//! state before admitting the next layer, because later nodes read the results
//! just produced.
//!
//! Each node goes through the in-flight registry: the first requester of a job key
//! launches the physical execution on a spawned task, later requesters attach to
//! it. A process-wide semaphore bounds how many executions run at once.
//!
//! A failed node is never retried within the call. Every planned node that
//! depends on it, directly or through other skipped nodes, is skipped and names
//! the node that actually failed. Unrelated branches keep running.

use super::errors::JobError;
use super::in_flight::{Admission, CompletionGuard, InFlightJob, InFlightRegistry, JobResult};
use super::procedure_runner::{into_job_result, ProcedureRunner, RunRequest};
use super::types::{ExecutionOptions, ExecutionReport, NodeOutcome, OutcomeKind, SkipReason};
use crate::config::SchedulerConfig;
use crate::constants::events;
use crate::events::EventPublisher;
use crate::logging::{log_node_operation, log_request_operation};
use crate::models::{JobKey, NodeId, ResultRecord};
use crate::resolution::{ExecutionPlan, PlannedJob};
use crate::state_machine::{NodeEvent, NodeStateTracker};
use chrono::Utc;
use futures::future::join_all;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, instrument, warn, Instrument};
use uuid::Uuid;

/// Layered executor with in-flight deduplication.
///
/// One instance owns one in-flight registry; independent instances never share
/// executions.
#[derive(Debug)]
pub struct JobScheduler {
    config: SchedulerConfig,
    in_flight: Arc<InFlightRegistry>,
    permits: Arc<Semaphore>,
    events: EventPublisher,
    shutdown: CancellationToken,
}

impl JobScheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        let events = EventPublisher::new(config.event_channel_capacity);
        Self::with_publisher(config, events)
    }

    pub fn with_publisher(config: SchedulerConfig, events: EventPublisher) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(config.max_concurrent_jobs.max(1))),
            in_flight: Arc::new(InFlightRegistry::new()),
            events,
            shutdown: CancellationToken::new(),
            config,
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn events(&self) -> &EventPublisher {
        &self.events
    }

    pub fn in_flight(&self) -> &Arc<InFlightRegistry> {
        &self.in_flight
    }

    /// Execution slots currently free
    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    /// Cancellation token for a new request, cancelled on shutdown
    pub fn request_token(&self) -> CancellationToken {
        self.shutdown.child_token()
    }

    /// Cancel every running execution and stop admitting layers
    pub fn shutdown(&self) {
        info!(in_flight = self.in_flight.len(), "Shutting down job scheduler");
        self.shutdown.cancel();
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Execute `plan`, returning a terminal outcome for every planned and reused node
    #[instrument(skip_all, fields(plan_id = %plan.plan_id, target = %plan.target, request_id = %options.request_id))]
    pub async fn execute(
        &self,
        plan: &ExecutionPlan,
        runner: Arc<ProcedureRunner>,
        options: ExecutionOptions,
    ) -> ExecutionReport {
        let started_at = Utc::now();
        let request_id = options.request_id;
        let tracker = NodeStateTracker::new(plan.jobs.keys());
        let mut outcomes: BTreeMap<NodeId, NodeOutcome> = BTreeMap::new();

        log_request_operation(
            "execute",
            &request_id.to_string(),
            plan.target.as_str(),
            "started",
            Some(&format!("jobs={} layers={}", plan.len(), plan.layers.len())),
        );

        for (id, record) in &plan.reused {
            self.emit(events::NODE_REUSED, &record.job_key(), request_id, json!({
                "record_id": record.record_id.as_str(),
                "produced_at": record.produced_at,
            }))
            .await;
            outcomes.insert(
                id.clone(),
                NodeOutcome::Reused {
                    record: record.clone(),
                },
            );
        }

        for (layer_index, layer) in plan.layers.iter().enumerate() {
            let mut admitted: Vec<&PlannedJob> = Vec::with_capacity(layer.len());

            for id in layer {
                let Some(job) = plan.job(id) else {
                    continue;
                };
                let blocked = if self.is_cancelled(&options) {
                    Some(SkipReason::Cancelled)
                } else {
                    Self::blocking_reason(job, &outcomes)
                };

                match blocked {
                    Some(reason) => {
                        let outcome = self.skip(job, reason, request_id, &tracker).await;
                        outcomes.insert(id.clone(), outcome);
                    }
                    None => admitted.push(job),
                }
            }

            debug!(
                layer = layer_index,
                admitted = admitted.len(),
                skipped = layer.len() - admitted.len(),
                "Admitting layer"
            );

            let results = join_all(admitted.iter().map(|job| {
                self.run_node(job, layer_index, &outcomes, &runner, &options, &tracker)
            }))
            .await;

            for (job, outcome) in admitted.iter().zip(results) {
                outcomes.insert(job.node_id().clone(), outcome);
            }
        }

        let report = ExecutionReport {
            request_id,
            plan_id: plan.plan_id,
            target: plan.target.clone(),
            outcomes,
            layers: plan.layer_ids(),
            started_at,
            finished_at: Utc::now(),
        };

        if !tracker.all_terminal() {
            warn!(states = ?tracker.snapshot(), "Execution finished with non-terminal nodes");
        }

        let summary = format!(
            "succeeded={} failed={} skipped={} reused={}",
            report.count(OutcomeKind::Succeeded),
            report.count(OutcomeKind::Failed),
            report.count(OutcomeKind::Skipped),
            report.count(OutcomeKind::Reused),
        );
        log_request_operation(
            "execute",
            &request_id.to_string(),
            plan.target.as_str(),
            if report.is_success() { "success" } else { "incomplete" },
            Some(&summary),
        );
        if let Err(e) = self
            .events
            .publish(
                events::EXECUTION_COMPLETED,
                json!({
                    "request_id": request_id.to_string(),
                    "target": plan.target.as_str(),
                    "success": report.is_success(),
                    "summary": summary,
                }),
            )
            .await
        {
            warn!(error = %e, "Failed to publish execution completion");
        }

        report
    }

    /// Why `job` cannot run given its dependencies' outcomes so far
    fn blocking_reason(
        job: &PlannedJob,
        outcomes: &BTreeMap<NodeId, NodeOutcome>,
    ) -> Option<SkipReason> {
        job.node
            .dependencies
            .iter()
            .find_map(|dependency| match outcomes.get(dependency) {
                Some(NodeOutcome::Failed { .. }) => Some(SkipReason::UpstreamFailed {
                    upstream: dependency.clone(),
                }),
                Some(NodeOutcome::Skipped { reason }) => Some(reason.clone()),
                _ => None,
            })
    }

    async fn skip(
        &self,
        job: &PlannedJob,
        reason: SkipReason,
        request_id: Uuid,
        tracker: &NodeStateTracker,
    ) -> NodeOutcome {
        let key = JobKey::new(job.node_id().clone(), job.fingerprint.clone());
        self.transition(tracker, &key, NodeEvent::Skip(reason.to_string()));
        log_node_operation(
            "skip",
            key.node_id.as_str(),
            key.fingerprint.short(),
            "skipped",
            Some(&reason.to_string()),
        );
        self.emit(
            events::NODE_SKIPPED,
            &key,
            request_id,
            serde_json::to_value(&reason).unwrap_or(Value::Null),
        )
        .await;
        NodeOutcome::Skipped { reason }
    }

    async fn run_node(
        &self,
        job: &PlannedJob,
        layer: usize,
        outcomes: &BTreeMap<NodeId, NodeOutcome>,
        runner: &Arc<ProcedureRunner>,
        options: &ExecutionOptions,
        tracker: &NodeStateTracker,
    ) -> NodeOutcome {
        let key = JobKey::new(job.node_id().clone(), job.fingerprint.clone());
        let request_id = options.request_id;
        self.transition(tracker, &key, NodeEvent::Start);

        let admission = self
            .in_flight
            .acquire(&key, request_id, &self.shutdown)
            .await;
        let in_flight = Arc::clone(admission.job());
        match admission {
            Admission::Leader(_) => {
                let inputs: BTreeMap<NodeId, ResultRecord> = job
                    .node
                    .dependencies
                    .iter()
                    .filter_map(|dependency| {
                        outcomes
                            .get(dependency)
                            .and_then(NodeOutcome::record)
                            .map(|record| (dependency.clone(), record.clone()))
                    })
                    .collect();

                log_node_operation(
                    "launch",
                    key.node_id.as_str(),
                    key.fingerprint.short(),
                    "running",
                    Some(&format!("layer={layer} reason={}", job.reason)),
                );
                self.emit(events::NODE_STARTED, &key, request_id, json!({
                    "layer": layer,
                    "reason": job.reason.to_string(),
                }))
                .await;

                let request = RunRequest {
                    node: Arc::clone(&job.node),
                    key: key.clone(),
                    observed_record: job
                        .observed_record
                        .as_ref()
                        .map(|record| record.record_id.clone()),
                    inputs,
                    deadline: options.deadline,
                    request_id,
                    cancellation: in_flight.cancellation().clone(),
                };
                self.launch(Arc::clone(&in_flight), Arc::clone(runner), request);
            }
            Admission::Follower(_) => {
                log_node_operation(
                    "attach",
                    key.node_id.as_str(),
                    key.fingerprint.short(),
                    "running",
                    Some(&format!("launched_by={}", in_flight.launched_by())),
                );
                self.emit(events::NODE_ATTACHED, &key, request_id, json!({
                    "layer": layer,
                    "launched_by": in_flight.launched_by().to_string(),
                }))
                .await;
            }
        }

        match self.await_outcome(&in_flight, options).await {
            Ok(record) => {
                self.transition(tracker, &key, NodeEvent::Succeed);
                log_node_operation(
                    "complete",
                    key.node_id.as_str(),
                    key.fingerprint.short(),
                    "succeeded",
                    Some(&format!("record_id={}", record.record_id)),
                );
                self.emit(events::NODE_SUCCEEDED, &key, request_id, json!({
                    "record_id": record.record_id.as_str(),
                }))
                .await;
                NodeOutcome::Succeeded { record }
            }
            Err(error) => {
                self.transition(tracker, &key, NodeEvent::Fail(error.to_string()));
                log_node_operation(
                    "complete",
                    key.node_id.as_str(),
                    key.fingerprint.short(),
                    "failed",
                    Some(&error.to_string()),
                );
                self.emit(events::NODE_FAILED, &key, request_id, json!({
                    "kind": error.kind(),
                    "error": error.to_string(),
                }))
                .await;
                NodeOutcome::Failed { error }
            }
        }
    }

    /// Spawn the physical execution for a job this request leads
    fn launch(&self, job: Arc<InFlightJob>, runner: Arc<ProcedureRunner>, request: RunRequest) {
        let registry = Arc::clone(&self.in_flight);
        let permits = Arc::clone(&self.permits);
        let span = info_span!("node_execution", job = %request.key, request_id = %request.request_id);

        tokio::spawn(
            async move {
                let guard = CompletionGuard::new(registry, Arc::clone(&job));
                let node_id = job.key().node_id.clone();
                let cancellation = job.cancellation().clone();
                let deadline = request.deadline;
                let budget_ms = remaining_ms(deadline);

                let permit = tokio::select! {
                    _ = cancellation.cancelled() => {
                        guard.complete(Err(JobError::Cancelled { node_id }));
                        return;
                    }
                    _ = sleep_until(deadline) => {
                        guard.complete(Err(JobError::Timeout { node_id, deadline_ms: budget_ms }));
                        return;
                    }
                    permit = permits.acquire_owned() => permit,
                };
                let Ok(_permit) = permit else {
                    guard.complete(Err(JobError::Aborted { node_id }));
                    return;
                };

                let outcome = runner.run(request).await;
                guard.complete(into_job_result(outcome));
            }
            .instrument(span),
        );
    }

    /// Wait for the job's terminal outcome on behalf of this request
    async fn await_outcome(&self, job: &Arc<InFlightJob>, options: &ExecutionOptions) -> JobResult {
        let node_id = job.key().node_id.clone();
        let led_by_this_request = job.launched_by() == options.request_id;
        let budget_ms = remaining_ms(options.deadline);

        tokio::select! {
            result = job.wait() => result,
            _ = options.cancellation.cancelled() => {
                self.in_flight.withdraw(job);
                Err(JobError::Cancelled { node_id })
            }
            // The leader's own deadline is enforced inside the execution
            _ = sleep_until(options.deadline), if !led_by_this_request => {
                self.in_flight.withdraw(job);
                Err(JobError::Timeout { node_id, deadline_ms: budget_ms })
            }
        }
    }

    fn is_cancelled(&self, options: &ExecutionOptions) -> bool {
        options.cancellation.is_cancelled() || self.shutdown.is_cancelled()
    }

    fn transition(&self, tracker: &NodeStateTracker, key: &JobKey, event: NodeEvent) {
        if let Err(e) = tracker.transition(&key.node_id, &event) {
            warn!(job = %key, error = %e, "Rejected node state transition");
        }
    }

    async fn emit(&self, name: &str, key: &JobKey, request_id: Uuid, details: Value) {
        if let Err(e) = self
            .events
            .publish_node_event(name, key, request_id, details)
            .await
        {
            warn!(event = name, job = %key, error = %e, "Failed to publish node event");
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn remaining_ms(deadline: Option<Instant>) -> u64 {
    deadline
        .map(|deadline| deadline.saturating_duration_since(Instant::now()).as_millis() as u64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MeasurementNode;
    use crate::resolution::StalenessReason;

    fn planned(node: MeasurementNode) -> PlannedJob {
        PlannedJob {
            fingerprint: node.fingerprint(),
            node: Arc::new(node),
            reason: StalenessReason::NoRecord,
            observed_record: None,
            layer: 1,
        }
    }

    #[test]
    fn test_blocking_reason_names_original_failure() {
        let job = planned(MeasurementNode::new("p", "p").depends_on("q").depends_on("s"));
        let mut outcomes = BTreeMap::new();
        assert_eq!(JobScheduler::blocking_reason(&job, &outcomes), None);

        outcomes.insert(
            NodeId::new("q"),
            NodeOutcome::Skipped {
                reason: SkipReason::UpstreamFailed {
                    upstream: NodeId::new("r"),
                },
            },
        );
        assert_eq!(
            JobScheduler::blocking_reason(&job, &outcomes),
            Some(SkipReason::UpstreamFailed {
                upstream: NodeId::new("r")
            })
        );

        let direct = planned(MeasurementNode::new("t", "t").depends_on("s"));
        outcomes.insert(
            NodeId::new("s"),
            NodeOutcome::Failed {
                error: JobError::Aborted {
                    node_id: NodeId::new("s"),
                },
            },
        );
        assert_eq!(
            JobScheduler::blocking_reason(&direct, &outcomes),
            Some(SkipReason::UpstreamFailed {
                upstream: NodeId::new("s")
            })
        );
    }

    #[test]
    fn test_remaining_ms_without_deadline_is_zero() {
        assert_eq!(remaining_ms(None), 0);
    }

    #[tokio::test]
    async fn test_empty_plan_reports_nothing() {
        let scheduler = JobScheduler::new(SchedulerConfig::default());
        let store = Arc::new(crate::store::InMemoryResultStore::new());
        let runner = Arc::new(ProcedureRunner::new(
            Arc::new(crate::procedure::ProcedureRegistry::new()),
            store,
        ));
        let plan = ExecutionPlan {
            plan_id: Uuid::new_v4(),
            target: NodeId::new("p"),
            resolved_at: Utc::now(),
            graph_revision: 1,
            layers: Vec::new(),
            jobs: BTreeMap::new(),
            reused: BTreeMap::new(),
        };

        let report = scheduler
            .execute(&plan, runner, ExecutionOptions::default())
            .await;
        assert!(report.outcomes.is_empty());
        assert!(!report.is_success());
        assert_eq!(scheduler.available_permits(), SchedulerConfig::default().max_concurrent_jobs);
    }
}
