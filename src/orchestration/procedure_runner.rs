//! # Procedure Runner
//!
//! Performs one physical execution of a planned job: adopt a result another
//! requester produced since resolution, or invoke the node's procedure under its
//! deadline and cancellation token and write the new record back to the store.
//! Failed attempts never write a record.

use super::errors::JobError;
use super::in_flight::JobResult;
use crate::logging::log_node_operation;
use crate::models::{JobKey, MeasurementNode, NodeId, RecordId, ResultRecord};
use crate::procedure::{InvocationContext, ProcedureRegistry};
use crate::store::ResultStore;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Everything needed to run one job
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub node: Arc<MeasurementNode>,
    pub key: JobKey,
    /// Latest record seen when the plan was resolved
    pub observed_record: Option<RecordId>,
    pub inputs: BTreeMap<NodeId, ResultRecord>,
    pub deadline: Option<Instant>,
    pub request_id: Uuid,
    pub cancellation: CancellationToken,
}

/// How a successful run obtained its record
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Executed(ResultRecord),
    /// Another requester produced a usable record after this plan was resolved
    Adopted(ResultRecord),
}

impl RunOutcome {
    pub fn into_record(self) -> ResultRecord {
        match self {
            Self::Executed(record) | Self::Adopted(record) => record,
        }
    }
}

pub struct ProcedureRunner {
    procedures: Arc<ProcedureRegistry>,
    store: Arc<dyn ResultStore>,
    default_timeout: Option<Duration>,
}

impl std::fmt::Debug for ProcedureRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcedureRunner")
            .field("procedures", &self.procedures)
            .field("default_timeout", &self.default_timeout)
            .finish()
    }
}

impl ProcedureRunner {
    pub fn new(procedures: Arc<ProcedureRegistry>, store: Arc<dyn ResultStore>) -> Self {
        Self {
            procedures,
            store,
            default_timeout: None,
        }
    }

    /// Timeout applied when the request carries no tighter deadline
    pub fn with_default_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn store(&self) -> &Arc<dyn ResultStore> {
        &self.store
    }

    /// Effective deadline: the earlier of the request deadline and the default timeout
    pub fn effective_deadline(&self, requested: Option<Instant>) -> Option<Instant> {
        let default = self.default_timeout.map(|timeout| Instant::now() + timeout);
        match (requested, default) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Run the job once
    #[instrument(skip(self, request), fields(job = %request.key, request_id = %request.request_id))]
    pub async fn run(&self, request: RunRequest) -> Result<RunOutcome, JobError> {
        let node_id = request.key.node_id.clone();

        if let Some(record) = self.adoptable_record(&request).await? {
            info!(
                node_id = %node_id,
                record_id = %record.record_id,
                "Adopting result produced by a concurrent request"
            );
            return Ok(RunOutcome::Adopted(record));
        }

        let procedure = self.procedures.resolve(&request.node.procedure).ok_or_else(|| {
            JobError::ProcedureNotRegistered {
                node_id: node_id.clone(),
                handle: request.node.procedure.clone(),
            }
        })?;

        let deadline = self.effective_deadline(request.deadline);
        let started_at = Utc::now();
        let budget_ms = deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()).as_millis() as u64)
            .unwrap_or_default();
        let context = InvocationContext {
            node: Arc::clone(&request.node),
            fingerprint: request.key.fingerprint.clone(),
            inputs: request.inputs,
            deadline,
            request_id: request.request_id,
            started_at,
            cancellation: request.cancellation.clone(),
        };

        debug!(
            node_id = %node_id,
            procedure = procedure.procedure_name(),
            budget_ms,
            "Invoking procedure"
        );
        let invocation = procedure.invoke(context);
        let result = tokio::select! {
            _ = request.cancellation.cancelled() => {
                return Err(JobError::Cancelled { node_id });
            }
            result = async {
                match deadline {
                    Some(deadline) => tokio::time::timeout_at(deadline, invocation).await.ok(),
                    None => Some(invocation.await),
                }
            } => result,
        };

        let payload = match result {
            None => {
                warn!(node_id = %node_id, budget_ms, "Procedure timed out");
                return Err(JobError::Timeout {
                    node_id,
                    deadline_ms: budget_ms,
                });
            }
            Some(Err(error)) => {
                return Err(JobError::Procedure {
                    node_id,
                    message: format!("{error:#}"),
                });
            }
            Some(Ok(payload)) => payload,
        };

        let record = ResultRecord::success(
            &request.key,
            started_at,
            Utc::now(),
            payload,
            Some(request.request_id),
        );
        self.store
            .put(&request.key, record.clone())
            .await
            .map_err(|e| JobError::StoreUnavailable {
                node_id: node_id.clone(),
                reason: e.to_string(),
            })?;

        log_node_operation(
            "record_written",
            node_id.as_str(),
            request.key.fingerprint.short(),
            "success",
            Some(&format!("record_id={}", record.record_id)),
        );
        Ok(RunOutcome::Executed(record))
    }

    /// A successful record written after resolution, started no earlier than the
    /// newest input it would have consumed
    async fn adoptable_record(&self, request: &RunRequest) -> Result<Option<ResultRecord>, JobError> {
        let latest = self
            .store
            .get_latest(&request.key)
            .await
            .map_err(|e| JobError::StoreUnavailable {
                node_id: request.key.node_id.clone(),
                reason: e.to_string(),
            })?;

        let Some(latest) = latest.filter(ResultRecord::is_success) else {
            return Ok(None);
        };
        if request.observed_record.as_ref() == Some(&latest.record_id) {
            return Ok(None);
        }
        let newest_input = request.inputs.values().map(|input| input.produced_at).max();
        if newest_input.is_some_and(|produced_at| latest.started_at < produced_at) {
            return Ok(None);
        }
        Ok(Some(latest))
    }
}

/// Flatten a run into the value delivered to in-flight waiters
pub(crate) fn into_job_result(outcome: Result<RunOutcome, JobError>) -> JobResult {
    outcome.map(RunOutcome::into_record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::procedure::FnProcedure;
    use crate::store::InMemoryResultStore;
    use anyhow::anyhow;
    use serde_json::json;

    fn request(node: MeasurementNode) -> RunRequest {
        let key = node.job_key();
        RunRequest {
            node: Arc::new(node),
            key,
            observed_record: None,
            inputs: BTreeMap::new(),
            deadline: None,
            request_id: Uuid::new_v4(),
            cancellation: CancellationToken::new(),
        }
    }

    fn runner_with(
        handle: &str,
        procedure: Arc<dyn crate::procedure::MeasurementProcedure>,
    ) -> (ProcedureRunner, Arc<InMemoryResultStore>) {
        let registry = Arc::new(ProcedureRegistry::new());
        registry.register(handle, procedure);
        let store = Arc::new(InMemoryResultStore::new());
        (ProcedureRunner::new(registry, store.clone()), store)
    }

    #[tokio::test]
    async fn test_success_writes_record() {
        let (runner, store) = runner_with(
            "spectroscopy",
            Arc::new(FnProcedure::new(|_ctx| async { Ok(json!({"f0_ghz": 7.12})) })),
        );
        let request = request(MeasurementNode::new("resonator", "spectroscopy"));
        let key = request.key.clone();

        let outcome = runner.run(request).await.unwrap();

        let RunOutcome::Executed(record) = outcome else {
            panic!("expected an executed run");
        };
        assert_eq!(record.payload, json!({"f0_ghz": 7.12}));
        assert_eq!(store.history(&key), vec![record]);
    }

    #[tokio::test]
    async fn test_failure_writes_nothing() {
        let (runner, store) = runner_with(
            "spectroscopy",
            Arc::new(FnProcedure::new(|_ctx| async {
                Err(anyhow!("no resonance found").context("fit failed"))
            })),
        );

        let err = runner
            .run(request(MeasurementNode::new("resonator", "spectroscopy")))
            .await
            .unwrap_err();

        assert_eq!(
            err,
            JobError::Procedure {
                node_id: "resonator".into(),
                message: "fit failed: no resonance found".to_string()
            }
        );
        assert_eq!(store.put_count(), 0);
    }

    #[tokio::test]
    async fn test_unregistered_handle() {
        let (runner, _) = runner_with(
            "spectroscopy",
            Arc::new(FnProcedure::new(|_ctx| async { Ok(json!(null)) })),
        );

        let err = runner
            .run(request(MeasurementNode::new("rabi", "rabi")))
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::ProcedureNotRegistered { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_turns_into_timeout() {
        let (runner, store) = runner_with(
            "slow",
            Arc::new(FnProcedure::new(|_ctx| async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(json!(null))
            })),
        );
        let mut request = request(MeasurementNode::new("slow", "slow"));
        request.deadline = Some(Instant::now() + Duration::from_millis(100));

        let err = runner.run(request).await.unwrap_err();

        assert_eq!(
            err,
            JobError::Timeout {
                node_id: "slow".into(),
                deadline_ms: 100
            }
        );
        assert_eq!(store.put_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_default_timeout_applies_without_deadline() {
        let registry = Arc::new(ProcedureRegistry::new());
        registry.register(
            "slow",
            Arc::new(FnProcedure::new(|_ctx| async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(json!(null))
            })),
        );
        let runner = ProcedureRunner::new(registry, Arc::new(InMemoryResultStore::new()))
            .with_default_timeout(Some(Duration::from_secs(1)));

        let err = runner
            .run(request(MeasurementNode::new("slow", "slow")))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn test_cancellation_stops_invocation() {
        let (runner, _) = runner_with(
            "slow",
            Arc::new(FnProcedure::new(|_ctx| async {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(json!(null))
            })),
        );
        let request = request(MeasurementNode::new("slow", "slow"));
        request.cancellation.cancel();

        let err = runner.run(request).await.unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn test_adopts_record_written_after_resolution() {
        let (runner, store) = runner_with(
            "spectroscopy",
            Arc::new(FnProcedure::new(|_ctx| async {
                Err(anyhow!("must not be invoked"))
            })),
        );
        let request = request(MeasurementNode::new("resonator", "spectroscopy"));
        let now = Utc::now();
        let concurrent = ResultRecord::success(&request.key, now, now, json!({"f0": 7.0}), None);
        store.seed(concurrent.clone());

        let outcome = runner.run(request).await.unwrap();
        assert_eq!(outcome, RunOutcome::Adopted(concurrent));
    }

    #[tokio::test]
    async fn test_does_not_adopt_the_observed_record() {
        let (runner, store) = runner_with(
            "spectroscopy",
            Arc::new(FnProcedure::new(|_ctx| async { Ok(json!({"f0": 7.1})) })),
        );
        let mut request = request(MeasurementNode::new("resonator", "spectroscopy"));
        let now = Utc::now();
        let observed = ResultRecord::success(&request.key, now, now, json!({"f0": 7.0}), None);
        store.seed(observed.clone());
        request.observed_record = Some(observed.record_id.clone());

        let outcome = runner.run(request).await.unwrap();
        assert!(matches!(outcome, RunOutcome::Executed(_)));
        assert_eq!(store.history(&observed.job_key()).len(), 2);
    }
}
