//! # In-flight Job Registry
//!
//! Maps a job key to the single physical execution currently running for it, so
//! that concurrent requesters attach to one execution instead of launching
//! duplicates. Insert, lookup and removal for one key each happen inside a single
//! map-shard critical section.
//!
//! Completion publishes the outcome to every attached waiter *before* the entry is
//! removed, so a waiter that found the entry can never miss the notification.

use super::errors::JobError;
use crate::models::{JobKey, ResultRecord};
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

pub type JobResult = Result<ResultRecord, JobError>;

/// Shared handle to one running execution
#[derive(Debug)]
pub struct InFlightJob {
    key: JobKey,
    outcome: watch::Sender<Option<JobResult>>,
    cancel: CancellationToken,
    interest: AtomicUsize,
    launched_by: Uuid,
    launched_at: DateTime<Utc>,
}

impl InFlightJob {
    pub fn key(&self) -> &JobKey {
        &self.key
    }

    /// Request that launched the execution
    pub fn launched_by(&self) -> Uuid {
        self.launched_by
    }

    pub fn launched_at(&self) -> DateTime<Utc> {
        self.launched_at
    }

    /// Fires when every interested requester has withdrawn, or on shutdown
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Number of requesters still waiting on this execution
    pub fn interest(&self) -> usize {
        self.interest.load(Ordering::SeqCst)
    }

    pub fn is_complete(&self) -> bool {
        self.outcome.borrow().is_some()
    }

    /// Wait for the terminal outcome
    #[allow(clippy::let_and_return)]
    pub async fn wait(&self) -> JobResult {
        let mut receiver = self.outcome.subscribe();
        let result = match receiver.wait_for(Option::is_some).await {
            Ok(outcome) => match outcome.as_ref() {
                Some(result) => result.clone(),
                None => Err(self.aborted()),
            },
            Err(_) => Err(self.aborted()),
        };
        result
    }

    /// Cancelled and no longer accepting requesters
    fn is_draining(&self) -> bool {
        self.cancel.is_cancelled() || self.interest() == 0
    }

    fn aborted(&self) -> JobError {
        JobError::Aborted {
            node_id: self.key.node_id.clone(),
        }
    }
}

/// Whether the caller launched the execution or joined an existing one
#[derive(Debug, Clone)]
pub enum Admission {
    Leader(Arc<InFlightJob>),
    Follower(Arc<InFlightJob>),
}

impl Admission {
    pub fn job(&self) -> &Arc<InFlightJob> {
        match self {
            Self::Leader(job) | Self::Follower(job) => job,
        }
    }

    pub fn is_leader(&self) -> bool {
        matches!(self, Self::Leader(_))
    }
}

/// Process-wide (per scheduler instance) registry of running executions
#[derive(Debug, Default)]
pub struct InFlightRegistry {
    jobs: DashMap<JobKey, Arc<InFlightJob>>,
}

impl InFlightRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach to the execution running for `key`, or register a new one.
    ///
    /// A new execution's cancellation token is a child of `parent`. An execution
    /// that is already cancelled never gains requesters; the caller waits for it
    /// to finish and then launches a fresh one, so each key has at most one
    /// physical execution at a time.
    pub async fn acquire(
        &self,
        key: &JobKey,
        request_id: Uuid,
        parent: &CancellationToken,
    ) -> Admission {
        loop {
            match self.try_acquire(key, request_id, parent) {
                Ok(admission) => return admission,
                Err(draining) => {
                    debug!(job = %key, "Waiting for cancelled in-flight job to drain");
                    let _ = draining.wait().await;
                }
            }
        }
    }

    /// Non-blocking [`acquire`](Self::acquire). Returns the draining execution
    /// when the running one was cancelled and has not finished yet.
    pub fn try_acquire(
        &self,
        key: &JobKey,
        request_id: Uuid,
        parent: &CancellationToken,
    ) -> Result<Admission, Arc<InFlightJob>> {
        match self.jobs.entry(key.clone()) {
            Entry::Occupied(mut entry) => {
                let job = Arc::clone(entry.get());
                if job.is_draining() {
                    if !job.is_complete() {
                        return Err(job);
                    }
                    // Finished but not yet removed
                    let fresh = Self::register(key, request_id, parent);
                    entry.insert(Arc::clone(&fresh));
                    debug!(job = %key, "Replaced drained in-flight job");
                    return Ok(Admission::Leader(fresh));
                }
                // Interest only grows while positive; zero is final
                let attached = job
                    .interest
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                        (n > 0).then_some(n + 1)
                    })
                    .is_ok();
                if !attached {
                    return Err(job);
                }
                debug!(job = %key, interest = job.interest(), "Attached to in-flight job");
                Ok(Admission::Follower(job))
            }
            Entry::Vacant(entry) => {
                let job = Self::register(key, request_id, parent);
                entry.insert(Arc::clone(&job));
                debug!(job = %key, "Registered in-flight job");
                Ok(Admission::Leader(job))
            }
        }
    }

    fn register(key: &JobKey, request_id: Uuid, parent: &CancellationToken) -> Arc<InFlightJob> {
        let (outcome, _) = watch::channel(None);
        Arc::new(InFlightJob {
            key: key.clone(),
            outcome,
            cancel: parent.child_token(),
            interest: AtomicUsize::new(1),
            launched_by: request_id,
            launched_at: Utc::now(),
        })
    }

    /// Publish `result` to every waiter, then remove the entry.
    ///
    /// Only the first completion counts; later calls are ignored. Returns true if
    /// this call delivered the outcome.
    pub fn complete(&self, job: &Arc<InFlightJob>, result: JobResult) -> bool {
        let delivered = job.outcome.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(result);
            true
        });
        self.jobs
            .remove_if(&job.key, |_, registered| Arc::ptr_eq(registered, job));
        if !delivered {
            warn!(job = %job.key, "Ignoring duplicate completion of in-flight job");
        }
        delivered
    }

    /// A requester stops waiting. Cancels the execution once nobody is left.
    pub fn withdraw(&self, job: &Arc<InFlightJob>) {
        let previous = job
            .interest
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .unwrap_or(0);
        if previous == 1 {
            debug!(job = %job.key, "Last requester withdrew; cancelling execution");
            job.cancel.cancel();
        }
    }

    pub fn get(&self, key: &JobKey) -> Option<Arc<InFlightJob>> {
        self.jobs.get(key).map(|entry| Arc::clone(entry.value()))
    }

    pub fn contains(&self, key: &JobKey) -> bool {
        self.jobs.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

/// Completes a leader's job with [`JobError::Aborted`] if it is dropped before
/// an outcome was delivered, e.g. when the execution task panics.
pub(crate) struct CompletionGuard {
    registry: Arc<InFlightRegistry>,
    job: Arc<InFlightJob>,
}

impl CompletionGuard {
    pub(crate) fn new(registry: Arc<InFlightRegistry>, job: Arc<InFlightJob>) -> Self {
        Self { registry, job }
    }

    pub(crate) fn complete(self, result: JobResult) {
        self.registry.complete(&self.job, result);
    }
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        if !self.job.is_complete() {
            let aborted = self.job.aborted();
            self.registry.complete(&self.job, Err(aborted));
        }
    }
}
