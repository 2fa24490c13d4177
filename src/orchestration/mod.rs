//! # Orchestration
//!
//! Turns resolved plans into executions: the layered job scheduler, the
//! in-flight registry that deduplicates concurrent requests, the procedure
//! runner, and the caller-facing [`CalibrationCoordinator`].

pub mod coordinator;
pub mod errors;
pub mod in_flight;
pub mod job_scheduler;
pub mod procedure_runner;
pub mod types;

pub use coordinator::CalibrationCoordinator;
pub use errors::JobError;
pub use in_flight::{Admission, InFlightJob, InFlightRegistry, JobResult};
pub use job_scheduler::JobScheduler;
pub use procedure_runner::{ProcedureRunner, RunOutcome, RunRequest};
pub use types::{ExecutionOptions, ExecutionReport, NodeOutcome, OutcomeKind, SkipReason};
