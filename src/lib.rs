#![allow(clippy::doc_markdown)] // Allow technical terms in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Recal Core
//!
//! Dependency-aware recalibration scheduler for measurement graphs on shared lab
//! apparatus.
//!
//! ## Overview
//!
//! Calibrated quantities form a dependency graph: a qubit's pulse parameters are
//! only valid while the resonator frequency they were derived from is fresh, which
//! in turn depends on a wiring calibration, and so on. Given a requested
//! measurement, this crate decides which upstream measurements are stale, computes
//! a safe layered execution order, and runs exactly the necessary jobs, reusing
//! fresh results and attaching concurrent requesters to executions already in
//! flight so a physical instrument never runs the same job twice at once.
//!
//! ## Module Organization
//!
//! - [`models`] - Measurement nodes, revisioned definitions, result records
//! - [`graph`] - Dependency graph construction, cycle detection, layering
//! - [`resolution`] - Staleness rules and execution plans
//! - [`orchestration`] - Job scheduler, in-flight registry, coordinator
//! - [`procedure`] - Measurement procedure capability and registry
//! - [`store`] - Result store adapter and in-memory implementation
//! - [`state_machine`] - Per-node execution states
//! - [`events`] - Node lifecycle event publishing
//! - [`config`] - Layered configuration
//! - [`logging`] - Structured logging
//! - [`error`] - Crate-level error type
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use recal_core::{
//!     CalibrationCoordinator, FnProcedure, InMemoryResultStore, MeasurementNode,
//!     NodeDefinitions, ProcedureRegistry, RecalConfig,
//! };
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let definitions = NodeDefinitions::from_nodes([
//!     MeasurementNode::new("attenuation", "wiring_check"),
//!     MeasurementNode::new("resonator", "spectroscopy").depends_on("attenuation"),
//! ]);
//!
//! let procedures = Arc::new(ProcedureRegistry::new());
//! procedures.register("wiring_check", Arc::new(FnProcedure::new(|_ctx| async { Ok(json!({"db": -60})) })));
//! procedures.register("spectroscopy", Arc::new(FnProcedure::new(|_ctx| async { Ok(json!({"f0_ghz": 7.12})) })));
//!
//! let coordinator = CalibrationCoordinator::new(
//!     Arc::new(definitions),
//!     Arc::new(InMemoryResultStore::new()),
//!     procedures,
//!     &RecalConfig::default(),
//! );
//!
//! let report = coordinator
//!     .request_result(&"resonator".into(), chrono::Utc::now(), None)
//!     .await?;
//! assert!(report.is_success());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod constants;
pub mod error;
pub mod events;
pub mod graph;
pub mod logging;
pub mod models;
pub mod orchestration;
pub mod procedure;
pub mod resolution;
pub mod state_machine;
pub mod store;

pub use config::{ConfigManager, LoggingConfig, RecalConfig, SchedulerConfig};
pub use error::{RecalError, Result};
pub use events::{EventPublisher, PublishedEvent};
pub use graph::{DependencyGraph, GraphError};
pub use logging::init_structured_logging;
pub use models::{
    DefinitionSource, ExpiryPolicy, JobKey, MeasurementNode, NodeDefinitions, NodeId,
    ParameterFingerprint, Parameters, ProcedureHandle, RecordId, RecordStatus, ResultRecord,
    SharedDefinitions,
};
pub use orchestration::{
    CalibrationCoordinator, ExecutionOptions, ExecutionReport, InFlightRegistry, JobError,
    JobScheduler, NodeOutcome, OutcomeKind, ProcedureRunner, SkipReason,
};
pub use procedure::{FnProcedure, InvocationContext, MeasurementProcedure, ProcedureRegistry};
pub use resolution::{
    ExecutionPlan, ExpiryOverrides, PlannedJob, ResolveError, StalenessReason, StalenessResolver,
};
pub use state_machine::{NodeEvent, NodeState};
pub use store::{InMemoryResultStore, ResultStore, StoreError};
