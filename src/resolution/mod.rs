//! # Staleness Resolution
//!
//! Decides which nodes of a dependency graph must be (re-)executed and in which
//! layered order, consulting the result store for each node's latest record.

pub mod errors;
pub mod execution_plan;
pub mod expiry_overrides;
pub mod staleness_resolver;

pub use errors::ResolveError;
pub use execution_plan::{ExecutionPlan, PlannedJob, StalenessReason};
pub use expiry_overrides::ExpiryOverrides;
pub use staleness_resolver::StalenessResolver;
