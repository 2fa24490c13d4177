//! # System Constants
//!
//! Lifecycle event names and operational defaults shared across the crate.

/// Node lifecycle events published by the job scheduler
pub mod events {
    /// A physical execution was launched
    pub const NODE_STARTED: &str = "node.started";
    /// A requester attached to an execution already in flight
    pub const NODE_ATTACHED: &str = "node.attached";
    pub const NODE_SUCCEEDED: &str = "node.succeeded";
    pub const NODE_FAILED: &str = "node.failed";
    pub const NODE_SKIPPED: &str = "node.skipped";
    /// A fresh node's existing record was reused
    pub const NODE_REUSED: &str = "node.reused";

    pub const PLAN_RESOLVED: &str = "plan.resolved";
    pub const EXECUTION_COMPLETED: &str = "execution.completed";
}

/// Operational defaults
pub mod system {
    /// Layers wider than this queue for execution permits
    pub const DEFAULT_MAX_CONCURRENT_JOBS: usize = 8;
    /// Zero disables the default per-invocation timeout
    pub const DEFAULT_JOB_TIMEOUT_MS: u64 = 0;
    pub const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 1000;
    pub const DEFAULT_ENVIRONMENT: &str = "development";
    pub const CONFIG_FILE_STEM: &str = "recal";
    pub const ENV_PREFIX: &str = "RECAL";
}
