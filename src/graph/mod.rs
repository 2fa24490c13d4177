//! # Dependency Graph
//!
//! Resolution-time graph over measurement nodes: reachability from a target,
//! cycle detection and topological layering for parallel execution.

pub mod dependency_graph;
pub mod errors;

pub use dependency_graph::DependencyGraph;
pub use errors::GraphError;
