//! # Data Models
//!
//! Measurement nodes, the revisioned definition table they live in, and the
//! result records the store keeps for them.

pub mod definitions;
pub mod node;
pub mod result_record;

pub use definitions::{DefinitionError, DefinitionSource, NodeDefinitions, SharedDefinitions};
pub use node::{
    ExpiryPolicy, JobKey, MeasurementNode, NodeId, ParameterFingerprint, Parameters,
    ProcedureHandle,
};
pub use result_record::{RecordId, RecordStatus, ResultRecord};
