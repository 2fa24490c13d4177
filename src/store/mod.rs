//! # Result Store Adapter
//!
//! Narrow interface to the persistence layer. The core only ever reads the latest
//! record for a job and writes new records; it relies on the adapter for atomic
//! per-key read/compare/write and does not layer its own transactions on top.

pub mod memory;

use crate::models::{JobKey, ResultRecord};
use async_trait::async_trait;

pub use memory::InMemoryResultStore;

/// Store failures. Fatal to the job (or resolution) that hit them only.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("Result store unavailable: {0}")]
    Unavailable(String),

    #[error("Record for {record_key} does not match key {expected_key}")]
    KeyMismatch {
        record_key: String,
        expected_key: String,
    },
}

/// Persistence for result records
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Most recent record for `key`, or `None` if the job never ran
    async fn get_latest(&self, key: &JobKey) -> Result<Option<ResultRecord>, StoreError>;

    /// Append a new record for `key`, superseding prior ones
    async fn put(&self, key: &JobKey, record: ResultRecord) -> Result<(), StoreError>;
}
