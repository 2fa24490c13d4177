//! In-memory result store.
//!
//! Keeps the full record history per job key and supports fault injection so
//! that store outages can be exercised without a real backend.

use super::{ResultStore, StoreError};
use crate::models::{JobKey, NodeId, ResultRecord};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tracing::debug;

#[derive(Debug, Default)]
pub struct InMemoryResultStore {
    records: RwLock<HashMap<JobKey, Vec<ResultRecord>>>,
    unavailable: AtomicBool,
    failing_writes: RwLock<HashSet<NodeId>>,
    puts: AtomicUsize,
}

impl InMemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record directly, bypassing fault injection and counters
    pub fn seed(&self, record: ResultRecord) {
        self.records
            .write()
            .entry(record.job_key())
            .or_default()
            .push(record);
    }

    /// Every record written for `key`, oldest first
    pub fn history(&self, key: &JobKey) -> Vec<ResultRecord> {
        self.records.read().get(key).cloned().unwrap_or_default()
    }

    /// Number of successful `put` calls
    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    /// Make every read and write fail
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Make writes for one node fail while everything else keeps working
    pub fn fail_writes_for(&self, node_id: impl Into<NodeId>) {
        self.failing_writes.write().insert(node_id.into());
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("store marked unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ResultStore for InMemoryResultStore {
    async fn get_latest(&self, key: &JobKey) -> Result<Option<ResultRecord>, StoreError> {
        self.check_available()?;
        Ok(self
            .records
            .read()
            .get(key)
            .and_then(|history| history.last())
            .cloned())
    }

    async fn put(&self, key: &JobKey, record: ResultRecord) -> Result<(), StoreError> {
        self.check_available()?;
        if self.failing_writes.read().contains(&key.node_id) {
            return Err(StoreError::Unavailable(format!(
                "writes for {} are failing",
                key.node_id
            )));
        }
        if record.job_key() != *key {
            return Err(StoreError::KeyMismatch {
                record_key: record.job_key().to_string(),
                expected_key: key.to_string(),
            });
        }

        debug!(job = %key, record_id = %record.record_id, "Storing result record");
        self.records
            .write()
            .entry(key.clone())
            .or_default()
            .push(record);
        self.puts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
