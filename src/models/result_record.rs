//! # Result Records
//!
//! Immutable records of a node's execution, owned by the result store. A re-run
//! produces a new record that supersedes the prior one for freshness purposes;
//! prior records are never mutated in place.

use super::node::{JobKey, NodeId, ParameterFingerprint};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use uuid::Uuid;

/// Number of hex digits kept in a record id
pub const RECORD_ID_LEN: usize = 40;

/// Content-derived identifier of a single record
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    /// Derive a record id from the job identity, start time and originating request.
    pub fn derive(key: &JobKey, started_at: DateTime<Utc>, request_id: Option<Uuid>) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(key.node_id.as_str().as_bytes());
        hasher.update(key.fingerprint.as_str().as_bytes());
        hasher.update(
            started_at
                .to_rfc3339_opts(SecondsFormat::Nanos, true)
                .as_bytes(),
        );
        if let Some(request_id) = request_id {
            hasher.update(request_id.as_bytes());
        }
        let mut digest = hex::encode(hasher.finalize());
        digest.truncate(RECORD_ID_LEN);
        Self(digest)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Terminal status of the execution a record describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Success,
    Failure,
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Failure => write!(f, "failure"),
        }
    }
}

/// Stored outcome of one execution of a (node, parameters) job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub record_id: RecordId,
    pub node_id: NodeId,
    pub fingerprint: ParameterFingerprint,
    pub started_at: DateTime<Utc>,
    pub produced_at: DateTime<Utc>,
    pub status: RecordStatus,
    pub payload: serde_json::Value,
    /// Request that caused this execution, if any
    pub request_id: Option<Uuid>,
}

impl ResultRecord {
    /// Build a successful record for `key`
    pub fn success(
        key: &JobKey,
        started_at: DateTime<Utc>,
        produced_at: DateTime<Utc>,
        payload: serde_json::Value,
        request_id: Option<Uuid>,
    ) -> Self {
        Self {
            record_id: RecordId::derive(key, started_at, request_id),
            node_id: key.node_id.clone(),
            fingerprint: key.fingerprint.clone(),
            started_at,
            produced_at,
            status: RecordStatus::Success,
            payload,
            request_id,
        }
    }

    pub fn job_key(&self) -> JobKey {
        JobKey::new(self.node_id.clone(), self.fingerprint.clone())
    }

    pub fn is_success(&self) -> bool {
        self.status == RecordStatus::Success
    }

    /// Wall-clock time the execution took
    pub fn duration(&self) -> chrono::Duration {
        self.produced_at - self.started_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::node::MeasurementNode;
    use serde_json::json;

    #[test]
    fn test_record_ids_differ_per_start_time() {
        let key = MeasurementNode::new("resonator", "spectroscopy").job_key();
        let t0 = Utc::now();
        let t1 = t0 + chrono::Duration::milliseconds(1);

        let a = ResultRecord::success(&key, t0, t1, json!({"f0_ghz": 7.1}), None);
        let b = ResultRecord::success(&key, t1, t1, json!({"f0_ghz": 7.1}), None);

        assert_ne!(a.record_id, b.record_id);
        assert_eq!(a.record_id.as_str().len(), RECORD_ID_LEN);
        assert_eq!(a.job_key(), key);
        assert!(a.is_success());
        assert_eq!(a.duration(), chrono::Duration::milliseconds(1));
    }

    #[test]
    fn test_record_serde() {
        let key = MeasurementNode::new("resonator", "spectroscopy").job_key();
        let now = Utc::now();
        let record = ResultRecord::success(&key, now, now, json!({"q": 1}), Some(Uuid::new_v4()));

        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"status\":\"success\""));

        let parsed: ResultRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, record);
    }
}
