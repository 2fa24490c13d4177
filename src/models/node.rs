//! # Measurement Nodes
//!
//! A measurement node is a named unit of calibration work: it declares which
//! other nodes it reads from, the parameters that shape its result, how long
//! that result stays valid, and an opaque handle to the procedure that produces
//! it. Edges are stored as ids only; graphs are resolved from them at request
//! time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Duration;

/// Named configuration values that affect a node's result.
///
/// Keys are kept sorted so that two parameter sets with the same entries always
/// produce the same fingerprint, regardless of the order they were declared in.
pub type Parameters = BTreeMap<String, serde_json::Value>;

/// Stable identifier of a node within a definition revision
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for NodeId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Name under which a measurement procedure is registered
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProcedureHandle(String);

impl ProcedureHandle {
    pub fn new(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProcedureHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProcedureHandle {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ProcedureHandle {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Deterministic digest of a node's parameters (hex-encoded SHA-256)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParameterFingerprint(String);

impl ParameterFingerprint {
    /// Fingerprint a parameter set.
    ///
    /// Each entry is framed with its key length so that `{"ab": 1}` and
    /// `{"a": "b1"}`-style collisions cannot occur.
    pub fn of(parameters: &Parameters) -> Self {
        let mut hasher = Sha256::new();
        for (key, value) in parameters {
            hasher.update((key.len() as u64).to_le_bytes());
            hasher.update(key.as_bytes());
            let rendered = value.to_string();
            hasher.update((rendered.len() as u64).to_le_bytes());
            hasher.update(rendered.as_bytes());
        }
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex digits, for log lines
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

impl fmt::Display for ParameterFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of one logical job: the same node with the same parameters.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct JobKey {
    pub node_id: NodeId,
    pub fingerprint: ParameterFingerprint,
}

impl JobKey {
    pub fn new(node_id: NodeId, fingerprint: ParameterFingerprint) -> Self {
        Self {
            node_id,
            fingerprint,
        }
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.node_id, self.fingerprint.short())
    }
}

/// How long a stored result stays valid after it was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpiryPolicy {
    /// A stored result is reused forever (until a dependency is recomputed)
    #[default]
    Never,
    /// Every request recomputes the node
    Always,
    /// The result expires this long after `produced_at`
    After(#[serde(with = "duration_secs")] Duration),
}

impl ExpiryPolicy {
    pub fn after_secs(secs: u64) -> Self {
        Self::After(Duration::from_secs(secs))
    }

    /// Whether a result produced at `produced_at` is expired at `now`.
    ///
    /// A result is still fresh at exactly `produced_at + ttl`.
    pub fn is_expired(&self, produced_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        match self {
            Self::Never => false,
            Self::Always => true,
            Self::After(ttl) => match chrono::Duration::from_std(*ttl)
                .ok()
                .and_then(|ttl| produced_at.checked_add_signed(ttl))
            {
                Some(expires_at) => expires_at < now,
                // A ttl beyond chrono's range never elapses
                None => false,
            },
        }
    }
}

impl fmt::Display for ExpiryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Never => write!(f, "never"),
            Self::Always => write!(f, "always"),
            Self::After(ttl) => write!(f, "after {}s", ttl.as_secs_f64()),
        }
    }
}

mod duration_secs {
    use super::*;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        use serde::de::Error;

        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs)
            .map_err(|e| D::Error::custom(format!("invalid expiry duration {secs}: {e}")))
    }
}

/// A declared measurement procedure with dependencies and a freshness policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementNode {
    pub id: NodeId,
    #[serde(default)]
    pub dependencies: BTreeSet<NodeId>,
    #[serde(default)]
    pub parameters: Parameters,
    #[serde(default)]
    pub expiry: ExpiryPolicy,
    pub procedure: ProcedureHandle,
}

impl MeasurementNode {
    pub fn new(id: impl Into<NodeId>, procedure: impl Into<ProcedureHandle>) -> Self {
        Self {
            id: id.into(),
            dependencies: BTreeSet::new(),
            parameters: Parameters::new(),
            expiry: ExpiryPolicy::default(),
            procedure: procedure.into(),
        }
    }

    pub fn depends_on(mut self, dependency: impl Into<NodeId>) -> Self {
        self.dependencies.insert(dependency.into());
        self
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.parameters.insert(name.into(), value);
        self
    }

    pub fn with_expiry(mut self, expiry: ExpiryPolicy) -> Self {
        self.expiry = expiry;
        self
    }

    pub fn fingerprint(&self) -> ParameterFingerprint {
        ParameterFingerprint::of(&self.parameters)
    }

    pub fn job_key(&self) -> JobKey {
        JobKey::new(self.id.clone(), self.fingerprint())
    }
}
