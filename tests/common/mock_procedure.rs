use async_trait::async_trait;
use parking_lot::Mutex;
use recal_core::{InvocationContext, MeasurementProcedure, NodeId};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Shared, ordered log of procedure start/finish markers across every mock
#[derive(Debug, Clone, Default)]
pub struct InvocationLog {
    entries: Arc<Mutex<Vec<String>>>,
}

impl InvocationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, entry: String) {
        self.entries.lock().push(entry);
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().clone()
    }

    /// Index of `entry` in the log, if present
    pub fn position(&self, entry: &str) -> Option<usize> {
        self.entries.lock().iter().position(|e| e == entry)
    }

    /// Whether `before` was logged strictly earlier than `after`
    pub fn happened_before(&self, before: &str, after: &str) -> bool {
        match (self.position(before), self.position(after)) {
            (Some(b), Some(a)) => b < a,
            _ => false,
        }
    }
}

#[derive(Debug, Clone)]
pub enum MockBehavior {
    /// Return this payload
    Succeed(Value),
    /// Return an error with this message
    Fail(String),
    /// Sleep, then return the payload
    Slow(Duration, Value),
    /// Block until the gate opens, then return the payload
    Gated(CancellationToken, Value),
}

/// Scriptable measurement procedure that records every invocation
#[derive(Debug)]
pub struct MockProcedure {
    name: String,
    behavior: Mutex<MockBehavior>,
    invocations: AtomicUsize,
    seen_inputs: Mutex<Vec<BTreeMap<NodeId, Value>>>,
    log: InvocationLog,
}

impl MockProcedure {
    pub fn new(name: impl Into<String>, behavior: MockBehavior, log: InvocationLog) -> Self {
        Self {
            name: name.into(),
            behavior: Mutex::new(behavior),
            invocations: AtomicUsize::new(0),
            seen_inputs: Mutex::new(Vec::new()),
            log,
        }
    }

    pub fn succeeding(name: impl Into<String>, log: InvocationLog) -> Self {
        let name = name.into();
        let payload = json!({ "measured": name });
        Self::new(name, MockBehavior::Succeed(payload), log)
    }

    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }

    /// Dependency payloads passed to each invocation, in call order
    pub fn seen_inputs(&self) -> Vec<BTreeMap<NodeId, Value>> {
        self.seen_inputs.lock().clone()
    }

    pub fn set_behavior(&self, behavior: MockBehavior) {
        *self.behavior.lock() = behavior;
    }

    /// Wait until at least `count` invocations have started
    pub async fn wait_for_invocations(&self, count: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.invocations() < count {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .expect("procedure was not invoked in time");
    }
}

#[async_trait]
impl MeasurementProcedure for MockProcedure {
    async fn invoke(&self, context: InvocationContext) -> anyhow::Result<Value> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        self.seen_inputs.lock().push(
            context
                .inputs
                .iter()
                .map(|(id, record)| (id.clone(), record.payload.clone()))
                .collect(),
        );
        self.log.push(format!("start:{}", self.name));

        let behavior = self.behavior.lock().clone();
        let result = match behavior {
            MockBehavior::Succeed(payload) => Ok(payload),
            MockBehavior::Fail(message) => Err(anyhow::anyhow!(message)),
            MockBehavior::Slow(delay, payload) => {
                tokio::time::sleep(delay).await;
                Ok(payload)
            }
            MockBehavior::Gated(gate, payload) => {
                gate.cancelled().await;
                Ok(payload)
            }
        };

        self.log.push(format!("end:{}", self.name));
        result
    }

    fn procedure_name(&self) -> &'static str {
        "mock_procedure"
    }
}
