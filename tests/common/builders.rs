//! Graph and coordinator builders shared by the integration tests

use super::mock_procedure::{InvocationLog, MockBehavior, MockProcedure};
use recal_core::{
    CalibrationCoordinator, DefinitionSource, ExpiryPolicy, InMemoryResultStore, JobScheduler,
    MeasurementNode, NodeDefinitions, ProcedureRegistry, RecalConfig, SchedulerConfig,
};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

/// `p -> q -> r`: p depends on q, q depends on r. Each node's procedure handle is
/// its own id.
pub fn chain_definitions(r_expiry: ExpiryPolicy) -> NodeDefinitions {
    NodeDefinitions::from_nodes([
        MeasurementNode::new("r", "r").with_expiry(r_expiry),
        MeasurementNode::new("q", "q").depends_on("r"),
        MeasurementNode::new("p", "p").depends_on("q"),
    ])
}

/// Two branches joined at `top`:
///
/// ```text
/// top -> left  -> base
///     -> right -> base
/// ```
pub fn diamond_definitions() -> NodeDefinitions {
    NodeDefinitions::from_nodes([
        MeasurementNode::new("base", "base"),
        MeasurementNode::new("left", "left").depends_on("base"),
        MeasurementNode::new("right", "right").depends_on("base"),
        MeasurementNode::new("top", "top")
            .depends_on("left")
            .depends_on("right"),
    ])
}

/// A coordinator wired to an in-memory store and a mock procedure per node
pub struct TestHarness {
    pub coordinator: Arc<CalibrationCoordinator>,
    pub store: Arc<InMemoryResultStore>,
    pub procedures: Arc<ProcedureRegistry>,
    pub log: InvocationLog,
    mocks: HashMap<String, Arc<MockProcedure>>,
}

impl TestHarness {
    /// Register a succeeding mock for every node in `definitions`
    pub fn new(definitions: NodeDefinitions) -> Self {
        Self::with_config(definitions, SchedulerConfig::default())
    }

    pub fn with_config(definitions: NodeDefinitions, config: SchedulerConfig) -> Self {
        let scheduler = Arc::new(JobScheduler::new(config));
        let handles: BTreeSet<String> = definitions
            .iter()
            .map(|node| node.procedure.as_str().to_string())
            .collect();
        Self::build(Arc::new(definitions), handles, scheduler)
    }

    /// Same as [`new`](Self::new) with live-editable definitions
    pub fn with_source(source: Arc<dyn DefinitionSource>) -> Self {
        let handles: BTreeSet<String> = source
            .snapshot()
            .iter()
            .map(|node| node.procedure.as_str().to_string())
            .collect();
        let scheduler = Arc::new(JobScheduler::new(RecalConfig::default().scheduler));
        Self::build(source, handles, scheduler)
    }

    /// A second coordinator over the same store, procedures and scheduler
    pub fn sibling(&self, definitions: NodeDefinitions) -> Arc<CalibrationCoordinator> {
        Arc::new(CalibrationCoordinator::with_scheduler(
            Arc::new(definitions),
            self.store.clone(),
            Arc::clone(&self.procedures),
            Arc::clone(self.coordinator.scheduler()),
        ))
    }

    fn build(
        definitions: Arc<dyn DefinitionSource>,
        handles: BTreeSet<String>,
        scheduler: Arc<JobScheduler>,
    ) -> Self {
        let store = Arc::new(InMemoryResultStore::new());
        let procedures = Arc::new(ProcedureRegistry::new());
        let log = InvocationLog::new();

        let mut mocks = HashMap::new();
        for handle in handles {
            let mock = Arc::new(MockProcedure::succeeding(handle.clone(), log.clone()));
            procedures.register(handle.clone(), mock.clone());
            mocks.insert(handle, mock);
        }

        let coordinator = Arc::new(CalibrationCoordinator::with_scheduler(
            definitions,
            store.clone(),
            Arc::clone(&procedures),
            scheduler,
        ));

        Self {
            coordinator,
            store,
            procedures,
            log,
            mocks,
        }
    }

    /// The mock registered under `handle`
    pub fn mock(&self, handle: &str) -> Arc<MockProcedure> {
        Arc::clone(
            self.mocks
                .get(handle)
                .unwrap_or_else(|| panic!("no mock registered for '{handle}'")),
        )
    }

    pub fn set_behavior(&self, handle: &str, behavior: MockBehavior) {
        self.mock(handle).set_behavior(behavior);
    }

    pub fn invocations(&self, handle: &str) -> usize {
        self.mock(handle).invocations()
    }

    pub fn total_invocations(&self) -> usize {
        self.mocks.values().map(|m| m.invocations()).sum()
    }
}
