//! Handle → procedure lookup.

use super::MeasurementProcedure;
use crate::models::ProcedureHandle;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Default)]
pub struct ProcedureRegistry {
    procedures: RwLock<HashMap<ProcedureHandle, Arc<dyn MeasurementProcedure>>>,
}

impl std::fmt::Debug for ProcedureRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcedureRegistry")
            .field("handles", &self.handles())
            .finish()
    }
}

impl ProcedureRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `procedure` under `handle`, replacing any previous registration
    pub fn register(
        &self,
        handle: impl Into<ProcedureHandle>,
        procedure: Arc<dyn MeasurementProcedure>,
    ) {
        let handle = handle.into();
        let previous = self.procedures.write().insert(handle.clone(), procedure);
        if previous.is_some() {
            warn!(handle = %handle, "Replaced registered procedure");
        } else {
            info!(handle = %handle, "Registered procedure");
        }
    }

    pub fn resolve(&self, handle: &ProcedureHandle) -> Option<Arc<dyn MeasurementProcedure>> {
        self.procedures.read().get(handle).cloned()
    }

    pub fn contains(&self, handle: &ProcedureHandle) -> bool {
        self.procedures.read().contains_key(handle)
    }

    /// Registered handles, sorted
    pub fn handles(&self) -> Vec<ProcedureHandle> {
        let mut handles: Vec<_> = self.procedures.read().keys().cloned().collect();
        handles.sort();
        handles
    }
}
