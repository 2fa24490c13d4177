//! # Measurement Procedures
//!
//! The capability interface behind a node's opaque procedure handle. Concrete
//! measurement kinds implement [`MeasurementProcedure`] and are registered under
//! a handle in the [`ProcedureRegistry`]; the core only ever invokes them and
//! passes their payload through untouched.

pub mod context;
pub mod registry;

pub use context::InvocationContext;
pub use registry::ProcedureRegistry;

use async_trait::async_trait;
use serde_json::Value;
use std::future::Future;
use std::marker::PhantomData;

/// An external measurement routine
#[async_trait]
pub trait MeasurementProcedure: Send + Sync {
    /// Run the measurement.
    ///
    /// The context carries the dependency results the procedure may read, the
    /// deadline it should respect, and a cancellation token it may observe. The
    /// runner enforces both regardless of whether the procedure does.
    async fn invoke(&self, context: InvocationContext) -> anyhow::Result<Value>;

    /// Name used in logs
    fn procedure_name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// Adapter turning an async closure into a [`MeasurementProcedure`]
pub struct FnProcedure<F, Fut> {
    func: F,
    _future: PhantomData<fn() -> Fut>,
}

impl<F, Fut> FnProcedure<F, Fut>
where
    F: Fn(InvocationContext) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Value>> + Send,
{
    pub fn new(func: F) -> Self {
        Self {
            func,
            _future: PhantomData,
        }
    }
}

#[async_trait]
impl<F, Fut> MeasurementProcedure for FnProcedure<F, Fut>
where
    F: Fn(InvocationContext) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Value>> + Send,
{
    async fn invoke(&self, context: InvocationContext) -> anyhow::Result<Value> {
        (self.func)(context).await
    }

    fn procedure_name(&self) -> &'static str {
        "fn_procedure"
    }
}
