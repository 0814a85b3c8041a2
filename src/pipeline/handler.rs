//! Handler trait and closure adapters
//!
//! Handlers are pure participants: they receive the payload and a controller,
//! do their work, and return a result value. Everything else (ordering,
//! blocking semantics, failure isolation) is the strategy's job.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use super::controller::PipelineController;

/// A registered function participating in one action's pipeline.
///
/// The controller is this invocation's capability surface back into the
/// dispatch; it is never stored by the engine beyond the invocation.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Run the handler against the dispatched payload.
    async fn run(&self, payload: Value, controller: PipelineController) -> Result<Value>;
}

/// Boxed future returned by closure-based handlers
pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<Value>> + Send>>;

/// Wrapper turning a plain closure into a [`Handler`].
pub struct FnHandler<F> {
    func: F,
}

impl<F> FnHandler<F>
where
    F: Fn(Value, PipelineController) -> HandlerFuture + Send + Sync,
{
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

#[async_trait]
impl<F> Handler for FnHandler<F>
where
    F: Fn(Value, PipelineController) -> HandlerFuture + Send + Sync,
{
    async fn run(&self, payload: Value, controller: PipelineController) -> Result<Value> {
        (self.func)(payload, controller).await
    }
}

/// Convenience constructor for closure-based handlers.
///
/// ```ignore
/// let handler = handler_fn(|payload, _ctl| {
///     Box::pin(async move { Ok(payload) })
/// });
/// ```
pub fn handler_fn<F>(func: F) -> Arc<dyn Handler>
where
    F: Fn(Value, PipelineController) -> HandlerFuture + Send + Sync + 'static,
{
    Arc::new(FnHandler::new(func))
}

/// Register a plain async function as a handler without writing the trait impl.
#[macro_export]
macro_rules! register_handler {
    ($dispatcher:expr, $action:expr, $handler_func:path) => {{
        struct Registered;
        #[async_trait::async_trait]
        impl $crate::Handler for Registered {
            async fn run(
                &self,
                payload: serde_json::Value,
                controller: $crate::PipelineController,
            ) -> anyhow::Result<serde_json::Value> {
                $handler_func(payload, controller).await
            }
        }
        $dispatcher.register($action, std::sync::Arc::new(Registered), $crate::HandlerConfig::default())
    }};
    ($dispatcher:expr, $action:expr, $handler_func:path, $config:expr) => {{
        struct Registered;
        #[async_trait::async_trait]
        impl $crate::Handler for Registered {
            async fn run(
                &self,
                payload: serde_json::Value,
                controller: $crate::PipelineController,
            ) -> anyhow::Result<serde_json::Value> {
                $handler_func(payload, controller).await
            }
        }
        $dispatcher.register($action, std::sync::Arc::new(Registered), $config)
    }};
}
