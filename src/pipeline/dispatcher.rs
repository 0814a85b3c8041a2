//! Registration and dispatch facade

use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

use super::context::PipelineContext;
use super::handler::Handler;
use super::registry::{HandlerConfig, HandlerRegistry, RegistrationHandle};
use super::strategy::{run_parallel, run_race, run_sequential, BackgroundErrorHook};

/// How a dispatch drives its handler snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// Strict `(priority desc, seq asc)` order, one handler at a time
    #[default]
    Sequential,
    /// Launch all qualifying handlers, settle all, then report
    Parallel,
    /// First settlement wins, losers are discarded
    Race,
}

/// What one dispatch produced
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DispatchOutcome {
    /// Collected handler results, in merge order
    pub results: Vec<Value>,
    pub terminated: bool,
    /// Designated result of an explicit termination, when one happened
    pub termination: Option<Value>,
    pub aborted: bool,
    pub abort_reason: Option<Value>,
    /// Isolated non-blocking failures, surfaced after settlement
    pub background_failures: Vec<BackgroundFailure>,
}

impl DispatchOutcome {
    /// The termination result if set, otherwise the last collected result
    pub fn final_value(&self) -> Option<&Value> {
        self.termination.as_ref().or_else(|| self.results.last())
    }
}

/// An isolated failure that did not fail the dispatch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackgroundFailure {
    pub handler_id: String,
    pub error: String,
}

/// Action-dispatch facade: handler registration plus the three execution
/// strategies behind a single `dispatch` call.
pub struct Dispatcher {
    registry: HandlerRegistry,
    default_modes: DashMap<String, ExecutionMode>,
    background_error_hook: RwLock<Option<BackgroundErrorHook>>,
}

impl Dispatcher {
    /// Create a dispatcher with an empty registry
    pub fn new() -> Self {
        Self {
            registry: HandlerRegistry::new(),
            default_modes: DashMap::new(),
            background_error_hook: RwLock::new(None),
        }
    }

    /// The underlying registry, for introspection or direct registration
    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// Register a handler for an action. See [`HandlerRegistry::register`].
    pub fn register(
        &self,
        action: &str,
        handler: Arc<dyn Handler>,
        config: HandlerConfig,
    ) -> RegistrationHandle {
        self.registry.register(action, handler, config)
    }

    /// Configure the mode used when `dispatch` is called without one.
    /// Unconfigured actions default to sequential.
    pub fn set_default_mode(&self, action: &str, mode: ExecutionMode) {
        self.default_modes.insert(action.to_string(), mode);
    }

    /// Observe isolated non-blocking handler failures as they are recorded.
    ///
    /// Failures are always collected into the outcome's
    /// `background_failures`; the hook is an additional side channel, not a
    /// replacement.
    pub fn on_background_error<F>(&self, hook: F)
    where
        F: Fn(&str, &anyhow::Error) + Send + Sync + 'static,
    {
        *self.background_error_hook.write() = Some(Arc::new(hook));
    }

    /// List actions with at least one registered handler
    pub fn actions(&self) -> Vec<String> {
        self.registry.actions()
    }

    /// Number of handlers registered for an action
    pub fn handler_count(&self, action: &str) -> usize {
        self.registry.handler_count(action)
    }

    /// Dispatch an action's pipeline against a payload.
    ///
    /// Snapshots the current registration list (an action with no handlers
    /// resolves successfully with empty results), builds a fresh context and
    /// delegates to the selected strategy. Later registry mutations do not
    /// affect an in-flight dispatch.
    ///
    /// Blocking handler failures reach the caller as the original error,
    /// unwrapped; non-blocking failures never fail the dispatch.
    pub async fn dispatch(
        &self,
        action: &str,
        payload: Value,
        mode: Option<ExecutionMode>,
    ) -> anyhow::Result<DispatchOutcome> {
        let snapshot = self.registry.snapshot(action);
        let mode = mode
            .or_else(|| self.default_modes.get(action).map(|entry| *entry.value()))
            .unwrap_or_default();
        debug!(action, handlers = snapshot.len(), ?mode, "dispatching");

        let ctx = PipelineContext::new(action, snapshot, payload);
        let hook = self.background_error_hook.read().clone();
        match mode {
            ExecutionMode::Sequential => run_sequential(ctx, hook).await,
            ExecutionMode::Parallel => run_parallel(ctx, hook).await,
            ExecutionMode::Race => run_race(ctx, hook).await,
        }
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}
