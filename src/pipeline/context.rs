//! Per-dispatch execution state
//!
//! Exactly one context exists per dispatch. It is owned by the strategy that
//! drives it; handler tasks never touch it directly (their effects are merged
//! in by the strategy after they settle), so no locking is needed.

use serde_json::Value;

use super::dispatcher::{BackgroundFailure, DispatchOutcome};
use super::registry::HandlerRegistration;

pub(crate) struct PipelineContext {
    pub action: String,
    /// Immutable snapshot captured at dispatch start; never changes length or
    /// order afterwards.
    pub handlers: Vec<HandlerRegistration>,
    pub payload: Value,
    pub results: Vec<Value>,
    pub aborted: bool,
    pub abort_reason: Option<Value>,
    pub terminated: bool,
    pub termination_result: Option<Value>,
}

impl PipelineContext {
    pub fn new(action: impl Into<String>, handlers: Vec<HandlerRegistration>, payload: Value) -> Self {
        Self {
            action: action.into(),
            handlers,
            payload,
            results: Vec::new(),
            aborted: false,
            abort_reason: None,
            terminated: false,
            termination_result: None,
        }
    }

    /// First snapshot index registered at exactly `priority`.
    ///
    /// Priorities are not unique; a jump to a duplicated priority always
    /// lands on the first occurrence in snapshot order.
    pub fn jump_target(&self, priority: i64) -> Option<usize> {
        self.handlers.iter().position(|r| r.priority == priority)
    }

    pub fn into_outcome(self, background_failures: Vec<BackgroundFailure>) -> DispatchOutcome {
        DispatchOutcome {
            results: self.results,
            terminated: self.terminated,
            termination: self.termination_result,
            aborted: self.aborted,
            abort_reason: self.abort_reason,
            background_failures,
        }
    }
}
