//! Per-invocation pipeline controller
//!
//! One controller exists per handler invocation. Handlers never mutate the
//! dispatch context directly; the controller records their directives into an
//! effects cell that the owning strategy reads after the handler settles and
//! merges deterministically. That keeps the context single-owner even when
//! handlers run concurrently.

use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::trace;

/// Directives a handler issued through its controller
#[derive(Debug, Clone, Default)]
pub(crate) struct ControllerEffects {
    /// Replacement payload, set by `modify_payload`
    pub payload: Option<Value>,
    pub aborted: bool,
    pub abort_reason: Option<Value>,
    pub terminated: bool,
    pub termination_result: Option<Value>,
    pub jump_to_priority: Option<i64>,
}

struct ControllerInner {
    action: String,
    handler_id: String,
    index: usize,
    /// Payload as captured at invocation time
    initial_payload: Value,
    /// Results collected before this invocation started
    results: Vec<Value>,
    effects: Mutex<ControllerEffects>,
    cancelled: Arc<AtomicBool>,
}

/// Capability object handed to a running handler.
///
/// Cheap to clone; clones share the same effects cell for the one invocation
/// they belong to.
#[derive(Clone)]
pub struct PipelineController {
    inner: Arc<ControllerInner>,
}

impl PipelineController {
    pub(crate) fn new(
        action: impl Into<String>,
        handler_id: impl Into<String>,
        index: usize,
        payload: Value,
        results: Vec<Value>,
        cancelled: Arc<AtomicBool>,
    ) -> Self {
        Self {
            inner: Arc::new(ControllerInner {
                action: action.into(),
                handler_id: handler_id.into(),
                index,
                initial_payload: payload,
                results,
                effects: Mutex::new(ControllerEffects::default()),
                cancelled,
            }),
        }
    }

    /// The action being dispatched
    pub fn action(&self) -> &str {
        &self.inner.action
    }

    /// Id of the handler this controller was built for
    pub fn handler_id(&self) -> &str {
        &self.inner.handler_id
    }

    /// Position of this handler in the dispatch snapshot
    pub fn index(&self) -> usize {
        self.inner.index
    }

    /// Stop the sequential iterator before the next handler runs.
    ///
    /// Only meaningful in sequential mode; parallel and race have no "next
    /// handler" to skip, so there the flag is recorded and ignored.
    pub fn abort(&self, reason: impl Into<Value>) {
        let mut effects = self.inner.effects.lock();
        effects.aborted = true;
        effects.abort_reason = Some(reason.into());
        trace!(
            action = %self.inner.action,
            handler_id = %self.inner.handler_id,
            "handler requested abort"
        );
    }

    /// Replace the dispatch payload with `updater(current)`.
    ///
    /// Only sequential mode guarantees subsequent handlers observe the new
    /// payload; parallel/race handlers already captured the payload at launch.
    pub fn modify_payload<F>(&self, updater: F)
    where
        F: FnOnce(Value) -> Value,
    {
        let mut effects = self.inner.effects.lock();
        let current = effects
            .payload
            .take()
            .unwrap_or_else(|| self.inner.initial_payload.clone());
        effects.payload = Some(updater(current));
    }

    /// Terminate the dispatch with `value` as its designated result.
    ///
    /// Short-circuits sequential mode immediately; in parallel/race the first
    /// terminating handler in launch order wins.
    pub fn terminate(&self, value: impl Into<Value>) {
        let mut effects = self.inner.effects.lock();
        effects.terminated = true;
        effects.termination_result = Some(value.into());
        trace!(
            action = %self.inner.action,
            handler_id = %self.inner.handler_id,
            "handler requested termination"
        );
    }

    /// Move the sequential iterator to the first handler registered at
    /// exactly `priority`. No-op outside sequential mode; an unmatched
    /// priority leaves iteration proceeding to the next index.
    pub fn jump_to_priority(&self, priority: i64) {
        let mut effects = self.inner.effects.lock();
        effects.jump_to_priority = Some(priority);
    }

    /// Current payload as this invocation sees it, including its own
    /// modifications
    pub fn payload(&self) -> Value {
        let effects = self.inner.effects.lock();
        effects
            .payload
            .clone()
            .unwrap_or_else(|| self.inner.initial_payload.clone())
    }

    /// Read-only snapshot of the results collected before this invocation
    pub fn results(&self) -> &[Value] {
        &self.inner.results
    }

    /// Cooperative cancellation flag, set once a race is decided.
    ///
    /// The engine never force-terminates a losing handler; long-running
    /// handlers that want to stop early poll this instead.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Drain the recorded directives for the post-settlement merge.
    pub(crate) fn take_effects(&self) -> ControllerEffects {
        std::mem::take(&mut *self.inner.effects.lock())
    }
}
