//! Per-action handler registry
//!
//! Each action name maps to a list of registrations kept sorted by
//! `(priority desc, insertion sequence asc)`. Dispatch reads a snapshot;
//! register/unregister are the only mutators, so an in-flight dispatch is
//! insulated from concurrent registry changes.

use dashmap::DashMap;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

use super::handler::Handler;

/// Gate checked without the payload before a handler qualifies for a dispatch
pub type ConditionFn = Arc<dyn Fn() -> bool + Send + Sync>;
/// Gate checked against the payload before a handler qualifies for a dispatch
pub type ValidationFn = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

/// Configuration accepted at registration time
#[derive(Clone, Default)]
pub struct HandlerConfig {
    /// Caller-supplied id; generated with cuid2 when absent. Uniqueness is
    /// not enforced.
    pub id: Option<String>,
    /// Higher runs earlier in sequential mode (default 0)
    pub priority: i64,
    /// Blocking handlers gate the sequential loop and can fail the dispatch
    pub blocking: bool,
    pub condition: Option<ConditionFn>,
    pub validation: Option<ValidationFn>,
}

impl HandlerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    pub fn blocking(mut self, blocking: bool) -> Self {
        self.blocking = blocking;
        self
    }

    pub fn condition<F>(mut self, condition: F) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        self.condition = Some(Arc::new(condition));
        self
    }

    pub fn validation<F>(mut self, validation: F) -> Self
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        self.validation = Some(Arc::new(validation));
        self
    }
}

/// One registered handler. Immutable after creation.
#[derive(Clone)]
pub struct HandlerRegistration {
    pub id: String,
    pub priority: i64,
    pub blocking: bool,
    pub(crate) handler: Arc<dyn Handler>,
    pub(crate) condition: Option<ConditionFn>,
    pub(crate) validation: Option<ValidationFn>,
    /// Registry-wide insertion sequence number, the stable tie-break among
    /// equal priorities and the key unregistration matches on.
    pub(crate) seq: u64,
}

impl HandlerRegistration {
    /// Condition/validation gate. A false from either silently skips the
    /// handler for this dispatch; skips are not errors.
    pub(crate) fn qualifies(&self, payload: &Value) -> bool {
        if let Some(condition) = &self.condition {
            if !condition() {
                return false;
            }
        }
        if let Some(validation) = &self.validation {
            if !validation(payload) {
                return false;
            }
        }
        true
    }
}

impl std::fmt::Debug for HandlerRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistration")
            .field("id", &self.id)
            .field("priority", &self.priority)
            .field("blocking", &self.blocking)
            .field("seq", &self.seq)
            .finish()
    }
}

/// Registry of handlers keyed by action name
#[derive(Clone)]
pub struct HandlerRegistry {
    actions: Arc<DashMap<String, Vec<HandlerRegistration>>>,
    next_seq: Arc<AtomicU64>,
}

impl HandlerRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            actions: Arc::new(DashMap::new()),
            next_seq: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Register a handler for an action.
    ///
    /// The registration is inserted at the position determined by descending
    /// priority; among equal priorities, later registrations go behind
    /// earlier ones. The returned handle removes exactly this registration.
    pub fn register(
        &self,
        action: &str,
        handler: Arc<dyn Handler>,
        config: HandlerConfig,
    ) -> RegistrationHandle {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let id = config.id.unwrap_or_else(cuid2::create_id);
        let registration = HandlerRegistration {
            id: id.clone(),
            priority: config.priority,
            blocking: config.blocking,
            handler,
            condition: config.condition,
            validation: config.validation,
            seq,
        };

        let mut entry = self.actions.entry(action.to_string()).or_default();
        let position = entry
            .iter()
            .position(|existing| existing.priority < registration.priority)
            .unwrap_or(entry.len());
        entry.insert(position, registration);
        debug!(
            action,
            handler_id = %id,
            priority = config.priority,
            blocking = config.blocking,
            "registered handler"
        );

        RegistrationHandle {
            registry: self.clone(),
            action: action.to_string(),
            id,
            seq,
        }
    }

    /// Remove the registration with the given sequence number.
    pub(crate) fn unregister(&self, action: &str, seq: u64) -> bool {
        let removed = match self.actions.get_mut(action) {
            Some(mut entry) => match entry.iter().position(|r| r.seq == seq) {
                Some(position) => {
                    let registration = entry.remove(position);
                    debug!(action, handler_id = %registration.id, "unregistered handler");
                    true
                }
                None => false,
            },
            None => false,
        };
        removed
    }

    /// Snapshot the current registration list for an action.
    ///
    /// Returns an empty list when nothing is registered; dispatching such an
    /// action resolves successfully with empty results.
    pub fn snapshot(&self, action: &str) -> Vec<HandlerRegistration> {
        let snapshot = self
            .actions
            .get(action)
            .map(|entry| entry.clone())
            .unwrap_or_default();
        trace!(action, handlers = snapshot.len(), "snapshotted handlers");
        snapshot
    }

    /// Number of handlers currently registered for an action
    pub fn handler_count(&self, action: &str) -> usize {
        self.actions.get(action).map(|entry| entry.len()).unwrap_or(0)
    }

    /// List all action names with at least one registration
    pub fn actions(&self) -> Vec<String> {
        self.actions
            .iter()
            .filter(|entry| !entry.value().is_empty())
            .map(|entry| entry.key().clone())
            .collect()
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Removes exactly the registration it was returned for
pub struct RegistrationHandle {
    registry: HandlerRegistry,
    action: String,
    id: String,
    seq: u64,
}

impl RegistrationHandle {
    /// The registration's id (caller-supplied or generated)
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The action this registration belongs to
    pub fn action(&self) -> &str {
        &self.action
    }

    /// Remove the registration. Returns false if it was already removed.
    pub fn unregister(self) -> bool {
        self.registry.unregister(&self.action, self.seq)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::handler::handler_fn;
    use pretty_assertions::assert_eq;

    fn noop() -> Arc<dyn Handler> {
        handler_fn(|payload, _ctl| Box::pin(async move { Ok(payload) }))
    }

    #[test]
    fn registrations_sort_by_priority_descending() {
        let registry = HandlerRegistry::new();
        registry.register("save", noop(), HandlerConfig::new().id("low").priority(1));
        registry.register("save", noop(), HandlerConfig::new().id("high").priority(10));
        registry.register("save", noop(), HandlerConfig::new().id("mid").priority(5));

        let ids: Vec<_> = registry
            .snapshot("save")
            .iter()
            .map(|r| r.id.clone())
            .collect();
        assert_eq!(ids, vec!["high", "mid", "low"]);
    }

    #[test]
    fn equal_priorities_keep_insertion_order() {
        let registry = HandlerRegistry::new();
        registry.register("save", noop(), HandlerConfig::new().id("first").priority(3));
        registry.register("save", noop(), HandlerConfig::new().id("second").priority(3));
        registry.register("save", noop(), HandlerConfig::new().id("third").priority(3));

        let ids: Vec<_> = registry
            .snapshot("save")
            .iter()
            .map(|r| r.id.clone())
            .collect();
        assert_eq!(ids, vec!["first", "second", "third"]);
    }

    #[test]
    fn unregister_removes_exactly_one_registration() {
        let registry = HandlerRegistry::new();
        // Duplicate ids are allowed; the handle still targets one entry.
        registry.register("save", noop(), HandlerConfig::new().id("dup"));
        let handle = registry.register("save", noop(), HandlerConfig::new().id("dup"));
        assert_eq!(registry.handler_count("save"), 2);

        assert!(handle.unregister());
        assert_eq!(registry.handler_count("save"), 1);
    }

    #[test]
    fn snapshot_is_insulated_from_later_mutation() {
        let registry = HandlerRegistry::new();
        registry.register("save", noop(), HandlerConfig::new().id("kept"));
        let snapshot = registry.snapshot("save");

        registry.register("save", noop(), HandlerConfig::new().id("late"));
        assert_eq!(snapshot.len(), 1);
        assert_eq!(registry.handler_count("save"), 2);
    }

    #[test]
    fn actions_lists_registered_names() {
        let registry = HandlerRegistry::new();
        registry.register("save", noop(), HandlerConfig::new());
        registry.register("load", noop(), HandlerConfig::new());

        let mut actions = registry.actions();
        actions.sort();
        assert_eq!(actions, vec!["load", "save"]);
    }
}
