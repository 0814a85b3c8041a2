//! Operation queue - a priority-ordered serializer for async operations
//!
//! Callers enqueue arbitrary async operations and get a future for the
//! operation's own result. A single drain task runs exactly one operation's
//! extent at a time, in strict priority order with FIFO among equal
//! priorities, so concurrent callers never interleave state mutations. The
//! queue is independent of the pipeline engine; wrapping dispatch calls is
//! just one use.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

use crate::core::errors::ConveyorError;

type BoxedOperationFuture<T> = Pin<Box<dyn Future<Output = anyhow::Result<T>> + Send>>;
type OperationFn<T> = Box<dyn FnOnce() -> BoxedOperationFuture<T> + Send>;

/// An operation waiting its turn. Owned exclusively by the queue; consumed by
/// the drain task.
struct QueuedOperation<T> {
    id: String,
    priority: i64,
    timestamp: DateTime<Utc>,
    operation: OperationFn<T>,
    completion: oneshot::Sender<anyhow::Result<T>>,
}

struct QueueState<T> {
    /// Pending operations, sorted by (priority desc, enqueue order asc)
    operations: Vec<QueuedOperation<T>>,
    /// True for the whole lifetime of a drain loop, not per operation
    processing: bool,
    /// Bumped whenever a new drain loop starts or the queue is cleared, so a
    /// finishing drain task cannot collide with a newly started one
    epoch: u64,
}

/// Serializes async operations with priority ordering.
///
/// Generic over the operation output type; callers mixing result shapes in
/// one queue use [`serde_json::Value`], the default.
pub struct OperationQueue<T = Value> {
    name: String,
    state: Arc<Mutex<QueueState<T>>>,
}

impl<T> Clone for OperationQueue<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            state: Arc::clone(&self.state),
        }
    }
}

/// Introspection snapshot of a queue
#[derive(Debug, Clone, Serialize)]
pub struct QueueInfo {
    pub name: String,
    pub queue_length: usize,
    pub is_processing: bool,
    pub operations: Vec<OperationInfo>,
}

/// Introspection entry for one pending operation
#[derive(Debug, Clone, Serialize)]
pub struct OperationInfo {
    pub id: String,
    pub priority: i64,
    pub timestamp: DateTime<Utc>,
}

impl<T: Send + 'static> OperationQueue<T> {
    /// Create a named queue. The name only feeds log correlation and
    /// [`info`](Self::info).
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Arc::new(Mutex::new(QueueState {
                operations: Vec::new(),
                processing: false,
                epoch: 0,
            })),
        }
    }

    /// Enqueue an operation and get a future for its result.
    ///
    /// The operation is inserted at the earliest position whose existing
    /// priority is strictly less than the new one, so equal-priority entries
    /// keep FIFO order. The insertion happens before this call returns; the
    /// returned future only waits for the result.
    ///
    /// An operation failure rejects only this operation's future; it never
    /// halts the drain loop.
    pub fn enqueue<F, Fut>(&self, operation: F, priority: i64) -> impl Future<Output = anyhow::Result<T>>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let queued = QueuedOperation {
            id: cuid2::create_id(),
            priority,
            timestamp: Utc::now(),
            operation: Box::new(move || Box::pin(operation())),
            completion: tx,
        };

        let start_epoch = {
            let mut state = self.state.lock();
            let position = state
                .operations
                .iter()
                .position(|pending| pending.priority < priority)
                .unwrap_or(state.operations.len());
            trace!(
                queue = %self.name,
                id = %queued.id,
                priority,
                position,
                pending = state.operations.len(),
                "enqueued operation"
            );
            state.operations.insert(position, queued);
            if state.processing {
                // A running drain re-checks the list each iteration and will
                // pick this up; starting a second loop would break the
                // one-at-a-time guarantee.
                None
            } else {
                state.processing = true;
                state.epoch += 1;
                Some(state.epoch)
            }
        };
        if let Some(epoch) = start_epoch {
            self.spawn_drain(epoch);
        }

        let queue_name = self.name.clone();
        async move {
            match rx.await {
                Ok(result) => result,
                Err(_) => Err(ConveyorError::QueueClosed { queue: queue_name }.into()),
            }
        }
    }

    /// Drain the list one operation at a time until it is empty or this loop
    /// is superseded by a clear.
    fn spawn_drain(&self, epoch: u64) {
        let name = self.name.clone();
        let state = Arc::clone(&self.state);
        debug!(queue = %name, epoch, "starting drain loop");
        tokio::spawn(async move {
            loop {
                let next = {
                    let mut guard = state.lock();
                    if guard.epoch != epoch || !guard.processing {
                        trace!(queue = %name, epoch, "drain loop superseded");
                        return;
                    }
                    if guard.operations.is_empty() {
                        guard.processing = false;
                        debug!(queue = %name, epoch, "drain loop finished");
                        return;
                    }
                    guard.operations.remove(0)
                };

                trace!(
                    queue = %name,
                    id = %next.id,
                    priority = next.priority,
                    "running operation"
                );
                let result = (next.operation)().await;
                if let Err(e) = &result {
                    warn!(queue = %name, id = %next.id, error = %e, "operation failed");
                }
                // Receiver may have been dropped; the operation still ran.
                let _ = next.completion.send(result);
            }
        });
    }

    /// Reject every pending (not-yet-started) operation with
    /// [`ConveyorError::QueueCleared`] and reset the queue.
    ///
    /// An operation already in flight runs to completion and resolves its own
    /// future normally.
    pub fn clear(&self) {
        let drained = {
            let mut state = self.state.lock();
            state.processing = false;
            state.epoch += 1;
            std::mem::take(&mut state.operations)
        };
        if !drained.is_empty() {
            debug!(queue = %self.name, rejected = drained.len(), "queue cleared");
        }
        for pending in drained {
            let _ = pending.completion.send(Err(ConveyorError::QueueCleared.into()));
        }
    }

    /// Snapshot of the queue for introspection
    pub fn info(&self) -> QueueInfo {
        let state = self.state.lock();
        QueueInfo {
            name: self.name.clone(),
            queue_length: state.operations.len(),
            is_processing: state.processing,
            operations: state
                .operations
                .iter()
                .map(|pending| OperationInfo {
                    id: pending.id.clone(),
                    priority: pending.priority,
                    timestamp: pending.timestamp,
                })
                .collect(),
        }
    }

    /// Number of pending (not-yet-started) operations
    pub fn len(&self) -> usize {
        self.state.lock().operations.len()
    }

    /// True when no operations are pending
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True for the whole lifetime of a drain loop
    pub fn is_processing(&self) -> bool {
        self.state.lock().processing
    }

    /// The queue's name
    pub fn name(&self) -> &str {
        &self.name
    }
}
