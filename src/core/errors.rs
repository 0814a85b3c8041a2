use thiserror::Error;

/// Unified error type for the conveyor engine.
#[derive(Debug, Error)]
pub enum ConveyorError {
    /// A blocking handler failed and took the whole dispatch down with it.
    #[error("Handler '{handler_id}' failed while dispatching '{action}'")]
    HandlerFailed {
        action: String,
        handler_id: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// A pending operation was rejected because the queue was cleared.
    #[error("Queue cleared")]
    QueueCleared,

    /// The drain task went away before the operation's result was delivered.
    #[error("Queue '{queue}' closed before the operation completed")]
    QueueClosed { queue: String },

    /// Generic internal errors
    #[error("Internal error: {message}")]
    Internal {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl ConveyorError {
    /// Create a handler failure wrapping the original error
    pub fn handler_failed<S: Into<String>, E: std::error::Error + Send + Sync + 'static>(
        action: S,
        handler_id: S,
        source: E,
    ) -> Self {
        Self::HandlerFailed {
            action: action.into(),
            handler_id: handler_id.into(),
            source: Box::new(source),
        }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
            source: None,
        }
    }

    /// Create an internal error with source
    pub fn internal_with_source<S: Into<String>, E: std::error::Error + Send + Sync + 'static>(
        message: S,
        source: E,
    ) -> Self {
        Self::Internal {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// True for the sentinel raised by [`clear`](crate::queue::OperationQueue::clear),
    /// as opposed to an operation-level failure.
    pub fn is_queue_cleared(&self) -> bool {
        matches!(self, Self::QueueCleared)
    }
}

/// Result type alias using ConveyorError
pub type Result<T> = std::result::Result<T, ConveyorError>;
