// Core infrastructure modules
pub mod core {
    pub mod errors;
}

// The two primitives
pub mod pipeline; // action-dispatch pipeline engine
pub mod queue; // priority-ordered operation serializer

// Re-exports for convenience
pub use crate::core::errors::{ConveyorError, Result};
pub use pipeline::{
    handler_fn, BackgroundErrorHook, BackgroundFailure, DispatchOutcome, Dispatcher,
    ExecutionMode, FnHandler, Handler, HandlerConfig, HandlerFuture, HandlerRegistration,
    HandlerRegistry, PipelineController, RegistrationHandle,
};
pub use queue::{OperationInfo, OperationQueue, QueueInfo};
