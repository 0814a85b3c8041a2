pub mod controller;
pub mod dispatcher;
pub mod handler;
pub mod registry;
pub mod strategy;

mod context;

pub use controller::PipelineController;
pub use dispatcher::{BackgroundFailure, DispatchOutcome, Dispatcher, ExecutionMode};
pub use handler::{handler_fn, FnHandler, Handler, HandlerFuture};
pub use registry::{
    ConditionFn, HandlerConfig, HandlerRegistration, HandlerRegistry, RegistrationHandle,
    ValidationFn,
};
pub use strategy::BackgroundErrorHook;
