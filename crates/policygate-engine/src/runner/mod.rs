//! Execution bridge: drive one evaluation cycle from a single JSON request.

pub mod executor;
pub mod handler;
pub mod schema;

pub use executor::{build_input, Executor};
pub use handler::{
    load_handler, AsyncFnHandler, FnHandler, Handler, HandlerRequest, ProcessHandler,
    SharedHandler,
};
pub use schema::{
    EndpointType, ExecutionContext, Message, PolicyResultSchema, RunnerInput, RunnerOutput,
};
