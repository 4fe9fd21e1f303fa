pub mod batch;
pub mod context;
pub mod dispatch;
pub mod envelope;
pub mod middleware;
pub mod pipeline;
pub mod router;
pub mod sse;

pub use context::Context;
pub use middleware::{DynHandler, Handler, Middleware, handler_fn};
pub use pipeline::Pipeline;
