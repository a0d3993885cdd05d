//! Middleware contract, registry and pipeline composition.

mod access_log;
mod auth;
mod core;
mod pipeline;

pub use access_log::AccessLogMiddleware;
pub use auth::AuthMiddleware;
pub use core::{from_fn, Middleware, MiddlewareRef, MiddlewareRegistry, Next};
pub use pipeline::{
    compose, ComposedPipeline, MiddlewareEntry, MiddlewareSource, Pipeline, PipelineBuilder,
};
pub(crate) use pipeline::panic_message;
