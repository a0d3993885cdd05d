//! # Dispatcher
//!
//! Turns one inbound message into one outbound response.
//!
//! ## Request flow
//!
//! 1. The request path is normalised (`//` collapsed, trailing `/` dropped)
//!    and rejected with 400 if it is empty, relative, or carries `..`
//!    segments, backslashes or null bytes.
//! 2. The dispatch cache is checked under `"{VERB}{path}"`. A hit runs the
//!    stored pipeline directly.
//! 3. On a miss, a regular file under the public root is served through a
//!    pipeline wrapped in the global middleware (with `If-Modified-Since`
//!    support) and the pipeline is cached.
//! 4. Otherwise the route table is consulted: a match composes and caches
//!    the route's pipeline, a path match with the wrong verb gives 405 with
//!    `Allow`, and no match gives 404 (or a redirect to the configured error
//!    page).
//! 5. The response is written with [`crate::server::Connection::send`] when
//!    the connection stays open, or [`crate::server::Connection::close`]
//!    otherwise, and the request is destroyed.
//!
//! ## Error handling
//!
//! Handler and middleware failures are contained by the pipeline links.
//! Anything else, including a panic outside a pipeline, is caught at the
//! top of [`ConnectionDispatcher::handle`] and answered with a 500.

mod cache;
mod core;
mod path;

pub use cache::{CacheEntry, DispatchCache, DISPATCH_CACHE_CAPACITY};
pub use core::{keep_alive, ConnectionDispatcher, Transmission};
pub use path::{normalize_path, unsafe_reason, validate_path, PathCheck};
