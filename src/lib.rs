//! # Lark
//!
//! **Lark** is the request-dispatch core of a persistent-connection HTTP
//! worker. A transport hands it complete messages; it parses them lazily,
//! matches routes, runs middleware pipelines and writes responses back,
//! deciding per message whether the connection stays open.
//!
//! ## Architecture
//!
//! - **[`request`]** - lazy request model: headers, cookies, query, JSON /
//!   form / multipart bodies and upload temp files, with a per-worker parse
//!   memo
//! - **[`router`]** - route registration, groups, controllers and a compiled
//!   segment tree for matching
//! - **[`middleware`]** - the `Middleware` contract, named registry and
//!   pipeline composition with per-link failure containment
//! - **[`dispatcher`]** - path validation, dispatch cache, static files,
//!   keep-alive and top-level error conversion
//! - **[`response`]** - response building and HTTP/1.1 encoding
//! - **[`config`]** - YAML configuration with dotted keys and env overrides
//! - **[`logging`]** - `tracing` subscriber setup
//!
//! ## Quick Start
//!
//! ```rust
//! use lark::middleware::AccessLogMiddleware;
//! use lark::router::{handler, Controller};
//! use lark::server::MemoryConnection;
//! use lark::App;
//! use std::sync::Arc;
//!
//! let mut app = App::new();
//! app.settings_mut().public_root = None;
//! app.global(Arc::new(AccessLogMiddleware) as Arc<dyn lark::middleware::Middleware>);
//! app.controller(
//!     Controller::new("UserController")
//!         .action("show", |req| Ok(serde_json::json!({ "id": req.route_param("id") }).into())),
//! );
//! app.routes().get("/users/{id}", lark::router::action("UserController", "show"));
//! app.routes().get("/ping", handler(|_| Ok("pong".into())));
//!
//! let mut dispatcher = app.build();
//! let mut conn = MemoryConnection::new();
//! dispatcher
//!     .on_message(&mut conn, "GET /users/42 HTTP/1.1\r\n\r\n")
//!     .unwrap();
//! assert!(conn.transcript().ends_with(r#"{"id":"42"}"#));
//! assert!(dispatcher.cache().contains_key("GET/users/42"));
//! ```
//!
//! ## Concurrency
//!
//! One dispatcher per worker thread. Requests are handled to completion one
//! at a time, so nothing here locks; scale out with more workers.

pub mod app;
pub mod cache;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod ids;
pub mod logging;
pub mod middleware;
pub mod request;
pub mod response;
pub mod router;
pub mod server;
pub mod static_files;
pub mod view;

pub use app::App;
pub use config::{Config, DispatchSettings};
pub use dispatcher::{ConnectionDispatcher, Transmission};
pub use error::{DispatchError, PipelineError, RouteError};
pub use ids::RequestId;
pub use middleware::{Middleware, Next};
pub use request::Request;
pub use response::{Body, Reply, Response};
pub use view::ViewRenderer;
