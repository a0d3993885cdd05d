//! Per-message dispatch: path checks, dispatch cache, static files, route
//! matching, pipeline execution and keep-alive.
//!
//! One dispatcher serves one worker thread. Every message runs to
//! completion before the next is handled, so the route table, registries and
//! cache are plain owned values with no locking.

use std::borrow::Cow;
use std::cell::RefCell;
use std::io;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::rc::Rc;

use http::Method;
use tracing::{error, info, warn};

use crate::config::DispatchSettings;
use crate::error::DispatchError;
use crate::middleware::{panic_message, MiddlewareRef, MiddlewareRegistry, PipelineBuilder};
use crate::request::{DispatchInfo, ParseContext, ParseMemo, Request};
use crate::response::Response;
use crate::router::{ControllerRegistry, RouteLookup, RouteTable, SHELL};
use crate::server::Connection;
use crate::static_files::StaticFiles;

use super::cache::{CacheEntry, DispatchCache};
use super::path::{unsafe_reason, validate_path, PathCheck};

/// A response together with the connection decision made for it.
#[derive(Debug)]
pub struct Transmission {
    pub response: Response,
    pub keep_alive: bool,
}

/// Whether the connection stays open after `response`.
///
/// Checked in order: no `Connection` header on an HTTP/1.1 request, an
/// explicit `Connection: keep-alive`, or a chunked response.
pub fn keep_alive(req: &Request, response: &Response) -> bool {
    let header = req.header("connection");
    (header.is_none() && req.protocol_version() == "1.1")
        || header.is_some_and(|v| v.eq_ignore_ascii_case("keep-alive"))
        || response.is_chunked()
}

/// Dispatches inbound messages for one worker.
///
/// Built by [`crate::App::build`].
pub struct ConnectionDispatcher {
    routes: RouteTable,
    controllers: ControllerRegistry,
    middleware: MiddlewareRegistry,
    globals: Vec<MiddlewareRef>,
    cache: DispatchCache,
    context: ParseContext,
    static_files: Option<StaticFiles>,
    settings: DispatchSettings,
}

impl ConnectionDispatcher {
    pub(crate) fn new(
        routes: RouteTable,
        controllers: ControllerRegistry,
        middleware: MiddlewareRegistry,
        globals: Vec<MiddlewareRef>,
        context: ParseContext,
        settings: DispatchSettings,
    ) -> Self {
        let static_files = settings.public_root.clone().map(StaticFiles::new);
        Self {
            routes,
            controllers,
            middleware,
            globals,
            cache: DispatchCache::new(),
            context,
            static_files,
            settings,
        }
    }

    /// Wrap `buffer` in a request sharing this worker's parse memo.
    pub fn request(&self, buffer: impl Into<Vec<u8>>) -> Request {
        Request::with_context(buffer, self.context.clone())
    }

    /// Handle one complete message read from `conn`.
    ///
    /// Exactly one of [`Connection::send`] or [`Connection::close`] is called.
    /// The request (and its upload temp files) is destroyed once the bytes
    /// have been handed over.
    ///
    /// # Errors
    ///
    /// Only transport errors from `conn`.
    pub fn on_message(
        &mut self,
        conn: &mut dyn Connection,
        buffer: impl Into<Vec<u8>>,
    ) -> io::Result<()> {
        let mut req = self.request(buffer);
        let response = self.handle(&req);
        let keep_alive = keep_alive(&req, &response);
        log_access(&req, &response, keep_alive);

        let bytes = match response.encode() {
            Ok(bytes) => bytes,
            Err(err) => {
                error!(
                    request_id = %req.request_id(),
                    path = %req.path(),
                    error = %err,
                    "Response encoding failed"
                );
                Response::from_error(err.into(), self.settings.debug).encode()?
            }
        };
        let sent = if keep_alive {
            conn.send(bytes)
        } else {
            conn.close(bytes)
        };
        req.destroy();
        sent
    }

    /// Dispatch `buffer` without a transport and return the response and
    /// connection decision.
    pub fn dispatch(&mut self, buffer: impl Into<Vec<u8>>) -> Transmission {
        let req = self.request(buffer);
        let response = self.handle(&req);
        let keep_alive = keep_alive(&req, &response);
        log_access(&req, &response, keep_alive);
        Transmission {
            response,
            keep_alive,
        }
    }

    /// Produce the response for `req`. Never fails: every error and panic
    /// ends up as a response.
    pub fn handle(&mut self, req: &Request) -> Response {
        let outcome = catch_unwind(AssertUnwindSafe(|| self.route_request(req)));
        match outcome {
            Ok(Ok(response)) => response,
            Ok(Err(err)) => self.error_response(req, err),
            Err(panic) => {
                let err = DispatchError::Panic(panic_message(panic.as_ref()));
                self.error_response(req, err)
            }
        }
    }

    fn route_request(&mut self, req: &Request) -> Result<Response, DispatchError> {
        let path = match validate_path(req.path()) {
            PathCheck::Safe(path) => path,
            PathCheck::Rejected(reason) => {
                return Err(DispatchError::MalformedRequest(reason.to_string()))
            }
        };
        let method = req.method();
        if method == SHELL.as_str() {
            // SHELL routes run only through `RouteTable::dispatch`.
            let allowed = self.routes.allowed(&path);
            return Err(unroutable(method, path, allowed));
        }

        if let Some(entry) = self.cache.lookup(method, &path) {
            return Ok(run(req, entry));
        }

        if let Some(file) = self.static_file(&path)? {
            let pipeline = self.builder().build_static(file)?;
            let entry = CacheEntry {
                pipeline,
                controller: String::new(),
                action: String::new(),
                route: None,
            };
            let response = run(req, &entry);
            self.cache.insert(method, &path, entry);
            return Ok(response);
        }

        let verb = Method::from_bytes(method.as_bytes())
            .map_err(|_| DispatchError::MalformedRequest(format!("invalid method {method:?}")))?;

        match self.routes.dispatch(&verb, &path) {
            RouteLookup::Matched(matched) => {
                let composed = self.builder().build(matched.route())?;
                let entry = CacheEntry {
                    pipeline: composed.pipeline,
                    controller: composed.controller,
                    action: composed.action,
                    route: Some(matched),
                };
                let response = run(req, &entry);
                self.cache.insert(method, &path, entry);
                Ok(response)
            }
            RouteLookup::MethodNotAllowed { allowed } => Err(unroutable(method, path, allowed)),
            RouteLookup::NotFound => Err(DispatchError::RouteNotFound {
                method: method.to_string(),
                path,
            }),
        }
    }

    fn builder(&self) -> PipelineBuilder<'_> {
        PipelineBuilder::new(
            &self.middleware,
            &self.controllers,
            &self.globals,
            self.settings.debug,
        )
    }

    /// The regular file under the public root that `path` names.
    ///
    /// A percent-encoded path is decoded first and must pass the traversal
    /// checks again.
    fn static_file(&self, path: &str) -> Result<Option<PathBuf>, DispatchError> {
        let Some(files) = &self.static_files else {
            return Ok(None);
        };
        let decoded: Cow<'_, str> = if path.contains('%') {
            let bytes = urlencoding::decode_binary(path.as_bytes());
            let decoded = String::from_utf8_lossy(&bytes).into_owned();
            if let Some(reason) = unsafe_reason(&decoded) {
                return Err(DispatchError::MalformedRequest(reason.to_string()));
            }
            Cow::Owned(decoded)
        } else {
            Cow::Borrowed(path)
        };
        Ok(files.resolve(&decoded))
    }

    fn error_response(&self, req: &Request, err: DispatchError) -> Response {
        let status = err.status();
        match err {
            DispatchError::MalformedRequest(reason) => {
                warn!(
                    request_id = %req.request_id(),
                    path = %req.path().escape_debug(),
                    reason = %reason,
                    "Rejected request"
                );
                Response::text(status, "400 Bad Request")
            }
            DispatchError::RouteNotFound { .. } => match &self.settings.not_found_page {
                Some(page) => Response::redirect(page),
                None => Response::not_found(),
            },
            DispatchError::MethodNotAllowed { mut allowed, .. } => {
                allowed.sort_by(|a, b| a.as_str().cmp(b.as_str()));
                let allow = allowed
                    .iter()
                    .map(Method::as_str)
                    .collect::<Vec<_>>()
                    .join(", ");
                Response::text(status, "405 Method Not Allowed").with_header("Allow", allow)
            }
            err @ (DispatchError::Pipeline(_) | DispatchError::Panic(_)) => {
                error!(
                    request_id = %req.request_id(),
                    method = %req.method(),
                    path = %req.path(),
                    error = %err,
                    "Dispatch failed"
                );
                Response::from_error(anyhow::Error::new(err), self.settings.debug)
            }
        }
    }

    pub fn cache(&self) -> &DispatchCache {
        &self.cache
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    pub fn settings(&self) -> &DispatchSettings {
        &self.settings
    }

    /// The parse memo shared by this worker's requests.
    pub fn memo(&self) -> Option<&Rc<RefCell<ParseMemo>>> {
        self.context.memo.as_ref()
    }
}

/// 405 for the HTTP verbs in `allowed`, or 404 when only SHELL remains.
fn unroutable(method: &str, path: String, mut allowed: Vec<Method>) -> DispatchError {
    allowed.retain(|m| *m != *SHELL);
    if allowed.is_empty() {
        DispatchError::RouteNotFound {
            method: method.to_string(),
            path,
        }
    } else {
        DispatchError::MethodNotAllowed {
            method: method.to_string(),
            path,
            allowed,
        }
    }
}

fn run(req: &Request, entry: &CacheEntry) -> Response {
    req.bind_dispatch(DispatchInfo {
        controller: entry.controller.clone(),
        action: entry.action.clone(),
        route: entry.route.clone(),
    });
    (entry.pipeline)(req)
}

fn log_access(req: &Request, response: &Response, keep_alive: bool) {
    info!(
        request_id = %req.request_id(),
        method = %req.method(),
        path = %req.path(),
        status = response.status(),
        elapsed_ms = req.elapsed_ms(),
        keep_alive,
        "Request completed"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response() -> Response {
        Response::text(200, "ok")
    }

    #[test]
    fn test_keep_alive_rules() {
        let cases = [
            ("GET / HTTP/1.1\r\n\r\n", true),
            ("GET / HTTP/1.0\r\n\r\n", false),
            ("GET / HTTP/1.1\r\nConnection: close\r\n\r\n", false),
            ("GET / HTTP/1.0\r\nConnection: Keep-Alive\r\n\r\n", true),
        ];
        for (raw, expected) in cases {
            let req = Request::new(raw);
            assert_eq!(keep_alive(&req, &response()), expected, "{raw:?}");
        }
    }

    #[test]
    fn test_chunked_response_keeps_connection() {
        let req = Request::new("GET / HTTP/1.0\r\nConnection: close\r\n\r\n");
        let chunked = response().with_header("Transfer-Encoding", "chunked");
        assert!(keep_alive(&req, &chunked));
    }
}
