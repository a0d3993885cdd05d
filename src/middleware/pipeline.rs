//! Pipeline assembly.
//!
//! For a matched route the middleware chain is collected from four sources
//! (global, controller, route, action), named references are resolved, and
//! the chain is folded right-to-left around the route handler. Every link,
//! and the handler itself, runs under `catch_unwind`: an `Err` or a panic
//! becomes a 500 response at the link where it happened.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;

use tracing::error;

use crate::error::PipelineError;
use crate::request::Request;
use crate::response::{Reply, Response};
use crate::router::{ControllerRegistry, HandlerFn, Route, Target};

use super::core::{Middleware, MiddlewareRef, MiddlewareRegistry, Next};

/// A composed, reusable request pipeline.
pub type Pipeline = Arc<dyn Fn(&Request) -> Response + Send + Sync>;

/// Where a chain entry was declared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MiddlewareSource {
    Global,
    Controller,
    Route,
    Method,
}

/// A resolved middleware with its provenance.
#[derive(Clone)]
pub struct MiddlewareEntry {
    pub source: MiddlewareSource,
    pub label: String,
    pub middleware: Arc<dyn Middleware>,
}

impl std::fmt::Debug for MiddlewareEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MiddlewareEntry")
            .field("source", &self.source)
            .field("label", &self.label)
            .finish()
    }
}

/// Result of [`PipelineBuilder::build`].
#[derive(Clone)]
pub struct ComposedPipeline {
    pub pipeline: Pipeline,
    /// Empty for closure targets
    pub controller: String,
    pub action: String,
}

/// Builds pipelines against fixed registries.
pub struct PipelineBuilder<'a> {
    middleware: &'a MiddlewareRegistry,
    controllers: &'a ControllerRegistry,
    globals: &'a [MiddlewareRef],
    debug: bool,
}

impl<'a> PipelineBuilder<'a> {
    pub fn new(
        middleware: &'a MiddlewareRegistry,
        controllers: &'a ControllerRegistry,
        globals: &'a [MiddlewareRef],
        debug: bool,
    ) -> Self {
        Self {
            middleware,
            controllers,
            globals,
            debug,
        }
    }

    fn resolve_into(
        &self,
        source: MiddlewareSource,
        refs: &[MiddlewareRef],
        chain: &mut Vec<MiddlewareEntry>,
    ) -> Result<(), PipelineError> {
        for mw in refs {
            chain.push(MiddlewareEntry {
                source,
                label: mw.label(),
                middleware: self.middleware.resolve(mw)?,
            });
        }
        Ok(())
    }

    /// Middleware for `route`, outermost first: global, controller, route,
    /// then action.
    ///
    /// # Errors
    ///
    /// An unregistered middleware name, or a controller target that does not
    /// resolve.
    pub fn build_chain(&self, route: &Route) -> Result<Vec<MiddlewareEntry>, PipelineError> {
        let mut chain = Vec::new();
        self.resolve_into(MiddlewareSource::Global, self.globals, &mut chain)?;

        match route.target() {
            Target::Handler(_) => {
                self.resolve_into(MiddlewareSource::Route, route.middleware(), &mut chain)?;
            }
            Target::Controller { controller, action } => {
                let (c, a) = self.resolve_action(controller, action)?;
                self.resolve_into(MiddlewareSource::Controller, c.middlewares(), &mut chain)?;
                self.resolve_into(MiddlewareSource::Route, route.middleware(), &mut chain)?;
                self.resolve_into(MiddlewareSource::Method, a.middleware(), &mut chain)?;
            }
        }
        Ok(chain)
    }

    fn resolve_action(
        &self,
        controller: &str,
        action: &str,
    ) -> Result<(&'a crate::router::Controller, &'a crate::router::Action), PipelineError> {
        let c = self
            .controllers
            .get(controller)
            .ok_or_else(|| PipelineError::UnknownController(controller.to_string()))?;
        let a = c
            .get_action(action)
            .ok_or_else(|| PipelineError::UnknownAction {
                controller: controller.to_string(),
                action: action.to_string(),
            })?;
        Ok((c, a))
    }

    /// Compose the full pipeline for `route`.
    ///
    /// # Errors
    ///
    /// See [`PipelineBuilder::build_chain`].
    pub fn build(&self, route: &Route) -> Result<ComposedPipeline, PipelineError> {
        let chain = self.build_chain(route)?;
        let (terminal, controller, action) = match route.target() {
            Target::Handler(h) => (Arc::clone(h), String::new(), String::new()),
            Target::Controller { controller, action } => {
                let (_, a) = self.resolve_action(controller, action)?;
                (Arc::clone(a.handler()), controller.clone(), action.clone())
            }
        };
        Ok(ComposedPipeline {
            pipeline: compose(chain, terminal, self.debug),
            controller,
            action,
        })
    }

    /// Pipeline serving `file`, wrapped by the global middleware only.
    ///
    /// Honors `If-Modified-Since`; answers 404 if the file is gone by the
    /// time the pipeline runs.
    ///
    /// # Errors
    ///
    /// An unregistered global middleware name.
    pub fn build_static(&self, file: PathBuf) -> Result<Pipeline, PipelineError> {
        let mut chain = Vec::new();
        self.resolve_into(MiddlewareSource::Global, self.globals, &mut chain)?;
        let serve: HandlerFn = Arc::new(move |req: &Request| -> anyhow::Result<Reply> {
            if !file.is_file() {
                return Ok(Response::not_found().into());
            }
            Ok(Response::file(file.clone(), req.header("if-modified-since")).into())
        });
        Ok(compose(chain, serve, self.debug))
    }
}

/// Fold `chain` right-to-left around `terminal`.
///
/// The first entry is the outermost link. Each link sees the continuation
/// for everything after it.
pub fn compose(chain: Vec<MiddlewareEntry>, terminal: HandlerFn, debug: bool) -> Pipeline {
    let mut next: Pipeline = Arc::new(move |req: &Request| {
        match catch_unwind(AssertUnwindSafe(|| terminal(req))) {
            Ok(Ok(reply)) => reply.into_response(),
            Ok(Err(err)) => {
                error!(
                    request_id = %req.request_id(),
                    method = %req.method(),
                    path = %req.path(),
                    error = %err,
                    "Handler failed"
                );
                Response::from_error(err, debug)
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(
                    request_id = %req.request_id(),
                    method = %req.method(),
                    path = %req.path(),
                    panic = %message,
                    "Handler panicked - CRITICAL"
                );
                Response::from_error(anyhow::anyhow!("handler panicked: {message}"), debug)
            }
        }
    });

    for entry in chain.into_iter().rev() {
        let inner = next;
        next = Arc::new(move |req: &Request| {
            let outcome = catch_unwind(AssertUnwindSafe(|| {
                entry.middleware.process(req, Next::new(&*inner))
            }));
            match outcome {
                Ok(Ok(response)) => response,
                Ok(Err(err)) => {
                    error!(
                        request_id = %req.request_id(),
                        middleware = %entry.label,
                        error = %err,
                        "Middleware failed"
                    );
                    Response::from_error(err, debug)
                }
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    error!(
                        request_id = %req.request_id(),
                        middleware = %entry.label,
                        panic = %message,
                        "Middleware panicked - CRITICAL"
                    );
                    Response::from_error(
                        anyhow::anyhow!("middleware '{}' panicked: {message}", entry.label),
                        debug,
                    )
                }
            }
        });
    }
    next
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::from_fn;
    use std::sync::Mutex;

    fn recorder(log: &Arc<Mutex<Vec<String>>>, tag: &'static str) -> Arc<dyn Middleware> {
        let log = Arc::clone(log);
        from_fn(move |req, next| {
            log.lock().unwrap().push(format!("{tag}>"));
            let response = next.run(req);
            log.lock().unwrap().push(format!("<{tag}"));
            Ok(response)
        })
    }

    fn entry(mw: Arc<dyn Middleware>) -> MiddlewareEntry {
        MiddlewareEntry {
            source: MiddlewareSource::Route,
            label: mw.name().to_string(),
            middleware: mw,
        }
    }

    fn terminal<F>(f: F) -> HandlerFn
    where
        F: Fn(&Request) -> anyhow::Result<Reply> + Send + Sync + 'static,
    {
        Arc::new(f)
    }

    fn req() -> Request {
        Request::new("GET /x HTTP/1.1\r\n\r\n")
    }

    #[test]
    fn test_outermost_runs_first_and_unwinds_last() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let handler_log = Arc::clone(&log);
        let terminal = terminal(move |_| {
            handler_log.lock().unwrap().push("handler".into());
            Ok("done".into())
        });
        let pipeline = compose(
            vec![entry(recorder(&log, "a")), entry(recorder(&log, "b"))],
            terminal,
            false,
        );
        let response = pipeline(&req());
        assert_eq!(response.body_text(), Some("done"));
        assert_eq!(*log.lock().unwrap(), vec!["a>", "b>", "handler", "<b", "<a"]);
    }

    #[test]
    fn test_handler_panic_becomes_500_and_upstream_completes() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let terminal = terminal(|_| panic!("boom"));
        let pipeline = compose(vec![entry(recorder(&log, "outer"))], terminal, true);
        let response = pipeline(&req());
        assert_eq!(response.status(), 500);
        assert!(response.body_text().unwrap().contains("boom"));
        assert_eq!(*log.lock().unwrap(), vec!["outer>", "<outer"]);
    }

    #[test]
    fn test_middleware_error_is_contained_at_its_link() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let failing = from_fn(|_, _| Err(anyhow::anyhow!("denied by policy")));
        let terminal = terminal(|_| Ok("unreachable".into()));
        let pipeline = compose(
            vec![entry(recorder(&log, "outer")), entry(failing)],
            terminal,
            false,
        );
        let response = pipeline(&req());
        assert_eq!(response.status(), 500);
        assert_eq!(response.body_text(), Some("denied by policy"));
        assert!(response.exception().is_some());
        assert_eq!(*log.lock().unwrap(), vec!["outer>", "<outer"]);
    }

    #[test]
    fn test_panic_message_payloads() {
        let s: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(s.as_ref()), "static");
        let owned: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(owned.as_ref()), "owned");
        let other: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(other.as_ref()), "unknown panic payload");
    }
}
