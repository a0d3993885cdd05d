use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::PipelineError;
use crate::request::Request;
use crate::response::Response;

/// One link in a request pipeline.
///
/// A middleware receives the request and the continuation for the rest of
/// the chain. Calling [`Next::run`] hands control downstream and returns the
/// response it produced, which the middleware may inspect or alter before
/// returning it. Returning without calling `next` short-circuits the chain.
///
/// An `Err` (or a panic) is caught by the link that raised it and turned
/// into a 500 response, so upstream middleware always gets a response back.
pub trait Middleware: Send + Sync {
    fn process(&self, req: &Request, next: Next<'_>) -> anyhow::Result<Response>;

    /// Label used in logs.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// The rest of the chain, ending at the route handler.
pub struct Next<'a> {
    rest: &'a dyn Fn(&Request) -> Response,
}

impl<'a> Next<'a> {
    pub(crate) fn new(rest: &'a dyn Fn(&Request) -> Response) -> Self {
        Self { rest }
    }

    /// Run the remaining links and the handler.
    pub fn run(self, req: &Request) -> Response {
        (self.rest)(req)
    }
}

struct FnMiddleware<F> {
    f: F,
}

impl<F> Middleware for FnMiddleware<F>
where
    F: Fn(&Request, Next<'_>) -> anyhow::Result<Response> + Send + Sync,
{
    fn process(&self, req: &Request, next: Next<'_>) -> anyhow::Result<Response> {
        (self.f)(req, next)
    }

    fn name(&self) -> &str {
        "fn"
    }
}

/// Wrap a closure as middleware.
///
/// ```rust
/// use lark::middleware::from_fn;
///
/// let stamp = from_fn(|req, next| {
///     let response = next.run(req);
///     Ok(response.with_header("X-Stamp", "1"))
/// });
/// ```
pub fn from_fn<F>(f: F) -> Arc<dyn Middleware>
where
    F: Fn(&Request, Next<'_>) -> anyhow::Result<Response> + Send + Sync + 'static,
{
    Arc::new(FnMiddleware { f })
}

/// A middleware as declared on a route, controller or action: either a
/// name looked up in the [`MiddlewareRegistry`] or an instance.
#[derive(Clone)]
pub enum MiddlewareRef {
    Named(String),
    Inline(Arc<dyn Middleware>),
}

impl MiddlewareRef {
    pub fn label(&self) -> String {
        match self {
            MiddlewareRef::Named(name) => name.clone(),
            MiddlewareRef::Inline(mw) => mw.name().to_string(),
        }
    }
}

impl fmt::Debug for MiddlewareRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MiddlewareRef::Named(name) => write!(f, "Named({name})"),
            MiddlewareRef::Inline(mw) => write!(f, "Inline({})", mw.name()),
        }
    }
}

impl From<&str> for MiddlewareRef {
    fn from(name: &str) -> Self {
        MiddlewareRef::Named(name.to_string())
    }
}

impl From<String> for MiddlewareRef {
    fn from(name: String) -> Self {
        MiddlewareRef::Named(name)
    }
}

impl From<Arc<dyn Middleware>> for MiddlewareRef {
    fn from(mw: Arc<dyn Middleware>) -> Self {
        MiddlewareRef::Inline(mw)
    }
}

/// Named middleware instances.
#[derive(Clone, Default)]
pub struct MiddlewareRegistry {
    named: HashMap<String, Arc<dyn Middleware>>,
}

impl MiddlewareRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `mw` under `name`, replacing any previous registration.
    pub fn register(&mut self, name: impl Into<String>, mw: Arc<dyn Middleware>) {
        self.named.insert(name.into(), mw);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.named.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.named.len()
    }

    pub fn is_empty(&self) -> bool {
        self.named.is_empty()
    }

    /// # Errors
    ///
    /// [`PipelineError::UnknownMiddleware`] for a name nobody registered.
    pub fn resolve(&self, mw: &MiddlewareRef) -> Result<Arc<dyn Middleware>, PipelineError> {
        match mw {
            MiddlewareRef::Inline(mw) => Ok(Arc::clone(mw)),
            MiddlewareRef::Named(name) => self
                .named
                .get(name)
                .map(Arc::clone)
                .ok_or_else(|| PipelineError::UnknownMiddleware(name.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_named_and_inline() {
        let mut registry = MiddlewareRegistry::new();
        registry.register("pass", from_fn(|req, next| Ok(next.run(req))));

        assert!(registry.resolve(&"pass".into()).is_ok());
        assert!(matches!(
            registry.resolve(&"missing".into()),
            Err(PipelineError::UnknownMiddleware(name)) if name == "missing"
        ));
        let inline = MiddlewareRef::from(from_fn(|req, next| Ok(next.run(req))));
        assert!(registry.resolve(&inline).is_ok());
        assert_eq!(inline.label(), "fn");
    }

    #[test]
    fn test_next_runs_rest_of_chain() {
        let rest = |_: &Request| Response::text(200, "rest");
        let mw = from_fn(|req, next| Ok(next.run(req).with_header("X-Seen", "yes")));
        let req = Request::new("GET / HTTP/1.1\r\n\r\n");
        let response = mw.process(&req, Next::new(&rest)).unwrap();
        assert_eq!(response.body_text(), Some("rest"));
        assert_eq!(response.header("x-seen"), Some("yes"));
    }
}
