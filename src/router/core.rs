//! Route registration and the compiled route table.
//!
//! Routes are declared on a [`RouteCollector`] (directly or inside nested
//! groups), then compiled once with [`RouteCollector::build`] into an
//! immutable [`RouteTable`]. Controller targets are checked against the
//! [`ControllerRegistry`] at build time; a route whose action does not exist
//! is logged and left out of the matcher, but stays listed.

use http::Method;
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::middleware::MiddlewareRef;

use super::controller::ControllerRegistry;
use super::radix::{path_segments, RadixNode};
use super::route::{parse_pattern, ParamVec, Route, RouteMatch, Target};

/// The non-standard `SHELL` verb.
pub static SHELL: Lazy<Method> = Lazy::new(|| {
    #[allow(clippy::expect_used)]
    Method::from_bytes(b"SHELL").expect("SHELL is a valid method token")
});

/// Verbs registered by [`RouteCollector::any`].
pub fn any_verbs() -> Vec<Method> {
    vec![
        Method::GET,
        Method::POST,
        Method::PUT,
        Method::DELETE,
        Method::PATCH,
        Method::HEAD,
        Method::OPTIONS,
        SHELL.clone(),
    ]
}

/// A route group and where it sits in the group tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteGroup {
    pub id: usize,
    /// Full prefix, parents included
    pub prefix: String,
    pub parent: Option<usize>,
}

/// Fluent handle on a just-registered route.
pub struct RouteHandle<'a> {
    route: &'a mut Route,
}

impl RouteHandle<'_> {
    /// Name the route for reverse lookup. A later route with the same name
    /// takes the name over.
    pub fn name(self, name: &str) -> Self {
        self.route.name = Some(name.to_string());
        self
    }

    /// Append route-level middleware.
    pub fn middleware(self, mw: impl Into<MiddlewareRef>) -> Self {
        self.route.middleware.push(mw.into());
        self
    }

    pub fn pattern(&self) -> &str {
        &self.route.pattern
    }
}

/// Mutable route collection used while an app is being assembled.
#[derive(Default)]
pub struct RouteCollector {
    routes: Vec<Route>,
    groups: Vec<RouteGroup>,
    prefix: String,
    current_group: Option<usize>,
}

impl RouteCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `target` for `verbs` on `pattern` (relative to the current group).
    pub fn add(&mut self, verbs: &[Method], pattern: &str, target: impl Into<Target>) -> RouteHandle<'_> {
        let mut route = Route::new(
            verbs.to_vec(),
            format!("{}{}", self.prefix, pattern),
            target.into(),
        );
        route.group = self.current_group;
        self.routes.push(route);
        let index = self.routes.len() - 1;
        RouteHandle {
            route: &mut self.routes[index],
        }
    }

    pub fn get(&mut self, pattern: &str, target: impl Into<Target>) -> RouteHandle<'_> {
        self.add(&[Method::GET], pattern, target)
    }

    pub fn post(&mut self, pattern: &str, target: impl Into<Target>) -> RouteHandle<'_> {
        self.add(&[Method::POST], pattern, target)
    }

    pub fn put(&mut self, pattern: &str, target: impl Into<Target>) -> RouteHandle<'_> {
        self.add(&[Method::PUT], pattern, target)
    }

    pub fn patch(&mut self, pattern: &str, target: impl Into<Target>) -> RouteHandle<'_> {
        self.add(&[Method::PATCH], pattern, target)
    }

    pub fn delete(&mut self, pattern: &str, target: impl Into<Target>) -> RouteHandle<'_> {
        self.add(&[Method::DELETE], pattern, target)
    }

    pub fn head(&mut self, pattern: &str, target: impl Into<Target>) -> RouteHandle<'_> {
        self.add(&[Method::HEAD], pattern, target)
    }

    pub fn options(&mut self, pattern: &str, target: impl Into<Target>) -> RouteHandle<'_> {
        self.add(&[Method::OPTIONS], pattern, target)
    }

    pub fn shell(&mut self, pattern: &str, target: impl Into<Target>) -> RouteHandle<'_> {
        self.add(&[SHELL.clone()], pattern, target)
    }

    pub fn any(&mut self, pattern: &str, target: impl Into<Target>) -> RouteHandle<'_> {
        self.add(&any_verbs(), pattern, target)
    }

    /// Register the routes declared in `f` under `prefix`.
    ///
    /// Groups nest: the prefix stacks onto the enclosing group's and the new
    /// group records its parent. Returns the group id.
    pub fn group<F>(&mut self, prefix: &str, f: F) -> usize
    where
        F: FnOnce(&mut RouteCollector),
    {
        let id = self.groups.len();
        let full_prefix = format!("{}{}", self.prefix, prefix);
        self.groups.push(RouteGroup {
            id,
            prefix: full_prefix.clone(),
            parent: self.current_group,
        });

        let saved_prefix = std::mem::replace(&mut self.prefix, full_prefix);
        let saved_group = self.current_group.replace(id);
        f(self);
        self.prefix = saved_prefix;
        self.current_group = saved_group;
        id
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    pub fn groups(&self) -> &[RouteGroup] {
        &self.groups
    }

    /// Compile into a [`RouteTable`].
    pub fn build(self, controllers: &ControllerRegistry) -> RouteTable {
        let mut root = RadixNode::root();
        let mut routes = Vec::with_capacity(self.routes.len());
        let mut names = HashMap::new();
        let mut excluded = Vec::new();

        for route in self.routes {
            let route = Arc::new(route);
            if let Some(name) = route.name() {
                names.insert(name.to_string(), Arc::clone(&route));
            }
            routes.push(Arc::clone(&route));

            if let Target::Controller { controller, action } = route.target() {
                if controllers.resolve(controller, action).is_none() {
                    warn!(
                        pattern = %route.pattern(),
                        controller = %controller,
                        action = %action,
                        "Route target does not resolve - excluded from routing"
                    );
                    excluded.push(Arc::clone(&route));
                    continue;
                }
            }

            let segments = match parse_pattern(route.pattern()) {
                Ok(s) => s,
                Err(e) => {
                    warn!(pattern = %route.pattern(), error = %e, "Invalid route pattern - excluded from routing");
                    excluded.push(Arc::clone(&route));
                    continue;
                }
            };

            for verb in route.verbs() {
                if !root.insert(&segments, verb.clone(), Arc::clone(&route)) {
                    warn!(
                        method = %verb,
                        pattern = %route.pattern(),
                        "Duplicate route - first registration kept"
                    );
                }
            }
        }

        info!(
            routes_count = routes.len(),
            excluded_count = excluded.len(),
            named_count = names.len(),
            groups_count = self.groups.len(),
            "Route table compiled"
        );

        RouteTable {
            root,
            routes,
            names,
            groups: self.groups,
            excluded,
        }
    }
}

/// Outcome of matching a method and path.
#[derive(Debug, Clone)]
pub enum RouteLookup {
    Matched(RouteMatch),
    NotFound,
    MethodNotAllowed { allowed: Vec<Method> },
}

/// Compiled, immutable route table.
pub struct RouteTable {
    root: RadixNode,
    routes: Vec<Arc<Route>>,
    names: HashMap<String, Arc<Route>>,
    groups: Vec<RouteGroup>,
    excluded: Vec<Arc<Route>>,
}

impl RouteTable {
    /// Match `method` and `path`.
    ///
    /// `HEAD` falls back to a `GET` route. When the path matches but not
    /// the method, the methods that would have matched are returned.
    #[must_use]
    pub fn dispatch(&self, method: &Method, path: &str) -> RouteLookup {
        let segments = path_segments(path);
        let mut params = ParamVec::new();

        if let Some(route) = self.root.search(&segments, method, &mut params) {
            debug!(method = %method, path = %path, pattern = %route.pattern(), "Route matched");
            return RouteLookup::Matched(RouteMatch::new(route, params));
        }
        if *method == Method::HEAD {
            params.clear();
            if let Some(route) = self.root.search(&segments, &Method::GET, &mut params) {
                return RouteLookup::Matched(RouteMatch::new(route, params));
            }
        }

        let mut allowed = Vec::new();
        self.root.collect_allowed(&segments, &mut allowed);
        if allowed.is_empty() {
            debug!(method = %method, path = %path, "No route matched");
            RouteLookup::NotFound
        } else {
            debug!(method = %method, path = %path, allowed = ?allowed, "Method not allowed");
            RouteLookup::MethodNotAllowed { allowed }
        }
    }

    /// Every method with a route for `path`.
    pub fn allowed(&self, path: &str) -> Vec<Method> {
        let mut allowed = Vec::new();
        self.root.collect_allowed(&path_segments(path), &mut allowed);
        allowed
    }

    pub fn get_by_name(&self, name: &str) -> Option<Arc<Route>> {
        self.names.get(name).map(Arc::clone)
    }

    /// Every registered route in registration order, excluded ones included.
    pub fn routes(&self) -> &[Arc<Route>] {
        &self.routes
    }

    /// Routes left out of matching because their target did not resolve.
    pub fn excluded(&self) -> &[Arc<Route>] {
        &self.excluded
    }

    pub fn groups(&self) -> &[RouteGroup] {
        &self.groups
    }

    pub fn group(&self, id: usize) -> Option<&RouteGroup> {
        self.groups.get(id)
    }
}
