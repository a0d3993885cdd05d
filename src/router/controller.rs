use std::collections::HashMap;
use std::sync::Arc;

use crate::middleware::MiddlewareRef;
use crate::request::Request;
use crate::response::Reply;

use super::route::HandlerFn;

const ACTION_SUFFIX: &str = "Action";

/// Method name an action is stored under: `show` -> `showAction`.
///
/// An existing suffix is not doubled and an empty action means `index`.
pub fn action_method_name(action: &str) -> String {
    let base = action.strip_suffix(ACTION_SUFFIX).unwrap_or(action);
    let base = if base.is_empty() { "index" } else { base };
    format!("{base}{ACTION_SUFFIX}")
}

/// A controller action: its handler and method-level middleware.
#[derive(Clone)]
pub struct Action {
    handler: HandlerFn,
    middleware: Vec<MiddlewareRef>,
}

impl Action {
    pub fn handler(&self) -> &HandlerFn {
        &self.handler
    }

    pub fn middleware(&self) -> &[MiddlewareRef] {
        &self.middleware
    }
}

/// A named set of actions sharing controller-level middleware.
///
/// ```rust
/// use lark::router::Controller;
///
/// let users = Controller::new("UserController")
///     .middleware("auth")
///     .action("show", |req| Ok(req.route_param("id").map(str::to_string).into()));
/// assert!(users.get_action("showAction").is_some());
/// ```
#[derive(Clone)]
pub struct Controller {
    name: String,
    middleware: Vec<MiddlewareRef>,
    actions: HashMap<String, Action>,
}

impl Controller {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            middleware: Vec::new(),
            actions: HashMap::new(),
        }
    }

    /// Append controller-level middleware.
    #[must_use]
    pub fn middleware(mut self, mw: impl Into<MiddlewareRef>) -> Self {
        self.middleware.push(mw.into());
        self
    }

    #[must_use]
    pub fn action<F>(self, name: &str, f: F) -> Self
    where
        F: Fn(&Request) -> anyhow::Result<Reply> + Send + Sync + 'static,
    {
        self.action_with(name, Vec::new(), f)
    }

    /// Register an action with its own middleware, run innermost.
    #[must_use]
    pub fn action_with<F>(mut self, name: &str, middleware: Vec<MiddlewareRef>, f: F) -> Self
    where
        F: Fn(&Request) -> anyhow::Result<Reply> + Send + Sync + 'static,
    {
        self.actions.insert(
            action_method_name(name),
            Action {
                handler: Arc::new(f),
                middleware,
            },
        );
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn middlewares(&self) -> &[MiddlewareRef] {
        &self.middleware
    }

    /// Look up by stored method name (`showAction`).
    pub fn get_action(&self, method_name: &str) -> Option<&Action> {
        self.actions.get(method_name)
    }
}

/// Controllers by name.
#[derive(Clone, Default)]
pub struct ControllerRegistry {
    controllers: HashMap<String, Controller>,
}

impl ControllerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `controller`, replacing any with the same name.
    pub fn register(&mut self, controller: Controller) {
        self.controllers
            .insert(controller.name.clone(), controller);
    }

    pub fn get(&self, name: &str) -> Option<&Controller> {
        self.controllers.get(name)
    }

    pub fn resolve(&self, controller: &str, method_name: &str) -> Option<(&Controller, &Action)> {
        let c = self.controllers.get(controller)?;
        let a = c.get_action(method_name)?;
        Some((c, a))
    }

    pub fn len(&self) -> usize {
        self.controllers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.controllers.is_empty()
    }
}
