use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use tracing::info;

use crate::config::{Config, DispatchSettings};
use crate::dispatcher::ConnectionDispatcher;
use crate::logging::LogConfig;
use crate::middleware::{Middleware, MiddlewareRef, MiddlewareRegistry};
use crate::request::{ParseContext, ParseMemo, UploadSettings};
use crate::router::{Controller, ControllerRegistry, RouteCollector};

/// Assembles routes, controllers and middleware into a
/// [`ConnectionDispatcher`].
///
/// ```rust
/// use lark::router::handler;
/// use lark::App;
///
/// let mut app = App::new();
/// app.settings_mut().public_root = None;
/// app.routes().get("/hello/{name}", handler(|req| {
///     Ok(format!("hello {}", req.route_param("name").unwrap_or("you")).into())
/// }));
/// let mut dispatcher = app.build();
///
/// let sent = dispatcher.dispatch("GET /hello/ada HTTP/1.1\r\n\r\n");
/// assert_eq!(sent.response.body_text(), Some("hello ada"));
/// assert!(sent.keep_alive);
/// ```
#[derive(Default)]
pub struct App {
    settings: DispatchSettings,
    routes: RouteCollector,
    controllers: ControllerRegistry,
    middleware: MiddlewareRegistry,
    globals: Vec<MiddlewareRef>,
}

impl App {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_settings(settings: DispatchSettings) -> Self {
        Self {
            settings,
            ..Self::default()
        }
    }

    /// Settings from `config`, with `LARK_*` environment overrides applied.
    pub fn from_config(config: &Config) -> Self {
        Self::with_settings(DispatchSettings::load(config))
    }

    pub fn settings(&self) -> &DispatchSettings {
        &self.settings
    }

    pub fn settings_mut(&mut self) -> &mut DispatchSettings {
        &mut self.settings
    }

    /// Logging setup for these settings: the dev preset in debug mode, prod
    /// otherwise, with `LARK_LOG_*` overrides.
    pub fn log_config(&self) -> LogConfig {
        LogConfig::for_settings(&self.settings)
    }

    pub fn routes(&mut self) -> &mut RouteCollector {
        &mut self.routes
    }

    pub fn controller(&mut self, controller: Controller) -> &mut Self {
        self.controllers.register(controller);
        self
    }

    /// Make `mw` available to routes, controllers and actions as `name`.
    pub fn register_middleware(
        &mut self,
        name: impl Into<String>,
        mw: Arc<dyn Middleware>,
    ) -> &mut Self {
        self.middleware.register(name, mw);
        self
    }

    /// Append middleware that wraps every route and static file.
    pub fn global(&mut self, mw: impl Into<MiddlewareRef>) -> &mut Self {
        self.globals.push(mw.into());
        self
    }

    /// Compile the route table and hand everything to a dispatcher.
    pub fn build(self) -> ConnectionDispatcher {
        let routes = self.routes.build(&self.controllers);
        let context = ParseContext {
            memo: Some(Rc::new(RefCell::new(ParseMemo::default()))),
            uploads: UploadSettings {
                tmp_dir: self.settings.upload_tmp_dir.clone(),
                max_sections: self.settings.max_file_uploads,
            },
        };
        info!(
            controllers = self.controllers.len(),
            middleware = self.middleware.len(),
            globals = self.globals.len(),
            debug = self.settings.debug,
            public_root = ?self.settings.public_root,
            "Dispatcher built"
        );
        ConnectionDispatcher::new(
            routes,
            self.controllers,
            self.middleware,
            self.globals,
            context,
            self.settings,
        )
    }
}
