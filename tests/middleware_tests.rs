use lark::middleware::{
    from_fn, AccessLogMiddleware, AuthMiddleware, Middleware, MiddlewareRef, MiddlewareRegistry,
    MiddlewareSource, PipelineBuilder,
};
use lark::router::{action, handler, Controller, ControllerRegistry, RouteCollector};
use lark::Response;
use std::sync::{Arc, Mutex};

mod common;
use common::{app, get, message};

type Log = Arc<Mutex<Vec<String>>>;

fn tagger(log: &Log, tag: &str) -> Arc<dyn Middleware> {
    let log = Arc::clone(log);
    let tag = tag.to_string();
    from_fn(move |req, next| {
        log.lock().unwrap().push(tag.clone());
        Ok(next.run(req))
    })
}

#[test]
fn test_global_controller_route_method_order() {
    let log: Log = Arc::default();
    let handler_log = Arc::clone(&log);

    let mut app = app();
    app.register_middleware("A", tagger(&log, "A"))
        .register_middleware("B", tagger(&log, "B"))
        .register_middleware("C", tagger(&log, "C"))
        .register_middleware("D", tagger(&log, "D"));
    app.global("A");
    app.controller(
        Controller::new("Orders").middleware("B").action_with(
            "list",
            vec![MiddlewareRef::from("D")],
            move |_| {
                handler_log.lock().unwrap().push("handler".into());
                Ok("orders".into())
            },
        ),
    );
    app.routes()
        .get("/orders", action("Orders", "list"))
        .middleware("C");
    let mut dispatcher = app.build();

    let sent = dispatcher.dispatch(get("/orders"));
    assert_eq!(sent.response.body_text(), Some("orders"));
    assert_eq!(*log.lock().unwrap(), vec!["A", "B", "C", "D", "handler"]);

    log.lock().unwrap().clear();
    dispatcher.dispatch(get("/orders"));
    assert_eq!(*log.lock().unwrap(), vec!["A", "B", "C", "D", "handler"]);
}

#[test]
fn test_build_chain_reports_sources() {
    let mut registry = MiddlewareRegistry::new();
    for name in ["g", "c", "r", "m"] {
        registry.register(name, from_fn(|req, next| Ok(next.run(req))));
    }
    let mut controllers = ControllerRegistry::new();
    controllers.register(Controller::new("Ctl").middleware("c").action_with(
        "go",
        vec!["m".into()],
        |_| Ok(().into()),
    ));
    let mut routes = RouteCollector::new();
    routes.get("/go", action("Ctl", "go")).middleware("r");
    let table = routes.build(&controllers);

    let globals = vec![MiddlewareRef::from("g")];
    let builder = PipelineBuilder::new(&registry, &controllers, &globals, false);
    let chain = builder.build_chain(&table.routes()[0]).unwrap();
    let summary: Vec<(MiddlewareSource, &str)> = chain
        .iter()
        .map(|e| (e.source, e.label.as_str()))
        .collect();
    assert_eq!(
        summary,
        vec![
            (MiddlewareSource::Global, "g"),
            (MiddlewareSource::Controller, "c"),
            (MiddlewareSource::Route, "r"),
            (MiddlewareSource::Method, "m"),
        ]
    );
}

#[test]
fn test_short_circuit_prevents_handler() {
    let ran = Arc::new(Mutex::new(false));
    let flag = Arc::clone(&ran);

    let mut app = app();
    app.routes()
        .get(
            "/guarded",
            handler(move |_| {
                *flag.lock().unwrap() = true;
                Ok("secret".into())
            }),
        )
        .middleware(from_fn(|_, _| Ok(Response::text(403, "forbidden"))));
    let mut dispatcher = app.build();

    let sent = dispatcher.dispatch(get("/guarded"));
    assert_eq!(sent.response.status(), 403);
    assert!(!*ran.lock().unwrap());
}

#[test]
fn test_post_processing_sees_downstream_failure() {
    let seen = Arc::new(Mutex::new(None));
    let observed = Arc::clone(&seen);

    let mut app = app();
    app.global(from_fn(move |req, next| {
        let response = next.run(req);
        *observed.lock().unwrap() = Some(response.status());
        Ok(response.with_header("X-Wrapped", "yes"))
    }));
    app.routes()
        .get("/boom", handler(|_| Ok("never".into())))
        .middleware(from_fn(|_, _| panic!("middleware exploded")));
    let mut dispatcher = app.build();

    let sent = dispatcher.dispatch(get("/boom"));
    assert_eq!(sent.response.status(), 500);
    assert_eq!(sent.response.header("x-wrapped"), Some("yes"));
    assert_eq!(*seen.lock().unwrap(), Some(500));
}

#[test]
fn test_unknown_middleware_name_is_500() {
    let mut app = app();
    app.routes()
        .get("/x", handler(|_| Ok("x".into())))
        .middleware("not-registered");
    let mut dispatcher = app.build();

    let sent = dispatcher.dispatch(get("/x"));
    assert_eq!(sent.response.status(), 500);
    assert!(!dispatcher.cache().contains_key("GET/x"));
}

#[test]
fn test_auth_middleware_through_dispatcher() {
    let mut app = app();
    app.register_middleware("auth", Arc::new(AuthMiddleware::new("Bearer s3cret")));
    app.global(Arc::new(AccessLogMiddleware) as Arc<dyn Middleware>);
    app.routes()
        .get("/me", handler(|_| Ok("profile".into())))
        .middleware("auth");
    let mut dispatcher = app.build();

    let denied = dispatcher.dispatch(get("/me"));
    assert_eq!(denied.response.status(), 401);

    let allowed = dispatcher.dispatch(message(
        "GET",
        "/me",
        &[("Authorization", "Bearer s3cret")],
        b"",
    ));
    assert_eq!(allowed.response.status(), 200);
    assert_eq!(allowed.response.body_text(), Some("profile"));
}

#[test]
fn test_properties_flow_downstream() {
    let mut app = app();
    app.global(from_fn(|req, next| {
        req.set_property("tenant", serde_json::json!("acme"));
        Ok(next.run(req))
    }));
    app.routes().get(
        "/tenant",
        handler(|req| Ok(req.property("tenant").into())),
    );
    let mut dispatcher = app.build();
    let sent = dispatcher.dispatch(get("/tenant"));
    assert_eq!(sent.response.body_text(), Some("acme"));
}
