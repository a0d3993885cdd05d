use http::Method;
use lark::router::{
    action, handler, Controller, ControllerRegistry, RouteCollector, RouteLookup, SHELL,
};
use lark::RouteError;

fn ok() -> lark::router::Target {
    handler(|_| Ok(().into()))
}

fn controllers() -> ControllerRegistry {
    let mut registry = ControllerRegistry::new();
    registry.register(
        Controller::new("Blog")
            .action("index", |_| Ok("index".into()))
            .action("show", |_| Ok("show".into())),
    );
    registry
}

#[test]
fn test_named_route_url_generation() {
    let mut r = RouteCollector::new();
    r.group("/blog", |r| {
        r.get("/{year:\\d{4}}/{slug}", action("Blog", "show"))
            .name("blog.post");
    });
    let table = r.build(&controllers());

    let route = table.get_by_name("blog.post").unwrap();
    assert_eq!(
        route.url(&[("year", "2024"), ("slug", "hello world")]).unwrap(),
        "/blog/2024/hello%20world"
    );
    assert_eq!(
        route.url(&[("year", "24"), ("slug", "x")]),
        Err(RouteError::ConstraintMismatch {
            param: "year".into(),
            value: "24".into()
        })
    );
    assert!(table.get_by_name("nope").is_none());
}

#[test]
fn test_match_exposes_target_and_params() {
    let mut r = RouteCollector::new();
    r.get("/blog/{year:\\d{4}}/{slug}", action("Blog", "show"));
    let table = r.build(&controllers());

    let RouteLookup::Matched(m) = table.dispatch(&Method::GET, "/blog/2023/rust") else {
        panic!("expected a match");
    };
    assert_eq!(m.param("year"), Some("2023"));
    assert_eq!(m.param("slug"), Some("rust"));
    assert!(matches!(
        m.target(),
        lark::router::Target::Controller { controller, action }
            if controller == "Blog" && action == "showAction"
    ));
    assert!(matches!(
        table.dispatch(&Method::GET, "/blog/23/rust"),
        RouteLookup::NotFound
    ));
}

#[test]
fn test_duplicate_registration_first_wins() {
    let mut r = RouteCollector::new();
    r.get("/dup", handler(|_| Ok("first".into()))).name("first");
    r.get("/dup", handler(|_| Ok("second".into()))).name("second");
    let table = r.build(&ControllerRegistry::new());

    let RouteLookup::Matched(m) = table.dispatch(&Method::GET, "/dup") else {
        panic!("expected a match");
    };
    assert_eq!(m.route().name(), Some("first"));
    assert_eq!(table.routes().len(), 2);
}

#[test]
fn test_shell_verb_is_distinct() {
    let mut r = RouteCollector::new();
    r.shell("/cron/cleanup", ok());
    let table = r.build(&ControllerRegistry::new());
    assert!(matches!(
        table.dispatch(&SHELL, "/cron/cleanup"),
        RouteLookup::Matched(_)
    ));
    let RouteLookup::MethodNotAllowed { allowed } = table.dispatch(&Method::POST, "/cron/cleanup")
    else {
        panic!("expected 405");
    };
    assert_eq!(allowed, vec![SHELL.clone()]);
}

#[test]
fn test_generic_add_with_several_verbs() {
    let mut r = RouteCollector::new();
    r.add(&[Method::PUT, Method::PATCH], "/profile", ok());
    let table = r.build(&ControllerRegistry::new());
    assert!(matches!(table.dispatch(&Method::PUT, "/profile"), RouteLookup::Matched(_)));
    assert!(matches!(table.dispatch(&Method::PATCH, "/profile"), RouteLookup::Matched(_)));
    assert!(matches!(
        table.dispatch(&Method::GET, "/profile"),
        RouteLookup::MethodNotAllowed { .. }
    ));
}

#[test]
fn test_invalid_pattern_is_excluded() {
    let mut r = RouteCollector::new();
    r.get("no-leading-slash", ok());
    r.get("/bad/{id:(}", ok());
    r.get("/good", ok());
    let table = r.build(&ControllerRegistry::new());
    assert_eq!(table.excluded().len(), 2);
    assert!(matches!(table.dispatch(&Method::GET, "/good"), RouteLookup::Matched(_)));
}

#[test]
fn test_root_route() {
    let mut r = RouteCollector::new();
    r.get("/", ok());
    let table = r.build(&ControllerRegistry::new());
    assert!(matches!(table.dispatch(&Method::GET, "/"), RouteLookup::Matched(_)));
    assert!(matches!(table.dispatch(&Method::GET, "/x"), RouteLookup::NotFound));
}
