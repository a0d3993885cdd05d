use http::Method;
use regex::Regex;
use smallvec::SmallVec;
use std::fmt;
use std::sync::Arc;

use crate::error::RouteError;
use crate::middleware::MiddlewareRef;
use crate::request::Request;
use crate::response::Reply;

use super::controller::action_method_name;

/// Boxed route handler.
pub type HandlerFn = Arc<dyn Fn(&Request) -> anyhow::Result<Reply> + Send + Sync>;

/// Path params stored inline before spilling to the heap.
pub const MAX_INLINE_PARAMS: usize = 8;

/// Path parameters bound by a match, in pattern order.
pub type ParamVec = SmallVec<[(Arc<str>, String); MAX_INLINE_PARAMS]>;

/// Wrap a closure as a route target.
///
/// ```rust
/// use lark::router::handler;
///
/// let target = handler(|req| Ok(format!("hello {}", req.path()).into()));
/// ```
pub fn handler<F>(f: F) -> Target
where
    F: Fn(&Request) -> anyhow::Result<Reply> + Send + Sync + 'static,
{
    Target::Handler(Arc::new(f))
}

/// Controller action as a route target. `action` is normalised to its
/// method name (`show` and `showAction` both become `showAction`).
pub fn action(controller: &str, action: &str) -> Target {
    Target::Controller {
        controller: controller.to_string(),
        action: action_method_name(action),
    }
}

/// What a route runs.
#[derive(Clone)]
pub enum Target {
    Handler(HandlerFn),
    Controller { controller: String, action: String },
}

impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Handler(_) => f.write_str("Handler(<closure>)"),
            Target::Controller { controller, action } => {
                write!(f, "Controller({controller}@{action})")
            }
        }
    }
}

impl From<HandlerFn> for Target {
    fn from(f: HandlerFn) -> Self {
        Target::Handler(f)
    }
}

/// One segment of a compiled pattern.
#[derive(Debug, Clone)]
pub(crate) enum Segment {
    Static(String),
    Param {
        name: Arc<str>,
        constraint: Option<Regex>,
    },
}

/// Split a pattern into segments.
///
/// `{name}` matches any single segment; `{name:regex}` must also satisfy
/// the anchored regex. Empty segments are dropped, so `/a//b/` and `/a/b`
/// compile to the same thing.
pub(crate) fn parse_pattern(pattern: &str) -> Result<Vec<Segment>, RouteError> {
    if !pattern.starts_with('/') {
        return Err(RouteError::InvalidPattern(pattern.to_string()));
    }
    pattern
        .split('/')
        .filter(|s| !s.is_empty())
        .map(|seg| {
            let Some(inner) = seg.strip_prefix('{').and_then(|s| s.strip_suffix('}')) else {
                return Ok(Segment::Static(seg.to_string()));
            };
            let (name, constraint) = match inner.split_once(':') {
                Some((name, re)) => {
                    let compiled = Regex::new(&format!("^(?:{re})$")).map_err(|e| {
                        RouteError::InvalidConstraint {
                            param: name.to_string(),
                            reason: e.to_string(),
                        }
                    })?;
                    (name, Some(compiled))
                }
                None => (inner, None),
            };
            if name.is_empty() {
                return Err(RouteError::InvalidPattern(pattern.to_string()));
            }
            Ok(Segment::Param {
                name: Arc::from(name),
                constraint,
            })
        })
        .collect()
}

/// A registered route. Immutable once the table is built.
#[derive(Debug, Clone)]
pub struct Route {
    pub(crate) verbs: Vec<Method>,
    pub(crate) pattern: String,
    pub(crate) target: Target,
    pub(crate) middleware: Vec<MiddlewareRef>,
    pub(crate) name: Option<String>,
    pub(crate) group: Option<usize>,
}

impl Route {
    pub(crate) fn new(verbs: Vec<Method>, pattern: String, target: Target) -> Self {
        Self {
            verbs,
            pattern,
            target,
            middleware: Vec::new(),
            name: None,
            group: None,
        }
    }

    pub fn verbs(&self) -> &[Method] {
        &self.verbs
    }

    /// Full pattern, group prefixes included.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    /// Route-level middleware, in declared order.
    pub fn middleware(&self) -> &[MiddlewareRef] {
        &self.middleware
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Group the route was declared in.
    pub fn group(&self) -> Option<usize> {
        self.group
    }

    /// Build a URL by substituting `params` into the pattern.
    ///
    /// # Errors
    ///
    /// A placeholder with no value, or a value failing its constraint.
    pub fn url(&self, params: &[(&str, &str)]) -> Result<String, RouteError> {
        let segments = parse_pattern(&self.pattern)?;
        let mut url = String::with_capacity(self.pattern.len());
        for segment in &segments {
            url.push('/');
            match segment {
                Segment::Static(s) => url.push_str(s),
                Segment::Param { name, constraint } => {
                    let value = params
                        .iter()
                        .find(|(k, _)| *k == name.as_ref())
                        .map(|(_, v)| *v)
                        .ok_or_else(|| RouteError::MissingParameter(name.to_string()))?;
                    if constraint.as_ref().is_some_and(|re| !re.is_match(value)) {
                        return Err(RouteError::ConstraintMismatch {
                            param: name.to_string(),
                            value: value.to_string(),
                        });
                    }
                    url.push_str(&urlencoding::encode(value));
                }
            }
        }
        if url.is_empty() {
            url.push('/');
        }
        Ok(url)
    }
}

/// A route plus the parameters one request bound to it.
#[derive(Debug, Clone)]
pub struct RouteMatch {
    route: Arc<Route>,
    params: ParamVec,
}

impl RouteMatch {
    pub(crate) fn new(route: Arc<Route>, params: ParamVec) -> Self {
        Self { route, params }
    }

    pub fn route(&self) -> &Arc<Route> {
        &self.route
    }

    pub fn target(&self) -> &Target {
        &self.route.target
    }

    pub fn params(&self) -> &ParamVec {
        &self.params
    }

    /// Last write wins when a name repeats along the pattern.
    #[inline]
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .rev()
            .find(|(k, _)| k.as_ref() == name)
            .map(|(_, v)| v.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route(pattern: &str) -> Route {
        Route::new(
            vec![Method::GET],
            pattern.to_string(),
            handler(|_| Ok(().into())),
        )
    }

    #[test]
    fn test_parse_pattern() {
        let segments = parse_pattern("/users/{id:\\d+}/posts//{slug}/").unwrap();
        assert_eq!(segments.len(), 4);
        assert!(matches!(&segments[0], Segment::Static(s) if s == "users"));
        assert!(matches!(&segments[1], Segment::Param { name, constraint: Some(_) } if name.as_ref() == "id"));
        assert!(matches!(&segments[3], Segment::Param { name, constraint: None } if name.as_ref() == "slug"));
    }

    #[test]
    fn test_parse_pattern_rejects_bad_input() {
        assert!(matches!(
            parse_pattern("users"),
            Err(RouteError::InvalidPattern(_))
        ));
        assert!(matches!(
            parse_pattern("/x/{}"),
            Err(RouteError::InvalidPattern(_))
        ));
        assert!(matches!(
            parse_pattern("/x/{id:(}"),
            Err(RouteError::InvalidConstraint { .. })
        ));
    }

    #[test]
    fn test_url_generation() {
        let r = route("/users/{id:\\d+}/files/{name}");
        assert_eq!(
            r.url(&[("id", "7"), ("name", "a b.txt")]).unwrap(),
            "/users/7/files/a%20b.txt"
        );
        assert_eq!(
            r.url(&[("id", "7")]),
            Err(RouteError::MissingParameter("name".into()))
        );
        assert!(matches!(
            r.url(&[("id", "x"), ("name", "n")]),
            Err(RouteError::ConstraintMismatch { .. })
        ));
        assert_eq!(route("/").url(&[]).unwrap(), "/");
    }
}
